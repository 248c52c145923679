use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

/// An interned name.
///
/// A single process-wide string pool; no need for symbol serialization or cross-module identity
/// beyond name equality.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

struct Interner {
    strings: Vec<Arc<str>>,
    index: FxHashMap<Arc<str>, u32>,
}

static INTERNER: std::sync::LazyLock<RwLock<Interner>> = std::sync::LazyLock::new(|| {
    RwLock::new(Interner { strings: Vec::new(), index: FxHashMap::default() })
});

impl Symbol {
    pub fn intern(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        {
            let interner = INTERNER.read().unwrap();
            if let Some(id) = interner.index.get(name) {
                return Symbol(*id);
            }
        }
        let mut interner = INTERNER.write().unwrap();
        if let Some(id) = interner.index.get(name) {
            return Symbol(*id);
        }
        let id = interner.strings.len() as u32;
        let arc: Arc<str> = Arc::from(name);
        interner.strings.push(arc.clone());
        interner.index.insert(arc, id);
        Symbol(id)
    }

    pub fn as_str(&self) -> Arc<str> {
        INTERNER.read().unwrap().strings[self.0 as usize].clone()
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Symbol::intern(value)
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Symbol::intern(value)
    }
}
