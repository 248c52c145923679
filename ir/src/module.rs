use cranelift_entity::PrimaryMap;
use rustc_hash::FxHashMap;

use crate::{
    function::{FuncRef, Function, Linkage},
    symbol::Symbol,
    types::TypeInterner,
    Type,
};

/// A global variable or external data declaration.
#[derive(Debug, Clone)]
pub struct GlobalData {
    pub name: Symbol,
    pub ty: Type,
    pub linkage: Linkage,
    pub is_constant: bool,
}

/// The top-level compilation unit: a set of functions and globals sharing one [TypeInterner] and
/// one module-wide symbol namespace.
pub struct Module {
    pub name: Symbol,
    pub types: TypeInterner,
    funcs: PrimaryMap<FuncRef, Function>,
    func_by_name: FxHashMap<Symbol, FuncRef>,
    globals: Vec<GlobalData>,
    global_by_name: FxHashMap<Symbol, usize>,
}

impl Module {
    pub fn new(name: impl Into<Symbol>) -> Self {
        Self {
            name: name.into(),
            types: TypeInterner::new(),
            funcs: PrimaryMap::new(),
            func_by_name: FxHashMap::default(),
            globals: Vec::new(),
            global_by_name: FxHashMap::default(),
        }
    }

    pub fn declare_function(&mut self, name: impl Into<Symbol>, sig: Type) -> FuncRef {
        let name = name.into();
        if let Some(existing) = self.func_by_name.get(&name) {
            return *existing;
        }
        let func = self.funcs.push(Function::new(name, sig));
        self.func_by_name.insert(name, func);
        func
    }

    pub fn func(&self, func: FuncRef) -> &Function {
        &self.funcs[func]
    }

    pub fn func_mut(&mut self, func: FuncRef) -> &mut Function {
        &mut self.funcs[func]
    }

    pub fn func_by_name(&self, name: impl Into<Symbol>) -> Option<FuncRef> {
        self.func_by_name.get(&name.into()).copied()
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncRef, &Function)> {
        self.funcs.iter()
    }

    pub fn functions_mut(&mut self) -> impl Iterator<Item = (FuncRef, &mut Function)> {
        self.funcs.iter_mut()
    }

    pub fn declare_global(&mut self, data: GlobalData) -> Symbol {
        let name = data.name;
        let idx = self.globals.len();
        self.globals.push(data);
        self.global_by_name.insert(name, idx);
        name
    }

    pub fn global(&self, name: Symbol) -> Option<&GlobalData> {
        self.global_by_name.get(&name).map(|&i| &self.globals[i])
    }

    pub fn globals(&self) -> &[GlobalData] {
        &self.globals
    }
}
