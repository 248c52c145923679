use rustc_hash::FxHashMap;

/// A per-pipeline counter map, incremented by named counters as transforms run.
///
/// A single explicit value threaded through one pipeline run, rather than process-wide counters
/// reported at destruction: counting stays scoped to the run that produced it.
#[derive(Default, Debug, Clone)]
pub struct PassStatistics {
    enabled: bool,
    counters: FxHashMap<&'static str, u64>,
}

impl PassStatistics {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, counters: FxHashMap::default() }
    }

    /// Increments the named counter by one. A no-op when statistics collection is disabled, so
    /// hot-path transforms can call this unconditionally without a cfg check at each call site.
    pub fn bump(&mut self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&mut self, name: &'static str, amount: u64) {
        if !self.enabled {
            return;
        }
        *self.counters.entry(name).or_insert(0) += amount;
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.counters.iter().map(|(k, v)| (*k, *v))
    }

    /// Emits every non-zero counter as a `log::info!` line, in the style of the original's
    /// `-stats` teardown report.
    pub fn report(&self) {
        for (name, value) in self.iter() {
            if value != 0 {
                log::info!("{name}: {value}");
            }
        }
    }
}
