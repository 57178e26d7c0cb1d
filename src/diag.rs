//! Process-wide shared state (§5): a diagnostic read counter and a shared
//! "no values" pmid cache, each guarded by its own mutex and initialized
//! lazily.
//!
//! Grounded on spec.md §5 ("Shared global state... guarded by a single
//! process-wide mutex held only across the critical section that mutates
//! it") and generalized from the teacher's single-owned-map-behind-one-
//! lock pattern for its block dedup cache.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;

/// Sentinel value substituted for any pmid a caller requested but that is
/// absent from a given record (§4.7 `fetch`). Shared and keyed by pmid so
/// repeated misses on the same metric don't allocate a fresh stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoValuesStub {
    pub pmid: u32,
}

static NO_VALUES_CACHE: Lazy<Mutex<HashMap<u32, NoValuesStub>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Fetch (creating if necessary) the shared "no values" stub for `pmid`.
pub fn no_values_stub(pmid: u32) -> NoValuesStub {
    let mut cache = NO_VALUES_CACHE.lock().unwrap();
    cache
        .entry(pmid)
        .or_insert_with(|| NoValuesStub { pmid })
        .clone()
}

/// Snapshot of the process-wide diagnostic counters (`__pmLogReads`
/// analogue). Updated non-atomically — missed updates under contention
/// are acceptable per §5.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub reads: u64,
    pub marks_synthesized: u64,
}

static STATS: Lazy<Mutex<Stats>> = Lazy::new(|| Mutex::new(Stats::default()));

pub fn record_read() {
    let mut s = STATS.lock().unwrap();
    s.reads += 1;
}

pub fn record_mark_synthesized() {
    let mut s = STATS.lock().unwrap();
    s.marks_synthesized += 1;
}

pub fn snapshot() -> Stats {
    *STATS.lock().unwrap()
}
