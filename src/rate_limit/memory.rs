//! Process-local fallback counter.
//!
//! Takes over when the shared store is unreachable. Only this process's
//! traffic is visible here, so under a multi-instance deployment the
//! effective limit is multiplied by the instance count while the store is
//! down. That is a documented degradation of the fail-open design, not a
//! bug to patch around.
//!
//! The map is bounded two ways: a deterministic sweep drops expired windows
//! every `sweep_interval` increments (amortized, reproducible in tests), and
//! if the map still exceeds `capacity`, entries closest to expiry are evicted
//! first.

use std::collections::HashMap;
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 10_000;
const DEFAULT_SWEEP_INTERVAL: u64 = 64;

#[derive(Debug)]
struct WindowEntry {
    count: u64,
    reset_at_ms: u64,
}

#[derive(Debug, Default)]
struct CounterState {
    counters: HashMap<(String, u64), WindowEntry>,
    ops: u64,
}

/// Bounded in-process counter keyed by `(key, window_index)`.
#[derive(Debug)]
pub struct FallbackCounter {
    state: Mutex<CounterState>,
    capacity: usize,
    sweep_interval: u64,
}

impl Default for FallbackCounter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl FallbackCounter {
    /// Counter holding at most `capacity` window entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CounterState::default()),
            capacity: capacity.max(1),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Run the expiry sweep every `every` increments instead of the default.
    pub fn with_sweep_interval(mut self, every: u64) -> Self {
        self.sweep_interval = every.max(1);
        self
    }

    /// Increment the counter for `(key, window_index)`, creating it with
    /// `reset_at_ms` on first use, and return the post-increment count.
    pub fn increment(&self, key: &str, window_index: u64, now_ms: u64, reset_at_ms: u64) -> u64 {
        let mut state = self.state.lock().unwrap();

        state.ops += 1;
        if state.ops % self.sweep_interval == 0 {
            state.counters.retain(|_, entry| entry.reset_at_ms > now_ms);
        }

        let entry = state
            .counters
            .entry((key.to_string(), window_index))
            .or_insert(WindowEntry { count: 0, reset_at_ms });
        entry.count += 1;
        let count = entry.count;

        while state.counters.len() > self.capacity {
            let victim = state
                .counters
                .iter()
                .min_by_key(|(_, entry)| entry.reset_at_ms)
                .map(|(window_key, _)| window_key.clone());
            match victim {
                Some(window_key) => {
                    state.counters.remove(&window_key);
                }
                None => break,
            }
        }

        count
    }

    /// Number of live window entries.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
