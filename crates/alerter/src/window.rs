//! Tumbling window of polling cycles.
//!
//! Counts, per key, the cycles in which the key was observed. The window
//! spans a fixed number of cycles; when the last cycle of a window closes,
//! every count is discarded and a fresh window starts. A key therefore
//! qualifies only if it was observed in every cycle of one window; counts
//! that straddle a window boundary are lost.
//!
//! ```text
//! cycle:    1     2     3  | 4     5     6  | ...
//! window:   [-- window 1 --] [-- window 2 --]
//!                         ^ reset          ^ reset
//! ```

use std::collections::HashMap;
use std::hash::Hash;

/// Tumbling per-key cycle counter.
#[derive(Debug, Clone)]
pub struct CycleWindow<K> {
    window_cycles: u32,
    /// 0-based position of the current cycle inside the window
    cycle: u32,
    counts: HashMap<K, Observation>,
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    count: u32,
    /// Window-relative cycle of the last increment
    last_cycle: u32,
}

impl<K: Eq + Hash + Clone> CycleWindow<K> {
    /// Create a window spanning `window_cycles` cycles (at least one).
    pub fn new(window_cycles: u32) -> Self {
        Self {
            window_cycles: window_cycles.max(1),
            cycle: 0,
            counts: HashMap::new(),
        }
    }

    pub fn window_cycles(&self) -> u32 {
        self.window_cycles
    }

    /// 1-based number of the current cycle within the window.
    pub fn current_cycle(&self) -> u32 {
        self.cycle + 1
    }

    /// Record an observation of `key` in the current cycle.
    ///
    /// Repeated observations within one cycle count once.
    pub fn observe(&mut self, key: K) {
        let cycle = self.cycle;
        self.counts
            .entry(key)
            .and_modify(|obs| {
                if obs.last_cycle != cycle {
                    obs.count += 1;
                    obs.last_cycle = cycle;
                }
            })
            .or_insert(Observation {
                count: 1,
                last_cycle: cycle,
            });
    }

    pub fn count(&self, key: &K) -> u32 {
        self.counts.get(key).map_or(0, |obs| obs.count)
    }

    /// All keys observed in the current window with their counts.
    pub fn entries(&self) -> impl Iterator<Item = (&K, u32)> {
        self.counts.iter().map(|(key, obs)| (key, obs.count))
    }

    /// Keys observed in every cycle of the window so far, once the window
    /// is complete. Only non-empty during the last cycle of a window.
    pub fn saturated(&self) -> impl Iterator<Item = &K> {
        let target = self.window_cycles;
        self.counts
            .iter()
            .filter(move |(_, obs)| obs.count == target)
            .map(|(key, _)| key)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Close the current cycle. Returns `true` when this closed the window
    /// and all counts were reset.
    pub fn end_cycle(&mut self) -> bool {
        self.cycle += 1;
        if self.cycle >= self.window_cycles {
            self.cycle = 0;
            self.counts.clear();
            true
        } else {
            false
        }
    }
}
