//! Performance statistics collection for `--stats` output.

use std::time::{Duration, Instant};

/// Collects dispatch counters and phase timings.
///
/// Created when `--stats` is passed, threaded as `Option<&mut Stats>`.
/// Nothing is timed or counted when `None`.
pub struct Stats {
    total_start: Instant,
    phases: Vec<(&'static str, Duration)>,
    pub dispatches: u32,
    /// Blocking device-to-host reads: one per iteration plus the final
    /// materialization.
    pub readbacks: u32,
    pub iterations: u32,
    pub solves: u32,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_start: Instant::now(),
            phases: Vec::new(),
            dispatches: 0,
            readbacks: 0,
            iterations: 0,
            solves: 0,
        }
    }

    /// Record a completed phase with its duration.
    pub fn add_phase(&mut self, name: &'static str, duration: Duration) {
        self.phases.push((name, duration));
    }

    pub fn phases(&self) -> &[(&'static str, Duration)] {
        &self.phases
    }

    /// Print the stats table to stderr.
    pub fn display(&self) {
        let total = self.total_start.elapsed();
        eprintln!();
        eprintln!("=== Jacobi Relax Stats ===");

        for (name, dur) in &self.phases {
            eprintln!("  {:<24} {:>8.3}s", name, dur.as_secs_f64());
        }

        eprintln!("  Solves:                 {}", self.solves);
        eprintln!("  Iterations:             {}", self.iterations);
        eprintln!("  ─────────────────────────────────");
        eprintln!("  Total:                  {:>8.3}s", total.as_secs_f64());
        eprintln!("  Dispatches:             {}", self.dispatches);
        eprintln!("  Readbacks:              {}", self.readbacks);
    }
}
