//! Phase timing for progress output.

use std::time::{Duration, Instant};

/// Wall-clock time spent in one named phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTime {
    pub name: String,
    pub elapsed: Duration,
}

/// Running clock for a phase; [`Timer::finish`] prints and records it.
pub struct Timer {
    name: String,
    started: Instant,
}

impl Timer {
    pub fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    pub fn finish(self) -> PhaseTime {
        let elapsed = self.started.elapsed();
        println!("  [{}] {}", format_duration(elapsed), self.name);
        PhaseTime {
            name: self.name,
            elapsed,
        }
    }
}

/// Sum of all phases.
pub fn total(phases: &[PhaseTime]) -> Duration {
    phases.iter().map(|p| p.elapsed).sum()
}

/// `2.5s` under a minute, `1.5m` from a minute on.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}
