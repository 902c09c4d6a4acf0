use std::io::{self, Write};
use std::time::Instant;

/// User-facing progress lines on stderr, prefixed with the elapsed run time.
///
/// Separate from `tracing`: these lines are the run's narrative and stay visible at the default
/// log level, while `--quiet` silences them.
pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn silent() -> Self {
        Self::new(false)
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let line = progress_line(label, current, total);
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {line}");
    }
}

fn progress_line(label: &str, current: usize, total: usize) -> String {
    let total = total.max(1);
    let current = current.min(total);
    let pct = (current as f64 / total as f64) * 100.0;
    format!("{label} {current}/{total} ({pct:5.1}%)")
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_format() {
        assert_eq!(fmt_elapsed(5.9), "00:05");
        assert_eq!(fmt_elapsed(3725.0), "01:02:05");
    }

    #[test]
    fn progress_clamps() {
        assert_eq!(progress_line("batch 1", 3, 4), "batch 1 3/4 ( 75.0%)");
        assert_eq!(progress_line("pairs", 9, 0), "pairs 1/1 (100.0%)");
    }
}
