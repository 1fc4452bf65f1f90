use std::io::{self, Write};
use std::time::Instant;

/// Elapsed-stamped stage reporting on stderr; stdout stays reserved for the
/// final answer.
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

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", msg.as_ref());
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let m = seconds / 60;
    let s = seconds % 60;
    format!("{m:02}:{s:02}")
}

#[cfg(test)]
mod tests {
    use super::fmt_elapsed;

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(fmt_elapsed(0.0), "00:00");
        assert_eq!(fmt_elapsed(75.4), "01:15");
    }
}
