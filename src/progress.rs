//! Progress reporting for the long phases of a run: walking the books
//! (extract or reconcile) and writing rows into the SQLite export.
//!
//! With `--log-only` the bars stay hidden and each phase reports through
//! `tracing` every `step` items instead, for tail-friendly output.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Global flag for log-only mode (set from args in main)
pub static LOG_ONLY: AtomicBool = AtomicBool::new(false);

/// Row phases log about this many times in log-only mode
const ROW_LOG_POINTS: u64 = 20;

const BAR_TEMPLATE: &str = "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {prefix} ({per_sec}, ETA: {eta})";

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// Install the stderr subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Elapsed time for the run summary: seconds below a minute, minutes above.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

/// True when moving from `done - advanced` to `done` crosses a multiple of
/// `step`, or reaches the end.
fn crosses_step(done: u64, total: u64, step: u64, advanced: u64) -> bool {
    if total == 0 || step == 0 {
        return false;
    }
    done >= total || done / step != done.saturating_sub(advanced) / step
}

// ============================================================================
// Phase Progress
// ============================================================================

/// Progress of one phase: a terminal bar, or periodic log lines in log-only mode.
pub struct PhaseProgress {
    bar: ProgressBar,
    phase: &'static str,
    unit: &'static str,
    total: u64,
    step: u64,
}

impl PhaseProgress {
    /// Book phases report every finished book.
    pub fn books(phase: &'static str, message: &str, total: usize) -> Self {
        Self::new(phase, "books", message, total as u64, 1)
    }

    /// Database phases report about every twentieth of the rows.
    pub fn rows(phase: &'static str, message: &str, total: usize) -> Self {
        let total = total as u64;
        Self::new(phase, "rows", message, total, (total / ROW_LOG_POINTS).max(1))
    }

    fn new(phase: &'static str, unit: &'static str, message: &str, total: u64, step: u64) -> Self {
        let bar = ProgressBar::new(total);
        if is_log_only() {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        } else {
            bar.set_style(
                ProgressStyle::default_bar()
                    .template(BAR_TEMPLATE)
                    .unwrap()
                    .progress_chars("=> "),
            );
        }
        bar.set_prefix(unit);
        bar.set_message(message.to_string());
        Self { bar, phase, unit, total, step }
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Count `n` more items done. Safe to call from rayon workers.
    pub fn advance(&self, n: u64) {
        self.bar.inc(n);
        if !is_log_only() {
            return;
        }
        let done = self.bar.position();
        if crosses_step(done, self.total, self.step, n) {
            let pct = 100.0 * done as f64 / self.total as f64;
            tracing::info!("[{}] {}/{} {} ({:.1}%)", self.phase, done, self.total, self.unit, pct);
        }
    }

    pub fn finish(&self, summary: String) {
        if is_log_only() {
            tracing::info!("[{}] {}", self.phase, summary);
        }
        self.bar.finish_with_message(summary);
    }
}
