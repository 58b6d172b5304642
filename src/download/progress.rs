//! Shared download progress state.
//!
//! The download engine writes into [`DownloadProgress`] from its own
//! task; a separate updater task polls snapshots and edits the status
//! message. Neither side blocks the other.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Point-in-time view of a running download.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    /// Completion percentage, 0..=100.
    pub percent: f64,
    /// Current transfer speed in bytes per second.
    pub speed_bps: f64,
    /// Estimated time remaining, if known.
    pub eta: Option<Duration>,
    /// True once the download has finished (successfully or not).
    pub finished: bool,
}

/// Thread-safe progress tracker shared between the download task and
/// the status updater.
#[derive(Debug, Clone, Default)]
pub struct DownloadProgress {
    inner: Arc<Mutex<ProgressSnapshot>>,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ProgressSnapshot> {
        // Plain data under the lock; a poisoning panic cannot corrupt it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a progress update from the download engine.
    pub fn update(&self, percent: f64, speed_bps: f64, eta: Option<Duration>) {
        let mut state = self.state();
        state.percent = percent.clamp(0.0, 100.0);
        state.speed_bps = speed_bps;
        state.eta = eta;
    }

    /// Marks the download as finished.
    pub fn finish(&self) {
        let mut state = self.state();
        state.finished = true;
        state.percent = 100.0;
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state().clone()
    }
}

/// Renders a classic text progress bar, e.g. `[█████░░░░░]`.
pub fn create_progress_bar(percent: f64) -> String {
    const WIDTH: usize = 10;

    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * WIDTH as f64).round() as usize;
    let mut bar = String::with_capacity(WIDTH + 2);
    bar.push('[');
    for i in 0..WIDTH {
        bar.push(if i < filled { '█' } else { '░' });
    }
    bar.push(']');
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_clamps_percent() {
        let progress = DownloadProgress::new();
        progress.update(150.0, 0.0, None);
        assert_eq!(progress.snapshot().percent, 100.0);

        progress.update(-5.0, 0.0, None);
        assert_eq!(progress.snapshot().percent, 0.0);
    }

    #[test]
    fn finish_pins_percent_to_full() {
        let progress = DownloadProgress::new();
        progress.update(42.0, 1024.0, Some(Duration::from_secs(9)));
        progress.finish();

        let snapshot = progress.snapshot();
        assert!(snapshot.finished);
        assert_eq!(snapshot.percent, 100.0);
    }

    #[test]
    fn progress_bar_rendering() {
        assert_eq!(create_progress_bar(0.0), "[░░░░░░░░░░]");
        assert_eq!(create_progress_bar(50.0), "[█████░░░░░]");
        assert_eq!(create_progress_bar(100.0), "[██████████]");
    }
}
