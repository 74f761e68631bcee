//! Pull progress reporting: a 1 Hz snapshot of the six counters plus bytes
//! transferred, rendered through a `ProgressSink` trait so tests can swap
//! in a silent/recording implementation.

use indicatif::ProgressBar;
use indicatif::ProgressStyle;

use crate::pull::state::PullState;

/// Receives periodic pull progress snapshots. The default implementation
/// renders through `indicatif`; `cli` may swap in a silent sink for
/// non-interactive runs.
pub trait ProgressSink: Send + Sync {
    fn update(&self, state: &PullState, bytes_transferred: u64);
    fn finish(&self, message: &str);
}

/// An `indicatif`-backed spinner reporting outstanding/completed counts and
/// bytes transferred, matching the progress line `ostree pull` prints.
pub struct IndicatifProgressSink {
    bar: ProgressBar,
}

impl IndicatifProgressSink {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { bar }
    }
}

impl Default for IndicatifProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for IndicatifProgressSink {
    fn update(&self, state: &PullState, bytes_transferred: u64) {
        let c = &state.counters;
        self.bar.set_message(format!(
            "meta {}/{} written {} content {}/{} written {} parts {}/{} written {} scanned {} {bytes_transferred} bytes",
            c.metadata_fetches_completed,
            c.metadata_fetches_completed + c.metadata_fetches_outstanding,
            c.metadata_writes_completed,
            c.content_fetches_completed,
            c.content_fetches_completed + c.content_fetches_outstanding,
            c.content_writes_completed,
            c.delta_part_fetches_completed,
            c.delta_part_fetches_completed + c.delta_part_fetches_outstanding,
            c.delta_part_writes_completed,
            state.scanned_metadata.len(),
        ));
        self.bar.tick();
    }

    fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_owned());
    }
}

/// A sink that drops every update, used by tests and non-interactive runs.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn update(&self, _state: &PullState, _bytes_transferred: u64) {}
    fn finish(&self, _message: &str) {}
}
