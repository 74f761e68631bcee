//! Pure state for the pull engine: idempotence guards, outstanding/completed
//! counters, and the two-phase state machine. Kept free of I/O so its
//! invariants (`is_idle`, at-most-once enqueue) are exercised directly in
//! unit tests without a runtime.

use std::collections::BTreeSet;

use crate::checksum::Checksum;
use crate::error::Error;

/// The pull loop's two phases. Termination requires `FetchingObjects` with
/// every outstanding counter at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FetchingRefs,
    FetchingObjects,
}

/// The fetch-outstanding/completed counters tracked across one pull, plus
/// the write-completed counters that record how many of those fetches
/// resulted in a stored object. Writes happen synchronously inline with
/// their fetch's completion (see `pull/engine.rs`), so there is no
/// write-outstanding state to track: a write is either not yet attempted
/// (not reflected here at all) or already completed by the time
/// `handle_event` returns.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub metadata_fetches_outstanding: u64,
    pub metadata_fetches_completed: u64,
    pub metadata_writes_completed: u64,
    pub content_fetches_outstanding: u64,
    pub content_fetches_completed: u64,
    pub content_writes_completed: u64,
    pub delta_part_fetches_outstanding: u64,
    pub delta_part_fetches_completed: u64,
    pub delta_part_writes_completed: u64,
}

impl Counters {
    pub fn all_outstanding_zero(&self) -> bool {
        self.metadata_fetches_outstanding == 0
            && self.content_fetches_outstanding == 0
            && self.delta_part_fetches_outstanding == 0
    }
}

/// The pull engine's state, owned exclusively by the event-loop task: a
/// single-threaded cooperative scheduler with no internal locking.
pub struct PullState {
    pub phase: Phase,
    pub scanned_metadata: BTreeSet<(Checksum, crate::objects::ObjectType)>,
    pub requested_metadata: BTreeSet<Checksum>,
    pub requested_content: BTreeSet<Checksum>,
    pub counters: Counters,
    pub error: Option<Error>,
    /// Paired with `error`: a short description of what was happening when
    /// the first error was recorded, used to build a "While <phase>: ..."
    /// message at the point the pull call surfaces its result.
    pub error_phase: Option<String>,
    /// Set when `prepare_transaction` found leftover loose objects from a
    /// prior, interrupted pull; lets `scan_metadata_object` re-descend into
    /// objects that are already stored.
    pub resuming: bool,
}

impl PullState {
    pub fn new(resuming: bool) -> Self {
        Self {
            phase: Phase::FetchingRefs,
            scanned_metadata: BTreeSet::new(),
            requested_metadata: BTreeSet::new(),
            requested_content: BTreeSet::new(),
            counters: Counters::default(),
            error: None,
            error_phase: None,
            resuming,
        }
    }

    /// The loop's termination condition: in the object-fetching phase, no
    /// fetch or write outstanding, and nothing has failed.
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::FetchingObjects && self.counters.all_outstanding_zero() && self.error.is_none()
    }

    /// Records the first error only, together with a short description of
    /// what was happening at the time; an error slot set on first failure,
    /// with subsequent errors (and their phases) dropped.
    pub fn set_error_once(&mut self, phase: impl Into<String>, err: Error) {
        if self.error.is_none() {
            self.error_phase = Some(phase.into());
            self.error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_requires_fetching_objects_phase_and_zero_counters() {
        let mut state = PullState::new(false);
        assert!(!state.is_idle());
        state.phase = Phase::FetchingObjects;
        assert!(state.is_idle());
        state.counters.content_fetches_outstanding = 1;
        assert!(!state.is_idle());
    }

    #[test]
    fn is_idle_false_once_an_error_is_set() {
        let mut state = PullState::new(false);
        state.phase = Phase::FetchingObjects;
        assert!(state.is_idle());
        state.set_error_once("fetching refs", Error::Cancelled);
        assert!(!state.is_idle());
    }

    #[test]
    fn set_error_once_keeps_the_first_error() {
        let mut state = PullState::new(false);
        state.set_error_once("fetching refs", Error::Cancelled);
        state.set_error_once("verifying signatures", Error::MissingSignatures);
        assert!(matches!(state.error, Some(Error::Cancelled)));
        assert_eq!(state.error_phase.as_deref(), Some("fetching refs"));
    }
}
