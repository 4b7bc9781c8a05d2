//! Barrier phase computations.

use crate::barrier::BarrierPhase;

/// Phase of a freshly created barrier whose creator is its first participant.
#[inline]
pub fn compute_initial_barrier_phase(required_count: u32) -> BarrierPhase {
    if required_count <= 1 {
        BarrierPhase::Ready
    } else {
        BarrierPhase::Waiting
    }
}

/// Whether the barrier moves to `Ready` after a participant joins.
#[inline]
pub fn should_transition_to_ready(current_count: u32, required_count: u32) -> bool {
    current_count >= required_count
}

/// Whether a participant observing this state may proceed.
#[inline]
pub fn is_barrier_ready(phase: BarrierPhase, current_count: u32, required_count: u32) -> bool {
    match phase {
        BarrierPhase::Ready => true,
        BarrierPhase::Waiting => current_count >= required_count,
        BarrierPhase::Aborted => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_participant_barrier_starts_ready() {
        assert_eq!(compute_initial_barrier_phase(1), BarrierPhase::Ready);
        assert_eq!(compute_initial_barrier_phase(0), BarrierPhase::Ready);
        assert_eq!(compute_initial_barrier_phase(3), BarrierPhase::Waiting);
    }

    #[test]
    fn ready_when_count_reaches_required() {
        assert!(!should_transition_to_ready(2, 3));
        assert!(should_transition_to_ready(3, 3));
    }

    #[test]
    fn aborted_barrier_is_never_ready() {
        assert!(!is_barrier_ready(BarrierPhase::Aborted, 3, 3));
        assert!(is_barrier_ready(BarrierPhase::Waiting, 3, 3));
        assert!(!is_barrier_ready(BarrierPhase::Waiting, 1, 3));
    }
}
