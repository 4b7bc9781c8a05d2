//! Lock compatibility computations.

use crate::types::LockHolder;
use crate::types::LockMode;
use crate::types::LockState;

/// Outcome of evaluating a lock request against the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockDecision {
    /// Grant the lock; the new state must be written back.
    Grant(LockState),
    /// The requesting query already holds a lock at least this strong.
    AlreadyHeld(LockState),
    /// Another query holds the lock in an incompatible mode.
    Deny { holder: LockHolder, mode: LockMode },
}

/// Decide whether `requester` may take `name` in `requested` mode.
///
/// Re-requests by a query that already holds the lock are re-entrant and
/// upgrade the mode when no other query shares it. Shared locks admit any
/// number of holders; an exclusive lock admits exactly one.
pub fn evaluate_lock_request(
    current: Option<&LockState>,
    name: &str,
    requester: &LockHolder,
    requested: LockMode,
    now_ms: u64,
) -> LockDecision {
    let Some(state) = current.filter(|s| !s.holders.is_empty()) else {
        return LockDecision::Grant(LockState {
            name: name.to_string(),
            mode: requested,
            holders: vec![requester.clone()],
            fencing_token: next_fencing_token(current, requested),
            acquired_at_ms: now_ms,
        });
    };

    let others: Vec<&LockHolder> = state.holders.iter().filter(|h| h.query_id != requester.query_id).collect();
    let held_by_requester = others.len() < state.holders.len();

    if held_by_requester && state.mode >= requested {
        return LockDecision::AlreadyHeld(state.clone());
    }

    if let Some(blocker) = others.first() {
        let compatible = state.mode == LockMode::Shared && requested == LockMode::Shared;
        if !compatible {
            return LockDecision::Deny {
                holder: (*blocker).clone(),
                mode: state.mode,
            };
        }
    }

    let mut next = state.clone();
    next.mode = state.mode.max(requested);
    if !held_by_requester {
        next.holders.push(requester.clone());
    }
    if requested == LockMode::Exclusive {
        next.fencing_token = state.fencing_token.saturating_add(1);
    }
    LockDecision::Grant(next)
}

/// Remove every holder entry belonging to `query_id`.
///
/// Returns `None` when no holders remain and the lock should be deleted.
pub fn remove_holder(state: &LockState, query_id: &str) -> Option<LockState> {
    let mut next = state.clone();
    next.holders.retain(|h| h.query_id != query_id);
    if next.holders.is_empty() {
        None
    } else {
        // Remaining holders can only be readers.
        next.mode = LockMode::Shared;
        Some(next)
    }
}

fn next_fencing_token(previous: Option<&LockState>, requested: LockMode) -> u64 {
    let base = previous.map(|s| s.fencing_token).unwrap_or(0);
    match requested {
        LockMode::Exclusive => base.saturating_add(1),
        LockMode::Shared => base,
    }
}
