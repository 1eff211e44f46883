//! Proposal state machine
//!
//! ```text
//! PENDING ──approve──▶ APPROVED ──claim──▶ RUNNING ──▶ COMPLETED
//!    │                    │                   │
//!    └──reject──▶ REJECTED └──────▶ FAILED ◀───┘
//! ```
//!
//! Every status change in the store goes through [`validate_transition`].

use crate::error::StateTransitionError;
use crate::types::ProposalStatus;

/// Validates a status transition.
///
/// # Errors
/// `StateTransitionError` for any edge not in the graph above
pub fn validate_transition(
    from: ProposalStatus,
    to: ProposalStatus,
) -> Result<(), StateTransitionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        tracing::debug!(%from, %to, "rejected illegal transition");
        Err(StateTransitionError { from, to })
    }
}

/// Statuses reachable in one step from `from`
#[must_use]
pub fn allowed_transitions(from: ProposalStatus) -> &'static [ProposalStatus] {
    match from {
        ProposalStatus::Pending => &[ProposalStatus::Approved, ProposalStatus::Rejected],
        ProposalStatus::Approved => &[ProposalStatus::Running, ProposalStatus::Failed],
        ProposalStatus::Running => &[ProposalStatus::Completed, ProposalStatus::Failed],
        ProposalStatus::Completed | ProposalStatus::Failed | ProposalStatus::Rejected => &[],
    }
}

/// Whether a human reviewer may drive this transition
#[inline]
#[must_use]
pub fn is_review_transition(from: ProposalStatus, to: ProposalStatus) -> bool {
    from == ProposalStatus::Pending
        && matches!(to, ProposalStatus::Approved | ProposalStatus::Rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for status in ProposalStatus::ALL {
            assert_eq!(status.is_terminal(), allowed_transitions(status).is_empty());
        }
    }

    #[test]
    fn review_transitions_only_leave_pending() {
        assert!(is_review_transition(
            ProposalStatus::Pending,
            ProposalStatus::Rejected
        ));
        assert!(!is_review_transition(
            ProposalStatus::Approved,
            ProposalStatus::Rejected
        ));
        assert!(!is_review_transition(
            ProposalStatus::Running,
            ProposalStatus::Completed
        ));
    }

    #[test]
    fn review_transitions_are_legal_transitions() {
        for from in ProposalStatus::ALL {
            for to in ProposalStatus::ALL {
                if is_review_transition(from, to) {
                    assert!(validate_transition(from, to).is_ok(), "{from} -> {to}");
                }
            }
        }
    }
}
