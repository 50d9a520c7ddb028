//! The loan lifecycle graph.
//!
//! ```text
//! PENDING    -> VALIDATING | CANCELLED
//! VALIDATING -> IN_REVIEW | APPROVED | REJECTED
//! IN_REVIEW  -> APPROVED | REJECTED
//! APPROVED   -> DISBURSED | CANCELLED
//! DISBURSED  -> COMPLETED
//! REJECTED, CANCELLED, COMPLETED: terminal
//! ```

use lps_schemas::LoanStatus;

/// Targets reachable from a status in one step.
pub fn allowed_transitions(from: LoanStatus) -> &'static [LoanStatus] {
    match from {
        LoanStatus::Pending => &[LoanStatus::Validating, LoanStatus::Cancelled],
        LoanStatus::Validating => &[
            LoanStatus::InReview,
            LoanStatus::Approved,
            LoanStatus::Rejected,
        ],
        LoanStatus::InReview => &[LoanStatus::Approved, LoanStatus::Rejected],
        LoanStatus::Approved => &[LoanStatus::Disbursed, LoanStatus::Cancelled],
        LoanStatus::Disbursed => &[LoanStatus::Completed],
        LoanStatus::Rejected | LoanStatus::Cancelled | LoanStatus::Completed => &[],
    }
}

pub fn can_transition(from: LoanStatus, to: LoanStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lps_schemas::LoanStatus::*;

    #[test]
    fn happy_paths_are_allowed() {
        assert!(can_transition(Pending, Validating));
        assert!(can_transition(Validating, Approved));
        assert!(can_transition(Validating, InReview));
        assert!(can_transition(InReview, Rejected));
        assert!(can_transition(Approved, Disbursed));
        assert!(can_transition(Disbursed, Completed));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [Rejected, Cancelled, Completed] {
            assert!(allowed_transitions(terminal).is_empty(), "{terminal:?}");
            for to in LoanStatus::ALL {
                assert!(!can_transition(terminal, to));
            }
        }
    }

    #[test]
    fn rejected_loan_cannot_be_approved() {
        assert!(!can_transition(Rejected, Approved));
    }

    #[test]
    fn no_status_skips_disbursement() {
        assert!(!can_transition(Pending, Approved));
        assert!(!can_transition(Pending, Disbursed));
        assert!(!can_transition(Approved, Completed));
        assert!(!can_transition(InReview, Disbursed));
    }

    #[test]
    fn self_transitions_are_rejected() {
        for st in LoanStatus::ALL {
            assert!(!can_transition(st, st), "{st:?}");
        }
    }

    #[test]
    fn graph_matches_terminal_flag() {
        for st in LoanStatus::ALL {
            assert_eq!(allowed_transitions(st).is_empty(), st.is_terminal(), "{st:?}");
        }
    }
}
