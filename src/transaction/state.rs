//! Transaction state management.

use std::fmt;

use serde::Serialize;

/// The possible states of a transaction.
///
/// ```text
/// Active ──commit──> Committing ──> Committed
///    │                   │
///    └──rollback──> Aborting <──┘ (commit failed)
///                        │
///                        └──> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionState {
    /// The transaction is currently active and can perform operations.
    Active,
    /// Its pages are being written to the log.
    Committing,
    /// The transaction has been successfully committed.
    Committed,
    /// Its private changes are being discarded.
    Aborting,
    /// The transaction has been rolled back.
    RolledBack,
}

impl TransactionState {
    /// Returns true if the transaction is active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true if the transaction is finished (committed or rolled back).
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Active, Committing)
                | (Active, Aborting)
                | (Committing, Committed)
                | (Committing, Aborting)
                | (Aborting, RolledBack)
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Committing => write!(f, "Committing"),
            Self::Committed => write!(f, "Committed"),
            Self::Aborting => write!(f, "Aborting"),
            Self::RolledBack => write!(f, "RolledBack"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionState::*;

    #[test]
    fn test_transaction_state_predicates() {
        assert!(Active.is_active());
        assert!(!Active.is_finished());
        assert!(Committed.is_finished());
        assert!(RolledBack.is_finished());
        assert!(!Committing.is_finished());
    }

    #[test]
    fn test_transitions() {
        assert!(Active.can_transition_to(Committing));
        assert!(Committing.can_transition_to(Committed));
        assert!(Committing.can_transition_to(Aborting));
        assert!(Aborting.can_transition_to(RolledBack));

        assert!(!Committed.can_transition_to(Aborting));
        assert!(!RolledBack.can_transition_to(Active));
        assert!(!Active.can_transition_to(Committed));
    }

    #[test]
    fn test_transaction_state_display() {
        assert_eq!(format!("{}", Committing), "Committing");
        assert_eq!(format!("{}", RolledBack), "RolledBack");
    }
}
