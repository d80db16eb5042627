use crate::errors::{ClientError, Operation};
use crate::Result;
use std::fmt::{Display, Formatter};

/// Lifecycle of a [`Connection`].
///
/// [`Connection`]: crate::Connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Open, every statement commits on its own.
    Idle,
    /// Open with an explicit transaction.
    InTransaction,
    /// Transport released. Terminal.
    Closed,
}

/// Whether a transaction is active on a [`Connection`].
///
/// [`Connection`]: crate::Connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Auto-commit.
    None,
    /// Started with `begin` and not yet committed or rolled back.
    Active,
}

impl SessionState {
    /// The state reached by performing `operation`, or `None` if `operation` is not allowed now.
    pub fn after(self, operation: Operation) -> Option<SessionState> {
        use SessionState::*;

        match (self, operation) {
            (_, Operation::Close) => Some(Closed),
            (Closed, _) => None,
            (Idle, Operation::Begin) => Some(InTransaction),
            (InTransaction, Operation::Commit) | (InTransaction, Operation::Rollback) => Some(Idle),
            (state, Operation::Query) => Some(state),
            _ => None,
        }
    }

    /// Fails with a state error unless `operation` is allowed now.
    pub(crate) fn check(self, operation: Operation) -> Result<SessionState> {
        self.after(operation)
            .ok_or_else(|| ClientError::state(operation, self))
    }

    /// The transaction view of this state.
    pub fn transaction(self) -> TransactionState {
        match self {
            SessionState::InTransaction => TransactionState::Active,
            _ => TransactionState::None,
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::InTransaction => write!(f, "in a transaction"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
