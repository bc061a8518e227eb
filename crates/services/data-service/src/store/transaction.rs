//! Transaction handle shared by every operation of one unit of work.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use common::{AppError, AppResult};

/// Lifecycle of a transaction handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TransactionState::Committed,
            2 => TransactionState::Aborted,
            _ => TransactionState::Active,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TransactionState::Active => 0,
            TransactionState::Committed => 1,
            TransactionState::Aborted => 2,
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "active"),
            TransactionState::Committed => write!(f, "committed"),
            TransactionState::Aborted => write!(f, "aborted"),
        }
    }
}

struct Inner<S> {
    id: Uuid,
    session: S,
    state: AtomicU8,
}

/// Cloneable handle to a store session with an open transaction.
///
/// Pass it to every operation that must join the transaction. Once the
/// transaction is committed or aborted the handle refuses further use.
pub struct Transaction<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Transaction<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for Transaction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl<S> Transaction<S> {
    pub(crate) fn new(session: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                session,
                state: AtomicU8::new(TransactionState::Active.as_u8()),
            }),
        }
    }

    /// Correlation id for logs
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> TransactionState {
        TransactionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Whether the transaction still accepts operations
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Backend session, refused once the transaction has finished
    pub(crate) fn session(&self) -> AppResult<&S> {
        match self.state() {
            TransactionState::Active => Ok(&self.inner.session),
            state => Err(AppError::internal(format!(
                "transaction {} is already {}",
                self.inner.id, state
            ))),
        }
    }

    /// Backend session regardless of state (for release)
    pub(crate) fn raw_session(&self) -> &S {
        &self.inner.session
    }

    /// Move from active to a final state; false if already final
    pub(crate) fn finish(&self, state: TransactionState) -> bool {
        self.inner
            .state
            .compare_exchange(
                TransactionState::Active.as_u8(),
                state.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Resolve the backend session of an optional transaction
pub(crate) fn session_of<S>(tx: Option<&Transaction<S>>) -> AppResult<Option<&S>> {
    tx.map(Transaction::session).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_transaction_is_not_reusable() {
        let tx = Transaction::new(());
        assert!(tx.session().is_ok());

        assert!(tx.finish(TransactionState::Committed));
        assert!(!tx.finish(TransactionState::Aborted));
        assert_eq!(tx.state(), TransactionState::Committed);

        let err = tx.clone().session().unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_session_of_none() {
        let none: Option<&Transaction<()>> = None;
        assert!(session_of(none).unwrap().is_none());
    }
}
