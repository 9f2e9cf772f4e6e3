use kitty_core::{DomainError, MemberId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("Payment {0} not found")]
    PaymentNotFound(i64),
    #[error("Transaction {0} not found")]
    TransactionNotFound(i64),
    #[error("Statement {0} not found")]
    StatementNotFound(i64),
    #[error("Member {0} not found")]
    MemberNotFound(MemberId),
    /// The owning member changed between lock selection and the write.
    #[error("Ownership of {0} changed while waiting for a member lock")]
    OwnershipChanged(String),
}

impl ReconcileError {
    /// Whether re-running the same unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Database(e) => !matches!(
                e,
                sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } | sqlx::Error::RowNotFound
            ),
            ReconcileError::OwnershipChanged(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ReconcileError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(ReconcileError::OwnershipChanged("transaction:4".into()).is_retryable());
        assert!(!ReconcileError::PaymentNotFound(3).is_retryable());
        assert!(!ReconcileError::Domain(DomainError::ArchivedTransaction(3)).is_retryable());
    }
}
