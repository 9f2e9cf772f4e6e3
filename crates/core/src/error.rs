use thiserror::Error;

use super::member::MemberId;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DomainError {
    #[error("Unknown {0}: '{1}'")]
    UnknownVariant(&'static str, String),
    #[error("Confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f32),
    #[error("Transaction {0} is archived")]
    ArchivedTransaction(i64),
    #[error("Member {0} is not active")]
    InactiveMember(MemberId),
    #[error("Amount must be positive")]
    NonPositiveAmount,
}
