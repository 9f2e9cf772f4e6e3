use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::DomainError;
use super::member::MemberId;
use super::money::Money;

/// Actor recorded for decisions the pipeline makes on its own.
pub const SYSTEM_ACTOR: &str = "system";

/// Confidence recorded for operator-asserted assignments.
pub const MANUAL_CONFIDENCE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Auto,
    Manual,
}

impl fmt::Display for MatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchSource::Auto => write!(f, "auto"),
            MatchSource::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for MatchSource {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(MatchSource::Auto),
            "manual" => Ok(MatchSource::Manual),
            other => Err(DomainError::UnknownVariant("match source", other.to_string())),
        }
    }
}

/// Append-only record of one assignment decision, including reassignments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchLog {
    pub id: Option<i64>,
    pub transaction_id: i64,
    pub member_id: Option<MemberId>,
    pub confidence: f32,
    pub reason: String,
    pub source: MatchSource,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl MatchLog {
    pub fn auto(
        transaction_id: i64,
        member_id: Option<MemberId>,
        confidence: f32,
        reason: impl Into<String>,
    ) -> Result<Self, DomainError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(DomainError::ConfidenceOutOfRange(confidence));
        }
        Ok(MatchLog {
            id: None,
            transaction_id,
            member_id,
            confidence,
            reason: reason.into(),
            source: MatchSource::Auto,
            actor: SYSTEM_ACTOR.to_string(),
            created_at: Utc::now(),
        })
    }

    pub fn manual(
        transaction_id: i64,
        member_id: MemberId,
        reason: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        MatchLog {
            id: None,
            transaction_id,
            member_id: Some(member_id),
            confidence: MANUAL_CONFIDENCE,
            reason: reason.into(),
            source: MatchSource::Manual,
            actor: actor.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    ProviderTransactionId,
    ReceiptNumber,
    ProviderReference,
    IntraStatement,
    CrossStatement,
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateReason::ProviderTransactionId => write!(f, "provider_transaction_id"),
            DuplicateReason::ReceiptNumber => write!(f, "receipt_number"),
            DuplicateReason::ProviderReference => write!(f, "provider_reference"),
            DuplicateReason::IntraStatement => write!(f, "intra_statement"),
            DuplicateReason::CrossStatement => write!(f, "cross_statement"),
        }
    }
}

impl FromStr for DuplicateReason {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provider_transaction_id" => Ok(DuplicateReason::ProviderTransactionId),
            "receipt_number" => Ok(DuplicateReason::ReceiptNumber),
            "provider_reference" => Ok(DuplicateReason::ProviderReference),
            "intra_statement" => Ok(DuplicateReason::IntraStatement),
            "cross_statement" => Ok(DuplicateReason::CrossStatement),
            other => Err(DomainError::UnknownVariant("duplicate reason", other.to_string())),
        }
    }
}

/// Fields of the rejected row, kept so an operator can audit the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateSnapshot {
    pub date: NaiveDate,
    pub credit: Money,
    pub debit: Money,
    pub transaction_code: Option<String>,
    pub narration: String,
}

/// Ledger row for a rejected re-ingestion. Points at the retained original
/// until that record is deleted with its own statement; the entry and its
/// snapshot then remain as the only trace of the credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateEntry {
    pub id: Option<i64>,
    pub source_statement_id: Option<i64>,
    pub original_transaction_id: Option<i64>,
    pub reason: DuplicateReason,
    pub snapshot: DuplicateSnapshot,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub subject: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        subject: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        AuditEntry {
            actor: actor.into(),
            action: action.into(),
            subject: subject.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_log_always_full_confidence() {
        let log = MatchLog::manual(1, MemberId(2), "Manual assignment", "alice");
        assert_eq!(log.confidence, 1.0);
        assert_eq!(log.source, MatchSource::Manual);
        assert_eq!(log.actor, "alice");
    }

    #[test]
    fn auto_log_rejects_out_of_range_confidence() {
        assert!(MatchLog::auto(1, Some(MemberId(2)), 1.2, "x").is_err());
        assert!(MatchLog::auto(1, None, -0.1, "x").is_err());
        let ok = MatchLog::auto(1, Some(MemberId(2)), 0.6, "masked suffix").unwrap();
        assert_eq!(ok.actor, SYSTEM_ACTOR);
    }

    #[test]
    fn duplicate_reason_roundtrip() {
        for r in [
            DuplicateReason::ProviderTransactionId,
            DuplicateReason::ReceiptNumber,
            DuplicateReason::ProviderReference,
            DuplicateReason::IntraStatement,
            DuplicateReason::CrossStatement,
        ] {
            assert_eq!(r.to_string().parse::<DuplicateReason>().unwrap(), r);
        }
    }
}
