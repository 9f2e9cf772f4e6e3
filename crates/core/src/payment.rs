use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::DomainError;
use super::member::MemberId;
use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    MobileMoney,
    Bank,
    Cash,
}

impl fmt::Display for PaymentChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentChannel::MobileMoney => write!(f, "mobile_money"),
            PaymentChannel::Bank => write!(f, "bank"),
            PaymentChannel::Cash => write!(f, "cash"),
        }
    }
}

impl FromStr for PaymentChannel {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mobile_money" | "mpesa" => Ok(PaymentChannel::MobileMoney),
            "bank" => Ok(PaymentChannel::Bank),
            "cash" => Ok(PaymentChannel::Cash),
            other => Err(DomainError::UnknownVariant("payment channel", other.to_string())),
        }
    }
}

/// `Pending` is the only non-terminal state. A retry moves a terminal state
/// back to `Pending` before re-running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    #[default]
    Pending,
    Matched,
    Unmatched,
    Duplicate,
}

impl ReconciliationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReconciliationStatus::Pending)
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationStatus::Pending => write!(f, "pending"),
            ReconciliationStatus::Matched => write!(f, "matched"),
            ReconciliationStatus::Unmatched => write!(f, "unmatched"),
            ReconciliationStatus::Duplicate => write!(f, "duplicate"),
        }
    }
}

impl FromStr for ReconciliationStatus {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReconciliationStatus::Pending),
            "matched" => Ok(ReconciliationStatus::Matched),
            "unmatched" => Ok(ReconciliationStatus::Unmatched),
            "duplicate" => Ok(ReconciliationStatus::Duplicate),
            other => Err(DomainError::UnknownVariant("reconciliation status", other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Option<i64>,
    pub channel: PaymentChannel,
    pub provider_transaction_id: Option<String>,
    pub provider_reference: Option<String>,
    pub receipt_number: Option<String>,
    pub amount: Money,
    pub member_id: Option<MemberId>,
    pub created_at: DateTime<Utc>,
    pub reconciliation_status: ReconciliationStatus,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub reconciled_by: Option<String>,
}

impl Payment {
    pub fn new(channel: PaymentChannel, amount: Money, created_at: DateTime<Utc>) -> Self {
        Payment {
            id: None,
            channel,
            provider_transaction_id: None,
            provider_reference: None,
            receipt_number: None,
            amount,
            member_id: None,
            created_at,
            reconciliation_status: ReconciliationStatus::Pending,
            reconciled_at: None,
            reconciled_by: None,
        }
    }

    pub fn created_on(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

/// One row per reconciliation decision on a payment. The set of `Matched`
/// rows doubles as the "already reconciled" transaction exclusion set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationLog {
    pub id: Option<i64>,
    pub payment_id: i64,
    pub transaction_id: Option<i64>,
    pub status: ReconciliationStatus,
    pub notes: String,
    pub reconciled_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!ReconciliationStatus::Pending.is_terminal());
        assert!(ReconciliationStatus::Matched.is_terminal());
        assert!(ReconciliationStatus::Unmatched.is_terminal());
        assert!(ReconciliationStatus::Duplicate.is_terminal());
    }

    #[test]
    fn channel_accepts_provider_alias() {
        assert_eq!("mpesa".parse::<PaymentChannel>().unwrap(), PaymentChannel::MobileMoney);
        assert_eq!(PaymentChannel::MobileMoney.to_string(), "mobile_money");
    }
}
