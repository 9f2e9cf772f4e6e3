use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::DomainError;
use super::member::MemberId;
use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Overdue,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn is_outstanding(self) -> bool {
        matches!(self, InvoiceStatus::Pending | InvoiceStatus::Overdue)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceStatus::Pending => write!(f, "pending"),
            InvoiceStatus::Overdue => write!(f, "overdue"),
            InvoiceStatus::Paid => write!(f, "paid"),
            InvoiceStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvoiceStatus::Pending),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "paid" => Ok(InvoiceStatus::Paid),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(DomainError::UnknownVariant("invoice status", other.to_string())),
        }
    }
}

/// What money settled an invoice. Serialized as `kind:id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationRef {
    Transaction(i64),
    Payment(i64),
    Contribution(i64),
}

impl fmt::Display for AllocationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationRef::Transaction(id) => write!(f, "transaction:{id}"),
            AllocationRef::Payment(id) => write!(f, "payment:{id}"),
            AllocationRef::Contribution(id) => write!(f, "contribution:{id}"),
        }
    }
}

impl FromStr for AllocationRef {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || DomainError::UnknownVariant("allocation reference", s.to_string());
        let (kind, id) = s.split_once(':').ok_or_else(bad)?;
        let id: i64 = id.parse().map_err(|_| bad())?;
        match kind {
            "transaction" => Ok(AllocationRef::Transaction(id)),
            "payment" => Ok(AllocationRef::Payment(id)),
            "contribution" => Ok(AllocationRef::Contribution(id)),
            _ => Err(bad()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Option<i64>,
    pub member_id: MemberId,
    pub invoice_number: String,
    pub amount: Money,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub paid_at: Option<DateTime<Utc>>,
    pub paid_reference: Option<AllocationRef>,
    pub metadata: serde_json::Value,
}

impl Invoice {
    pub fn new(
        member_id: MemberId,
        invoice_number: &str,
        amount: Money,
        issue_date: NaiveDate,
        due_date: NaiveDate,
    ) -> Self {
        Invoice {
            id: None,
            member_id,
            invoice_number: invoice_number.to_string(),
            amount,
            status: InvoiceStatus::Pending,
            issue_date,
            due_date,
            paid_at: None,
            paid_reference: None,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }
}
