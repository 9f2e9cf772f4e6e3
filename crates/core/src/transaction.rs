use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use super::error::DomainError;
use super::member::MemberId;
use super::money::Money;

/// Where a narration string came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    StatementLine,
    PaymentCallback,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::StatementLine => write!(f, "statement_line"),
            Channel::PaymentCallback => write!(f, "payment_callback"),
        }
    }
}

impl FromStr for Channel {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "statement_line" => Ok(Channel::StatementLine),
            "payment_callback" => Ok(Channel::PaymentCallback),
            other => Err(DomainError::UnknownVariant("channel", other.to_string())),
        }
    }
}

/// The untouched narration text. Archived alongside whatever record consumed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNarration {
    text: String,
    channel: Channel,
}

impl RawNarration {
    pub fn new(text: impl Into<String>, channel: Channel) -> Self {
        RawNarration { text: text.into(), channel }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Upper-cased with whitespace runs collapsed; the form used for fingerprints.
    pub fn normalized(&self) -> String {
        self.text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOrigin {
    Paybill,
    MobileSwitch,
    Gateway,
    Ussd,
    FundsTransfer,
    #[default]
    Generic,
}

impl TransactionOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionOrigin::Paybill => "paybill",
            TransactionOrigin::MobileSwitch => "mobile_switch",
            TransactionOrigin::Gateway => "gateway",
            TransactionOrigin::Ussd => "ussd",
            TransactionOrigin::FundsTransfer => "funds_transfer",
            TransactionOrigin::Generic => "generic",
        }
    }
}

impl fmt::Display for TransactionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionOrigin {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paybill" => Ok(TransactionOrigin::Paybill),
            "mobile_switch" => Ok(TransactionOrigin::MobileSwitch),
            "gateway" => Ok(TransactionOrigin::Gateway),
            "ussd" => Ok(TransactionOrigin::Ussd),
            "funds_transfer" => Ok(TransactionOrigin::FundsTransfer),
            "generic" => Ok(TransactionOrigin::Generic),
            other => Err(DomainError::UnknownVariant("transaction origin", other.to_string())),
        }
    }
}

/// A phone reference pulled out of a narration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhoneToken {
    /// Canonical `<country><subscriber>` digits.
    Full { number: String },
    /// Redacted number; only suffix comparison is meaningful.
    Masked { prefix: String, suffix: String },
}

impl PhoneToken {
    pub fn full(number: impl Into<String>) -> Self {
        PhoneToken::Full { number: number.into() }
    }

    pub fn masked(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        PhoneToken::Masked { prefix: prefix.into(), suffix: suffix.into() }
    }

    pub fn is_masked(&self) -> bool {
        matches!(self, PhoneToken::Masked { .. })
    }

    pub fn full_number(&self) -> Option<&str> {
        match self {
            PhoneToken::Full { number } => Some(number),
            PhoneToken::Masked { .. } => None,
        }
    }

    /// The last `len` visible digits, if that many are visible.
    pub fn suffix(&self, len: usize) -> Option<&str> {
        let digits = match self {
            PhoneToken::Full { number } => number.as_str(),
            PhoneToken::Masked { suffix, .. } => suffix.as_str(),
        };
        (digits.len() >= len).then(|| &digits[digits.len() - len..])
    }
}

impl fmt::Display for PhoneToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhoneToken::Full { number } => f.write_str(number),
            PhoneToken::Masked { prefix, suffix } => write!(f, "{prefix}****{suffix}"),
        }
    }
}

/// Fields derived from a narration. Recomputed on every parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFields {
    pub origin: TransactionOrigin,
    pub phones: Vec<PhoneToken>,
    pub transaction_code: Option<String>,
    pub member_number: Option<String>,
    pub candidate_name: Option<String>,
}

impl ParsedFields {
    pub fn new(origin: TransactionOrigin) -> Self {
        ParsedFields { origin, ..Default::default() }
    }

    /// Appends unless an equal token is already present (ordered set).
    pub fn push_phone(&mut self, token: PhoneToken) {
        if !self.phones.contains(&token) {
            self.phones.push(token);
        }
    }

    pub fn full_phones(&self) -> impl Iterator<Item = &str> {
        self.phones.iter().filter_map(PhoneToken::full_number)
    }

    pub fn masked_phones(&self) -> impl Iterator<Item = &PhoneToken> {
        self.phones.iter().filter(|p| p.is_masked())
    }

    pub fn is_empty(&self) -> bool {
        self.phones.is_empty()
            && self.transaction_code.is_none()
            && self.member_number.is_none()
            && self.candidate_name.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    #[default]
    Unassigned,
    /// Several plausible owners; waiting for an operator.
    Draft,
    AutoAssigned,
    ManualAssigned,
    /// Legacy marker. New duplicates go to the duplicate ledger instead.
    Duplicate,
}

impl AssignmentStatus {
    pub fn is_assigned(self) -> bool {
        matches!(self, AssignmentStatus::AutoAssigned | AssignmentStatus::ManualAssigned)
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentStatus::Unassigned => write!(f, "unassigned"),
            AssignmentStatus::Draft => write!(f, "draft"),
            AssignmentStatus::AutoAssigned => write!(f, "auto_assigned"),
            AssignmentStatus::ManualAssigned => write!(f, "manual_assigned"),
            AssignmentStatus::Duplicate => write!(f, "duplicate"),
        }
    }
}

impl FromStr for AssignmentStatus {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unassigned" => Ok(AssignmentStatus::Unassigned),
            "draft" => Ok(AssignmentStatus::Draft),
            "auto_assigned" => Ok(AssignmentStatus::AutoAssigned),
            "manual_assigned" => Ok(AssignmentStatus::ManualAssigned),
            "duplicate" => Ok(AssignmentStatus::Duplicate),
            other => Err(DomainError::UnknownVariant("assignment status", other.to_string())),
        }
    }
}

/// One statement line after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Option<i64>,
    pub statement_id: Option<i64>,
    pub date: NaiveDate,
    pub credit: Money,
    pub debit: Money,
    pub narration: RawNarration,
    /// Provider receipt code supplied by the source row, not parsed from narration.
    pub receipt_code: Option<String>,
    pub parsed: ParsedFields,
    pub member_id: Option<MemberId>,
    pub assignment_status: AssignmentStatus,
    pub match_confidence: Option<f32>,
    pub match_reason: Option<String>,
    pub archived: bool,
}

impl TransactionRecord {
    pub fn new(
        statement_id: Option<i64>,
        date: NaiveDate,
        narration: RawNarration,
        credit: Money,
        debit: Money,
        parsed: ParsedFields,
    ) -> Self {
        TransactionRecord {
            id: None,
            statement_id,
            date,
            credit,
            debit,
            narration,
            receipt_code: None,
            parsed,
            member_id: None,
            assignment_status: AssignmentStatus::Unassigned,
            match_confidence: None,
            match_reason: None,
            archived: false,
        }
    }

    pub fn with_receipt_code(mut self, code: Option<String>) -> Self {
        self.receipt_code = code.filter(|c| !c.trim().is_empty());
        self
    }

    /// The receipt column wins over anything parsed from the narration.
    pub fn transaction_code(&self) -> Option<&str> {
        self.receipt_code
            .as_deref()
            .or(self.parsed.transaction_code.as_deref())
    }

    /// SHA-256 hex of `date | normalized narration | credit`.
    pub fn fingerprint(&self) -> String {
        let key = format!(
            "{}|{}|{:.2}",
            self.date,
            self.narration.normalized(),
            self.credit.as_decimal()
        );
        let digest: [u8; 32] = Sha256::digest(key.as_bytes()).into();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}
