use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use kitty_core::{Member, MemberId, Money, TransactionRecord};
use serde::{Deserialize, Serialize};

use crate::error::MatchError;
use crate::matcher::{sort_candidates, MatchCandidate, MemberMatcher};

/// Ranked candidates per transaction id. A missing key means "no matches".
pub type BatchMatches = HashMap<i64, Vec<MatchCandidate>>;

/// Stateless scoring of many transactions against the member registry.
/// Implementations never fail: any error degrades to an empty result.
#[async_trait]
pub trait BatchMatcher: Send + Sync {
    async fn match_batch(
        &self,
        transactions: &[TransactionRecord],
        members: &[Member],
    ) -> BatchMatches;

    fn name(&self) -> &'static str;
}

// ── Local ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct LocalBatchMatcher {
    matcher: MemberMatcher,
}

impl LocalBatchMatcher {
    pub fn new(matcher: MemberMatcher) -> Self {
        Self { matcher }
    }
}

#[async_trait]
impl BatchMatcher for LocalBatchMatcher {
    async fn match_batch(
        &self,
        transactions: &[TransactionRecord],
        members: &[Member],
    ) -> BatchMatches {
        transactions
            .iter()
            .filter_map(|tx| {
                let id = tx.id?;
                let ranked = self.matcher.rank(&tx.parsed, members);
                (!ranked.is_empty()).then_some((id, ranked))
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

// ── Remote ───────────────────────────────────────────────────────────────────

/// The narration also goes out as `particulars`, the field the service
/// scans for phones and names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchTransaction {
    pub id: i64,
    pub date: NaiveDate,
    pub narration: String,
    pub particulars: String,
    pub credit: Money,
    pub transaction_code: Option<String>,
    pub phones: Vec<String>,
}

impl BatchTransaction {
    pub fn from_record(record: &TransactionRecord) -> Option<Self> {
        Some(Self {
            id: record.id?,
            date: record.date,
            narration: record.narration.text().to_string(),
            particulars: record.narration.text().to_string(),
            credit: record.credit,
            transaction_code: record.transaction_code().map(str::to_string),
            phones: record.parsed.phones.iter().map(|p| p.to_string()).collect(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchMember {
    pub id: MemberId,
    pub phone: Option<String>,
    pub name: String,
    pub code: Option<String>,
    pub member_code: Option<String>,
    pub member_number: Option<String>,
}

impl From<&Member> for BatchMember {
    fn from(m: &Member) -> Self {
        Self {
            id: m.id,
            phone: m.phone.clone(),
            name: m.name.clone(),
            code: m.member_code.clone(),
            member_code: m.member_code.clone(),
            member_number: m.member_number.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchBatchRequest {
    pub transactions: Vec<BatchTransaction>,
    pub members: Vec<BatchMember>,
}

/// One entry of the service's reply. Extra fields on a candidate, such as
/// `member_name` or `reason`, are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionMatches {
    pub transaction_id: i64,
    #[serde(default)]
    pub matches: Vec<MatchCandidate>,
}

/// `POST /match-batch` replies with a bare array, one entry per transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct MatchBatchResponse(pub Vec<TransactionMatches>);

impl MatchBatchResponse {
    /// Folds the entries by transaction id; repeated ids are concatenated.
    pub fn into_matches(self) -> BatchMatches {
        let mut matches = BatchMatches::new();
        for entry in self.0 {
            matches.entry(entry.transaction_id).or_default().extend(entry.matches);
        }
        matches
    }
}

/// Client for the external fuzzy-matching service.
#[derive(Debug, Clone)]
pub struct RemoteBatchMatcher {
    client: reqwest::Client,
    base_url: String,
    max_per_transaction: usize,
}

impl RemoteBatchMatcher {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MatchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_per_transaction: 5,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health`; true only on a success status.
    pub async fn health(&self) -> Result<bool, MatchError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn request(
        &self,
        transactions: &[TransactionRecord],
        members: &[Member],
    ) -> Result<BatchMatches, MatchError> {
        let body = MatchBatchRequest {
            transactions: transactions
                .iter()
                .filter_map(BatchTransaction::from_record)
                .collect(),
            members: members
                .iter()
                .filter(|m| m.is_active)
                .map(BatchMember::from)
                .collect(),
        };
        let response = self
            .client
            .post(format!("{}/match-batch", self.base_url))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MatchError::Status(status.as_u16()));
        }
        let parsed: MatchBatchResponse = response.json().await?;
        Ok(self.sanitize(parsed.into_matches()))
    }

    /// Drops non-finite scores, clamps to [0, 1] and keeps the top entries.
    fn sanitize(&self, matches: BatchMatches) -> BatchMatches {
        matches
            .into_iter()
            .filter_map(|(id, candidates)| {
                let mut kept: Vec<MatchCandidate> = candidates
                    .into_iter()
                    .filter(|c| c.confidence.is_finite())
                    .map(|mut c| {
                        c.confidence = c.confidence.clamp(0.0, 1.0);
                        c
                    })
                    .collect();
                sort_candidates(&mut kept);
                kept.truncate(self.max_per_transaction);
                (!kept.is_empty()).then_some((id, kept))
            })
            .collect()
    }
}

#[async_trait]
impl BatchMatcher for RemoteBatchMatcher {
    async fn match_batch(
        &self,
        transactions: &[TransactionRecord],
        members: &[Member],
    ) -> BatchMatches {
        if transactions.is_empty() {
            return BatchMatches::new();
        }
        match self.request(transactions, members).await {
            Ok(matches) => {
                tracing::debug!(
                    transactions = transactions.len(),
                    matched = matches.len(),
                    "remote batch matched"
                );
                matches
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    base_url = %self.base_url,
                    "remote matcher failed; treating as no matches"
                );
                BatchMatches::new()
            }
        }
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
