use std::sync::Arc;

use chrono::Utc;
use kitty_core::{
    AllocationRef, AuditEntry, DuplicateReason, MemberId, Payment, ReconciliationLog,
    ReconciliationStatus, TransactionRecord, SYSTEM_ACTOR,
};
use kitty_import::NarrationParser;
use kitty_match::{
    BatchMatcher, CounterpartKind, DuplicateDetector, DuplicateHit, LocalBatchMatcher, MemberMatcher,
};
use kitty_storage::{
    consumed_transaction_ids, delete_reconciliation_logs, find_credits_between,
    find_payment_identity_matches, get_payment, get_payments_by_status, insert_audit,
    insert_reconciliation_log, update_payment_status, DbPool,
};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::allocator::{allocate, Allocation};
use crate::error::ReconcileError;
use crate::lock::{MemberGuard, MemberLocks};

pub(crate) const NO_CANDIDATE_TRANSACTION: &str = "no candidate transaction";

/// Terminal result of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Matched {
        transaction_id: i64,
        kind: CounterpartKind,
        allocation: Option<Allocation>,
    },
    Unmatched {
        reason: String,
    },
    Duplicate {
        original_id: i64,
        reason: DuplicateReason,
    },
    /// The payment was already terminal; nothing was written.
    Unchanged {
        previous: ReconciliationStatus,
    },
    Failed {
        reason: String,
    },
}

impl ReconcileOutcome {
    pub fn status(&self) -> Option<ReconciliationStatus> {
        match self {
            ReconcileOutcome::Matched { .. } => Some(ReconciliationStatus::Matched),
            ReconcileOutcome::Unmatched { .. } => Some(ReconciliationStatus::Unmatched),
            ReconcileOutcome::Duplicate { .. } => Some(ReconciliationStatus::Duplicate),
            ReconcileOutcome::Unchanged { previous } => Some(*previous),
            ReconcileOutcome::Failed { .. } => None,
        }
    }
}

enum PaymentDecision {
    Duplicate(DuplicateHit),
    Matched {
        transaction_id: i64,
        transaction: TransactionRecord,
        kind: CounterpartKind,
    },
    Unmatched,
}

/// Orchestrates parsing, duplicate checks, matching and allocation against
/// one database. Cheap to share behind an `Arc`.
pub struct ReconcileEngine {
    pub(crate) pool: DbPool,
    pub(crate) parser: NarrationParser,
    pub(crate) matcher: MemberMatcher,
    pub(crate) detector: DuplicateDetector,
    pub(crate) batch: Arc<dyn BatchMatcher>,
    pub(crate) locks: MemberLocks,
}

impl ReconcileEngine {
    pub fn new(pool: DbPool, parser: NarrationParser, matcher: MemberMatcher) -> Self {
        Self {
            pool,
            parser,
            batch: Arc::new(LocalBatchMatcher::new(matcher.clone())),
            matcher,
            detector: DuplicateDetector::default(),
            locks: MemberLocks::new(),
        }
    }

    /// Replaces the in-process scorer, e.g. with a remote matching service.
    pub fn with_batch_matcher(mut self, batch: Arc<dyn BatchMatcher>) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_detector(mut self, detector: DuplicateDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn parser(&self) -> &NarrationParser {
        &self.parser
    }

    pub fn batch_matcher(&self) -> &dyn BatchMatcher {
        self.batch.as_ref()
    }

    // ── Payments ─────────────────────────────────────────────────────────────

    /// Drives a pending payment to a terminal state. Already-terminal
    /// payments are left untouched.
    pub async fn reconcile_payment(
        &self,
        payment_id: i64,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.run_payment(payment_id, SYSTEM_ACTOR, false).await
    }

    /// Resets a payment to pending, clears its match linkage and re-runs
    /// reconciliation, all in one database transaction.
    pub async fn retry_payment(
        &self,
        payment_id: i64,
        actor: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.run_payment(payment_id, actor, true).await
    }

    /// Reconciles every pending payment. Errors are reported per payment and
    /// do not stop the batch.
    pub async fn reconcile_pending(&self) -> Result<Vec<(i64, ReconcileOutcome)>, ReconcileError> {
        let pending = {
            let mut conn = self.pool.acquire().await?;
            get_payments_by_status(&mut conn, ReconciliationStatus::Pending).await?
        };

        let mut results = Vec::with_capacity(pending.len());
        for id in pending.iter().filter_map(|p| p.id) {
            let outcome = match self.reconcile_payment(id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let retryable = e.is_retryable();
                    warn!(payment_id = id, retryable, "reconciliation failed: {e}");
                    ReconcileOutcome::Failed { reason: e.to_string() }
                }
            };
            results.push((id, outcome));
        }

        info!(payments = results.len(), "pending payments reconciled");
        Ok(results)
    }

    async fn run_payment(
        &self,
        payment_id: i64,
        actor: &str,
        retry: bool,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let lock_member = self.payment_lock_target(payment_id).await?;
        let guard = self.locks.lock(lock_member).await;

        let mut tx = self.pool.begin().await?;
        let mut payment = get_payment(&mut tx, payment_id)
            .await?
            .ok_or(ReconcileError::PaymentNotFound(payment_id))?;
        let previous = payment.reconciliation_status;

        if previous.is_terminal() && !retry {
            return Ok(ReconcileOutcome::Unchanged { previous });
        }
        if retry {
            delete_reconciliation_logs(&mut tx, payment_id).await?;
            update_payment_status(&mut tx, payment_id, ReconciliationStatus::Pending, None).await?;
            payment.reconciliation_status = ReconciliationStatus::Pending;
        }

        let decision = self.decide_payment(&mut tx, &payment).await?;
        let outcome = self
            .settle_payment(&mut tx, payment_id, &payment, decision, actor, &guard)
            .await?;

        let action = if retry { "retry_payment" } else { "reconcile_payment" };
        let payload = serde_json::json!({
            "previous_status": previous,
            "outcome": &outcome,
            "amount": payment.amount,
        });
        let entry = AuditEntry::new(actor, action, format!("payment:{payment_id}"), payload);
        insert_audit(&mut tx, &entry).await?;
        tx.commit().await?;

        info!(payment_id, status = ?outcome.status(), retry, "payment reconciled");
        Ok(outcome)
    }

    /// Picks the member whose lock covers this payment. Runs on its own short
    /// connection so no lock is awaited while the database is held.
    async fn payment_lock_target(
        &self,
        payment_id: i64,
    ) -> Result<Option<MemberId>, ReconcileError> {
        let mut conn = self.pool.acquire().await?;
        let payment = get_payment(&mut conn, payment_id)
            .await?
            .ok_or(ReconcileError::PaymentNotFound(payment_id))?;
        if payment.member_id.is_some() {
            return Ok(payment.member_id);
        }
        match self.decide_payment(&mut conn, &payment).await? {
            PaymentDecision::Matched { transaction, .. } => Ok(transaction.member_id),
            _ => Ok(None),
        }
    }

    async fn decide_payment(
        &self,
        conn: &mut SqliteConnection,
        payment: &Payment,
    ) -> Result<PaymentDecision, ReconcileError> {
        // 1. Duplicate of an earlier payment?
        let peers = find_payment_identity_matches(conn, payment).await?;
        if let Some(hit) = self.detector.check_payment(payment, &peers) {
            return Ok(PaymentDecision::Duplicate(hit));
        }

        // 2-3. Direct, then windowed, counterpart among unconsumed credits.
        let window = self.detector.window_for(payment);
        let credits = find_credits_between(conn, payment.amount, window.start, window.end).await?;
        let consumed = consumed_transaction_ids(conn, payment.id).await?;

        let found = self
            .detector
            .find_counterpart(payment, &credits, &consumed)
            .and_then(|c| {
                credits
                    .into_iter()
                    .find(|t| t.id == Some(c.transaction_id))
                    .map(|transaction| PaymentDecision::Matched {
                        transaction_id: c.transaction_id,
                        transaction,
                        kind: c.kind,
                    })
            });

        // 4. Nothing.
        Ok(found.unwrap_or(PaymentDecision::Unmatched))
    }

    async fn settle_payment(
        &self,
        conn: &mut SqliteConnection,
        payment_id: i64,
        payment: &Payment,
        decision: PaymentDecision,
        actor: &str,
        guard: &MemberGuard,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let (status, transaction_id, notes, outcome) = match decision {
            PaymentDecision::Duplicate(hit) => (
                ReconciliationStatus::Duplicate,
                None,
                format!("duplicate of payment {} ({})", hit.original_id, hit.reason),
                ReconcileOutcome::Duplicate { original_id: hit.original_id, reason: hit.reason },
            ),
            PaymentDecision::Unmatched => (
                ReconciliationStatus::Unmatched,
                None,
                NO_CANDIDATE_TRANSACTION.to_string(),
                ReconcileOutcome::Unmatched { reason: NO_CANDIDATE_TRANSACTION.to_string() },
            ),
            PaymentDecision::Matched { transaction_id, transaction, kind } => {
                let how = match kind {
                    CounterpartKind::Direct => "direct",
                    CounterpartKind::Window => "window",
                };
                let mut notes = format!("{how} match on transaction {transaction_id}");

                // Two different owners: link the payment, leave invoices alone.
                let conflict = match (payment.member_id, transaction.member_id) {
                    (Some(named), Some(owner)) if named != owner => Some((named, owner)),
                    _ => None,
                };
                let allocation = match (conflict, payment.member_id.or(transaction.member_id)) {
                    (Some((named, owner)), _) => {
                        notes.push_str(&format!(
                            "; owner conflict: payment names member {named}, \
                             transaction belongs to member {owner}"
                        ));
                        warn!(payment_id, transaction_id, %named, %owner, "owner conflict");
                        None
                    }
                    (None, Some(member)) if transaction.credit.is_positive() => {
                        if !guard.covers(Some(member)) {
                            let subject = format!("payment:{payment_id}");
                            return Err(ReconcileError::OwnershipChanged(subject));
                        }
                        let reference = AllocationRef::Transaction(transaction_id);
                        Some(allocate(conn, member, transaction.credit, reference, true).await?)
                    }
                    _ => None,
                };

                (
                    ReconciliationStatus::Matched,
                    Some(transaction_id),
                    notes,
                    ReconcileOutcome::Matched { transaction_id, kind, allocation },
                )
            }
        };

        update_payment_status(conn, payment_id, status, Some(actor)).await?;
        insert_reconciliation_log(
            conn,
            &ReconciliationLog {
                id: None,
                payment_id,
                transaction_id,
                status,
                notes,
                reconciled_by: Some(actor.to_string()),
                created_at: Utc::now(),
            },
        )
        .await?;

        Ok(outcome)
    }
}
