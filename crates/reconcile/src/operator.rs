use kitty_core::{
    AllocationRef, AssignmentStatus, AuditEntry, DomainError, DuplicateEntry, MatchLog, MemberId,
    Money, Payment, ReconciliationStatus, TransactionRecord, MANUAL_CONFIDENCE,
};
use kitty_storage::{
    archive_transaction_row, count_dependent_duplicates, delete_statement_row, get_duplicates,
    get_member, get_payments_by_status, get_reconciliation_logs, get_review_transactions,
    get_statements, get_transaction, get_transactions_for_statement, insert_audit,
    insert_match_log, insert_payment, unwind_invoices, update_transaction_assignment,
};
use serde::Serialize;
use tracing::info;

use crate::allocator::{allocate, Allocation};
use crate::engine::ReconcileEngine;
use crate::error::ReconcileError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualAssignment {
    pub transaction_id: i64,
    pub member_id: MemberId,
    pub previous: Option<MemberId>,
    pub reason: String,
    pub invoices_unwound: u64,
    pub allocation: Option<Allocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedStatement {
    pub statement_id: i64,
    pub transactions: usize,
    pub invoices_unwound: u64,
    /// Later uploads' duplicate entries that pointed at a deleted record.
    /// They stay in the ledger without an original.
    pub duplicates_orphaned: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedPayment {
    pub payment: Payment,
    pub reason: Option<String>,
}

/// Everything waiting on an operator, each with the reason it was parked.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReviewQueue {
    /// Unassigned and draft records; `match_reason` says why.
    pub transactions: Vec<TransactionRecord>,
    pub duplicates: Vec<DuplicateEntry>,
    pub unmatched_payments: Vec<UnmatchedPayment>,
}

impl ReviewQueue {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.duplicates.is_empty() && self.unmatched_payments.is_empty()
    }
}

impl ReconcileEngine {
    /// Assigns a record to `member` at confidence 1.0. A change of owner
    /// unwinds invoices the credit paid for the previous owner before
    /// allocating for the new one.
    pub async fn assign_manually(
        &self,
        transaction_id: i64,
        member: MemberId,
        actor: &str,
    ) -> Result<ManualAssignment, ReconcileError> {
        let previous = {
            let mut conn = self.pool.acquire().await?;
            let target = get_member(&mut conn, member)
                .await?
                .ok_or(ReconcileError::MemberNotFound(member))?;
            if !target.is_active {
                return Err(DomainError::InactiveMember(member).into());
            }
            let record = get_transaction(&mut conn, transaction_id)
                .await?
                .ok_or(ReconcileError::TransactionNotFound(transaction_id))?;
            if record.archived {
                return Err(DomainError::ArchivedTransaction(transaction_id).into());
            }
            record.member_id
        };

        let guard = self.locks.lock_all([Some(member), previous]).await;
        let mut tx = self.pool.begin().await?;

        let record = get_transaction(&mut tx, transaction_id)
            .await?
            .ok_or(ReconcileError::TransactionNotFound(transaction_id))?;
        if record.archived {
            return Err(DomainError::ArchivedTransaction(transaction_id).into());
        }
        if !guard.covers(record.member_id) {
            return Err(ReconcileError::OwnershipChanged(format!("transaction:{transaction_id}")));
        }

        let reference = AllocationRef::Transaction(transaction_id);
        let (reason, invoices_unwound) = match record.member_id {
            Some(prev) if prev != member => (
                format!("Reassigned from member {prev} to member {member}"),
                unwind_invoices(&mut tx, reference).await?,
            ),
            Some(_) => ("Confirmed by operator".to_string(), 0),
            None => ("Manually assigned".to_string(), 0),
        };

        update_transaction_assignment(
            &mut tx,
            transaction_id,
            Some(member),
            AssignmentStatus::ManualAssigned,
            Some(MANUAL_CONFIDENCE),
            Some(&reason),
        )
        .await?;
        insert_match_log(&mut tx, &MatchLog::manual(transaction_id, member, &reason, actor)).await?;

        let allocation = if record.credit.is_positive() {
            Some(allocate(&mut tx, member, record.credit, reference, false).await?)
        } else {
            None
        };

        let assignment = ManualAssignment {
            transaction_id,
            member_id: member,
            previous: record.member_id,
            reason,
            invoices_unwound,
            allocation,
        };
        insert_audit(
            &mut tx,
            &AuditEntry::new(
                actor,
                "manual_assign",
                format!("transaction:{transaction_id}"),
                serde_json::json!({
                    "member_id": assignment.member_id,
                    "previous": assignment.previous,
                    "reason": assignment.reason,
                    "confidence": MANUAL_CONFIDENCE,
                    "invoices_unwound": assignment.invoices_unwound,
                    "allocation": assignment.allocation,
                }),
            ),
        )
        .await?;
        tx.commit().await?;

        info!(transaction_id, member = %member, actor, "transaction assigned manually");
        Ok(assignment)
    }

    /// Soft-archives a record. Invoices its credit paid go back to pending.
    pub async fn archive_transaction(&self, transaction_id: i64, actor: &str) -> Result<u64, ReconcileError> {
        let owner = {
            let mut conn = self.pool.acquire().await?;
            get_transaction(&mut conn, transaction_id)
                .await?
                .ok_or(ReconcileError::TransactionNotFound(transaction_id))?
                .member_id
        };

        let guard = self.locks.lock(owner).await;
        let mut tx = self.pool.begin().await?;

        let record = get_transaction(&mut tx, transaction_id)
            .await?
            .ok_or(ReconcileError::TransactionNotFound(transaction_id))?;
        if record.archived {
            return Err(DomainError::ArchivedTransaction(transaction_id).into());
        }
        if !guard.covers(record.member_id) {
            return Err(ReconcileError::OwnershipChanged(format!("transaction:{transaction_id}")));
        }

        let unwound = unwind_invoices(&mut tx, AllocationRef::Transaction(transaction_id)).await?;
        archive_transaction_row(&mut tx, transaction_id).await?;
        insert_audit(
            &mut tx,
            &AuditEntry::new(
                actor,
                "archive_transaction",
                format!("transaction:{transaction_id}"),
                serde_json::json!({
                    "member_id": record.member_id,
                    "previous_status": record.assignment_status,
                    "invoices_unwound": unwound,
                }),
            ),
        )
        .await?;
        tx.commit().await?;

        info!(transaction_id, actor, unwound, "transaction archived");
        Ok(unwound)
    }

    /// Hard-deletes a statement with its records, its own duplicate entries
    /// and match logs. Invoices paid from those records return to pending.
    /// Duplicate entries from other statements survive, unlinked.
    pub async fn delete_statement(
        &self,
        statement_id: i64,
        actor: &str,
    ) -> Result<DeletedStatement, ReconcileError> {
        let owners: Vec<Option<MemberId>> = {
            let mut conn = self.pool.acquire().await?;
            if !get_statements(&mut conn).await?.iter().any(|s| s.id == statement_id) {
                return Err(ReconcileError::StatementNotFound(statement_id));
            }
            get_transactions_for_statement(&mut conn, statement_id)
                .await?
                .iter()
                .map(|t| t.member_id)
                .collect()
        };

        let guard = self.locks.lock_all(owners).await;
        let mut tx = self.pool.begin().await?;

        let records = get_transactions_for_statement(&mut tx, statement_id).await?;
        if let Some(moved) = records.iter().find(|t| !guard.covers(t.member_id)) {
            return Err(ReconcileError::OwnershipChanged(format!(
                "transaction:{}",
                moved.id.unwrap_or_default()
            )));
        }

        let mut invoices_unwound = 0;
        for id in records.iter().filter_map(|t| t.id) {
            invoices_unwound += unwind_invoices(&mut tx, AllocationRef::Transaction(id)).await?;
        }
        let duplicates_orphaned = count_dependent_duplicates(&mut tx, statement_id).await?;
        if !delete_statement_row(&mut tx, statement_id).await? {
            return Err(ReconcileError::StatementNotFound(statement_id));
        }

        let deleted = DeletedStatement {
            statement_id,
            transactions: records.len(),
            invoices_unwound,
            duplicates_orphaned,
        };
        insert_audit(
            &mut tx,
            &AuditEntry::new(
                actor,
                "delete_statement",
                format!("statement:{statement_id}"),
                serde_json::json!({
                    "transactions": deleted.transactions,
                    "invoices_unwound": deleted.invoices_unwound,
                    "duplicates_orphaned": deleted.duplicates_orphaned,
                }),
            ),
        )
        .await?;
        tx.commit().await?;

        info!(
            statement_id,
            actor,
            transactions = deleted.transactions,
            orphaned = duplicates_orphaned,
            "statement deleted"
        );
        Ok(deleted)
    }

    /// Applies a credit that did not arrive through a statement, such as a
    /// contribution recorded by hand.
    pub async fn allocate_credit(
        &self,
        member: MemberId,
        amount: Money,
        reference: AllocationRef,
        actor: &str,
    ) -> Result<Allocation, ReconcileError> {
        if !amount.is_positive() {
            return Err(DomainError::NonPositiveAmount.into());
        }

        let _guard = self.locks.lock(Some(member)).await;
        let mut tx = self.pool.begin().await?;

        let allocation = allocate(&mut tx, member, amount, reference, false).await?;
        insert_audit(
            &mut tx,
            &AuditEntry::new(
                actor,
                "allocate_credit",
                format!("member:{member}"),
                serde_json::json!({ "amount": amount, "allocation": &allocation }),
            ),
        )
        .await?;
        tx.commit().await?;

        Ok(allocation)
    }

    /// Stores an incoming payment as pending.
    pub async fn record_payment(&self, payment: &Payment, actor: &str) -> Result<i64, ReconcileError> {
        if !payment.amount.is_positive() {
            return Err(DomainError::NonPositiveAmount.into());
        }

        let mut tx = self.pool.begin().await?;
        let id = insert_payment(&mut tx, payment).await?;
        insert_audit(
            &mut tx,
            &AuditEntry::new(
                actor,
                "record_payment",
                format!("payment:{id}"),
                serde_json::json!({
                    "channel": payment.channel,
                    "amount": payment.amount,
                    "receipt_number": payment.receipt_number,
                    "provider_reference": payment.provider_reference,
                }),
            ),
        )
        .await?;
        tx.commit().await?;

        Ok(id)
    }

    pub async fn review_queue(&self) -> Result<ReviewQueue, ReconcileError> {
        let mut conn = self.pool.acquire().await?;

        let transactions = get_review_transactions(&mut conn).await?;
        let duplicates = get_duplicates(&mut conn).await?;

        let mut unmatched_payments = Vec::new();
        for payment in get_payments_by_status(&mut conn, ReconciliationStatus::Unmatched).await? {
            let reason = match payment.id {
                Some(id) => get_reconciliation_logs(&mut conn, id)
                    .await?
                    .pop()
                    .map(|log| log.notes),
                None => None,
            };
            unmatched_payments.push(UnmatchedPayment { payment, reason });
        }

        Ok(ReviewQueue { transactions, duplicates, unmatched_payments })
    }
}
