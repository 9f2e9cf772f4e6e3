use std::collections::HashSet;

use chrono::Utc;
use kitty_core::{
    AllocationRef, AssignmentStatus, AuditEntry, Channel, DuplicateEntry, DuplicateSnapshot,
    MatchLog, Member, MemberId, Money, RawNarration, TransactionRecord, SYSTEM_ACTOR,
};
use kitty_import::StatementRow;
use kitty_match::{MatchCandidate, MatchDecision};
use kitty_storage::{
    find_identity_matches, find_invoices_by_reference, get_active_members,
    get_review_transactions, get_transaction, insert_audit, insert_duplicate, insert_match_log,
    insert_statement, insert_transaction, update_transaction_assignment,
    update_transaction_parsed,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::allocator::allocate;
use crate::engine::ReconcileEngine;
use crate::error::ReconcileError;

/// Counts for one statement upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub statement_id: i64,
    pub rows: usize,
    /// Debit-only or zero-credit rows.
    pub skipped: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub auto_assigned: usize,
    pub drafted: usize,
    pub unassigned: usize,
    pub invoices_paid: usize,
    /// Sum of retained credits; duplicates are not counted.
    pub credited: Money,
}

/// Counts for one pass over parked records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RematchReport {
    /// Live unassigned and draft credits considered.
    pub candidates: usize,
    /// Records whose parsed fields changed and were stored again.
    pub reparsed: usize,
    pub auto_assigned: usize,
    pub drafted: usize,
    pub unassigned: usize,
    /// Same decision and reason as before; nothing written.
    pub unchanged: usize,
    pub invoices_paid: usize,
}

impl ReconcileEngine {
    /// Parses, de-duplicates, stores and matches one statement's rows.
    ///
    /// Rows are committed before matching so a matcher failure never loses
    /// the upload; each assignment then commits on its own under the
    /// member's lock.
    pub async fn ingest_statement(
        &self,
        name: &str,
        source: Option<&str>,
        rows: &[StatementRow],
    ) -> Result<IngestReport, ReconcileError> {
        let mut report = IngestReport { rows: rows.len(), ..Default::default() };

        // 1. Parse.
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            if !row.is_credit() {
                report.skipped += 1;
                continue;
            }
            let parsed = self.parser.parse(&row.narration);
            let record = TransactionRecord::new(
                None,
                row.date,
                RawNarration::new(row.narration.clone(), Channel::StatementLine),
                row.credit,
                row.debit,
                parsed,
            )
            .with_receipt_code(row.transaction_code.clone());
            records.push(record);
        }

        // 2. De-duplicate and persist.
        let mut tx = self.pool.begin().await?;
        let statement_id = insert_statement(&mut tx, name, source).await?;
        report.statement_id = statement_id;

        let mut accepted: Vec<TransactionRecord> = Vec::with_capacity(records.len());
        for mut record in records {
            record.statement_id = Some(statement_id);

            let mut universe =
                find_identity_matches(&mut tx, &record.fingerprint(), record.receipt_code.as_deref()).await?;
            universe.extend(accepted.iter().cloned());

            if let Some(hit) = self.detector.check_record(&record, &universe) {
                let entry = DuplicateEntry {
                    id: None,
                    source_statement_id: Some(statement_id),
                    original_transaction_id: Some(hit.original_id),
                    reason: hit.reason,
                    snapshot: DuplicateSnapshot {
                        date: record.date,
                        credit: record.credit,
                        debit: record.debit,
                        transaction_code: record.transaction_code().map(str::to_string),
                        narration: record.narration.text().to_string(),
                    },
                    created_at: Utc::now(),
                };
                insert_duplicate(&mut tx, &entry).await?;
                insert_audit(
                    &mut tx,
                    &AuditEntry::new(
                        SYSTEM_ACTOR,
                        "reject_duplicate",
                        format!("statement:{statement_id}"),
                        serde_json::json!({
                            "original_transaction_id": hit.original_id,
                            "reason": hit.reason,
                            "snapshot": entry.snapshot,
                        }),
                    ),
                )
                .await?;
                debug!(statement_id, original = hit.original_id, reason = %hit.reason, "duplicate row");
                report.duplicates += 1;
                continue;
            }

            record.id = Some(insert_transaction(&mut tx, &record).await?);
            report.credited += record.credit;
            accepted.push(record);
        }
        report.inserted = accepted.len();

        insert_audit(
            &mut tx,
            &AuditEntry::new(
                SYSTEM_ACTOR,
                "ingest_statement",
                format!("statement:{statement_id}"),
                serde_json::json!({
                    "name": name,
                    "rows": report.rows,
                    "inserted": report.inserted,
                    "duplicates": report.duplicates,
                    "skipped": report.skipped,
                }),
            ),
        )
        .await?;
        tx.commit().await?;

        // 3. Score against the registry. No connection is held meanwhile.
        let members = {
            let mut conn = self.pool.acquire().await?;
            get_active_members(&mut conn).await?
        };
        let mut scored = self.batch.match_batch(&accepted, &members).await;

        // 4. Decide each record.
        for record in &accepted {
            let Some(id) = record.id else { continue };
            let candidates = known_candidates(scored.remove(&id).unwrap_or_default(), &members);
            let decision = self.matcher.decide(&candidates);

            match self.apply_decision(id, decision).await? {
                Some(AssignmentStatus::AutoAssigned) => report.auto_assigned += 1,
                Some(AssignmentStatus::Draft) => report.drafted += 1,
                Some(_) => report.unassigned += 1,
                None => {}
            }
        }

        report.invoices_paid = self.count_paid_from(&accepted).await?;

        info!(
            statement_id,
            inserted = report.inserted,
            duplicates = report.duplicates,
            auto_assigned = report.auto_assigned,
            drafted = report.drafted,
            credited = %report.credited,
            matcher = self.batch.name(),
            "statement ingested"
        );
        Ok(report)
    }

    /// Re-parses every live unassigned or draft credit and matches it again
    /// against the current registry, so records parked before a member was
    /// registered (or before a parser change) can still resolve.
    pub async fn rematch_pending(&self, actor: &str) -> Result<RematchReport, ReconcileError> {
        let mut records: Vec<TransactionRecord> = {
            let mut conn = self.pool.acquire().await?;
            get_review_transactions(&mut conn).await?
        };
        records.retain(|r| r.id.is_some() && r.credit.is_positive());
        let mut report = RematchReport { candidates: records.len(), ..Default::default() };

        let mut tx = self.pool.begin().await?;
        for record in &mut records {
            let Some(id) = record.id else { continue };
            let parsed = self.parser.parse(record.narration.text());
            if parsed != record.parsed {
                update_transaction_parsed(&mut tx, id, &parsed).await?;
                record.parsed = parsed;
                report.reparsed += 1;
            }
        }
        tx.commit().await?;

        let members = {
            let mut conn = self.pool.acquire().await?;
            get_active_members(&mut conn).await?
        };
        let mut scored = self.batch.match_batch(&records, &members).await;

        for record in &records {
            let Some(id) = record.id else { continue };
            let candidates = known_candidates(scored.remove(&id).unwrap_or_default(), &members);
            let decision = self.matcher.decide(&candidates);

            match self.apply_decision(id, decision).await? {
                Some(AssignmentStatus::AutoAssigned) => report.auto_assigned += 1,
                Some(AssignmentStatus::Draft) => report.drafted += 1,
                Some(_) => report.unassigned += 1,
                None => report.unchanged += 1,
            }
        }
        report.invoices_paid = self.count_paid_from(&records).await?;

        let mut conn = self.pool.acquire().await?;
        insert_audit(
            &mut conn,
            &AuditEntry::new(
                actor,
                "rematch_pending",
                "transactions",
                serde_json::json!({
                    "candidates": report.candidates,
                    "reparsed": report.reparsed,
                    "auto_assigned": report.auto_assigned,
                    "drafted": report.drafted,
                    "unassigned": report.unassigned,
                    "unchanged": report.unchanged,
                }),
            ),
        )
        .await?;

        info!(
            candidates = report.candidates,
            reparsed = report.reparsed,
            auto_assigned = report.auto_assigned,
            matcher = self.batch.name(),
            actor,
            "parked records matched again"
        );
        Ok(report)
    }

    /// Records one matcher decision. Returns the resulting status, or `None`
    /// when nothing was written: the record changed hands since it was
    /// scored, or the decision repeats its current status and reason.
    async fn apply_decision(
        &self,
        transaction_id: i64,
        decision: MatchDecision,
    ) -> Result<Option<AssignmentStatus>, ReconcileError> {
        let target = match &decision {
            MatchDecision::AutoAssign(c) => Some(c.member_id),
            _ => None,
        };
        let _guard = self.locks.lock(target).await;
        let mut tx = self.pool.begin().await?;

        let record = get_transaction(&mut tx, transaction_id)
            .await?
            .ok_or(ReconcileError::TransactionNotFound(transaction_id))?;
        let parked = matches!(
            record.assignment_status,
            AssignmentStatus::Unassigned | AssignmentStatus::Draft
        );
        if record.archived || !parked || record.member_id.is_some() {
            return Ok(None);
        }

        let reason = decision.reason();
        let repeated = match &decision {
            MatchDecision::AutoAssign(_) => false,
            MatchDecision::Ambiguous { .. } => record.assignment_status == AssignmentStatus::Draft,
            MatchDecision::NoMatch { .. } => record.assignment_status == AssignmentStatus::Unassigned,
        };
        if repeated && record.match_reason.as_deref() == Some(reason.as_str()) {
            return Ok(None);
        }
        let subject = format!("transaction:{transaction_id}");
        let (status, payload) = match decision {
            MatchDecision::AutoAssign(candidate) => {
                let member = candidate.member_id;
                let log = MatchLog::auto(transaction_id, Some(member), candidate.confidence, &reason)?;
                update_transaction_assignment(
                    &mut tx,
                    transaction_id,
                    Some(member),
                    AssignmentStatus::AutoAssigned,
                    Some(candidate.confidence),
                    Some(&reason),
                )
                .await?;
                insert_match_log(&mut tx, &log).await?;
                let allocation = allocate(
                    &mut tx,
                    member,
                    record.credit,
                    AllocationRef::Transaction(transaction_id),
                    true,
                )
                .await?;
                (
                    AssignmentStatus::AutoAssigned,
                    serde_json::json!({
                        "member_id": member,
                        "confidence": candidate.confidence,
                        "signals": candidate.signals,
                        "reason": reason,
                        "allocation": allocation,
                    }),
                )
            }
            MatchDecision::Ambiguous { candidates, .. } => {
                update_transaction_assignment(
                    &mut tx,
                    transaction_id,
                    None,
                    AssignmentStatus::Draft,
                    None,
                    Some(&reason),
                )
                .await?;
                (
                    AssignmentStatus::Draft,
                    serde_json::json!({ "reason": reason, "candidates": candidates }),
                )
            }
            MatchDecision::NoMatch { .. } => {
                update_transaction_assignment(
                    &mut tx,
                    transaction_id,
                    None,
                    AssignmentStatus::Unassigned,
                    None,
                    Some(&reason),
                )
                .await?;
                (AssignmentStatus::Unassigned, serde_json::json!({ "reason": reason }))
            }
        };

        let action = match status {
            AssignmentStatus::AutoAssigned => "auto_assign",
            AssignmentStatus::Draft => "draft_assignment",
            _ => "leave_unassigned",
        };
        insert_audit(&mut tx, &AuditEntry::new(SYSTEM_ACTOR, action, subject, payload)).await?;
        tx.commit().await?;

        debug!(transaction_id, status = %status, "assignment decided");
        Ok(Some(status))
    }

    async fn count_paid_from(&self, records: &[TransactionRecord]) -> Result<usize, ReconcileError> {
        let mut conn = self.pool.acquire().await?;
        let mut total = 0;
        for id in records.iter().filter_map(|r| r.id) {
            total += find_invoices_by_reference(&mut conn, AllocationRef::Transaction(id)).await?.len();
        }
        Ok(total)
    }
}

/// Drops candidates for members outside the active registry; a remote scorer
/// may return ids it should not.
fn known_candidates(candidates: Vec<MatchCandidate>, members: &[Member]) -> Vec<MatchCandidate> {
    let known: HashSet<MemberId> = members.iter().map(|m| m.id).collect();
    candidates
        .into_iter()
        .filter(|c| known.contains(&c.member_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_members_are_filtered() {
        let members = vec![Member::new(1, "Joyce Njagi")];
        let candidates = vec![
            MatchCandidate { member_id: MemberId(1), confidence: 0.8, signals: vec![] },
            MatchCandidate { member_id: MemberId(9), confidence: 1.0, signals: vec![] },
        ];
        let kept = known_candidates(candidates, &members);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].member_id, MemberId(1));
    }
}
