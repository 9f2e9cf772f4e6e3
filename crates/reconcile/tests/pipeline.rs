use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use kitty_core::{
    AllocationRef, AssignmentStatus, Channel, DomainError, DuplicateReason, Invoice, InvoiceStatus,
    MatchSource, Member, MemberId, Money, ParsedFields, Payment, PaymentChannel, RawNarration,
    ReconciliationStatus, TransactionOrigin, TransactionRecord,
};
use kitty_import::{NarrationParser, StatementRow};
use kitty_match::{
    BatchMatcher, BatchMatches, CounterpartKind, MatchCandidate, MemberMatcher, RemoteBatchMatcher,
};
use kitty_reconcile::{ReconcileEngine, ReconcileError, ReconcileOutcome};
use kitty_storage::{
    count_audit_entries, create_db, get_duplicates, get_invoice, get_match_logs,
    get_reconciliation_logs, get_transaction, get_transactions_for_statement, insert_invoice,
    insert_member, insert_statement, insert_transaction, total_credited,
};
use tempfile::TempDir;

// ── Fixtures ─────────────────────────────────────────────────────────────────

const DICKSON: &str = "MPS 254721404848 SIA93MAWD9 0716227320 DICKSON NJO";
const JOYCE: &str = "Pay Bill from 25472****176 - JOYCE NJAGI Acc. Joyce Njagi";

async fn engine() -> (TempDir, ReconcileEngine) {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_db(&dir.path().join("kitty.db")).await.unwrap();
    let engine = ReconcileEngine::new(pool, NarrationParser::default(), MemberMatcher::default());
    (dir, engine)
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, d).unwrap()
}

fn kes(shillings: i64) -> Money {
    Money::from_cents(shillings * 100)
}

async fn add_member(engine: &ReconcileEngine, member: Member) -> MemberId {
    let mut conn = engine.pool().acquire().await.unwrap();
    insert_member(&mut conn, &member).await.unwrap()
}

async fn add_invoice(
    engine: &ReconcileEngine,
    member: MemberId,
    number: &str,
    shillings: i64,
    due: NaiveDate,
) -> i64 {
    let mut conn = engine.pool().acquire().await.unwrap();
    let issued = due - chrono::Duration::days(30);
    let invoice = Invoice::new(member, number, kes(shillings), issued, due);
    insert_invoice(&mut conn, &invoice).await.unwrap()
}

async fn invoice(engine: &ReconcileEngine, id: i64) -> Invoice {
    let mut conn = engine.pool().acquire().await.unwrap();
    get_invoice(&mut conn, id).await.unwrap().unwrap()
}

async fn record(engine: &ReconcileEngine, id: i64) -> TransactionRecord {
    let mut conn = engine.pool().acquire().await.unwrap();
    get_transaction(&mut conn, id).await.unwrap().unwrap()
}

async fn statement_records(engine: &ReconcileEngine, statement_id: i64) -> Vec<TransactionRecord> {
    let mut conn = engine.pool().acquire().await.unwrap();
    get_transactions_for_statement(&mut conn, statement_id).await.unwrap()
}

async fn audit_count(engine: &ReconcileEngine, subject: &str) -> i64 {
    let mut conn = engine.pool().acquire().await.unwrap();
    count_audit_entries(&mut conn, subject).await.unwrap()
}

fn payment(member: Option<MemberId>, shillings: i64, receipt: Option<&str>, hour: u32) -> Payment {
    let mut p = Payment::new(
        PaymentChannel::MobileMoney,
        kes(shillings),
        Utc.with_ymd_and_hms(2024, 12, 25, hour, 0, 0).unwrap(),
    );
    p.member_id = member;
    p.receipt_number = receipt.map(str::to_string);
    p
}

fn dickson() -> Member {
    Member::new(0, "Dickson Njoroge").with_phone("254721404848")
}

fn joyce() -> Member {
    Member::new(0, "Joyce Njagi").with_phone("254722555176")
}

// ── Statement ingestion ──────────────────────────────────────────────────────

#[tokio::test]
async fn credit_of_1200_pays_only_the_oldest_1000_invoice() {
    let (_dir, engine) = engine().await;
    let member = add_member(&engine, dickson()).await;
    let older = add_invoice(&engine, member, "INV-1", 1000, NaiveDate::from_ymd_opt(2024, 11, 1).unwrap()).await;
    let newer = add_invoice(&engine, member, "INV-2", 500, day(1)).await;

    let rows = vec![StatementRow::credit(day(25), DICKSON, kes(1200))];
    let report = engine.ingest_statement("december.csv", None, &rows).await.unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.auto_assigned, 1);
    assert_eq!(report.invoices_paid, 1);
    assert_eq!(report.credited, kes(1200));

    let tx = &statement_records(&engine, report.statement_id).await[0];
    assert_eq!(tx.member_id, Some(member));
    assert_eq!(tx.assignment_status, AssignmentStatus::AutoAssigned);
    assert_eq!(tx.match_confidence, Some(1.0));

    let paid = invoice(&engine, older).await;
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert_eq!(paid.paid_reference, Some(AllocationRef::Transaction(tx.id.unwrap())));
    assert_eq!(paid.metadata["auto_matched"], serde_json::json!(true));
    assert_eq!(invoice(&engine, newer).await.status, InvoiceStatus::Pending);

    let mut conn = engine.pool().acquire().await.unwrap();
    let logs = get_match_logs(&mut conn, tx.id.unwrap()).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].source, MatchSource::Auto);
}

#[tokio::test]
async fn debit_and_zero_rows_are_skipped() {
    let (_dir, engine) = engine().await;
    let mut debit = StatementRow::credit(day(25), "ATM WITHDRAWAL", Money::zero());
    debit.debit = kes(300);
    let rows = vec![debit, StatementRow::credit(day(25), "INTEREST", Money::zero())];

    let report = engine.ingest_statement("empty.csv", None, &rows).await.unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(report.inserted, 0);
    assert!(report.credited.is_zero());
}

#[tokio::test]
async fn cross_batch_duplicate_is_counted_once() {
    let (_dir, engine) = engine().await;
    let rows = vec![StatementRow::credit(day(25), DICKSON, kes(1000))];

    let first = engine.ingest_statement("upload-1.csv", None, &rows).await.unwrap();
    let second = engine.ingest_statement("upload-2.csv", None, &rows).await.unwrap();

    assert_eq!(first.inserted, 1);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 1);
    assert!(second.credited.is_zero());

    let original = statement_records(&engine, first.statement_id).await[0].id.unwrap();
    let mut conn = engine.pool().acquire().await.unwrap();
    let duplicates = get_duplicates(&mut conn).await.unwrap();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].original_transaction_id, Some(original));
    assert_eq!(duplicates[0].reason, DuplicateReason::CrossStatement);
    assert_eq!(duplicates[0].source_statement_id, Some(second.statement_id));
    assert_eq!(total_credited(&mut conn).await.unwrap(), kes(1000));
}

#[tokio::test]
async fn repeated_row_within_one_upload_is_intra_statement() {
    let (_dir, engine) = engine().await;
    let row = StatementRow::credit(day(25), DICKSON, kes(1000));
    let report = engine
        .ingest_statement("upload.csv", None, &[row.clone(), row])
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.duplicates, 1);
    let mut conn = engine.pool().acquire().await.unwrap();
    assert_eq!(get_duplicates(&mut conn).await.unwrap()[0].reason, DuplicateReason::IntraStatement);
}

#[tokio::test]
async fn shared_masked_suffix_never_auto_assigns() {
    let (_dir, engine) = engine().await;
    add_member(&engine, Member::new(0, "Joyce Njagi").with_phone("254722000176")).await;
    add_member(&engine, Member::new(0, "Peter Kamau").with_phone("254733111176")).await;

    let rows = vec![
        StatementRow::credit(day(25), JOYCE, kes(500)),
        StatementRow::credit(day(26), "Pay Bill from 25472****176", kes(700)),
    ];
    let report = engine.ingest_statement("paybill.csv", None, &rows).await.unwrap();

    assert_eq!(report.auto_assigned, 0);
    assert_eq!(report.drafted, 2);
    for tx in statement_records(&engine, report.statement_id).await {
        assert_eq!(tx.member_id, None);
        assert_eq!(tx.assignment_status, AssignmentStatus::Draft);
        assert!(tx.match_reason.is_some());
    }

    let queue = engine.review_queue().await.unwrap();
    assert_eq!(queue.transactions.len(), 2);
    assert!(queue
        .transactions
        .iter()
        .any(|t| t.match_reason.as_deref() == Some("ambiguous suffix")));
}

#[tokio::test]
async fn emitted_confidences_stay_in_unit_interval() {
    let (_dir, engine) = engine().await;
    add_member(&engine, dickson()).await;
    add_member(&engine, Member::new(0, "Joyce Njagi").with_phone("254722000176")).await;

    let rows = vec![
        StatementRow::credit(day(20), DICKSON, kes(100)),
        StatementRow::credit(day(21), JOYCE, kes(200)),
        StatementRow::credit(day(22), "EAZZY-FUNDS TRNSF FRM JOYCE NJAGI TPG QAZ12WSX34", kes(300)),
        StatementRow::credit(day(23), "CASH DEPOSIT", kes(400)),
    ];
    let report = engine.ingest_statement("mixed.csv", None, &rows).await.unwrap();

    let mut conn = engine.pool().acquire().await.unwrap();
    for tx in get_transactions_for_statement(&mut conn, report.statement_id).await.unwrap() {
        if let Some(c) = tx.match_confidence {
            assert!((0.0..=1.0).contains(&c), "confidence {c} out of range");
        }
        for log in get_match_logs(&mut conn, tx.id.unwrap()).await.unwrap() {
            assert!((0.0..=1.0).contains(&log.confidence));
        }
    }
}

struct RogueMatcher;

#[async_trait]
impl BatchMatcher for RogueMatcher {
    async fn match_batch(&self, transactions: &[TransactionRecord], _members: &[Member]) -> BatchMatches {
        transactions
            .iter()
            .filter_map(|t| t.id)
            .map(|id| {
                let candidate = MatchCandidate { member_id: MemberId(999), confidence: 1.0, signals: vec![] };
                (id, vec![candidate])
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "rogue"
    }
}

#[tokio::test]
async fn unknown_members_from_matcher_are_ignored() {
    let (_dir, engine) = engine().await;
    add_member(&engine, dickson()).await;
    let engine = engine.with_batch_matcher(Arc::new(RogueMatcher));

    let rows = vec![StatementRow::credit(day(25), DICKSON, kes(1000))];
    let report = engine.ingest_statement("rogue.csv", None, &rows).await.unwrap();
    assert_eq!(report.auto_assigned, 0);
    assert_eq!(report.unassigned, 1);
}

#[tokio::test]
async fn unreachable_remote_matcher_fails_closed() {
    let (_dir, engine) = engine().await;
    add_member(&engine, dickson()).await;
    let remote = RemoteBatchMatcher::new("http://127.0.0.1:9", Duration::from_millis(300)).unwrap();
    let engine = engine.with_batch_matcher(Arc::new(remote));

    let rows = vec![StatementRow::credit(day(25), DICKSON, kes(1000))];
    let report = engine.ingest_statement("remote.csv", None, &rows).await.unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.auto_assigned, 0);
    let tx = &statement_records(&engine, report.statement_id).await[0];
    assert_eq!(tx.assignment_status, AssignmentStatus::Unassigned);
    assert_eq!(tx.match_reason.as_deref(), Some("no candidate member"));
}

// ── Payments ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reconciliation_is_idempotent_and_retry_replaces_linkage() {
    let (_dir, engine) = engine().await;
    let member = add_member(&engine, dickson()).await;
    let rows = vec![StatementRow::credit(day(25), DICKSON, kes(1000)).with_code("SIA93MAWD9")];
    let report = engine.ingest_statement("dec.csv", None, &rows).await.unwrap();
    let tx_id = statement_records(&engine, report.statement_id).await[0].id.unwrap();

    let id = engine
        .record_payment(&payment(Some(member), 1000, Some("SIA93MAWD9"), 8), "callback")
        .await
        .unwrap();
    let subject = format!("payment:{id}");

    let first = engine.reconcile_payment(id).await.unwrap();
    assert!(matches!(
        first,
        ReconcileOutcome::Matched { transaction_id, kind: CounterpartKind::Direct, .. }
            if transaction_id == tx_id
    ));
    assert_eq!(audit_count(&engine, &subject).await, 2);

    let again = engine.reconcile_payment(id).await.unwrap();
    assert_eq!(again, ReconcileOutcome::Unchanged { previous: ReconciliationStatus::Matched });
    assert_eq!(audit_count(&engine, &subject).await, 2);

    let retried = engine.retry_payment(id, "operator").await.unwrap();
    assert_eq!(retried.status(), Some(ReconciliationStatus::Matched));
    assert_eq!(audit_count(&engine, &subject).await, 3);

    let mut conn = engine.pool().acquire().await.unwrap();
    let logs = get_reconciliation_logs(&mut conn, id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].transaction_id, Some(tx_id));
    assert_eq!(logs[0].reconciled_by.as_deref(), Some("operator"));
}

#[tokio::test]
async fn later_payment_with_same_receipt_is_duplicate() {
    let (_dir, engine) = engine().await;
    let member = add_member(&engine, dickson()).await;
    let rows = vec![StatementRow::credit(day(25), DICKSON, kes(1000)).with_code("SIA93MAWD9")];
    engine.ingest_statement("dec.csv", None, &rows).await.unwrap();

    let original = engine
        .record_payment(&payment(Some(member), 1000, Some("SIA93MAWD9"), 8), "callback")
        .await
        .unwrap();
    let replay = engine
        .record_payment(&payment(Some(member), 1000, Some("sia93mawd9"), 9), "callback")
        .await
        .unwrap();

    let results = engine.reconcile_pending().await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].1.status(), Some(ReconciliationStatus::Matched));
    assert_eq!(
        results[1].1,
        ReconcileOutcome::Duplicate { original_id: original, reason: DuplicateReason::ReceiptNumber }
    );

    // Retrying the original must not see its own replay as an earlier twin.
    let retried = engine.retry_payment(original, "operator").await.unwrap();
    assert_eq!(retried.status(), Some(ReconciliationStatus::Matched));
    assert_eq!(
        engine.retry_payment(replay, "operator").await.unwrap().status(),
        Some(ReconciliationStatus::Duplicate)
    );
}

#[tokio::test]
async fn window_match_never_reuses_a_consumed_transaction() {
    let (_dir, engine) = engine().await;
    let member = add_member(&engine, dickson()).await;
    let rows = vec![StatementRow::credit(day(24), DICKSON, kes(500))];
    engine.ingest_statement("dec.csv", None, &rows).await.unwrap();

    let engine = Arc::new(engine);
    let a = engine.record_payment(&payment(Some(member), 500, None, 8), "callback").await.unwrap();
    let b = engine.record_payment(&payment(Some(member), 500, None, 9), "callback").await.unwrap();

    let (ea, eb) = (engine.clone(), engine.clone());
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { ea.reconcile_payment(a).await }),
        tokio::spawn(async move { eb.reconcile_payment(b).await }),
    );
    let outcomes = [ra.unwrap().unwrap(), rb.unwrap().unwrap()];

    let matched: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::Matched { kind: CounterpartKind::Window, .. }))
        .collect();
    assert_eq!(matched.len(), 1);
    assert!(outcomes
        .iter()
        .any(|o| *o == ReconcileOutcome::Unmatched { reason: "no candidate transaction".into() }));

    let queue = engine.review_queue().await.unwrap();
    assert_eq!(queue.unmatched_payments.len(), 1);
    assert_eq!(queue.unmatched_payments[0].reason.as_deref(), Some("no candidate transaction"));
}

#[tokio::test]
async fn payment_naming_another_owner_links_without_allocating() {
    let (_dir, engine) = engine().await;
    let owner = add_member(&engine, dickson()).await;
    let named = add_member(&engine, joyce()).await;
    let owner_inv = add_invoice(&engine, owner, "INV-1", 1000, day(1)).await;
    let named_inv = add_invoice(&engine, named, "INV-2", 1000, day(1)).await;

    let rows = vec![StatementRow::credit(day(25), DICKSON, kes(1000)).with_code("SIA93MAWD9")];
    let report = engine.ingest_statement("dec.csv", None, &rows).await.unwrap();
    let tx_id = statement_records(&engine, report.statement_id).await[0].id.unwrap();
    assert_eq!(record(&engine, tx_id).await.member_id, Some(owner));
    assert_eq!(invoice(&engine, owner_inv).await.status, InvoiceStatus::Paid);

    let id = engine
        .record_payment(&payment(Some(named), 1000, Some("SIA93MAWD9"), 8), "callback")
        .await
        .unwrap();
    let outcome = engine.reconcile_payment(id).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Matched {
            transaction_id: tx_id,
            kind: CounterpartKind::Direct,
            allocation: None,
        }
    );

    // Neither side moves: the credit stays with its owner.
    assert_eq!(invoice(&engine, named_inv).await.status, InvoiceStatus::Pending);
    assert_eq!(record(&engine, tx_id).await.member_id, Some(owner));

    let mut conn = engine.pool().acquire().await.unwrap();
    let logs = get_reconciliation_logs(&mut conn, id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].transaction_id, Some(tx_id));
    assert!(logs[0].notes.contains("owner conflict"));
    assert!(logs[0].notes.contains(&format!("payment names member {named}")));
}

// ── Re-matching parked records ───────────────────────────────────────────────

#[tokio::test]
async fn rematch_assigns_records_parked_before_registration() {
    let (_dir, engine) = engine().await;
    let rows = vec![StatementRow::credit(day(25), DICKSON, kes(1000))];
    let report = engine.ingest_statement("dec.csv", None, &rows).await.unwrap();
    assert_eq!(report.unassigned, 1);
    let tx_id = statement_records(&engine, report.statement_id).await[0].id.unwrap();

    let member = add_member(&engine, dickson()).await;
    let inv = add_invoice(&engine, member, "INV-1", 1000, day(1)).await;

    let rematched = engine.rematch_pending("treasurer").await.unwrap();
    assert_eq!(rematched.candidates, 1);
    assert_eq!(rematched.reparsed, 0);
    assert_eq!(rematched.auto_assigned, 1);
    assert_eq!(rematched.invoices_paid, 1);

    let tx = record(&engine, tx_id).await;
    assert_eq!(tx.member_id, Some(member));
    assert_eq!(tx.assignment_status, AssignmentStatus::AutoAssigned);
    assert_eq!(invoice(&engine, inv).await.status, InvoiceStatus::Paid);

    let again = engine.rematch_pending("treasurer").await.unwrap();
    assert_eq!(again.candidates, 0);
    assert_eq!(audit_count(&engine, "transactions").await, 2);
}

#[tokio::test]
async fn rematch_reparses_stale_fields() {
    let (_dir, engine) = engine().await;
    let member = add_member(&engine, dickson()).await;

    // Stored by an older parser that extracted nothing.
    let tx_id = {
        let mut conn = engine.pool().acquire().await.unwrap();
        let statement = insert_statement(&mut conn, "legacy.csv", None).await.unwrap();
        let stale = TransactionRecord::new(
            Some(statement),
            day(20),
            RawNarration::new(DICKSON, Channel::StatementLine),
            kes(700),
            Money::zero(),
            ParsedFields::new(TransactionOrigin::Generic),
        );
        insert_transaction(&mut conn, &stale).await.unwrap()
    };

    let rematched = engine.rematch_pending("treasurer").await.unwrap();
    assert_eq!(rematched.reparsed, 1);
    assert_eq!(rematched.auto_assigned, 1);

    let tx = record(&engine, tx_id).await;
    assert!(tx.parsed.full_phones().any(|p| p == "254721404848"));
    assert_eq!(tx.member_id, Some(member));
}

#[tokio::test]
async fn rematch_without_new_evidence_writes_nothing() {
    let (_dir, engine) = engine().await;
    let rows = vec![StatementRow::credit(day(25), DICKSON, kes(1000))];
    let report = engine.ingest_statement("dec.csv", None, &rows).await.unwrap();
    let tx_id = statement_records(&engine, report.statement_id).await[0].id.unwrap();
    let subject = format!("transaction:{tx_id}");
    let before = audit_count(&engine, &subject).await;

    let rematched = engine.rematch_pending("treasurer").await.unwrap();
    assert_eq!(rematched.candidates, 1);
    assert_eq!(rematched.unchanged, 1);
    assert_eq!(rematched.unassigned, 0);
    assert_eq!(audit_count(&engine, &subject).await, before);
    assert_eq!(record(&engine, tx_id).await.assignment_status, AssignmentStatus::Unassigned);
}

// ── Allocation under concurrency ─────────────────────────────────────────────

#[tokio::test]
async fn concurrent_credits_never_double_allocate() {
    let (_dir, engine) = engine().await;
    let member = add_member(&engine, dickson()).await;
    let invoices = [
        add_invoice(&engine, member, "INV-1", 1000, day(1)).await,
        add_invoice(&engine, member, "INV-2", 1000, day(2)).await,
        add_invoice(&engine, member, "INV-3", 500, day(3)).await,
    ];

    let engine = Arc::new(engine);
    let mut handles = Vec::new();
    for (n, reference) in [1, 2, 2, 3].into_iter().enumerate() {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let amount = if n == 3 { kes(300) } else { kes(1000) };
            engine
                .allocate_credit(member, amount, AllocationRef::Contribution(reference), "treasurer")
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut paid = Money::zero();
    for id in invoices {
        let inv = invoice(&engine, id).await;
        if inv.status == InvoiceStatus::Paid {
            paid += inv.amount;
        }
    }
    // Distinct credits: 1000 + 1000 + 300; the repeated reference adds nothing.
    assert_eq!(paid, kes(2000));
    assert_eq!(invoice(&engine, invoices[2]).await.status, InvoiceStatus::Pending);
}

// ── Operator actions ─────────────────────────────────────────────────────────

#[tokio::test]
async fn manual_reassignment_moves_the_allocation() {
    let (_dir, engine) = engine().await;
    let joyce = add_member(&engine, Member::new(0, "Joyce Njagi").with_phone("254722000176")).await;
    let peter = add_member(&engine, Member::new(0, "Peter Kamau").with_phone("254733111176")).await;
    let joyce_inv = add_invoice(&engine, joyce, "INV-J", 500, day(1)).await;
    let peter_inv = add_invoice(&engine, peter, "INV-P", 500, day(1)).await;

    let report = engine
        .ingest_statement("paybill.csv", None, &[StatementRow::credit(day(25), JOYCE, kes(500))])
        .await
        .unwrap();
    let tx_id = statement_records(&engine, report.statement_id).await[0].id.unwrap();

    let first = engine.assign_manually(tx_id, joyce, "treasurer").await.unwrap();
    assert_eq!(first.previous, None);
    assert_eq!(invoice(&engine, joyce_inv).await.status, InvoiceStatus::Paid);
    let stored = record(&engine, tx_id).await;
    assert_eq!(stored.assignment_status, AssignmentStatus::ManualAssigned);
    assert_eq!(stored.match_confidence, Some(1.0));

    let second = engine.assign_manually(tx_id, peter, "treasurer").await.unwrap();
    assert_eq!(second.reason, format!("Reassigned from member {joyce} to member {peter}"));
    assert_eq!(second.invoices_unwound, 1);
    assert_eq!(invoice(&engine, joyce_inv).await.status, InvoiceStatus::Pending);
    assert_eq!(invoice(&engine, peter_inv).await.status, InvoiceStatus::Paid);

    let mut conn = engine.pool().acquire().await.unwrap();
    let logs = get_match_logs(&mut conn, tx_id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.source == MatchSource::Manual && l.confidence == 1.0));
    assert_eq!(logs[1].actor, "treasurer");
    drop(conn);

    // Draft decision, then two manual assignments.
    assert_eq!(audit_count(&engine, &format!("transaction:{tx_id}")).await, 3);
}

#[tokio::test]
async fn archived_records_reject_manual_assignment() {
    let (_dir, engine) = engine().await;
    let member = add_member(&engine, dickson()).await;
    let inv = add_invoice(&engine, member, "INV-1", 1000, day(1)).await;
    let report = engine
        .ingest_statement("dec.csv", None, &[StatementRow::credit(day(25), DICKSON, kes(1000))])
        .await
        .unwrap();
    let tx_id = statement_records(&engine, report.statement_id).await[0].id.unwrap();
    assert_eq!(invoice(&engine, inv).await.status, InvoiceStatus::Paid);

    assert_eq!(engine.archive_transaction(tx_id, "treasurer").await.unwrap(), 1);
    assert_eq!(invoice(&engine, inv).await.status, InvoiceStatus::Pending);
    let archived = record(&engine, tx_id).await;
    assert!(archived.archived);
    assert_eq!(archived.member_id, None);

    let err = engine.assign_manually(tx_id, member, "treasurer").await.unwrap_err();
    assert!(matches!(err, ReconcileError::Domain(DomainError::ArchivedTransaction(id)) if id == tx_id));
}

#[tokio::test]
async fn deleting_a_statement_unwinds_its_invoices() {
    let (_dir, engine) = engine().await;
    let member = add_member(&engine, dickson()).await;
    let inv = add_invoice(&engine, member, "INV-1", 1000, day(1)).await;
    let rows = vec![StatementRow::credit(day(25), DICKSON, kes(1000))];
    let report = engine.ingest_statement("dec.csv", None, &rows).await.unwrap();
    engine.ingest_statement("dec-again.csv", None, &rows).await.unwrap();
    assert_eq!(invoice(&engine, inv).await.status, InvoiceStatus::Paid);

    let deleted = engine.delete_statement(report.statement_id, "treasurer").await.unwrap();
    assert_eq!(deleted.transactions, 1);
    assert_eq!(deleted.invoices_unwound, 1);
    assert_eq!(deleted.duplicates_orphaned, 1);

    let restored = invoice(&engine, inv).await;
    assert_eq!(restored.status, InvoiceStatus::Pending);
    assert!(restored.paid_reference.is_none());
    assert!(statement_records(&engine, report.statement_id).await.is_empty());

    // The second upload's rejection survives without its original.
    let mut conn = engine.pool().acquire().await.unwrap();
    let duplicates = get_duplicates(&mut conn).await.unwrap();
    drop(conn);
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].original_transaction_id, None);
    assert_eq!(duplicates[0].snapshot.credit, kes(1000));
    assert_eq!(engine.review_queue().await.unwrap().duplicates.len(), 1);

    let missing = engine.delete_statement(report.statement_id, "treasurer").await.unwrap_err();
    assert!(matches!(missing, ReconcileError::StatementNotFound(_)));
}
