use chrono::{DateTime, NaiveDate, Utc};
use kitty_core::{
    AssignmentStatus, Channel, DuplicateEntry, DuplicateSnapshot, MatchLog, MemberId, Money,
    ParsedFields, RawNarration, TransactionRecord,
};
use sqlx::SqliteConnection;

use crate::db::decode_err;

// ── Statements ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StatementRecord {
    pub id: i64,
    pub name: String,
    pub source: Option<String>,
    pub uploaded_at: String,
}

pub async fn insert_statement(
    conn: &mut SqliteConnection,
    name: &str,
    source: Option<&str>,
) -> Result<i64, sqlx::Error> {
    let id = sqlx::query("INSERT INTO statements (name, source) VALUES (?, ?)")
        .bind(name)
        .bind(source)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    Ok(id)
}

pub async fn get_statements(conn: &mut SqliteConnection) -> Result<Vec<StatementRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, String, Option<String>, String)>(
        "SELECT id, name, source, uploaded_at FROM statements ORDER BY id",
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| StatementRecord { id: r.0, name: r.1, source: r.2, uploaded_at: r.3 })
        .collect())
}

/// Removes the statement row; its transactions, duplicate entries and their
/// match logs go with it through the foreign-key cascade. Entries other
/// statements wrote against its records keep their snapshot and lose the
/// original link.
pub async fn delete_statement_row(conn: &mut SqliteConnection, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM statements WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Duplicate entries from other uploads whose retained original belongs to
/// `statement_id`.
pub async fn count_dependent_duplicates(
    conn: &mut SqliteConnection,
    statement_id: i64,
) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM statement_duplicates d \
         JOIN transactions t ON t.id = d.original_transaction_id \
         WHERE t.statement_id = ? AND d.source_statement_id IS NOT ?",
    )
    .bind(statement_id)
    .bind(statement_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

// ── Transactions ─────────────────────────────────────────────────────────────

type TransactionRow = (
    i64,
    Option<i64>,
    NaiveDate,
    i64,
    i64,
    String,
    String,
    Option<String>,
    String,
    Option<i64>,
    String,
    Option<f32>,
    Option<String>,
    bool,
);

const TRANSACTION_COLUMNS: &str = "id, statement_id, date, credit_cents, debit_cents, narration, channel, \
     receipt_code, parsed_json, member_id, assignment_status, match_confidence, match_reason, archived";

fn transaction_from_row(r: TransactionRow) -> Result<TransactionRecord, sqlx::Error> {
    let channel: Channel = r.6.parse().map_err(decode_err)?;
    let parsed: ParsedFields = serde_json::from_str(&r.8).map_err(decode_err)?;
    let assignment_status: AssignmentStatus = r.10.parse().map_err(decode_err)?;

    Ok(TransactionRecord {
        id: Some(r.0),
        statement_id: r.1,
        date: r.2,
        credit: Money::from_cents(r.3),
        debit: Money::from_cents(r.4),
        narration: RawNarration::new(r.5, channel),
        receipt_code: r.7,
        parsed,
        member_id: r.9.map(MemberId),
        assignment_status,
        match_confidence: r.11,
        match_reason: r.12,
        archived: r.13,
    })
}

fn transactions_from_rows(rows: Vec<TransactionRow>) -> Result<Vec<TransactionRecord>, sqlx::Error> {
    rows.into_iter().map(transaction_from_row).collect()
}

pub async fn insert_transaction(
    conn: &mut SqliteConnection,
    record: &TransactionRecord,
) -> Result<i64, sqlx::Error> {
    let parsed = serde_json::to_string(&record.parsed).map_err(decode_err)?;
    let id = sqlx::query(
        "INSERT INTO transactions (statement_id, date, credit_cents, debit_cents, narration, channel, receipt_code, \
         fingerprint, origin, parsed_json, member_id, assignment_status, match_confidence, match_reason, archived) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.statement_id)
    .bind(record.date)
    .bind(record.credit.to_cents())
    .bind(record.debit.to_cents())
    .bind(record.narration.text())
    .bind(record.narration.channel().to_string())
    .bind(&record.receipt_code)
    .bind(record.fingerprint())
    .bind(record.parsed.origin.as_str())
    .bind(parsed)
    .bind(record.member_id.map(|m| m.0))
    .bind(record.assignment_status.to_string())
    .bind(record.match_confidence)
    .bind(&record.match_reason)
    .bind(record.archived)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn get_transaction(conn: &mut SqliteConnection, id: i64) -> Result<Option<TransactionRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(transaction_from_row).transpose()
}

/// Stored rows that share the receipt code or the composite fingerprint.
pub async fn find_identity_matches(
    conn: &mut SqliteConnection,
    fingerprint: &str,
    receipt_code: Option<&str>,
) -> Result<Vec<TransactionRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions \
         WHERE fingerprint = ? OR (? IS NOT NULL AND receipt_code = ? COLLATE NOCASE) ORDER BY id"
    ))
    .bind(fingerprint)
    .bind(receipt_code)
    .bind(receipt_code)
    .fetch_all(&mut *conn)
    .await?;

    transactions_from_rows(rows)
}

pub async fn get_transactions_for_statement(
    conn: &mut SqliteConnection,
    statement_id: i64,
) -> Result<Vec<TransactionRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE statement_id = ? ORDER BY id"
    ))
    .bind(statement_id)
    .fetch_all(&mut *conn)
    .await?;

    transactions_from_rows(rows)
}

/// Live transactions with the given credit dated inside `[start, end]`.
pub async fn find_credits_between(
    conn: &mut SqliteConnection,
    credit: Money,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<TransactionRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions \
         WHERE archived = 0 AND credit_cents = ? AND date BETWEEN ? AND ? ORDER BY date, id"
    ))
    .bind(credit.to_cents())
    .bind(start)
    .bind(end)
    .fetch_all(&mut *conn)
    .await?;

    transactions_from_rows(rows)
}

pub async fn get_review_transactions(conn: &mut SqliteConnection) -> Result<Vec<TransactionRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions \
         WHERE archived = 0 AND assignment_status IN ('unassigned', 'draft') ORDER BY date, id"
    ))
    .fetch_all(&mut *conn)
    .await?;

    transactions_from_rows(rows)
}

pub async fn update_transaction_assignment(
    conn: &mut SqliteConnection,
    id: i64,
    member_id: Option<MemberId>,
    status: AssignmentStatus,
    confidence: Option<f32>,
    reason: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE transactions SET member_id = ?, assignment_status = ?, match_confidence = ?, match_reason = ? \
         WHERE id = ?",
    )
    .bind(member_id.map(|m| m.0))
    .bind(status.to_string())
    .bind(confidence)
    .bind(reason)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Stores freshly parsed fields; assignment columns are left alone.
pub async fn update_transaction_parsed(
    conn: &mut SqliteConnection,
    id: i64,
    parsed: &ParsedFields,
) -> Result<bool, sqlx::Error> {
    let parsed_json = serde_json::to_string(parsed).map_err(decode_err)?;
    let result = sqlx::query("UPDATE transactions SET origin = ?, parsed_json = ? WHERE id = ?")
        .bind(parsed.origin.as_str())
        .bind(parsed_json)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Soft archive: the row stays for audit but drops out of matching.
pub async fn archive_transaction_row(conn: &mut SqliteConnection, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE transactions SET archived = 1, member_id = NULL, assignment_status = 'unassigned', \
         match_confidence = NULL WHERE id = ? AND archived = 0",
    )
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Sum of live credits; each retained transaction counts once.
pub async fn total_credited(conn: &mut SqliteConnection) -> Result<Money, sqlx::Error> {
    let (cents,): (i64,) =
        sqlx::query_as("SELECT COALESCE(SUM(credit_cents), 0) FROM transactions WHERE archived = 0")
            .fetch_one(&mut *conn)
            .await?;

    Ok(Money::from_cents(cents))
}

// ── Duplicate ledger ─────────────────────────────────────────────────────────

pub async fn insert_duplicate(conn: &mut SqliteConnection, entry: &DuplicateEntry) -> Result<i64, sqlx::Error> {
    let snapshot = serde_json::to_string(&entry.snapshot).map_err(decode_err)?;
    let id = sqlx::query(
        "INSERT INTO statement_duplicates (source_statement_id, original_transaction_id, reason, snapshot_json, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(entry.source_statement_id)
    .bind(entry.original_transaction_id)
    .bind(entry.reason.to_string())
    .bind(snapshot)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn get_duplicates(conn: &mut SqliteConnection) -> Result<Vec<DuplicateEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, Option<i64>, Option<i64>, String, String, DateTime<Utc>)>(
        "SELECT id, source_statement_id, original_transaction_id, reason, snapshot_json, created_at \
         FROM statement_duplicates ORDER BY id",
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|r| {
            let snapshot: DuplicateSnapshot = serde_json::from_str(&r.4).map_err(decode_err)?;
            Ok(DuplicateEntry {
                id: Some(r.0),
                source_statement_id: r.1,
                original_transaction_id: r.2,
                reason: r.3.parse().map_err(decode_err)?,
                snapshot,
                created_at: r.5,
            })
        })
        .collect()
}

// ── Match logs ───────────────────────────────────────────────────────────────

pub async fn insert_match_log(conn: &mut SqliteConnection, log: &MatchLog) -> Result<i64, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO match_logs (transaction_id, member_id, confidence, reason, source, actor, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(log.transaction_id)
    .bind(log.member_id.map(|m| m.0))
    .bind(log.confidence)
    .bind(&log.reason)
    .bind(log.source.to_string())
    .bind(&log.actor)
    .bind(log.created_at)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn get_match_logs(conn: &mut SqliteConnection, transaction_id: i64) -> Result<Vec<MatchLog>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, i64, Option<i64>, f32, String, String, String, DateTime<Utc>)>(
        "SELECT id, transaction_id, member_id, confidence, reason, source, actor, created_at \
         FROM match_logs WHERE transaction_id = ? ORDER BY id",
    )
    .bind(transaction_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(MatchLog {
                id: Some(r.0),
                transaction_id: r.1,
                member_id: r.2.map(MemberId),
                confidence: r.3,
                reason: r.4,
                source: r.5.parse().map_err(decode_err)?,
                actor: r.6,
                created_at: r.7,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_db;
    use kitty_core::{DuplicateReason, PhoneToken, TransactionOrigin};

    fn record(statement: i64, text: &str, cents: i64) -> TransactionRecord {
        let mut parsed = ParsedFields::new(TransactionOrigin::Paybill);
        parsed.push_phone(PhoneToken::masked("25472", "176"));
        parsed.candidate_name = Some("Joyce Njagi".into());
        TransactionRecord::new(
            Some(statement),
            NaiveDate::from_ymd_opt(2024, 12, 25).unwrap(),
            RawNarration::new(text, Channel::StatementLine),
            Money::from_cents(cents),
            Money::zero(),
            parsed,
        )
    }

    #[tokio::test]
    async fn transaction_roundtrip_and_identity_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("kitty.db")).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let statement = insert_statement(&mut conn, "December", Some("dec.csv")).await.unwrap();
        let rec = record(statement, "Pay Bill from 25472****176 - JOYCE NJAGI Acc. Joyce Njagi", 100_000)
            .with_receipt_code(Some("TKL9X2ABCD".into()));
        let id = insert_transaction(&mut conn, &rec).await.unwrap();

        let stored = get_transaction(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(stored.parsed, rec.parsed);
        assert_eq!(stored.credit, rec.credit);
        assert_eq!(stored.assignment_status, AssignmentStatus::Unassigned);

        let by_receipt = find_identity_matches(&mut conn, "nope", Some("tkl9x2abcd")).await.unwrap();
        assert_eq!(by_receipt.len(), 1);
        let by_print = find_identity_matches(&mut conn, &rec.fingerprint(), None).await.unwrap();
        assert_eq!(by_print[0].id, Some(id));
        assert!(find_identity_matches(&mut conn, "nope", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn statement_delete_keeps_other_uploads_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("kitty.db")).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let first = insert_statement(&mut conn, "Nov", None).await.unwrap();
        let second = insert_statement(&mut conn, "Dec", None).await.unwrap();
        let rec = record(first, "APP/JOHN DOE/", 5_000);
        let original = insert_transaction(&mut conn, &rec).await.unwrap();
        insert_match_log(&mut conn, &MatchLog::auto(original, None, 0.0, "no candidate member").unwrap())
            .await
            .unwrap();
        insert_duplicate(
            &mut conn,
            &DuplicateEntry {
                id: None,
                source_statement_id: Some(second),
                original_transaction_id: Some(original),
                reason: DuplicateReason::CrossStatement,
                snapshot: DuplicateSnapshot {
                    date: rec.date,
                    credit: rec.credit,
                    debit: rec.debit,
                    transaction_code: None,
                    narration: rec.narration.text().to_string(),
                },
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();
        assert_eq!(get_duplicates(&mut conn).await.unwrap()[0].reason, DuplicateReason::CrossStatement);
        assert_eq!(count_dependent_duplicates(&mut conn, first).await.unwrap(), 1);
        assert_eq!(count_dependent_duplicates(&mut conn, second).await.unwrap(), 0);

        assert!(delete_statement_row(&mut conn, first).await.unwrap());
        assert!(get_transaction(&mut conn, original).await.unwrap().is_none());
        assert!(get_match_logs(&mut conn, original).await.unwrap().is_empty());

        let kept = get_duplicates(&mut conn).await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].original_transaction_id, None);
        assert_eq!(kept[0].snapshot.credit, Money::from_cents(5_000));

        assert!(delete_statement_row(&mut conn, second).await.unwrap());
        assert!(get_duplicates(&mut conn).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn archive_hides_from_review_and_totals() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("kitty.db")).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let statement = insert_statement(&mut conn, "Dec", None).await.unwrap();
        let a = insert_transaction(&mut conn, &record(statement, "A", 1_000)).await.unwrap();
        insert_transaction(&mut conn, &record(statement, "B", 2_000)).await.unwrap();
        assert_eq!(total_credited(&mut conn).await.unwrap(), Money::from_cents(3_000));

        assert!(archive_transaction_row(&mut conn, a).await.unwrap());
        assert!(!archive_transaction_row(&mut conn, a).await.unwrap());
        assert_eq!(total_credited(&mut conn).await.unwrap(), Money::from_cents(2_000));
        assert_eq!(get_review_transactions(&mut conn).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reparse_replaces_fields_only() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("kitty.db")).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let statement = insert_statement(&mut conn, "Dec", None).await.unwrap();
        let id = insert_transaction(&mut conn, &record(statement, "MPS 254721404848", 1_000)).await.unwrap();
        update_transaction_assignment(&mut conn, id, None, AssignmentStatus::Draft, None, Some("tie within margin"))
            .await
            .unwrap();

        let mut fresh = ParsedFields::new(TransactionOrigin::MobileSwitch);
        fresh.push_phone(PhoneToken::full("254721404848"));
        assert!(update_transaction_parsed(&mut conn, id, &fresh).await.unwrap());

        let stored = get_transaction(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(stored.parsed, fresh);
        assert_eq!(stored.assignment_status, AssignmentStatus::Draft);
        assert_eq!(stored.match_reason.as_deref(), Some("tie within margin"));
        assert!(!update_transaction_parsed(&mut conn, id + 1, &fresh).await.unwrap());
    }
}
