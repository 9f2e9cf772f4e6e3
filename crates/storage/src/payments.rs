use chrono::{DateTime, Utc};
use kitty_core::{MemberId, Money, Payment, ReconciliationLog, ReconciliationStatus};
use sqlx::SqliteConnection;
use std::collections::HashSet;

use crate::db::decode_err;

type PaymentRow = (
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    Option<i64>,
    DateTime<Utc>,
    String,
    Option<DateTime<Utc>>,
    Option<String>,
);

const PAYMENT_COLUMNS: &str = "id, channel, provider_transaction_id, provider_reference, receipt_number, \
     amount_cents, member_id, created_at, reconciliation_status, reconciled_at, reconciled_by";

fn payment_from_row(r: PaymentRow) -> Result<Payment, sqlx::Error> {
    Ok(Payment {
        id: Some(r.0),
        channel: r.1.parse().map_err(decode_err)?,
        provider_transaction_id: r.2,
        provider_reference: r.3,
        receipt_number: r.4,
        amount: Money::from_cents(r.5),
        member_id: r.6.map(MemberId),
        created_at: r.7,
        reconciliation_status: r.8.parse().map_err(decode_err)?,
        reconciled_at: r.9,
        reconciled_by: r.10,
    })
}

pub async fn insert_payment(conn: &mut SqliteConnection, payment: &Payment) -> Result<i64, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO payments (channel, provider_transaction_id, provider_reference, receipt_number, amount_cents, \
         member_id, created_at, reconciliation_status, reconciled_at, reconciled_by) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(payment.channel.to_string())
    .bind(&payment.provider_transaction_id)
    .bind(&payment.provider_reference)
    .bind(&payment.receipt_number)
    .bind(payment.amount.to_cents())
    .bind(payment.member_id.map(|m| m.0))
    .bind(payment.created_at)
    .bind(payment.reconciliation_status.to_string())
    .bind(payment.reconciled_at)
    .bind(&payment.reconciled_by)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn get_payment(conn: &mut SqliteConnection, id: i64) -> Result<Option<Payment>, sqlx::Error> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(payment_from_row).transpose()
}

pub async fn get_payments_by_status(
    conn: &mut SqliteConnection,
    status: ReconciliationStatus,
) -> Result<Vec<Payment>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE reconciliation_status = ? ORDER BY created_at, id"
    ))
    .bind(status.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(payment_from_row).collect()
}

/// Other payments sharing any provider identifier with `payment`.
pub async fn find_payment_identity_matches(
    conn: &mut SqliteConnection,
    payment: &Payment,
) -> Result<Vec<Payment>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id IS NOT ? AND ( \
             (provider_transaction_id IS NOT NULL AND provider_transaction_id = ? COLLATE NOCASE) \
          OR (receipt_number IS NOT NULL AND receipt_number = ? COLLATE NOCASE) \
          OR (provider_reference IS NOT NULL AND provider_reference = ? COLLATE NOCASE)) \
         ORDER BY created_at, id"
    ))
    .bind(payment.id)
    .bind(&payment.provider_transaction_id)
    .bind(&payment.receipt_number)
    .bind(&payment.provider_reference)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(payment_from_row).collect()
}

pub async fn update_payment_status(
    conn: &mut SqliteConnection,
    id: i64,
    status: ReconciliationStatus,
    reconciled_by: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let reconciled_at = status.is_terminal().then(Utc::now);
    let result = sqlx::query(
        "UPDATE payments SET reconciliation_status = ?, reconciled_at = ?, reconciled_by = ? WHERE id = ?",
    )
    .bind(status.to_string())
    .bind(reconciled_at)
    .bind(reconciled_by)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ── Reconciliation logs ──────────────────────────────────────────────────────

pub async fn insert_reconciliation_log(
    conn: &mut SqliteConnection,
    log: &ReconciliationLog,
) -> Result<i64, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO reconciliation_logs (payment_id, transaction_id, status, notes, reconciled_by, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(log.payment_id)
    .bind(log.transaction_id)
    .bind(log.status.to_string())
    .bind(&log.notes)
    .bind(&log.reconciled_by)
    .bind(log.created_at)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn get_reconciliation_logs(
    conn: &mut SqliteConnection,
    payment_id: i64,
) -> Result<Vec<ReconciliationLog>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, i64, Option<i64>, String, String, Option<String>, DateTime<Utc>)>(
        "SELECT id, payment_id, transaction_id, status, notes, reconciled_by, created_at \
         FROM reconciliation_logs WHERE payment_id = ? ORDER BY id",
    )
    .bind(payment_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(ReconciliationLog {
                id: Some(r.0),
                payment_id: r.1,
                transaction_id: r.2,
                status: r.3.parse().map_err(decode_err)?,
                notes: r.4,
                reconciled_by: r.5,
                created_at: r.6,
            })
        })
        .collect()
}

pub async fn delete_reconciliation_logs(conn: &mut SqliteConnection, payment_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM reconciliation_logs WHERE payment_id = ?")
        .bind(payment_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Transactions already backing a matched payment other than `except_payment`.
pub async fn consumed_transaction_ids(
    conn: &mut SqliteConnection,
    except_payment: Option<i64>,
) -> Result<HashSet<i64>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64,)>(
        "SELECT DISTINCT transaction_id FROM reconciliation_logs \
         WHERE status = 'matched' AND transaction_id IS NOT NULL AND payment_id IS NOT ?",
    )
    .bind(except_payment)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}
