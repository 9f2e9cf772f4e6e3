use chrono::{DateTime, NaiveDate, Utc};
use kitty_core::{AllocationRef, Invoice, MemberId, Money};
use sqlx::SqliteConnection;

use crate::db::decode_err;

type InvoiceRow = (
    i64,
    i64,
    String,
    i64,
    String,
    NaiveDate,
    NaiveDate,
    Option<DateTime<Utc>>,
    Option<String>,
    String,
);

const INVOICE_COLUMNS: &str = "id, member_id, invoice_number, amount_cents, status, issue_date, due_date, \
     paid_at, paid_reference, metadata_json";

fn invoice_from_row(r: InvoiceRow) -> Result<Invoice, sqlx::Error> {
    Ok(Invoice {
        id: Some(r.0),
        member_id: MemberId(r.1),
        invoice_number: r.2,
        amount: Money::from_cents(r.3),
        status: r.4.parse().map_err(decode_err)?,
        issue_date: r.5,
        due_date: r.6,
        paid_at: r.7,
        paid_reference: r.8.map(|s| s.parse()).transpose().map_err(decode_err)?,
        metadata: serde_json::from_str(&r.9).map_err(decode_err)?,
    })
}

fn invoices_from_rows(rows: Vec<InvoiceRow>) -> Result<Vec<Invoice>, sqlx::Error> {
    rows.into_iter().map(invoice_from_row).collect()
}

pub async fn insert_invoice(conn: &mut SqliteConnection, invoice: &Invoice) -> Result<i64, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO invoices (member_id, invoice_number, amount_cents, status, issue_date, due_date, paid_at, \
         paid_reference, metadata_json) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(invoice.member_id.0)
    .bind(&invoice.invoice_number)
    .bind(invoice.amount.to_cents())
    .bind(invoice.status.to_string())
    .bind(invoice.issue_date)
    .bind(invoice.due_date)
    .bind(invoice.paid_at)
    .bind(invoice.paid_reference.map(|r| r.to_string()))
    .bind(invoice.metadata.to_string())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn get_invoice(conn: &mut SqliteConnection, id: i64) -> Result<Option<Invoice>, sqlx::Error> {
    let row = sqlx::query_as::<_, InvoiceRow>(&format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(invoice_from_row).transpose()
}

pub async fn get_member_invoices(conn: &mut SqliteConnection, member: MemberId) -> Result<Vec<Invoice>, sqlx::Error> {
    let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE member_id = ? ORDER BY due_date, issue_date, id"
    ))
    .bind(member.0)
    .fetch_all(&mut *conn)
    .await?;

    invoices_from_rows(rows)
}

/// Pending and overdue invoices, oldest obligation first.
pub async fn get_outstanding_invoices(
    conn: &mut SqliteConnection,
    member: MemberId,
) -> Result<Vec<Invoice>, sqlx::Error> {
    let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE member_id = ? AND status IN ('pending', 'overdue') \
         ORDER BY due_date, issue_date, id"
    ))
    .bind(member.0)
    .fetch_all(&mut *conn)
    .await?;

    invoices_from_rows(rows)
}

pub async fn find_invoices_by_reference(
    conn: &mut SqliteConnection,
    reference: AllocationRef,
) -> Result<Vec<Invoice>, sqlx::Error> {
    let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE paid_reference = ? ORDER BY due_date, issue_date, id"
    ))
    .bind(reference.to_string())
    .fetch_all(&mut *conn)
    .await?;

    invoices_from_rows(rows)
}

/// Flips an outstanding invoice to paid. Returns false if it was no longer
/// outstanding, so a stale plan can never pay twice.
pub async fn mark_invoice_paid(
    conn: &mut SqliteConnection,
    id: i64,
    reference: AllocationRef,
    paid_at: DateTime<Utc>,
    metadata: &serde_json::Value,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE invoices SET status = 'paid', paid_at = ?, paid_reference = ?, metadata_json = ? \
         WHERE id = ? AND status IN ('pending', 'overdue')",
    )
    .bind(paid_at)
    .bind(reference.to_string())
    .bind(metadata.to_string())
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Returns invoices paid from `reference` to pending.
pub async fn unwind_invoices(conn: &mut SqliteConnection, reference: AllocationRef) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE invoices SET status = 'pending', paid_at = NULL, paid_reference = NULL, \
         metadata_json = json_remove(metadata_json, '$.auto_matched', '$.paid_reference', '$.matched_at') \
         WHERE paid_reference = ?",
    )
    .bind(reference.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
