use chrono::{DateTime, Utc};
use kitty_core::AuditEntry;
use sqlx::SqliteConnection;

use crate::db::decode_err;

pub async fn insert_audit(conn: &mut SqliteConnection, entry: &AuditEntry) -> Result<i64, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO audit_log (actor, action, subject, payload_json, timestamp) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&entry.actor)
    .bind(&entry.action)
    .bind(&entry.subject)
    .bind(entry.payload.to_string())
    .bind(entry.timestamp)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

/// Entries for one subject (e.g. `payment:3`), oldest first.
pub async fn get_audit_entries(conn: &mut SqliteConnection, subject: &str) -> Result<Vec<AuditEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, String, String, String, DateTime<Utc>)>(
        "SELECT actor, action, subject, payload_json, timestamp FROM audit_log WHERE subject = ? ORDER BY id",
    )
    .bind(subject)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(AuditEntry {
                actor: r.0,
                action: r.1,
                subject: r.2,
                payload: serde_json::from_str(&r.3).map_err(decode_err)?,
                timestamp: r.4,
            })
        })
        .collect()
}

pub async fn count_audit_entries(conn: &mut SqliteConnection, subject: &str) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_log WHERE subject = ?")
        .bind(subject)
        .fetch_one(&mut *conn)
        .await?;

    Ok(count)
}
