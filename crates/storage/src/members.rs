use kitty_core::{Member, MemberId};
use sqlx::SqliteConnection;

type MemberRow = (i64, String, Option<String>, Option<String>, Option<String>, bool);

const MEMBER_COLUMNS: &str = "id, name, phone, member_code, member_number, is_active";

fn member_from_row(r: MemberRow) -> Member {
    Member {
        id: MemberId(r.0),
        name: r.1,
        phone: r.2,
        member_code: r.3,
        member_number: r.4,
        is_active: r.5,
    }
}

pub async fn insert_member(conn: &mut SqliteConnection, member: &Member) -> Result<MemberId, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO members (name, phone, member_code, member_number, is_active) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&member.name)
    .bind(&member.phone)
    .bind(&member.member_code)
    .bind(&member.member_number)
    .bind(member.is_active)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(MemberId(id))
}

pub async fn get_member(conn: &mut SqliteConnection, id: MemberId) -> Result<Option<Member>, sqlx::Error> {
    let row = sqlx::query_as::<_, MemberRow>(&format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(member_from_row))
}

pub async fn get_all_members(conn: &mut SqliteConnection) -> Result<Vec<Member>, sqlx::Error> {
    let rows = sqlx::query_as::<_, MemberRow>(&format!("SELECT {MEMBER_COLUMNS} FROM members ORDER BY id"))
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.into_iter().map(member_from_row).collect())
}

pub async fn get_active_members(conn: &mut SqliteConnection) -> Result<Vec<Member>, sqlx::Error> {
    let rows = sqlx::query_as::<_, MemberRow>(&format!(
        "SELECT {MEMBER_COLUMNS} FROM members WHERE is_active = 1 ORDER BY id"
    ))
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(member_from_row).collect())
}

pub async fn set_member_active(conn: &mut SqliteConnection, id: MemberId, active: bool) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE members SET is_active = ? WHERE id = ?")
        .bind(active)
        .bind(id.0)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}
