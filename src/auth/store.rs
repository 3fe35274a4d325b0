//! Credential store: the `auth_user` table and the queries against it.
//!
//! Callers are responsible for privilege checks; everything here runs on
//! whatever connection or transaction it is handed.

use serde::Serialize;
use sqlx::{Row, SqliteConnection};

use crate::error::{AuthError, Result};

/// Name of the table holding user credentials.
pub const USER_TABLE: &str = "auth_user";

const USERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS auth_user (
        uname TEXT PRIMARY KEY NOT NULL,
        pw_hash TEXT NOT NULL,
        is_admin INTEGER NOT NULL DEFAULT 0 CHECK (is_admin IN (0, 1))
    )";

/// Public view of a user; the password hash never leaves this module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub username: String,
    pub is_admin: bool,
}

pub(crate) struct StoredUser {
    pub record: UserRecord,
    pub pw_hash: String,
}

/// Whether the credential table exists, i.e. whether the database is auth-enabled.
pub(crate) async fn exists(conn: &mut SqliteConnection) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(USER_TABLE)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

pub(crate) async fn create(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(USERS_TABLE).execute(&mut *conn).await?;
    tracing::debug!(table = USER_TABLE, "Created credential table");
    Ok(())
}

pub(crate) async fn find(conn: &mut SqliteConnection, username: &str) -> Result<Option<StoredUser>> {
    let row = sqlx::query("SELECT uname, pw_hash, is_admin FROM auth_user WHERE uname = ?")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => Ok(Some(StoredUser {
            record: UserRecord {
                username: row.try_get("uname")?,
                is_admin: row.try_get("is_admin")?,
            },
            pw_hash: row.try_get("pw_hash")?,
        })),
        None => Ok(None),
    }
}

/// Insert a new user; a duplicate name is a [`AuthError::Conflict`].
pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    username: &str,
    pw_hash: &str,
    is_admin: bool,
) -> Result<()> {
    sqlx::query("INSERT INTO auth_user (uname, pw_hash, is_admin) VALUES (?, ?, ?)")
        .bind(username)
        .bind(pw_hash)
        .bind(is_admin)
        .execute(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AuthError::Conflict(username.to_string())
            }
            other => AuthError::Database(other),
        })?;
    Ok(())
}

pub(crate) async fn update(
    conn: &mut SqliteConnection,
    username: &str,
    pw_hash: &str,
    is_admin: bool,
) -> Result<()> {
    sqlx::query("UPDATE auth_user SET pw_hash = ?, is_admin = ? WHERE uname = ?")
        .bind(pw_hash)
        .bind(is_admin)
        .bind(username)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn remove(conn: &mut SqliteConnection, username: &str) -> Result<()> {
    sqlx::query("DELETE FROM auth_user WHERE uname = ?")
        .bind(username)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn admin_count(conn: &mut SqliteConnection) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) FROM auth_user WHERE is_admin = 1")
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get(0)?)
}

pub(crate) async fn list(conn: &mut SqliteConnection) -> Result<Vec<UserRecord>> {
    let rows = sqlx::query("SELECT uname, is_admin FROM auth_user ORDER BY uname")
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter()
        .map(|row| -> Result<UserRecord> {
            Ok(UserRecord {
                username: row.try_get("uname")?,
                is_admin: row.try_get("is_admin")?,
            })
        })
        .collect()
}
