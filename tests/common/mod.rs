#![allow(dead_code)]

use tempfile::TempDir;
use userauth::HashParams;
use userauth::prelude::*;

/// Cheap Argon2 parameters so tests do not spend seconds hashing.
pub fn fast_hash() -> HashParams {
    HashParams {
        memory_kib: 256,
        iterations: 1,
        parallelism: 1,
    }
}

/// A fresh on-disk database; reconnect scenarios cannot use `sqlite::memory:`.
pub fn temp_database() -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let uri = format!("sqlite://{}", dir.path().join("auth.db").display());
    (dir, uri)
}

pub fn options(database: &str, user: &str, password: &str) -> ConnectOptions {
    ConnectOptions::new(database)
        .credentials(user, password)
        .hash_params(fast_hash())
}

pub async fn connect(database: &str, user: &str, password: &str) -> Result<AuthConnection> {
    AuthConnection::open(&options(database, user, password)).await
}

/// Create an auth-enabled database owned by `admin`/`admin`.
pub async fn setup() -> (TempDir, String, AuthConnection) {
    let (dir, uri) = temp_database();
    let conn = AuthConnection::open(&options(&uri, "admin", "admin").enable_auth(true))
        .await
        .unwrap();
    (dir, uri, conn)
}

/// `setup()` plus a normal user `user`/`user`, returning that user's connection.
pub async fn setup_with_user() -> (TempDir, String, AuthConnection) {
    let (dir, uri, mut admin) = setup().await;
    admin.add_user("user", "user", false).await.unwrap();
    admin.close().await.unwrap();
    let conn = connect(&uri, "user", "user").await.unwrap();
    (dir, uri, conn)
}
