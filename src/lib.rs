//! User authentication for embedded SQLite databases.
//!
//! A database becomes auth-enabled once it holds a credential table. From then
//! on every [`AuthConnection`] must log in when it is opened, and only admins
//! may add, change or delete other users.
//!
//! ```no_run
//! use userauth::{AuthConnection, ConnectOptions};
//!
//! # async fn demo() -> userauth::Result<()> {
//! let options = ConnectOptions::new("sqlite://app.db")
//!     .credentials("admin", "admin")
//!     .enable_auth(true);
//! let mut conn = AuthConnection::open(&options).await?;
//! conn.add_user("alice", "s3cret", false).await?;
//! assert_eq!(conn.call("SELECT auth_enabled()", &[]).await?, 1);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod password;
pub mod prelude;
pub mod session;
pub mod statement;

pub use auth::{AuthConnection, ConnectOptions, Credentials, USER_TABLE, UserRecord};
pub use error::{AuthError, Result};
pub use password::HashParams;
pub use session::Identity;
pub use statement::Value;
