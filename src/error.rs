//! Error types for the authentication layer
//!
//! Each error carries a SQLite-style result code so the statement surface can
//! report failures the same way the engine reports its own.

use thiserror::Error;

/// `SQLITE_OK`
pub const STATUS_OK: i64 = 0;
/// `SQLITE_ERROR`
pub const STATUS_ERROR: i64 = 1;
/// `SQLITE_CONSTRAINT`
pub const STATUS_CONSTRAINT: i64 = 19;
/// `SQLITE_MISUSE`
pub const STATUS_MISUSE: i64 = 21;
/// `SQLITE_AUTH`
pub const STATUS_AUTH: i64 = 23;

pub type Result<T, E = AuthError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Bad or missing credentials, or a connection left denied by a failed login.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Admin privileges required")]
    AdminRequired,

    #[error("User already exists: {0}")]
    Conflict(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid statement: {0}")]
    Statement(String),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

impl AuthError {
    /// SQLite result code for this error.
    pub fn status_code(&self) -> i64 {
        match self {
            AuthError::Unauthorized | AuthError::AdminRequired => STATUS_AUTH,
            AuthError::Conflict(_) => STATUS_CONSTRAINT,
            AuthError::InvalidOperation(_) | AuthError::Statement(_) => STATUS_MISUSE,
            AuthError::PasswordHash(_) | AuthError::Database(_) => STATUS_ERROR,
        }
    }

    /// Whether the authentication layer refused the operation, as opposed to
    /// the engine failing or the statement being malformed.
    pub fn is_refusal(&self) -> bool {
        !matches!(
            self,
            AuthError::Database(_) | AuthError::PasswordHash(_) | AuthError::Statement(_)
        )
    }

    /// Client-safe message that never names the user or the failing check.
    pub fn client_message(&self) -> &'static str {
        match self {
            AuthError::Unauthorized => "authentication failed",
            AuthError::AdminRequired => "insufficient privileges",
            AuthError::Conflict(_) => "user already exists",
            AuthError::InvalidOperation(_) => "operation not permitted",
            AuthError::Statement(_) => "malformed statement",
            AuthError::PasswordHash(_) | AuthError::Database(_) => "database error",
        }
    }
}
