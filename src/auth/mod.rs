//! Authenticated connections.
//!
//! An [`AuthConnection`] wraps a single SQLite connection together with the
//! identity that logged in on it. The login gate runs when the connection is
//! opened and again on every [`AuthConnection::authenticate`]; the user
//! mutators check the bound identity's admin flag before touching the
//! credential store.

pub mod store;

use std::fmt;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Connection, SqliteConnection};

use crate::error::{AuthError, Result, STATUS_OK};
use crate::password::{self, HashParams};
use crate::session::{Identity, Session};
use crate::statement::{self, AuthCall, Value};

pub use store::{USER_TABLE, UserRecord};

/// Names a non-admin statement may not mention: the credential table, the
/// schema tables and pragmas through which it could be dropped or rewritten
/// without naming it.
const PROTECTED_NAMES: &[&str] = &[
    USER_TABLE,
    "sqlite_master",
    "sqlite_schema",
    "sqlite_temp_master",
    "sqlite_temp_schema",
    "sqlite_dbpage",
    "writable_schema",
    "schema_version",
];

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How to open an [`AuthConnection`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    database: String,
    credentials: Option<Credentials>,
    enable_auth: bool,
    create_if_missing: bool,
    hash: HashParams,
}

impl ConnectOptions {
    /// `database` is either a `sqlite:` URI or a plain file path.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            credentials: None,
            enable_auth: false,
            create_if_missing: true,
            hash: HashParams::default(),
        }
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Create the credential store, with the supplied credentials as its
    /// first admin, if the database does not have one yet.
    pub fn enable_auth(mut self, enable: bool) -> Self {
        self.enable_auth = enable;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn hash_params(mut self, params: HashParams) -> Self {
        self.hash = params;
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn sqlite_options(&self) -> Result<SqliteConnectOptions> {
        let options = if self.database.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(&self.database)?
        } else {
            SqliteConnectOptions::new().filename(&self.database)
        };
        Ok(options.create_if_missing(self.create_if_missing))
    }
}

/// A database connection bound to an authenticated user.
pub struct AuthConnection {
    conn: SqliteConnection,
    session: Session,
    hash: HashParams,
}

impl AuthConnection {
    /// Open a connection and run the login gate.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthorized`] if the database requires a login and
    /// the credentials are missing or wrong; the underlying connection is
    /// closed and no statement can be executed on it.
    pub async fn open(options: &ConnectOptions) -> Result<Self> {
        let mut conn = SqliteConnection::connect_with(&options.sqlite_options()?).await?;
        match login(&mut conn, options).await {
            Ok(session) => Ok(Self {
                conn,
                session,
                hash: options.hash,
            }),
            Err(e) => {
                if let Err(close_err) = conn.close().await {
                    tracing::debug!(error = %close_err, "Failed to close rejected connection");
                }
                Err(e)
            }
        }
    }

    /// The user bound to this connection, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.session.identity()
    }

    /// Re-run the login gate on this connection.
    ///
    /// A failure leaves the connection denied until the next successful call.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        if !store::exists(&mut self.conn).await? {
            return Ok(());
        }
        match verify(&mut self.conn, username, password, self.hash).await {
            Ok(identity) => {
                self.session.authenticate(identity);
                Ok(())
            }
            Err(AuthError::Unauthorized) => {
                self.session.deny();
                Err(AuthError::Unauthorized)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether the database has a credential store.
    pub async fn is_auth_enabled(&mut self) -> Result<bool> {
        self.session.require_login()?;
        store::exists(&mut self.conn).await
    }

    /// Add a user. Requires an admin, except for the very first user of a
    /// database without a credential store, who must be an admin and becomes
    /// the identity of this connection.
    pub async fn add_user(&mut self, username: &str, password: &str, is_admin: bool) -> Result<()> {
        self.gate().await?;

        if self.session.is_open() {
            validate_username(username)?;
            if !is_admin {
                return Err(AuthError::InvalidOperation(
                    "the first user must be an admin".into(),
                ));
            }
            let hash = password::hash_password(password, self.hash).await?;
            let mut tx = self.conn.begin().await?;
            store::create(&mut tx).await?;
            store::insert(&mut tx, username, &hash, true).await?;
            tx.commit().await?;
            self.session.authenticate(Identity {
                username: username.to_string(),
                is_admin: true,
            });
            tracing::info!(user = username, "Enabled authentication with first admin");
            return Ok(());
        }

        self.require_admin("add user")?;
        validate_username(username)?;
        let hash = password::hash_password(password, self.hash).await?;
        store::insert(&mut self.conn, username, &hash, is_admin).await?;
        tracing::info!(user = username, admin = is_admin, by = self.actor(), "Added user");
        Ok(())
    }

    /// Change a user's password and admin flag.
    ///
    /// Anyone may change their own password; changing someone else, or any
    /// admin flag, needs an admin.
    pub async fn change_user(&mut self, username: &str, password: &str, is_admin: bool) -> Result<()> {
        self.gate().await?;
        self.require_enabled()?;

        let caller_is_admin = self.session.require_admin().is_ok();
        if !caller_is_admin && (!self.session.is_current_user(username) || is_admin) {
            tracing::warn!(
                user = username,
                by = self.actor(),
                "Refused change of another user or of admin status"
            );
            return Err(AuthError::AdminRequired);
        }

        let hash = password::hash_password(password, self.hash).await?;
        let mut tx = self.conn.begin().await?;
        let Some(current) = store::find(&mut tx, username).await? else {
            return Err(AuthError::InvalidOperation(format!("no such user: {username}")));
        };
        if current.record.is_admin && !is_admin && store::admin_count(&mut tx).await? <= 1 {
            return Err(AuthError::InvalidOperation(
                "cannot demote the last admin".into(),
            ));
        }
        store::update(&mut tx, username, &hash, is_admin).await?;
        tx.commit().await?;

        if self.session.is_current_user(username) {
            self.session.set_admin(is_admin);
        }
        tracing::info!(user = username, admin = is_admin, by = self.actor(), "Changed user");
        Ok(())
    }

    /// Delete a user. Admin only; neither the connection's own user nor the
    /// last admin can be deleted.
    pub async fn delete_user(&mut self, username: &str) -> Result<()> {
        self.gate().await?;
        self.require_admin("delete user")?;
        self.require_enabled()?;

        if self.session.is_current_user(username) {
            return Err(AuthError::InvalidOperation(
                "cannot delete the current user".into(),
            ));
        }

        let mut tx = self.conn.begin().await?;
        let Some(current) = store::find(&mut tx, username).await? else {
            return Err(AuthError::InvalidOperation(format!("no such user: {username}")));
        };
        if current.record.is_admin && store::admin_count(&mut tx).await? <= 1 {
            return Err(AuthError::InvalidOperation(
                "cannot delete the last admin".into(),
            ));
        }
        store::remove(&mut tx, username).await?;
        tx.commit().await?;

        tracing::info!(user = username, by = self.actor(), "Deleted user");
        Ok(())
    }

    /// All users, ordered by name. Admin only.
    pub async fn users(&mut self) -> Result<Vec<UserRecord>> {
        self.gate().await?;
        self.require_admin("list users")?;
        if self.session.is_open() {
            return Ok(Vec::new());
        }
        store::list(&mut self.conn).await
    }

    /// Admin only.
    pub async fn user_exists(&mut self, username: &str) -> Result<bool> {
        self.gate().await?;
        self.require_admin("look up user")?;
        if self.session.is_open() {
            return Ok(false);
        }
        Ok(store::find(&mut self.conn, username).await?.is_some())
    }

    /// Execute a statement, returning the number of rows affected.
    ///
    /// Calls to the authentication functions are routed to the matching
    /// method and their errors returned as-is.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        if let Some(call) = statement::parse_call(sql, &[])? {
            self.dispatch(call).await?;
            return Ok(0);
        }
        self.gate().await?;
        self.guard(sql)?;
        let result = sqlx::query(sql).execute(&mut self.conn).await?;
        Ok(result.rows_affected())
    }

    /// Run a query and collect its rows.
    ///
    /// A call to one of the authentication functions yields a single row
    /// holding its result, with privilege failures reported as status codes.
    pub async fn fetch_all(&mut self, sql: &str) -> Result<Vec<SqliteRow>> {
        if let Some(call) = statement::parse_call(sql, &[])? {
            let result = self.status_of(call).await?;
            let rows = sqlx::query("SELECT ? AS result")
                .bind(result)
                .fetch_all(&mut self.conn)
                .await?;
            return Ok(rows);
        }
        self.gate().await?;
        self.guard(sql)?;
        Ok(sqlx::query(sql).fetch_all(&mut self.conn).await?)
    }

    /// Evaluate a call to one of the authentication functions, binding `?`
    /// placeholders from `params`.
    ///
    /// Returns the function's integer result: a SQLite status code for the
    /// user functions, 1 or 0 for `auth_enabled()`. Only database failures and
    /// malformed statements are returned as errors, except that
    /// `auth_enabled()` on a connection that is not logged in fails with
    /// [`AuthError::Unauthorized`] rather than returning a code.
    pub async fn call(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        let call = statement::parse_call(sql, params)?.ok_or_else(|| {
            AuthError::Statement("not a call to an authentication function".into())
        })?;
        self.status_of(call).await
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    async fn status_of(&mut self, call: AuthCall) -> Result<i64> {
        // auth_enabled() answers 0 or 1; a status code there would read as "enabled"
        let reports_status = !matches!(call, AuthCall::Enabled);
        match self.dispatch(call).await {
            Ok(result) => Ok(result),
            Err(e) if reports_status && e.is_refusal() => Ok(e.status_code()),
            Err(e) => Err(e),
        }
    }

    async fn dispatch(&mut self, call: AuthCall) -> Result<i64> {
        tracing::debug!(function = call.function_name(), "Routing authentication call");
        match call {
            AuthCall::Authenticate { username, password } => {
                self.authenticate(&username, &password).await?;
            }
            AuthCall::AddUser {
                username,
                password,
                is_admin,
            } => self.add_user(&username, &password, is_admin).await?,
            AuthCall::ChangeUser {
                username,
                password,
                is_admin,
            } => self.change_user(&username, &password, is_admin).await?,
            AuthCall::DeleteUser { username } => self.delete_user(&username).await?,
            AuthCall::Enabled => return Ok(i64::from(self.is_auth_enabled().await?)),
        }
        Ok(STATUS_OK)
    }

    /// Login gate for every statement.
    ///
    /// An open session is only valid while the database has no credential
    /// store; once another connection enables authentication it is denied.
    async fn gate(&mut self) -> Result<()> {
        self.session.require_login()?;
        if self.session.is_open() && store::exists(&mut self.conn).await? {
            tracing::info!("Authentication was enabled by another connection; login required");
            self.session.deny();
            return Err(AuthError::Unauthorized);
        }
        Ok(())
    }

    /// Direct access to the credential table, or to the schema it is
    /// recorded in, is admin only.
    fn guard(&self, sql: &str) -> Result<()> {
        if statement::references_any(sql, PROTECTED_NAMES) {
            self.require_admin("access credential table")?;
        }
        Ok(())
    }

    fn require_admin(&self, action: &'static str) -> Result<()> {
        self.session.require_admin().inspect_err(|_| {
            tracing::warn!(by = self.actor(), action, "Privilege check failed");
        })
    }

    fn require_enabled(&self) -> Result<()> {
        if self.session.is_open() {
            return Err(AuthError::InvalidOperation(
                "authentication is not enabled".into(),
            ));
        }
        Ok(())
    }

    fn actor(&self) -> &str {
        self.session
            .identity()
            .map_or("-", |identity| identity.username.as_str())
    }
}

async fn login(conn: &mut SqliteConnection, options: &ConnectOptions) -> Result<Session> {
    if store::exists(conn).await? {
        let Some(creds) = &options.credentials else {
            tracing::info!(database = options.database(), "Login refused: credentials required");
            return Err(AuthError::Unauthorized);
        };
        let identity = verify(conn, &creds.username, &creds.password, options.hash).await?;
        return Ok(Session::authenticated(identity));
    }

    if !options.enable_auth {
        if options.credentials.is_some() {
            tracing::debug!("Database has no credential store; ignoring credentials");
        }
        return Ok(Session::open());
    }

    let Some(creds) = &options.credentials else {
        tracing::info!("Cannot enable authentication without credentials");
        return Err(AuthError::Unauthorized);
    };
    validate_username(&creds.username)?;
    let hash = password::hash_password(&creds.password, options.hash).await?;
    let mut tx = conn.begin().await?;
    store::create(&mut tx).await?;
    store::insert(&mut tx, &creds.username, &hash, true).await?;
    tx.commit().await?;
    tracing::info!(
        database = options.database(),
        user = creds.username.as_str(),
        "Enabled authentication"
    );
    Ok(Session::authenticated(Identity {
        username: creds.username.clone(),
        is_admin: true,
    }))
}

/// Check `username`/`password` against the store. An unknown user costs one
/// hash with `params`, so it is rejected no faster than a wrong password.
async fn verify(
    conn: &mut SqliteConnection,
    username: &str,
    password: &str,
    params: HashParams,
) -> Result<Identity> {
    let Some(user) = store::find(conn, username).await? else {
        password::hash_and_discard(password, params).await;
        tracing::info!(user = username, "Authentication failed: unknown user");
        return Err(AuthError::Unauthorized);
    };
    if !password::verify_password(password, &user.pw_hash).await? {
        tracing::info!(user = username, "Authentication failed: wrong password");
        return Err(AuthError::Unauthorized);
    }
    tracing::info!(user = username, admin = user.record.is_admin, "Authenticated");
    Ok(Identity {
        username: user.record.username,
        is_admin: user.record.is_admin,
    })
}

fn validate_username(username: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(AuthError::InvalidOperation(
            "username must not be empty".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials::new("admin", "hunter2");
        let shown = format!("{creds:?}");
        assert!(shown.contains("admin"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn uri_and_path_databases_are_accepted() {
        assert!(ConnectOptions::new("sqlite::memory:").sqlite_options().is_ok());
        assert!(ConnectOptions::new("/tmp/some.db").sqlite_options().is_ok());
    }

    #[test]
    fn empty_usernames_are_rejected() {
        assert!(validate_username("  ").is_err());
        assert!(validate_username("admin").is_ok());
    }

    fn cheap() -> HashParams {
        HashParams {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_are_indistinguishable() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        store::create(&mut conn).await.unwrap();
        let hash = password::hash_password("right", cheap()).await.unwrap();
        store::insert(&mut conn, "alice", &hash, true).await.unwrap();

        let unknown = verify(&mut conn, "mallory", "right", cheap()).await.unwrap_err();
        let wrong = verify(&mut conn, "alice", "wrong", cheap()).await.unwrap_err();
        assert!(matches!(unknown, AuthError::Unauthorized));
        assert!(matches!(wrong, AuthError::Unauthorized));
        assert_eq!(unknown.client_message(), wrong.client_message());

        // an unusable cost setting must not turn into a distinguishable error
        let bad = HashParams {
            memory_kib: 0,
            ..cheap()
        };
        let err = verify(&mut conn, "mallory", "x", bad).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized));

        let alice = verify(&mut conn, "alice", "right", cheap()).await.unwrap();
        assert!(alice.is_admin);
    }

    #[tokio::test]
    async fn non_admin_guard_covers_schema_tables() {
        let session = Session::authenticated(Identity {
            username: "user".into(),
            is_admin: false,
        });
        let conn = AuthConnection {
            conn: SqliteConnection::connect("sqlite::memory:").await.unwrap(),
            session,
            hash: cheap(),
        };
        for sql in [
            "SELECT * FROM auth_user",
            "PRAGMA writable_schema = ON",
            "DELETE FROM sqlite_master WHERE tbl_name LIKE 'auth%'",
            "UPDATE sqlite_schema SET sql = ''",
            "PRAGMA schema_version = 1",
        ] {
            assert!(matches!(conn.guard(sql), Err(AuthError::AdminRequired)), "{sql}");
        }
        conn.guard("SELECT * FROM notes").unwrap();
    }

    #[tokio::test]
    async fn legacy_database_is_open_until_first_user() {
        let options = ConnectOptions::new("sqlite::memory:").hash_params(cheap());
        let mut conn = AuthConnection::open(&options).await.unwrap();
        assert!(conn.identity().is_none());
        assert!(!conn.is_auth_enabled().await.unwrap());

        let err = conn.add_user("bob", "pw", false).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOperation(_)));

        conn.add_user("root", "pw", true).await.unwrap();
        assert!(conn.is_auth_enabled().await.unwrap());
        assert_eq!(conn.identity().unwrap().username, "root");
    }
}
