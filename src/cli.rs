use clap::{Parser, Subcommand};

use userauth::config::Config;

#[derive(Parser, Debug)]
#[command(name = "userauth", version, about = "Manage users of an authentication-enabled SQLite database")]
pub struct Cli {
    /// TOML configuration file; flags below override its values.
    #[arg(short, long, env = "USERAUTH_CONFIG")]
    pub config: Option<String>,

    /// Database to open, as a `sqlite:` URI or a file path.
    #[arg(short, long, env = "USERAUTH_DATABASE")]
    pub database: Option<String>,

    /// User to log in as.
    #[arg(short, long, env = "USERAUTH_USER")]
    pub user: Option<String>,

    #[arg(short, long, env = "USERAUTH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an auth-enabled database with the login user as its first admin.
    Init,
    /// Log in and report the bound identity.
    Check,
    AddUser {
        username: String,
        password: String,
        #[arg(long)]
        admin: bool,
    },
    /// Change a user's password and admin flag.
    ChangeUser {
        username: String,
        password: String,
        #[arg(long)]
        admin: bool,
    },
    DeleteUser {
        username: String,
    },
    ListUsers {
        /// Print as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Execute a statement, including calls such as `SELECT auth_user_add(...)`.
    /// Queries print one JSON object per row; other statements print the
    /// number of rows affected.
    Exec {
        sql: String,
    },
}

impl Cli {
    /// Configuration from `--config` (or defaults) with flags applied on top.
    pub fn load_config(&self) -> Result<Config, userauth::error::ConfigError> {
        let mut cfg = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(database) = &self.database {
            cfg.database = database.clone();
        }
        if let Some(user) = &self.user {
            cfg.username = Some(user.clone());
        }
        if let Some(password) = &self.password {
            cfg.password = Some(password.clone());
        }
        if matches!(self.command, Command::Init) {
            cfg.enable_auth = true;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}
