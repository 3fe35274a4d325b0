use regex::Regex;
use serde::Deserialize;

use crate::auth::ConnectOptions;
use crate::error::ConfigError;
use crate::password::HashParams;

fn default_database() -> String {
    "sqlite://userauth.db".into()
}

fn default_log_level() -> String {
    "info".into()
}

/// Replace every match of `re` with `resolve(capture 1)`.
fn substitute(
    text: &str,
    re: &Regex,
    resolve: impl Fn(&str) -> Result<String, ConfigError>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&resolve(name.as_str())?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Expand `$ENV{NAME}` and `$FILE{path}` so secrets can live outside the file.
fn expand_placeholders(text: &str) -> Result<String, ConfigError> {
    let env_re = Regex::new(r"\$ENV\{([^}]+)\}").map_err(|e| ConfigError::Invalid(e.to_string()))?;
    let file_re =
        Regex::new(r"\$FILE\{([^}]+)\}").map_err(|e| ConfigError::Invalid(e.to_string()))?;

    let text = substitute(text, &env_re, |name| {
        std::env::var(name)
            .map_err(|_| ConfigError::Invalid(format!("environment variable {name} is not set")))
    })?;
    substitute(&text, &file_re, |path| {
        std::fs::read_to_string(path)
            .map(|contents| contents.trim_end_matches(['\r', '\n']).to_string())
            .map_err(|_| ConfigError::FileNotFound(path.to_string()))
    })
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub enable_auth: bool,
    #[serde(default)]
    pub hash: HashParams,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database(),
            username: None,
            password: None,
            enable_auth: false,
            hash: HashParams::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, a placeholder cannot be
    /// resolved, or the result is not valid configuration.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound(path.to_string()))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let text = expand_placeholders(text)?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.is_none() && (self.password.is_some() || self.enable_auth) {
            return Err(ConfigError::MissingField("username"));
        }
        Ok(())
    }

    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        let options = ConnectOptions::new(self.database.as_str())
            .enable_auth(self.enable_auth)
            .hash_params(self.hash);
        match &self.username {
            Some(user) => options.credentials(user.as_str(), self.password.clone().unwrap_or_default()),
            None => options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_to_empty_file() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.database, "sqlite://userauth.db");
        assert!(cfg.username.is_none());
        assert!(!cfg.enable_auth);
        assert_eq!(cfg.hash, HashParams::default());
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.log.format, LogFormat::Pretty);
    }

    #[test]
    fn full_config_parses() {
        let cfg = Config::from_toml(
            r#"
            database = "sqlite:///var/lib/app/data.db"
            username = "admin"
            password = "admin"
            enable_auth = true

            [hash]
            memory_kib = 1024
            iterations = 3

            [log]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.database, "sqlite:///var/lib/app/data.db");
        assert_eq!(cfg.username.as_deref(), Some("admin"));
        assert!(cfg.enable_auth);
        assert_eq!(cfg.hash.memory_kib, 1024);
        assert_eq!(cfg.hash.iterations, 3);
        assert_eq!(cfg.hash.parallelism, HashParams::default().parallelism);
        assert_eq!(cfg.log.format, LogFormat::Json);
        assert_eq!(cfg.connect_options().database(), "sqlite:///var/lib/app/data.db");
    }

    #[test]
    fn env_placeholder_expands() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("USERAUTH_TEST_CONFIG_PASSWORD", "from-env") };
        let cfg = Config::from_toml(
            "username = \"admin\"\npassword = \"$ENV{USERAUTH_TEST_CONFIG_PASSWORD}\"",
        )
        .unwrap();
        assert_eq!(cfg.password.as_deref(), Some("from-env"));
    }

    #[test]
    fn missing_env_placeholder_is_an_error() {
        let err = Config::from_toml("password = \"$ENV{USERAUTH_TEST_UNSET_VARIABLE}\"")
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn file_placeholder_reads_secret() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "from-file").unwrap();
        let text = format!(
            "username = \"admin\"\npassword = \"$FILE{{{}}}\"",
            file.path().display()
        );
        let cfg = Config::from_toml(&text).unwrap();
        assert_eq!(cfg.password.as_deref(), Some("from-file"));
    }

    #[test]
    fn password_without_username_is_rejected() {
        let err = Config::from_toml("password = \"x\"").err().unwrap();
        assert!(matches!(err, ConfigError::MissingField("username")));
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(Config::from_toml("[log]\nformat = \"xml\"").is_err());
    }
}
