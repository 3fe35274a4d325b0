mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value as Json;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing_subscriber::EnvFilter;

use userauth::AuthConnection;
use userauth::config::{Config, LogFormat};
use userauth::statement::returns_rows;

use crate::cli::{Cli, Command};

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match cfg.log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// One result row as a JSON object keyed by column name.
fn row_to_json(row: &SqliteRow) -> Result<Json> {
    let mut object = serde_json::Map::new();
    for column in row.columns() {
        let i = column.ordinal();
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Json::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Json::from(row.try_get::<i64, _>(i)?),
                "REAL" => Json::from(row.try_get::<f64, _>(i)?),
                "BLOB" => Json::from(format!("<{} bytes>", row.try_get::<Vec<u8>, _>(i)?.len())),
                _ => Json::from(row.try_get::<String, _>(i)?),
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(Json::Object(object))
}

async fn run(cli: Cli, cfg: Config) -> Result<()> {
    let options = cfg.connect_options();
    let mut conn = AuthConnection::open(&options)
        .await
        .with_context(|| format!("failed to open {}", options.database()))?;

    match cli.command {
        Command::Init | Command::Check => match conn.identity() {
            Some(identity) => println!(
                "logged in as {} ({})",
                identity.username,
                if identity.is_admin { "admin" } else { "user" }
            ),
            None => println!("authentication is not enabled on this database"),
        },
        Command::AddUser {
            username,
            password,
            admin,
        } => conn.add_user(&username, &password, admin).await?,
        Command::ChangeUser {
            username,
            password,
            admin,
        } => conn.change_user(&username, &password, admin).await?,
        Command::DeleteUser { username } => conn.delete_user(&username).await?,
        Command::ListUsers { json } => {
            let users = conn.users().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&users)?);
            } else {
                for user in users {
                    let role = if user.is_admin { "admin" } else { "user" };
                    println!("{:<32} {role}", user.username);
                }
            }
        }
        Command::Exec { sql } if returns_rows(&sql) => {
            for row in conn.fetch_all(&sql).await? {
                println!("{}", row_to_json(&row)?);
            }
        }
        Command::Exec { sql } => {
            let affected = conn.execute(&sql).await?;
            println!("{affected} row(s) affected");
        }
    }

    conn.close().await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = cli.load_config().context("invalid configuration")?;
    init_tracing(&cfg);
    run(cli, cfg).await
}
