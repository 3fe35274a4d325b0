mod common;

use std::io::Write;

use common::temp_database;
use userauth::AuthConnection;
use userauth::config::Config;

#[tokio::test]
async fn config_file_drives_connection() {
    let (_dir, uri) = temp_database();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
database = "{uri}"
username = "admin"
password = "admin"
enable_auth = true

[hash]
memory_kib = 256
iterations = 1
"#
    )
    .unwrap();

    let cfg = Config::from_file(file.path().to_str().unwrap()).unwrap();
    let mut conn = AuthConnection::open(&cfg.connect_options()).await.unwrap();
    assert!(conn.is_auth_enabled().await.unwrap());
    assert_eq!(conn.identity().unwrap().username, "admin");
}

#[test]
fn missing_config_file() {
    assert!(Config::from_file("/nonexistent/userauth.toml").is_err());
}
