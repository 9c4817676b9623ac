//! Basic connection and query example.
//!
//! Connects to a Firebird server, prints the negotiated protocol and runs a
//! query inside a transaction.
//!
//! # Running
//!
//! ```bash
//! # Set connection details via environment variables
//! export FIREBIRD_HOST=localhost
//! export FIREBIRD_DATABASE=employee
//! export FIREBIRD_USER=SYSDBA
//! export FIREBIRD_PASSWORD=masterkey
//!
//! cargo run --example basic
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use fb_client::{Config, Database, Error, ProtocolRegistry, TimeoutConfig, TransactionOptions};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let host = std::env::var("FIREBIRD_HOST").unwrap_or_else(|_| "localhost".into());
    let database = std::env::var("FIREBIRD_DATABASE").unwrap_or_else(|_| "employee".into());
    let user = std::env::var("FIREBIRD_USER").unwrap_or_else(|_| "SYSDBA".into());
    let password = std::env::var("FIREBIRD_PASSWORD").unwrap_or_else(|_| "masterkey".into());

    let config = Config::new()
        .host(host.as_str())
        .database(database)
        .credentials(user, password)
        .timeouts(
            TimeoutConfig::new()
                .read_timeout(Duration::from_secs(30))
                .keepalive_interval(Duration::from_secs(10)),
        );

    println!("Connecting to Firebird at {host}...");
    let db = Database::open(&config, &ProtocolRegistry::default()).await?;
    println!(
        "Connected with protocol {} ({:?}), dialect {:?}",
        db.protocol().version(),
        db.protocol().protocol_type,
        db.dialect()
    );
    for version in &db.info().server_version {
        println!("Server: {version}");
    }

    let mut tx = db.start_transaction(&TransactionOptions::default()).await?;
    {
        let mut statement = db
            .prepare(&tx, "SELECT RDB$RELATION_NAME FROM RDB$RELATIONS WHERE RDB$SYSTEM_FLAG = 0")
            .await?;
        if let Some(description) = statement.description() {
            for field in &description.fields {
                println!("Column: {} ({:?})", field.alias, field.descriptor.sql_type);
            }
        }

        statement.execute(&tx, &[]).await?;
        while let Some(row) = statement.fetch().await? {
            // CHAR columns arrive space padded
            let name = row[0]
                .as_ref()
                .map(|v| String::from_utf8_lossy(v).trim_end().to_string())
                .unwrap_or_default();
            println!("Table: {name}");
        }
        statement.close().await?;
    }
    tx.commit().await?;
    drop(tx);

    for warning in db.warnings() {
        println!("Warning: {warning}");
    }

    db.detach().await?;
    println!("Done.");
    Ok(())
}
