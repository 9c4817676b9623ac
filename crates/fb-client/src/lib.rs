//! # fb-client
//!
//! Async client for the Firebird remote protocol, versions 10 through 12.
//!
//! This crate negotiates a protocol version with the server and exposes the
//! database, transaction, statement and blob handles of the accepted
//! version.
//!
//! ## Features
//!
//! - **Version negotiation**: every registered protocol version is offered
//!   and the server's choice is looked up in the registry
//! - **Capability delegation**: a newer version reuses the exchanges of an
//!   older one and overrides only what changed on the wire
//! - **Lazy send**: version 11 and later defer statement allocation and
//!   cursor close into the next round trip
//! - **Keep-alive and timeouts**: configurable per connection
//!
//! ## Handle Lifecycle
//!
//! ```text
//! Database::connect -> attach -> start_transaction -> prepare -> execute -> fetch
//!                                       |                                     |
//!                                 commit/rollback <-------- close_cursor/close
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_client::{Config, Database, ProtocolRegistry, TransactionOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new()
//!         .host("localhost")
//!         .database("employee")
//!         .credentials("SYSDBA", "masterkey");
//!
//!     let db = Database::open(&config, &ProtocolRegistry::default()).await?;
//!     let mut tx = db.start_transaction(&TransactionOptions::default()).await?;
//!
//!     let mut stmt = db.prepare(&tx, "SELECT EMP_NO FROM EMPLOYEE").await?;
//!     stmt.execute(&tx, &[]).await?;
//!     while let Some(row) = stmt.fetch().await? {
//!         println!("{row:?}");
//!     }
//!     stmt.close().await?;
//!
//!     tx.commit().await?;
//!     drop(tx);
//!     db.detach().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod blob;
pub mod channel;
pub mod config;
pub mod database;
pub mod descriptor;
pub mod error;
pub mod protocol;
pub mod query;
pub mod registry;
pub mod state;
pub mod statement;
pub mod transaction;

// Re-export commonly used types
pub use blob::{BlobOptions, InputBlob, OutputBlob};
pub use channel::{BoxedTransport, Channel, Transport};
pub use config::{Config, ConnectionOptions, TimeoutConfig};
pub use database::Database;
pub use descriptor::{NegotiatedProtocol, ProtocolDescriptor};
pub use error::{Error, Result};
pub use protocol::{ProtocolFamily, VERSION_10, VERSION_11, VERSION_12};
pub use query::{FinalizedQuery, GeneratedKeysQuery};
pub use registry::{ProtocolRegistry, ProtocolRegistryBuilder};
pub use state::{BlobState, StatementState, TransactionState};
pub use statement::Statement;
pub use transaction::{IsolationLevel, LockResolution, Transaction, TransactionOptions};

pub use fb_protocol::{Dialect, ProtocolVersion, Row};
