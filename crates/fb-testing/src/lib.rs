//! # fb-testing
//!
//! Test infrastructure for Firebird wire protocol development.
//!
//! This crate provides an in-process mock server speaking the remote
//! protocol, plus decoders for what the client writes on the wire.
//!
//! ## Features
//!
//! - Mock Firebird server for tests (no database required)
//! - Request journal for asserting on the exact requests sent
//! - Reference decoder for parameter buffers
//! - Value fixtures in the XDR encoding of the common types
//!
//! ## Mock Server Example
//!
//! ```rust,ignore
//! use fb_testing::fixtures;
//! use fb_testing::mock_server::{MockField, MockFirebirdServer, MockStatement};
//! use fb_protocol::{SqlType, TypeDescriptor};
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = MockFirebirdServer::builder()
//!         .with_statement(
//!             "SELECT ID, NAME FROM USERS",
//!             MockStatement::select(
//!                 vec![
//!                     MockField::new("ID", TypeDescriptor::new(SqlType::Long)),
//!                     MockField::new("NAME", TypeDescriptor::varying(50)),
//!                 ],
//!                 vec![vec![fixtures::int(1), fixtures::varchar("Alice")]],
//!             ),
//!         )
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     // Connect your client to server.addr()
//!     let addr = server.addr();
//!     // ...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_server;
pub mod parameter_buffer;
pub mod request;

pub use mock_server::{
    MockField, MockFirebirdServer, MockServerBuilder, MockServerConfig, MockServerError,
    MockStatement,
};
pub use parameter_buffer::{DecodeError, DecodedBuffer, RawArgument};
pub use request::{ClientMessage, InputShapes, decode_message};
