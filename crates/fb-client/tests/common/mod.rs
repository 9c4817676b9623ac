//! Shared helpers for the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use fb_client::{Config, Database, ProtocolDescriptor, ProtocolRegistry};
use fb_protocol::{SqlType, TypeDescriptor};
use fb_testing::mock_server::{MockField, MockFirebirdServer};

/// Route client logs to the test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Configuration pointing at `server`.
pub fn config(server: &MockFirebirdServer) -> Config {
    Config::new()
        .host(server.host())
        .port(server.port())
        .database("employee")
        .credentials("SYSDBA", "masterkey")
}

/// Registry holding only `descriptors`.
pub fn registry(descriptors: &[ProtocolDescriptor]) -> ProtocolRegistry {
    descriptors
        .iter()
        .fold(ProtocolRegistry::builder(), |builder, d| builder.register(*d))
        .build()
}

/// Connect and attach with the default registry.
pub async fn open(server: &MockFirebirdServer) -> Database {
    init_tracing();
    Database::open(&config(server), &ProtocolRegistry::default())
        .await
        .unwrap()
}

/// Connect and attach speaking only `descriptor`.
pub async fn open_with(server: &MockFirebirdServer, descriptor: ProtocolDescriptor) -> Database {
    init_tracing();
    Database::open(&config(server), &registry(&[descriptor]))
        .await
        .unwrap()
}

/// An `INTEGER` column.
pub fn int_field(name: &str) -> MockField {
    MockField::new(name, TypeDescriptor::new(SqlType::Long))
}

/// A `VARCHAR(len)` column.
pub fn varchar_field(name: &str, len: i32) -> MockField {
    MockField::new(name, TypeDescriptor::varying(len))
}
