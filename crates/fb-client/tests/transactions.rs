//! Transaction handle tests.
//!
//! ```bash
//! cargo test -p fb-client --test transactions
//! ```

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use std::time::Duration;

use fb_client::{
    Database, Error, IsolationLevel, LockResolution, ProtocolDescriptor, ProtocolVersion,
    TransactionOptions, TransactionState,
};
use fb_protocol::consts::{isc, tpb};
use fb_protocol::{Operation, ParameterBufferKind, Request};
use fb_testing::mock_server::MockFirebirdServer;
use fb_testing::parameter_buffer;

/// Operations after attach and database info.
fn session_operations(server: &MockFirebirdServer) -> Vec<Operation> {
    server.operations().into_iter().skip(2).collect()
}

/// Start, commit retaining, rollback retaining, then commit.
async fn run_suite(db: &Database) -> Vec<TransactionState> {
    let mut tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();
    let mut states = vec![tx.state()];
    tx.commit_retaining().await.unwrap();
    states.push(tx.state());
    tx.rollback_retaining().await.unwrap();
    states.push(tx.state());
    tx.commit().await.unwrap();
    states.push(tx.state());
    states
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_transaction_lifecycle() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let db = common::open(&server).await;

    let states = run_suite(&db).await;
    assert_eq!(
        states,
        vec![
            TransactionState::Active,
            TransactionState::Active,
            TransactionState::Active,
            TransactionState::Ended,
        ]
    );
    assert_eq!(
        session_operations(&server),
        vec![
            Operation::Transaction,
            Operation::CommitRetaining,
            Operation::RollbackRetaining,
            Operation::Commit,
        ]
    );
}

#[tokio::test]
async fn test_version_11_transactions_match_version_10() {
    let v10 = MockFirebirdServer::builder().build().await.unwrap();
    let db10 = common::open_with(&v10, ProtocolDescriptor::v10()).await;
    let v11 = MockFirebirdServer::builder().build().await.unwrap();
    let db11 = common::open_with(&v11, ProtocolDescriptor::v11()).await;
    assert_eq!(db11.protocol().version(), ProtocolVersion::V11);

    let states10 = run_suite(&db10).await;
    let states11 = run_suite(&db11).await;
    assert_eq!(states10, states11);
    assert_eq!(v10.requests(), v11.requests());

    let tx = db11
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();
    assert_eq!(tx.origin(), ProtocolVersion::V10);
}

#[tokio::test]
async fn test_rollback_ends_transaction() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let db = common::open(&server).await;

    let mut tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(tx.state(), TransactionState::Ended);

    let err = tx.commit().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }), "{err}");
    assert_eq!(server.operations().last(), Some(&Operation::Rollback));
}

#[tokio::test]
async fn test_failed_commit_keeps_transaction_active() {
    let server = MockFirebirdServer::builder()
        .with_commit_failures(1)
        .build()
        .await
        .unwrap();
    let db = common::open(&server).await;
    let mut tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let err = tx.commit().await.unwrap_err();
    assert!(err.is_server_error(isc::DEADLOCK), "{err}");
    assert!(!err.is_fatal());
    assert_eq!(tx.state(), TransactionState::Active);

    tx.commit().await.unwrap();
    assert_eq!(tx.state(), TransactionState::Ended);
    let commits = server
        .operations()
        .into_iter()
        .filter(|op| *op == Operation::Commit)
        .count();
    assert_eq!(commits, 2);
}

#[tokio::test]
async fn test_two_phase_commit() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let db = common::open(&server).await;
    let mut tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    tx.prepare(Some(b"xid-42")).await.unwrap();
    assert_eq!(tx.state(), TransactionState::Prepared);
    let err = tx.prepare(None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }), "{err}");

    tx.commit().await.unwrap();
    assert_eq!(tx.state(), TransactionState::Ended);

    let prepare = server
        .requests()
        .into_iter()
        .find_map(|r| match r {
            Request::PrepareTransaction { message, .. } => Some(message),
            _ => None,
        })
        .unwrap();
    assert_eq!(&prepare[..], b"xid-42");
}

// =============================================================================
// Transaction parameter buffer
// =============================================================================

#[tokio::test]
async fn test_default_options_buffer() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let db = common::open(&server).await;
    let mut tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let buffers = server.transaction_buffers();
    let decoded = parameter_buffer::decode(ParameterBufferKind::Transaction, &buffers[0]).unwrap();
    assert_eq!(decoded.tags(), vec![tpb::CONCURRENCY, tpb::WRITE, tpb::WAIT]);
    assert_eq!(buffers[0][0], tpb::VERSION3);
}

#[tokio::test]
async fn test_read_committed_nowait_buffer() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let db = common::open(&server).await;
    let options = TransactionOptions::new()
        .isolation(IsolationLevel::ReadCommitted {
            record_version: true,
        })
        .read_only(true)
        .lock_resolution(LockResolution::NoWait);
    let mut tx = db.start_transaction(&options).await.unwrap();
    tx.rollback().await.unwrap();

    let decoded =
        parameter_buffer::decode(ParameterBufferKind::Transaction, &server.transaction_buffers()[0])
            .unwrap();
    assert_eq!(
        decoded.tags(),
        vec![tpb::READ_COMMITTED, tpb::REC_VERSION, tpb::READ, tpb::NOWAIT]
    );
}

#[tokio::test]
async fn test_lock_timeout_buffer() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let db = common::open(&server).await;
    let options = TransactionOptions::new().lock_resolution(LockResolution::Wait {
        timeout: Some(Duration::from_secs(10)),
    });
    let mut tx = db.start_transaction(&options).await.unwrap();
    tx.commit().await.unwrap();

    let decoded =
        parameter_buffer::decode(ParameterBufferKind::Transaction, &server.transaction_buffers()[0])
            .unwrap();
    assert!(decoded.get(tpb::WAIT).unwrap().is_flag());
    assert_eq!(decoded.int(tpb::LOCK_TIMEOUT), Some(10));
}
