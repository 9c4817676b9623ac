//! Statement handle tests.
//!
//! ```bash
//! cargo test -p fb-client --test statements
//! ```

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use fb_client::{
    Dialect, Error, ProtocolDescriptor, ProtocolVersion, Statement, StatementState,
    TransactionOptions,
};
use fb_protocol::consts::{INVALID_OBJECT, free, isc};
use fb_protocol::{Operation, Request, SqlType, StatementType, TypeDescriptor};
use fb_testing::fixtures;
use fb_testing::mock_server::{MockField, MockFirebirdServer, MockServerBuilder, MockStatement};

const SELECT_USERS: &str = "SELECT ID, NAME FROM USERS";
const INSERT_USER: &str = "INSERT INTO USERS (ID) VALUES (?)";
const TOTAL: &str = "EXECUTE PROCEDURE TOTAL";
const SELECT_BIG: &str = "SELECT BIG FROM COUNTERS";

fn user_rows(count: i32) -> Vec<fb_client::Row> {
    (1..=count)
        .map(|id| vec![fixtures::int(id), fixtures::varchar(&format!("user{id}"))])
        .collect()
}

fn scripted(rows: i32) -> MockServerBuilder {
    MockFirebirdServer::builder()
        .with_statement(
            SELECT_USERS,
            MockStatement::select(
                vec![common::int_field("ID"), common::varchar_field("NAME", 20)],
                user_rows(rows),
            ),
        )
        .with_statement(
            INSERT_USER,
            MockStatement::insert().with_parameters(vec![common::int_field("ID")]),
        )
        .with_statement(
            TOTAL,
            MockStatement::procedure(
                vec![common::int_field("TOTAL")],
                Some(vec![fixtures::int(42)]),
            ),
        )
}

fn prepare_requests(server: &MockFirebirdServer) -> Vec<i32> {
    server
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            Request::PrepareStatement { statement, .. } => Some(statement),
            _ => None,
        })
        .collect()
}

fn free_requests(server: &MockFirebirdServer) -> Vec<i32> {
    server
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            Request::FreeStatement { option, .. } => Some(option),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Prepare
// =============================================================================

#[tokio::test]
async fn test_version_10_allocates_before_prepare() {
    let server = scripted(0).build().await.unwrap();
    let db = common::open_with(&server, ProtocolDescriptor::v10()).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let statement = db.prepare(&tx, SELECT_USERS).await.unwrap();
    let handle = statement.handle().unwrap();
    assert_eq!(statement.state(), StatementState::Prepared);
    assert_eq!(statement.origin(), ProtocolVersion::V10);
    assert_eq!(prepare_requests(&server), vec![handle]);
    assert!(server.operations().contains(&Operation::AllocateStatement));
}

#[tokio::test]
async fn test_lazy_send_prepares_invalid_object() {
    let server = scripted(0).build().await.unwrap();
    let db = common::open_with(&server, ProtocolDescriptor::v11()).await;
    assert!(db.protocol().lazy_send());
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let statement = db.prepare(&tx, SELECT_USERS).await.unwrap();
    assert!(statement.handle().is_some());
    assert_eq!(statement.origin(), ProtocolVersion::V11);
    assert_eq!(statement.execution_origin(), ProtocolVersion::V10);
    assert_eq!(prepare_requests(&server), vec![INVALID_OBJECT]);

    // allocate and prepare arrive back to back
    let operations = server.operations();
    let allocate = operations
        .iter()
        .position(|op| *op == Operation::AllocateStatement)
        .unwrap();
    assert_eq!(operations[allocate + 1], Operation::PrepareStatement);
}

#[tokio::test]
async fn test_preallocated_statement_prepares_its_handle() {
    let server = scripted(0).build().await.unwrap();
    let db = common::open_with(&server, ProtocolDescriptor::v11()).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = db.create_statement();
    assert_eq!(statement.state(), StatementState::New);
    statement.allocate().await.unwrap();
    assert_eq!(statement.state(), StatementState::Allocated);
    let handle = statement.handle().unwrap();
    statement.prepare(&tx, SELECT_USERS).await.unwrap();
    assert_eq!(prepare_requests(&server), vec![handle]);
}

#[tokio::test]
async fn test_prepare_describes_columns_and_parameters() {
    let server = scripted(0).build().await.unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let select = db.prepare(&tx, SELECT_USERS).await.unwrap();
    let description = select.description().unwrap();
    assert_eq!(select.statement_type(), Some(StatementType::Select));
    let names: Vec<_> = description.fields.iter().map(|f| f.field_name.as_str()).collect();
    assert_eq!(names, vec!["ID", "NAME"]);
    assert!(description.parameters.is_empty());
    assert!(!select.output_blr().is_empty());
    assert!(select.input_blr().is_empty());

    let insert = db.prepare(&tx, INSERT_USER).await.unwrap();
    assert_eq!(insert.statement_type(), Some(StatementType::Insert));
    assert_eq!(insert.description().unwrap().parameters.len(), 1);
    assert!(!insert.input_blr().is_empty());
}

#[tokio::test]
async fn test_truncated_describe_is_continued() {
    let server = scripted(0).with_describe_limit(1).build().await.unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let statement = db.prepare(&tx, SELECT_USERS).await.unwrap();
    let description = statement.description().unwrap();
    assert_eq!(description.fields.len(), 2);
    assert_eq!(description.fields[1].field_name, "NAME");
    assert!(server.operations().contains(&Operation::InfoSql));
}

#[tokio::test]
async fn test_failed_prepare_keeps_allocated_handle() {
    let server = scripted(0).build().await.unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = db.create_statement();
    let err = statement.prepare(&tx, "SELECT BROKEN").await.unwrap_err();
    assert!(err.is_server_error(isc::DSQL_ERROR), "{err}");
    assert!(!err.is_fatal());
    assert!(statement.handle().is_some());
    assert_eq!(statement.state(), StatementState::Allocated);

    statement.prepare(&tx, SELECT_USERS).await.unwrap();
    assert_eq!(statement.state(), StatementState::Prepared);
}

#[tokio::test]
async fn test_undescribable_fields_leave_statement_allocated() {
    let server = scripted(0)
        .with_database_dialect(1)
        .with_statement(
            SELECT_BIG,
            MockStatement::select(
                vec![MockField::new("BIG", TypeDescriptor::new(SqlType::Int64))],
                vec![],
            ),
        )
        .build()
        .await
        .unwrap();
    let db = common::open(&server).await;
    assert_eq!(db.dialect(), Dialect::V1);
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = db.prepare(&tx, INSERT_USER).await.unwrap();
    assert!(!statement.input_blr().is_empty());

    // BIGINT has no dialect 1 representation
    let err = statement.prepare(&tx, SELECT_BIG).await.unwrap_err();
    assert!(matches!(err, Error::Encoding(_)), "{err}");
    assert!(!err.is_fatal());
    assert_eq!(statement.state(), StatementState::Allocated);
    assert!(statement.description().is_none());
    assert!(statement.input_blr().is_empty());
    assert!(statement.output_blr().is_empty());

    let err = statement.execute(&tx, &[]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }), "{err}");

    statement.prepare(&tx, INSERT_USER).await.unwrap();
    assert_eq!(statement.state(), StatementState::Prepared);
    statement.execute(&tx, &[fixtures::int(7)]).await.unwrap();
}

// =============================================================================
// Execute and fetch
// =============================================================================

#[tokio::test]
async fn test_fetch_in_batches() {
    let server = scripted(5).build().await.unwrap();
    common::init_tracing();
    let config = common::config(&server).fetch_size(2);
    let db = fb_client::Database::open(&config, &fb_client::ProtocolRegistry::default())
        .await
        .unwrap();
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = db.prepare(&tx, SELECT_USERS).await.unwrap();
    assert_eq!(statement.execute(&tx, &[]).await.unwrap(), None);
    assert_eq!(statement.state(), StatementState::CursorOpen);

    let rows = statement.fetch_all().await.unwrap();
    assert_eq!(rows, user_rows(5));
    assert_eq!(statement.fetch().await.unwrap(), None);

    let fetches = server
        .operations()
        .into_iter()
        .filter(|op| *op == Operation::Fetch)
        .count();
    assert_eq!(fetches, 3);
}

#[tokio::test]
async fn test_empty_cursor() {
    let server = scripted(0).build().await.unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = db.prepare(&tx, SELECT_USERS).await.unwrap();
    statement.execute(&tx, &[]).await.unwrap();
    assert_eq!(statement.fetch().await.unwrap(), None);
}

#[tokio::test]
async fn test_execute_sends_parameters() {
    let server = scripted(0).build().await.unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = db.prepare(&tx, INSERT_USER).await.unwrap();
    assert_eq!(statement.execute(&tx, &[fixtures::int(7)]).await.unwrap(), None);
    assert_eq!(statement.state(), StatementState::Prepared);

    let input = server
        .requests()
        .into_iter()
        .find_map(|r| match r {
            Request::Execute { input, .. } => Some(input),
            _ => None,
        })
        .unwrap();
    // value, then a zero null indicator
    assert_eq!(&input[..], &[0, 0, 0, 7, 0, 0, 0, 0]);
}

#[tokio::test]
async fn test_execute_rejects_wrong_parameter_count() {
    let server = scripted(0).build().await.unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = db.prepare(&tx, INSERT_USER).await.unwrap();
    let err = statement.execute(&tx, &[]).await.unwrap_err();
    assert!(matches!(err, Error::Encoding(_)), "{err}");
    assert!(!server.operations().contains(&Operation::Execute));
}

#[tokio::test]
async fn test_singleton_execute_returns_row() {
    let server = scripted(0).build().await.unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = db.prepare(&tx, TOTAL).await.unwrap();
    assert_eq!(statement.statement_type(), Some(StatementType::ExecProcedure));
    let row = statement.execute(&tx, &[]).await.unwrap();
    assert_eq!(row, Some(vec![fixtures::int(42)]));
    assert_eq!(statement.state(), StatementState::Prepared);
    assert!(server.operations().contains(&Operation::Execute2));
}

#[tokio::test]
async fn test_execute_failure_is_reported_with_handle() {
    let server = MockFirebirdServer::builder()
        .with_statement(
            "DELETE FROM LOCKED",
            MockStatement::ddl().with_execute_error(isc::LOCK_CONFLICT),
        )
        .build()
        .await
        .unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = db.prepare(&tx, "DELETE FROM LOCKED").await.unwrap();
    let handle = statement.handle();
    let err = statement.execute(&tx, &[]).await.unwrap_err();
    assert!(err.is_server_error(isc::LOCK_CONFLICT), "{err}");
    assert!(matches!(err, Error::Server { handle: h, .. } if h == handle));
    assert_eq!(statement.state(), StatementState::Prepared);
}

#[tokio::test]
async fn test_fetch_requires_open_cursor() {
    let server = scripted(1).build().await.unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = db.prepare(&tx, SELECT_USERS).await.unwrap();
    let err = statement.fetch().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }), "{err}");
}

// =============================================================================
// Close
// =============================================================================

async fn open_cursor<'db>(
    db: &'db fb_client::Database,
    tx: &fb_client::Transaction<'db>,
) -> Statement<'db> {
    let mut statement = db.prepare(tx, SELECT_USERS).await.unwrap();
    statement.execute(tx, &[]).await.unwrap();
    assert_eq!(statement.fetch().await.unwrap(), Some(user_rows(1).remove(0)));
    statement
}

#[tokio::test]
async fn test_deferred_close_travels_with_next_request() {
    let server = scripted(3).build().await.unwrap();
    let db = common::open_with(&server, ProtocolDescriptor::v11()).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = open_cursor(&db, &tx).await;
    statement.close_cursor().await.unwrap();
    assert_eq!(statement.state(), StatementState::Prepared);
    assert_eq!(db.deferred_requests().await, 1);
    assert!(free_requests(&server).is_empty());

    statement.execute(&tx, &[]).await.unwrap();
    assert_eq!(db.deferred_requests().await, 0);
    assert_eq!(free_requests(&server), vec![free::DSQL_CLOSE]);
    let operations = server.operations();
    let close = operations
        .iter()
        .position(|op| *op == Operation::FreeStatement)
        .unwrap();
    assert_eq!(operations[close + 1], Operation::Execute);
}

#[tokio::test]
async fn test_version_10_closes_cursor_immediately() {
    let server = scripted(3).build().await.unwrap();
    let db = common::open_with(&server, ProtocolDescriptor::v10()).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = open_cursor(&db, &tx).await;
    statement.close_cursor().await.unwrap();
    assert_eq!(db.deferred_requests().await, 0);
    assert_eq!(free_requests(&server), vec![free::DSQL_CLOSE]);
}

#[tokio::test]
async fn test_reexecute_closes_open_cursor() {
    let server = scripted(3).build().await.unwrap();
    let db = common::open_with(&server, ProtocolDescriptor::v10()).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = open_cursor(&db, &tx).await;
    statement.execute(&tx, &[]).await.unwrap();
    assert_eq!(free_requests(&server), vec![free::DSQL_CLOSE]);
    assert_eq!(statement.fetch_all().await.unwrap(), user_rows(3));
}

#[tokio::test]
async fn test_reprepare_closes_open_cursor() {
    let server = scripted(3).build().await.unwrap();
    let db = common::open_with(&server, ProtocolDescriptor::v10()).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = open_cursor(&db, &tx).await;
    statement.prepare(&tx, INSERT_USER).await.unwrap();
    assert_eq!(statement.state(), StatementState::Prepared);
    assert_eq!(free_requests(&server), vec![free::DSQL_CLOSE]);
    assert!(statement.fetch().await.is_err());
    statement.execute(&tx, &[fixtures::int(7)]).await.unwrap();
}

#[tokio::test]
async fn test_close_drops_statement() {
    let server = scripted(0).build().await.unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut statement = db.prepare(&tx, SELECT_USERS).await.unwrap();
    statement.close().await.unwrap();
    assert_eq!(statement.state(), StatementState::Closed);
    assert!(statement.handle().is_none());
    assert_eq!(free_requests(&server), vec![free::DSQL_DROP]);

    // closing twice sends nothing
    statement.close().await.unwrap();
    assert_eq!(free_requests(&server), vec![free::DSQL_DROP]);
}
