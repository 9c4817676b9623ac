//! Blob handle tests.
//!
//! ```bash
//! cargo test -p fb-client --test blobs
//! ```

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use fb_client::{BlobOptions, BlobState, Error, ProtocolVersion, TransactionOptions};
use fb_protocol::consts::bpb;
use fb_protocol::{Operation, ParameterBufferKind};
use fb_testing::mock_server::{BAD_BLOB_ID, MockFirebirdServer};
use fb_testing::{fixtures, parameter_buffer};

fn count(server: &MockFirebirdServer, operation: Operation) -> usize {
    server
        .operations()
        .into_iter()
        .filter(|op| *op == operation)
        .count()
}

#[tokio::test]
async fn test_read_segmented_blob() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let blob_id = server.insert_blob(fixtures::segments(&[10, 20, 5]));
    let db = common::open(&server).await;
    let mut tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    {
        let mut blob = db
            .open_blob(&tx, blob_id, BlobOptions::default())
            .await
            .unwrap();
        assert_eq!(blob.state(), BlobState::Open);
        assert_eq!(blob.origin(), ProtocolVersion::V10);

        let data = blob.read_to_end().await.unwrap();
        assert_eq!(data.len(), 35);
        assert_eq!(data, fixtures::segment_content(35));
        assert!(blob.is_eof());
        assert!(blob.get_segment(100).await.unwrap().is_empty());
        blob.close().await.unwrap();
        assert_eq!(blob.state(), BlobState::Closed);
    }

    // three segments, then the end marker
    assert_eq!(count(&server, Operation::GetSegment), 4);
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_short_reads_split_segments() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let blob_id = server.insert_blob(fixtures::segments(&[10]));
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut blob = db
        .open_blob(&tx, blob_id, BlobOptions::default())
        .await
        .unwrap();
    let first = blob.get_segment(6).await.unwrap();
    assert_eq!(first.len(), 4);
    assert!(!blob.is_eof());
    let rest = blob.read_to_end().await.unwrap();
    assert_eq!([first, rest].concat(), fixtures::segment_content(10).to_vec());
}

#[tokio::test]
async fn test_write_then_read_back() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let blob_id = {
        let mut blob = db.create_blob(&tx, BlobOptions::default()).await.unwrap();
        for segment in fixtures::segments(&[10, 20, 5]) {
            blob.put(&segment).await.unwrap();
        }
        blob.close().await.unwrap();
        blob.blob_id()
    };
    assert_eq!(count(&server, Operation::PutSegment), 3);
    assert_eq!(server.blob(blob_id), Some(fixtures::segment_content(35)));

    let mut blob = db
        .open_blob(&tx, blob_id, BlobOptions::default())
        .await
        .unwrap();
    assert_eq!(blob.read_to_end().await.unwrap(), fixtures::segment_content(35));
}

#[tokio::test]
async fn test_cancelled_blob_is_discarded() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut blob = db.create_blob(&tx, BlobOptions::default()).await.unwrap();
    blob.put(b"discard me").await.unwrap();
    blob.cancel().await.unwrap();
    assert_eq!(blob.state(), BlobState::Closed);
    assert_eq!(server.blob(blob.blob_id()), None);

    let err = blob.put(b"more").await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }), "{err}");
}

#[tokio::test]
async fn test_open_unknown_blob_fails() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let err = db
        .open_blob(&tx, 0x7FFF_0000_0000, BlobOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_server_error(BAD_BLOB_ID), "{err}");
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_blob_options_buffer() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let db = common::open(&server).await;
    let tx = db
        .start_transaction(&TransactionOptions::default())
        .await
        .unwrap();

    let mut blob = db
        .create_blob(&tx, BlobOptions::new().stream(true).sub_types(1, 1))
        .await
        .unwrap();
    blob.close().await.unwrap();
    let mut plain = db.create_blob(&tx, BlobOptions::default()).await.unwrap();
    plain.close().await.unwrap();

    let buffers = server.blob_buffers();
    let decoded = parameter_buffer::decode(ParameterBufferKind::Blob, &buffers[0]).unwrap();
    assert_eq!(decoded.int(bpb::TYPE), Some(bpb::TYPE_STREAM));
    assert_eq!(decoded.int(bpb::SOURCE_TYPE), Some(1));
    assert_eq!(decoded.int(bpb::TARGET_TYPE), Some(1));
    assert!(parameter_buffer::decode(ParameterBufferKind::Blob, &buffers[1])
        .unwrap()
        .arguments
        .is_empty());
}
