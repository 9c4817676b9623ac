//! Mock server fidelity tests.
//!
//! These tests talk to the mock server over raw TCP with the message types
//! of `fb-protocol`, without going through the client handles.
//!
//! ```bash
//! cargo test -p fb-testing --test mock_fidelity
//! ```

#![allow(clippy::unwrap_used, clippy::panic)]

use bytes::{Bytes, BytesMut};
use fb_protocol::consts::{dpb, info, isc};
use fb_protocol::{
    Architecture, ConnectRequest, DatabaseInfo, Frame, GenericResponse, Operation,
    ParameterBuffer, ParameterBufferKind, ProtocolOffer, ProtocolType, ProtocolVersion, Request,
};
use fb_testing::mock_server::MockFirebirdServer;
use fb_testing::parameter_buffer;
use proptest::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// =============================================================================
// Raw client helpers
// =============================================================================

struct RawClient {
    stream: TcpStream,
    buffer: BytesMut,
}

impl RawClient {
    async fn connect(server: &MockFirebirdServer) -> Self {
        Self {
            stream: TcpStream::connect(server.addr()).await.unwrap(),
            buffer: BytesMut::new(),
        }
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    async fn request(&mut self, request: &Request) -> Frame {
        let bytes = request.to_bytes().unwrap();
        self.send(&bytes).await;
        self.receive().await
    }

    async fn receive(&mut self) -> Frame {
        loop {
            let mut src = &self.buffer[..];
            match Frame::decode(&mut src, None) {
                Ok(frame) => {
                    let consumed = self.buffer.len() - src.len();
                    let _ = self.buffer.split_to(consumed);
                    return frame;
                }
                Err(e) if e.is_incomplete() => {
                    let read = self.stream.read_buf(&mut self.buffer).await.unwrap();
                    assert!(read > 0, "server closed the connection");
                }
                Err(e) => panic!("undecodable frame: {e}"),
            }
        }
    }

    async fn response(&mut self, request: &Request) -> GenericResponse {
        match self.request(request).await {
            Frame::Response(response) => response,
            other => panic!("expected op_response, got {other:?}"),
        }
    }
}

fn offer(version: ProtocolVersion, max_type: ProtocolType, weight: i32) -> ProtocolOffer {
    ProtocolOffer {
        version,
        architecture: Architecture::Generic,
        min_type: ProtocolType::Rpc,
        max_type,
        weight,
    }
}

fn connect_bytes(offers: Vec<ProtocolOffer>) -> BytesMut {
    let request = ConnectRequest {
        database: "employee".into(),
        user_identification: Bytes::new(),
        offers,
    };
    let mut dst = BytesMut::new();
    request.encode(&mut dst).unwrap();
    dst
}

fn standard_offers() -> Vec<ProtocolOffer> {
    vec![
        offer(ProtocolVersion::V10, ProtocolType::BatchSend, 1),
        offer(ProtocolVersion::V11, ProtocolType::LazySend, 2),
        offer(ProtocolVersion::V12, ProtocolType::LazySend, 3),
    ]
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_handshake_accepts_heaviest_offer() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let mut client = RawClient::connect(&server).await;
    client.send(&connect_bytes(standard_offers())).await;

    let Frame::Accept(accept) = client.receive().await else {
        panic!("expected op_accept");
    };
    assert_eq!(accept.version, ProtocolVersion::V12);
    assert_eq!(accept.accepted_type(), Some(ProtocolType::LazySend));
    assert_eq!(server.connect_requests().len(), 1);
    assert_eq!(server.connect_requests()[0].offers, standard_offers());
}

#[tokio::test]
async fn test_handshake_rejects_unsupported_versions() {
    let server = MockFirebirdServer::builder()
        .with_versions(&[ProtocolVersion::V12])
        .build()
        .await
        .unwrap();
    let mut client = RawClient::connect(&server).await;
    client
        .send(&connect_bytes(vec![offer(
            ProtocolVersion::V10,
            ProtocolType::BatchSend,
            1,
        )]))
        .await;
    assert_eq!(client.receive().await, Frame::Reject);
}

// =============================================================================
// Session
// =============================================================================

#[tokio::test]
async fn test_attach_and_database_info() {
    let server = MockFirebirdServer::builder()
        .with_database_dialect(1)
        .with_server_version("LI-V2.5.9 Mock")
        .build()
        .await
        .unwrap();
    let mut client = RawClient::connect(&server).await;
    client.send(&connect_bytes(standard_offers())).await;
    client.receive().await;

    let mut buffer = ParameterBuffer::new(ParameterBufferKind::Database);
    buffer
        .add_string(dpb::USER_NAME, "SYSDBA")
        .add_int(dpb::SQL_DIALECT, 3);
    let attach = client
        .response(&Request::Attach {
            database: "employee".into(),
            dpb: buffer.serialize().unwrap(),
        })
        .await;
    assert!(!attach.status.is_error());
    assert!(attach.object > 0);

    let response = client
        .response(&Request::InfoDatabase {
            database: attach.object,
            items: Bytes::from_static(&[info::DB_SQL_DIALECT, info::ISC_VERSION, info::END]),
            buffer_length: 1024,
        })
        .await;
    let parsed = DatabaseInfo::parse(&response.data).unwrap();
    assert_eq!(parsed.dialect, Some(1));
    assert_eq!(parsed.server_version, vec!["LI-V2.5.9 Mock".to_string()]);

    let buffers = server.attach_buffers();
    let decoded = parameter_buffer::decode(ParameterBufferKind::Database, &buffers[0]).unwrap();
    assert_eq!(decoded.string(dpb::USER_NAME), Some("SYSDBA"));
    assert_eq!(decoded.int(dpb::SQL_DIALECT), Some(3));
}

#[tokio::test]
async fn test_unknown_statement_fails_to_prepare() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let mut client = RawClient::connect(&server).await;
    client.send(&connect_bytes(standard_offers())).await;
    client.receive().await;

    let statement = client
        .response(&Request::AllocateStatement { database: 1 })
        .await
        .object;
    let prepare = client
        .response(&Request::PrepareStatement {
            transaction: 2,
            statement,
            dialect: 3,
            sql: "SELECT NOTHING".into(),
            items: Bytes::new(),
            buffer_length: 1024,
        })
        .await;
    assert_eq!(prepare.status.error_code(), Some(isc::DSQL_ERROR));
}

#[tokio::test]
async fn test_keepalives_are_counted_not_answered() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let mut client = RawClient::connect(&server).await;
    client.send(&connect_bytes(standard_offers())).await;
    client.receive().await;

    client.send(&Request::Dummy.to_bytes().unwrap()).await;
    client.send(&Request::Dummy.to_bytes().unwrap()).await;
    let detach = client.response(&Request::Detach { database: 1 }).await;
    assert!(!detach.status.is_error());

    assert_eq!(server.keepalives_received(), 2);
    assert_eq!(server.operations(), vec![Operation::Detach]);
}

#[tokio::test]
async fn test_blob_written_then_read_in_parts() {
    let server = MockFirebirdServer::builder().build().await.unwrap();
    let mut client = RawClient::connect(&server).await;
    client.send(&connect_bytes(standard_offers())).await;
    client.receive().await;

    let created = client
        .response(&Request::CreateBlob {
            bpb: Bytes::new(),
            transaction: 2,
        })
        .await;
    client
        .response(&Request::PutSegment {
            blob: created.object,
            data: Bytes::from_static(b"0123456789"),
        })
        .await;
    client
        .response(&Request::ReleaseBlob {
            operation: Operation::CloseBlob,
            blob: created.object,
        })
        .await;
    assert_eq!(
        server.blob(created.blob_id),
        Some(Bytes::from_static(b"0123456789"))
    );

    let opened = client
        .response(&Request::OpenBlob {
            bpb: Bytes::new(),
            transaction: 2,
            blob_id: created.blob_id,
        })
        .await;
    // room for six data bytes per call
    let first = client
        .response(&Request::GetSegment {
            blob: opened.object,
            length: 8,
        })
        .await;
    assert_eq!(first.object, 1);
    assert_eq!(&first.data[..], b"\x06\x00012345");
    let second = client
        .response(&Request::GetSegment {
            blob: opened.object,
            length: 8,
        })
        .await;
    assert_eq!(second.object, 0);
    assert_eq!(&second.data[..], b"\x04\x006789");
    let end = client
        .response(&Request::GetSegment {
            blob: opened.object,
            length: 8,
        })
        .await;
    assert_eq!(end.object, 2);
}

// =============================================================================
// Parameter buffer decoder
// =============================================================================

proptest! {
    #[test]
    fn prop_database_buffer_decodes_as_built(
        user in "[A-Z]{1,31}",
        dialect in 1i32..=3,
        buffers in proptest::option::of(0i32..100_000),
    ) {
        let mut buffer = ParameterBuffer::new(ParameterBufferKind::Database);
        buffer.add_string(dpb::USER_NAME, user.clone());
        buffer.add_int(dpb::SQL_DIALECT, dialect);
        if let Some(pages) = buffers {
            buffer.add_int(dpb::NUM_BUFFERS, pages);
        }
        let data = buffer.serialize().unwrap();

        let decoded = parameter_buffer::decode(ParameterBufferKind::Database, &data).unwrap();
        prop_assert_eq!(decoded.string(dpb::USER_NAME), Some(user.as_str()));
        prop_assert_eq!(decoded.int(dpb::SQL_DIALECT), Some(dialect));
        prop_assert_eq!(decoded.int(dpb::NUM_BUFFERS), buffers);
    }
}
