//! Server-side decoding of client messages.
//!
//! The client only ever encodes requests; the mock server needs the other
//! direction. Requests carry no length header, so a message is complete
//! once its grammar decodes from the buffered bytes. The input row of an
//! execute request can only be delimited with the input shape of the
//! statement being executed.

use std::collections::HashMap;

use bytes::{Buf, Bytes};
use fb_protocol::{
    Architecture, ConnectRequest, Operation, ProtocolError, ProtocolOffer, ProtocolType,
    ProtocolVersion, Request, RowShape, xdr,
};

/// A decoded client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `op_connect`.
    Connect(ConnectRequest),
    /// Any request sent after the connection was accepted.
    Request(Request),
}

/// Input shapes of prepared statements, by statement handle.
pub type InputShapes = HashMap<i32, RowShape>;

/// Decode one client message from the front of `src`.
///
/// On success `src` is advanced past the message. Fails with
/// [`ProtocolError::Incomplete`] when more bytes are needed.
pub fn decode_message(
    src: &mut &[u8],
    input_shapes: &InputShapes,
) -> Result<ClientMessage, ProtocolError> {
    let code = xdr::read_int(src)?;
    let operation = Operation::from_i32(code)?;
    if operation == Operation::Connect {
        return decode_connect(src).map(ClientMessage::Connect);
    }
    decode_request(operation, src, input_shapes).map(ClientMessage::Request)
}

fn decode_connect(src: &mut &[u8]) -> Result<ConnectRequest, ProtocolError> {
    let _attach = xdr::read_int(src)?;
    let _connect_version = xdr::read_int(src)?;
    let _architecture = xdr::read_int(src)?;
    let database = xdr::read_string(src)?;
    let count = xdr::read_int(src)?;
    let user_identification = xdr::read_buffer(src)?;
    let count = usize::try_from(count).map_err(|_| ProtocolError::InvalidLength {
        length: i64::from(count),
        max: u8::MAX.into(),
    })?;

    let mut offers = Vec::with_capacity(count.min(16));
    for _ in 0..count {
        let version = xdr::read_int(src)?;
        let architecture = xdr::read_int(src)?;
        let min_type = protocol_type(xdr::read_int(src)?)?;
        let max_type = protocol_type(xdr::read_int(src)?)?;
        let weight = xdr::read_int(src)?;
        offers.push(ProtocolOffer {
            version: ProtocolVersion::new(version as u32),
            architecture: Architecture::from_code(architecture),
            min_type,
            max_type,
            weight,
        });
    }
    Ok(ConnectRequest {
        database,
        user_identification,
        offers,
    })
}

fn protocol_type(code: i32) -> Result<ProtocolType, ProtocolError> {
    ProtocolType::from_code(code)
        .ok_or_else(|| ProtocolError::malformed("connect request", format!("protocol type {code}")))
}

fn decode_request(
    operation: Operation,
    src: &mut &[u8],
    input_shapes: &InputShapes,
) -> Result<Request, ProtocolError> {
    let request = match operation {
        Operation::Attach => {
            let _ = xdr::read_int(src)?;
            Request::Attach {
                database: xdr::read_string(src)?,
                dpb: xdr::read_buffer(src)?,
            }
        }
        Operation::Detach => Request::Detach {
            database: xdr::read_int(src)?,
        },
        Operation::InfoDatabase => {
            let database = xdr::read_int(src)?;
            let _ = xdr::read_int(src)?;
            Request::InfoDatabase {
                database,
                items: xdr::read_buffer(src)?,
                buffer_length: xdr::read_int(src)?,
            }
        }
        Operation::Transaction => Request::StartTransaction {
            database: xdr::read_int(src)?,
            tpb: xdr::read_buffer(src)?,
        },
        Operation::Commit
        | Operation::Rollback
        | Operation::CommitRetaining
        | Operation::RollbackRetaining => Request::EndTransaction {
            operation,
            transaction: xdr::read_int(src)?,
        },
        Operation::Prepare2 => Request::PrepareTransaction {
            transaction: xdr::read_int(src)?,
            message: xdr::read_buffer(src)?,
        },
        Operation::AllocateStatement => Request::AllocateStatement {
            database: xdr::read_int(src)?,
        },
        Operation::PrepareStatement => Request::PrepareStatement {
            transaction: xdr::read_int(src)?,
            statement: xdr::read_int(src)?,
            dialect: xdr::read_int(src)?,
            sql: xdr::read_string(src)?,
            items: xdr::read_buffer(src)?,
            buffer_length: xdr::read_int(src)?,
        },
        Operation::InfoSql => {
            let statement = xdr::read_int(src)?;
            let _ = xdr::read_int(src)?;
            Request::InfoSql {
                statement,
                items: xdr::read_buffer(src)?,
                buffer_length: xdr::read_int(src)?,
            }
        }
        Operation::Execute | Operation::Execute2 => {
            let statement = xdr::read_int(src)?;
            let transaction = xdr::read_int(src)?;
            let input_blr = xdr::read_buffer(src)?;
            let _message_number = xdr::read_int(src)?;
            let messages = xdr::read_int(src)?;
            let input = if messages > 0 {
                let shape = input_shapes
                    .get(&statement)
                    .ok_or(ProtocolError::MissingRowShape)?;
                read_row(src, shape)?
            } else {
                Bytes::new()
            };
            let output_blr = if operation == Operation::Execute2 {
                let blr = xdr::read_buffer(src)?;
                let _ = xdr::read_int(src)?;
                Some(blr)
            } else {
                None
            };
            Request::Execute {
                statement,
                transaction,
                input_blr,
                input,
                output_blr,
            }
        }
        Operation::Fetch => {
            let statement = xdr::read_int(src)?;
            let blr = xdr::read_buffer(src)?;
            let _ = xdr::read_int(src)?;
            Request::Fetch {
                statement,
                blr,
                fetch_size: xdr::read_int(src)?,
            }
        }
        Operation::FreeStatement => Request::FreeStatement {
            statement: xdr::read_int(src)?,
            option: xdr::read_int(src)?,
        },
        Operation::CreateBlob2 => {
            let bpb = xdr::read_buffer(src)?;
            let transaction = xdr::read_int(src)?;
            let _ = xdr::read_long(src)?;
            Request::CreateBlob { bpb, transaction }
        }
        Operation::OpenBlob2 => Request::OpenBlob {
            bpb: xdr::read_buffer(src)?,
            transaction: xdr::read_int(src)?,
            blob_id: xdr::read_long(src)?,
        },
        Operation::GetSegment => {
            let blob = xdr::read_int(src)?;
            let length = xdr::read_int(src)?;
            let _ = xdr::read_int(src)?;
            Request::GetSegment { blob, length }
        }
        Operation::PutSegment => {
            let blob = xdr::read_int(src)?;
            let _length = xdr::read_int(src)?;
            Request::PutSegment {
                blob,
                data: xdr::read_buffer(src)?,
            }
        }
        Operation::CloseBlob | Operation::CancelBlob => Request::ReleaseBlob {
            operation,
            blob: xdr::read_int(src)?,
        },
        Operation::Cancel => Request::Cancel {
            kind: xdr::read_int(src)?,
        },
        Operation::Dummy => Request::Dummy,
        other => return Err(ProtocolError::UnexpectedOperation(other.code())),
    };
    Ok(request)
}

/// Delimit one encoded row and return its raw bytes.
fn read_row(src: &mut &[u8], shape: &RowShape) -> Result<Bytes, ProtocolError> {
    let start = *src;
    shape.decode(src)?;
    let consumed = start.len() - src.remaining();
    Ok(Bytes::copy_from_slice(&start[..consumed]))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use fb_protocol::XdrShape;

    fn decode_one(bytes: &[u8], shapes: &InputShapes) -> Request {
        let mut src = bytes;
        let ClientMessage::Request(request) = decode_message(&mut src, shapes).unwrap() else {
            panic!("expected a request");
        };
        assert!(src.is_empty(), "{} bytes left over", src.len());
        request
    }

    #[test]
    fn test_requests_decode_as_sent() {
        let requests = vec![
            Request::Attach {
                database: "employee".into(),
                dpb: Bytes::from_static(&[1, 63, 4, 3, 0, 0, 0]),
            },
            Request::StartTransaction {
                database: 1,
                tpb: Bytes::from_static(&[3, 2, 9, 6]),
            },
            Request::PrepareStatement {
                transaction: 2,
                statement: 0xFFFF,
                dialect: 3,
                sql: "SELECT 1 FROM RDB$DATABASE".into(),
                items: Bytes::from_static(&[21, 4, 7]),
                buffer_length: 32_000,
            },
            Request::Fetch {
                statement: 3,
                blr: Bytes::from_static(&[5, 2, 4, 0, 0, 0, 255, 76]),
                fetch_size: 400,
            },
            Request::OpenBlob {
                bpb: Bytes::new(),
                transaction: 2,
                blob_id: 0x0000_0081_0000_0002,
            },
            Request::PutSegment {
                blob: 4,
                data: Bytes::from_static(b"segment"),
            },
            Request::EndTransaction {
                operation: Operation::CommitRetaining,
                transaction: 2,
            },
            Request::Cancel { kind: 3 },
        ];
        for request in requests {
            let bytes = request.to_bytes().unwrap();
            assert_eq!(decode_one(&bytes, &InputShapes::new()), request);
        }
    }

    #[test]
    fn test_execute_input_is_delimited_by_shape() {
        let shape = RowShape::new(vec![XdrShape::Fixed(4), XdrShape::Varying(10)]);
        let mut input = BytesMut::new();
        shape
            .encode(
                &[Some(Bytes::from_static(&[0, 0, 0, 7])), None],
                &mut input,
            )
            .unwrap();
        let request = Request::Execute {
            statement: 5,
            transaction: 2,
            input_blr: Bytes::from_static(&[5, 2]),
            input: input.freeze(),
            output_blr: Some(Bytes::from_static(&[5, 2])),
        };
        let bytes = request.to_bytes().unwrap();

        let mut shapes = InputShapes::new();
        shapes.insert(5, shape);
        assert_eq!(decode_one(&bytes, &shapes), request);

        let mut src = &bytes[..];
        assert_eq!(
            decode_message(&mut src, &InputShapes::new()),
            Err(ProtocolError::MissingRowShape)
        );
    }

    #[test]
    fn test_partial_message_is_incomplete() {
        let bytes = Request::Detach { database: 1 }.to_bytes().unwrap();
        let mut src = &bytes[..6];
        assert!(
            decode_message(&mut src, &InputShapes::new())
                .unwrap_err()
                .is_incomplete()
        );
    }

    #[test]
    fn test_connect_request() {
        let request = ConnectRequest {
            database: "/data/test.fdb".into(),
            user_identification: Bytes::from_static(&[1, 6, b'S', b'Y', b'S', b'D', b'B', b'A']),
            offers: vec![ProtocolOffer {
                version: ProtocolVersion::V11,
                architecture: Architecture::Generic,
                min_type: ProtocolType::Rpc,
                max_type: ProtocolType::LazySend,
                weight: 2,
            }],
        };
        let mut dst = BytesMut::new();
        request.encode(&mut dst).unwrap();

        let mut src = &dst[..];
        assert_eq!(
            decode_message(&mut src, &InputShapes::new()).unwrap(),
            ClientMessage::Connect(request)
        );
    }
}
