#![no_main]

use arbitrary::Arbitrary;
use fb_protocol::{ParameterBuffer, ParameterBufferKind};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum FuzzArgument {
    Int(u8, i32),
    String(u8, String),
    Bytes(u8, Vec<u8>),
    Flag(u8),
}

#[derive(Debug, Arbitrary)]
enum FuzzKind {
    Database,
    Transaction,
    Blob,
    ConnectIdentification,
}

fuzz_target!(|input: (FuzzKind, Vec<FuzzArgument>)| {
    let (kind, arguments) = input;
    let kind = match kind {
        FuzzKind::Database => ParameterBufferKind::Database,
        FuzzKind::Transaction => ParameterBufferKind::Transaction,
        FuzzKind::Blob => ParameterBufferKind::Blob,
        FuzzKind::ConnectIdentification => ParameterBufferKind::ConnectIdentification,
    };

    let mut buffer = ParameterBuffer::new(kind);
    for argument in arguments {
        match argument {
            FuzzArgument::Int(tag, value) => buffer.add_int(tag, value),
            FuzzArgument::String(tag, value) => buffer.add_string(tag, value),
            FuzzArgument::Bytes(tag, value) => buffer.add_bytes(tag, value),
            FuzzArgument::Flag(tag) => buffer.add_flag(tag),
        };
    }

    // Over-long values must fail to serialize, never panic
    if let Ok(bytes) = buffer.serialize() {
        assert_eq!(bytes.len(), buffer.encoded_len());
    }
});
