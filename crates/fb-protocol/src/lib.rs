//! # fb-protocol
//!
//! Pure implementation of the Firebird remote wire protocol (versions 10
//! through 12).
//!
//! This crate provides XDR primitives, operation codes, parameter buffers,
//! the SQL type model, message BLR and type-length calculation, info and
//! status parsing, and the request/response message grammar.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic and
//! makes no assumptions about the async runtime. Higher-level crates build upon
//! this foundation to provide async I/O capabilities.
//!
//! ## Example
//!
//! ```rust
//! use fb_protocol::{Dialect, RowDescriptor, SqlType, TypeDescriptor, TypeLengthCalculator};
//!
//! let calculator = TypeLengthCalculator::new(Dialect::V3);
//! let row = RowDescriptor::new(vec![
//!     TypeDescriptor::new(SqlType::Long),
//!     TypeDescriptor::varying(20),
//! ]);
//! let layout = calculator.row_layout(&row).unwrap();
//! assert_eq!(layout.length, 32);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod blr;
pub mod consts;
pub mod error;
pub mod info;
pub mod message;
pub mod parameter_buffer;
pub mod row;
pub mod status;
pub mod types;
pub mod version;
pub mod xdr;

pub use blr::{ColumnLayout, RowLayout, TypeLengthCalculator};
pub use consts::Operation;
pub use error::ProtocolError;
pub use info::{
    DatabaseInfo, DescribeParser, DescribeProgress, FieldDescription, StatementDescription,
    StatementType,
};
pub use message::{
    AcceptResponse, ConnectRequest, FetchResponse, Frame, GenericResponse, ProtocolOffer, Request,
    SqlResponse,
};
pub use parameter_buffer::{Argument, ArgumentValue, ParameterBuffer, ParameterBufferKind};
pub use row::{Row, RowShape, XdrShape};
pub use status::{ServerStatus, StatusArgument};
pub use types::{Dialect, RowDescriptor, SqlType, TypeDescriptor};
pub use version::{Architecture, ProtocolFlags, ProtocolType, ProtocolVersion};
