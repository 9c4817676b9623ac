//! # fb-codec
//!
//! Async framing layer for the Firebird wire protocol.
//!
//! This crate turns a raw byte stream into decoded server frames and
//! carries encoded requests back, with the transport-level behaviour the
//! protocol needs on top.
//!
//! ## Features
//!
//! - Frame decoding across TCP segment boundaries
//! - Connect and read timeouts; a timed-out connection is never reused
//! - `op_dummy` keep-alive packets while a response is pending
//! - IO splitting so `op_cancel` can be sent during a pending read
//!
//! ## Architecture
//!
//! ```text
//! TCP Stream → WireCodec (frame decoding) → WireConnection → Client
//! ```
//!
//! ```rust,ignore
//! use fb_codec::{TimeoutConfig, WireConnection};
//!
//! let mut conn = WireConnection::open("localhost", 3050, TimeoutConfig::default()).await?;
//! let cancel = conn.cancel_handle();
//!
//! // Cancel from another task
//! tokio::spawn(async move {
//!     cancel.cancel(fb_protocol::consts::cancel::RAISE).await?;
//! });
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod framed;
pub mod wire_codec;

pub use connection::{CancelHandle, TimeoutConfig, WireConnection, connect_tcp};
pub use error::CodecError;
pub use framed::{FrameReader, FrameWriter};
pub use wire_codec::{DEFAULT_MAX_FRAME_SIZE, WireCodec};
