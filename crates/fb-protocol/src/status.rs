//! Status vectors carried by `op_response`.
//!
//! A status vector is a sequence of `(kind, value)` pairs terminated by
//! `isc_arg_end`. Errors start with `isc_arg_gds`; a vector whose only code
//! is `isc_arg_gds 0` reports success. Warnings use `isc_arg_warning` and may
//! accompany a successful response.

use core::fmt;

use bytes::{Buf, BufMut};

use crate::consts::arg;
use crate::error::ProtocolError;
use crate::xdr;

/// One argument of a status vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatusArgument {
    /// Error code.
    Gds(i32),
    /// Warning code.
    Warning(i32),
    /// String parameter of the preceding code.
    String(String),
    /// Numeric parameter of the preceding code.
    Number(i32),
    /// Preformatted message text.
    Interpreted(String),
    /// SQLSTATE of the error.
    SqlState(String),
}

/// A decoded status vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ServerStatus {
    arguments: Vec<StatusArgument>,
}

impl ServerStatus {
    /// Create a status from its arguments.
    #[must_use]
    pub fn new(arguments: Vec<StatusArgument>) -> Self {
        Self { arguments }
    }

    /// A status reporting a single error code.
    #[must_use]
    pub fn error(code: i32) -> Self {
        Self::new(vec![StatusArgument::Gds(code)])
    }

    /// Decode a status vector.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut arguments = Vec::new();
        loop {
            let kind = xdr::read_int(src)?;
            let argument = match kind {
                arg::END => break,
                arg::GDS => StatusArgument::Gds(xdr::read_int(src)?),
                arg::WARNING => StatusArgument::Warning(xdr::read_int(src)?),
                arg::NUMBER => StatusArgument::Number(xdr::read_int(src)?),
                arg::STRING | arg::CSTRING => StatusArgument::String(xdr::read_string(src)?),
                arg::INTERPRETED => StatusArgument::Interpreted(xdr::read_string(src)?),
                arg::SQL_STATE => StatusArgument::SqlState(xdr::read_string(src)?),
                other => {
                    return Err(ProtocolError::malformed(
                        "status vector",
                        format!("unknown argument kind {other}"),
                    ));
                }
            };
            arguments.push(argument);
        }
        Ok(Self { arguments })
    }

    /// Encode the status vector, terminated by `isc_arg_end`.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        for argument in &self.arguments {
            match argument {
                StatusArgument::Gds(code) => {
                    xdr::write_int(dst, arg::GDS);
                    xdr::write_int(dst, *code);
                }
                StatusArgument::Warning(code) => {
                    xdr::write_int(dst, arg::WARNING);
                    xdr::write_int(dst, *code);
                }
                StatusArgument::Number(value) => {
                    xdr::write_int(dst, arg::NUMBER);
                    xdr::write_int(dst, *value);
                }
                StatusArgument::String(value) => {
                    xdr::write_int(dst, arg::STRING);
                    xdr::write_string(dst, value)?;
                }
                StatusArgument::Interpreted(value) => {
                    xdr::write_int(dst, arg::INTERPRETED);
                    xdr::write_string(dst, value)?;
                }
                StatusArgument::SqlState(value) => {
                    xdr::write_int(dst, arg::SQL_STATE);
                    xdr::write_string(dst, value)?;
                }
            }
        }
        xdr::write_int(dst, arg::END);
        Ok(())
    }

    /// Arguments in wire order.
    #[must_use]
    pub fn arguments(&self) -> &[StatusArgument] {
        &self.arguments
    }

    /// First non-zero error code.
    #[must_use]
    pub fn error_code(&self) -> Option<i32> {
        self.arguments.iter().find_map(|a| match a {
            StatusArgument::Gds(code) if *code != 0 => Some(*code),
            _ => None,
        })
    }

    /// Whether the status reports an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error_code().is_some()
    }

    /// Whether any error code equals `code`.
    #[must_use]
    pub fn has_code(&self, code: i32) -> bool {
        self.arguments
            .iter()
            .any(|a| matches!(a, StatusArgument::Gds(c) | StatusArgument::Warning(c) if *c == code))
    }

    /// Warning codes, in order.
    pub fn warnings(&self) -> impl Iterator<Item = i32> + '_ {
        self.arguments.iter().filter_map(|a| match a {
            StatusArgument::Warning(code) => Some(*code),
            _ => None,
        })
    }

    /// Whether the status carries warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }

    /// SQLSTATE, if the server sent one.
    #[must_use]
    pub fn sql_state(&self) -> Option<&str> {
        self.arguments.iter().find_map(|a| match a {
            StatusArgument::SqlState(state) => Some(state.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for argument in &self.arguments {
            let separator = if first { "" } else { "; " };
            match argument {
                StatusArgument::Gds(0) => continue,
                StatusArgument::Gds(code) => write!(f, "{separator}error {code}")?,
                StatusArgument::Warning(code) => write!(f, "{separator}warning {code}")?,
                StatusArgument::Interpreted(text) => write!(f, "{separator}{text}")?,
                StatusArgument::String(value) => write!(f, " [{value}]")?,
                StatusArgument::Number(value) => write!(f, " [{value}]")?,
                StatusArgument::SqlState(state) => write!(f, " (SQLSTATE {state})")?,
            }
            first = false;
        }
        if first {
            f.write_str("success")?;
        }
        Ok(())
    }
}
