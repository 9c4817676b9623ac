//! Remote protocol version, architecture and protocol type definitions.

use core::fmt;

use bitflags::bitflags;

/// Flag marking protocol versions introduced by Firebird (11 and later).
pub const FB_PROTOCOL_FLAG: u32 = 0x8000;

/// Mask to strip [`FB_PROTOCOL_FLAG`] from a protocol version.
pub const FB_PROTOCOL_MASK: u32 = !FB_PROTOCOL_FLAG & 0xFFFF;

/// Remote protocol version as exchanged in `op_connect` / `op_accept`.
///
/// Versions from 11 on carry [`FB_PROTOCOL_FLAG`]; the raw value is what the
/// server echoes back and what descriptors are looked up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(u32);

impl ProtocolVersion {
    /// Protocol 8 (InterBase 5).
    pub const V8: Self = Self(8);

    /// Protocol 10 (InterBase 6, Firebird 1.x and 2.0).
    pub const V10: Self = Self(10);

    /// Protocol 11 (Firebird 2.1): lazy send, deferred responses.
    pub const V11: Self = Self(FB_PROTOCOL_FLAG | 11);

    /// Protocol 12 (Firebird 2.5): asynchronous cancellation.
    pub const V12: Self = Self(FB_PROTOCOL_FLAG | 12);

    /// Create a protocol version from its raw wire value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw wire value, including [`FB_PROTOCOL_FLAG`] where applicable.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Version number without the Firebird flag.
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0 & FB_PROTOCOL_MASK
    }

    /// Whether the version carries the Firebird flag.
    #[must_use]
    pub const fn is_firebird(self) -> bool {
        self.0 & FB_PROTOCOL_FLAG != 0
    }

    /// Whether this version supports lazy send (deferred responses).
    #[must_use]
    pub const fn supports_lazy_send(self) -> bool {
        self.number() >= 11
    }

    /// Whether this version supports `op_cancel`.
    #[must_use]
    pub const fn supports_cancel(self) -> bool {
        self.number() >= 12
    }

    /// Parse a version number such as `"10"` or `"12"`.
    ///
    /// Numbers of 11 and above get the Firebird flag.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let number: u32 = s.trim().parse().ok()?;
        match number {
            0 => None,
            1..=10 => Some(Self(number)),
            n if n <= FB_PROTOCOL_MASK => Some(Self(FB_PROTOCOL_FLAG | n)),
            _ => None,
        }
    }
}

impl PartialOrd for ProtocolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProtocolVersion {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.number()
            .cmp(&other.number())
            .then(self.0.cmp(&other.0))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol {}", self.number())
    }
}

impl From<ProtocolVersion> for i32 {
    fn from(version: ProtocolVersion) -> Self {
        version.0 as i32
    }
}

/// Client/server architecture tag (`arch_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// Generic XDR encoding (`arch_generic`).
    Generic,
    /// Any other architecture code.
    Other(i32),
}

impl Architecture {
    /// Raw architecture code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Generic => 1,
            Self::Other(code) => code,
        }
    }

    /// Architecture from its raw code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Generic,
            other => Self::Other(other),
        }
    }
}

/// Protocol type (`ptype_*`), ordered by capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum ProtocolType {
    /// Simple remote procedure call.
    Rpc = 2,
    /// Batch sends, no asynchrony.
    BatchSend = 3,
    /// Batch sends with out-of-band data.
    OutOfBand = 4,
    /// Deferred packets delivery.
    LazySend = 5,
}

impl ProtocolType {
    /// Protocol type from its raw code, ignoring flag bits.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code & crate::consts::PTYPE_MASK {
            2 => Some(Self::Rpc),
            3 => Some(Self::BatchSend),
            4 => Some(Self::OutOfBand),
            5 => Some(Self::LazySend),
            _ => None,
        }
    }

    /// Raw protocol type code.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

bitflags! {
    /// Flag bits the server may set on the accepted protocol type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProtocolFlags: i32 {
        /// Wire compression is enabled.
        const COMPRESS = crate::consts::PFLAG_COMPRESS;
    }
}

impl ProtocolFlags {
    /// Flags carried by a raw protocol type value.
    #[must_use]
    pub const fn from_type_code(code: i32) -> Self {
        Self::from_bits_truncate(code & !crate::consts::PTYPE_MASK)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_version_numbers() {
        assert_eq!(ProtocolVersion::V10.raw(), 10);
        assert_eq!(ProtocolVersion::V11.raw(), 0x800B);
        assert_eq!(ProtocolVersion::V12.raw(), 0x800C);
        assert_eq!(ProtocolVersion::V11.number(), 11);
        assert!(ProtocolVersion::V12.is_firebird());
        assert!(!ProtocolVersion::V10.is_firebird());
    }

    #[test]
    fn test_version_ordering_ignores_flag() {
        assert!(ProtocolVersion::V12 > ProtocolVersion::V11);
        assert!(ProtocolVersion::V11 > ProtocolVersion::V10);
        assert!(ProtocolVersion::V10 > ProtocolVersion::V8);
    }

    #[test]
    fn test_capabilities() {
        assert!(!ProtocolVersion::V10.supports_lazy_send());
        assert!(ProtocolVersion::V11.supports_lazy_send());
        assert!(!ProtocolVersion::V11.supports_cancel());
        assert!(ProtocolVersion::V12.supports_cancel());
    }

    #[test]
    fn test_parse() {
        assert_eq!(ProtocolVersion::parse("10"), Some(ProtocolVersion::V10));
        assert_eq!(ProtocolVersion::parse(" 11 "), Some(ProtocolVersion::V11));
        assert_eq!(ProtocolVersion::parse("12"), Some(ProtocolVersion::V12));
        assert_eq!(ProtocolVersion::parse("0"), None);
        assert_eq!(ProtocolVersion::parse("abc"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ProtocolVersion::V11.to_string(), "protocol 11");
    }

    #[test]
    fn test_protocol_type() {
        assert_eq!(ProtocolType::from_code(5), Some(ProtocolType::LazySend));
        // compression flag is ignored
        assert_eq!(ProtocolType::from_code(0x105), Some(ProtocolType::LazySend));
        assert_eq!(ProtocolType::from_code(1), None);
        assert!(ProtocolType::Rpc < ProtocolType::LazySend);
    }

    #[test]
    fn test_protocol_flags() {
        assert!(ProtocolFlags::from_type_code(0x105).contains(ProtocolFlags::COMPRESS));
        assert!(ProtocolFlags::from_type_code(5).is_empty());
    }

    #[test]
    fn test_architecture() {
        assert_eq!(Architecture::from_code(1), Architecture::Generic);
        assert_eq!(Architecture::Other(36).code(), 36);
    }
}
