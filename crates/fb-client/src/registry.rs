//! The set of protocol versions offered on connect.

use fb_protocol::{AcceptResponse, ProtocolOffer};

use crate::descriptor::{NegotiatedProtocol, ProtocolDescriptor};
use crate::error::{Error, Result};

/// Protocol descriptors the client offers, most preferred first.
///
/// A registry is an immutable value; build a custom one with
/// [`ProtocolRegistry::builder`].
#[derive(Debug, Clone)]
pub struct ProtocolRegistry {
    descriptors: Vec<ProtocolDescriptor>,
}

impl Default for ProtocolRegistry {
    /// Versions 10, 11 and 12.
    fn default() -> Self {
        Self::builder()
            .register(ProtocolDescriptor::v10())
            .register(ProtocolDescriptor::v11())
            .register(ProtocolDescriptor::v12())
            .build()
    }
}

impl ProtocolRegistry {
    /// Start an empty registry.
    #[must_use]
    pub fn builder() -> ProtocolRegistryBuilder {
        ProtocolRegistryBuilder::default()
    }

    /// Registered descriptors, ordered by version then weight, both
    /// descending.
    #[must_use]
    pub fn descriptors(&self) -> &[ProtocolDescriptor] {
        &self.descriptors
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// The most preferred descriptor.
    #[must_use]
    pub fn preferred(&self) -> Option<&ProtocolDescriptor> {
        self.descriptors.first()
    }

    /// Offers for `op_connect`, most preferred first.
    #[must_use]
    pub fn offers(&self) -> Vec<ProtocolOffer> {
        self.descriptors.iter().map(ProtocolDescriptor::offer).collect()
    }

    /// Find the descriptor the server accepted.
    ///
    /// The echoed version must be registered, with the same architecture and
    /// a protocol type inside the descriptor's range. Anything else fails
    /// negotiation.
    pub fn select_best(&self, accept: &AcceptResponse) -> Result<NegotiatedProtocol> {
        let Some(protocol_type) = accept.accepted_type() else {
            return Err(Error::ProtocolNegotiationFailed {
                reason: format!("server accepted unknown protocol type {}", accept.protocol_type),
            });
        };
        let descriptor = self
            .descriptors
            .iter()
            .find(|d| d.accepts(accept.version, accept.architecture, protocol_type))
            .ok_or_else(|| Error::ProtocolNegotiationFailed {
                reason: format!(
                    "server accepted version {} ({:?}, {:?}) which was not offered",
                    accept.version, accept.architecture, protocol_type
                ),
            })?;
        Ok(NegotiatedProtocol {
            descriptor: *descriptor,
            protocol_type,
            flags: accept.flags(),
        })
    }
}

/// Builder for [`ProtocolRegistry`].
#[derive(Debug, Default)]
pub struct ProtocolRegistryBuilder {
    descriptors: Vec<ProtocolDescriptor>,
}

impl ProtocolRegistryBuilder {
    /// Add a descriptor.
    #[must_use]
    pub fn register(mut self, descriptor: ProtocolDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(mut self) -> ProtocolRegistry {
        self.descriptors
            .sort_by(|a, b| (b.version(), b.weight()).cmp(&(a.version(), a.weight())));
        ProtocolRegistry {
            descriptors: self.descriptors,
        }
    }
}
