//! Wire contract between a sandboxed client and the burrow broker.
//!
//! A lookup is one short-lived connection carrying a fixed chain of
//! exchanges: [`BrokerRequest::Bootstrap`] grants the root capability, which
//! buys the session context, which buys the IP network capability, which
//! finally accepts [`BrokerRequest::ResolveHostname`]. Each request gets
//! exactly one reply and nothing is ever in flight concurrently, so the
//! messages carry no correlation ids.

pub mod codec;

use bincode::{Decode, Encode};
use thiserror::Error;

/// Broker-scoped handle to a granted capability.
///
/// Only meaningful on the connection that produced it.
pub type CapabilityId = u64;

/// One resolved address as the broker reports it, a 128-bit value split into
/// two halves.
///
/// The broker resolves into IPv6 space; an IPv4 result arrives in the mapped
/// form (`::ffff:a.b.c.d`), with the four octets in the low 32 bits of
/// `lower`.
#[derive(Encode, Decode, Debug, PartialEq, Eq, Clone, Copy)]
pub struct ResolvedAddress {
    /// Most significant 64 bits.
    pub upper: u64,
    /// Least significant 64 bits.
    pub lower: u64,
}

impl ResolvedAddress {
    /// The mapped-form encoding of an IPv4 address.
    pub fn from_ipv4(ip: std::net::Ipv4Addr) -> Self {
        Self {
            upper: 0,
            lower: 0xFFFF_0000_0000 | u64::from(u32::from(ip)),
        }
    }
}

/// Failure reported by the broker for one chain step.
#[derive(Encode, Decode, Error, Debug, PartialEq, Eq, Clone)]
pub enum BrokerError {
    /// The request referenced a capability this connection never obtained.
    #[error("capability {0} is not known to the broker")]
    UnknownCapability(CapabilityId),
    /// The broker could not resolve the hostname.
    #[error("lookup failed: {0}")]
    LookupFailed(String),
    /// Broker policy refused the request.
    #[error("refused: {0}")]
    Refused(String),
}

/// Result of one chain step, as encoded on the wire.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Client --> broker messages.
#[derive(Encode, Decode, Debug, PartialEq, Eq, Clone)]
pub enum BrokerRequest {
    /// First message on every connection, grants the root capability.
    Bootstrap,
    /// Exchange the root capability for the session context.
    GetSessionContext { root: CapabilityId },
    /// Exchange the session context for the IP network capability.
    GetIpNetwork { session: CapabilityId },
    /// Resolve a hostname within the granted network.
    ResolveHostname {
        network: CapabilityId,
        hostname: String,
    },
}

/// Broker --> client messages.
#[derive(Encode, Decode, Debug, PartialEq, Eq, Clone)]
pub enum BrokerResponse {
    /// Reply to any of the three capability-acquisition steps.
    Capability(BrokerResult<CapabilityId>),
    /// Reply to [`BrokerRequest::ResolveHostname`].
    Resolved(BrokerResult<ResolvedAddress>),
}
