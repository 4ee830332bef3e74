//! Classification of the broker's 128-bit address values.

use std::net::Ipv4Addr;

use burrow_protocol::ResolvedAddress;

/// Bits 32..48 of an IPv4-in-IPv6 value (`::ffff:a.b.c.d`).
const V4_MAPPED_MARKER: u64 = 0xFFFF;

/// Extracts the IPv4 address when `addr` is the mapped form of one.
///
/// Anything else, a genuine IPv6 address included, is `None`: the caller
/// treats such an answer as an unsupported address family, never as an
/// unknown host.
pub fn ipv4_mapped(addr: ResolvedAddress) -> Option<Ipv4Addr> {
    (addr.upper == 0 && addr.lower >> 32 == V4_MAPPED_MARKER)
        .then(|| Ipv4Addr::from(addr.lower as u32))
}
