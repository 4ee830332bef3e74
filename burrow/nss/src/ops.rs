//! The safe core behind the NSS entry points.
//!
//! One function per result shape, both running the same pipeline: validate
//! the query, run the broker chain, classify the answer, pack it into the
//! caller's buffer. The FFI layer in [`crate::hooks`] only converts raw
//! arguments and stores the status codes these functions decide on.

use std::{ffi::CStr, net::Ipv4Addr, path::Path};

use libc::c_int;
use thiserror::Error;

use crate::{
    addr,
    broker::{BrokerClientError, BrokerConnection},
    layout::{self, PackError, PackedEntry, PackedTuple},
};

/// `h_errno` values from `<netdb.h>`, which the `libc` crate does not
/// export.
pub const HOST_NOT_FOUND: c_int = 1;
pub const NO_RECOVERY: c_int = 3;
pub const NO_DATA: c_int = 4;

/// `enum nss_status` from glibc's `<nss.h>`.
pub const NSS_STATUS_TRYAGAIN: c_int = -2;
pub const NSS_STATUS_UNAVAIL: c_int = -1;
pub const NSS_STATUS_NOTFOUND: c_int = 0;
pub const NSS_STATUS_SUCCESS: c_int = 1;

/// Everything that can cut a lookup short.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The chain failed somewhere between connect and the final reply.
    /// Deliberately indistinguishable from an unknown host at the NSS
    /// surface; the log line keeps the real cause.
    #[error("broker chain failed: {0}")]
    Broker(#[from] BrokerClientError),
    /// The query asked for an address family this module never serves.
    #[error("unsupported address family {0}")]
    UnsupportedFamily(c_int),
    /// The broker answered with something other than an IPv4 address.
    #[error("resolved address is not IPv4")]
    NotIpv4Mapped,
    /// The caller's buffer cannot take the result.
    #[error(transparent)]
    Pack(#[from] PackError),
    /// The hostname is not valid UTF-8, which the broker wire format
    /// requires.
    #[error("hostname is not valid UTF-8")]
    InvalidHostname,
}

/// Terminal classification of one lookup, as the NSS caller sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    Success,
    /// The caller's buffer is too small; a retry with a larger one can
    /// succeed.
    TryAgainInsufficientBuffer,
    /// The broker had no answer, or could not be reached at all.
    NotFoundHostUnknown,
    /// The query wanted something other than an IPv4 answer, or the answer
    /// was not one.
    UnavailableUnsupportedFamily,
    /// A broken query or buffer on the caller's side.
    UnavailableInternalError,
}

impl LookupOutcome {
    /// The `enum nss_status` value reported to glibc.
    pub fn nss_status(self) -> c_int {
        match self {
            Self::Success => NSS_STATUS_SUCCESS,
            Self::TryAgainInsufficientBuffer => NSS_STATUS_TRYAGAIN,
            Self::NotFoundHostUnknown => NSS_STATUS_NOTFOUND,
            Self::UnavailableUnsupportedFamily | Self::UnavailableInternalError => {
                NSS_STATUS_UNAVAIL
            }
        }
    }

    /// The `(errno, h_errno)` pair stored through the caller's out
    /// pointers. `None` for success, which leaves both untouched.
    pub fn code_pair(self) -> Option<(c_int, c_int)> {
        match self {
            Self::Success => None,
            Self::TryAgainInsufficientBuffer => Some((libc::ENOMEM, NO_RECOVERY)),
            Self::NotFoundHostUnknown => Some((libc::ENOENT, HOST_NOT_FOUND)),
            Self::UnavailableUnsupportedFamily => Some((libc::EAFNOSUPPORT, NO_DATA)),
            Self::UnavailableInternalError => Some((libc::EINVAL, NO_DATA)),
        }
    }
}

impl ResolveError {
    /// Collapses the error into the caller-visible outcome.
    pub fn outcome(&self) -> LookupOutcome {
        match self {
            Self::Broker(_) => LookupOutcome::NotFoundHostUnknown,
            Self::UnsupportedFamily(_) | Self::NotIpv4Mapped => {
                LookupOutcome::UnavailableUnsupportedFamily
            }
            Self::Pack(PackError::BufferTooSmall { .. }) => {
                LookupOutcome::TryAgainInsufficientBuffer
            }
            Self::Pack(PackError::MisalignedBuffer) | Self::InvalidHostname => {
                LookupOutcome::UnavailableInternalError
            }
        }
    }
}

/// Resolves `hostname` through the broker at `broker_path` and packs the
/// answer into `buf` in the tuple shape.
pub fn resolve_tuple(
    broker_path: &Path,
    hostname: &CStr,
    buf: &mut [u8],
) -> Result<PackedTuple, ResolveError> {
    let ip = resolve_ipv4(broker_path, hostname)?;

    Ok(layout::pack_tuple(hostname.to_bytes(), ip, buf)?)
}

/// The same lookup packed in the entry shape. `family` must be `AF_INET`;
/// any other family fails without contacting the broker.
pub fn resolve_entry(
    broker_path: &Path,
    hostname: &CStr,
    family: c_int,
    buf: &mut [u8],
) -> Result<PackedEntry, ResolveError> {
    if family != libc::AF_INET {
        return Err(ResolveError::UnsupportedFamily(family));
    }

    let ip = resolve_ipv4(broker_path, hostname)?;

    Ok(layout::pack_entry(hostname.to_bytes(), ip, buf)?)
}

/// The shared broker round trip, answer classified before any packing.
fn resolve_ipv4(broker_path: &Path, hostname: &CStr) -> Result<Ipv4Addr, ResolveError> {
    let hostname = hostname.to_str().map_err(|_| ResolveError::InvalidHostname)?;
    let resolved = BrokerConnection::connect(broker_path)?.resolve(hostname)?;

    addr::ipv4_mapped(resolved).ok_or(ResolveError::NotIpv4Mapped)
}
