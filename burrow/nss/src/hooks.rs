//! The glibc NSS entry points.
//!
//! glibc looks these symbols up by name after reading `hosts: ... burrow`
//! from `nsswitch.conf`, so names and signatures are fixed by its module
//! ABI. Each one is a thin shim: convert the raw arguments, run the safe
//! core in [`crate::ops`], store the verdict through the caller's out
//! pointers.
//!
//! The host process is arbitrary and not ours, so nothing here panics,
//! allocates global state beyond the one-shot logger, or writes to stderr
//! unless [`LOG_ENV`] asks for it.

#![allow(clippy::missing_safety_doc)]

use std::{
    ffi::CStr,
    path::PathBuf,
    ptr, slice,
    sync::Once,
};

use libc::{c_char, c_int, c_void, size_t, socklen_t};
use tracing_subscriber::{fmt::format::FmtSpan, prelude::*};

use crate::{
    layout::GaihAddrtuple,
    ops::{self, LookupOutcome, ResolveError},
};

/// Broker socket used when [`SOCKET_PATH_ENV`] is unset.
pub const DEFAULT_SOCKET_PATH: &str = "/run/burrow/broker.sock";

/// Environment override for the broker socket path.
pub const SOCKET_PATH_ENV: &str = "BURROW_BROKER_SOCKET";

/// `EnvFilter` directives for this module's logs.
pub const LOG_ENV: &str = "BURROW_NSS_LOG";

static TRACING_INIT: Once = Once::new();

/// One-shot logger setup on the first entry point hit.
///
/// Stays completely silent unless [`LOG_ENV`] is set, and never displaces a
/// subscriber the host process installed itself.
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let Ok(directives) = std::env::var(LOG_ENV) else {
            return;
        };

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .with(tracing_subscriber::EnvFilter::new(directives))
            .try_init();
    });
}

/// Socket path for this lookup: the environment override when present, the
/// well-known default otherwise. Read per call, so an exec'd child with a
/// different environment talks to its own broker.
fn broker_path() -> PathBuf {
    std::env::var_os(SOCKET_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

/// Stores the outcome's code pair through the caller's pointers and hands
/// back the `nss_status` value. Success leaves `errno`/`h_errno` untouched.
unsafe fn finish(outcome: LookupOutcome, errnop: *mut c_int, h_errnop: *mut c_int) -> c_int {
    if let Some((errno, h_errno)) = outcome.code_pair() {
        if !errnop.is_null() {
            *errnop = errno;
        }
        if !h_errnop.is_null() {
            *h_errnop = h_errno;
        }
    }

    outcome.nss_status()
}

fn failed(hostname: &CStr, error: &ResolveError) -> LookupOutcome {
    let outcome = error.outcome();
    tracing::error!(?hostname, %error, ?outcome, "hostname lookup failed");

    outcome
}

/// `gethostbyname4_r`: the tuple-shaped lookup, no address family in the
/// query.
#[no_mangle]
pub unsafe extern "C" fn _nss_burrow_gethostbyname4_r(
    name: *const c_char,
    pat: *mut *mut GaihAddrtuple,
    buffer: *mut c_char,
    buflen: size_t,
    errnop: *mut c_int,
    h_errnop: *mut c_int,
    ttlp: *mut i32,
) -> c_int {
    init_tracing();

    if name.is_null() || pat.is_null() || buffer.is_null() {
        return finish(LookupOutcome::UnavailableInternalError, errnop, h_errnop);
    }

    // SAFETY: glibc hands us a NUL-terminated query name.
    let hostname = CStr::from_ptr(name);
    // SAFETY: buffer/buflen describe the caller's scratch space.
    let buf = slice::from_raw_parts_mut(buffer.cast::<u8>(), buflen);

    match ops::resolve_tuple(&broker_path(), hostname, buf) {
        Ok(packed) => {
            // SAFETY: pack_tuple placed an initialized tuple at this offset.
            *pat = buffer.add(packed.tuple).cast::<GaihAddrtuple>();
            if !ttlp.is_null() {
                // Answers are never cached.
                *ttlp = 0;
            }
            tracing::trace!(?hostname, "tuple lookup succeeded");

            finish(LookupOutcome::Success, errnop, h_errnop)
        }
        Err(error) => finish(failed(hostname, &error), errnop, h_errnop),
    }
}

/// `gethostbyname3_r`: the entry-shaped lookup with an explicit address
/// family, plus TTL and canonical-name out parameters.
#[no_mangle]
pub unsafe extern "C" fn _nss_burrow_gethostbyname3_r(
    name: *const c_char,
    af: c_int,
    result: *mut libc::hostent,
    buffer: *mut c_char,
    buflen: size_t,
    errnop: *mut c_int,
    h_errnop: *mut c_int,
    ttlp: *mut i32,
    canonp: *mut *mut c_char,
) -> c_int {
    init_tracing();

    if name.is_null() || result.is_null() || buffer.is_null() {
        return finish(LookupOutcome::UnavailableInternalError, errnop, h_errnop);
    }

    // SAFETY: glibc hands us a NUL-terminated query name.
    let hostname = CStr::from_ptr(name);
    // SAFETY: buffer/buflen describe the caller's scratch space.
    let buf = slice::from_raw_parts_mut(buffer.cast::<u8>(), buflen);

    match ops::resolve_entry(&broker_path(), hostname, af, buf) {
        Ok(packed) => {
            // SAFETY: result is the caller's hostent storage; every pointer
            // stored into it targets a region pack_entry initialized.
            let entry = &mut *result;
            entry.h_name = buffer.add(packed.hostname);
            entry.h_aliases = buffer.add(packed.aliases).cast::<*mut c_char>();
            entry.h_addrtype = libc::AF_INET;
            entry.h_length = crate::layout::ADDR_LEN as c_int;
            entry.h_addr_list = buffer.add(packed.addr_list).cast::<*mut c_char>();

            if !ttlp.is_null() {
                // Answers are never cached.
                *ttlp = 0;
            }
            if !canonp.is_null() {
                *canonp = buffer.add(packed.hostname);
            }
            tracing::trace!(?hostname, "entry lookup succeeded");

            finish(LookupOutcome::Success, errnop, h_errnop)
        }
        Err(error) => finish(failed(hostname, &error), errnop, h_errnop),
    }
}

/// `gethostbyname2_r` takes the same query without TTL or canonical-name
/// outputs.
#[no_mangle]
pub unsafe extern "C" fn _nss_burrow_gethostbyname2_r(
    name: *const c_char,
    af: c_int,
    result: *mut libc::hostent,
    buffer: *mut c_char,
    buflen: size_t,
    errnop: *mut c_int,
    h_errnop: *mut c_int,
) -> c_int {
    _nss_burrow_gethostbyname3_r(
        name,
        af,
        result,
        buffer,
        buflen,
        errnop,
        h_errnop,
        ptr::null_mut(),
        ptr::null_mut(),
    )
}

/// `gethostbyname_r` has no address family in the query; IPv4 is implied.
#[no_mangle]
pub unsafe extern "C" fn _nss_burrow_gethostbyname_r(
    name: *const c_char,
    result: *mut libc::hostent,
    buffer: *mut c_char,
    buflen: size_t,
    errnop: *mut c_int,
    h_errnop: *mut c_int,
) -> c_int {
    _nss_burrow_gethostbyname3_r(
        name,
        libc::AF_INET,
        result,
        buffer,
        buflen,
        errnop,
        h_errnop,
        ptr::null_mut(),
        ptr::null_mut(),
    )
}

/// Reverse lookup is outside this module's charter: the broker offers no
/// address-to-name operation. Fails the same way for every input, without
/// touching the broker.
#[no_mangle]
pub unsafe extern "C" fn _nss_burrow_gethostbyaddr2_r(
    _addr: *const c_void,
    _len: socklen_t,
    _af: c_int,
    _result: *mut libc::hostent,
    _buffer: *mut c_char,
    _buflen: size_t,
    errnop: *mut c_int,
    h_errnop: *mut c_int,
    _ttlp: *mut i32,
) -> c_int {
    init_tracing();

    finish(LookupOutcome::UnavailableUnsupportedFamily, errnop, h_errnop)
}

/// See [`_nss_burrow_gethostbyaddr2_r`].
#[no_mangle]
pub unsafe extern "C" fn _nss_burrow_gethostbyaddr_r(
    addr: *const c_void,
    len: socklen_t,
    af: c_int,
    result: *mut libc::hostent,
    buffer: *mut c_char,
    buflen: size_t,
    errnop: *mut c_int,
    h_errnop: *mut c_int,
) -> c_int {
    _nss_burrow_gethostbyaddr2_r(
        addr,
        len,
        af,
        result,
        buffer,
        buflen,
        errnop,
        h_errnop,
        ptr::null_mut(),
    )
}
