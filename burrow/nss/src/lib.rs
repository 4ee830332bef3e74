//! Hostname resolution for sandboxed processes, packaged as a glibc NSS
//! service module.
//!
//! A process inside the sandbox has no resolver of its own; the privileged
//! broker on the far side of a Unix-domain socket does the real lookup.
//! This crate is the sandbox side of that split. The `_nss_burrow_*` entry
//! points in [`hooks`] convert glibc's raw buffers, [`ops`] runs one
//! blocking broker round trip per call, [`addr`] classifies the 128-bit
//! answer, and [`layout`] packs it into the caller's scratch space without
//! allocating.
//!
//! Install the cdylib as `libnss_burrow.so.2` and add `burrow` to the
//! `hosts` line of `nsswitch.conf`.

pub mod addr;
pub mod broker;
pub mod hooks;
pub mod layout;
pub mod ops;

pub use ops::{resolve_entry, resolve_tuple, LookupOutcome, ResolveError};
