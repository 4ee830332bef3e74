#![allow(dead_code)] // not every test binary uses every helper

use std::{
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use burrow_protocol::{
    codec::{SyncDecoder, SyncEncoder},
    BrokerError, BrokerRequest, BrokerResponse, ResolvedAddress,
};
use tempfile::TempDir;

/// Answer the stub broker gives once a connection's chain reaches it.
#[derive(Debug, Clone, Copy)]
pub enum Verdict {
    /// Complete the chain and return this address.
    Address(ResolvedAddress),
    /// Complete the chain, then report the hostname as unknown.
    Unknown,
    /// Refuse the chain at the IP network step.
    RefuseNetwork,
}

const ROOT: u64 = 11;
const SESSION: u64 = 22;
const NETWORK: u64 = 33;

/// In-process stand-in for the privileged broker: a Unix socket served from
/// a background thread, speaking the full capability chain with fixed
/// capability ids and checking that each request carries the id the
/// previous step granted.
pub struct TestBroker {
    path: PathBuf,
    connections: Arc<AtomicUsize>,
    _dir: TempDir,
}

impl TestBroker {
    pub fn spawn(verdict: Verdict) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = connections.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                serve(stream, verdict);
            }
        });

        Self {
            path,
            connections,
            _dir: dir,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn serve(stream: UnixStream, verdict: Verdict) {
    let mut rx: SyncDecoder<BrokerRequest, _> = SyncDecoder::new(stream.try_clone().unwrap());
    let mut tx: SyncEncoder<BrokerResponse, _> = SyncEncoder::new(stream);

    while let Some(request) = rx.receive().unwrap() {
        let response = match request {
            BrokerRequest::Bootstrap => BrokerResponse::Capability(Ok(ROOT)),
            BrokerRequest::GetSessionContext { root: ROOT } => {
                BrokerResponse::Capability(Ok(SESSION))
            }
            BrokerRequest::GetIpNetwork { session: SESSION } => match verdict {
                Verdict::RefuseNetwork => BrokerResponse::Capability(Err(BrokerError::Refused(
                    "sandbox has no network access".into(),
                ))),
                _ => BrokerResponse::Capability(Ok(NETWORK)),
            },
            BrokerRequest::ResolveHostname {
                network: NETWORK,
                hostname,
            } => match verdict {
                Verdict::Address(address) => BrokerResponse::Resolved(Ok(address)),
                _ => BrokerResponse::Resolved(Err(BrokerError::LookupFailed(format!(
                    "no address for {hostname}"
                )))),
            },
            BrokerRequest::GetSessionContext { root } => {
                BrokerResponse::Capability(Err(BrokerError::UnknownCapability(root)))
            }
            BrokerRequest::GetIpNetwork { session } => {
                BrokerResponse::Capability(Err(BrokerError::UnknownCapability(session)))
            }
            BrokerRequest::ResolveHostname { network, .. } => {
                BrokerResponse::Resolved(Err(BrokerError::UnknownCapability(network)))
            }
        };
        tx.send(&response).unwrap();
        tx.flush().unwrap();
    }
}

/// Pointer-aligned scratch buffer, like the malloc'd one glibc hands in.
#[repr(C, align(8))]
pub struct AlignedBuf<const N: usize>(pub [u8; N]);

impl<const N: usize> AlignedBuf<N> {
    pub fn zeroed() -> Self {
        Self([0; N])
    }

    pub fn filled(byte: u8) -> Self {
        Self([byte; N])
    }
}
