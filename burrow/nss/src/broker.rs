//! Blocking client side of the broker capability chain.

use std::{io, os::unix::net::UnixStream, path::Path};

use burrow_protocol::{
    codec::{self, CodecError, SyncDecoder, SyncEncoder},
    BrokerError, BrokerRequest, BrokerResponse, CapabilityId, ResolvedAddress,
};
use thiserror::Error;
use tracing::Level;

/// Errors on the client side of a lookup.
///
/// The entry points collapse every variant into the single host-unknown
/// outcome; the distinctions only survive into the logs.
#[derive(Debug, Error)]
pub enum BrokerClientError {
    #[error("{0}")]
    Codec(#[from] CodecError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(Box<BrokerResponse>),
    #[error("broker rejected {step}: {error}")]
    Rejected {
        step: &'static str,
        #[source]
        error: BrokerError,
    },
    #[error("{0}")]
    IoFailed(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, BrokerClientError>;

/// One connection to the broker, good for exactly one lookup.
///
/// Capability ids are scoped to the connection that granted them, so there
/// is nothing worth keeping once the chain has run. Every lookup pays for a
/// fresh connect; in exchange, concurrent lookups never share state.
#[derive(Debug)]
pub struct BrokerConnection {
    sender: SyncEncoder<BrokerRequest, UnixStream>,
    receiver: SyncDecoder<BrokerResponse, UnixStream>,
}

impl BrokerConnection {
    /// Connects to the broker socket at `path`.
    #[tracing::instrument(level = Level::TRACE, err)]
    pub fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)?;
        let (sender, receiver) = codec::make_sync_framed::<BrokerRequest, BrokerResponse>(stream)?;

        Ok(Self { sender, receiver })
    }

    /// Runs the capability chain and resolves `hostname`, consuming the
    /// connection.
    ///
    /// The chain is strictly lock-step: root capability, session context,
    /// IP network, then the resolve itself. Blocks on each reply.
    #[tracing::instrument(level = Level::TRACE, skip(self), ret, err)]
    pub fn resolve(mut self, hostname: &str) -> Result<ResolvedAddress> {
        let root = self.acquire("bootstrap", BrokerRequest::Bootstrap)?;
        let session = self.acquire("session context", BrokerRequest::GetSessionContext { root })?;
        let network = self.acquire("ip network", BrokerRequest::GetIpNetwork { session })?;

        let response = self.exchange(BrokerRequest::ResolveHostname {
            network,
            hostname: hostname.to_string(),
        })?;
        let BrokerResponse::Resolved(result) = response else {
            return Err(BrokerClientError::UnexpectedResponse(Box::new(response)));
        };
        result.map_err(|error| BrokerClientError::Rejected {
            step: "resolve",
            error,
        })
    }

    /// One capability-acquisition step of the chain.
    fn acquire(&mut self, step: &'static str, request: BrokerRequest) -> Result<CapabilityId> {
        let response = self.exchange(request)?;
        let BrokerResponse::Capability(result) = response else {
            return Err(BrokerClientError::UnexpectedResponse(Box::new(response)));
        };
        result.map_err(|error| BrokerClientError::Rejected { step, error })
    }

    fn exchange(&mut self, request: BrokerRequest) -> Result<BrokerResponse> {
        self.sender.send(&request)?;
        self.sender.flush()?;
        self.receiver
            .receive()?
            .ok_or(BrokerClientError::ConnectionClosed)
    }
}
