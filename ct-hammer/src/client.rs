//! Log client abstraction.
//!
//! The hammer talks to a log only through [`LogClient`]. Implementations may
//! speak HTTP to a real log or, like [`crate::sim::SimulatedLog`], answer from
//! memory. Clients are handed out round-robin by a [`ClientPool`].

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigError;
use crate::merkle::Hash;
use crate::types::{Asn1Cert, InclusionProof, LogEntry, SignedCertificateTimestamp, SignedTreeHead};

/// Errors returned by log clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The request could not be delivered or the response was lost.
    #[error("transport error: {0}")]
    Transport(String),

    /// The log answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The log answered with something that could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
}

/// Result type for log client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// The public API of a CT log.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Submits a certificate chain, leaf first.
    async fn add_chain(&self, chain: &[Asn1Cert]) -> ClientResult<SignedCertificateTimestamp>;

    /// Submits a pre-certificate chain, pre-certificate first.
    async fn add_pre_chain(&self, chain: &[Asn1Cert]) -> ClientResult<SignedCertificateTimestamp>;

    /// Fetches the current signed tree head.
    async fn get_sth(&self) -> ClientResult<SignedTreeHead>;

    /// Fetches a consistency proof between two tree sizes.
    async fn get_sth_consistency(&self, first: u64, second: u64) -> ClientResult<Vec<Hash>>;

    /// Fetches an inclusion proof for a leaf hash in the tree of `tree_size`.
    async fn get_proof_by_hash(&self, leaf_hash: &Hash, tree_size: u64) -> ClientResult<InclusionProof>;

    /// Fetches entries `start..=end`.
    async fn get_entries(&self, start: u64, end: u64) -> ClientResult<Vec<LogEntry>>;

    /// Fetches the accepted root certificates.
    async fn get_accepted_roots(&self) -> ClientResult<Vec<Asn1Cert>>;
}

/// Interchangeable clients for one log, handed out round-robin.
#[derive(Clone)]
pub struct ClientPool {
    clients: Arc<[Arc<dyn LogClient>]>,
    next: Arc<AtomicUsize>,
}

impl ClientPool {
    /// Creates a pool.
    ///
    /// # Errors
    ///
    /// Returns an error if `clients` is empty.
    pub fn new(clients: Vec<Arc<dyn LogClient>>) -> Result<Self, ConfigError> {
        if clients.is_empty() {
            return Err(ConfigError::Invalid {
                message: "client pool is empty".to_string(),
            });
        }
        Ok(Self {
            clients: clients.into(),
            next: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Creates a pool holding one client.
    pub fn single(client: Arc<dyn LogClient>) -> Self {
        Self {
            clients: Arc::from(vec![client]),
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the next client in rotation.
    #[must_use]
    pub fn next(&self) -> Arc<dyn LogClient> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        Arc::clone(&self.clients[i])
    }

    /// Number of clients in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if the pool holds no clients.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

/// Runs a client call, abandoning it as soon as `cancel` fires.
///
/// # Errors
///
/// Returns [`ClientError::Cancelled`] on cancellation, otherwise the call's
/// own result.
pub async fn cancellable<T, F>(cancel: &CancellationToken, call: F) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ClientError::Cancelled),
        result = call => result,
    }
}
