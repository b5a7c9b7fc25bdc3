//! Certificates submitted to the log that are waiting for an inclusion check.
//!
//! The queue holds at most [`SCT_COUNT`] certificates, oldest first. A new
//! certificate is only admitted once `MMD / SCT_COUNT` has passed since the
//! newest held SCT, so the merge deadlines of the held certificates are spread
//! across the whole merge-delay window. The oldest certificate leaves the queue
//! once its deadline has passed and get-proof-by-hash pops it for checking.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;

use crate::merkle::{self, Hash};
use crate::types::SignedCertificateTimestamp;

/// Number of submitted certificates held for inclusion checks.
pub const SCT_COUNT: usize = 10;

/// A certificate accepted by the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedCert {
    /// TLS-encoded `MerkleTreeLeaf`.
    pub leaf_data: Bytes,
    /// `SHA256(0x00 || leaf_data)`.
    pub leaf_hash: Hash,
    /// SCT returned by the log.
    pub sct: SignedCertificateTimestamp,
    /// Time (ms since the Unix epoch) by which the log promised to merge the leaf.
    pub integrate_by_ms: u64,
    /// Whether this was submitted via add-pre-chain.
    pub precert: bool,
}

impl SubmittedCert {
    /// Builds a record from an encoded leaf, hashing it and computing the
    /// merge deadline from the SCT timestamp.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(
        leaf_data: Bytes,
        sct: SignedCertificateTimestamp,
        mmd: Duration,
        precert: bool,
    ) -> Self {
        let leaf_hash = merkle::leaf_hash(&leaf_data);
        let integrate_by_ms = sct.timestamp.saturating_add(mmd.as_millis() as u64);
        Self {
            leaf_data,
            leaf_hash,
            sct,
            integrate_by_ms,
            precert,
        }
    }

    /// Returns true if the stored hash matches the stored leaf bytes.
    #[must_use]
    pub fn leaf_hash_matches(&self) -> bool {
        merkle::leaf_hash(&self.leaf_data) == self.leaf_hash
    }
}

/// Fixed-capacity ring of submitted certificates, oldest at `head`.
#[derive(Debug, Default)]
struct Ring {
    slots: [Option<Arc<SubmittedCert>>; SCT_COUNT],
    head: usize,
    len: usize,
}

impl Ring {
    fn newest(&self) -> Option<&Arc<SubmittedCert>> {
        if self.len == 0 {
            return None;
        }
        self.slots[(self.head + self.len - 1) % SCT_COUNT].as_ref()
    }

    fn oldest(&self) -> Option<&Arc<SubmittedCert>> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    fn can_append(&self, now: Duration, mmd: Duration) -> bool {
        if self.len == SCT_COUNT {
            return false;
        }
        let Some(newest) = self.newest() else {
            return true;
        };
        #[allow(clippy::cast_possible_truncation)]
        let spacing = mmd / SCT_COUNT as u32;
        now > Duration::from_millis(newest.sct.timestamp).saturating_add(spacing)
    }

    fn push(&mut self, cert: Arc<SubmittedCert>) {
        let tail = (self.head + self.len) % SCT_COUNT;
        self.slots[tail] = Some(cert);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<Arc<SubmittedCert>> {
        if self.len == 0 {
            return None;
        }
        let cert = self.slots[self.head].take();
        self.head = (self.head + 1) % SCT_COUNT;
        self.len -= 1;
        cert
    }
}

/// Submitted certificates awaiting inclusion checks.
///
/// Guarded by its own lock so concurrent add-chain tasks in one fan-out burst
/// can offer certificates without holding the hammer's state lock.
#[derive(Debug, Default)]
pub struct PendingCerts {
    ring: Mutex<Ring>,
}

impl PendingCerts {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ring(&self) -> MutexGuard<'_, Ring> {
        // The ring holds no invariants a panicking holder could break halfway.
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `cert` if the queue has room and enough time has passed since
    /// the newest held SCT. `now` is time since the Unix epoch. Returns whether
    /// the certificate was admitted.
    pub fn try_append(&self, now: Duration, mmd: Duration, cert: SubmittedCert) -> bool {
        let mut ring = self.ring();
        if !ring.can_append(now, mmd) {
            return false;
        }
        ring.push(Arc::new(cert));
        true
    }

    /// Removes and returns the oldest certificate if its merge deadline has
    /// passed. Younger certificates are never due before it.
    pub fn pop_if_mmd_passed(&self, now: Duration) -> Option<Arc<SubmittedCert>> {
        let mut ring = self.ring();
        let due = ring
            .oldest()
            .is_some_and(|c| now > Duration::from_millis(c.integrate_by_ms));
        if due {
            ring.pop()
        } else {
            None
        }
    }

    /// Number of held certificates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring().len
    }

    /// Returns true if no certificates are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every held certificate.
    pub fn clear(&self) {
        *self.ring() = Ring::default();
    }

    /// Snapshot of the held certificates, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<SubmittedCert>> {
        let ring = self.ring();
        (0..ring.len)
            .filter_map(|i| ring.slots[(ring.head + i) % SCT_COUNT].clone())
            .collect()
    }
}
