//! Certificate chain synthesis.
//!
//! Every add-chain and add-pre-chain needs a certificate the log has not seen
//! before. [`ChainGenerator`] is the seam; [`SyntheticChainGenerator`] produces
//! opaque DER-shaped blobs that are unique per call, which is all a log needs
//! to assign a fresh leaf.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::merkle::Hash;
use crate::types::Asn1Cert;

/// Errors from chain generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The generator ran out of unique serial numbers.
    #[error("serial numbers exhausted")]
    SerialsExhausted,

    /// The generator could not build a chain.
    #[error("{0}")]
    Generation(String),
}

/// A pre-certificate chain and the TBS certificate the log will merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecertChain {
    /// Pre-certificate first, then the issuing chain.
    pub chain: Vec<Asn1Cert>,
    /// DER-encoded `TBSCertificate` with the poison extension removed.
    pub tbs: Bytes,
}

/// Produces fresh certificate chains for submission.
pub trait ChainGenerator: Send + Sync {
    /// Returns a new certificate chain, leaf first.
    ///
    /// # Errors
    ///
    /// Returns an error if no chain can be produced.
    fn make_cert_chain(&self) -> Result<Vec<Asn1Cert>, ChainError>;

    /// Returns a new pre-certificate chain and its TBS certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if no chain can be produced.
    fn make_precert_chain(&self) -> Result<PrecertChain, ChainError>;

    /// Hash of the issuer's public key, as recorded in pre-certificate leaves.
    fn issuer_key_hash(&self) -> Hash;
}

/// DER tag used for the synthetic certificate envelope (SEQUENCE).
const SEQUENCE_TAG: u8 = 0x30;

/// Marker that distinguishes a synthetic pre-certificate from a certificate.
/// Stripping it from the body yields the TBS certificate.
pub const PRECERT_POISON: &[u8] = b"ct-poison";

/// Generates unique synthetic chains signed by one synthetic CA.
#[derive(Debug)]
pub struct SyntheticChainGenerator {
    subject: String,
    ca_cert: Asn1Cert,
    issuer_key_hash: Hash,
    next_serial: AtomicU64,
}

impl SyntheticChainGenerator {
    /// Creates a generator whose leaves carry `subject`.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        let ca_cert = envelope(b"synthetic root CA", &[]);
        let issuer_key_hash = Sha256::digest(&ca_cert).into();
        Self {
            subject: subject.into(),
            ca_cert,
            issuer_key_hash,
            next_serial: AtomicU64::new(1),
        }
    }

    /// The CA certificate ending every generated chain.
    #[must_use]
    pub fn root(&self) -> Asn1Cert {
        self.ca_cert.clone()
    }

    fn serial(&self) -> Result<u64, ChainError> {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        if serial == u64::MAX {
            return Err(ChainError::SerialsExhausted);
        }
        Ok(serial)
    }

    fn tbs(&self, serial: u64) -> Bytes {
        let mut body = BytesMut::with_capacity(self.subject.len() + 16);
        body.put_u64(serial);
        body.put_slice(self.subject.as_bytes());
        body.freeze()
    }
}

impl Default for SyntheticChainGenerator {
    fn default() -> Self {
        Self::new("ct-hammer")
    }
}

impl ChainGenerator for SyntheticChainGenerator {
    fn make_cert_chain(&self) -> Result<Vec<Asn1Cert>, ChainError> {
        let tbs = self.tbs(self.serial()?);
        Ok(vec![envelope(&tbs, &[]), self.ca_cert.clone()])
    }

    fn make_precert_chain(&self) -> Result<PrecertChain, ChainError> {
        let tbs = self.tbs(self.serial()?);
        Ok(PrecertChain {
            chain: vec![envelope(&tbs, PRECERT_POISON), self.ca_cert.clone()],
            tbs,
        })
    }

    fn issuer_key_hash(&self) -> Hash {
        self.issuer_key_hash
    }
}

/// Wraps `body || trailer` in a definite-length DER SEQUENCE.
fn envelope(body: &[u8], trailer: &[u8]) -> Bytes {
    let len = body.len() + trailer.len();
    let mut out = BytesMut::with_capacity(len + 6);
    out.put_u8(SEQUENCE_TAG);
    if len < 0x80 {
        #[allow(clippy::cast_possible_truncation)] // checked above
        out.put_u8(len as u8);
    } else {
        let be = (len as u64).to_be_bytes();
        let skip = be.iter().take_while(|b| **b == 0).count();
        #[allow(clippy::cast_possible_truncation)] // at most 8 length bytes
        out.put_u8(0x80 | (be.len() - skip) as u8);
        out.put_slice(&be[skip..]);
    }
    out.put_slice(body);
    out.put_slice(trailer);
    out.freeze()
}

/// Recovers the TBS certificate from a synthetic pre-certificate.
///
/// Returns `None` if `precert` was not produced by a
/// [`SyntheticChainGenerator`].
#[must_use]
pub fn synthetic_precert_tbs(precert: &[u8]) -> Option<Bytes> {
    let (&tag, rest) = precert.split_first()?;
    if tag != SEQUENCE_TAG {
        return None;
    }
    let (&first, rest) = rest.split_first()?;
    let content = if first < 0x80 {
        rest
    } else {
        let n = usize::from(first & 0x7f);
        rest.get(n..)?
    };
    content
        .strip_suffix(PRECERT_POISON)
        .map(Bytes::copy_from_slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_chain_is_unique() {
        let generator = SyntheticChainGenerator::default();
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let chain = generator.make_cert_chain().unwrap();
            assert_eq!(chain.len(), 2);
            assert_eq!(chain[1], generator.root());
            assert!(seen.insert(chain[0].clone()));
        }
        for _ in 0..100 {
            let pre = generator.make_precert_chain().unwrap();
            assert!(seen.insert(pre.chain[0].clone()));
        }
    }

    #[test]
    fn test_precert_tbs_recoverable() {
        let generator = SyntheticChainGenerator::default();
        let pre = generator.make_precert_chain().unwrap();
        assert_eq!(synthetic_precert_tbs(&pre.chain[0]), Some(pre.tbs.clone()));

        let cert = generator.make_cert_chain().unwrap();
        assert_eq!(synthetic_precert_tbs(&cert[0]), None);
    }

    #[test]
    fn test_long_subject_uses_long_form_length() {
        let generator = SyntheticChainGenerator::new("x".repeat(300));
        let pre = generator.make_precert_chain().unwrap();
        assert_eq!(pre.chain[0][1], 0x82);
        assert_eq!(synthetic_precert_tbs(&pre.chain[0]), Some(pre.tbs));
    }

    #[test]
    fn test_issuer_key_hash_is_stable() {
        let a = SyntheticChainGenerator::new("a");
        let b = SyntheticChainGenerator::new("b");
        assert_eq!(a.issuer_key_hash(), b.issuer_key_hash());
        assert_eq!(a.issuer_key_hash(), <[u8; 32]>::from(Sha256::digest(&a.root())));
    }
}
