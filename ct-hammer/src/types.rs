//! Certificate Transparency data structures.
//!
//! Only the pieces the hammer needs are modelled: tree heads, SCTs, log entries
//! and the `MerkleTreeLeaf` structure whose TLS encoding is hashed into the log.
//!
//! `MerkleTreeLeaf` layout (RFC 6962 section 3.4):
//! ```text
//! [0]       version: u8            - v1(0)
//! [1]       leaf_type: u8          - timestamped_entry(0)
//! [2..10]   timestamp: u64         - milliseconds since the Unix epoch
//! [10..12]  entry_type: u16        - x509_entry(0) | precert_entry(1)
//! x509:     cert: opaque<1..2^24-1>
//! precert:  issuer_key_hash[32], tbs_certificate: opaque<1..2^24-1>
//! [..]      extensions: opaque<0..2^16-1>
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::merkle::{self, Hash, HASH_SIZE};

/// A DER-encoded certificate as carried in chains.
pub type Asn1Cert = Bytes;

/// Maximum length of a 24-bit length-prefixed opaque field.
const OPAQUE24_MAX: usize = (1 << 24) - 1;

/// Maximum length of a 16-bit length-prefixed opaque field.
const OPAQUE16_MAX: usize = (1 << 16) - 1;

/// Errors that can occur when encoding or decoding CT structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input ended before the structure was complete.
    #[error("truncated {field}: need {needed} bytes, have {available}")]
    Truncated {
        /// Field being decoded.
        field: &'static str,
        /// Bytes required.
        needed: usize,
        /// Bytes remaining.
        available: usize,
    },

    /// A variable-length field is outside its allowed length range.
    #[error("{field} length {len} outside [{min}, {max}]")]
    BadLength {
        /// Field being encoded or decoded.
        field: &'static str,
        /// Offending length.
        len: usize,
        /// Minimum allowed length.
        min: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// The entry type is not one this codec understands.
    #[error("unknown log entry type {0}")]
    UnknownEntryType(u16),

    /// Bytes remained after the structure was decoded.
    #[error("{0} trailing bytes after leaf")]
    TrailingData(usize),
}

/// Structure version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version(pub u8);

impl Version {
    /// Version 1 (encoded as 0).
    pub const V1: Self = Self(0);
}

/// Merkle leaf type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafType(pub u8);

impl LeafType {
    /// `timestamped_entry` (encoded as 0).
    pub const TIMESTAMPED_ENTRY: Self = Self(0);
}

/// Type of the certificate carried in a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEntryType(pub u16);

impl LogEntryType {
    /// An X.509 certificate.
    pub const X509: Self = Self(0);
    /// A pre-certificate.
    pub const PRECERT: Self = Self(1);
}

impl fmt::Display for LogEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::X509 => f.write_str("X509LogEntryType"),
            Self::PRECERT => f.write_str("PrecertLogEntryType"),
            Self(other) => write!(f, "LogEntryType({other})"),
        }
    }
}

/// A signed tree head as returned by get-sth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTreeHead {
    /// Number of entries in the tree.
    pub tree_size: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Merkle tree root hash.
    pub sha256_root_hash: Hash,
    /// Log signature over the tree head.
    pub tree_head_signature: Bytes,
}

/// A signed certificate timestamp as returned by add-chain and add-pre-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCertificateTimestamp {
    /// SCT version.
    pub version: Version,
    /// SHA-256 hash of the log's public key.
    pub log_id: Hash,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// CT extensions, copied verbatim into the Merkle leaf.
    pub extensions: Bytes,
    /// Log signature.
    pub signature: Bytes,
}

/// Pre-certificate portion of a timestamped entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreCert {
    /// SHA-256 of the issuer's `SubjectPublicKeyInfo`.
    pub issuer_key_hash: Hash,
    /// DER-encoded `TBSCertificate`.
    pub tbs_certificate: Bytes,
}

/// Certificate payload of a timestamped entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedEntry {
    /// Final certificate.
    X509(Asn1Cert),
    /// Pre-certificate.
    Precert(PreCert),
}

impl SignedEntry {
    /// Returns the entry type tag for this payload.
    #[must_use]
    pub const fn entry_type(&self) -> LogEntryType {
        match self {
            Self::X509(_) => LogEntryType::X509,
            Self::Precert(_) => LogEntryType::PRECERT,
        }
    }
}

/// The timestamped entry hashed into a Merkle leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedEntry {
    /// SCT timestamp in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// The certificate or pre-certificate.
    pub entry: SignedEntry,
    /// SCT extensions.
    pub extensions: Bytes,
}

/// A Merkle tree leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTreeLeaf {
    /// Structure version.
    pub version: Version,
    /// Leaf type.
    pub leaf_type: LeafType,
    /// Timestamped entry.
    pub timestamped_entry: TimestampedEntry,
}

impl MerkleTreeLeaf {
    /// Builds the v1 leaf for a certificate accepted with `sct`.
    #[must_use]
    pub fn for_cert(sct: &SignedCertificateTimestamp, cert: Asn1Cert) -> Self {
        Self::new(sct, SignedEntry::X509(cert))
    }

    /// Builds the v1 leaf for a pre-certificate accepted with `sct`.
    #[must_use]
    pub fn for_precert(
        sct: &SignedCertificateTimestamp,
        issuer_key_hash: Hash,
        tbs_certificate: Bytes,
    ) -> Self {
        Self::new(
            sct,
            SignedEntry::Precert(PreCert {
                issuer_key_hash,
                tbs_certificate,
            }),
        )
    }

    fn new(sct: &SignedCertificateTimestamp, entry: SignedEntry) -> Self {
        Self {
            version: Version::V1,
            leaf_type: LeafType::TIMESTAMPED_ENTRY,
            timestamped_entry: TimestampedEntry {
                timestamp: sct.timestamp,
                entry,
                extensions: sct.extensions.clone(),
            },
        }
    }

    /// TLS-encodes the leaf.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable-length field exceeds its length limit.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let ts = &self.timestamped_entry;
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(self.version.0);
        buf.put_u8(self.leaf_type.0);
        buf.put_u64(ts.timestamp);
        buf.put_u16(ts.entry.entry_type().0);
        match &ts.entry {
            SignedEntry::X509(cert) => put_opaque24(&mut buf, "certificate", cert)?,
            SignedEntry::Precert(pre) => {
                buf.put_slice(&pre.issuer_key_hash);
                put_opaque24(&mut buf, "tbs_certificate", &pre.tbs_certificate)?;
            }
        }
        put_opaque16(&mut buf, "extensions", &ts.extensions)?;
        Ok(buf.freeze())
    }

    /// Decodes a TLS-encoded leaf.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is truncated, carries an unknown entry
    /// type or has trailing bytes.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut buf = data;
        need(&buf, "leaf header", 12)?;
        let version = Version(buf.get_u8());
        let leaf_type = LeafType(buf.get_u8());
        let timestamp = buf.get_u64();
        let entry_type = LogEntryType(buf.get_u16());

        let entry = match entry_type {
            LogEntryType::X509 => SignedEntry::X509(get_opaque24(&mut buf, "certificate")?),
            LogEntryType::PRECERT => {
                need(&buf, "issuer_key_hash", HASH_SIZE)?;
                let mut issuer_key_hash = [0u8; HASH_SIZE];
                buf.copy_to_slice(&mut issuer_key_hash);
                let tbs_certificate = get_opaque24(&mut buf, "tbs_certificate")?;
                SignedEntry::Precert(PreCert {
                    issuer_key_hash,
                    tbs_certificate,
                })
            }
            LogEntryType(other) => return Err(CodecError::UnknownEntryType(other)),
        };
        let extensions = get_opaque16(&mut buf, "extensions")?;

        if buf.has_remaining() {
            return Err(CodecError::TrailingData(buf.remaining()));
        }

        Ok(Self {
            version,
            leaf_type,
            timestamped_entry: TimestampedEntry {
                timestamp,
                entry,
                extensions,
            },
        })
    }
}

/// A raw entry as returned by get-entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// TLS-encoded `MerkleTreeLeaf`.
    pub leaf_input: Bytes,
    /// Chain data accompanying the leaf.
    pub extra_data: Bytes,
}

impl LogEntry {
    /// Decodes the Merkle leaf carried by this entry.
    ///
    /// # Errors
    ///
    /// Returns an error if `leaf_input` is not a well-formed leaf.
    pub fn leaf(&self) -> Result<MerkleTreeLeaf, CodecError> {
        MerkleTreeLeaf::decode(&self.leaf_input)
    }

    /// Returns the RFC 6962 leaf hash of this entry.
    #[must_use]
    pub fn leaf_hash(&self) -> Hash {
        merkle::leaf_hash(&self.leaf_input)
    }
}

/// An inclusion proof as returned by get-proof-by-hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionProof {
    /// Index of the leaf in the tree.
    pub leaf_index: u64,
    /// Audit path from the leaf to the root.
    pub audit_path: Vec<Hash>,
}

fn need(buf: &&[u8], field: &'static str, needed: usize) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::Truncated {
            field,
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn put_opaque24(buf: &mut BytesMut, field: &'static str, data: &[u8]) -> Result<(), CodecError> {
    if data.is_empty() || data.len() > OPAQUE24_MAX {
        return Err(CodecError::BadLength {
            field,
            len: data.len(),
            min: 1,
            max: OPAQUE24_MAX,
        });
    }
    // Length checked above, so it fits in three bytes.
    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u32;
    buf.put_uint(u64::from(len), 3);
    buf.put_slice(data);
    Ok(())
}

fn put_opaque16(buf: &mut BytesMut, field: &'static str, data: &[u8]) -> Result<(), CodecError> {
    let len = u16::try_from(data.len()).map_err(|_| CodecError::BadLength {
        field,
        len: data.len(),
        min: 0,
        max: OPAQUE16_MAX,
    })?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

#[allow(clippy::cast_possible_truncation)] // 24-bit length always fits in usize.
fn get_opaque24(buf: &mut &[u8], field: &'static str) -> Result<Bytes, CodecError> {
    need(buf, field, 3)?;
    let len = buf.get_uint(3) as usize;
    if len == 0 {
        return Err(CodecError::BadLength {
            field,
            len,
            min: 1,
            max: OPAQUE24_MAX,
        });
    }
    need(buf, field, len)?;
    Ok(buf.copy_to_bytes(len))
}

fn get_opaque16(buf: &mut &[u8], field: &'static str) -> Result<Bytes, CodecError> {
    need(buf, field, 2)?;
    let len = usize::from(buf.get_u16());
    need(buf, field, len)?;
    Ok(buf.copy_to_bytes(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sct(timestamp: u64) -> SignedCertificateTimestamp {
        SignedCertificateTimestamp {
            version: Version::V1,
            log_id: [7u8; HASH_SIZE],
            timestamp,
            extensions: Bytes::new(),
            signature: Bytes::new(),
        }
    }

    #[test]
    fn test_cert_leaf_layout() {
        let leaf = MerkleTreeLeaf::for_cert(&sct(0x0102), Bytes::from_static(b"cert"));
        let encoded = leaf.encode().unwrap();

        let mut expected = vec![0u8, 0];
        expected.extend_from_slice(&0x0102u64.to_be_bytes());
        expected.extend_from_slice(&[0, 0]);
        expected.extend_from_slice(&[0, 0, 4]);
        expected.extend_from_slice(b"cert");
        expected.extend_from_slice(&[0, 0]);
        assert_eq!(encoded.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_precert_leaf_decodes() {
        let mut with_ext = sct(99);
        with_ext.extensions = Bytes::from_static(b"ext");
        let leaf = MerkleTreeLeaf::for_precert(&with_ext, [3u8; HASH_SIZE], Bytes::from_static(b"tbs"));
        let decoded = MerkleTreeLeaf::decode(&leaf.encode().unwrap()).unwrap();

        assert_eq!(decoded, leaf);
        assert_eq!(decoded.timestamped_entry.entry.entry_type(), LogEntryType::PRECERT);
        assert_eq!(decoded.timestamped_entry.extensions.as_ref(), b"ext");
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let leaf = MerkleTreeLeaf::for_cert(&sct(5), Bytes::from_static(b"certificate"));
        let encoded = leaf.encode().unwrap();
        let err = MerkleTreeLeaf::decode(&encoded[..encoded.len() - 4]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn test_decode_rejects_unknown_entry_type() {
        let mut raw = vec![0u8, 0];
        raw.extend_from_slice(&1u64.to_be_bytes());
        raw.extend_from_slice(&7u16.to_be_bytes());
        assert_eq!(
            MerkleTreeLeaf::decode(&raw).unwrap_err(),
            CodecError::UnknownEntryType(7)
        );
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let leaf = MerkleTreeLeaf::for_cert(&sct(5), Bytes::from_static(b"c"));
        let mut raw = leaf.encode().unwrap().to_vec();
        raw.push(0xff);
        assert_eq!(
            MerkleTreeLeaf::decode(&raw).unwrap_err(),
            CodecError::TrailingData(1)
        );
    }

    #[test]
    fn test_empty_cert_rejected() {
        let leaf = MerkleTreeLeaf::for_cert(&sct(5), Bytes::new());
        assert!(matches!(leaf.encode(), Err(CodecError::BadLength { .. })));
    }

    #[test]
    fn test_entry_type_display() {
        assert_eq!(LogEntryType::X509.to_string(), "X509LogEntryType");
        assert_eq!(LogEntryType(9).to_string(), "LogEntryType(9)");
    }
}
