//! RFC 6962 Merkle tree hashing and proofs.
//!
//! Verification follows the iterative algorithms of RFC 9162 sections 2.1.3.2
//! and 2.1.4.2. [`MerkleTree`] produces proofs with the recursive definitions
//! of RFC 6962 section 2.1 and backs the simulated log.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Size of a SHA-256 hash in bytes.
pub const HASH_SIZE: usize = 32;

/// A SHA-256 hash.
pub type Hash = [u8; HASH_SIZE];

/// Domain separation prefix for leaf hashes.
pub const LEAF_PREFIX: u8 = 0x00;

/// Domain separation prefix for interior node hashes.
pub const NODE_PREFIX: u8 = 0x01;

/// Errors from proof verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    /// Leaf index is not inside the tree.
    #[error("leaf index {index} out of range for tree size {tree_size}")]
    IndexOutOfRange {
        /// Claimed leaf index.
        index: u64,
        /// Tree size.
        tree_size: u64,
    },

    /// Proof has the wrong number of nodes for the sizes involved.
    #[error("wrong proof size: got {got}, want {want}")]
    WrongProofSize {
        /// Nodes supplied.
        got: usize,
        /// Nodes expected.
        want: usize,
    },

    /// Tree sizes cannot be related by a consistency proof.
    #[error("invalid tree sizes: {first} -> {second}")]
    InvalidSizes {
        /// Earlier tree size.
        first: u64,
        /// Later tree size.
        second: u64,
    },

    /// Recomputed root does not match the expected root.
    #[error("root mismatch: calculated {calculated}, expected {expected}")]
    RootMismatch {
        /// Hex of the recomputed root.
        calculated: String,
        /// Hex of the expected root.
        expected: String,
    },
}

/// Returns `SHA256(0x00 || data)`.
#[must_use]
pub fn leaf_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().into()
}

/// Returns `SHA256(0x01 || left || right)`.
#[must_use]
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Root hash of the empty tree, `SHA256("")`.
#[must_use]
pub fn empty_root() -> Hash {
    Sha256::digest(b"").into()
}

/// Verifies that `leaf_data` sits at `leaf_index` in the tree of `tree_size`
/// leaves whose root is `root`.
///
/// # Errors
///
/// Returns an error if the index is out of range, the proof has the wrong
/// length, or the recomputed root differs from `root`.
pub fn verify_inclusion_proof(
    leaf_index: u64,
    tree_size: u64,
    proof: &[Hash],
    root: &Hash,
    leaf_data: &[u8],
) -> Result<(), ProofError> {
    let calculated = root_from_inclusion_proof(leaf_index, tree_size, proof, &leaf_hash(leaf_data))?;
    check_root(&calculated, root)
}

/// Recomputes the root implied by an inclusion proof for `leaf`.
///
/// # Errors
///
/// Returns an error if the index is out of range or the proof is too short or
/// too long.
pub fn root_from_inclusion_proof(
    leaf_index: u64,
    tree_size: u64,
    proof: &[Hash],
    leaf: &Hash,
) -> Result<Hash, ProofError> {
    if leaf_index >= tree_size {
        return Err(ProofError::IndexOutOfRange {
            index: leaf_index,
            tree_size,
        });
    }
    let want = inclusion_proof_size(leaf_index, tree_size);
    if proof.len() != want {
        return Err(ProofError::WrongProofSize {
            got: proof.len(),
            want,
        });
    }

    let mut fn_ = leaf_index;
    let mut sn = tree_size - 1;
    let mut r = *leaf;
    for p in proof {
        if fn_ & 1 == 1 || fn_ == sn {
            r = node_hash(p, &r);
            while fn_ & 1 == 0 && fn_ != 0 {
                fn_ >>= 1;
                sn >>= 1;
            }
        } else {
            r = node_hash(&r, p);
        }
        fn_ >>= 1;
        sn >>= 1;
    }
    Ok(r)
}

/// Verifies that the tree of `second` leaves with root `second_root` is an
/// append-only extension of the tree of `first` leaves with root `first_root`.
///
/// # Errors
///
/// Returns an error if the sizes are not ordered, the proof has the wrong
/// shape, or either recomputed root does not match.
pub fn verify_consistency_proof(
    first: u64,
    second: u64,
    first_root: &Hash,
    second_root: &Hash,
    proof: &[Hash],
) -> Result<(), ProofError> {
    if second < first {
        return Err(ProofError::InvalidSizes { first, second });
    }
    if first == second {
        if !proof.is_empty() {
            return Err(ProofError::WrongProofSize {
                got: proof.len(),
                want: 0,
            });
        }
        return check_root(first_root, second_root);
    }
    if first == 0 {
        // Every tree is consistent with the empty tree.
        if !proof.is_empty() {
            return Err(ProofError::WrongProofSize {
                got: proof.len(),
                want: 0,
            });
        }
        return Ok(());
    }
    if proof.is_empty() {
        return Err(ProofError::WrongProofSize { got: 0, want: 1 });
    }

    let mut path: Vec<Hash> = Vec::with_capacity(proof.len() + 1);
    if first.is_power_of_two() {
        path.push(*first_root);
    }
    path.extend_from_slice(proof);

    let mut fn_ = first - 1;
    let mut sn = second - 1;
    while fn_ & 1 == 1 {
        fn_ >>= 1;
        sn >>= 1;
    }

    let mut fr = path[0];
    let mut sr = path[0];
    for c in &path[1..] {
        if sn == 0 {
            return Err(ProofError::WrongProofSize {
                got: proof.len(),
                want: proof.len() - 1,
            });
        }
        if fn_ & 1 == 1 || fn_ == sn {
            fr = node_hash(c, &fr);
            sr = node_hash(c, &sr);
            while fn_ & 1 == 0 && fn_ != 0 {
                fn_ >>= 1;
                sn >>= 1;
            }
        } else {
            sr = node_hash(&sr, c);
        }
        fn_ >>= 1;
        sn >>= 1;
    }

    if sn != 0 {
        return Err(ProofError::WrongProofSize {
            got: proof.len(),
            want: proof.len() + 1,
        });
    }
    check_root(&fr, first_root)?;
    check_root(&sr, second_root)
}

/// Number of nodes in an inclusion proof for `index` in a tree of `size`.
fn inclusion_proof_size(index: u64, size: u64) -> usize {
    // Inner part: levels where the paths to the leaf and the last leaf differ.
    let inner = u64::BITS - (index ^ (size - 1)).leading_zeros();
    // Border part: right-border nodes above the inner part.
    let border = index.checked_shr(inner).unwrap_or(0).count_ones();
    (inner + border) as usize
}

fn check_root(calculated: &Hash, expected: &Hash) -> Result<(), ProofError> {
    if calculated == expected {
        Ok(())
    } else {
        Err(ProofError::RootMismatch {
            calculated: hex::encode(calculated),
            expected: hex::encode(expected),
        })
    }
}

/// An in-memory Merkle tree over leaf hashes.
///
/// Proof generation is recursive over the stored hashes; it is meant for
/// simulation and tests, not for large trees.
#[derive(Debug, Clone, Default)]
pub struct MerkleTree {
    leaves: Vec<Hash>,
}

impl MerkleTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a leaf hash and returns its index.
    pub fn push(&mut self, leaf: Hash) -> u64 {
        self.leaves.push(leaf);
        self.size() - 1
    }

    /// Number of leaves.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.leaves.len() as u64
    }

    /// Returns the leaf hash at `index`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn leaf(&self, index: u64) -> Option<&Hash> {
        self.leaves.get(index as usize)
    }

    /// Root hash of the first `size` leaves.
    ///
    /// Returns `None` if `size` exceeds the number of leaves.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn root_at(&self, size: u64) -> Option<Hash> {
        if size > self.size() {
            return None;
        }
        Some(subtree_root(&self.leaves[..size as usize]))
    }

    /// Root hash of the whole tree.
    #[must_use]
    pub fn root(&self) -> Hash {
        subtree_root(&self.leaves)
    }

    /// Audit path for `index` in the tree of the first `size` leaves.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn inclusion_proof(&self, index: u64, size: u64) -> Option<Vec<Hash>> {
        if index >= size || size > self.size() {
            return None;
        }
        let mut proof = Vec::new();
        path(index as usize, &self.leaves[..size as usize], &mut proof);
        Some(proof)
    }

    /// Consistency proof between the trees of `first` and `second` leaves.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn consistency_proof(&self, first: u64, second: u64) -> Option<Vec<Hash>> {
        if first > second || second > self.size() {
            return None;
        }
        let mut proof = Vec::new();
        if first > 0 && first < second {
            subproof(first as usize, &self.leaves[..second as usize], true, &mut proof);
        }
        Some(proof)
    }
}

/// Largest power of two strictly less than `n` (`n >= 2`).
const fn split_point(n: usize) -> usize {
    let mut k = 1;
    while k << 1 < n {
        k <<= 1;
    }
    k
}

fn subtree_root(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => empty_root(),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            node_hash(&subtree_root(&leaves[..k]), &subtree_root(&leaves[k..]))
        }
    }
}

fn path(m: usize, leaves: &[Hash], out: &mut Vec<Hash>) {
    let n = leaves.len();
    if n <= 1 {
        return;
    }
    let k = split_point(n);
    if m < k {
        path(m, &leaves[..k], out);
        out.push(subtree_root(&leaves[k..]));
    } else {
        path(m - k, &leaves[k..], out);
        out.push(subtree_root(&leaves[..k]));
    }
}

fn subproof(m: usize, leaves: &[Hash], complete: bool, out: &mut Vec<Hash>) {
    let n = leaves.len();
    if m == n {
        if !complete {
            out.push(subtree_root(leaves));
        }
        return;
    }
    let k = split_point(n);
    if m <= k {
        subproof(m, &leaves[..k], complete, out);
        out.push(subtree_root(&leaves[k..]));
    } else {
        subproof(m - k, &leaves[k..], false, out);
        out.push(subtree_root(&leaves[..k]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(n: u64) -> MerkleTree {
        let mut tree = MerkleTree::new();
        for i in 0..n {
            tree.push(leaf_hash(&i.to_be_bytes()));
        }
        tree
    }

    #[test]
    fn test_empty_root_is_sha256_of_nothing() {
        assert_eq!(
            hex::encode(empty_root()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(MerkleTree::new().root(), empty_root());
    }

    #[test]
    fn test_two_leaf_root() {
        let t = tree(2);
        let expected = node_hash(t.leaf(0).unwrap(), t.leaf(1).unwrap());
        assert_eq!(t.root(), expected);
    }

    #[test]
    fn test_inclusion_proofs_verify_for_all_sizes() {
        let t = tree(17);
        for size in 1..=17 {
            let root = t.root_at(size).unwrap();
            for index in 0..size {
                let proof = t.inclusion_proof(index, size).unwrap();
                verify_inclusion_proof(index, size, &proof, &root, &index.to_be_bytes())
                    .unwrap_or_else(|e| panic!("index {index} size {size}: {e}"));
            }
        }
    }

    #[test]
    fn test_inclusion_rejects_wrong_leaf() {
        let t = tree(8);
        let proof = t.inclusion_proof(3, 8).unwrap();
        let err = verify_inclusion_proof(3, 8, &proof, &t.root(), b"not the leaf").unwrap_err();
        assert!(matches!(err, ProofError::RootMismatch { .. }));
    }

    #[test]
    fn test_inclusion_rejects_bad_index_and_length() {
        let t = tree(5);
        let proof = t.inclusion_proof(1, 5).unwrap();
        assert!(matches!(
            verify_inclusion_proof(5, 5, &proof, &t.root(), &1u64.to_be_bytes()),
            Err(ProofError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            verify_inclusion_proof(1, 5, &proof[1..], &t.root(), &1u64.to_be_bytes()),
            Err(ProofError::WrongProofSize { .. })
        ));
    }

    #[test]
    fn test_consistency_proofs_verify_for_all_sizes() {
        let t = tree(13);
        for second in 1..=13 {
            for first in 1..=second {
                let proof = t.consistency_proof(first, second).unwrap();
                verify_consistency_proof(
                    first,
                    second,
                    &t.root_at(first).unwrap(),
                    &t.root_at(second).unwrap(),
                    &proof,
                )
                .unwrap_or_else(|e| panic!("{first} -> {second}: {e}"));
            }
        }
    }

    #[test]
    fn test_consistency_rejects_tampered_proof() {
        let t = tree(10);
        let mut proof = t.consistency_proof(3, 10).unwrap();
        proof[0][0] ^= 0xff;
        let err = verify_consistency_proof(
            3,
            10,
            &t.root_at(3).unwrap(),
            &t.root(),
            &proof,
        )
        .unwrap_err();
        assert!(matches!(err, ProofError::RootMismatch { .. }));
    }

    #[test]
    fn test_consistency_rejects_shrinking_tree() {
        let t = tree(4);
        assert_eq!(
            verify_consistency_proof(4, 2, &t.root(), &t.root_at(2).unwrap(), &[]),
            Err(ProofError::InvalidSizes { first: 4, second: 2 })
        );
    }

    #[test]
    fn test_proof_requests_outside_tree() {
        let t = tree(3);
        assert!(t.inclusion_proof(3, 3).is_none());
        assert!(t.inclusion_proof(0, 4).is_none());
        assert!(t.consistency_proof(2, 4).is_none());
        assert_eq!(t.consistency_proof(2, 2), Some(Vec::new()));
    }
}
