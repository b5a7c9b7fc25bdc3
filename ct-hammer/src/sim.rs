//! In-memory simulated CT log.
//!
//! [`SimulatedLog`] answers the [`LogClient`] API from a Merkle tree held in
//! memory. Submissions are staged and merged into the tree on the next get-sth
//! once they are older than the configured merge delay. Seeded fault injection
//! makes calls fail or proofs come back corrupted, so retry and verification
//! paths can be exercised deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::chain::{synthetic_precert_tbs, SyntheticChainGenerator};
use crate::client::{ClientError, ClientResult, LogClient};
use crate::clock::Clock;
use crate::merkle::{Hash, MerkleTree};
use crate::operation::Entrypoint;
use crate::types::{
    Asn1Cert, InclusionProof, LogEntry, MerkleTreeLeaf, SignedCertificateTimestamp,
    SignedTreeHead, Version,
};

/// Largest range served by one get-entries call.
const MAX_GET_ENTRIES: u64 = 256;

/// Simulated log behaviour.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Seed for fault injection.
    pub seed: u64,
    /// Probability in `[0, 1]` that any call fails with a transport error.
    /// Out-of-range values are clamped and non-finite values count as zero.
    pub error_rate: f64,
    /// Probability in `[0, 1]` that a returned proof has a flipped bit.
    pub corrupt_proof_rate: f64,
    /// How long a submission stays staged before get-sth merges it.
    pub merge_delay: Duration,
    /// Delay before every response.
    pub latency: Duration,
    /// Accepted root certificates.
    pub roots: Vec<Asn1Cert>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            error_rate: 0.0,
            corrupt_proof_rate: 0.0,
            merge_delay: Duration::ZERO,
            latency: Duration::ZERO,
            roots: vec![SyntheticChainGenerator::default().root()],
        }
    }
}

struct Staged {
    entry: LogEntry,
    timestamp: u64,
}

struct LogState {
    tree: MerkleTree,
    entries: Vec<LogEntry>,
    index_by_hash: HashMap<Hash, u64>,
    staged: Vec<Staged>,
    rng: ChaCha8Rng,
    fail_next: u64,
}

/// An in-memory CT log implementing [`LogClient`].
pub struct SimulatedLog {
    config: SimConfig,
    clock: Arc<dyn Clock>,
    log_id: Hash,
    state: Mutex<LogState>,
    calls: [AtomicU64; Entrypoint::COUNT],
}

impl SimulatedLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new(mut config: SimConfig, clock: Arc<dyn Clock>) -> Self {
        config.error_rate = probability(config.error_rate);
        config.corrupt_proof_rate = probability(config.corrupt_proof_rate);
        let log_id = Sha256::digest(config.seed.to_be_bytes()).into();
        let state = LogState {
            tree: MerkleTree::new(),
            entries: Vec::new(),
            index_by_hash: HashMap::new(),
            staged: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            fail_next: 0,
        };
        Self {
            config,
            clock,
            log_id,
            state: Mutex::new(state),
            calls: Default::default(),
        }
    }

    /// Makes the next `n` calls fail with a transport error.
    pub fn inject_failures(&self, n: u64) {
        self.state().fail_next += n;
    }

    /// Number of calls received for `ep`, including failed ones.
    #[must_use]
    pub fn calls(&self, ep: Entrypoint) -> u64 {
        self.calls[ep.index()].load(Ordering::Relaxed)
    }

    /// Number of calls received across all entry points.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.calls.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Number of merged entries.
    #[must_use]
    pub fn tree_size(&self) -> u64 {
        self.state().tree.size()
    }

    /// Number of accepted but unmerged submissions.
    #[must_use]
    pub fn staged(&self) -> usize {
        self.state().staged.len()
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts the call, waits out the latency and rolls for an injected fault.
    async fn begin(&self, ep: Entrypoint) -> ClientResult<()> {
        self.calls[ep.index()].fetch_add(1, Ordering::Relaxed);
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
        let mut state = self.state();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ClientError::Transport(format!("injected {ep} failure")));
        }
        if state.rng.gen_bool(self.config.error_rate) {
            return Err(ClientError::Transport(format!("simulated {ep} failure")));
        }
        Ok(())
    }

    fn maybe_corrupt(&self, state: &mut LogState, proof: &mut [Hash]) {
        if proof.is_empty() || !state.rng.gen_bool(self.config.corrupt_proof_rate) {
            return;
        }
        let node = state.rng.gen_range(0..proof.len());
        let byte = state.rng.gen_range(0..proof[node].len());
        proof[node][byte] ^= 0x01;
        trace!(node, byte, "corrupted proof");
    }

    fn sct(&self) -> SignedCertificateTimestamp {
        let timestamp = self.clock.now_ms();
        SignedCertificateTimestamp {
            version: Version::V1,
            log_id: self.log_id,
            timestamp,
            extensions: Bytes::new(),
            signature: Bytes::copy_from_slice(&Sha256::digest(timestamp.to_be_bytes())),
        }
    }

    fn stage(&self, leaf: &MerkleTreeLeaf, chain: &[Asn1Cert], timestamp: u64) -> ClientResult<()> {
        let leaf_input = leaf
            .encode()
            .map_err(|e| ClientError::Http {
                status: 400,
                body: e.to_string(),
            })?;
        let extra_data = chain.iter().skip(1).flat_map(|c| c.iter().copied()).collect();
        self.state().staged.push(Staged {
            entry: LogEntry {
                leaf_input,
                extra_data,
            },
            timestamp,
        });
        Ok(())
    }

    /// Merges staged submissions old enough to be merged.
    #[allow(clippy::cast_possible_truncation)]
    fn integrate(&self, state: &mut LogState, now_ms: u64) {
        let delay_ms = self.config.merge_delay.as_millis() as u64;
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.staged)
            .into_iter()
            .partition(|s| s.timestamp.saturating_add(delay_ms) <= now_ms);
        state.staged = waiting;
        for staged in ready {
            let hash = staged.entry.leaf_hash();
            let index = state.tree.push(hash);
            state.index_by_hash.entry(hash).or_insert(index);
            state.entries.push(staged.entry);
        }
    }
}

/// Clamps a configured rate to `[0, 1]`. NaN and infinities disable the fault.
fn probability(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn bad_request(body: impl Into<String>) -> ClientError {
    ClientError::Http {
        status: 400,
        body: body.into(),
    }
}

#[async_trait]
impl LogClient for SimulatedLog {
    async fn add_chain(&self, chain: &[Asn1Cert]) -> ClientResult<SignedCertificateTimestamp> {
        self.begin(Entrypoint::AddChain).await?;
        let cert = chain.first().ok_or_else(|| bad_request("empty chain"))?;
        let sct = self.sct();
        let leaf = MerkleTreeLeaf::for_cert(&sct, cert.clone());
        self.stage(&leaf, chain, sct.timestamp)?;
        Ok(sct)
    }

    async fn add_pre_chain(&self, chain: &[Asn1Cert]) -> ClientResult<SignedCertificateTimestamp> {
        self.begin(Entrypoint::AddPreChain).await?;
        let (precert, issuer) = match chain {
            [precert, issuer, ..] => (precert, issuer),
            _ => return Err(bad_request("pre-certificate chain needs an issuer")),
        };
        let tbs = synthetic_precert_tbs(precert).ok_or_else(|| bad_request("not a pre-certificate"))?;
        let issuer_key_hash = Sha256::digest(issuer).into();
        let sct = self.sct();
        let leaf = MerkleTreeLeaf::for_precert(&sct, issuer_key_hash, tbs);
        self.stage(&leaf, chain, sct.timestamp)?;
        Ok(sct)
    }

    async fn get_sth(&self) -> ClientResult<SignedTreeHead> {
        self.begin(Entrypoint::GetSth).await?;
        let now_ms = self.clock.now_ms();
        let mut state = self.state();
        self.integrate(&mut state, now_ms);
        let root = state.tree.root();
        Ok(SignedTreeHead {
            tree_size: state.tree.size(),
            timestamp: now_ms,
            sha256_root_hash: root,
            tree_head_signature: Bytes::copy_from_slice(&Sha256::digest(root)),
        })
    }

    async fn get_sth_consistency(&self, first: u64, second: u64) -> ClientResult<Vec<Hash>> {
        self.begin(Entrypoint::GetSthConsistency).await?;
        let mut state = self.state();
        let mut proof = state
            .tree
            .consistency_proof(first, second)
            .ok_or_else(|| bad_request(format!("invalid tree sizes {first} -> {second}")))?;
        self.maybe_corrupt(&mut state, &mut proof);
        Ok(proof)
    }

    async fn get_proof_by_hash(&self, leaf_hash: &Hash, tree_size: u64) -> ClientResult<InclusionProof> {
        self.begin(Entrypoint::GetProofByHash).await?;
        let mut state = self.state();
        let leaf_index = state
            .index_by_hash
            .get(leaf_hash)
            .copied()
            .filter(|index| *index < tree_size)
            .ok_or_else(|| ClientError::Http {
                status: 404,
                body: format!("no leaf {} in tree of size {tree_size}", hex::encode(leaf_hash)),
            })?;
        let mut audit_path = state
            .tree
            .inclusion_proof(leaf_index, tree_size)
            .ok_or_else(|| bad_request(format!("tree size {tree_size} beyond current tree")))?;
        self.maybe_corrupt(&mut state, &mut audit_path);
        Ok(InclusionProof {
            leaf_index,
            audit_path,
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    async fn get_entries(&self, start: u64, end: u64) -> ClientResult<Vec<LogEntry>> {
        self.begin(Entrypoint::GetEntries).await?;
        let state = self.state();
        let size = state.tree.size();
        if start > end || start >= size {
            return Err(bad_request(format!(
                "invalid range {start}..={end} for tree of size {size}"
            )));
        }
        let end = end.min(size - 1).min(start + MAX_GET_ENTRIES - 1);
        Ok(state.entries[start as usize..=end as usize].to_vec())
    }

    async fn get_accepted_roots(&self) -> ClientResult<Vec<Asn1Cert>> {
        self.begin(Entrypoint::GetRoots).await?;
        Ok(self.config.roots.clone())
    }
}

impl std::fmt::Debug for SimulatedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedLog")
            .field("config", &self.config)
            .field("log_id", &hex::encode(self.log_id))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainGenerator;
    use crate::clock::ManualClock;
    use crate::merkle;

    fn log(config: SimConfig) -> (SimulatedLog, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(5_000));
        (SimulatedLog::new(config, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_submissions_merge_on_get_sth() {
        let (log, _) = log(SimConfig::default());
        let chains = SyntheticChainGenerator::default();
        for _ in 0..3 {
            log.add_chain(&chains.make_cert_chain().unwrap()).await.unwrap();
        }
        assert_eq!(log.staged(), 3);
        assert_eq!(log.tree_size(), 0);

        let sth = log.get_sth().await.unwrap();
        assert_eq!(sth.tree_size, 3);
        assert_eq!(log.staged(), 0);
        assert_eq!(log.calls(Entrypoint::AddChain), 3);
        assert_eq!(log.calls(Entrypoint::GetSth), 1);
    }

    #[tokio::test]
    async fn test_merge_delay_holds_back_young_submissions() {
        let (log, clock) = log(SimConfig {
            merge_delay: Duration::from_secs(10),
            ..SimConfig::default()
        });
        let chains = SyntheticChainGenerator::default();
        log.add_chain(&chains.make_cert_chain().unwrap()).await.unwrap();
        assert_eq!(log.get_sth().await.unwrap().tree_size, 0);
        clock.advance(Duration::from_secs(10));
        assert_eq!(log.get_sth().await.unwrap().tree_size, 1);
    }

    #[tokio::test]
    async fn test_inclusion_proof_for_submitted_precert() {
        let (log, _) = log(SimConfig::default());
        let chains = SyntheticChainGenerator::default();
        log.add_chain(&chains.make_cert_chain().unwrap()).await.unwrap();
        let pre = chains.make_precert_chain().unwrap();
        let sct = log.add_pre_chain(&pre.chain).await.unwrap();
        let sth = log.get_sth().await.unwrap();

        let leaf = MerkleTreeLeaf::for_precert(&sct, chains.issuer_key_hash(), pre.tbs);
        let leaf_data = leaf.encode().unwrap();
        let proof = log
            .get_proof_by_hash(&merkle::leaf_hash(&leaf_data), sth.tree_size)
            .await
            .unwrap();
        assert_eq!(proof.leaf_index, 1);
        merkle::verify_inclusion_proof(
            proof.leaf_index,
            sth.tree_size,
            &proof.audit_path,
            &sth.sha256_root_hash,
            &leaf_data,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_hash_is_not_found() {
        let (log, _) = log(SimConfig::default());
        let err = log.get_proof_by_hash(&[7u8; 32], 0).await.unwrap_err();
        assert!(matches!(err, ClientError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_injected_failures_then_recovery() {
        let (log, _) = log(SimConfig::default());
        log.inject_failures(2);
        assert!(matches!(log.get_sth().await, Err(ClientError::Transport(_))));
        assert!(matches!(log.get_accepted_roots().await, Err(ClientError::Transport(_))));
        assert_eq!(log.get_accepted_roots().await.unwrap().len(), 1);
        assert_eq!(log.calls(Entrypoint::GetRoots), 2);
    }

    #[tokio::test]
    async fn test_corrupted_consistency_proof_fails_verification() {
        let (log, _) = log(SimConfig {
            corrupt_proof_rate: 1.0,
            ..SimConfig::default()
        });
        let chains = SyntheticChainGenerator::default();
        for _ in 0..3 {
            log.add_chain(&chains.make_cert_chain().unwrap()).await.unwrap();
        }
        let old = log.get_sth().await.unwrap();
        for _ in 0..4 {
            log.add_chain(&chains.make_cert_chain().unwrap()).await.unwrap();
        }
        let new = log.get_sth().await.unwrap();

        let proof = log
            .get_sth_consistency(old.tree_size, new.tree_size)
            .await
            .unwrap();
        assert!(merkle::verify_consistency_proof(
            old.tree_size,
            new.tree_size,
            &old.sha256_root_hash,
            &new.sha256_root_hash,
            &proof,
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_get_entries_range_checks() {
        let (log, _) = log(SimConfig::default());
        let chains = SyntheticChainGenerator::default();
        for _ in 0..4 {
            log.add_chain(&chains.make_cert_chain().unwrap()).await.unwrap();
        }
        log.get_sth().await.unwrap();

        let entries = log.get_entries(1, 10).await.unwrap();
        assert_eq!(entries.len(), 3);
        for entry in &entries {
            assert_eq!(entry.leaf().unwrap().version, Version::V1);
        }
        assert!(log.get_entries(4, 5).await.is_err());
        assert!(log.get_entries(2, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_plain_cert_as_precert() {
        let (log, _) = log(SimConfig::default());
        let chains = SyntheticChainGenerator::default();
        let chain = chains.make_cert_chain().unwrap();
        assert!(matches!(
            log.add_pre_chain(&chain).await,
            Err(ClientError::Http { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_non_finite_rates_disable_faults() {
        let (log, _) = log(SimConfig {
            error_rate: f64::NAN,
            corrupt_proof_rate: f64::INFINITY,
            ..SimConfig::default()
        });
        let chains = SyntheticChainGenerator::default();
        log.add_chain(&chains.make_cert_chain().unwrap()).await.unwrap();
        let old = log.get_sth().await.unwrap();
        for _ in 0..2 {
            log.add_chain(&chains.make_cert_chain().unwrap()).await.unwrap();
        }
        let new = log.get_sth().await.unwrap();

        let proof = log
            .get_sth_consistency(old.tree_size, new.tree_size)
            .await
            .unwrap();
        merkle::verify_consistency_proof(
            old.tree_size,
            new.tree_size,
            &old.sha256_root_hash,
            &new.sha256_root_hash,
            &proof,
        )
        .unwrap();
    }

    #[test]
    fn test_probability_clamps_rates() {
        assert!((probability(0.25) - 0.25).abs() < f64::EPSILON);
        assert!((probability(-1.0)).abs() < f64::EPSILON);
        assert!((probability(3.0) - 1.0).abs() < f64::EPSILON);
        assert!(probability(f64::NAN).abs() < f64::EPSILON);
        assert!(probability(f64::NEG_INFINITY).abs() < f64::EPSILON);
    }
}
