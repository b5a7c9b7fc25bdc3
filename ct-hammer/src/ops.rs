//! Per-entrypoint operation executors.
//!
//! Each executor performs one scheduled operation against the log and checks
//! what comes back. An executor either succeeds with an HTTP-like status,
//! signals [`OpError::Skip`] when its preconditions are not met yet, or fails.

use std::sync::Arc;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::chain::ChainError;
use crate::client::cancellable;
use crate::error::OpError;
use crate::fanout::add_multiple;
use crate::hammer::{HammerState, Shared};
use crate::history::STH_COUNT;
use crate::merkle;
use crate::operation::Entrypoint;
use crate::pending::SubmittedCert;
use crate::stats::{STATUS_NOT_IMPLEMENTED, STATUS_OK};
use crate::types::{LeafType, LogEntryType, MerkleTreeLeaf, SignedTreeHead, Version};

/// Largest number of entries fetched by one get-entries round.
const MAX_ENTRIES_PER_FETCH: u64 = 9;

/// Runs the executor for `ep`.
pub(crate) async fn perform(
    ep: Entrypoint,
    shared: &Arc<Shared>,
    state: &mut HammerState,
    cancel: &CancellationToken,
) -> Result<u16, OpError> {
    match ep {
        Entrypoint::AddChain | Entrypoint::AddPreChain => {
            let precert = ep == Entrypoint::AddPreChain;
            let fan_shared = Arc::clone(shared);
            let fan_cancel = cancel.clone();
            add_multiple(shared.config.max_parallel_chains, &mut state.rng, move || {
                let shared = Arc::clone(&fan_shared);
                let cancel = fan_cancel.clone();
                async move {
                    if precert {
                        add_pre_chain(&shared, &cancel).await
                    } else {
                        add_chain(&shared, &cancel).await
                    }
                }
            })
            .await?;
        }
        Entrypoint::GetSth => get_sth(shared, state, cancel).await?,
        Entrypoint::GetSthConsistency => get_sth_consistency(shared, state, cancel).await?,
        Entrypoint::GetProofByHash => get_proof_by_hash(shared, cancel).await?,
        Entrypoint::GetEntries => get_entries(shared, state, cancel).await?,
        Entrypoint::GetRoots => get_roots(shared, cancel).await?,
        Entrypoint::GetEntryAndProof => return Ok(STATUS_NOT_IMPLEMENTED),
    }
    Ok(STATUS_OK)
}

async fn add_chain(shared: &Shared, cancel: &CancellationToken) -> Result<(), OpError> {
    let prefix = &shared.config.log_prefix;
    let chain = shared.chains.make_cert_chain()?;
    let cert = chain
        .first()
        .cloned()
        .ok_or_else(|| ChainError::Generation("empty certificate chain".to_string()))?;

    let client = shared.pool.next();
    let sct = cancellable(cancel, client.add_chain(&chain))
        .await
        .map_err(|e| OpError::client("failed to add-chain", e))?;
    debug!(prefix = %prefix, timestamp = sct.timestamp, "uploaded cert, got SCT");

    let leaf = MerkleTreeLeaf::for_cert(&sct, cert);
    let leaf_data = leaf
        .encode()
        .map_err(|e| OpError::codec("failed to serialize leaf", e))?;
    offer(shared, SubmittedCert::new(leaf_data, sct, shared.config.mmd(), false));
    Ok(())
}

async fn add_pre_chain(shared: &Shared, cancel: &CancellationToken) -> Result<(), OpError> {
    let prefix = &shared.config.log_prefix;
    let precert = shared.chains.make_precert_chain()?;

    let client = shared.pool.next();
    let sct = cancellable(cancel, client.add_pre_chain(&precert.chain))
        .await
        .map_err(|e| OpError::client("failed to add-pre-chain", e))?;
    debug!(prefix = %prefix, timestamp = sct.timestamp, "uploaded precert, got SCT");

    let leaf = MerkleTreeLeaf::for_precert(&sct, shared.chains.issuer_key_hash(), precert.tbs);
    let leaf_data = leaf
        .encode()
        .map_err(|e| OpError::codec("failed to serialize precert leaf", e))?;
    offer(shared, SubmittedCert::new(leaf_data, sct, shared.config.mmd(), true));
    Ok(())
}

fn offer(shared: &Shared, submitted: SubmittedCert) {
    let leaf_hash = hex::encode(submitted.leaf_hash);
    let admitted = shared
        .pending
        .try_append(shared.clock.now(), shared.config.mmd(), submitted);
    trace!(
        prefix = %shared.config.log_prefix,
        leaf_hash = %leaf_hash,
        admitted,
        "offered submitted cert for inclusion check"
    );
}

async fn fetch_sth(shared: &Shared, cancel: &CancellationToken) -> Result<SignedTreeHead, OpError> {
    let client = shared.pool.next();
    cancellable(cancel, client.get_sth())
        .await
        .map_err(|e| OpError::client("failed to get-sth", e))
}

async fn get_sth(
    shared: &Shared,
    state: &mut HammerState,
    cancel: &CancellationToken,
) -> Result<(), OpError> {
    let sth = fetch_sth(shared, cancel).await?;
    debug!(
        prefix = %shared.config.log_prefix,
        tree_size = sth.tree_size,
        timestamp = sth.timestamp,
        "got STH"
    );
    state.sths.push(sth);
    Ok(())
}

async fn get_sth_consistency(
    shared: &Shared,
    state: &mut HammerState,
    cancel: &CancellationToken,
) -> Result<(), OpError> {
    let prefix = &shared.config.log_prefix;
    let which = state.rng.gen_range(0..STH_COUNT);
    let Some(prev) = state.sths.usable(which).cloned() else {
        trace!(prefix = %prefix, slot = which, "no usable STH in slot");
        return Err(OpError::Skip("no usable earlier STH"));
    };

    let sth = fetch_sth(shared, cancel).await?;
    if prev.tree_size == sth.tree_size {
        trace!(prefix = %prefix, tree_size = sth.tree_size, "STH size unchanged");
        return Err(OpError::Skip("tree size unchanged"));
    }
    if prev.tree_size > sth.tree_size {
        return Err(OpError::Validation(format!(
            "tree shrank from {} to {}",
            prev.tree_size, sth.tree_size
        )));
    }

    let client = shared.pool.next();
    let proof = cancellable(cancel, client.get_sth_consistency(prev.tree_size, sth.tree_size))
        .await
        .map_err(|e| {
            OpError::client(
                format!("failed to get-sth-consistency({}, {})", prev.tree_size, sth.tree_size),
                e,
            )
        })?;

    merkle::verify_consistency_proof(
        prev.tree_size,
        sth.tree_size,
        &prev.sha256_root_hash,
        &sth.sha256_root_hash,
        &proof,
    )
    .map_err(|e| {
        OpError::proof(
            format!("consistency proof {} -> {} failed to verify", prev.tree_size, sth.tree_size),
            e,
        )
    })?;
    debug!(
        prefix = %prefix,
        from = prev.tree_size,
        to = sth.tree_size,
        proof_len = proof.len(),
        "verified consistency proof"
    );
    Ok(())
}

async fn get_proof_by_hash(shared: &Shared, cancel: &CancellationToken) -> Result<(), OpError> {
    let prefix = &shared.config.log_prefix;
    let Some(submitted) = shared.pending.pop_if_mmd_passed(shared.clock.now()) else {
        trace!(prefix = %prefix, "no submitted cert past its merge deadline");
        return Err(OpError::Skip("no cert past its merge deadline"));
    };

    let sth = fetch_sth(shared, cancel).await?;
    let client = shared.pool.next();
    let proof = cancellable(cancel, client.get_proof_by_hash(&submitted.leaf_hash, sth.tree_size))
        .await
        .map_err(|e| {
            OpError::client(
                format!(
                    "failed to get-proof-by-hash(size={}) on cert with SCT @ {}",
                    sth.tree_size, submitted.sct.timestamp
                ),
                e,
            )
        })?;

    merkle::verify_inclusion_proof(
        proof.leaf_index,
        sth.tree_size,
        &proof.audit_path,
        &sth.sha256_root_hash,
        &submitted.leaf_data,
    )
    .map_err(|e| {
        OpError::proof(
            format!(
                "inclusion proof for index {} in tree of size {} failed to verify",
                proof.leaf_index, sth.tree_size
            ),
            e,
        )
    })?;
    debug!(
        prefix = %prefix,
        leaf_index = proof.leaf_index,
        tree_size = sth.tree_size,
        precert = submitted.precert,
        "verified inclusion proof"
    );
    Ok(())
}

async fn get_entries(
    shared: &Shared,
    state: &mut HammerState,
    cancel: &CancellationToken,
) -> Result<(), OpError> {
    let prefix = &shared.config.log_prefix;
    let Some(sth) = state.sths.usable(0).cloned() else {
        trace!(prefix = %prefix, "no current STH to read entries from");
        return Err(OpError::Skip("no usable current STH"));
    };

    let count = state
        .rng
        .gen_range(1..=MAX_ENTRIES_PER_FETCH)
        .min(sth.tree_size);
    let first = sth.tree_size - count;
    let last = sth.tree_size - 1;

    let client = shared.pool.next();
    let entries = cancellable(cancel, client.get_entries(first, last))
        .await
        .map_err(|e| OpError::client(format!("failed to get-entries({first}, {last})"), e))?;
    if (entries.len() as u64) < count {
        return Err(OpError::Validation(format!(
            "get-entries({first}, {last}) returned {} entries, want {count}",
            entries.len()
        )));
    }

    for (offset, entry) in (first..).zip(&entries) {
        let leaf = entry
            .leaf()
            .map_err(|e| OpError::codec(format!("failed to parse entry at index {offset}"), e))?;
        if leaf.version != Version::V1 {
            return Err(OpError::Validation(format!(
                "leaf[{offset}].version={}; want V1",
                leaf.version.0
            )));
        }
        if leaf.leaf_type != LeafType::TIMESTAMPED_ENTRY {
            return Err(OpError::Validation(format!(
                "leaf[{offset}].leaf_type={}; want TimestampedEntry",
                leaf.leaf_type.0
            )));
        }
        let entry_type = leaf.timestamped_entry.entry.entry_type();
        if entry_type != LogEntryType::X509 && entry_type != LogEntryType::PRECERT {
            return Err(OpError::Validation(format!(
                "leaf[{offset}] has unexpected entry type {entry_type}"
            )));
        }
        trace!(prefix = %prefix, index = offset, entry_type = %entry_type, "checked entry");
    }
    debug!(prefix = %prefix, first, last, count = entries.len(), "got entries");
    Ok(())
}

async fn get_roots(shared: &Shared, cancel: &CancellationToken) -> Result<(), OpError> {
    let client = shared.pool.next();
    let roots = cancellable(cancel, client.get_accepted_roots())
        .await
        .map_err(|e| OpError::client("failed to get-roots", e))?;
    debug!(prefix = %shared.config.log_prefix, count = roots.len(), "got roots");
    Ok(())
}
