//! Log entry points and the weighted operation scheduler.
//!
//! The set of entry points is closed and its order is fixed: the scheduler walks
//! it when drawing an operation and the stats reporter walks it when rendering
//! the status line.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A public entry point of a CT log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Entrypoint {
    /// Submit a certificate chain.
    AddChain,
    /// Submit a pre-certificate chain.
    AddPreChain,
    /// Fetch the current signed tree head.
    #[serde(rename = "GetSTH")]
    GetSth,
    /// Fetch a consistency proof between two tree sizes.
    #[serde(rename = "GetSTHConsistency")]
    GetSthConsistency,
    /// Fetch an inclusion proof for a leaf hash.
    GetProofByHash,
    /// Fetch a range of log entries.
    GetEntries,
    /// Fetch the accepted root certificates.
    GetRoots,
    /// Fetch an entry together with its inclusion proof (not exercised).
    GetEntryAndProof,
}

impl Entrypoint {
    /// Number of entry points.
    pub const COUNT: usize = 8;

    /// All entry points in scheduling order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::AddChain,
        Self::AddPreChain,
        Self::GetSth,
        Self::GetSthConsistency,
        Self::GetProofByHash,
        Self::GetEntries,
        Self::GetRoots,
        Self::GetEntryAndProof,
    ];

    /// Returns the canonical name of the entry point.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AddChain => "AddChain",
            Self::AddPreChain => "AddPreChain",
            Self::GetSth => "GetSTH",
            Self::GetSthConsistency => "GetSTHConsistency",
            Self::GetProofByHash => "GetProofByHash",
            Self::GetEntries => "GetEntries",
            Self::GetRoots => "GetRoots",
            Self::GetEntryAndProof => "GetEntryAndProof",
        }
    }

    /// Returns the position of the entry point in [`Entrypoint::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown entry point name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entrypoint: {0}")]
pub struct UnknownEntrypoint(pub String);

impl FromStr for Entrypoint {
    type Err = UnknownEntrypoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ep| ep.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownEntrypoint(s.to_string()))
    }
}

/// Relative weights used to pick which entry point to exercise next.
///
/// Entry points missing from the map have weight 0 and are never chosen.
/// The total weight is not cached: [`OperationBias::choose`] sums the weights
/// on every draw, so a bias built or edited in place is always consistent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationBias {
    weights: BTreeMap<Entrypoint, u32>,
}

impl OperationBias {
    /// Creates an empty bias (every weight 0).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the weight for an entry point.
    #[must_use]
    pub fn with(mut self, ep: Entrypoint, weight: u32) -> Self {
        self.set(ep, weight);
        self
    }

    /// Sets the weight for an entry point.
    pub fn set(&mut self, ep: Entrypoint, weight: u32) {
        self.weights.insert(ep, weight);
    }

    /// Returns the weight of an entry point.
    #[must_use]
    pub fn weight(&self, ep: Entrypoint) -> u32 {
        self.weights.get(&ep).copied().unwrap_or(0)
    }

    /// Sum of all weights.
    #[must_use]
    pub fn total(&self) -> u64 {
        Entrypoint::ALL
            .iter()
            .map(|ep| u64::from(self.weight(*ep)))
            .sum()
    }

    /// Returns true if at least one entry point can be chosen.
    #[must_use]
    pub fn is_schedulable(&self) -> bool {
        self.total() > 0
    }

    /// Randomly picks an entry point with probability proportional to its weight.
    ///
    /// # Panics
    ///
    /// Panics if every weight is 0. Configurations are validated before a run
    /// starts, so reaching this is an invariant violation.
    pub fn choose<R: Rng>(&self, rng: &mut R) -> Entrypoint {
        let total = self.total();
        assert!(total > 0, "operation bias has no selectable entrypoint");

        let mut which = rng.gen_range(0..total);
        for ep in Entrypoint::ALL {
            let weight = u64::from(self.weight(ep));
            if which < weight {
                return ep;
            }
            which -= weight;
        }
        unreachable!("random choice out of range")
    }
}

impl FromIterator<(Entrypoint, u32)> for OperationBias {
    fn from_iter<I: IntoIterator<Item = (Entrypoint, u32)>>(iter: I) -> Self {
        Self {
            weights: iter.into_iter().collect(),
        }
    }
}
