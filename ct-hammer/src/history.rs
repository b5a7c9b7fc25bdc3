//! Recently observed signed tree heads.
//!
//! Heads run from newest to oldest: slot 0 is the latest successful get-sth,
//! and each new head pushes the older ones back, dropping the oldest once
//! [`STH_COUNT`] are held.

use crate::types::SignedTreeHead;

/// Number of tree heads remembered for consistency checks.
pub const STH_COUNT: usize = 10;

/// Fixed-capacity history of tree heads, newest first.
#[derive(Debug, Default)]
pub struct TreeHeadHistory {
    slots: [Option<SignedTreeHead>; STH_COUNT],
    /// Physical index of slot 0.
    head: usize,
    len: usize,
}

impl TreeHeadHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `sth` at slot 0, discarding the oldest head if full.
    pub fn push(&mut self, sth: SignedTreeHead) {
        self.head = (self.head + STH_COUNT - 1) % STH_COUNT;
        self.slots[self.head] = Some(sth);
        self.len = (self.len + 1).min(STH_COUNT);
    }

    /// Returns the head at logical slot `slot` (0 is newest).
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&SignedTreeHead> {
        if slot >= self.len {
            return None;
        }
        self.slots[(self.head + slot) % STH_COUNT].as_ref()
    }

    /// Returns the head at `slot` if it can anchor a check, i.e. it exists and
    /// covers a non-empty tree.
    #[must_use]
    pub fn usable(&self, slot: usize) -> Option<&SignedTreeHead> {
        self.get(slot).filter(|sth| sth.tree_size > 0)
    }

    /// Most recent head.
    #[must_use]
    pub fn latest(&self) -> Option<&SignedTreeHead> {
        self.get(0)
    }

    /// Number of heads held.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no head has been observed yet.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over held heads, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &SignedTreeHead> + '_ {
        (0..self.len).filter_map(move |slot| self.get(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn sth(tree_size: u64) -> SignedTreeHead {
        SignedTreeHead {
            tree_size,
            timestamp: tree_size * 10,
            sha256_root_hash: [0u8; 32],
            tree_head_signature: Bytes::new(),
        }
    }

    #[test]
    fn test_newest_first_ordering() {
        let mut history = TreeHeadHistory::new();
        for size in 1..=4 {
            history.push(sth(size));
        }
        assert_eq!(history.len(), 4);
        assert_eq!(history.get(0).unwrap().tree_size, 4);
        assert_eq!(history.get(3).unwrap().tree_size, 1);
        assert!(history.get(4).is_none());
        let sizes: Vec<u64> = history.iter().map(|s| s.tree_size).collect();
        assert_eq!(sizes, vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_full_history_drops_oldest() {
        let mut history = TreeHeadHistory::new();
        for size in 1..=STH_COUNT as u64 {
            history.push(sth(size));
        }
        assert_eq!(history.get(STH_COUNT - 1).unwrap().tree_size, 1);

        history.push(sth(11));
        assert_eq!(history.len(), STH_COUNT);
        assert_eq!(history.latest().unwrap().tree_size, 11);
        assert_eq!(history.get(STH_COUNT - 1).unwrap().tree_size, 2);
        assert!(history.iter().all(|s| s.tree_size != 1));
    }

    #[test]
    fn test_empty_and_zero_size_not_usable() {
        let mut history = TreeHeadHistory::new();
        assert!(history.is_empty());
        assert!(history.usable(0).is_none());

        history.push(sth(0));
        assert!(history.get(0).is_some());
        assert!(history.usable(0).is_none());

        history.push(sth(5));
        assert_eq!(history.usable(0).unwrap().tree_size, 5);
        assert!(history.usable(1).is_none());
        assert!(history.usable(7).is_none());
    }
}
