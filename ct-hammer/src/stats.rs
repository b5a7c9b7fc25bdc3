//! Per-entrypoint request and response counters.

use std::collections::BTreeMap;

use crate::operation::Entrypoint;

/// HTTP 200: the operation completed.
pub const STATUS_OK: u16 = 200;

/// HTTP 424: the operation was skipped because an earlier result it depends
/// on (a tree head, a merged certificate) was not available yet.
pub const STATUS_FAILED_DEPENDENCY: u16 = 424;

/// HTTP 501: the entry point is not exercised by the hammer.
pub const STATUS_NOT_IMPLEMENTED: u16 = 501;

/// Counters for one log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStats {
    log_id: i64,
    reqs: [u64; Entrypoint::COUNT],
    rsps: [BTreeMap<u16, u64>; Entrypoint::COUNT],
}

impl LogStats {
    /// Creates empty counters for the log with the given tree ID.
    #[must_use]
    pub fn new(log_id: i64) -> Self {
        Self {
            log_id,
            reqs: [0; Entrypoint::COUNT],
            rsps: Default::default(),
        }
    }

    /// Tree ID of the log these counters belong to.
    #[must_use]
    pub const fn log_id(&self) -> i64 {
        self.log_id
    }

    /// Records a finished operation and the HTTP status it produced.
    pub fn record(&mut self, ep: Entrypoint, status: u16) {
        self.reqs[ep.index()] += 1;
        *self.rsps[ep.index()].entry(status).or_insert(0) += 1;
    }

    /// Number of finished operations for `ep`.
    #[must_use]
    pub const fn requests(&self, ep: Entrypoint) -> u64 {
        self.reqs[ep.index()]
    }

    /// Number of finished operations for `ep` that produced `status`.
    #[must_use]
    pub fn responses(&self, ep: Entrypoint, status: u16) -> u64 {
        self.rsps[ep.index()].get(&status).copied().unwrap_or(0)
    }

    /// All status counts for `ep`.
    #[must_use]
    pub const fn statuses(&self, ep: Entrypoint) -> &BTreeMap<u16, u64> {
        &self.rsps[ep.index()]
    }

    /// Total finished operations across all entry points.
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.reqs.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_requests_and_statuses() {
        let mut stats = LogStats::new(42);
        stats.record(Entrypoint::GetSth, STATUS_OK);
        stats.record(Entrypoint::GetSth, STATUS_OK);
        stats.record(Entrypoint::GetSth, STATUS_FAILED_DEPENDENCY);
        stats.record(Entrypoint::GetEntryAndProof, STATUS_NOT_IMPLEMENTED);

        assert_eq!(stats.log_id(), 42);
        assert_eq!(stats.requests(Entrypoint::GetSth), 3);
        assert_eq!(stats.responses(Entrypoint::GetSth, STATUS_OK), 2);
        assert_eq!(stats.responses(Entrypoint::GetSth, STATUS_FAILED_DEPENDENCY), 1);
        assert_eq!(stats.responses(Entrypoint::AddChain, STATUS_OK), 0);
        assert_eq!(stats.statuses(Entrypoint::GetEntryAndProof).len(), 1);
        assert_eq!(stats.total_requests(), 4);
    }

    #[test]
    fn test_stats_compare_by_counts() {
        let mut a = LogStats::new(7);
        let mut b = LogStats::new(7);
        assert_eq!(a, b);

        a.record(Entrypoint::GetRoots, STATUS_OK);
        assert_ne!(a, b);
        b.record(Entrypoint::GetRoots, STATUS_OK);
        assert_eq!(a, b);

        b.record(Entrypoint::GetRoots, STATUS_FAILED_DEPENDENCY);
        a.record(Entrypoint::GetRoots, STATUS_OK);
        assert_ne!(a, b);
        assert_ne!(LogStats::new(7), LogStats::new(8));
    }
}
