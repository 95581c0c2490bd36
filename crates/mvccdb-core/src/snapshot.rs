//! Immutable snapshots of the running/committed transaction set.

use std::collections::HashSet;

/// An immutable view of which transaction ids were running, committed, or
/// rolled back at the moment it was captured.
///
/// Built by [`crate::txn::TransactionManager::get_snapshot`] under the
/// manager's reader lock; once constructed it never changes, which is what
/// lets repeatable-read/serializable transactions reuse one snapshot for
/// their whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Smallest running `xid` at capture; `0` if none were running.
    pub xmin: u64,
    /// `next_xid` at capture: ids `>= xmax` did not exist yet.
    pub xmax: u64,
    /// Capturing transaction's `cid` at capture, or `0` for autocommit.
    pub cid: u64,
    /// `xid`s in `[xmin, xmax)` that were `STARTED`/`ROLLBACK_ONLY` at
    /// capture, excluding the capturing transaction itself.
    pub running_xids: HashSet<u64>,
    /// Precomputed `xid`s in `[xmin, xmax)` that were `ROLLED_BACK` at
    /// capture. An acceleration structure only: out-of-range ids fall back
    /// to a transaction-manager lookup.
    pub rolledback_xids: HashSet<u64>,
}

impl Snapshot {
    pub fn new(
        xmin: u64,
        xmax: u64,
        cid: u64,
        running_xids: HashSet<u64>,
        rolledback_xids: HashSet<u64>,
    ) -> Self {
        Snapshot {
            xmin,
            xmax,
            cid,
            running_xids,
            rolledback_xids,
        }
    }

    /// `is_running(x) ≡ x ∈ running_xids`.
    pub fn is_running(&self, xid: u64) -> bool {
        self.running_xids.contains(&xid)
    }

    /// `is_rolledback(x) ≡ x ∈ rolledback_xids ∨ (x < xmin ∧ persisted
    /// state of x is ROLLED_BACK)`.
    ///
    /// The out-of-range branch is resolved by the caller (it needs a
    /// transaction-manager lookup this type does not have access to); this
    /// method only covers the fast in-range case. Callers should use
    /// [`crate::visibility`]'s `is_rolledback` helper, which composes this
    /// with the manager lookup.
    pub fn is_rolledback_in_range(&self, xid: u64) -> bool {
        self.rolledback_xids.contains(&xid)
    }

    /// `x < xmax` — whether `x` existed at capture time at all.
    pub fn existed(&self, xid: u64) -> bool {
        xid < self.xmax
    }
}
