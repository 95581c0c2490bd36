//! The visibility protocol: for a candidate tuple, decide which version (if
//! any) the current transaction may see, and whether a write must wait or
//! fail.

use crate::error::Error;
use crate::snapshot::Snapshot;
use crate::tuple::VersionedTuple;

/// Result of running the visibility protocol against one tuple.
#[derive(Debug)]
pub enum VisibilityOutcome {
    /// The version at this index in the chain is visible.
    Visible(usize),
    /// No version of this tuple is visible; the iterator should skip it.
    Invisible,
    /// The version at this index is visible, but `contending_xid` currently
    /// holds (or is about to hold) a conflicting claim on the row; a write
    /// must wait for it to end before proceeding.
    Wait {
        version_index: usize,
        contending_xid: u64,
    },
    /// The write cannot proceed without violating the isolation contract.
    Fail(Error),
}

/// Sentinel for "no transaction" (autocommit reads with no bound xid).
pub const NO_XID: i64 = -1;

/// `rolledback_xids` is only an acceleration cache covering `[xmin, xmax)`
/// when `xmin != 0`; whenever the snapshot doesn't already have an answer
/// (including the whole range being unpopulated because no transaction was
/// running at capture time), fall back to `rolledback_lookup`, which
/// consults the live transaction manager state.
fn is_rolledback(xid: u64, s: &Snapshot, rolledback_lookup: &dyn Fn(u64) -> bool) -> bool {
    if xid == 0 {
        return false;
    }
    s.is_rolledback_in_range(xid) || rolledback_lookup(xid)
}

fn is_running(xid: u64, s: &Snapshot) -> bool {
    xid != 0 && s.is_running(xid)
}

fn is_visible(xid: u64, s: &Snapshot, rolledback_lookup: &dyn Fn(u64) -> bool) -> bool {
    if xid == 0 {
        return true;
    }
    s.existed(xid) && !is_running(xid, s) && !is_rolledback(xid, s, rolledback_lookup)
}

/// Runs the visibility protocol for the tuple's current last version and
/// everything it transitively depends on. Returns the outcome plus whether
/// the tuple's version chain became empty (the caller must then remove the
/// tuple from the table under the table write lock).
///
/// `xid` is the current transaction's id, or [`NO_XID`] for autocommit/no
/// transaction. `for_change` and `for_select` both mean "the caller
/// requested a write-class access" (`UPDATE`/`DELETE` and `SELECT FOR
/// UPDATE` respectively); the protocol treats them identically.
pub fn resolve(
    tuple: &mut VersionedTuple,
    xid: i64,
    snapshot: &Snapshot,
    for_change: bool,
    for_select: bool,
    rolledback_lookup: &dyn Fn(u64) -> bool,
) -> (VisibilityOutcome, bool) {
    if tuple.is_empty() {
        return (VisibilityOutcome::Invisible, true);
    }
    walk_at(
        tuple,
        tuple.last_index(),
        xid,
        snapshot,
        for_change,
        for_select,
        rolledback_lookup,
    )
}

fn walk_at(
    tuple: &mut VersionedTuple,
    idx: usize,
    xid: i64,
    snapshot: &Snapshot,
    for_change: bool,
    for_select: bool,
    ext: &dyn Fn(u64) -> bool,
) -> (VisibilityOutcome, bool) {
    let v = tuple.versions[idx].clone();
    let touched_by_x = xid >= 1 && (v.xmin == xid as u64 || v.xmax == xid as u64);

    if touched_by_x {
        phase_b(tuple, idx, xid as u64, snapshot, for_change, for_select, ext)
    } else {
        phase_a(tuple, idx, xid, snapshot, for_change, for_select, ext)
    }
}

fn phase_a(
    tuple: &mut VersionedTuple,
    idx: usize,
    xid: i64,
    snapshot: &Snapshot,
    for_change: bool,
    for_select: bool,
    ext: &dyn Fn(u64) -> bool,
) -> (VisibilityOutcome, bool) {
    let v = tuple.versions[idx].clone();
    let for_write = for_change || for_select;

    // Case 1: xmin not visible falls through to the A7 scan/recurse logic.
    if !is_visible(v.xmin, snapshot, ext) {
        return phase_a_case7(tuple, idx, xid, snapshot, for_change, for_select, ext);
    }

    // Case 2: live version, must be at the chain tail.
    if v.xmax == 0 {
        if idx != tuple.last_index() {
            return (
                VisibilityOutcome::Fail(Error::Internal(
                    "live version (xmax == 0) found before chain tail".to_string(),
                )),
                false,
            );
        }
        return (VisibilityOutcome::Visible(idx), false);
    }

    // Case 4: self-delete.
    if v.xmax == v.xmin {
        return if v.is_for_update() {
            if for_write {
                (
                    VisibilityOutcome::Fail(Error::Serialization(
                        "write conflicts with a locked version".to_string(),
                    )),
                    false,
                )
            } else {
                (VisibilityOutcome::Visible(idx), false)
            }
        } else if for_write {
            (
                VisibilityOutcome::Fail(Error::Serialization(
                    "write conflicts with a deleted version".to_string(),
                )),
                false,
            )
        } else {
            (VisibilityOutcome::Invisible, false)
        };
    }

    // xmin != xmax from here.
    if !is_visible(v.xmax, snapshot, ext) {
        // Case 3.
        if is_rolledback(v.xmax, snapshot, ext) {
            return (VisibilityOutcome::Visible(idx), false);
        }
        if is_running(v.xmax, snapshot) || v.xmax >= snapshot.xmax {
            return if for_write {
                (
                    VisibilityOutcome::Wait {
                        version_index: idx,
                        contending_xid: v.xmax,
                    },
                    false,
                )
            } else {
                (VisibilityOutcome::Visible(idx), false)
            };
        }
        // Remaining possibility per the protocol: xmax is committed.
        return if for_write {
            (
                VisibilityOutcome::Fail(Error::Serialization(
                    "write conflicts with a version superseded by a committed transaction"
                        .to_string(),
                )),
                false,
            )
        } else {
            (VisibilityOutcome::Visible(idx), false)
        };
    }

    // Cases 5/6: xmax visible and distinct from xmin.
    if v.is_for_update() {
        if for_write {
            (
                VisibilityOutcome::Fail(Error::Serialization(
                    "write conflicts with a locked version".to_string(),
                )),
                false,
            )
        } else {
            (VisibilityOutcome::Visible(idx), false)
        }
    } else if for_write {
        (
            VisibilityOutcome::Fail(Error::Serialization(
                "write conflicts with a superseded version".to_string(),
            )),
            false,
        )
    } else {
        (VisibilityOutcome::Invisible, false)
    }
}

/// Case 7: `v.xmin` is not visible under the snapshot.
fn phase_a_case7(
    tuple: &mut VersionedTuple,
    idx: usize,
    xid: i64,
    snapshot: &Snapshot,
    for_change: bool,
    for_select: bool,
    ext: &dyn Fn(u64) -> bool,
) -> (VisibilityOutcome, bool) {
    let v = tuple.versions[idx].clone();
    let is_tail = idx == tuple.last_index();

    if is_tail && is_rolledback(v.xmin, snapshot, ext) {
        tuple.versions.pop();
        if tuple.is_empty() {
            return (VisibilityOutcome::Invisible, true);
        }
        return walk_at(
            tuple,
            tuple.last_index(),
            xid,
            snapshot,
            for_change,
            for_select,
            ext,
        );
    }

    if is_running(v.xmax, snapshot) {
        if idx == 0 {
            return (VisibilityOutcome::Invisible, false);
        }
        let (inner, emptied) = walk_at(tuple, idx - 1, xid, snapshot, for_change, for_select, ext);
        return match inner {
            VisibilityOutcome::Visible(_) => {
                let for_write = for_change || for_select;
                if for_write {
                    (
                        VisibilityOutcome::Wait {
                            version_index: idx,
                            contending_xid: v.xmax,
                        },
                        emptied,
                    )
                } else {
                    (VisibilityOutcome::Visible(idx), emptied)
                }
            }
            other => (other, emptied),
        };
    }

    // Scan older versions for the first whose xmin is visible, then run
    // the full protocol on it (it may itself be contended via its own
    // xmax, which a bare visibility check on xmin alone would miss).
    let mut j = idx;
    while j > 0 {
        j -= 1;
        if is_visible(tuple.versions[j].xmin, snapshot, ext) {
            return walk_at(tuple, j, xid, snapshot, for_change, for_select, ext);
        }
    }
    (VisibilityOutcome::Invisible, false)
}

fn phase_b(
    tuple: &mut VersionedTuple,
    idx: usize,
    x: u64,
    snapshot: &Snapshot,
    for_change: bool,
    for_select: bool,
    ext: &dyn Fn(u64) -> bool,
) -> (VisibilityOutcome, bool) {
    let v = tuple.versions[idx].clone();

    if v.xmin == x && v.xmax == 0 {
        // B1
        if v.cid < snapshot.cid {
            return (VisibilityOutcome::Visible(idx), false);
        }
        return backward_self_walk(tuple, idx, x, snapshot, for_change, for_select, ext);
    }

    if v.xmin == x && v.xmax == x {
        // B2
        if v.cid < snapshot.cid {
            return if v.is_for_update() {
                (VisibilityOutcome::Visible(idx), false)
            } else {
                (VisibilityOutcome::Invisible, false)
            };
        }
        return backward_self_walk(tuple, idx, x, snapshot, for_change, for_select, ext);
    }

    if v.xmax == x && v.xmin != x {
        // B3
        if v.cid < snapshot.cid {
            return if v.is_for_update() {
                (VisibilityOutcome::Visible(idx), false)
            } else {
                (VisibilityOutcome::Invisible, false)
            };
        }
        // Fall through to standard visibility on v.xmin, as if xmax were
        // not ours yet.
        if !is_visible(v.xmin, snapshot, ext) {
            return phase_a_case7(tuple, idx, x as i64, snapshot, for_change, for_select, ext);
        }
        return (VisibilityOutcome::Visible(idx), false);
    }

    // B4: v.xmin == x but v.xmax belongs to someone else. The engine never
    // hands out a write stamp to another transaction while our xmin sits
    // on the row, so this is an invariant violation.
    (
        VisibilityOutcome::Fail(Error::Internal(
            "version has our xmin but another transaction's xmax".to_string(),
        )),
        false,
    )
}

/// Walks backward through this transaction's own older versions of the
/// chain, starting just before `from_idx`, looking for the first whose
/// `cid < snapshot.cid`. The version immediately newer than that one is
/// the version visible to the current statement. If the walk reaches a
/// version produced by another transaction first, visibility reverts to
/// the standard (phase-dispatching) rules for that version.
fn backward_self_walk(
    tuple: &mut VersionedTuple,
    from_idx: usize,
    x: u64,
    snapshot: &Snapshot,
    for_change: bool,
    for_select: bool,
    ext: &dyn Fn(u64) -> bool,
) -> (VisibilityOutcome, bool) {
    if from_idx == 0 {
        return (VisibilityOutcome::Invisible, false);
    }
    let mut j = from_idx;
    loop {
        j -= 1;
        let vj = tuple.versions[j].clone();
        if vj.xmin != x {
            return walk_at(tuple, j, x as i64, snapshot, for_change, for_select, ext);
        }
        if vj.cid < snapshot.cid {
            return (VisibilityOutcome::Visible(j + 1), false);
        }
        if j == 0 {
            return (VisibilityOutcome::Invisible, false);
        }
    }
}
