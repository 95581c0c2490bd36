//! Versioned tuples: the per-row version chain MVCC operates on.

use crate::value::Value;

/// Bit-field flags on a [`TupleVersion`]. Only `FOR_UPDATE` is defined:
/// when set, `xmax` records a lock (the version is still logically live)
/// rather than a terminal supersede.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionFlags(u8);

impl VersionFlags {
    pub const FOR_UPDATE: VersionFlags = VersionFlags(1 << 0);

    pub const fn empty() -> Self {
        VersionFlags(0)
    }

    pub fn contains(self, other: VersionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: VersionFlags) {
        self.0 |= other.0;
    }

    pub fn clear(&mut self, other: VersionFlags) {
        self.0 &= !other.0;
    }
}

/// One version of a row: the data it held, and the transactions that
/// produced and (optionally) superseded or locked it.
#[derive(Debug, Clone)]
pub struct TupleVersion {
    pub data: Vec<Value>,
    /// `xid` that produced this version by insert or update.
    pub xmin: u64,
    /// `0` if not yet superseded or locked; otherwise the `xid` that
    /// marked it.
    pub xmax: u64,
    pub flags: VersionFlags,
    /// The producing transaction's `cid` at production time.
    pub cid: u64,
}

impl TupleVersion {
    pub fn new(data: Vec<Value>, xmin: u64, cid: u64) -> Self {
        TupleVersion {
            data,
            xmin,
            xmax: 0,
            flags: VersionFlags::empty(),
            cid,
        }
    }

    pub fn is_for_update(&self) -> bool {
        self.flags.contains(VersionFlags::FOR_UPDATE)
    }
}

/// A stable tuple id plus its ordered version chain, oldest first.
///
/// The chain is mutated only under the table's per-tuple lock (see
/// [`crate::table`]); this type itself carries no synchronization — the
/// table stores it behind a `Mutex`.
#[derive(Debug, Clone)]
pub struct VersionedTuple {
    pub id: u64,
    pub versions: Vec<TupleVersion>,
}

impl VersionedTuple {
    pub fn new(id: u64, initial: TupleVersion) -> Self {
        VersionedTuple {
            id,
            versions: vec![initial],
        }
    }

    /// The last (newest) version's index.
    pub fn last_index(&self) -> usize {
        self.versions.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Removes the version at `offset` from the end (`0` = newest).
    pub fn remove_from_end(&mut self, offset_from_end: usize) {
        let idx = self.versions.len() - 1 - offset_from_end;
        self.versions.remove(idx);
    }
}
