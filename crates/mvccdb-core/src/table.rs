//! Tables: the base-table MVCC tuple store, the non-MVCC temp table, and
//! the iterator that drives the visibility protocol over both.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use crate::tuple::{TupleVersion, VersionFlags, VersionedTuple};
use crate::txn::{Transaction, TransactionManager, TxnState};
use crate::value::Value;
use crate::visibility::{self, VisibilityOutcome};

/// Column metadata. `hidden` marks internal bookkeeping columns that the
/// SQL front end's `SELECT *` wildcard expansion should skip; `auto_increment`
/// marks a `PRIMARY AUTOINCREMENT` column whose value the executor fills in
/// via [`BaseTable::increment`] rather than from the `INSERT` values list.
/// The tuple store itself is column-count/order agnostic and never
/// consults either flag.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub hidden: bool,
    pub auto_increment: bool,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            hidden: false,
            auto_increment: false,
        }
    }

    pub fn hidden(name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            hidden: true,
            auto_increment: false,
        }
    }

    pub fn auto_increment(name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            hidden: false,
            auto_increment: true,
        }
    }
}

/// A base table: a named, MVCC-versioned collection of tuples keyed by a
/// dense, monotonic 64-bit id.
pub struct BaseTable {
    name: String,
    columns: Vec<Column>,
    next_tuple_id: AtomicU64,
    increments: Mutex<HashMap<String, u64>>,
    rows: RwLock<BTreeMap<u64, Arc<Mutex<VersionedTuple>>>>,
    registered_iterators: Mutex<HashSet<u64>>,
    next_iterator_id: AtomicU64,
}

impl BaseTable {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Arc<Self> {
        Arc::new(BaseTable {
            name: name.into(),
            columns,
            next_tuple_id: AtomicU64::new(1),
            increments: Mutex::new(HashMap::new()),
            rows: RwLock::new(BTreeMap::new()),
            registered_iterators: Mutex::new(HashSet::new()),
            next_iterator_id: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn ensure_started(&self, tx: &Arc<Transaction>, manager: &TransactionManager) -> Result<()> {
        if !tx.is_started() {
            manager.start_transaction(tx)?;
        }
        Ok(())
    }

    /// Allocates `id = next_tuple_id++` and appends a single live version.
    pub fn insert(&self, row: Vec<Value>, tx: &Arc<Transaction>, manager: &TransactionManager) -> Result<u64> {
        self.ensure_started(tx, manager)?;
        let id = self.next_tuple_id.fetch_add(1, Ordering::SeqCst);
        let version = TupleVersion::new(row, tx.xid(), tx.cid());
        let vt = VersionedTuple::new(id, version);
        let mut rows = self.rows.write().map_err(|_| Error::LockPoisoned)?;
        rows.insert(id, Arc::new(Mutex::new(vt)));
        Ok(id)
    }

    /// Locates the tuple (no-op if absent) and, under its lock, closes out
    /// the current last version and appends a new one.
    pub fn update(&self, id: u64, row: Vec<Value>, tx: &Arc<Transaction>, manager: &TransactionManager) -> Result<()> {
        self.ensure_started(tx, manager)?;
        let slot = {
            let rows = self.rows.read().map_err(|_| Error::LockPoisoned)?;
            match rows.get(&id) {
                Some(s) => Arc::clone(s),
                None => return Ok(()),
            }
        };
        let mut vt = slot.lock().map_err(|_| Error::LockPoisoned)?;
        let last = vt
            .versions
            .last_mut()
            .ok_or_else(|| Error::Internal("update on empty version chain".to_string()))?;
        last.flags.clear(VersionFlags::FOR_UPDATE);
        last.xmax = tx.xid();
        last.cid = tx.cid();
        let new_version = TupleVersion::new(row, tx.xid(), tx.cid());
        vt.versions.push(new_version);
        Ok(())
    }

    /// Same as `update` minus the new-version append: the last version
    /// retains `xmax = tx.xid` with `FOR_UPDATE` cleared.
    pub fn delete(&self, id: u64, tx: &Arc<Transaction>, manager: &TransactionManager) -> Result<()> {
        self.ensure_started(tx, manager)?;
        let slot = {
            let rows = self.rows.read().map_err(|_| Error::LockPoisoned)?;
            match rows.get(&id) {
                Some(s) => Arc::clone(s),
                None => return Ok(()),
            }
        };
        let mut vt = slot.lock().map_err(|_| Error::LockPoisoned)?;
        let last = vt
            .versions
            .last_mut()
            .ok_or_else(|| Error::Internal("delete on empty version chain".to_string()))?;
        last.flags.clear(VersionFlags::FOR_UPDATE);
        last.xmax = tx.xid();
        last.cid = tx.cid();
        Ok(())
    }

    /// Monotone per-column counter backing `PRIMARY AUTOINCREMENT` columns.
    pub fn increment(&self, column: &str) -> Result<u64> {
        let mut map = self.increments.lock().map_err(|_| Error::LockPoisoned)?;
        let counter = map.entry(column.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    fn remove_tuple(&self, id: u64) -> Result<()> {
        let mut rows = self.rows.write().map_err(|_| Error::LockPoisoned)?;
        rows.remove(&id);
        Ok(())
    }

    /// Opens a forward iterator. If either `for_change` or `for_select` is
    /// set and `tx` has no started transaction, one is started now. The
    /// snapshot is captured per-statement under read-committed, or reused
    /// from the transaction under repeatable-read/serializable.
    pub fn new_iterator(
        self: &Arc<Self>,
        tx: &Arc<Transaction>,
        manager: &Arc<TransactionManager>,
        for_change: bool,
        for_select: bool,
    ) -> Result<BaseTableIterator> {
        if (for_change || for_select) && !tx.is_started() {
            manager.start_transaction(tx)?;
        }
        let snapshot = if tx.is_started() && tx.isolation_level().snapshot_at_start() {
            // xmin/xmax/running_xids stay fixed from start_transaction (per
            // repeatable-read/serializable semantics); cid tracks the
            // current statement so a transaction still sees its own
            // earlier writes as it progresses (P2 only guarantees
            // xmin/xmax/running_xids stability, not cid).
            let mut snap = tx
                .snapshot()
                .ok_or_else(|| Error::Internal("started transaction missing its snapshot".to_string()))?;
            snap.cid = tx.cid();
            snap
        } else {
            manager.get_snapshot(Some(tx))?
        };

        let iterator_id = self.next_iterator_id.fetch_add(1, Ordering::SeqCst);
        self.registered_iterators
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .insert(iterator_id);

        Ok(BaseTableIterator {
            table: Arc::clone(self),
            manager: Arc::clone(manager),
            tx: Arc::clone(tx),
            for_change,
            for_select,
            snapshot,
            cursor: 0,
            iterator_id,
            done: false,
        })
    }
}

/// Drives the iterator control loop (§4.5): scan, lock, resolve
/// visibility, evaluate the caller's predicate, and — for write-class
/// access — claim or wait on the row.
pub struct BaseTableIterator {
    table: Arc<BaseTable>,
    manager: Arc<TransactionManager>,
    tx: Arc<Transaction>,
    for_change: bool,
    for_select: bool,
    snapshot: Snapshot,
    cursor: u64,
    iterator_id: u64,
    done: bool,
}

enum Step {
    Fail(Error),
    Invisible { emptied: bool },
    Wait { data: Vec<Value>, contending_xid: u64 },
    Visible { data: Vec<Value> },
}

impl BaseTableIterator {
    /// Advances to the next row for which `predicate` returns `true`,
    /// applying the visibility protocol and (for write-class iterators)
    /// row claiming/waiting along the way. Returns `None` at end of
    /// stream.
    pub fn next_matching(
        &mut self,
        mut predicate: impl FnMut(&[Value]) -> Result<bool>,
    ) -> Result<Option<(u64, Vec<Value>)>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let candidate = {
                let rows = self.table.rows.read().map_err(|_| Error::LockPoisoned)?;
                rows.range(self.cursor..).next().map(|(&id, slot)| (id, Arc::clone(slot)))
            };
            let (id, slot) = match candidate {
                Some(x) => x,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };
            self.cursor = id + 1;

            // A contended wait re-resolves visibility against a freshly
            // drawn snapshot rather than the statement/transaction's
            // original one: otherwise a repeatable-read writer would see
            // the same contending xid as "running" forever (it is frozen
            // in that snapshot) and spin. A fresh snapshot correctly turns
            // that into "the blocker committed" (serialization failure)
            // or, under read-committed, "the blocker's new version is now
            // the one to act on" (matches the write-conflict scenario).
            let mut retry_snapshot: Option<Snapshot> = None;

            'retry: loop {
                let manager = Arc::clone(&self.manager);
                let rolledback_lookup = move |xid: u64| {
                    manager
                        .get_transaction(xid)
                        .map(|t| t.state() == TxnState::RolledBack)
                        .unwrap_or(false)
                };
                let snapshot = retry_snapshot.as_ref().unwrap_or(&self.snapshot);

                let step = {
                    let mut vt = slot.lock().map_err(|_| Error::LockPoisoned)?;
                    let xid = if self.tx.xid() == 0 {
                        visibility::NO_XID
                    } else {
                        self.tx.xid() as i64
                    };
                    let (outcome, emptied) =
                        visibility::resolve(&mut vt, xid, snapshot, self.for_change, self.for_select, &rolledback_lookup);
                    match outcome {
                        VisibilityOutcome::Fail(e) => Step::Fail(e),
                        VisibilityOutcome::Invisible => Step::Invisible { emptied },
                        VisibilityOutcome::Wait {
                            version_index,
                            contending_xid,
                        } => Step::Wait {
                            data: vt.versions[version_index].data.clone(),
                            contending_xid,
                        },
                        VisibilityOutcome::Visible(version_index) => Step::Visible {
                            data: vt.versions[version_index].data.clone(),
                        },
                    }
                };

                match step {
                    Step::Fail(e) => return Err(e),
                    Step::Invisible { emptied } => {
                        if emptied {
                            self.table.remove_tuple(id)?;
                        }
                        break 'retry;
                    }
                    Step::Wait { data, contending_xid } => {
                        if !predicate(&data)? {
                            break 'retry;
                        }
                        if !(self.for_change || self.for_select) {
                            return Ok(Some((id, data)));
                        }
                        let waited = self
                            .manager
                            .wait_for_end(contending_xid, Duration::from_millis(self.tx.max_lock_wait_ms()));
                        if !waited {
                            return Err(Error::LockTimeout(format!(
                                "timed out after {}ms waiting on transaction {}",
                                self.tx.max_lock_wait_ms(),
                                contending_xid
                            )));
                        }
                        retry_snapshot = Some(self.manager.get_snapshot(Some(&self.tx))?);
                        continue 'retry;
                    }
                    Step::Visible { data } => {
                        if !predicate(&data)? {
                            break 'retry;
                        }
                        if self.for_change || self.for_select {
                            self.claim(&slot)?;
                        }
                        return Ok(Some((id, data)));
                    }
                }
            }
        }
    }

    fn claim(&self, slot: &Arc<Mutex<VersionedTuple>>) -> Result<()> {
        let mut vt = slot.lock().map_err(|_| Error::LockPoisoned)?;
        let last = vt
            .versions
            .last_mut()
            .ok_or_else(|| Error::Internal("claim on empty version chain".to_string()))?;
        last.xmax = self.tx.xid();
        last.flags.set(VersionFlags::FOR_UPDATE);
        Ok(())
    }
}

impl Drop for BaseTableIterator {
    fn drop(&mut self) {
        if let Ok(mut regs) = self.table.registered_iterators.lock() {
            regs.remove(&self.iterator_id);
        }
    }
}

/// A temp table: a simple ordered sequence of plain rows. MVCC rules do
/// not apply; used for intermediate result-set materialization, and
/// destroyed when its owning result set closes.
pub struct TempTable {
    name: String,
    rows: RwLock<Vec<Vec<Value>>>,
}

impl TempTable {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(TempTable {
            name: name.into(),
            rows: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push(&self, row: Vec<Value>) -> Result<()> {
        let mut rows = self.rows.write().map_err(|_| Error::LockPoisoned)?;
        rows.push(row);
        Ok(())
    }

    /// Snapshots the current rows into a fresh iterator. Unlike
    /// `BaseTableIterator`, later writes to the temp table are not
    /// reflected in an iterator already in flight.
    pub fn iter(&self) -> Result<TempTableIterator> {
        let rows = self.rows.read().map_err(|_| Error::LockPoisoned)?;
        Ok(TempTableIterator {
            rows: rows.clone(),
            ix: 0,
        })
    }
}

/// Correct bounds: advances while `ix < rows.len()`. (A prior revision of
/// this logic used `rows.len() < ix`, which is backwards and never
/// iterates past the first row.)
pub struct TempTableIterator {
    rows: Vec<Vec<Value>>,
    ix: usize,
}

impl TempTableIterator {
    pub fn next(&mut self) -> Option<Vec<Value>> {
        if self.ix < self.rows.len() {
            let row = self.rows[self.ix].clone();
            self.ix += 1;
            Some(row)
        } else {
            None
        }
    }
}

/// A table handle: either a base table or a temp table.
#[derive(Clone)]
pub enum TableHandle {
    Base(Arc<BaseTable>),
    Temp(Arc<TempTable>),
}

impl TableHandle {
    pub fn name(&self) -> &str {
        match self {
            TableHandle::Base(t) => t.name(),
            TableHandle::Temp(t) => t.name(),
        }
    }
}
