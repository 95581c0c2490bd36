//! Transaction records and the process-wide transaction manager.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::snapshot::Snapshot;

/// Isolation level requested for a transaction.
///
/// `RepeatableRead` and `Serializable` both capture their snapshot once, at
/// `start_transaction`, and reuse it for the life of the transaction; this
/// crate does not implement the extra predicate-locking machinery that
/// would distinguish true serializable isolation from repeatable read, so
/// the two behave identically here. That gap is recorded in the project's
/// grounding notes rather than hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    UncommittedRead,
    CommittedRead,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Whether this level captures its snapshot once at `start_transaction`
    /// (`true`) or takes a fresh one per statement (`false`).
    pub fn snapshot_at_start(self) -> bool {
        matches!(self, IsolationLevel::RepeatableRead | IsolationLevel::Serializable)
    }
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::CommittedRead
    }
}

/// Lifecycle state of a [`Transaction`].
///
/// `INITED -> STARTED -> (ROLLBACK_ONLY)? -> (COMMITTED | ROLLED_BACK)`.
/// Terminal states are irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Inited,
    Started,
    RollbackOnly,
    Committed,
    RolledBack,
}

impl TxnState {
    /// `is_started(tx) ≡ tx.state ∈ {STARTED, ROLLBACK_ONLY}`.
    ///
    /// The original engine this was ported from had a variant that also
    /// treated `ROLLED_BACK` as "started"; that was a bug, not a feature,
    /// and is not reproduced here.
    pub fn is_started(self) -> bool {
        matches!(self, TxnState::Started | TxnState::RollbackOnly)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::RolledBack)
    }
}

/// A single transaction record.
///
/// Owned exclusively by the [`TransactionManager`]; connections and
/// statements hold `Arc<Transaction>` handles into it.
#[derive(Debug)]
pub struct Transaction {
    xid: AtomicU64,
    cid: AtomicU64,
    state: RwLock<TxnState>,
    isolation: IsolationLevel,
    max_lock_wait_ms: u64,
    started_at: RwLock<Option<Instant>>,
    ended_at: RwLock<Option<Instant>>,
    snapshot: RwLock<Option<Snapshot>>,
}

impl Transaction {
    fn new_inited(isolation: IsolationLevel, max_lock_wait_ms: u64) -> Self {
        Transaction {
            xid: AtomicU64::new(0),
            cid: AtomicU64::new(0),
            state: RwLock::new(TxnState::Inited),
            isolation,
            max_lock_wait_ms,
            started_at: RwLock::new(None),
            ended_at: RwLock::new(None),
            snapshot: RwLock::new(None),
        }
    }

    /// `0` while `INITED`; otherwise the assigned transaction id.
    pub fn xid(&self) -> u64 {
        self.xid.load(Ordering::SeqCst)
    }

    /// Current statement counter. Incremented by `end_statement` under
    /// non-read-committed isolation.
    pub fn cid(&self) -> u64 {
        self.cid.load(Ordering::SeqCst)
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn max_lock_wait_ms(&self) -> u64 {
        self.max_lock_wait_ms
    }

    pub fn state(&self) -> TxnState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_started(&self) -> bool {
        self.state().is_started()
    }

    /// The transaction's snapshot, if one has been captured
    /// (`RepeatableRead`/`Serializable` capture at `start_transaction`;
    /// `CommittedRead`/`UncommittedRead` only ever hold a per-statement
    /// snapshot, attached externally by the statement context).
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_snapshot(&self, snap: Snapshot) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Some(snap);
    }

    fn increment_cid(&self) -> u64 {
        self.cid.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Process-wide allocator and bookkeeper for [`Transaction`] records.
///
/// Guards the `xid -> Transaction` table with a readers-writer lock;
/// `next_xid` and `lowest_running_xid` are lock-free atomics so the common
/// hot path (`start_transaction`) allocates an id via compare-and-swap and
/// only takes the write lock to insert the new record.
pub struct TransactionManager {
    next_xid: AtomicU64,
    lowest_running_xid: AtomicU64,
    transactions: RwLock<BTreeMap<u64, Arc<Transaction>>>,
    /// Backs the contended-write wait: a writer waits on this condvar up to
    /// its deadline, and `end_transaction` broadcasts on it. Coarser than a
    /// per-tuple condvar (every waiter wakes and re-checks its own
    /// transaction, not just the one that ended) but far simpler, and the
    /// design notes call out either as an acceptable, documented choice.
    wait_lock: Mutex<()>,
    wait_cv: Condvar,
}

impl TransactionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(TransactionManager {
            next_xid: AtomicU64::new(1),
            lowest_running_xid: AtomicU64::new(0),
            transactions: RwLock::new(BTreeMap::new()),
            wait_lock: Mutex::new(()),
            wait_cv: Condvar::new(),
        })
    }

    /// Blocks the calling thread until transaction `xid` is no longer
    /// `STARTED`/`ROLLBACK_ONLY`, or until `timeout` elapses. Returns
    /// `true` if the transaction ended in time, `false` on timeout. An
    /// unknown `xid` is treated as already ended.
    pub fn wait_for_end(&self, xid: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.get_transaction(xid) {
                Ok(tx) => {
                    if !tx.is_started() {
                        return true;
                    }
                }
                Err(_) => return true,
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let remaining = deadline - now;
            let guard = self.wait_lock.lock().unwrap_or_else(|e| e.into_inner());
            let _ = self
                .wait_cv
                .wait_timeout(guard, remaining)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Smallest `xid` of any transaction still `STARTED`/`ROLLBACK_ONLY`,
    /// or `0` if none.
    pub fn lowest_running_xid(&self) -> u64 {
        self.lowest_running_xid.load(Ordering::SeqCst)
    }

    /// Value `next_xid` would take if allocated right now; ids `>= this`
    /// did not exist at the moment of the read.
    pub fn peek_next_xid(&self) -> u64 {
        self.next_xid.load(Ordering::SeqCst)
    }

    /// Creates an `INITED` transaction with the given default isolation and
    /// lock-wait budget. Not yet registered in the manager's table — it is
    /// inserted on `start_transaction`.
    pub fn init_transaction(&self, isolation: IsolationLevel, max_lock_wait_ms: u64) -> Arc<Transaction> {
        Arc::new(Transaction::new_inited(isolation, max_lock_wait_ms))
    }

    /// Assigns `xid`, transitions `INITED -> STARTED`, and (for
    /// repeatable-read/serializable) captures the snapshot.
    pub fn start_transaction(&self, tx: &Arc<Transaction>) -> Result<()> {
        {
            let state = tx.state();
            if state.is_started() {
                return Err(Error::InvalidState(
                    "transaction already started".to_string(),
                ));
            }
            if state.is_terminal() {
                return Err(Error::InvalidState(
                    "transaction already ended".to_string(),
                ));
            }
        }

        let xid = self.next_xid.fetch_add(1, Ordering::SeqCst);
        tx.xid.store(xid, Ordering::SeqCst);

        // CAS lowest_running_xid from 0 to our xid only if it is still 0;
        // if another transaction is already the low-water mark, leave it.
        let _ = self
            .lowest_running_xid
            .compare_exchange(0, xid, Ordering::SeqCst, Ordering::SeqCst);

        *tx.started_at.write().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        *tx.state.write().unwrap_or_else(|e| e.into_inner()) = TxnState::Started;

        {
            let mut table = self.transactions.write().map_err(|_| Error::LockPoisoned)?;
            table.insert(xid, Arc::clone(tx));
        }

        if tx.isolation.snapshot_at_start() {
            let snap = self.get_snapshot(Some(tx))?;
            tx.set_snapshot(snap);
        }

        debug!(xid, isolation = ?tx.isolation, "transaction started");
        Ok(())
    }

    /// `STARTED -> ROLLBACK_ONLY`. Idempotent.
    pub fn set_rollback_only(&self, tx: &Transaction) -> Result<()> {
        let mut state = tx.state.write().map_err(|_| Error::LockPoisoned)?;
        match *state {
            TxnState::Started | TxnState::RollbackOnly => {
                *state = TxnState::RollbackOnly;
                Ok(())
            }
            other => Err(Error::InvalidState(format!(
                "cannot mark rollback-only from state {:?}",
                other
            ))),
        }
    }

    /// Ends a transaction. If the transaction was `ROLLBACK_ONLY` and the
    /// caller asked for `Committed`, the effective state is `RolledBack`
    /// and the rollback is performed, but the call still returns an error
    /// to the caller so they know their commit did not take effect.
    pub fn end_transaction(&self, tx: &Transaction, requested: TxnState) -> Result<()> {
        if !matches!(requested, TxnState::Committed | TxnState::RolledBack) {
            return Err(Error::InvalidArgument(
                "end_transaction requires Committed or RolledBack".to_string(),
            ));
        }

        let demoted = {
            let state = tx.state();
            if !state.is_started() {
                return Err(Error::InvalidState(format!(
                    "cannot end transaction from state {:?}",
                    state
                )));
            }
            state == TxnState::RollbackOnly && requested == TxnState::Committed
        };

        let effective = if demoted { TxnState::RolledBack } else { requested };

        *tx.ended_at.write().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        *tx.state.write().unwrap_or_else(|e| e.into_inner()) = effective;

        let xid = tx.xid();
        if self.lowest_running_xid.load(Ordering::SeqCst) == xid {
            self.advance_lowest_running_xid(xid)?;
        }

        match effective {
            TxnState::Committed => debug!(xid, "transaction committed"),
            TxnState::RolledBack => debug!(xid, "transaction rolled back"),
            _ => unreachable!(),
        }
        self.wait_cv.notify_all();

        if demoted {
            warn!(xid, "commit requested on rollback-only transaction; rolled back instead");
            return Err(Error::InvalidState(
                "transaction was rollback-only; rolled back instead of committing".to_string(),
            ));
        }
        Ok(())
    }

    /// Scans forward from `after_xid + 1` for the first still-running
    /// transaction, stopping at `next_xid`; sets `lowest_running_xid` to
    /// that id, or `0` if none is found. Holds the manager's write lock for
    /// the whole scan, matching the total commit-ordering guarantee.
    fn advance_lowest_running_xid(&self, after_xid: u64) -> Result<()> {
        let table = self.transactions.write().map_err(|_| Error::LockPoisoned)?;
        let next_xid = self.next_xid.load(Ordering::SeqCst);
        let mut candidate = 0u64;
        for (&xid, tx) in table.range(after_xid + 1..) {
            if xid >= next_xid {
                break;
            }
            if tx.state().is_started() {
                candidate = xid;
                break;
            }
        }
        self.lowest_running_xid.store(candidate, Ordering::SeqCst);
        Ok(())
    }

    /// Looks up a transaction record by id.
    pub fn get_transaction(&self, xid: u64) -> Result<Arc<Transaction>> {
        let table = self.transactions.read().map_err(|_| Error::LockPoisoned)?;
        table
            .get(&xid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("transaction {} not found", xid)))
    }

    /// Builds a snapshot as of now. `tx` is the capturing transaction (if
    /// any); its own `xid` is excluded from `running_xids`.
    pub fn get_snapshot(&self, tx: Option<&Arc<Transaction>>) -> Result<Snapshot> {
        let table = self.transactions.read().map_err(|_| Error::LockPoisoned)?;
        let xmin = self.lowest_running_xid.load(Ordering::SeqCst);
        let xmax = self.next_xid.load(Ordering::SeqCst);
        let mut running = HashSet::new();
        let mut rolledback = HashSet::new();
        let self_xid = tx.map(|t| t.xid()).unwrap_or(0);

        if xmin != 0 {
            for (&xid, other) in table.range(xmin..xmax) {
                if xid == self_xid {
                    continue;
                }
                match other.state() {
                    TxnState::Started | TxnState::RollbackOnly => {
                        running.insert(xid);
                    }
                    TxnState::RolledBack => {
                        rolledback.insert(xid);
                    }
                    _ => {}
                }
            }
        }

        let cid = tx.map(|t| t.cid()).unwrap_or(0);
        Ok(Snapshot::new(xmin, xmax, cid, running, rolledback))
    }

    /// Invoked after a statement's last row is produced or it fails.
    /// Under read-committed the statement's (per-statement) snapshot is
    /// simply dropped by the caller; under stronger isolation the
    /// transaction's `cid` advances. Under autocommit also ends the
    /// transaction with `Committed`.
    pub fn end_statement(&self, tx: &Arc<Transaction>, autocommit: bool) -> Result<()> {
        if !tx.isolation.snapshot_at_start() {
            // Read-committed: nothing to advance here; the statement context
            // owning the per-statement snapshot drops it.
        } else {
            tx.increment_cid();
        }
        if autocommit {
            self.end_transaction(tx, TxnState::Committed)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_xid", &self.next_xid.load(Ordering::SeqCst))
            .field("lowest_running_xid", &self.lowest_running_xid.load(Ordering::SeqCst))
            .finish()
    }
}
