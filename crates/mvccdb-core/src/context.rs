//! Statement/connection context (§ Statement/Connection Context): carries
//! the bound transaction, autocommit flag, and default isolation level for
//! one connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::catalog::SchemaCatalog;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::txn::{IsolationLevel, Transaction, TransactionManager, TxnState};

/// A connection holds at most one live transaction. `begin` turns
/// autocommit off and creates an `INITED` transaction; `commit`/`rollback`
/// call `end_transaction`. Under autocommit, each statement that starts a
/// transaction implicitly ends it via `end_statement`.
pub struct ConnectionContext {
    manager: Arc<TransactionManager>,
    catalog: Arc<SchemaCatalog>,
    autocommit: AtomicBool,
    default_isolation: Mutex<IsolationLevel>,
    default_max_lock_wait_ms: AtomicU64,
    current_tx: Mutex<Option<Arc<Transaction>>>,
}

impl ConnectionContext {
    pub fn new(manager: Arc<TransactionManager>, catalog: Arc<SchemaCatalog>, config: &EngineConfig) -> Self {
        ConnectionContext {
            manager,
            catalog,
            autocommit: AtomicBool::new(config.autocommit),
            default_isolation: Mutex::new(config.default_isolation),
            default_max_lock_wait_ms: AtomicU64::new(config.default_max_lock_wait_ms),
            current_tx: Mutex::new(None),
        }
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub fn is_autocommit(&self) -> bool {
        self.autocommit.load(Ordering::SeqCst)
    }

    pub fn set_autocommit(&self, on: bool) -> Result<()> {
        if !on {
            self.autocommit.store(false, Ordering::SeqCst);
            return Ok(());
        }
        // Turning autocommit back on with an open transaction is refused;
        // the caller must commit or roll back explicitly first.
        let guard = self.current_tx.lock().map_err(|_| Error::LockPoisoned)?;
        if let Some(tx) = guard.as_ref() {
            if tx.is_started() {
                return Err(Error::InvalidState(
                    "cannot enable autocommit with an open transaction".to_string(),
                ));
            }
        }
        self.autocommit.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn set_default_isolation(&self, level: IsolationLevel) -> Result<()> {
        *self.default_isolation.lock().map_err(|_| Error::LockPoisoned)? = level;
        Ok(())
    }

    fn new_transaction(&self) -> Arc<Transaction> {
        let isolation = *self.default_isolation.lock().unwrap_or_else(|e| e.into_inner());
        let max_wait = self.default_max_lock_wait_ms.load(Ordering::SeqCst);
        self.manager.init_transaction(isolation, max_wait)
    }

    /// `BEGIN`: errors if already inside a transaction.
    pub fn begin(&self) -> Result<()> {
        let mut guard = self.current_tx.lock().map_err(|_| Error::LockPoisoned)?;
        if let Some(tx) = guard.as_ref() {
            if tx.is_started() {
                return Err(Error::InvalidState("already inside a transaction".to_string()));
            }
        }
        self.autocommit.store(false, Ordering::SeqCst);
        *guard = Some(self.new_transaction());
        Ok(())
    }

    /// `COMMIT`.
    pub fn commit(&self) -> Result<()> {
        let mut guard = self.current_tx.lock().map_err(|_| Error::LockPoisoned)?;
        let tx = guard
            .take()
            .ok_or_else(|| Error::InvalidState("no transaction to commit".to_string()))?;
        if !tx.is_started() {
            return Err(Error::InvalidState("transaction was never started".to_string()));
        }
        self.manager.end_transaction(&tx, TxnState::Committed)
    }

    /// `ROLLBACK`.
    pub fn rollback(&self) -> Result<()> {
        let mut guard = self.current_tx.lock().map_err(|_| Error::LockPoisoned)?;
        let tx = guard
            .take()
            .ok_or_else(|| Error::InvalidState("no transaction to roll back".to_string()))?;
        if !tx.is_started() {
            return Ok(());
        }
        self.manager.end_transaction(&tx, TxnState::RolledBack)
    }

    /// Returns the bound transaction, creating and starting one first if
    /// none is bound (used by statements that mutate or consume a
    /// snapshot). Under autocommit this transaction is implicitly ended by
    /// `end_statement`.
    pub fn ensure_transaction(&self) -> Result<Arc<Transaction>> {
        let mut guard = self.current_tx.lock().map_err(|_| Error::LockPoisoned)?;
        if let Some(tx) = guard.as_ref() {
            if tx.state() != TxnState::Committed && tx.state() != TxnState::RolledBack {
                return Ok(Arc::clone(tx));
            }
        }
        let tx = self.new_transaction();
        *guard = Some(Arc::clone(&tx));
        Ok(tx)
    }

    /// Invoked by a statement after its last row is produced or it fails.
    pub fn end_statement(&self, tx: &Arc<Transaction>) -> Result<()> {
        let autocommit = self.is_autocommit();
        self.manager.end_statement(tx, autocommit)?;
        if autocommit {
            let mut guard = self.current_tx.lock().map_err(|_| Error::LockPoisoned)?;
            if guard.as_ref().map(|t| Arc::ptr_eq(t, tx)).unwrap_or(false) {
                *guard = None;
            }
        }
        Ok(())
    }

    /// Rolls back any transaction still open when the connection closes.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.current_tx.lock().map_err(|_| Error::LockPoisoned)?;
        if let Some(tx) = guard.take() {
            if tx.is_started() {
                debug!(xid = tx.xid(), "rolling back open transaction on connection close");
                self.manager.end_transaction(&tx, TxnState::RolledBack)?;
            }
        }
        Ok(())
    }
}
