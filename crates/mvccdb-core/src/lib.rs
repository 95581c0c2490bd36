//! # mvccdb-core
//!
//! The MVCC storage engine: transaction manager, versioned tuple store,
//! snapshot/visibility protocol, and table iterator. The SQL front end,
//! expression evaluator, and driver/REST surfaces are external
//! collaborators built on top of this crate, not part of it.

#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod snapshot;
pub mod table;
pub mod tuple;
pub mod txn;
pub mod value;
pub mod visibility;

pub use catalog::SchemaCatalog;
pub use config::EngineConfig;
pub use context::ConnectionContext;
pub use error::{Error, Result};
pub use snapshot::Snapshot;
pub use table::{BaseTable, Column, TableHandle, TempTable};
pub use tuple::{TupleVersion, VersionFlags, VersionedTuple};
pub use txn::{IsolationLevel, Transaction, TransactionManager, TxnState};
pub use value::Value;

use std::sync::Arc;

/// The engine's top-level handle: one transaction manager and one schema
/// catalog shared by every connection opened against it.
#[derive(Clone)]
pub struct Engine {
    manager: Arc<TransactionManager>,
    catalog: Arc<SchemaCatalog>,
    config: EngineConfig,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Engine {
            manager: TransactionManager::new(),
            catalog: SchemaCatalog::new(),
            config,
        }
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens a new connection context bound to this engine's manager and
    /// catalog.
    pub fn connect(&self) -> ConnectionContext {
        ConnectionContext::new(Arc::clone(&self.manager), Arc::clone(&self.catalog), &self.config)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
