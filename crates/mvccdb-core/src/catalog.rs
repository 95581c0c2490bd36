//! Schema catalog: maps `schema.table` names to table handles and owns
//! temp tables.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::table::{BaseTable, Column, TableHandle, TempTable};

/// Reserved schema name under which temp tables live.
pub const TEMP_SCHEMA: &str = "pg_temp";

/// Maps `schema_name -> (table_name -> Table)`. Tables are long-lived;
/// temp tables are created under [`TEMP_SCHEMA`] and destroyed when their
/// owning result set closes.
pub struct SchemaCatalog {
    schemas: RwLock<HashMap<String, HashMap<String, TableHandle>>>,
}

impl SchemaCatalog {
    pub fn new() -> Arc<Self> {
        let mut schemas = HashMap::new();
        schemas.insert(TEMP_SCHEMA.to_string(), HashMap::new());
        Arc::new(SchemaCatalog {
            schemas: RwLock::new(schemas),
        })
    }

    pub fn create_table(&self, schema: &str, table: &str, columns: Vec<Column>) -> Result<Arc<BaseTable>> {
        let handle = BaseTable::new(table, columns);
        let mut schemas = self.schemas.write().map_err(|_| Error::LockPoisoned)?;
        let tables = schemas.entry(schema.to_string()).or_default();
        if tables.contains_key(table) {
            return Err(Error::InvalidArgument(format!(
                "table {}.{} already exists",
                schema, table
            )));
        }
        tables.insert(table.to_string(), TableHandle::Base(Arc::clone(&handle)));
        Ok(handle)
    }

    pub fn get_table(&self, schema: &str, table: &str) -> Result<TableHandle> {
        let schemas = self.schemas.read().map_err(|_| Error::LockPoisoned)?;
        schemas
            .get(schema)
            .and_then(|tables| tables.get(table))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("table {}.{} not found", schema, table)))
    }

    pub fn drop_table(&self, schema: &str, table: &str) -> Result<()> {
        let mut schemas = self.schemas.write().map_err(|_| Error::LockPoisoned)?;
        let tables = schemas
            .get_mut(schema)
            .ok_or_else(|| Error::NotFound(format!("schema {} not found", schema)))?;
        tables
            .remove(table)
            .ok_or_else(|| Error::NotFound(format!("table {}.{} not found", schema, table)))?;
        Ok(())
    }

    /// Creates a temp table under [`TEMP_SCHEMA`], for intermediate
    /// result-set materialization.
    pub fn create_temp_table(&self, name: &str) -> Result<Arc<TempTable>> {
        let handle = TempTable::new(name);
        let mut schemas = self.schemas.write().map_err(|_| Error::LockPoisoned)?;
        let tables = schemas.entry(TEMP_SCHEMA.to_string()).or_default();
        tables.insert(name.to_string(), TableHandle::Temp(Arc::clone(&handle)));
        Ok(handle)
    }

    /// Destroys a temp table; called when its owning result set closes.
    pub fn drop_temp_table(&self, name: &str) -> Result<()> {
        let mut schemas = self.schemas.write().map_err(|_| Error::LockPoisoned)?;
        if let Some(tables) = schemas.get_mut(TEMP_SCHEMA) {
            tables.remove(name);
        }
        Ok(())
    }
}
