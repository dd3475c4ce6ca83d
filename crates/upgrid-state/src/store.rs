//! StateStore — redb-backed persistence for the upgrid registry.
//!
//! Provides typed CRUD operations over services, instances, hosts, and
//! upgrade records. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(HOSTS).map_err(map_err!(Table))?;
        txn.open_table(UPGRADES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put<T: Serialize>(
        &self,
        table: JsonTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// List values whose key starts with `prefix` (empty prefix lists all).
    fn scan<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        prefix: &str,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
            }
        }
        Ok(results)
    }

    fn remove(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Services ───────────────────────────────────────────────────

    /// Insert or update a service spec.
    pub fn put_service(&self, spec: &ServiceSpec) -> StateResult<()> {
        self.put(SERVICES, &spec.name, spec)?;
        debug!(service = %spec.name, scale = spec.scale, "service stored");
        Ok(())
    }

    /// Get a service by name.
    pub fn get_service(&self, name: &str) -> StateResult<Option<ServiceSpec>> {
        self.get(SERVICES, name)
    }

    /// List all services.
    pub fn list_services(&self) -> StateResult<Vec<ServiceSpec>> {
        self.scan(SERVICES, "")
    }

    /// Delete a service by name. Returns true if it existed.
    pub fn delete_service(&self, name: &str) -> StateResult<bool> {
        let existed = self.remove(SERVICES, name)?;
        debug!(service = %name, existed, "service deleted");
        Ok(existed)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or update an instance state.
    pub fn put_instance(&self, state: &InstanceState) -> StateResult<()> {
        self.put(INSTANCES, &state.table_key(), state)
    }

    /// Get an instance by its composite key.
    pub fn get_instance(&self, key: &str) -> StateResult<Option<InstanceState>> {
        self.get(INSTANCES, key)
    }

    /// Find an instance by ID alone, across all services.
    pub fn find_instance(&self, instance_id: &str) -> StateResult<Option<InstanceState>> {
        let all: Vec<InstanceState> = self.scan(INSTANCES, "")?;
        Ok(all.into_iter().find(|i| i.id == instance_id))
    }

    /// List all instances of a service.
    pub fn list_instances_for_service(&self, service: &str) -> StateResult<Vec<InstanceState>> {
        self.scan(INSTANCES, &format!("{service}:"))
    }

    /// Delete an instance by key. Returns true if it existed.
    pub fn delete_instance(&self, key: &str) -> StateResult<bool> {
        self.remove(INSTANCES, key)
    }

    /// Delete all instances of a service. Returns number deleted.
    pub fn delete_instances_for_service(&self, service: &str) -> StateResult<u32> {
        let prefix = format!("{service}:");
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect()
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Insert or update a host.
    pub fn put_host(&self, host: &HostInfo) -> StateResult<()> {
        self.put(HOSTS, &host.id, host)
    }

    /// Get a host by ID.
    pub fn get_host(&self, host_id: &str) -> StateResult<Option<HostInfo>> {
        self.get(HOSTS, host_id)
    }

    /// List all hosts.
    pub fn list_hosts(&self) -> StateResult<Vec<HostInfo>> {
        self.scan(HOSTS, "")
    }

    // ── Upgrades ───────────────────────────────────────────────────

    /// Insert or update the upgrade record of a service pair.
    pub fn put_upgrade(&self, record: &UpgradeRecord) -> StateResult<()> {
        let key = record.table_key();
        self.put(UPGRADES, &key, record)?;
        debug!(%key, state = %record.state, "upgrade record stored");
        Ok(())
    }

    /// Get the upgrade record of a `from` → `to` pair.
    pub fn get_upgrade(&self, from: &str, to: &str) -> StateResult<Option<UpgradeRecord>> {
        self.get(UPGRADES, &upgrade_key(from, to))
    }

    /// List all upgrade records.
    pub fn list_upgrades(&self) -> StateResult<Vec<UpgradeRecord>> {
        self.scan(UPGRADES, "")
    }
}
