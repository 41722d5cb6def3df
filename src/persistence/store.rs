//! Typed persistence over the embedded database.
//!
//! Layout mirrors the browser-storage keys the desk always used:
//! the whole stream collection plus UI state live in `cob-stream-storage`,
//! scanner preferences in `stream-scanner-settings`, and spread settings
//! under their own keys (`spread-step-size`, `default-spread-values`).

use redb::{ReadableTable, TableDefinition};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::model::StreamSet;
use crate::persistence::redb_store::{RedbStore, StoreError};
use crate::view::Tab;

const COB_STREAM_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("cob-stream-storage");
const SCANNER_TABLE: TableDefinition<&str, Vec<u8>> =
    TableDefinition::new("stream-scanner-settings");
const SPREAD_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("spread-settings");

const STREAMS_KEY: &str = "streams";
const UI_STATE_KEY: &str = "ui";
const SCANNER_KEY: &str = "settings";
const STEP_SIZE_KEY: &str = "spread-step-size";
const SPREAD_DEFAULTS_KEY: &str = "default-spread-values";

/// Persisted UI state: active tab and which accordion sections are open.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeskUiState {
    #[serde(default)]
    pub active_tab: Tab,
    #[serde(default)]
    pub open_sections: Vec<String>,
}

/// Scanner preferences: column visibility and auto-relaunch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScannerSettings {
    #[serde(default)]
    pub visible_columns: Vec<String>,
    #[serde(default)]
    pub auto_relaunch: bool,
}

/// Per-side default spread values, one entry per ladder level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpreadDefaults {
    pub bid: Vec<Decimal>,
    pub ask: Vec<Decimal>,
}

impl SpreadDefaults {
    /// Migrate the legacy flat 5-number array: magnitudes apply to both
    /// sides, with the ask signed per the side convention.
    pub fn from_legacy(values: Vec<Decimal>) -> Self {
        Self {
            bid: values.clone(),
            ask: values.into_iter().map(|v| -v).collect(),
        }
    }
}

pub struct PersistenceStore {
    store: Arc<RedbStore>,
}

impl PersistenceStore {
    pub fn new(store: Arc<RedbStore>) -> Self {
        Self { store }
    }

    fn put<T: Serialize>(
        &self,
        table: TableDefinition<&str, Vec<u8>>,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let txn = self.store.begin_write()?;
        {
            let mut t = txn.open_table(table)?;
            t.insert(key, serde_json::to_vec(value)?)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, Vec<u8>>,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let txn = self.store.begin_read()?;
        let t = match txn.open_table(table) {
            Ok(t) => t,
            // Table not created yet: nothing stored
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match t.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes.value())?)),
            None => Ok(None),
        }
    }

    fn get_raw(
        &self,
        table: TableDefinition<&str, Vec<u8>>,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.store.begin_read()?;
        let t = match txn.open_table(table) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(t.get(key)?.map(|v| v.value()))
    }

    // --- Stream collection + UI state ---

    pub fn save_streams(&self, streams: &[StreamSet]) -> Result<(), StoreError> {
        self.put(COB_STREAM_TABLE, STREAMS_KEY, &streams)
    }

    pub fn load_streams(&self) -> Result<Vec<StreamSet>, StoreError> {
        let streams = self
            .get::<Vec<StreamSet>>(COB_STREAM_TABLE, STREAMS_KEY)?
            .unwrap_or_default();
        if !streams.is_empty() {
            info!("Loaded {} streams from persistence", streams.len());
        }
        Ok(streams)
    }

    pub fn save_ui_state(&self, ui: &DeskUiState) -> Result<(), StoreError> {
        self.put(COB_STREAM_TABLE, UI_STATE_KEY, ui)
    }

    pub fn load_ui_state(&self) -> Result<DeskUiState, StoreError> {
        Ok(self
            .get(COB_STREAM_TABLE, UI_STATE_KEY)?
            .unwrap_or_default())
    }

    // --- Scanner settings ---

    pub fn save_scanner_settings(&self, settings: &ScannerSettings) -> Result<(), StoreError> {
        self.put(SCANNER_TABLE, SCANNER_KEY, settings)
    }

    pub fn load_scanner_settings(&self) -> Result<ScannerSettings, StoreError> {
        Ok(self.get(SCANNER_TABLE, SCANNER_KEY)?.unwrap_or_default())
    }

    // --- Spread settings ---

    pub fn save_step_size(&self, step: Decimal) -> Result<(), StoreError> {
        self.put(SPREAD_TABLE, STEP_SIZE_KEY, &step)
    }

    pub fn load_step_size(&self) -> Result<Option<Decimal>, StoreError> {
        self.get(SPREAD_TABLE, STEP_SIZE_KEY)
    }

    pub fn save_spread_defaults(&self, defaults: &SpreadDefaults) -> Result<(), StoreError> {
        self.put(SPREAD_TABLE, SPREAD_DEFAULTS_KEY, defaults)
    }

    /// Load spread defaults, migrating the legacy flat-array format in place
    /// when encountered.
    pub fn load_spread_defaults(&self) -> Result<Option<SpreadDefaults>, StoreError> {
        let Some(bytes) = self.get_raw(SPREAD_TABLE, SPREAD_DEFAULTS_KEY)? else {
            return Ok(None);
        };
        if let Ok(defaults) = serde_json::from_slice::<SpreadDefaults>(&bytes) {
            return Ok(Some(defaults));
        }
        // Legacy format: a flat 5-number array
        let legacy: Vec<Decimal> = serde_json::from_slice(&bytes)?;
        if legacy.len() != 5 {
            return Err(StoreError::Integrity(format!(
                "legacy spread defaults must have 5 entries, found {}",
                legacy.len()
            )));
        }
        let migrated = SpreadDefaults::from_legacy(legacy);
        self.save_spread_defaults(&migrated)?;
        info!("Migrated legacy spread defaults to per-side shape");
        Ok(Some(migrated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds;
    use crate::model::SecurityType;
    use rust_decimal_macros::dec;

    fn temp_store() -> (PersistenceStore, String) {
        let path = format!("/tmp/test_desk_{}.redb", uuid::Uuid::new_v4());
        let redb = Arc::new(RedbStore::new(&path).expect("Failed to create RedbStore"));
        (PersistenceStore::new(redb), path)
    }

    fn cleanup(path: &str) {
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn stream_collection_round_trips() {
        let (store, path) = temp_store();
        let streams = vec![feeds::build_stream(
            "p-1",
            "AU-GOV-3Y",
            "Treasury",
            SecurityType::GovernmentBond,
            3,
            vec![],
        )];
        store.save_streams(&streams).unwrap();
        let loaded = store.load_streams().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "p-1");
        assert_eq!(loaded[0].bid.spread_matrix.len(), 3);
        cleanup(&path);
    }

    #[test]
    fn empty_store_loads_empty_collection() {
        let (store, path) = temp_store();
        assert!(store.load_streams().unwrap().is_empty());
        assert!(store.load_spread_defaults().unwrap().is_none());
        cleanup(&path);
    }

    #[test]
    fn scanner_settings_round_trip() {
        let (store, path) = temp_store();
        let settings = ScannerSettings {
            visible_columns: vec!["security".into(), "state".into()],
            auto_relaunch: true,
        };
        store.save_scanner_settings(&settings).unwrap();
        let loaded = store.load_scanner_settings().unwrap();
        assert_eq!(loaded.visible_columns.len(), 2);
        assert!(loaded.auto_relaunch);
        cleanup(&path);
    }

    #[test]
    fn legacy_spread_defaults_migrate_on_load() {
        let (store, path) = temp_store();
        // Write the legacy flat array directly
        let legacy = vec![dec!(2), dec!(4), dec!(6), dec!(8), dec!(10)];
        store
            .put(SPREAD_TABLE, SPREAD_DEFAULTS_KEY, &legacy)
            .unwrap();

        let migrated = store.load_spread_defaults().unwrap().unwrap();
        assert_eq!(migrated.bid, legacy);
        assert_eq!(migrated.ask[0], dec!(-2));

        // Second load reads the migrated shape without re-migrating
        let reloaded = store.load_spread_defaults().unwrap().unwrap();
        assert_eq!(reloaded, migrated);
        cleanup(&path);
    }

    #[test]
    fn malformed_legacy_array_is_an_integrity_error() {
        let (store, path) = temp_store();
        let bad = vec![dec!(1), dec!(2)];
        store.put(SPREAD_TABLE, SPREAD_DEFAULTS_KEY, &bad).unwrap();
        assert!(matches!(
            store.load_spread_defaults(),
            Err(StoreError::Integrity(_))
        ));
        cleanup(&path);
    }
}
