//! Runtime registry
//!
//! Authoritative in-memory state for runtimes that are currently
//! trackable, keyed by subaccount ID. The discovery loop owns creation
//! and deletion; workers only replace the scan map of an existing entry.
//! Entries have no TTL.

use dashmap::DashMap;

use crate::models::RuntimeInfo;
use crate::scanner::ScanMap;

/// One tracked runtime: its metadata plus the last known scan per scanner.
#[derive(Debug, Clone, Default)]
pub struct RuntimeRecord {
    pub info: RuntimeInfo,
    pub scan_map: ScanMap,
}

impl RuntimeRecord {
    /// Fresh record with an empty scan map.
    pub fn new(info: RuntimeInfo) -> Self {
        Self {
            info,
            scan_map: ScanMap::new(),
        }
    }
}

/// Thread-safe mapping `subaccount_id -> RuntimeRecord`.
#[derive(Default)]
pub struct RuntimeRegistry {
    records: DashMap<String, RuntimeRecord>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sub_account_id: &str) -> Option<RuntimeRecord> {
        self.records.get(sub_account_id).map(|r| r.clone())
    }

    pub fn contains(&self, sub_account_id: &str) -> bool {
        self.records.contains_key(sub_account_id)
    }

    /// Insert or overwrite the record for its subaccount.
    pub fn insert(&self, record: RuntimeRecord) {
        self.records
            .insert(record.info.sub_account_id.clone(), record);
    }

    pub fn remove(&self, sub_account_id: &str) -> Option<RuntimeRecord> {
        self.records.remove(sub_account_id).map(|(_, record)| record)
    }

    /// Replace the scan map of an existing record. A no-op returning false
    /// when the record was removed in the meantime, so a worker finishing
    /// after discovery dropped the runtime exits cleanly.
    pub fn update_scan_map(&self, sub_account_id: &str, scan_map: ScanMap) -> bool {
        match self.records.get_mut(sub_account_id) {
            Some(mut record) => {
                record.scan_map = scan_map;
                true
            }
            None => false,
        }
    }

    /// Clone of all records; iteration never holds the map lock across scans.
    pub fn snapshot(&self) -> Vec<RuntimeRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
