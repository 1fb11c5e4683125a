use std::collections::HashMap;

use rkos_core::devices::BlockStore;
use rkos_core::fs::Tsb;

/// In-memory key-value block store. Keys are derived from the disk
/// address as "track:sector:block" strings, matching the persisted
/// layout a browser- or file-backed store would use.
pub struct RamStore {
    values: HashMap<String, Vec<u8>>,
}

impl RamStore {
    pub fn new() -> RamStore {
        RamStore {
            values: HashMap::new(),
        }
    }

    fn key(tsb: Tsb) -> String {
        format!("{}:{}:{}", tsb.track, tsb.sector, tsb.block)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl BlockStore for RamStore {
    fn get(&self, tsb: Tsb) -> Option<Vec<u8>> {
        self.values.get(&RamStore::key(tsb)).cloned()
    }

    fn set(&mut self, tsb: Tsb, bytes: Vec<u8>) {
        self.values.insert(RamStore::key(tsb), bytes);
    }
}
