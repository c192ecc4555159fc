//  Copyright 2024 the loadgen authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::collections::HashMap;

use ahash::RandomState;
use parking_lot::RwLock;

use crate::client::{Bin, Key, KeyDigest, Record};

/// Tracker of keys the generator believes are live in the cluster, mapping
/// key digest to the most recently written record. Verifying scans and
/// queries read it; puts grow it; failed deletes prune it.
///
/// Readers take the shared lock and see a consistent snapshot for the
/// duration of their call; `add_key` and `drop_key` take the exclusive
/// lock.
pub struct KeySet {
    records: RwLock<HashMap<KeyDigest, Record, RandomState>>,
    max_size: usize,
}

impl KeySet {
    /// Create a tracker capped at `max_size` live keys.
    pub fn new(max_size: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::default()),
            max_size,
        }
    }

    /// Remember `bins` as the most recent record under `key`. A full set
    /// only updates digests it already holds, so the working set stops
    /// growing once the cap is reached.
    pub fn add_key(&self, key: Key, bins: Vec<Bin>) {
        let mut records = self.records.write();
        if records.len() >= self.max_size && !records.contains_key(key.digest()) {
            return;
        }
        records.insert(*key.digest(), Record { key, bins });
    }

    /// The record last written under `key`, if the key is live.
    pub fn get_by_key(&self, key: &Key) -> Option<Record> {
        self.records.read().get(key.digest()).cloned()
    }

    /// Any live key. Selection need not be uniform.
    pub fn random_key(&self) -> Option<Key> {
        self.records.read().values().next().map(|r| r.key.clone())
    }

    /// Forget `key`.
    pub fn drop_key(&self, key: &Key) {
        self.records.write().remove(key.digest());
    }

    /// Whether the cap is reached. Once true, operation factories draw
    /// existing keys instead of minting fresh ones.
    pub fn is_full(&self) -> bool {
        self.records.read().len() >= self.max_size
    }

    /// Live key count.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no key is live.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of the whole map for verification passes.
    pub fn copy(&self) -> HashMap<KeyDigest, Record, RandomState> {
        self.records.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn key(n: i64) -> Key {
        Key::new("test", "demo", Value::Int(n))
    }

    fn bins(n: i64) -> Vec<Bin> {
        vec![Bin::new("x", Value::Int(n))]
    }

    #[test]
    fn add_get_drop_roundtrip() {
        let set = KeySet::new(16);
        set.add_key(key(1), bins(10));
        assert_eq!(set.len(), 1);
        let record = set.get_by_key(&key(1)).unwrap();
        assert_eq!(record.bins, bins(10));
        set.drop_key(&key(1));
        assert!(set.get_by_key(&key(1)).is_none());
        assert!(set.is_empty());
    }

    #[test]
    fn add_replaces_most_recent_record() {
        let set = KeySet::new(16);
        set.add_key(key(1), bins(10));
        set.add_key(key(1), bins(20));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get_by_key(&key(1)).unwrap().bins, bins(20));
    }

    #[test]
    fn full_set_stops_growing_but_still_updates() {
        let set = KeySet::new(2);
        set.add_key(key(1), bins(1));
        set.add_key(key(2), bins(2));
        assert!(set.is_full());
        // Novel digests are ignored at the cap.
        set.add_key(key(3), bins(3));
        assert_eq!(set.len(), 2);
        assert!(set.get_by_key(&key(3)).is_none());
        // Existing digests still take updates.
        set.add_key(key(2), bins(22));
        assert_eq!(set.get_by_key(&key(2)).unwrap().bins, bins(22));
    }

    #[test]
    fn random_key_draws_from_live_keys() {
        let set = KeySet::new(16);
        assert!(set.random_key().is_none());
        set.add_key(key(7), bins(7));
        assert_eq!(set.random_key().unwrap(), key(7));
    }

    #[test]
    fn copy_is_a_detached_snapshot() {
        let set = KeySet::new(16);
        set.add_key(key(1), bins(1));
        let snapshot = set.copy();
        set.drop_key(&key(1));
        assert_eq!(snapshot.len(), 1);
        assert!(set.is_empty());
    }
}
