use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};

use parking_lot::RwLock;

use crate::model::Host;
use crate::value::Value;

use super::{
    Bin, ClientPolicy, Filter, IndexType, Key, KeyDigest, KvClient, KvError, QueryPolicy,
    ReadPolicy, Record, ScanPolicy, Statement, UdfLang, WritePolicy,
};

/// An in-memory stand-in for a real cluster client.
///
/// It honors every calling contract the engine relies on: records are keyed
/// by digest, deletes report whether a record existed, scans and queries
/// stream through channels that close on completion, and all calls fail
/// with [`KvError::Closed`] after `close()`. Local smoke runs and tests use
/// it in place of a wire client.
pub struct MemoryClient {
    records: RwLock<HashMap<KeyDigest, Record, ahash::RandomState>>,
    udfs: RwLock<HashSet<String>>,
    indexes: RwLock<HashSet<String>>,
    closed: AtomicBool,
}

impl MemoryClient {
    fn guard(&self) -> Result<(), KvError> {
        if self.closed.load(Ordering::Acquire) {
            Err(KvError::Closed)
        } else {
            Ok(())
        }
    }

    fn stream(&self, matching: Vec<Record>) -> (Receiver<Record>, Receiver<KvError>) {
        let (record_tx, record_rx) = mpsc::channel();
        let (error_tx, error_rx) = mpsc::channel();
        if self.closed.load(Ordering::Acquire) {
            let _ = error_tx.send(KvError::Closed);
        } else {
            for record in matching {
                let _ = record_tx.send(record);
            }
        }
        // Senders drop here, closing both channels for the draining caller.
        (record_rx, error_rx)
    }
}

impl KvClient for MemoryClient {
    fn connect(_policy: &ClientPolicy, hosts: &[Host]) -> Result<Self, KvError> {
        if hosts.is_empty() {
            return Err(KvError::Connection("no seed hosts configured".to_string()));
        }
        Ok(Self {
            records: RwLock::new(HashMap::default()),
            udfs: RwLock::new(HashSet::new()),
            indexes: RwLock::new(HashSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn get(&self, _policy: &ReadPolicy, key: &Key) -> Result<Record, KvError> {
        self.guard()?;
        self.records
            .read()
            .get(key.digest())
            .cloned()
            .ok_or(KvError::NotFound)
    }

    fn put_bins(&self, _policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<(), KvError> {
        self.guard()?;
        self.records.write().insert(
            *key.digest(),
            Record {
                key: key.clone(),
                bins: bins.to_vec(),
            },
        );
        Ok(())
    }

    fn delete(&self, _policy: &WritePolicy, key: &Key) -> Result<bool, KvError> {
        self.guard()?;
        Ok(self.records.write().remove(key.digest()).is_some())
    }

    fn scan_all(
        &self,
        policy: &ScanPolicy,
        namespace: &str,
        set: &str,
    ) -> (Receiver<Record>, Receiver<KvError>) {
        let mut matching: Vec<Record> = self
            .records
            .read()
            .values()
            .filter(|r| r.key.namespace() == namespace && r.key.set() == set)
            .cloned()
            .collect();
        let keep = matching.len() * usize::from(policy.percent.min(100)) / 100;
        matching.truncate(keep);
        self.stream(matching)
    }

    fn query(
        &self,
        _policy: &QueryPolicy,
        statement: &Statement,
    ) -> (Receiver<Record>, Receiver<KvError>) {
        let matching: Vec<Record> = self
            .records
            .read()
            .values()
            .filter(|r| {
                r.key.namespace() == statement.namespace && r.key.set() == statement.set
            })
            .filter(|r| match &statement.filter {
                None => true,
                Some(Filter::Equal { bin, value }) => {
                    r.bins.iter().any(|b| &b.name == bin && &b.value == value)
                }
                Some(Filter::Range { bin, begin, end }) => r.bins.iter().any(|b| {
                    &b.name == bin
                        && matches!(b.value, Value::Int(i) if *begin <= i && i <= *end)
                }),
            })
            .cloned()
            .collect();
        self.stream(matching)
    }

    fn execute(
        &self,
        _policy: &WritePolicy,
        _key: &Key,
        package: &str,
        _function: &str,
        _args: &[Value],
    ) -> Result<Option<Value>, KvError> {
        self.guard()?;
        if !self.udfs.read().contains(package) {
            return Err(KvError::Server(format!(
                "udf package {package} is not registered"
            )));
        }
        Ok(None)
    }

    fn create_index(
        &self,
        _policy: &WritePolicy,
        _namespace: &str,
        _set: &str,
        index_name: &str,
        _bin_name: &str,
        _index_type: IndexType,
    ) -> Result<(), KvError> {
        self.guard()?;
        // Re-creating an existing index is fine.
        self.indexes.write().insert(index_name.to_string());
        Ok(())
    }

    fn register_udf(
        &self,
        _policy: &WritePolicy,
        _body: &[u8],
        name: &str,
        _language: UdfLang,
    ) -> Result<(), KvError> {
        self.guard()?;
        self.udfs.write().insert(name.to_string());
        Ok(())
    }
}
