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

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::model::Host;
use crate::value::Value;

/// In-memory reference client.
pub mod memory;

/// Length of a key digest in bytes.
pub const DIGEST_LEN: usize = 20;

/// The fixed-length hash the database uses as canonical key identity.
pub type KeyDigest = [u8; DIGEST_LEN];

/// A record address: namespace, set, the user-supplied value, and the
/// digest derived from set and value. The digest is the canonical identity;
/// two keys with equal digests are equal for all purposes here. Keys are
/// immutable after construction.
#[derive(Debug, Clone)]
pub struct Key {
    namespace: String,
    set: String,
    user_value: Value,
    digest: KeyDigest,
}

impl Key {
    /// Build a key and derive its digest.
    pub fn new(namespace: impl Into<String>, set: impl Into<String>, user_value: Value) -> Self {
        let namespace = namespace.into();
        let set = set.into();
        let digest = digest_of(&set, &user_value);
        Self {
            namespace,
            set,
            user_value,
            digest,
        }
    }

    /// Namespace the key addresses.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Set the key addresses.
    pub fn set(&self) -> &str {
        &self.set
    }

    /// The user-supplied value the digest was derived from.
    pub fn user_value(&self) -> &Value {
        &self.user_value
    }

    /// Canonical identity of the key.
    pub fn digest(&self) -> &KeyDigest {
        &self.digest
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.set, self.user_value)
    }
}

fn digest_of(set: &str, value: &Value) -> KeyDigest {
    let mut buf = Vec::with_capacity(set.len() + 32);
    buf.extend_from_slice(set.as_bytes());
    buf.push(0);
    value.digest_bytes(&mut buf);
    let hash = Sha256::digest(&buf);
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&hash[..DIGEST_LEN]);
    digest
}

/// A named field of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: Value,
}

impl Bin {
    /// Build a bin.
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A record as returned by the cluster: its key and its bins in stored
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Key the record lives under.
    pub key: Key,
    /// Ordered fields.
    pub bins: Vec<Bin>,
}

/// Connection-level policy.
#[derive(Debug, Clone, Default)]
pub struct ClientPolicy {
    /// Per-attempt connection timeout.
    pub timeout: Option<Duration>,
}

/// Policy for single-record reads.
#[derive(Debug, Clone, Default)]
pub struct ReadPolicy {
    /// Per-call timeout.
    pub timeout: Option<Duration>,
}

/// Policy for writes, deletes, and UDF invocations.
#[derive(Debug, Clone, Default)]
pub struct WritePolicy {
    /// Record time-to-live in seconds; zero means the namespace default.
    pub ttl: u32,
    /// Store the user key alongside the record.
    pub send_key: bool,
}

/// Policy for whole-set scans.
#[derive(Debug, Clone)]
pub struct ScanPolicy {
    /// Percentage of the set to sample.
    pub percent: u8,
    /// Wait for cluster migrations to settle before scanning.
    pub wait_for_migrations: bool,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            percent: 100,
            wait_for_migrations: false,
        }
    }
}

/// Policy for filtered queries.
#[derive(Debug, Clone, Default)]
pub struct QueryPolicy {
    /// Wait for cluster migrations to settle before querying.
    pub wait_for_migrations: bool,
}

/// Filter attached to a query statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Match records whose bin equals the value.
    Equal {
        /// Bin the filter applies to.
        bin: String,
        /// Operand.
        value: Value,
    },
    /// Match records whose integer bin falls in `[begin, end]`.
    Range {
        /// Bin the filter applies to.
        bin: String,
        /// Lower bound, inclusive.
        begin: i64,
        /// Upper bound, inclusive.
        end: i64,
    },
}

/// A query statement: where to look and what to match.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Target namespace.
    pub namespace: String,
    /// Target set.
    pub set: String,
    /// Optional filter; absent means scan-like full coverage.
    pub filter: Option<Filter>,
}

/// Collation of a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Integer collation.
    Numeric,
    /// String collation.
    String,
}

/// Source language of a registered UDF module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UdfLang {
    /// Lua, the only language clusters commonly accept.
    #[default]
    Lua,
}

/// Errors surfaced by a [`KvClient`]. The statistics pipeline needs enough
/// structure to tell timeouts from other failures; everything else is
/// carried as text.
#[derive(Debug, Clone, Error)]
pub enum KvError {
    /// The call exceeded its policy timeout.
    #[error("operation timed out")]
    Timeout,
    /// The addressed record does not exist.
    #[error("key not found")]
    NotFound,
    /// The client was closed while the call was issued.
    #[error("client is closed")]
    Closed,
    /// The cluster could not be reached.
    #[error("cluster connection failed: {0}")]
    Connection(String),
    /// Any other failure reported by the server.
    #[error("server error: {0}")]
    Server(String),
}

impl KvError {
    /// Whether the error counts as a timeout for statistics purposes.
    pub fn is_timeout(&self) -> bool {
        matches!(self, KvError::Timeout)
    }
}

/// A layer for accessing the database cluster under load. One client is
/// shared read-only by every worker thread, so implementations must be
/// thread safe. The engine never inspects results beyond error
/// classification; it counts outcomes and moves on.
///
/// Scan and query results stream through channels: the record channel
/// yields matching records until the operation completes, the error channel
/// yields any per-partition failures. Both channels close when the
/// operation is done, and callers are expected to drain them.
pub trait KvClient: Sized + Send + Sync + 'static {
    /// Connect to the cluster through the given seed hosts.
    /// A connection failure is fatal at plan load.
    fn connect(policy: &ClientPolicy, hosts: &[Host]) -> Result<Self, KvError>;

    /// Close the connection. In-flight calls complete; later calls fail.
    fn close(&self);

    /// Read the record under `key`.
    fn get(&self, policy: &ReadPolicy, key: &Key) -> Result<Record, KvError>;

    /// Write `bins` under `key`, replacing any previous record.
    fn put_bins(&self, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<(), KvError>;

    /// Delete the record under `key`. Returns whether a record existed.
    fn delete(&self, policy: &WritePolicy, key: &Key) -> Result<bool, KvError>;

    /// Stream every record of `namespace`/`set`.
    fn scan_all(
        &self,
        policy: &ScanPolicy,
        namespace: &str,
        set: &str,
    ) -> (Receiver<Record>, Receiver<KvError>);

    /// Stream the records matching `statement`.
    fn query(
        &self,
        policy: &QueryPolicy,
        statement: &Statement,
    ) -> (Receiver<Record>, Receiver<KvError>);

    /// Invoke a registered UDF on the record under `key`.
    fn execute(
        &self,
        policy: &WritePolicy,
        key: &Key,
        package: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Option<Value>, KvError>;

    /// Create a secondary index. Creating an index that already exists is
    /// expected to succeed.
    fn create_index(
        &self,
        policy: &WritePolicy,
        namespace: &str,
        set: &str,
        index_name: &str,
        bin_name: &str,
        index_type: IndexType,
    ) -> Result<(), KvError>;

    /// Register a UDF module under `name`.
    fn register_udf(
        &self,
        policy: &WritePolicy,
        body: &[u8],
        name: &str,
        language: UdfLang,
    ) -> Result<(), KvError>;
}

#[cfg(test)]
pub(crate) mod stub {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::mpsc;

    use super::*;

    /// Scripted client for engine tests. Every call succeeds unless an
    /// error override is set, scans and queries stream the configured
    /// records, and raw call counts are kept per method.
    #[derive(Default)]
    pub(crate) struct StubClient {
        pub(crate) get_error: Option<KvError>,
        pub(crate) put_error: Option<KvError>,
        pub(crate) delete_error: Option<KvError>,
        pub(crate) scan_records: Vec<Record>,
        pub(crate) scan_errors: Vec<KvError>,
        pub(crate) query_records: Vec<Record>,
        pub(crate) gets: AtomicU64,
        pub(crate) puts: AtomicU64,
        pub(crate) deletes: AtomicU64,
        pub(crate) executes: AtomicU64,
        pub(crate) indexes_created: AtomicU64,
        pub(crate) udfs_registered: AtomicU64,
    }

    fn stream<T: Send + 'static>(items: &[T]) -> mpsc::Receiver<T>
    where
        T: Clone,
    {
        let (tx, rx) = mpsc::channel();
        for item in items {
            let _ = tx.send(item.clone());
        }
        rx
    }

    impl KvClient for StubClient {
        fn connect(_policy: &ClientPolicy, _hosts: &[Host]) -> Result<Self, KvError> {
            Ok(Self::default())
        }

        fn close(&self) {}

        fn get(&self, _policy: &ReadPolicy, key: &Key) -> Result<Record, KvError> {
            self.gets.fetch_add(1, Ordering::Relaxed);
            match &self.get_error {
                Some(err) => Err(err.clone()),
                None => Ok(Record {
                    key: key.clone(),
                    bins: vec![],
                }),
            }
        }

        fn put_bins(
            &self,
            _policy: &WritePolicy,
            _key: &Key,
            _bins: &[Bin],
        ) -> Result<(), KvError> {
            self.puts.fetch_add(1, Ordering::Relaxed);
            match &self.put_error {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }

        fn delete(&self, _policy: &WritePolicy, _key: &Key) -> Result<bool, KvError> {
            self.deletes.fetch_add(1, Ordering::Relaxed);
            match &self.delete_error {
                Some(err) => Err(err.clone()),
                None => Ok(true),
            }
        }

        fn scan_all(
            &self,
            _policy: &ScanPolicy,
            _namespace: &str,
            _set: &str,
        ) -> (mpsc::Receiver<Record>, mpsc::Receiver<KvError>) {
            (stream(&self.scan_records), stream(&self.scan_errors))
        }

        fn query(
            &self,
            _policy: &QueryPolicy,
            _statement: &Statement,
        ) -> (mpsc::Receiver<Record>, mpsc::Receiver<KvError>) {
            (stream(&self.query_records), stream(&[]))
        }

        fn execute(
            &self,
            _policy: &WritePolicy,
            _key: &Key,
            _package: &str,
            _function: &str,
            _args: &[Value],
        ) -> Result<Option<Value>, KvError> {
            self.executes.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }

        fn create_index(
            &self,
            _policy: &WritePolicy,
            _namespace: &str,
            _set: &str,
            _index_name: &str,
            _bin_name: &str,
            _index_type: IndexType,
        ) -> Result<(), KvError> {
            self.indexes_created.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn register_udf(
            &self,
            _policy: &WritePolicy,
            _body: &[u8],
            _name: &str,
            _language: UdfLang,
        ) -> Result<(), KvError> {
            self.udfs_registered.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_compare_by_digest() {
        let a = Key::new("ns", "set", Value::Int(42));
        let b = Key::new("other", "set", Value::Int(42));
        let c = Key::new("ns", "set", Value::Int(43));
        // The namespace is not part of the digest, mirroring clusters that
        // scope digests to set + user value.
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn digest_is_stable_across_constructions() {
        let a = Key::new("ns", "s", Value::from("user1"));
        let b = Key::new("ns", "s", Value::from("user1"));
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn set_and_value_digests_do_not_collide() {
        let a = Key::new("ns", "ab", Value::from("c"));
        let b = Key::new("ns", "a", Value::from("bc"));
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn key_displays_address() {
        let k = Key::new("test", "demo", Value::Int(7));
        assert_eq!(k.to_string(), "test/demo/7");
    }
}
