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

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use anyhow::{bail, Result};
use itertools::{repeat_n, Itertools};
use rand::{thread_rng, Rng};

use crate::client::{
    Bin, Filter, IndexType, Key, KvClient, KvError, QueryPolicy, ReadPolicy, Record, ScanPolicy,
    Statement, WritePolicy,
};
use crate::generator::random;
use crate::keyset::KeySet;
use crate::model::{
    BinConstraints, Constraints, DataModel, LoadModel, OpDescriptor, OpSpec, Scalar, StatementSpec,
};
use crate::pool::{KeyPool, RecordPool};
use crate::stats::{OpKind, Stats};
use crate::value::Value;

/// A ready-to-run operation: a zero-argument closure closed over the
/// client, pools, key set, policy, and statistics it needs. Cloning is an
/// `Arc` bump, so the executor can repeat one closure across many slots of
/// its operations array.
pub type Op = Arc<dyn Fn() + Send + Sync>;

/// Per-call key source for descriptor-driven operations. While the key set
/// has room, fresh keys are minted from the data model; once it is full,
/// keys are drawn from the live set so the working set stops growing.
pub struct KeyBuilder {
    key_set: Arc<KeySet>,
    model: Arc<DataModel>,
}

impl KeyBuilder {
    /// Build a key source over `key_set` and `model`.
    pub fn new(key_set: Arc<KeySet>, model: Arc<DataModel>) -> Self {
        Self { key_set, model }
    }

    /// The key to use this cycle. `None` means the set is full but holds
    /// nothing to draw from; callers skip the cycle.
    pub fn key(&self) -> Option<Key> {
        if self.key_set.is_full() {
            self.key_set.random_key()
        } else {
            Some(random::key(&self.model.keys))
        }
    }
}

/// Per-call bin source: a fixed name, a fresh constrained value per
/// invocation. Optional bins sit out roughly half their cycles.
pub struct BinBuilder {
    constraints: BinConstraints,
}

impl BinBuilder {
    /// Build a bin source for one bin constraint.
    pub fn new(constraints: BinConstraints) -> Self {
        Self { constraints }
    }

    /// The bin for this cycle, or `None` when an optional bin sits out.
    pub fn bin(&self) -> Option<Bin> {
        if self.constraints.optional && thread_rng().gen_bool(0.5) {
            return None;
        }
        Some(Bin::new(
            self.constraints.name.clone(),
            random::value(&self.constraints.value),
        ))
    }
}

/// Builds operation closures over one plan's client, pools, key set, and
/// statistics. Descriptor-driven operations go through [`KeyBuilder`] /
/// [`BinBuilder`]; counts-driven operations serve straight from the pools.
pub struct OpFactory<C: KvClient> {
    client: Arc<C>,
    keys: Arc<KeyPool>,
    records: Arc<RecordPool>,
    key_set: Arc<KeySet>,
    stats: Arc<Stats>,
    model: Arc<DataModel>,
}

impl<C: KvClient> OpFactory<C> {
    /// Bind a factory to one plan's shared state.
    pub fn new(
        client: Arc<C>,
        keys: Arc<KeyPool>,
        records: Arc<RecordPool>,
        key_set: Arc<KeySet>,
        stats: Arc<Stats>,
        model: Arc<DataModel>,
    ) -> Self {
        Self {
            client,
            keys,
            records,
            key_set,
            stats,
            model,
        }
    }

    /// Expand the counts-based load model into its operations array: every
    /// kind's closure repeated its configured count, so a worker drawing a
    /// uniform index executes kind `k` with probability `count(k)/total`.
    pub fn build_load(&self, load: &LoadModel) -> Vec<Op> {
        let mut ops = Vec::with_capacity(load.total() as usize);
        ops.extend(repeat_n(self.pooled_get(), load.reads as usize));
        ops.extend(repeat_n(self.pooled_put(), load.writes as usize));
        ops.extend(repeat_n(self.pooled_delete(), load.deletes as usize));
        ops.extend(repeat_n(self.derived_query(), load.queries as usize));
        ops.extend(repeat_n(
            self.scan(ScanPolicy::default(), false),
            load.scans as usize,
        ));
        ops
    }

    /// Expand percentage descriptors into the 100-slot operations array.
    /// The descriptor list is expected to be validated (shares sum to 100).
    pub fn build_mix(&self, descriptors: &[OpDescriptor]) -> Result<Vec<Op>> {
        let mut ops = Vec::with_capacity(100);
        for descriptor in descriptors {
            let op = self.build(descriptor)?;
            ops.extend(repeat_n(op, descriptor.load as usize));
        }
        Ok(ops)
    }

    /// Build the closure for one descriptor.
    pub fn build(&self, descriptor: &OpDescriptor) -> Result<Op> {
        match &descriptor.spec {
            OpSpec::Get => Ok(self.fresh_get()),
            OpSpec::Put => Ok(self.fresh_put()),
            OpSpec::Delete => Ok(self.fresh_delete()),
            OpSpec::Scan {
                percent,
                wait_for_migrations,
                verify,
            } => Ok(self.scan(
                ScanPolicy {
                    percent: *percent,
                    wait_for_migrations: *wait_for_migrations,
                },
                *verify,
            )),
            OpSpec::Query {
                statement,
                wait_for_migrations,
                verify,
                create_index,
            } => self.query(statement, *wait_for_migrations, *verify, *create_index),
            OpSpec::ExecUdf {
                package,
                function,
                args,
            } => Ok(self.exec_udf(package, function, args)),
        }
    }

    fn key_builder(&self) -> KeyBuilder {
        KeyBuilder::new(Arc::clone(&self.key_set), Arc::clone(&self.model))
    }

    fn fresh_get(&self) -> Op {
        let client = Arc::clone(&self.client);
        let stats = Arc::clone(&self.stats);
        let builder = self.key_builder();
        let policy = ReadPolicy::default();
        Arc::new(move || {
            let Some(key) = builder.key() else { return };
            let result = client.get(&policy, &key);
            stats.of(OpKind::Get).record(result.as_ref().err());
        })
    }

    fn fresh_put(&self) -> Op {
        let client = Arc::clone(&self.client);
        let stats = Arc::clone(&self.stats);
        let key_set = Arc::clone(&self.key_set);
        let builder = self.key_builder();
        let bins = self
            .model
            .bins
            .iter()
            .cloned()
            .map(BinBuilder::new)
            .collect_vec();
        let policy = WritePolicy {
            send_key: true,
            ..WritePolicy::default()
        };
        Arc::new(move || {
            let Some(key) = builder.key() else { return };
            let record = bins.iter().filter_map(BinBuilder::bin).collect_vec();
            let result = client.put_bins(&policy, &key, &record);
            stats.of(OpKind::Put).record(result.as_ref().err());
            if result.is_ok() {
                key_set.add_key(key, record);
            }
        })
    }

    fn fresh_delete(&self) -> Op {
        let client = Arc::clone(&self.client);
        let stats = Arc::clone(&self.stats);
        let key_set = Arc::clone(&self.key_set);
        let builder = self.key_builder();
        let policy = WritePolicy::default();
        Arc::new(move || {
            // Deletes target keys believed live; only an empty set falls
            // back to minting.
            let Some(key) = key_set.random_key().or_else(|| builder.key()) else {
                return;
            };
            let result = client.delete(&policy, &key);
            stats.of(OpKind::Delete).record(result.as_ref().err());
            // A failed delete scrubs the key from the tracked working set.
            if result.is_err() {
                key_set.drop_key(&key);
            }
        })
    }

    fn scan(&self, policy: ScanPolicy, verify: bool) -> Op {
        let client = Arc::clone(&self.client);
        let stats = Arc::clone(&self.stats);
        let key_set = Arc::clone(&self.key_set);
        let namespace = self.model.keys.namespace.clone();
        let set = self.model.keys.set.clone();
        Arc::new(move || {
            let (records, errors) = client.scan_all(&policy, &namespace, &set);
            drain_results(OpKind::Scan, verify, &key_set, &stats, records, errors);
        })
    }

    fn query(
        &self,
        spec: &StatementSpec,
        wait_for_migrations: bool,
        verify: bool,
        create_index: bool,
    ) -> Result<Op> {
        let statement = Statement {
            namespace: self.model.keys.namespace.clone(),
            set: self.model.keys.set.clone(),
            filter: Some(filter_of(spec)?),
        };
        if create_index {
            // String collation when the equality operand is textual,
            // numeric otherwise.
            let index_type = match &spec.equal {
                Some(Scalar::Str(_)) => IndexType::String,
                _ => IndexType::Numeric,
            };
            let index_name = format!("{}{}", statement.namespace, spec.bin);
            if let Err(err) = self.client.create_index(
                &WritePolicy::default(),
                &statement.namespace,
                &statement.set,
                &index_name,
                &spec.bin,
                index_type,
            ) {
                tracing::warn!("creating index {index_name}: {err}");
            }
        }
        let client = Arc::clone(&self.client);
        let stats = Arc::clone(&self.stats);
        let key_set = Arc::clone(&self.key_set);
        let policy = QueryPolicy {
            wait_for_migrations,
        };
        Ok(Arc::new(move || {
            let (records, errors) = client.query(&policy, &statement);
            drain_results(OpKind::Query, verify, &key_set, &stats, records, errors);
        }))
    }

    fn exec_udf(&self, package: &str, function: &str, args: &[Scalar]) -> Op {
        let client = Arc::clone(&self.client);
        let stats = Arc::clone(&self.stats);
        let builder = self.key_builder();
        let package = package.to_string();
        let function = function.to_string();
        let args = args.iter().map(Value::from).collect_vec();
        let policy = WritePolicy::default();
        Arc::new(move || {
            let Some(key) = builder.key() else { return };
            let result = client.execute(&policy, &key, &package, &function, &args);
            stats.of(OpKind::ExecUdf).record(result.as_ref().err());
        })
    }

    fn pooled_get(&self) -> Op {
        let client = Arc::clone(&self.client);
        let stats = Arc::clone(&self.stats);
        let keys = Arc::clone(&self.keys);
        let policy = ReadPolicy::default();
        Arc::new(move || {
            if let Some(key) = keys.generate_key() {
                let result = client.get(&policy, key);
                stats.of(OpKind::Get).record(result.as_ref().err());
            }
        })
    }

    fn pooled_put(&self) -> Op {
        let client = Arc::clone(&self.client);
        let stats = Arc::clone(&self.stats);
        let keys = Arc::clone(&self.keys);
        let records = Arc::clone(&self.records);
        let key_set = Arc::clone(&self.key_set);
        let policy = WritePolicy {
            send_key: true,
            ..WritePolicy::default()
        };
        Arc::new(move || {
            let Some(key) = keys.generate_key() else { return };
            let Some(record) = records.generate_record() else { return };
            let result = client.put_bins(&policy, key, record);
            stats.of(OpKind::Put).record(result.as_ref().err());
            if result.is_ok() {
                key_set.add_key(key.clone(), record.to_vec());
            }
        })
    }

    fn pooled_delete(&self) -> Op {
        let client = Arc::clone(&self.client);
        let stats = Arc::clone(&self.stats);
        let keys = Arc::clone(&self.keys);
        let key_set = Arc::clone(&self.key_set);
        let policy = WritePolicy::default();
        Arc::new(move || {
            let Some(key) = keys.generate_key() else { return };
            let result = client.delete(&policy, key);
            stats.of(OpKind::Delete).record(result.as_ref().err());
            if result.is_err() {
                key_set.drop_key(key);
            }
        })
    }

    /// Query closure for the counts-based layout, which has no statement
    /// descriptor: filter on the first indexed bin (first bin if none is
    /// indexed), ranging over integer bounds or matching one generated
    /// value.
    fn derived_query(&self) -> Op {
        let target = self
            .model
            .bins
            .iter()
            .find(|bin| bin.indexed)
            .or_else(|| self.model.bins.first());
        let filter = target.map(|bin| match &bin.value {
            Constraints::Integer { min, max } => Filter::Range {
                bin: bin.name.clone(),
                begin: *min,
                end: *max,
            },
            other => Filter::Equal {
                bin: bin.name.clone(),
                value: random::value(other),
            },
        });
        let statement = Statement {
            namespace: self.model.keys.namespace.clone(),
            set: self.model.keys.set.clone(),
            filter,
        };
        let client = Arc::clone(&self.client);
        let stats = Arc::clone(&self.stats);
        let key_set = Arc::clone(&self.key_set);
        let policy = QueryPolicy::default();
        Arc::new(move || {
            let (records, errors) = client.query(&policy, &statement);
            drain_results(OpKind::Query, false, &key_set, &stats, records, errors);
        })
    }
}

/// Drain a scan/query result pair: verify records against the key set when
/// asked, report every streamed error, and tick one success for the
/// completed invocation.
fn drain_results(
    kind: OpKind,
    verify: bool,
    key_set: &KeySet,
    stats: &Stats,
    records: Receiver<Record>,
    errors: Receiver<KvError>,
) {
    for record in records.iter() {
        if verify {
            let held = key_set.get_by_key(&record.key);
            if !held.is_some_and(|h| h.bins == record.bins) {
                stats
                    .of(kind)
                    .record(Some(&KvError::Server(format!(
                        "verification mismatch for {}",
                        record.key
                    ))));
            }
        }
    }
    for err in errors.iter() {
        stats.of(kind).record(Some(&err));
    }
    stats.of(kind).record(None);
}

fn filter_of(spec: &StatementSpec) -> Result<Filter> {
    if let Some(equal) = &spec.equal {
        Ok(Filter::Equal {
            bin: spec.bin.clone(),
            value: Value::from(equal),
        })
    } else if let Some(range) = &spec.range {
        Ok(Filter::Range {
            bin: spec.bin.clone(),
            begin: range.begin,
            end: range.end,
        })
    } else {
        bail!(
            "query statement for bin {} needs either `equal` or `range`",
            spec.bin
        )
    }
}
