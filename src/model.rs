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

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::client::UdfLang;
use crate::value::Value;

/// A recursive value-shape descriptor. Exactly one variant applies to a
/// node; ranges are inclusive and are expected to satisfy `min <= max`
/// (generators clamp to `max` when they do not).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Constraints {
    /// Uniform integer in `[min, max]`.
    Integer {
        /// Lower bound, inclusive.
        min: i64,
        /// Upper bound, inclusive.
        max: i64,
    },
    /// Alphabetic string with a length in `[min, max]`.
    String {
        /// Shortest permitted length.
        min: i64,
        /// Longest permitted length.
        max: i64,
    },
    /// Byte blob with a length in `[min, max]`.
    Bytes {
        /// Shortest permitted length.
        min: i64,
        /// Longest permitted length.
        max: i64,
    },
    /// List with `[min, max]` elements shaped by `value`.
    List {
        /// Fewest permitted elements.
        min: i64,
        /// Most permitted elements.
        max: i64,
        /// Shape of every element.
        value: Box<Constraints>,
    },
    /// Map with `[min, max]` entries. Generated keys that collide collapse,
    /// so the observed size may be smaller.
    Map {
        /// Fewest permitted entries.
        min: i64,
        /// Most permitted entries.
        max: i64,
        /// Shape of the entry keys. When absent, keys fall back to an
        /// alphabetic string sized by the map's own bounds.
        #[serde(default)]
        key: Option<Box<Constraints>>,
        /// Shape of the entry values.
        value: Box<Constraints>,
    },
}

/// A named record field plus the constraints its values are drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinConstraints {
    /// Bin name, fixed across generated records.
    pub name: String,
    /// Shape of generated values.
    pub value: Constraints,
    /// Optional bins may be skipped by per-call record builders.
    #[serde(default)]
    pub optional: bool,
    /// Indexed bins are the preferred target of derived query filters.
    #[serde(default)]
    pub indexed: bool,
}

/// Where keys live and what their user values look like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyConstraints {
    /// Target namespace.
    pub namespace: String,
    /// Target set within the namespace.
    pub set: String,
    /// Shape of the key's user value.
    pub key: Constraints,
}

/// The schema synthetic keys and records are drawn from. Bin order is
/// significant: record generation emits bins in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModel {
    /// Key shape.
    pub keys: KeyConstraints,
    /// Bin shapes, in declaration order.
    #[serde(default)]
    pub bins: Vec<BinConstraints>,
}

/// The desired operation mix and key-pool size, as absolute counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadModel {
    /// Key-pool capacity.
    pub keys: u64,
    /// Relative weight of get operations.
    pub reads: u64,
    /// Relative weight of put operations.
    pub writes: u64,
    /// Relative weight of delete operations.
    pub deletes: u64,
    /// Relative weight of query operations.
    pub queries: u64,
    /// Relative weight of scan operations.
    pub scans: u64,
}

impl LoadModel {
    /// Length of the operations array this mix expands into.
    pub fn total(&self) -> u64 {
        self.reads + self.writes + self.deletes + self.queries + self.scans
    }
}

/// One seed node of the target cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Host address.
    pub addr: String,
    /// Service port.
    pub port: u16,
}

/// A literal scalar appearing in a descriptor: query filter operands and
/// UDF arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Integer literal.
    Int(i64),
    /// String literal.
    Str(String),
}

impl From<&Scalar> for Value {
    fn from(scalar: &Scalar) -> Self {
        match scalar {
            Scalar::Int(i) => Value::Int(*i),
            Scalar::Str(s) => Value::Str(s.clone()),
        }
    }
}

/// Inclusive bounds of a range filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSpec {
    /// Lower bound, inclusive.
    pub begin: i64,
    /// Upper bound, inclusive.
    pub end: i64,
}

/// The filter half of a query descriptor. Exactly one of `equal` / `range`
/// should be present; `equal` wins when both are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementSpec {
    /// Bin the filter applies to.
    pub bin: String,
    /// Equality operand.
    #[serde(default)]
    pub equal: Option<Scalar>,
    /// Range operands.
    #[serde(default)]
    pub range: Option<RangeSpec>,
}

/// Variant-specific payload of an operation descriptor. The `optype` field
/// of the YAML mapping selects the variant; an unknown op-type is a fatal
/// configuration error at plan load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "optype", rename_all = "lowercase")]
pub enum OpSpec {
    /// Read a record by key.
    Get,
    /// Write a freshly generated record.
    Put,
    /// Delete a record by key.
    Delete,
    /// Scan the whole set, optionally verifying returned records.
    Scan {
        /// Sample percentage handed to the scan policy.
        #[serde(default = "default::scan_percent")]
        percent: u8,
        /// Ask the cluster to settle migrations before scanning.
        #[serde(default)]
        wait_for_migrations: bool,
        /// Check returned records against the key set.
        #[serde(default)]
        verify: bool,
    },
    /// Run a filtered query, optionally creating the index it needs.
    Query {
        /// Filter to attach.
        statement: StatementSpec,
        /// Ask the cluster to settle migrations before querying.
        #[serde(default)]
        wait_for_migrations: bool,
        /// Check returned records against the key set.
        #[serde(default)]
        verify: bool,
        /// Create the secondary index at plan load.
        #[serde(default)]
        create_index: bool,
    },
    /// Invoke a user-defined function on a key.
    ExecUdf {
        /// Registered UDF package.
        package: String,
        /// Function within the package.
        function: String,
        /// Literal arguments.
        #[serde(default)]
        args: Vec<Scalar>,
    },
}

/// One entry of the percentage-based operation mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDescriptor {
    /// Free-form identifier, only used in logs.
    #[serde(default)]
    pub id: String,
    /// Share of the mix, in percent. All shares must sum to exactly 100.
    pub load: u32,
    /// What the operation does.
    #[serde(flatten)]
    pub spec: OpSpec,
}

/// A UDF module to register at plan load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdfSpec {
    /// Package name exec-udf descriptors refer to.
    pub name: String,
    /// Path to the module source.
    pub path: PathBuf,
    /// Source language.
    #[serde(default)]
    pub language: UdfLang,
}

/// The whole plan file: cluster seeds, the load mix (either counts or
/// descriptors), and the data model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Cluster seed nodes.
    #[serde(default)]
    pub hosts: Vec<Host>,
    /// Worker-thread override. Absent means `cores * 32`.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Key-set capacity.
    #[serde(default = "default::key_count")]
    pub key_count: usize,
    /// Counts-based mix. Ignored when `operations` is non-empty.
    #[serde(default)]
    pub load: LoadModel,
    /// Key and record schema.
    pub data: DataModel,
    /// Percentage-based mix. Takes precedence over `load` when non-empty.
    #[serde(default)]
    pub operations: Vec<OpDescriptor>,
    /// UDF modules to register at plan load.
    #[serde(default)]
    pub udfs: Vec<UdfSpec>,
}

impl Config {
    /// Read and validate a plan file. Any failure here is fatal at plan
    /// load: unreadable file, unparseable YAML, unknown op-type, or a
    /// descriptor mix that does not sum to 100.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading plan file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing plan file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if !self.operations.is_empty() {
            let total: u32 = self.operations.iter().map(|op| op.load).sum();
            if total != 100 {
                bail!("total load for operations must equal exactly 100, got {total}");
            }
        } else if self.load.total() == 0 {
            bail!("plan has no operations and an all-zero load model");
        }
        Ok(())
    }

    /// The interpreted plan as YAML, for logging.
    pub fn dump(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_default()
    }
}

/// Default values for configurations.
#[allow(missing_docs)]
pub mod default {
    pub fn key_count() -> usize {
        1_000_000
    }

    pub fn scan_percent() -> u8 {
        100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
hosts:
  - { addr: "127.0.0.1", port: 3000 }
workers: 8
key_count: 512
load: { keys: 1000, reads: 50, writes: 30, deletes: 10, queries: 5, scans: 5 }
data:
  keys:
    namespace: test
    set: demo
    key: { integer: { min: 0, max: 100000 } }
  bins:
    - name: x
      value: { integer: { min: 0, max: 100 } }
      indexed: true
    - name: blob
      value: { bytes: { min: 16, max: 64 } }
      optional: true
"#;

    #[test]
    fn parse_counts_layout() {
        let config: Config = serde_yaml::from_str(FULL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.hosts[0].port, 3000);
        assert_eq!(config.workers, Some(8));
        assert_eq!(config.key_count, 512);
        assert_eq!(config.load.total(), 100);
        assert_eq!(config.data.bins.len(), 2);
        assert!(config.data.bins[0].indexed);
        assert!(config.data.bins[1].optional);
        assert_eq!(
            config.data.keys.key,
            Constraints::Integer { min: 0, max: 100000 }
        );
    }

    #[test]
    fn parse_descriptor_layout() {
        let raw = r#"
data:
  keys: { namespace: test, set: demo, key: { string: { min: 8, max: 16 } } }
  bins: [ { name: n, value: { string: { min: 1, max: 4 } } } ]
operations:
  - { id: g, optype: get, load: 60 }
  - { id: p, optype: put, load: 25 }
  - id: q
    optype: query
    load: 10
    create_index: true
    statement: { bin: n, equal: "abc" }
  - id: u
    optype: execudf
    load: 5
    package: tools
    function: touch
    args: [1, "two"]
"#;
        let config: Config = serde_yaml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.operations.len(), 4);
        match &config.operations[2].spec {
            OpSpec::Query { statement, create_index, .. } => {
                assert!(*create_index);
                assert_eq!(statement.equal, Some(Scalar::Str("abc".into())));
            }
            other => panic!("unexpected spec: {other:?}"),
        }
        match &config.operations[3].spec {
            OpSpec::ExecUdf { package, args, .. } => {
                assert_eq!(package, "tools");
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected spec: {other:?}"),
        }
    }

    #[test]
    fn mix_must_sum_to_one_hundred() {
        let raw = r#"
data:
  keys: { namespace: t, set: s, key: { integer: { min: 0, max: 1 } } }
operations:
  - { optype: get, load: 60 }
  - { optype: put, load: 30 }
"#;
        let config: Config = serde_yaml::from_str(raw).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exactly 100"));
    }

    #[test]
    fn unknown_optype_is_a_parse_error() {
        let raw = r#"
data:
  keys: { namespace: t, set: s, key: { integer: { min: 0, max: 1 } } }
operations:
  - { optype: frobnicate, load: 100 }
"#;
        assert!(serde_yaml::from_str::<Config>(raw).is_err());
    }

    #[test]
    fn empty_plan_is_rejected() {
        let raw = r#"
data:
  keys: { namespace: t, set: s, key: { integer: { min: 0, max: 1 } } }
"#;
        let config: Config = serde_yaml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn nested_constraints_parse() {
        let raw = r#"
map:
  min: 1
  max: 4
  value: { list: { min: 0, max: 2, value: { bytes: { min: 1, max: 1 } } } }
"#;
        let c: Constraints = serde_yaml::from_str(raw).unwrap();
        match c {
            Constraints::Map { key, value, .. } => {
                assert!(key.is_none());
                assert!(matches!(*value, Constraints::List { .. }));
            }
            other => panic!("unexpected constraint: {other:?}"),
        }
    }
}
