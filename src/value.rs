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

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

/// A dynamically typed value carried by keys and bins.
///
/// The shape set mirrors the constraint grammar exactly: an integer, a
/// string, a byte blob, a list, or a map. Values are ordered and hashable
/// so generated values can key a map; duplicate generated keys collapse.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    /// Signed 64-bit integer.
    Int(i64),
    /// Character string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Sorted value-to-value map.
    Map(BTreeMap<Value, Value>),
}

impl Value {
    /// Stable byte encoding fed into key digests. A type tag precedes every
    /// value so `Int(48)` and `Str("0")` cannot collide.
    pub(crate) fn digest_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(i) => {
                out.push(b'i');
                out.extend_from_slice(&i.to_be_bytes());
            }
            Value::Str(s) => {
                out.push(b's');
                out.extend_from_slice(&(s.len() as u64).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                out.push(b'b');
                out.extend_from_slice(&(b.len() as u64).to_be_bytes());
                out.extend_from_slice(b);
            }
            Value::List(l) => {
                out.push(b'l');
                out.extend_from_slice(&(l.len() as u64).to_be_bytes());
                for v in l {
                    v.digest_bytes(out);
                }
            }
            Value::Map(m) => {
                out.push(b'm');
                out.extend_from_slice(&(m.len() as u64).to_be_bytes());
                for (k, v) in m {
                    k.digest_bytes(out);
                    v.digest_bytes(out);
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => {
                write!(f, "0x")?;
                b.iter().try_for_each(|byte| write!(f, "{byte:02x}"))
            }
            Value::List(l) => write!(f, "[{}]", l.iter().format(", ")),
            Value::Map(m) => write!(
                f,
                "{{{}}}",
                m.iter().format_with(", ", |(k, v), fmt| fmt(&format_args!("{k}: {v}")))
            ),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}
