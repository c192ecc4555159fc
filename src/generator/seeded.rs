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

use crate::client::Key;
use crate::model::{Constraints, KeyConstraints};
use crate::value::Value;

/// Uppercase hex of `seed`, left-padded with `'0'` up to `min` and
/// truncated down to `max`.
fn hex_string(min: i64, max: i64, seed: i64) -> String {
    let s = format!("{seed:X}");
    let min_len = usize::try_from(min).unwrap_or(0);
    let max_len = usize::try_from(max).unwrap_or(0);
    if s.len() < min_len {
        let mut padded = "0".repeat(min_len - s.len());
        padded.push_str(&s);
        padded
    } else if s.len() > max_len {
        s[..max_len].to_string()
    } else {
        s
    }
}

/// Collection length `min + seed`, clamped at `max` and floored at zero.
fn seeded_len(min: i64, max: i64, seed: i64) -> usize {
    usize::try_from(min.saturating_add(seed).min(max)).unwrap_or(0)
}

/// Materialize the deterministic value of `(constraints, seed)`. Equal
/// inputs give equal values across calls and across processes.
pub fn value(constraints: &Constraints, seed: i64) -> Value {
    match constraints {
        Constraints::Integer { min, max } => Value::Int(min.saturating_add(seed).min(*max)),
        Constraints::String { min, max } => Value::Str(hex_string(*min, *max, seed)),
        Constraints::Bytes { min, max } => Value::Bytes(hex_string(*min, *max, seed).into_bytes()),
        Constraints::List { min, max, value: elem } => {
            let n = seeded_len(*min, *max, seed);
            Value::List((0..n).map(|_| value(elem, seed)).collect())
        }
        Constraints::Map { min, max, key, value: elem } => {
            let n = seeded_len(*min, *max, seed);
            let mut entries = BTreeMap::new();
            for i in 0..n {
                // Offsetting the key seed per entry keeps the entry count;
                // a shared seed would collapse the map to one slot.
                let entry_seed = seed.wrapping_add(i as i64);
                let k = match key {
                    Some(shape) => value(shape, entry_seed),
                    None => Value::Str(hex_string(*min, *max, entry_seed)),
                };
                entries.insert(k, value(elem, seed));
            }
            Value::Map(entries)
        }
    }
}

/// Deterministic key `seed` of a pool.
pub fn key(constraints: &KeyConstraints, seed: i64) -> Key {
    Key::new(
        constraints.namespace.clone(),
        constraints.set.clone(),
        value(&constraints.key, seed),
    )
}
