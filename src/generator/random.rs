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

use itertools::Itertools;
use rand::{thread_rng, Rng};

use super::ALPHABET;
use crate::client::{Bin, Key};
use crate::model::{BinConstraints, Constraints, KeyConstraints};
use crate::value::Value;

/// Uniform draw from the inclusive range `[min, max]`. An empty range
/// (`min > max`) yields `max`.
fn in_range(min: i64, max: i64) -> i64 {
    if min >= max {
        max
    } else {
        thread_rng().gen_range(min..=max)
    }
}

/// A length drawn from `[min, max]`, floored at zero.
fn len_in_range(min: i64, max: i64) -> usize {
    usize::try_from(in_range(min, max)).unwrap_or(0)
}

fn alpha_string(min: i64, max: i64) -> String {
    let n = len_in_range(min, max);
    let mut rng = thread_rng();
    (0..n)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Materialize one value shaped by `constraints`.
pub fn value(constraints: &Constraints) -> Value {
    match constraints {
        Constraints::Integer { min, max } => Value::Int(in_range(*min, *max)),
        Constraints::String { min, max } => Value::Str(alpha_string(*min, *max)),
        Constraints::Bytes { min, max } => {
            let n = len_in_range(*min, *max);
            let mut rng = thread_rng();
            Value::Bytes((0..n).map(|_| rng.gen::<u8>()).collect())
        }
        Constraints::List { min, max, value: elem } => {
            let n = len_in_range(*min, *max);
            Value::List((0..n).map(|_| value(elem)).collect())
        }
        Constraints::Map { min, max, key, value: elem } => {
            let n = len_in_range(*min, *max);
            let mut entries = BTreeMap::new();
            for _ in 0..n {
                let k = match key {
                    Some(shape) => value(shape),
                    None => Value::Str(alpha_string(*min, *max)),
                };
                entries.insert(k, value(elem));
            }
            Value::Map(entries)
        }
    }
}

/// Mint a fresh key for the data model's key constraints.
pub fn key(constraints: &KeyConstraints) -> Key {
    Key::new(
        constraints.namespace.clone(),
        constraints.set.clone(),
        value(&constraints.key),
    )
}

/// Build a full-arity record: one bin per constraint, in declaration order.
pub fn bins(constraints: &[BinConstraints]) -> Vec<Bin> {
    constraints
        .iter()
        .map(|c| Bin::new(c.name.clone(), value(&c.value)))
        .collect_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_stays_in_inclusive_range() {
        let c = Constraints::Integer { min: -3, max: 3 };
        for _ in 0..1000 {
            match value(&c) {
                Value::Int(i) => assert!((-3..=3).contains(&i)),
                other => panic!("unexpected value: {other:?}"),
            }
        }
    }

    #[test]
    fn empty_range_yields_max() {
        let c = Constraints::Integer { min: 10, max: 2 };
        for _ in 0..100 {
            assert_eq!(value(&c), Value::Int(2));
        }
    }

    #[test]
    fn strings_use_the_letter_alphabet() {
        let c = Constraints::String { min: 4, max: 16 };
        for _ in 0..100 {
            match value(&c) {
                Value::Str(s) => {
                    assert!((4..=16).contains(&s.len()));
                    assert!(s.bytes().all(|b| b.is_ascii_alphabetic()));
                }
                other => panic!("unexpected value: {other:?}"),
            }
        }
    }

    #[test]
    fn degenerate_bin_constraint_is_constant() {
        // One bin "x" pinned to integer [5, 5]: every record carries
        // exactly that bin with exactly that value.
        let model = vec![BinConstraints {
            name: "x".to_string(),
            value: Constraints::Integer { min: 5, max: 5 },
            optional: false,
            indexed: false,
        }];
        for _ in 0..1000 {
            let record = bins(&model);
            assert_eq!(record.len(), 1);
            assert_eq!(record[0].name, "x");
            assert_eq!(record[0].value, Value::Int(5));
        }
    }

    #[test]
    fn records_keep_declaration_order() {
        let model = ["a", "b", "c"]
            .iter()
            .map(|name| BinConstraints {
                name: name.to_string(),
                value: Constraints::Integer { min: 0, max: 9 },
                optional: false,
                indexed: false,
            })
            .collect::<Vec<_>>();
        let record = bins(&model);
        let names: Vec<_> = record.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn maps_collapse_duplicate_keys() {
        let c = Constraints::Map {
            min: 8,
            max: 8,
            // A one-letter key space forces collisions.
            key: Some(Box::new(Constraints::String { min: 1, max: 1 })),
            value: Box::new(Constraints::Integer { min: 0, max: 0 }),
        };
        match value(&c) {
            Value::Map(m) => assert!(m.len() <= 8),
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
