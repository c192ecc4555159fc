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

//! Synthetic value generation from the constraint grammar.
//!
//! Two families exist. The unseeded family draws from the thread-local PRNG
//! and backs everything workers materialize per call. The seeded family is
//! a pure function of `(constraints, seed)` and is used only to fill the
//! key pool, so a pool rebuilt from the same model addresses the same keys.

/// Unseeded generators.
pub mod random;
/// Deterministic per-seed generators.
pub mod seeded;

/// The 52-letter alphabet generated strings draw from.
pub(crate) const ALPHABET: &[u8; 52] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
