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

//! Model-driven workload generator for distributed key-value clusters.
//!
//! Given a declarative plan — the shape of keys and records plus the mix
//! of operations to execute — the engine drives a cluster with a steady
//! stream of reads, writes, deletes, scans, queries, and UDF invocations,
//! counting per-operation successes, timeouts, and errors atomically and
//! reporting deltas every interval.
//!
//! The [`plan::Supervisor`] owns everything: it parses the plan file into
//! the constraint tree, seeds the key and record pools, lets the
//! [`ops::OpFactory`] close operations over the pools and the
//! [`keyset::KeySet`], and hands the resulting operations array to the
//! [`executor::Executor`]. Editing the plan file (or sending `SIGHUP`)
//! swaps in a freshly built plan before the old one is stopped.

#![warn(missing_docs)]

/// The client trait the engine drives, and its companion types.
pub mod client;
/// Worker threads running the operations array.
pub mod executor;
/// Synthetic value generation from the constraint grammar.
pub mod generator;
/// Live working-set tracker for verification and delete bookkeeping.
pub mod keyset;
/// Plan-file data model and validation.
pub mod model;
/// The operation factory.
pub mod ops;
/// Pre-materialized key and record pools.
pub mod pool;
/// Plan lifecycle: build, watch, reload.
pub mod plan;
/// Atomic statistics and the periodic reporter.
pub mod stats;
/// Dynamically typed record values.
pub mod value;
