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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::client::KvClient;
use crate::ops::Op;

/// Workers per core when no override is configured. Calibrated for
/// I/O-bound workloads: workers spend most of their time inside client
/// calls.
const WORKERS_PER_CORE: usize = 32;

/// The worker-thread count to run: the configured override, or
/// `cores * 32`.
pub fn worker_count(configured: Option<usize>) -> usize {
    configured.unwrap_or_else(|| num_cpus::get() * WORKERS_PER_CORE)
}

/// Runs an operations array across worker threads. Each worker owns its
/// PRNG, draws a uniform index per iteration, invokes the closure there,
/// and polls the halt flag between iterations. Workers share nothing
/// mutable beyond the atomics and key set already inside the closures.
pub struct Executor<C: KvClient> {
    client: Arc<C>,
    ops: Arc<[Op]>,
    workers: usize,
    halt: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: KvClient> Executor<C> {
    /// Bind an executor to its client and operations array. Nothing runs
    /// until [`Executor::run`].
    pub fn new(client: Arc<C>, ops: Vec<Op>, workers: usize) -> Self {
        Self {
            client,
            ops: ops.into(),
            workers,
            halt: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Launch the worker threads.
    pub fn run(&self) {
        if self.ops.is_empty() {
            tracing::warn!("operations array is empty, nothing to run");
            return;
        }
        let mut handles = self.handles.lock();
        for worker in 0..self.workers {
            let ops = Arc::clone(&self.ops);
            let halt = Arc::clone(&self.halt);
            let handle = thread::Builder::new()
                .name(format!("loadgen-worker-{worker}"))
                .spawn(move || worker_loop(&ops, &halt, worker))
                .expect("spawning a worker thread");
            handles.push(handle);
        }
        tracing::info!(
            workers = self.workers,
            operations = self.ops.len(),
            "executor running"
        );
    }

    /// Signal halt, wait for every worker to finish its current iteration,
    /// then close the client. Latency is bounded by the slowest in-flight
    /// client call: a worker mid-call completes it before observing halt.
    pub fn stop(&self) {
        if self.halt.swap(true, Ordering::Relaxed) {
            return;
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
        self.client.close();
        tracing::info!("executor stopped");
    }
}

fn worker_loop(ops: &[Op], halt: &AtomicBool, worker: usize) {
    let seed = clock_seed() ^ (worker as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut rng = SmallRng::seed_from_u64(seed);
    while !halt.load(Ordering::Relaxed) {
        let i = rng.gen_range(0..ops.len());
        (ops[i])();
    }
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    use super::*;
    use crate::client::stub::StubClient;

    fn counting_ops(counter: &Arc<AtomicU64>) -> Vec<Op> {
        let counter = Arc::clone(counter);
        vec![Arc::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })]
    }

    #[test]
    fn workers_invoke_operations_until_halted() {
        let counter = Arc::new(AtomicU64::new(0));
        let executor = Executor::new(
            Arc::new(StubClient::default()),
            counting_ops(&counter),
            4,
        );
        executor.run();
        thread::sleep(Duration::from_millis(50));
        executor.stop();
        let after_stop = counter.load(Ordering::Relaxed);
        assert!(after_stop > 0);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::Relaxed), after_stop);
    }

    #[test]
    fn stop_is_idempotent() {
        let counter = Arc::new(AtomicU64::new(0));
        let executor = Executor::new(
            Arc::new(StubClient::default()),
            counting_ops(&counter),
            2,
        );
        executor.run();
        executor.stop();
        executor.stop();
    }

    #[test]
    fn empty_operations_array_never_blocks() {
        let executor = Executor::new(Arc::new(StubClient::default()), vec![], 4);
        executor.run();
        executor.stop();
    }

    #[test]
    fn worker_count_prefers_the_override() {
        assert_eq!(worker_count(Some(7)), 7);
        assert!(worker_count(None) >= WORKERS_PER_CORE);
    }
}
