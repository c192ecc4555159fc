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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use itertools::Itertools;
use once_cell::sync::OnceCell;
use rand::{thread_rng, Rng};

use crate::client::{Bin, Key};
use crate::generator::{random, seeded};
use crate::model::DataModel;

/// A fixed-capacity slot array filled left to right by a single producer
/// and served lock-free to any number of concurrent readers.
///
/// `size` is the published watermark. The release store after each slot
/// write pairs with the acquire load in `pick`, so a reader that observes
/// watermark `n` also observes slots `0..n` fully constructed. Slots are
/// written exactly once and never mutated afterwards.
struct SlotPool<T> {
    size: AtomicU64,
    slots: Box<[OnceCell<T>]>,
}

impl<T: Send + Sync + 'static> SlotPool<T> {
    fn with_capacity(capacity: u64) -> Self {
        let slots = (0..capacity)
            .map(|_| OnceCell::new())
            .collect_vec()
            .into_boxed_slice();
        Self {
            size: AtomicU64::new(0),
            slots,
        }
    }

    /// Spawn the producer thread. `produce` is invoked for slot indexes
    /// `0..capacity` in order.
    fn fill(self: &Arc<Self>, mut produce: impl FnMut(u64) -> T + Send + 'static) {
        let pool = Arc::clone(self);
        thread::spawn(move || {
            for i in 0..pool.slots.len() {
                let _ = pool.slots[i].set(produce(i as u64));
                pool.size.fetch_add(1, Ordering::Release);
            }
        });
    }

    /// A uniformly random published entry, or `None` while empty.
    fn pick(&self) -> Option<&T> {
        let n = self.size.load(Ordering::Acquire);
        if n == 0 {
            return None;
        }
        let i = thread_rng().gen_range(0..n) as usize;
        self.slots[i].get()
    }

    fn len(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }
}

/// Pre-materialized keys served at random during load. Key `i` is the
/// deterministic seeded key of the data model, so pools built from the same
/// model address the same working set.
pub struct KeyPool {
    inner: Arc<SlotPool<Key>>,
}

impl KeyPool {
    /// Create a pool of `capacity` keys and start its producer.
    pub fn spawn(model: Arc<DataModel>, capacity: u64) -> Self {
        let inner = Arc::new(SlotPool::with_capacity(capacity));
        inner.fill(move |i| seeded::key(&model.keys, i as i64));
        Self { inner }
    }

    /// A random published key, or `None` while the pool is still empty.
    pub fn generate_key(&self) -> Option<&Key> {
        self.inner.pick()
    }

    /// Published entry count.
    pub fn len(&self) -> u64 {
        self.inner.len()
    }

    /// Whether nothing is published yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Target entry count.
    pub fn capacity(&self) -> u64 {
        self.inner.capacity()
    }
}

/// Pre-materialized bin-sets served at random during load. Record `i` is a
/// fresh unseeded draw over every bin constraint, in declaration order.
/// Capacity is small; writes randomize by picking a different entry per
/// call.
pub struct RecordPool {
    inner: Arc<SlotPool<Vec<Bin>>>,
}

impl RecordPool {
    /// Create a pool of `capacity` records and start its producer.
    pub fn spawn(model: Arc<DataModel>, capacity: u64) -> Self {
        let inner = Arc::new(SlotPool::with_capacity(capacity));
        inner.fill(move |_| random::bins(&model.bins));
        Self { inner }
    }

    /// A random published record, or `None` while the pool is still empty.
    pub fn generate_record(&self) -> Option<&[Bin]> {
        self.inner.pick().map(Vec::as_slice)
    }

    /// Published entry count.
    pub fn len(&self) -> u64 {
        self.inner.len()
    }

    /// Whether nothing is published yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Target entry count.
    pub fn capacity(&self) -> u64 {
        self.inner.capacity()
    }
}
