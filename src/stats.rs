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

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use paste::paste;

use crate::client::KvError;

/// Atomic outcome counters of one operation kind. Counters are monotone
/// non-decreasing; increments are individually atomic with no cross-counter
/// consistency.
#[derive(Debug, Default)]
pub struct OpStat {
    count: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
}

impl OpStat {
    /// Classify and count one call outcome: success, timeout, or error.
    pub fn record(&self, err: Option<&KvError>) {
        match err {
            None => self.count.fetch_add(1, Ordering::Relaxed),
            Some(e) if e.is_timeout() => self.timeouts.fetch_add(1, Ordering::Relaxed),
            Some(_) => self.errors.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Successful calls so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Timed-out calls so far.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Failed calls so far.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Copy the three counters. Each load is atomic; the triple as a whole
    /// is only as consistent as concurrent increments allow.
    pub fn snapshot(&self) -> OpSnapshot {
        OpSnapshot {
            count: self.count(),
            timeouts: self.timeouts(),
            errors: self.errors(),
        }
    }
}

/// Point-in-time copy of one kind's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpSnapshot {
    /// Successful calls.
    pub count: u64,
    /// Timed-out calls.
    pub timeouts: u64,
    /// Failed calls.
    pub errors: u64,
}

impl OpSnapshot {
    /// Progress since `previous`.
    pub fn delta(&self, previous: &OpSnapshot) -> OpSnapshot {
        OpSnapshot {
            count: self.count.saturating_sub(previous.count),
            timeouts: self.timeouts.saturating_sub(previous.timeouts),
            errors: self.errors.saturating_sub(previous.errors),
        }
    }
}

macro_rules! stats {
    ($( $kind:ident, )*) => {
        paste! {
            /// Operation kinds tracked by the statistics pipeline.
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum OpKind {
                $(
                    #[doc = "The " $kind " operation kind."]
                    [<$kind:camel>],
                )*
            }

            impl OpKind {
                /// Every kind, in reporting order.
                pub const ALL: &'static [OpKind] = &[$( OpKind::[<$kind:camel>], )*];

                /// Label used in statistics log lines.
                pub fn label(&self) -> &'static str {
                    match self {
                        $( OpKind::[<$kind:camel>] => stringify!($kind), )*
                    }
                }
            }

            /// One counter triple per operation kind. Shared by every worker;
            /// the only synchronization is the atomics themselves.
            #[derive(Debug, Default)]
            pub struct Stats {
                $( $kind: OpStat, )*
            }

            impl Stats {
                /// Counters of `kind`.
                pub fn of(&self, kind: OpKind) -> &OpStat {
                    match kind {
                        $( OpKind::[<$kind:camel>] => &self.$kind, )*
                    }
                }

                $(
                    #[doc = "Counters of " $kind " operations."]
                    pub fn $kind(&self) -> &OpStat {
                        &self.$kind
                    }
                )*
            }
        }
    };
}

stats! {
    get,
    put,
    delete,
    scan,
    query,
    exec_udf,
}

/// Periodic delta reporter. Every interval it snapshots each kind, logs
/// one `{kind: count=Δ/total, timeouts=Δ/total, errors=Δ/total}` line, and
/// keeps the snapshot for the next delta. Snapshots are private to the
/// reporter thread; workers only ever touch the live counters.
pub struct Reporter {
    halt: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    /// Start reporting `stats` every `interval`.
    pub fn spawn(stats: Arc<Stats>, interval: Duration) -> Self {
        let halt = Arc::new(AtomicBool::new(false));
        let thread_halt = Arc::clone(&halt);
        let handle = thread::Builder::new()
            .name("stats-reporter".to_string())
            .spawn(move || report_loop(&stats, interval, &thread_halt))
            .expect("spawning the stats reporter");
        Self {
            halt,
            handle: Some(handle),
        }
    }

    /// Stop the reporter and wait for its thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.halt.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn report_loop(stats: &Stats, interval: Duration, halt: &AtomicBool) {
    let mut previous = vec![OpSnapshot::default(); OpKind::ALL.len()];
    let mut next = Instant::now() + interval;
    'run: loop {
        loop {
            if halt.load(Ordering::Relaxed) {
                break 'run;
            }
            let now = Instant::now();
            if now >= next {
                break;
            }
            thread::park_timeout(next - now);
        }
        next += interval;
        for (prev, kind) in previous.iter_mut().zip(OpKind::ALL) {
            let current = stats.of(*kind).snapshot();
            let delta = current.delta(prev);
            tracing::info!(
                "{{{}: count={}/{}, timeouts={}/{}, errors={}/{}}}",
                kind.label(),
                delta.count,
                current.count,
                delta.timeouts,
                current.timeouts,
                delta.errors,
                current.errors,
            );
            *prev = current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_classifies_outcomes() {
        let stats = Stats::default();
        stats.of(OpKind::Get).record(None);
        stats.of(OpKind::Get).record(Some(&KvError::Timeout));
        stats.of(OpKind::Get).record(Some(&KvError::NotFound));
        stats.of(OpKind::Get).record(Some(&KvError::Server("boom".into())));
        let snapshot = stats.get().snapshot();
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.errors, 2);
        // Other kinds are untouched.
        assert_eq!(stats.put().snapshot(), OpSnapshot::default());
    }

    #[test]
    fn counters_survive_concurrent_increments() {
        let stats = Arc::new(Stats::default());
        let threads = 8u64;
        let per_thread = 10_000u64;
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for i in 0..per_thread {
                        let err = (i % 3 == 0).then_some(KvError::Timeout);
                        stats.of(OpKind::Put).record(err.as_ref());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snapshot = stats.put().snapshot();
        let timeouts = (0..per_thread).filter(|i| i % 3 == 0).count() as u64 * threads;
        assert_eq!(snapshot.timeouts, timeouts);
        assert_eq!(snapshot.count, per_thread as u64 * threads - timeouts);
        assert_eq!(snapshot.errors, 0);
    }

    #[test]
    fn deltas_measure_progress() {
        let a = OpSnapshot { count: 10, timeouts: 2, errors: 1 };
        let b = OpSnapshot { count: 25, timeouts: 2, errors: 4 };
        let d = b.delta(&a);
        assert_eq!(d, OpSnapshot { count: 15, timeouts: 0, errors: 3 });
    }

    #[test]
    fn kinds_have_stable_labels() {
        assert_eq!(OpKind::Get.label(), "get");
        assert_eq!(OpKind::ExecUdf.label(), "exec_udf");
        assert_eq!(OpKind::ALL.len(), 6);
    }

    #[test]
    fn reporter_stops_promptly() {
        let stats = Arc::new(Stats::default());
        let reporter = Reporter::spawn(Arc::clone(&stats), Duration::from_secs(60));
        stats.of(OpKind::Scan).record(None);
        let started = Instant::now();
        reporter.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
