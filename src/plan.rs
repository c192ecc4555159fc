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

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::client::{ClientPolicy, KvClient, WritePolicy};
use crate::executor::{self, Executor};
use crate::keyset::KeySet;
use crate::model::Config;
use crate::ops::OpFactory;
use crate::pool::{KeyPool, RecordPool};
use crate::stats::{Reporter, Stats};

/// Record-pool capacity. Writes randomize bin values by picking among this
/// many pre-built records.
const RECORD_POOL_CAPACITY: u64 = 100;

/// Control messages consumed by [`Supervisor::run`]. Signal handlers and
/// the plan-file watcher feed the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Rebuild the plan from the plan file.
    Reload,
    /// Stop the current plan and return.
    Shutdown,
}

struct Plan<C: KvClient> {
    executor: Arc<Executor<C>>,
}

/// Owns the lifecycle of the whole engine. A plan is everything built from
/// one read of the plan file: client, pools, key set, operation closures,
/// executor. The supervisor watches the file and swaps plans atomically —
/// the new executor serves workers before the old one stops, so the
/// statistics stream shows no gap across a reload. Statistics and the
/// reporter outlive individual plans.
pub struct Supervisor<C: KvClient> {
    config_path: PathBuf,
    stats: Arc<Stats>,
    current: Mutex<Option<Plan<C>>>,
}

impl<C: KvClient> Supervisor<C> {
    /// Create a supervisor over `config_path`. Nothing is loaded yet.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            stats: Arc::new(Stats::default()),
            current: Mutex::new(None),
        }
    }

    /// Statistics shared by every plan this supervisor builds.
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Load the initial plan, watch the plan file, and serve control
    /// messages until shutdown. `control_tx` is the sender half of
    /// `control`; the file watcher feeds it, and callers keep their own
    /// clone for signal handlers. Plan-load failures are fatal: the error
    /// propagates and the process exits non-zero.
    pub fn run(
        &self,
        control_tx: Sender<Control>,
        control: Receiver<Control>,
        log_interval: Duration,
    ) -> Result<()> {
        let reporter = Reporter::spawn(self.stats(), log_interval);
        self.reload()?;

        // Watch writes to the plan file. Creates matter too: editors often
        // replace the file instead of writing in place.
        let mut watcher = notify::recommended_watcher(
            move |event: std::result::Result<notify::Event, notify::Error>| match event {
                Ok(event)
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) =>
                {
                    let _ = control_tx.send(Control::Reload);
                }
                Ok(_) => {}
                Err(err) => tracing::warn!("plan file watcher: {err}"),
            },
        )
        .context("creating the plan file watcher")?;
        watcher
            .watch(&self.config_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", self.config_path.display()))?;

        let mut shutdown = false;
        while !shutdown {
            match control.recv() {
                Err(_) | Ok(Control::Shutdown) => break,
                Ok(Control::Reload) => {
                    // Editors fire several events per save; collapse the
                    // burst into one rebuild.
                    while let Ok(pending) = control.try_recv() {
                        if pending == Control::Shutdown {
                            shutdown = true;
                            break;
                        }
                    }
                    if shutdown {
                        break;
                    }
                    tracing::info!("plan file changed, reloading");
                    self.reload()?;
                }
            }
        }

        self.teardown();
        reporter.stop();
        Ok(())
    }

    /// Build a fresh plan from the plan file, install it, and only then
    /// stop the previous executor and close its client.
    pub fn reload(&self) -> Result<()> {
        let config = Config::load(&self.config_path)?;
        let plan = self.build_plan(&config)?;
        let previous = self.current.lock().replace(plan);
        if let Some(previous) = previous {
            previous.executor.stop();
        }
        Ok(())
    }

    /// Stop the active plan, if any.
    pub fn teardown(&self) {
        if let Some(plan) = self.current.lock().take() {
            plan.executor.stop();
        }
    }

    fn build_plan(&self, config: &Config) -> Result<Plan<C>> {
        tracing::debug!("interpreted plan:\n{}", config.dump());

        let client = Arc::new(
            C::connect(&ClientPolicy::default(), &config.hosts)
                .context("connecting to the cluster")?,
        );

        for udf in &config.udfs {
            let body = std::fs::read(&udf.path)
                .with_context(|| format!("reading udf module {}", udf.path.display()))?;
            client
                .register_udf(&WritePolicy::default(), &body, &udf.name, udf.language)
                .with_context(|| format!("registering udf {}", udf.name))?;
            tracing::info!("registered udf {}", udf.name);
        }

        let model = Arc::new(config.data.clone());
        let keys = Arc::new(KeyPool::spawn(Arc::clone(&model), config.load.keys));
        let records = Arc::new(RecordPool::spawn(Arc::clone(&model), RECORD_POOL_CAPACITY));
        let key_set = Arc::new(KeySet::new(config.key_count));
        let factory = OpFactory::new(
            Arc::clone(&client),
            keys,
            records,
            key_set,
            self.stats(),
            model,
        );
        let ops = if config.operations.is_empty() {
            factory.build_load(&config.load)
        } else {
            factory.build_mix(&config.operations)?
        };

        let executor = Arc::new(Executor::new(
            client,
            ops,
            executor::worker_count(config.workers),
        ));
        executor.run();
        Ok(Plan { executor })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::client::memory::MemoryClient;
    use crate::stats::OpStat;

    const WRITES_ONLY: &str = r#"
hosts: [ { addr: "127.0.0.1", port: 3000 } ]
workers: 4
key_count: 64
data:
  keys: { namespace: test, set: demo, key: { integer: { min: 0, max: 100000 } } }
  bins: [ { name: x, value: { integer: { min: 0, max: 9 } } } ]
operations:
  - { id: w, optype: put, load: 100 }
"#;

    const READS_ONLY: &str = r#"
hosts: [ { addr: "127.0.0.1", port: 3000 } ]
workers: 4
key_count: 64
data:
  keys: { namespace: test, set: demo, key: { integer: { min: 0, max: 100000 } } }
  bins: [ { name: x, value: { integer: { min: 0, max: 9 } } } ]
operations:
  - { id: r, optype: get, load: 100 }
"#;

    fn write_plan(path: &std::path::Path, contents: &str) {
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.sync_all().unwrap();
    }

    fn total(stat: &OpStat) -> u64 {
        stat.count() + stat.timeouts() + stat.errors()
    }

    fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let until = Instant::now() + deadline;
        while Instant::now() < until {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn missing_plan_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor: Supervisor<MemoryClient> =
            Supervisor::new(dir.path().join("absent.yml"));
        assert!(supervisor.reload().is_err());
    }

    #[test]
    fn invalid_mix_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yml");
        write_plan(
            &path,
            r#"
hosts: [ { addr: "127.0.0.1", port: 3000 } ]
data:
  keys: { namespace: t, set: s, key: { integer: { min: 0, max: 1 } } }
operations:
  - { optype: get, load: 55 }
"#,
        );
        let supervisor: Supervisor<MemoryClient> = Supervisor::new(path);
        assert!(supervisor.reload().is_err());
    }

    #[test]
    fn reload_swaps_the_running_mix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yml");
        write_plan(&path, WRITES_ONLY);

        let supervisor: Supervisor<MemoryClient> = Supervisor::new(path.clone());
        supervisor.reload().unwrap();
        let stats = supervisor.stats();
        assert!(wait_for(Duration::from_secs(5), || total(stats.put()) > 0));
        assert_eq!(total(stats.get()), 0);

        write_plan(&path, READS_ONLY);
        supervisor.reload().unwrap();
        // The old executor is joined before reload returns: writes are
        // frozen from here on, reads take over.
        let puts = total(stats.put());
        assert!(wait_for(Duration::from_secs(5), || total(stats.get()) > 0));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(total(stats.put()), puts);

        supervisor.teardown();
    }

    #[test]
    fn run_loop_reloads_and_shuts_down_on_control_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yml");
        write_plan(&path, WRITES_ONLY);

        let supervisor: Arc<Supervisor<MemoryClient>> = Arc::new(Supervisor::new(path.clone()));
        let stats = supervisor.stats();
        let (tx, rx) = mpsc::channel();
        let runner = {
            let supervisor = Arc::clone(&supervisor);
            let tx = tx.clone();
            thread::spawn(move || supervisor.run(tx, rx, Duration::from_secs(60)))
        };

        assert!(wait_for(Duration::from_secs(5), || total(stats.put()) > 0));

        write_plan(&path, READS_ONLY);
        tx.send(Control::Reload).unwrap();
        assert!(wait_for(Duration::from_secs(5), || total(stats.get()) > 0));

        tx.send(Control::Shutdown).unwrap();
        runner.join().unwrap().unwrap();
    }
}
