//! Persistent job scheduler.
//!
//! Jobs are durable trigger/action descriptors stored as a JSON file that
//! survives daemon restarts. A tick thread evaluates triggers against the
//! local clock and hands due jobs to a bounded worker pool over a channel; the
//! executor callback decides what an action means (the scheduler daemon maps
//! `Demo` to the demo's control entry points).

use crate::error::{Error, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// When a job fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trigger {
    /// Every day at a fixed time
    Cron { hour: u32, minute: u32 },
    /// Every `secs` seconds
    Interval { secs: u64 },
}

/// What a job does when it fires
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobAction {
    /// Run a single autonomous drawing
    Demo,
    /// Draw a specific pattern method
    Method { name: String },
    /// Draw a saved drawing
    Saved { id: String },
}

/// Durable job descriptor
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScheduledJob {
    pub id: String,
    pub trigger: Trigger,
    pub action: JobAction,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Next local time `trigger` fires, strictly after `now`
pub fn next_occurrence(trigger: &Trigger, now: NaiveDateTime) -> NaiveDateTime {
    match *trigger {
        Trigger::Cron { hour, minute } => {
            let today = now
                .date()
                .and_hms_opt(hour.min(23), minute.min(59), 0)
                .unwrap_or(now);
            if today > now {
                today
            } else {
                today + ChronoDuration::days(1)
            }
        }
        Trigger::Interval { secs } => now + ChronoDuration::seconds(secs.max(1) as i64),
    }
}

/// Durable, mutex-guarded job store backed by one JSON file.
///
/// Safe for concurrent use from the RPC handler and executor threads; every
/// mutation is persisted atomically (temp file + rename) before it returns.
pub struct JobStore {
    path: PathBuf,
    jobs: Mutex<Vec<ScheduledJob>>,
}

impl JobStore {
    /// Open the store, loading any jobs persisted by a previous run
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let jobs = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| Error::Serialization(format!("corrupt job store: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            jobs: Mutex::new(jobs),
        })
    }

    /// Create a job and return its generated id
    pub fn add(
        &self,
        trigger: Trigger,
        action: JobAction,
        params: serde_json::Value,
    ) -> Result<String> {
        let mut jobs = self.jobs.lock();
        let id = loop {
            let candidate = format!("job-{:08x}", rand::thread_rng().gen::<u32>());
            if !jobs.iter().any(|j| j.id == candidate) {
                break candidate;
            }
        };
        jobs.push(ScheduledJob {
            id: id.clone(),
            trigger,
            action,
            params,
        });
        self.persist(&jobs)?;
        Ok(id)
    }

    /// Insert or replace a job with a caller-chosen id (used for the boot
    /// trigger, whose id is reserved)
    pub fn upsert(&self, job: ScheduledJob) -> Result<()> {
        let mut jobs = self.jobs.lock();
        jobs.retain(|j| j.id != job.id);
        jobs.push(job);
        self.persist(&jobs)
    }

    /// Delete a job by id
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(Error::JobNotFound(id.to_string()));
        }
        self.persist(&jobs)
    }

    /// Jobs in stored order
    pub fn list(&self) -> Vec<ScheduledJob> {
        self.jobs.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<ScheduledJob> {
        self.jobs.lock().iter().find(|j| j.id == id).cloned()
    }

    fn persist(&self, jobs: &[ScheduledJob]) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(jobs)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Executor callback invoked (from a pool thread) when a job fires
pub type JobExecutor = Arc<dyn Fn(&ScheduledJob) + Send + Sync>;

/// Background scheduler: one tick thread plus a bounded worker pool
pub struct JobScheduler {
    running: Arc<AtomicBool>,
    tick_thread: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl JobScheduler {
    /// Start the scheduler over a shared store.
    ///
    /// `tick` bounds trigger latency; production uses one second.
    pub fn start(
        store: Arc<JobStore>,
        workers: usize,
        tick: Duration,
        executor: JobExecutor,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = crossbeam_channel::bounded::<ScheduledJob>(workers.max(1) * 2);

        let mut worker_handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let rx = rx.clone();
            let executor = Arc::clone(&executor);
            let handle = std::thread::Builder::new()
                .name(format!("job-worker-{}", i))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        log::info!("Job {} fired ({:?})", job.id, job.action);
                        executor(&job);
                    }
                })?;
            worker_handles.push(handle);
        }

        let running_tick = Arc::clone(&running);
        let tick_thread = std::thread::Builder::new()
            .name("job-scheduler".to_string())
            .spawn(move || {
                let mut next_runs: HashMap<String, NaiveDateTime> = HashMap::new();
                while running_tick.load(Ordering::Relaxed) {
                    let now = Local::now().naive_local();
                    let jobs = store.list();

                    // Forget schedules for deleted jobs
                    next_runs.retain(|id, _| jobs.iter().any(|j| j.id == *id));

                    for job in &jobs {
                        let due = next_runs
                            .entry(job.id.clone())
                            .or_insert_with(|| next_occurrence(&job.trigger, now));
                        if now >= *due {
                            *due = next_occurrence(&job.trigger, now);
                            if let Err(e) = tx.try_send(job.clone()) {
                                log::warn!("Job {} dropped, pool saturated: {}", job.id, e);
                            }
                        }
                    }
                    std::thread::sleep(tick);
                }
                // Closing the channel lets the workers drain and exit
                drop(tx);
            })?;

        Ok(Self {
            running,
            tick_thread,
            workers: worker_handles,
        })
    }

    /// Stop the tick thread and wait for the pool to drain
    pub fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        if self.tick_thread.join().is_err() {
            log::error!("Job scheduler tick thread panicked");
        }
        for worker in self.workers {
            if worker.join().is_err() {
                log::error!("Job worker panicked");
            }
        }
    }
}
