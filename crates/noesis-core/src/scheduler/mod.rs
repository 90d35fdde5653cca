//! Adaptive scheduler.
//!
//! A single cooperative loop owns every registered job. It wakes on a short
//! tick, computes each job's adapted interval from its temperament, the
//! global mood vector, the feedback of its last run, and jitter, then runs
//! due jobs one at a time. Jobs are serialized globally; they may await
//! external I/O but never overlap. An explicit trigger enqueues a one-shot
//! run that bypasses the interval check through the bounded command inbox.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Result, SubstrateError};
use crate::storage::{files, EventLog, FileStore};

/// Bounded inbox: commands applied between jobs, never mid-run
const INBOX_CAPACITY: usize = 64;
/// Jitter range keeping jobs out of lock-step
const JITTER_LOW: f64 = 0.85;
const JITTER_HIGH: f64 = 1.15;
/// Recency factor after a high-feedback run
const RECENCY_SHORTEN: f64 = 0.8;
/// Recency factor after a low-feedback run
const RECENCY_STRETCH: f64 = 1.25;

// ============================================================================
// MOOD
// ============================================================================

/// Named scalar dimensions in [0, 1] (curiosity, calm, tension, ...)
/// maintained by callers and read by the interval adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mood(BTreeMap<String, f64>);

impl Mood {
    /// Empty mood; every dimension reads as 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one dimension, clamped to [0, 1]
    pub fn set(&mut self, dimension: &str, value: f64) -> &mut Self {
        self.0.insert(dimension.to_string(), value.clamp(0.0, 1.0));
        self
    }

    /// Read one dimension, 0 when absent
    pub fn get(&self, dimension: &str) -> f64 {
        self.0.get(dimension).copied().unwrap_or(0.0)
    }

    /// Mean of all present dimensions; 0 for an empty mood
    pub fn mean_intensity(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.0.values().sum::<f64>() / self.0.len() as f64
    }

    /// Fold another mood's dimensions into this one
    pub fn merge(&mut self, other: &Mood) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clamp(0.0, 1.0));
        }
    }
}

// ============================================================================
// JOBS
// ============================================================================

/// How a job's interval responds to the mood vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Temperament {
    /// Interval unaffected by mood shape
    #[default]
    Neutral,
    /// Stretches during high calm (dreams)
    CalmStretched,
    /// Shortens during high tension (existential questions)
    TensionDriven,
    /// Shortens during high curiosity (reflection)
    CuriosityDriven,
}

impl Temperament {
    /// Per-job interval factor for the given mood
    pub fn factor(&self, mood: &Mood) -> f64 {
        let factor = match self {
            Temperament::Neutral => 1.0,
            Temperament::CalmStretched => 1.0 + 0.5 * mood.get("calm"),
            Temperament::TensionDriven => 1.0 - 0.5 * mood.get("tension"),
            Temperament::CuriosityDriven => 1.0 - 0.3 * mood.get("curiosity"),
        };
        factor.clamp(0.25, 2.0)
    }
}

/// What a finished job reports back to the scheduler
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    /// Quality signal in [0, 1]; shapes the recency factor of the next interval
    pub feedback: Option<f64>,
    /// Another job to enqueue immediately, bypassing its interval once
    pub trigger: Option<String>,
}

impl JobOutcome {
    /// No feedback, no follow-up
    pub fn quiet() -> Self {
        Self::default()
    }

    /// Attach a feedback signal
    pub fn with_feedback(mut self, signal: f64) -> Self {
        self.feedback = Some(signal.clamp(0.0, 1.0));
        self
    }

    /// Enqueue another job after this one
    pub fn with_trigger(mut self, job: impl Into<String>) -> Self {
        self.trigger = Some(job.into());
        self
    }
}

/// Boxed job future
pub type JobFuture = Pin<Box<dyn Future<Output = Result<JobOutcome>> + Send>>;

/// A registered cognitive job
pub struct Job {
    name: String,
    base_interval: Duration,
    priority: u8,
    temperament: Temperament,
    run: Arc<dyn Fn() -> JobFuture + Send + Sync>,
}

impl Job {
    /// A neutral, priority-0 job
    pub fn new<F>(name: impl Into<String>, base_interval: Duration, run: F) -> Self
    where
        F: Fn() -> JobFuture + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            base_interval,
            priority: 0,
            temperament: Temperament::Neutral,
            run: Arc::new(run),
        }
    }

    /// Higher runs first when several jobs are due on the same tick
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// How the interval responds to mood
    pub fn with_temperament(mut self, temperament: Temperament) -> Self {
        self.temperament = temperament;
        self
    }

    /// Job name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Persisted per-job state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    /// Base interval in seconds
    pub base_interval_secs: u64,
    /// When the job last completed (cancelled runs do not count)
    pub last_run: Option<DateTime<Utc>>,
    /// Cached adapted interval, refreshed after each run and on mood change
    pub adapted_interval_secs: f64,
    /// Feedback signal of the most recent completed run
    pub last_feedback: Option<f64>,
    /// Completed runs
    pub run_count: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchedulerState {
    jobs: BTreeMap<String, JobState>,
    mood: Mood,
}

// ============================================================================
// INTERVAL ADAPTATION
// ============================================================================

/// The adapted interval: base · f_type · f_mood · f_recency · jitter.
///
/// f_mood is a closed-form read of overall mood intensity: intense moods
/// shorten every interval, flat moods stretch them. f_recency lengthens the
/// interval after a low-feedback run and shortens it after a high one.
pub fn adapted_interval(
    base: Duration,
    temperament: Temperament,
    mood: &Mood,
    last_feedback: Option<f64>,
    jitter: f64,
) -> Duration {
    let f_type = temperament.factor(mood);
    let f_mood = (1.3 - 0.6 * mood.mean_intensity()).clamp(0.7, 1.3);
    let f_recency = match last_feedback {
        Some(signal) if signal >= 0.7 => RECENCY_SHORTEN,
        Some(signal) if signal <= 0.3 => RECENCY_STRETCH,
        _ => 1.0,
    };
    base.mul_f64((f_type * f_mood * f_recency * jitter).max(0.05))
}

// ============================================================================
// SCHEDULER
// ============================================================================

enum Command {
    Trigger(String),
    SetMood(Mood),
    Stop,
}

/// Status of one job run, recorded in the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// The adaptive scheduler and its persisted state
pub struct Scheduler {
    tick: Duration,
    jobs: Vec<Job>,
    state: SchedulerState,
    store: FileStore,
    events: Arc<EventLog>,
    rng: StdRng,
}

/// Control handle for a running scheduler
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
    shutdown: watch::Sender<bool>,
    join: tokio::task::JoinHandle<Scheduler>,
}

impl SchedulerHandle {
    /// Enqueue a one-shot run of `job`, bypassing its interval check
    pub async fn trigger(&self, job: &str) -> Result<()> {
        self.tx
            .send(Command::Trigger(job.to_string()))
            .await
            .map_err(|_| SubstrateError::Cancelled)
    }

    /// Replace the given mood dimensions and refresh every cached interval
    pub async fn set_mood(&self, mood: Mood) -> Result<()> {
        self.tx
            .send(Command::SetMood(mood))
            .await
            .map_err(|_| SubstrateError::Cancelled)
    }

    /// Stop the loop and get the scheduler back, state persisted
    pub async fn stop(self) -> Result<Scheduler> {
        let _ = self.shutdown.send(true);
        let _ = self.tx.send(Command::Stop).await;
        self.join.await.map_err(|_| SubstrateError::Cancelled)
    }
}

impl Scheduler {
    /// Load scheduler state from the data directory
    pub fn open(config: &Config, events: Arc<EventLog>) -> Result<Self> {
        Self::open_with_rng(config, events, StdRng::from_entropy())
    }

    /// Load with a caller-controlled RNG (tests seed this)
    pub fn open_with_rng(config: &Config, events: Arc<EventLog>, rng: StdRng) -> Result<Self> {
        let store = FileStore::new(&config.data_dir, files::SCHEDULER);
        let state: SchedulerState = store.load_or(SchedulerState::default())?;
        Ok(Self {
            tick: config.tick,
            jobs: Vec::new(),
            state,
            store,
            events,
            rng,
        })
    }

    /// Register a job. Persisted state from an earlier session is kept;
    /// the base interval always follows the registration.
    pub fn register(&mut self, job: Job) -> Result<()> {
        let jitter = self.draw_jitter();
        let entry = self
            .state
            .jobs
            .entry(job.name.clone())
            .or_insert_with(|| JobState {
                base_interval_secs: job.base_interval.as_secs(),
                last_run: None,
                adapted_interval_secs: 0.0,
                last_feedback: None,
                run_count: 0,
            });
        entry.base_interval_secs = job.base_interval.as_secs();
        entry.adapted_interval_secs = adapted_interval(
            job.base_interval,
            job.temperament,
            &self.state.mood,
            entry.last_feedback,
            jitter,
        )
        .as_secs_f64();
        self.jobs.push(job);
        self.persist()
    }

    /// The current mood vector
    pub fn mood(&self) -> &Mood {
        &self.state.mood
    }

    /// Persisted state of one job
    pub fn job_state(&self, name: &str) -> Option<&JobState> {
        self.state.jobs.get(name)
    }

    /// Start the loop. The scheduler moves into a background task and comes
    /// back from [`SchedulerHandle::stop`].
    pub fn start(self) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run_loop(rx, shutdown_rx));
        info!("scheduler started");
        SchedulerHandle {
            tx,
            shutdown: shutdown_tx,
            join,
        }
    }

    async fn run_loop(
        mut self,
        mut inbox: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Scheduler {
        let mut pending: VecDeque<String> = VecDeque::new();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                command = inbox.recv() => match command {
                    Some(Command::Trigger(name)) => {
                        pending.push_back(name);
                        self.drain_pending(&mut pending, &mut shutdown).await;
                    }
                    Some(Command::SetMood(mood)) => self.apply_mood(mood),
                    Some(Command::Stop) | None => break,
                },
                _ = tokio::time::sleep(self.tick) => {
                    self.drain_pending(&mut pending, &mut shutdown).await;
                    for name in self.due_jobs() {
                        if *shutdown.borrow() {
                            break;
                        }
                        self.run_job(&name, &mut pending, &mut shutdown).await;
                    }
                }
            }
        }
        if let Err(e) = self.persist() {
            warn!(error = %e, "could not persist scheduler state on shutdown");
        }
        info!("scheduler stopped");
        self
    }

    async fn drain_pending(
        &mut self,
        pending: &mut VecDeque<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        while let Some(name) = pending.pop_front() {
            if *shutdown.borrow() {
                break;
            }
            self.run_job(&name, pending, shutdown).await;
        }
    }

    /// Due jobs this tick, highest priority first
    fn due_jobs(&self) -> Vec<String> {
        let now = Utc::now();
        let mut due: Vec<(&Job, u8)> = self
            .jobs
            .iter()
            .filter(|job| {
                let Some(state) = self.state.jobs.get(&job.name) else {
                    return false;
                };
                match state.last_run {
                    None => true,
                    Some(last) => {
                        let elapsed = (now - last).num_milliseconds() as f64 / 1000.0;
                        elapsed >= state.adapted_interval_secs
                    }
                }
            })
            .map(|job| (job, job.priority))
            .collect();
        due.sort_by(|a, b| b.1.cmp(&a.1));
        due.into_iter().map(|(job, _)| job.name.clone()).collect()
    }

    /// Run one job to completion, cancellation, or failure. Cancellation
    /// (shutdown arriving between awaits) leaves `last_run` untouched.
    async fn run_job(
        &mut self,
        name: &str,
        pending: &mut VecDeque<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let Some(job_index) = self.jobs.iter().position(|j| j.name == name) else {
            warn!(job = name, "trigger for unregistered job ignored");
            return;
        };
        let run = Arc::clone(&self.jobs[job_index].run);
        let future = run();

        let status;
        let mut feedback = None;
        tokio::select! {
            result = future => match result {
                Ok(outcome) => {
                    status = RunStatus::Completed;
                    feedback = outcome.feedback;
                    if let Some(next) = outcome.trigger {
                        pending.push_back(next);
                    }
                }
                Err(e) => {
                    warn!(job = name, error = %e, "job failed");
                    status = RunStatus::Failed;
                }
            },
            _ = shutdown.changed() => {
                status = RunStatus::Cancelled;
            }
        }

        if status != RunStatus::Cancelled {
            let now = Utc::now();
            let job = &self.jobs[job_index];
            let jitter = self.rng.gen_range(JITTER_LOW..JITTER_HIGH);
            if let Some(state) = self.state.jobs.get_mut(name) {
                state.last_run = Some(now);
                if status == RunStatus::Completed {
                    state.run_count += 1;
                    if feedback.is_some() {
                        state.last_feedback = feedback;
                    }
                }
                state.adapted_interval_secs = adapted_interval(
                    job.base_interval,
                    job.temperament,
                    &self.state.mood,
                    state.last_feedback,
                    jitter,
                )
                .as_secs_f64();
            }
            if let Err(e) = self.persist() {
                warn!(error = %e, "could not persist scheduler state");
            }
        }

        self.events.append(
            "job_run",
            serde_json::json!({
                "job": name,
                "status": status,
                "feedback": feedback,
            }),
        );
    }

    fn apply_mood(&mut self, mood: Mood) {
        self.state.mood.merge(&mood);
        // Mood shifts every interval; refresh the caches now
        let mood_snapshot = self.state.mood.clone();
        let jitters: Vec<f64> = (0..self.jobs.len())
            .map(|_| self.rng.gen_range(JITTER_LOW..JITTER_HIGH))
            .collect();
        for (job, jitter) in self.jobs.iter().zip(jitters) {
            if let Some(state) = self.state.jobs.get_mut(&job.name) {
                state.adapted_interval_secs = adapted_interval(
                    job.base_interval,
                    job.temperament,
                    &mood_snapshot,
                    state.last_feedback,
                    jitter,
                )
                .as_secs_f64();
            }
        }
        if let Err(e) = self.persist() {
            warn!(error = %e, "could not persist mood change");
        }
        self.events.append(
            "mood_set",
            serde_json::to_value(&self.state.mood).unwrap_or_default(),
        );
    }

    fn draw_jitter(&mut self) -> f64 {
        self.rng.gen_range(JITTER_LOW..JITTER_HIGH)
    }

    fn persist(&self) -> Result<()> {
        self.store.save(&self.state)
    }
}
