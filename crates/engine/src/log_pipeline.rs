// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job log pipeline: bounded fan-in, single consumer, debounced triggers.
//!
//! Producers (workers, dispatcher, orchestrator) hold a [`JobLogger`]
//! bound to a job; logger calls are non-blocking appends to a bounded
//! channel. The single consumer owns per-job sequence assignment (gap-free
//! from 1), persists every entry regardless of level, publishes `job:log`
//! events at `info`+ (or on per-call override), and coalesces per-step
//! activity into debounced `logs:refresh` triggers so burst log rates
//! never translate into observer refresh rates.

use crate::bus::EventBus;
use crate::config::LogsSection;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use quaero_core::{Clock, Event, Job, JobId, JobKind, LogDraft, LogLevel};
use quaero_storage::JobStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Cloneable producer handle for the pipeline.
#[derive(Clone)]
pub struct LogSender {
    tx: mpsc::Sender<Vec<LogDraft>>,
    clock: Arc<dyn Clock>,
    dropped: Arc<AtomicU64>,
}

impl LogSender {
    /// A logger bound to one job. Leaf loggers attribute activity to the
    /// parent step for refresh triggers; step loggers to themselves.
    pub fn logger_for(&self, job: &Job, worker_id: Option<String>) -> JobLogger {
        let step_id = match job.kind {
            JobKind::Leaf => job.parent_id,
            JobKind::Step => Some(job.id),
            JobKind::Manager => None,
        };
        JobLogger {
            sender: self.clone(),
            job_id: job.id,
            manager_id: job.manager_id,
            step_id,
            step_name: job.step_name().map(str::to_string),
            worker_id,
        }
    }

    /// Non-blocking batch submit. Full channel drops the batch (counted);
    /// logging must never stall the engine.
    pub fn send(&self, drafts: Vec<LogDraft>) {
        if drafts.is_empty() {
            return;
        }
        if let Err(e) = self.tx.try_send(drafts) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped_batches = total, error = %e, "log channel full, dropping batch");
        }
    }

    /// Batches dropped because the channel was full.
    pub fn dropped_batches(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Logger bound to a `job_id` / `step` / `worker_id`. Cheap to clone.
#[derive(Clone)]
pub struct JobLogger {
    sender: LogSender,
    job_id: JobId,
    manager_id: JobId,
    step_id: Option<JobId>,
    step_name: Option<String>,
    worker_id: Option<String>,
}

impl JobLogger {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    fn draft(&self, level: LogLevel, message: String, force_publish: bool) -> LogDraft {
        LogDraft {
            job_id: self.job_id,
            manager_id: self.manager_id,
            step_id: self.step_id,
            step_name: self.step_name.clone(),
            worker_id: self.worker_id.clone(),
            level,
            message,
            fields: IndexMap::new(),
            timestamp: self.sender.clock.now_utc(),
            force_publish,
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sender.send(vec![self.draft(level, message.into(), false)]);
    }

    /// Log with structured fields.
    pub fn log_with(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        fields: IndexMap<String, String>,
    ) {
        let mut draft = self.draft(level, message.into(), false);
        draft.fields = fields;
        self.sender.send(vec![draft]);
    }

    /// Log and force `job:log` publication even below the UI level gate.
    pub fn force(&self, level: LogLevel, message: impl Into<String>) {
        self.sender.send(vec![self.draft(level, message.into(), true)]);
    }

    pub fn trace(&self, message: impl Into<String>) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}

struct TriggerState {
    count_since_trigger: u32,
    last_trigger: DateTime<Utc>,
}

struct Consumer {
    jobs: JobStore,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: LogsSection,
    triggers: HashMap<JobId, TriggerState>,
}

impl Consumer {
    fn process(&mut self, batch: Vec<LogDraft>) {
        // Group by job so each append is one atomic, sequence-contiguous write
        let mut by_job: IndexMap<JobId, Vec<LogDraft>> = IndexMap::new();
        for draft in batch {
            by_job.entry(draft.job_id).or_default().push(draft);
        }

        let mut step_activity: IndexMap<JobId, u32> = IndexMap::new();
        for (job_id, drafts) in by_job {
            for draft in &drafts {
                if let Some(step_id) = draft.step_id {
                    *step_activity.entry(step_id).or_default() += 1;
                }
            }

            // Everything the UI gate lets through, relative to the batch start
            let publishable: Vec<(u64, LogDraft)> = drafts
                .iter()
                .enumerate()
                .filter(|(_, d)| d.force_publish || d.level >= self.config.ui_min_level)
                .map(|(i, d)| (i as u64, d.clone()))
                .collect();

            let first = match self.jobs.append_logs(&job_id, drafts) {
                Ok(first) => first,
                Err(e) => {
                    // Storage failure must not take the pipeline down
                    error!(job = %job_id, error = %e, "failed to persist log batch");
                    continue;
                }
            };

            for (offset, draft) in publishable {
                self.bus.publish(Event::JobLog {
                    job_id: draft.job_id,
                    manager_id: draft.manager_id,
                    step_name: draft.step_name,
                    level: draft.level,
                    message: draft.message,
                    sequence: first + offset,
                });
            }
        }

        let mut due = Vec::new();
        for (step_id, n) in step_activity {
            if self.note_activity(step_id, n) {
                due.push(step_id);
            }
        }
        self.emit_refresh(due);
    }

    /// Record `n` logs against a step; true when a trigger is due.
    fn note_activity(&mut self, step_id: JobId, n: u32) -> bool {
        let now = self.clock.now_utc();
        let state = self.triggers.entry(step_id).or_insert(TriggerState {
            count_since_trigger: 0,
            last_trigger: DateTime::UNIX_EPOCH,
        });
        state.count_since_trigger += n;
        if state.count_since_trigger >= self.config.refresh_trigger_count
            || now - state.last_trigger >= age_limit(&self.config)
        {
            state.count_since_trigger = 0;
            state.last_trigger = now;
            return true;
        }
        false
    }

    /// Flush steps whose pending activity has aged past the interval.
    fn flush_stale(&mut self) {
        let now = self.clock.now_utc();
        let limit = age_limit(&self.config);
        let mut due = Vec::new();
        for (step_id, state) in self.triggers.iter_mut() {
            if state.count_since_trigger > 0 && now - state.last_trigger >= limit {
                state.count_since_trigger = 0;
                state.last_trigger = now;
                due.push(*step_id);
            }
        }
        self.emit_refresh(due);
    }

    fn emit_refresh(&self, step_ids: Vec<JobId>) {
        if !step_ids.is_empty() {
            self.bus.publish(Event::RefreshLogs { step_ids });
        }
    }
}

fn age_limit(config: &LogsSection) -> chrono::Duration {
    chrono::Duration::from_std(config.refresh_trigger_interval)
        .unwrap_or_else(|_| chrono::Duration::seconds(1))
}

/// The pipeline itself: start returns the producer handle and the
/// consumer task.
pub struct LogPipeline;

impl LogPipeline {
    pub fn start(
        jobs: JobStore,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: LogsSection,
        shutdown: CancellationToken,
    ) -> (LogSender, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Vec<LogDraft>>(config.channel_capacity.max(1));
        let sender =
            LogSender { tx, clock: clock.clone(), dropped: Arc::new(AtomicU64::new(0)) };

        let mut consumer = Consumer { jobs, bus, clock, config, triggers: HashMap::new() };
        let interval = consumer.config.refresh_trigger_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    batch = rx.recv() => match batch {
                        Some(batch) => consumer.process(batch),
                        None => break,
                    },
                    _ = ticker.tick() => consumer.flush_stale(),
                    _ = shutdown.cancelled() => {
                        // Drain what producers already submitted
                        while let Ok(batch) = rx.try_recv() {
                            consumer.process(batch);
                        }
                        consumer.flush_stale();
                        break;
                    }
                }
            }
        });

        (sender, task)
    }
}

#[cfg(test)]
#[path = "log_pipeline_tests.rs"]
mod tests;
