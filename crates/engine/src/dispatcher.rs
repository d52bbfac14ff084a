// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatcher: the long-running receive loop between queue and workers.
//!
//! A pool of loops (default size 1) pulls visible messages for every
//! registered leaf worker type and runs `execute` with per-message panic
//! isolation. Errors never escape a loop iteration; a worker failure is a
//! state transition plus an event, and the message is acked either way so
//! poison messages cannot spin the queue.

use crate::bus::{status_change, EventBus};
use crate::cancel::CancelRegistry;
use crate::error::EngineError;
use crate::log_pipeline::LogSender;
use crate::registry::WorkerRegistry;
use crate::worker::WorkerContext;
use quaero_core::{Clock, JobStatus, LogLevel, QueueMessage, WorkerId};
use quaero_storage::{JobStore, JobStoreError, Queue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Receive blocking window; also the shutdown poll cadence.
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// Backoff after a receive error before retrying the loop.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Error recorded on leaves whose soft timeout expired.
pub const TIMEOUT_ERROR: &str = "timeout";

struct DispatchCtx {
    queue: Arc<Queue>,
    jobs: JobStore,
    registry: Arc<WorkerRegistry>,
    bus: Arc<EventBus>,
    logs: LogSender,
    clock: Arc<dyn Clock>,
    cancels: Arc<CancelRegistry>,
    timeout_grace: Duration,
    shutdown: CancellationToken,
}

pub struct Dispatcher {
    ctx: Arc<DispatchCtx>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<Queue>,
        jobs: JobStore,
        registry: Arc<WorkerRegistry>,
        bus: Arc<EventBus>,
        logs: LogSender,
        clock: Arc<dyn Clock>,
        cancels: Arc<CancelRegistry>,
        timeout_grace: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ctx: Arc::new(DispatchCtx {
                queue,
                jobs,
                registry,
                bus,
                logs,
                clock,
                cancels,
                timeout_grace,
                shutdown,
            }),
        }
    }

    /// Spawn the receive loops.
    pub fn start(&self, pool_size: usize) -> Vec<JoinHandle<()>> {
        (0..pool_size.max(1))
            .map(|n| {
                let ctx = self.ctx.clone();
                let worker_id = WorkerId::new(format!("dispatch-{n}"));
                tokio::spawn(run_loop(ctx, worker_id))
            })
            .collect()
    }
}

async fn run_loop(ctx: Arc<DispatchCtx>, worker_id: WorkerId) {
    debug!(worker = %worker_id, "dispatcher loop started");
    loop {
        if ctx.shutdown.is_cancelled() {
            break;
        }
        let types = ctx.registry.leaf_types();
        if types.is_empty() {
            tokio::time::sleep(RECEIVE_TIMEOUT).await;
            continue;
        }
        let received = tokio::select! {
            received = ctx.queue.receive(&types, RECEIVE_TIMEOUT) => received,
            _ = ctx.shutdown.cancelled() => break,
        };
        match received {
            Ok(Some(msg)) => {
                let job_id = msg.job_id;
                if let Err(e) = handle_message(&ctx, &worker_id, msg).await {
                    error!(worker = %worker_id, job = %job_id, error = %e, "dispatch failed");
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!(worker = %worker_id, error = %e, "queue receive failed");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
    debug!(worker = %worker_id, "dispatcher loop stopped");
}

async fn handle_message(
    ctx: &Arc<DispatchCtx>,
    worker_id: &WorkerId,
    msg: QueueMessage,
) -> Result<(), EngineError> {
    let Some(job) = ctx.jobs.get(&msg.job_id)? else {
        warn!(msg = %msg.id, job = %msg.job_id, "message for unknown job");
        ctx.queue.ack(&msg.id)?;
        return Ok(());
    };

    // Redelivery / cancellation guard: terminal jobs are done, whatever
    // the queue still holds for them.
    if job.is_terminal() {
        ctx.queue.ack(&msg.id)?;
        return Ok(());
    }

    // First delivery moves the leaf to running; a redelivery finds it
    // already running and just executes again (at-least-once).
    let job = if job.status == JobStatus::Pending {
        finish(ctx, &msg.job_id, JobStatus::Running, None)?.unwrap_or(job)
    } else {
        job
    };

    let Some(worker) = ctx.registry.leaf(&msg.worker_type) else {
        finish(
            ctx,
            &job.id,
            JobStatus::Failed,
            Some(format!("no worker registered for type '{}'", msg.worker_type)),
        )?;
        ctx.queue.ack(&msg.id)?;
        return Ok(());
    };

    let token = ctx.cancels.token(&job.manager_id).child_token();
    let logger = ctx.logs.logger_for(&job, Some(worker_id.to_string()));
    let wctx = Arc::new(WorkerContext::new(
        job.clone(),
        msg.id,
        logger.clone(),
        token.clone(),
        ctx.queue.clone(),
        ctx.jobs.clone(),
        ctx.bus.clone(),
        ctx.clock.clone(),
    ));

    // Execute on its own task: panics become JoinErrors, and a worker that
    // ignores cancellation can be left to drain without blocking the loop.
    let mut handle = tokio::spawn({
        let wctx = wctx.clone();
        async move { worker.execute(&wctx).await }
    });

    let mut timed_out = false;
    let join = match job.leaf_timeout() {
        None => (&mut handle).await,
        Some(limit) => {
            tokio::select! {
                join = &mut handle => join,
                _ = tokio::time::sleep(limit) => {
                    timed_out = true;
                    token.cancel();
                    match tokio::time::timeout(ctx.timeout_grace, &mut handle).await {
                        Ok(join) => join,
                        Err(_) => {
                            // Still running past the grace period. The task is
                            // not killed; it exits when its I/O returns.
                            logger.error("leaf exceeded soft timeout and ignored cancellation");
                            finish(ctx, &job.id, JobStatus::Failed, Some(TIMEOUT_ERROR.to_string()))?;
                            ctx.queue.ack(&msg.id)?;
                            return Ok(());
                        }
                    }
                }
            }
        }
    };

    let outcome: Result<(), EngineError> = match join {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(EngineError::Panic(panic_message(e))),
        Err(_) => Err(EngineError::Worker("worker task aborted".to_string())),
    };

    match outcome {
        Ok(()) => {
            finish(ctx, &job.id, JobStatus::Completed, None)?;
        }
        Err(EngineError::Cancelled) if timed_out => {
            // Our own timeout-cancel coming back; the cause is the timeout
            finish(ctx, &job.id, JobStatus::Failed, Some(TIMEOUT_ERROR.to_string()))?;
        }
        Err(EngineError::Cancelled) => {
            finish(ctx, &job.id, JobStatus::Cancelled, None)?;
        }
        Err(e @ EngineError::Panic(_)) => {
            logger.force(LogLevel::Panic, e.to_string());
            finish(ctx, &job.id, JobStatus::Failed, Some(e.to_string()))?;
        }
        Err(e) => {
            finish(ctx, &job.id, JobStatus::Failed, Some(e.to_string()))?;
        }
    }

    // Ack in every outcome; redelivery of handled work is pure waste
    ctx.queue.ack(&msg.id)?;
    Ok(())
}

/// Transition and publish, tolerating a lost race (e.g. cancellation
/// marked the leaf terminal while it was executing).
fn finish(
    ctx: &DispatchCtx,
    id: &quaero_core::JobId,
    to: JobStatus,
    error: Option<String>,
) -> Result<Option<quaero_core::Job>, EngineError> {
    match ctx.jobs.transition(id, to, error, ctx.clock.now_utc()) {
        Ok((old, job)) => {
            ctx.bus.publish(status_change(old, &job));
            Ok(Some(job))
        }
        Err(JobStoreError::Transition(t)) => {
            debug!(job = %id, "transition skipped: {t}");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn panic_message(e: JoinError) -> String {
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
