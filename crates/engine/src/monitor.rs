// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monitor: rolls leaf state up into step and manager aggregates.
//!
//! A single consumer task subscribes to status-change, activation, and
//! document events. Every leaf change recomputes the owning step's counts
//! from the children index, persists them as `step.progress`, publishes
//! `step:progress` / `manager:progress`, and closes the step once all
//! leaves are terminal (policy per the step's tolerance). A periodic
//! ticker republishes progress for steps with activity since the last
//! publish.

use crate::bus::{status_change, EventBus};
use crate::cancel::CancelRegistry;
use crate::error::EngineError;
use crate::orchestrator::Orchestrator;
use quaero_core::{Clock, Event, JobId, JobKind, JobStatus, StatusCounts};
use quaero_storage::{JobStore, JobStoreError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub struct Monitor {
    jobs: JobStore,
    bus: Arc<EventBus>,
    orchestrator: Arc<Orchestrator>,
    clock: Arc<dyn Clock>,
    cancels: Arc<CancelRegistry>,
    flush_interval: Duration,
    shutdown: CancellationToken,
}

impl Monitor {
    pub fn new(
        jobs: JobStore,
        bus: Arc<EventBus>,
        orchestrator: Arc<Orchestrator>,
        clock: Arc<dyn Clock>,
        cancels: Arc<CancelRegistry>,
        flush_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self { jobs, bus, orchestrator, clock, cancels, flush_interval, shutdown }
    }

    pub fn start(self) -> JoinHandle<()> {
        let (subscription, mut rx) = self.bus.subscribe_channel(|event| {
            matches!(
                event,
                Event::JobStatusChange { .. }
                    | Event::StepActivation { .. }
                    | Event::DocumentSaved { .. }
            )
        });

        tokio::spawn(async move {
            // Steps with activity since their last published aggregate
            let mut dirty: HashSet<JobId> = HashSet::new();
            let mut ticker = tokio::time::interval(self.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => self.handle(event, &mut dirty).await,
                        None => break,
                    },
                    _ = ticker.tick() => {
                        for step_id in dirty.drain().collect::<Vec<_>>() {
                            if let Err(e) = self.refresh_step(&step_id).await {
                                error!(step = %step_id, error = %e, "periodic flush failed");
                            }
                        }
                    }
                    _ = self.shutdown.cancelled() => break,
                }
            }
            self.bus.unsubscribe(subscription);
            debug!("monitor stopped");
        })
    }

    async fn handle(&self, event: Event, dirty: &mut HashSet<JobId>) {
        match event {
            Event::JobStatusChange { kind: JobKind::Leaf, parent_id: Some(step_id), .. } => {
                dirty.insert(step_id);
                if let Err(e) = self.refresh_step(&step_id).await {
                    error!(step = %step_id, error = %e, "step aggregation failed");
                }
            }
            Event::JobStatusChange { kind: JobKind::Step, manager_id, .. } => {
                // Step transitions shift the manager aggregate
                if let Err(e) = self.refresh_manager(&manager_id) {
                    error!(manager = %manager_id, error = %e, "manager aggregation failed");
                }
            }
            Event::JobStatusChange { kind: JobKind::Manager, manager_id, new_status, .. }
                if new_status.is_terminal() =>
            {
                self.cancels.remove(&manager_id);
            }
            Event::StepActivation { step_id, .. } => {
                dirty.insert(step_id);
                if let Err(e) = self.refresh_step(&step_id).await {
                    error!(step = %step_id, error = %e, "activation aggregation failed");
                }
            }
            Event::DocumentSaved { job_id, manager_id, is_new: true, .. } => {
                if let Err(e) = self.record_document(&job_id, dirty) {
                    error!(job = %job_id, error = %e, "document accounting failed");
                }
                if let Err(e) = self.refresh_manager(&manager_id) {
                    error!(manager = %manager_id, error = %e, "manager aggregation failed");
                }
            }
            _ => {}
        }
    }

    /// Recompute one step's aggregate from its children, publish it, and
    /// close the step when every leaf is terminal.
    async fn refresh_step(&self, step_id: &JobId) -> Result<(), EngineError> {
        let Some(step) = self.jobs.get(step_id)? else {
            warn!(step = %step_id, "aggregate refresh for unknown step");
            return Ok(());
        };
        if step.kind != JobKind::Step {
            return Ok(());
        }

        let mut counts = StatusCounts::default();
        for leaf in self.jobs.children(&step.id)? {
            counts.record(leaf.status);
        }
        let total_leaves = counts.total();

        self.jobs.set_progress(&step.id, counts)?;
        self.bus.publish(Event::StepProgress {
            manager_id: step.manager_id,
            step_id: step.id,
            step_name: step.step_name().unwrap_or(&step.name).to_string(),
            step_index: step.step_index().unwrap_or(0),
            counts,
            total_leaves,
        });

        // Close the step only after its planner finished creating leaves;
        // otherwise a fast first leaf could terminate a half-planned step.
        if counts.all_terminal() && !step.is_terminal() && step.leaves_planned() {
            let failures = counts.failed;
            let (to, error) = if step.tolerance().allows(failures) {
                (JobStatus::Completed, None)
            } else {
                (JobStatus::Failed, Some(format!("{failures} of {total_leaves} leaves failed")))
            };
            match self.jobs.transition(&step.id, to, error, self.clock.now_utc()) {
                Ok((old, closed)) => {
                    self.bus.publish(status_change(old, &closed));
                    self.refresh_manager(&closed.manager_id)?;
                    self.orchestrator.advance_after(&closed).await?;
                    return Ok(());
                }
                // Another writer (cancellation) closed it first
                Err(JobStoreError::Transition(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.refresh_manager(&step.manager_id)?;
        Ok(())
    }

    /// Recompute and publish a manager's step aggregate.
    fn refresh_manager(&self, manager_id: &JobId) -> Result<(), EngineError> {
        let Some(_) = self.jobs.get(manager_id)? else {
            warn!(manager = %manager_id, "aggregate refresh for unknown manager");
            return Ok(());
        };

        let mut counts = StatusCounts::default();
        let mut total_steps = 0u64;
        for child in self.jobs.children(manager_id)? {
            if child.kind == JobKind::Step {
                counts.record(child.status);
                total_steps += 1;
            }
        }
        let manager = self.jobs.set_progress(manager_id, counts)?;

        self.bus.publish(Event::ManagerProgress {
            manager_id: *manager_id,
            step_counts: counts,
            total_steps,
            document_count: manager.document_count,
        });
        Ok(())
    }

    /// A new document landed: bump the leaf, its step, and the manager.
    /// Updates to existing documents never reach this path.
    fn record_document(
        &self,
        leaf_id: &JobId,
        dirty: &mut HashSet<JobId>,
    ) -> Result<(), EngineError> {
        let leaf = self.jobs.add_document_count(leaf_id, 1)?;
        if let Some(step_id) = leaf.parent_id {
            self.jobs.add_document_count(&step_id, 1)?;
            dirty.insert(step_id);
        }
        if leaf.manager_id != leaf.id {
            self.jobs.add_document_count(&leaf.manager_id, 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
