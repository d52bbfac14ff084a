// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine wiring: storage, queue, pipeline, monitor, dispatchers, hub.
//!
//! `Engine::start` opens the store, recovers persisted state, and spawns
//! every long-running task. It must run inside a tokio runtime. Shutdown
//! cancels the root token, joins the tasks, and flushes the store.

use crate::bus::EventBus;
use crate::cancel::CancelRegistry;
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::log_pipeline::{LogPipeline, LogSender};
use crate::monitor::Monitor;
use crate::observer::ObserverHub;
use crate::orchestrator::Orchestrator;
use crate::query::Queries;
use crate::registry::WorkerRegistry;
use quaero_core::{Clock, Event, Job, JobDefinition, JobId, JobKind, JobStatus, SystemClock};
use quaero_storage::{keys, JobStore, Queue, Store};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Queue depth per observer client before it counts as slow.
const OBSERVER_QUEUE_DEPTH: usize = 256;

pub struct Engine {
    bus: Arc<EventBus>,
    jobs: JobStore,
    queue: Arc<Queue>,
    orchestrator: Arc<Orchestrator>,
    queries: Queries,
    observers: Arc<ObserverHub>,
    logs: LogSender,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Start with the system clock.
    pub fn start(config: EngineConfig, registry: WorkerRegistry) -> Result<Self, EngineError> {
        Self::start_with_clock(config, registry, Arc::new(SystemClock))
    }

    /// Start with an injected clock (tests drive time explicitly).
    pub fn start_with_clock(
        config: EngineConfig,
        registry: WorkerRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let store = Arc::new(Store::open(&config.store.path)?);
        let jobs = JobStore::new(store);
        let bus = Arc::new(EventBus::new());
        let queue = Arc::new(Queue::new(
            jobs.store().clone(),
            jobs.clone(),
            bus.clone(),
            clock.clone(),
            config.queue.to_queue_config(),
        ));

        let shutdown = CancellationToken::new();
        let (logs, pipeline_task) = LogPipeline::start(
            jobs.clone(),
            bus.clone(),
            clock.clone(),
            config.logs.clone(),
            shutdown.child_token(),
        );

        let registry = Arc::new(registry);
        let cancels = Arc::new(CancelRegistry::new());
        let orchestrator = Arc::new(Orchestrator::new(
            jobs.clone(),
            queue.clone(),
            registry.clone(),
            bus.clone(),
            logs.clone(),
            clock.clone(),
            cancels.clone(),
        ));

        let monitor = Monitor::new(
            jobs.clone(),
            bus.clone(),
            orchestrator.clone(),
            clock.clone(),
            cancels.clone(),
            config.monitor.periodic_flush_interval,
            shutdown.child_token(),
        );
        let dispatcher = Dispatcher::new(
            queue.clone(),
            jobs.clone(),
            registry,
            bus.clone(),
            logs.clone(),
            clock,
            cancels,
            config.dispatcher.timeout_grace,
            shutdown.child_token(),
        );
        let observers = Arc::new(ObserverHub::new(OBSERVER_QUEUE_DEPTH));

        let mut tasks = vec![pipeline_task, monitor.start()];
        tasks.extend(dispatcher.start(config.dispatcher.worker_pool_size));
        tasks.push(observers.start(&bus, shutdown.child_token()));

        let engine = Self {
            bus,
            queries: Queries::new(jobs.clone()),
            jobs,
            queue,
            orchestrator,
            observers,
            logs,
            shutdown,
            tasks,
        };
        engine.recover()?;
        info!("engine started");
        Ok(engine)
    }

    /// Resume persisted state after a restart.
    ///
    /// Messages for terminal jobs are acked away; live leaf messages
    /// become visible again within the visibility timeout on their own.
    /// Running steps get a synthetic activation so the monitor re-checks
    /// them, and stalled managers (terminal step, nothing running) are
    /// pushed through orchestrator advancement.
    fn recover(&self) -> Result<(), EngineError> {
        let live = self.queue.recover()?;
        if live > 0 {
            debug!(live, "recovered live queue messages");
        }

        let mut running_steps = Vec::new();
        let mut running_managers = Vec::new();
        for (_, bytes) in self.jobs.store().scan(keys::JOBS) {
            let job: Job = match serde_json::from_slice(&bytes) {
                Ok(job) => job,
                Err(e) => {
                    error!(error = %e, "undecodable job record during recovery");
                    continue;
                }
            };
            match (job.kind, job.status) {
                (JobKind::Step, JobStatus::Running) => running_steps.push(job),
                (JobKind::Manager, JobStatus::Running) => running_managers.push(job),
                _ => {}
            }
        }

        for step in &running_steps {
            self.bus.publish(Event::StepActivation {
                manager_id: step.manager_id,
                step_id: step.id,
                step_index: step.step_index().unwrap_or(0),
            });
        }

        for manager in running_managers {
            let steps: Vec<Job> = self
                .jobs
                .children(&manager.id)?
                .into_iter()
                .filter(|job| job.kind == JobKind::Step)
                .collect();
            if steps.iter().any(|s| s.status == JobStatus::Running) {
                continue; // the monitor drives it via the synthetic activation
            }
            let orchestrator = self.orchestrator.clone();
            if let Some(last_terminal) = steps
                .iter()
                .filter(|s| s.is_terminal())
                .max_by_key(|s| s.step_index().unwrap_or(0))
                .cloned()
            {
                // Crashed between a step closing and the next activating
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.advance_after(&last_terminal).await {
                        error!(error = %e, "recovery advancement failed");
                    }
                });
            } else {
                // Crashed before the first step ever started
                let manager_id = manager.id;
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.advance_from(&manager_id, 0).await {
                        error!(manager = %manager_id, error = %e, "recovery activation failed");
                    }
                });
            }
        }
        Ok(())
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn queries(&self) -> &Queries {
        &self.queries
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn observers(&self) -> &Arc<ObserverHub> {
        &self.observers
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn log_sender(&self) -> &LogSender {
        &self.logs
    }

    /// Submit a validated definition for execution.
    pub async fn execute_definition(
        &self,
        definition: &JobDefinition,
    ) -> Result<JobId, EngineError> {
        self.orchestrator.execute_definition(definition).await
    }

    /// Cancel a manager and everything under it.
    pub async fn cancel_manager(&self, manager_id: &JobId) -> Result<(), EngineError> {
        self.orchestrator.cancel_manager(manager_id).await
    }

    /// Stop every task and flush the store.
    pub async fn shutdown(mut self) -> Result<(), EngineError> {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.jobs.store().flush()?;
        info!("engine stopped");
        Ok(())
    }
}
