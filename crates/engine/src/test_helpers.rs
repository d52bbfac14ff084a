// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for the engine crate.
//!
//! Provides a wired engine stack over a temp store, plus a scripted
//! worker type (`"script"`) whose per-leaf behavior is driven by config:
//! `{"action": "ok" | "fail" | "panic" | "sleep" | "doc" | "spawn"}`.

use crate::bus::EventBus;
use crate::cancel::CancelRegistry;
use crate::config::LogsSection;
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::log_pipeline::{LogPipeline, LogSender};
use crate::monitor::Monitor;
use crate::orchestrator::Orchestrator;
use crate::registry::WorkerRegistry;
use crate::worker::{LeafWorker, StepContext, StepManager, WorkerContext};
use async_trait::async_trait;
use quaero_core::{
    ConfigMap, DocumentId, ErrorTolerance, Event, FakeClock, JobDefinition, JobId, JobStatus,
    StepDefinition,
};
use quaero_storage::{JobStore, Queue, QueueConfig, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) const SCRIPT: &str = "script";

/// Step planner for the scripted worker: enqueues one leaf per entry in
/// the step config's `leaves` array.
pub(crate) struct ScriptPlanner;

#[async_trait]
impl StepManager for ScriptPlanner {
    async fn create_leaves(&self, ctx: &StepContext) -> Result<usize, EngineError> {
        if ctx.config().get("plan_fail").is_some() {
            return Err(EngineError::Worker("scripted planner failure".to_string()));
        }
        if ctx.config().get("plan_panic").is_some() {
            panic!("scripted planner panic");
        }
        let leaves = match ctx.config().get("leaves").and_then(|v| v.as_array()) {
            Some(leaves) => leaves.clone(),
            None => return Ok(0),
        };
        let mut created = 0;
        for (n, leaf) in leaves.iter().enumerate() {
            let config: ConfigMap = leaf
                .as_object()
                .map(|map| map.clone().into_iter().collect())
                .unwrap_or_default();
            let name = config
                .get("name")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("leaf-{n}"));
            ctx.enqueue_leaf(name, SCRIPT, config)?;
            created += 1;
        }
        Ok(created)
    }
}

/// Leaf worker whose behavior is scripted through its config.
pub(crate) struct ScriptWorker;

#[async_trait]
impl LeafWorker for ScriptWorker {
    fn worker_type(&self) -> &str {
        SCRIPT
    }

    fn validate(&self, config: &ConfigMap) -> Result<(), EngineError> {
        if config.get("invalid").is_some() {
            return Err(EngineError::Validation("scripted invalid config".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &WorkerContext) -> Result<(), EngineError> {
        let action = ctx.config().get("action").and_then(|v| v.as_str()).unwrap_or("ok");
        match action {
            "ok" => {
                ctx.logger().info("scripted leaf done");
                Ok(())
            }
            "fail" => Err(EngineError::Worker("scripted failure".to_string())),
            "panic" => panic!("scripted panic"),
            "doc" => {
                let doc_id = ctx
                    .config()
                    .get("doc_id")
                    .and_then(|v| v.as_str())
                    .map(DocumentId::from_string)
                    .unwrap_or_else(DocumentId::new);
                ctx.save_document(&doc_id, b"payload".to_vec())?;
                ctx.record_result(1)?;
                Ok(())
            }
            "spawn" => {
                // Sibling spawning, guarded against redelivery via kv
                let guard = format!("spawned/{}", ctx.job().id);
                if ctx.kv_get(&guard)?.is_none() {
                    ctx.kv_set(&guard, vec![1])?;
                    let mut config = ConfigMap::new();
                    config.insert("action".to_string(), "ok".into());
                    ctx.enqueue_sibling("spawned-sibling", config)?;
                }
                Ok(())
            }
            "sleep" => {
                let ms =
                    ctx.config().get("sleep_ms").and_then(|v| v.as_u64()).unwrap_or(1000);
                if ctx.config().get("ignore_cancel").is_some() {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    return Ok(());
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
                    _ = ctx.cancelled() => Err(EngineError::Cancelled),
                }
            }
            other => Err(EngineError::Worker(format!("unknown scripted action: {other}"))),
        }
    }
}

/// Build a one-step definition over scripted leaves.
pub(crate) fn script_definition(steps: Vec<StepDefinition>) -> JobDefinition {
    JobDefinition {
        id: "def-script".to_string(),
        name: "scripted".to_string(),
        description: String::new(),
        steps,
    }
}

/// A scripted step whose leaves are the given JSON configs.
pub(crate) fn script_step(name: &str, leaves: Vec<serde_json::Value>) -> StepDefinition {
    let mut config = ConfigMap::new();
    config.insert("leaves".to_string(), leaves.into());
    StepDefinition {
        name: name.to_string(),
        worker_type: SCRIPT.to_string(),
        config,
        tolerance: ErrorTolerance::FailFast,
        timeout: None,
    }
}

/// Fully wired engine stack over a temp store.
pub(crate) struct TestContext {
    pub jobs: JobStore,
    pub queue: Arc<Queue>,
    pub bus: Arc<EventBus>,
    pub clock: Arc<FakeClock>,
    pub registry: Arc<WorkerRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub logs: LogSender,
    pub cancels: Arc<CancelRegistry>,
    pub shutdown: CancellationToken,
    pub events: mpsc::UnboundedReceiver<Event>,
    pub store_dir: tempfile::TempDir,
    _tasks: Vec<JoinHandle<()>>,
}

pub(crate) struct SetupOptions {
    pub dispatcher: bool,
    pub monitor: bool,
    pub queue: QueueConfig,
    pub timeout_grace: Duration,
    pub flush_interval: Duration,
    pub logs: LogsSection,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            dispatcher: true,
            monitor: true,
            queue: QueueConfig::default(),
            timeout_grace: Duration::from_millis(200),
            flush_interval: Duration::from_millis(100),
            logs: LogsSection::default(),
        }
    }
}

pub(crate) async fn setup() -> TestContext {
    setup_with(SetupOptions::default()).await
}

pub(crate) async fn setup_with(options: SetupOptions) -> TestContext {
    let store_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(store_dir.path()).unwrap());
    let jobs = JobStore::new(store);
    let bus = Arc::new(EventBus::new());
    let clock = Arc::new(FakeClock::new());
    let queue = Arc::new(Queue::new(
        jobs.store().clone(),
        jobs.clone(),
        bus.clone(),
        clock.clone(),
        options.queue,
    ));

    let shutdown = CancellationToken::new();
    let (logs, pipeline_task) = LogPipeline::start(
        jobs.clone(),
        bus.clone(),
        clock.clone(),
        options.logs,
        shutdown.child_token(),
    );

    let registry = Arc::new(WorkerRegistry::new());
    registry.register_leaf(Arc::new(ScriptWorker));
    registry.register_step(SCRIPT, Arc::new(ScriptPlanner));

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

    let (_, events) = bus.subscribe_channel(|_| true);

    let mut tasks = vec![pipeline_task];
    if options.monitor {
        let monitor = Monitor::new(
            jobs.clone(),
            bus.clone(),
            orchestrator.clone(),
            clock.clone(),
            cancels.clone(),
            options.flush_interval,
            shutdown.child_token(),
        );
        tasks.push(monitor.start());
    }
    if options.dispatcher {
        let dispatcher = Dispatcher::new(
            queue.clone(),
            jobs.clone(),
            registry.clone(),
            bus.clone(),
            logs.clone(),
            clock.clone(),
            cancels.clone(),
            options.timeout_grace,
            shutdown.child_token(),
        );
        tasks.extend(dispatcher.start(1));
    }

    TestContext {
        jobs,
        queue,
        bus,
        clock,
        registry,
        orchestrator,
        logs,
        cancels,
        shutdown,
        events,
        store_dir,
        _tasks: tasks,
    }
}

impl TestContext {
    /// Poll until the job reaches `status`, or panic after ~5s.
    pub(crate) async fn wait_for_status(&self, id: &JobId, status: JobStatus) {
        let ok = wait_until(5_000, || {
            self.jobs.get(id).ok().flatten().map(|j| j.status) == Some(status)
        })
        .await;
        if !ok {
            let job = self.jobs.get(id).ok().flatten();
            panic!("job {id} never reached {status}; current: {job:?}");
        }
    }

    /// Drain every event received so far.
    pub(crate) fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Poll `f` every 10ms until it returns true or `timeout_ms` elapses.
pub(crate) async fn wait_until(timeout_ms: u64, f: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if f() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
