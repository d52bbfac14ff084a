// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared spec harness: a fully started engine over a temp store, with a
//! scripted worker type (`"work"`) and a plannable-but-unservable type
//! (`"orphan"`) whose leaves nobody executes.

use async_trait::async_trait;
use quaero_core::{
    ConfigMap, DocumentId, ErrorTolerance, Event, FakeClock, JobDefinition, JobId, JobStatus,
    StepDefinition,
};
use quaero_engine::{
    Engine, EngineConfig, EngineError, LeafWorker, StepContext, StepManager, WorkerContext,
    WorkerRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use serde_json::json;

pub const WORK: &str = "work";
pub const ORPHAN: &str = "orphan";

/// Planner shared by both worker types: one leaf per entry in the step
/// config's `leaves` array, created under the step's own worker type.
pub struct SpecPlanner;

#[async_trait]
impl StepManager for SpecPlanner {
    async fn create_leaves(&self, ctx: &StepContext) -> Result<usize, EngineError> {
        let leaves = match ctx.config().get("leaves").and_then(|v| v.as_array()) {
            Some(leaves) => leaves.clone(),
            None => return Ok(0),
        };
        let worker_type = ctx.step().worker_type.clone();
        let mut created = 0;
        for (n, leaf) in leaves.iter().enumerate() {
            let config: ConfigMap = leaf
                .as_object()
                .map(|map| map.clone().into_iter().collect())
                .unwrap_or_default();
            ctx.enqueue_leaf(format!("leaf-{n}"), worker_type.clone(), config)?;
            created += 1;
        }
        Ok(created)
    }
}

/// Scripted leaf worker; behavior per leaf config `action`.
pub struct SpecWorker;

#[async_trait]
impl LeafWorker for SpecWorker {
    fn worker_type(&self) -> &str {
        WORK
    }

    async fn execute(&self, ctx: &WorkerContext) -> Result<(), EngineError> {
        let action = ctx.config().get("action").and_then(|v| v.as_str()).unwrap_or("ok");
        match action {
            "ok" => {
                ctx.logger().info("work done");
                Ok(())
            }
            "fail" => Err(EngineError::Worker("spec failure".to_string())),
            "panic" => panic!("spec panic"),
            "doc" => {
                let doc_id = doc_id(ctx, "doc_id")?;
                ctx.save_document(&doc_id, b"document body".to_vec())?;
                ctx.logger().info(format!("saved document {doc_id}"));
                Ok(())
            }
            // Re-save existing documents (updates), then optionally one new
            "merge" => {
                if let Some(ids) = ctx.config().get("update_ids").and_then(|v| v.as_array()) {
                    for id in ids.iter().filter_map(|v| v.as_str()) {
                        ctx.save_document(&DocumentId::from_string(id), b"updated".to_vec())?;
                    }
                }
                if ctx.config().get("doc_id").is_some() {
                    let doc_id = doc_id(ctx, "doc_id")?;
                    ctx.save_document(&doc_id, b"merged".to_vec())?;
                }
                Ok(())
            }
            // Count executions in kv, sleep without extending visibility,
            // then save a fixed document id (idempotent under redelivery)
            "slow_doc" => {
                let execs = ctx
                    .kv_get("execs")?
                    .and_then(|v| String::from_utf8(v).ok())
                    .and_then(|s| s.parse::<u32>().ok())
                    .unwrap_or(0);
                ctx.kv_set("execs", (execs + 1).to_string().into_bytes())?;

                let ms = ctx.config().get("sleep_ms").and_then(|v| v.as_u64()).unwrap_or(300);
                tokio::time::sleep(Duration::from_millis(ms)).await;

                let doc_id = doc_id(ctx, "doc_id")?;
                ctx.save_document(&doc_id, b"slow body".to_vec())?;
                Ok(())
            }
            "sleep" => {
                let ms =
                    ctx.config().get("sleep_ms").and_then(|v| v.as_u64()).unwrap_or(60_000);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
                    _ = ctx.cancelled() => Err(EngineError::Cancelled),
                }
            }
            other => Err(EngineError::Worker(format!("unknown spec action: {other}"))),
        }
    }
}

fn doc_id(ctx: &WorkerContext, key: &str) -> Result<DocumentId, EngineError> {
    Ok(ctx
        .config()
        .get(key)
        .and_then(|v| v.as_str())
        .map(DocumentId::from_string)
        .unwrap_or_else(DocumentId::new))
}

pub fn spec_registry() -> WorkerRegistry {
    let registry = WorkerRegistry::new();
    registry.register_leaf(Arc::new(SpecWorker));
    registry.register_step(WORK, Arc::new(SpecPlanner));
    // Plannable, never executed: no leaf worker registered
    registry.register_step(ORPHAN, Arc::new(SpecPlanner));
    registry
}

pub struct Harness {
    pub engine: Engine,
    pub clock: Arc<FakeClock>,
    pub events: mpsc::UnboundedReceiver<Event>,
    pub dir: tempfile::TempDir,
}

pub async fn start() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    start_in(dir, EngineConfig::default()).await
}

pub async fn start_with(config: EngineConfig) -> Harness {
    start_in(tempfile::tempdir().unwrap(), config).await
}

pub async fn start_in(dir: tempfile::TempDir, mut config: EngineConfig) -> Harness {
    config.store.path = dir.path().join("store");
    let clock = Arc::new(FakeClock::new());
    let engine =
        Engine::start_with_clock(config, spec_registry(), clock.clone()).unwrap();
    let (_, events) = engine.bus().subscribe_channel(|_| true);
    Harness { engine, clock, events, dir }
}

impl Harness {
    /// Stop the engine, returning the store directory for a restart.
    pub async fn shutdown(self) -> tempfile::TempDir {
        self.engine.shutdown().await.unwrap();
        self.dir
    }

    /// Poll until the job reaches `status`, or panic after ~10s.
    pub async fn wait_for_status(&self, id: &JobId, status: JobStatus) {
        let ok = wait_until(10_000, || {
            self.engine.jobs().get(id).ok().flatten().map(|j| j.status) == Some(status)
        })
        .await;
        if !ok {
            let job = self.engine.jobs().get(id).ok().flatten();
            panic!("job {id} never reached {status}; current: {job:?}");
        }
    }

    pub fn job_status(&self, id: &JobId) -> JobStatus {
        self.engine.jobs().must_get(id).unwrap().status
    }

    /// Drain every event received so far (after letting handlers settle).
    pub async fn drain_events(&mut self) -> Vec<Event> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Steps of a manager, ordered by index.
    pub fn steps(&self, manager_id: &JobId) -> Vec<quaero_core::Job> {
        let mut steps: Vec<quaero_core::Job> = self
            .engine
            .jobs()
            .children(manager_id)
            .unwrap()
            .into_iter()
            .filter(|job| job.kind == quaero_core::JobKind::Step)
            .collect();
        steps.sort_by_key(|job| job.step_index().unwrap_or(usize::MAX));
        steps
    }

    pub fn leaves(&self, step_id: &JobId) -> Vec<quaero_core::Job> {
        self.engine.jobs().children(step_id).unwrap()
    }
}

/// Poll `f` every 20ms until it returns true or `timeout_ms` elapses.
pub async fn wait_until(timeout_ms: u64, f: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if f() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A definition with the given steps.
pub fn definition(id: &str, steps: Vec<StepDefinition>) -> JobDefinition {
    JobDefinition {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        steps,
    }
}

/// A `work` step whose leaves are the given JSON configs.
pub fn work_step(name: &str, leaves: Vec<serde_json::Value>) -> StepDefinition {
    typed_step(name, WORK, leaves)
}

pub fn typed_step(name: &str, worker_type: &str, leaves: Vec<serde_json::Value>) -> StepDefinition {
    let mut config = ConfigMap::new();
    config.insert("leaves".to_string(), leaves.into());
    StepDefinition {
        name: name.to_string(),
        worker_type: worker_type.to_string(),
        config,
        tolerance: ErrorTolerance::FailFast,
        timeout: None,
    }
}
