// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restart recovery: terminal state survives byte-for-byte, and
//! non-terminal work resumes as visible queue messages.

use crate::specs::prelude::*;
use quaero_core::JobStatus;
use quaero_engine::EngineConfig;

#[tokio::test]
async fn terminal_state_survives_restart() {
    let h = start().await;
    let def = definition(
        "def-restartable",
        vec![
            work_step("produce", vec![json!({"action": "doc", "doc_id": "r-1"})]),
            work_step("verify", vec![json!({"action": "ok"})]),
        ],
    );
    let manager_id = h.engine.execute_definition(&def).await.unwrap();
    h.wait_for_status(&manager_id, JobStatus::Completed).await;
    let ok = wait_until(5_000, || {
        h.engine.jobs().must_get(&manager_id).unwrap().document_count == 1
    })
    .await;
    assert!(ok);

    let before: Vec<(String, JobStatus)> = h
        .engine
        .jobs()
        .jobs_under_manager(&manager_id)
        .unwrap()
        .iter()
        .map(|job| (job.id.to_string(), job.status))
        .collect();
    let steps = h.steps(&manager_id);
    let leaf_id = h.leaves(&steps[0].id)[0].id;
    let logs_before = h.engine.jobs().logs_meta(&leaf_id).unwrap();

    let dir = h.shutdown().await;
    let h = start_in(dir, EngineConfig::default()).await;

    // Same tree, same statuses, same counters, same logs
    let manager = h.engine.jobs().must_get(&manager_id).unwrap();
    assert_eq!(manager.status, JobStatus::Completed);
    assert_eq!(manager.document_count, 1);

    let after: Vec<(String, JobStatus)> = h
        .engine
        .jobs()
        .jobs_under_manager(&manager_id)
        .unwrap()
        .iter()
        .map(|job| (job.id.to_string(), job.status))
        .collect();
    assert_eq!(before, after);
    assert_eq!(h.engine.jobs().logs_meta(&leaf_id).unwrap(), logs_before);

    // Nothing got re-queued for a finished tree
    assert!(h.engine.queue().is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn non_terminal_leaves_reappear_as_visible_messages() {
    let h = start().await;
    // Orphan leaves have no executor, so they stay queued across restart
    let def = definition(
        "def-unfinished",
        vec![typed_step("stuck", ORPHAN, vec![json!({}), json!({})])],
    );
    let manager_id = h.engine.execute_definition(&def).await.unwrap();

    let steps = h.steps(&manager_id);
    assert_eq!(steps[0].status, JobStatus::Running);
    assert_eq!(h.engine.queue().len(), 2);

    let dir = h.shutdown().await;
    let h = start_in(dir, EngineConfig::default()).await;

    // The tree is still mid-flight and both messages are receivable
    assert_eq!(h.job_status(&manager_id), JobStatus::Running);
    let steps = h.steps(&manager_id);
    assert_eq!(steps[0].status, JobStatus::Running);
    assert!(h.leaves(&steps[0].id).iter().all(|l| l.status == JobStatus::Pending));

    assert_eq!(h.engine.queue().len(), 2);
    let types = vec![ORPHAN.to_string()];
    assert!(h.engine.queue().try_receive(&types).unwrap().is_some());
    assert!(h.engine.queue().try_receive(&types).unwrap().is_some());

    h.shutdown().await;
}

#[tokio::test]
async fn manager_stalled_between_steps_resumes_on_restart() {
    let h = start().await;
    let def = definition(
        "def-stalled",
        vec![
            work_step("done-before-crash", vec![json!({"action": "ok"})]),
            work_step("after-crash", vec![json!({"action": "ok"})]),
        ],
    );
    let manager_id = h.engine.execute_definition(&def).await.unwrap();
    h.wait_for_status(&manager_id, JobStatus::Completed).await;

    // Simulate the crash window by hand: rewind the manager and second
    // step to the moment right after step 0 closed
    let dir = h.shutdown().await;
    {
        let store = std::sync::Arc::new(quaero_storage::Store::open(&dir.path().join("store")).unwrap());
        let jobs = quaero_storage::JobStore::new(store.clone());
        let rewind = |id: &quaero_core::JobId, status: JobStatus| {
            let mut job = jobs.must_get(id).unwrap();
            job.status = status;
            job.finished_at = None;
            store
                .set(quaero_storage::keys::job(id), serde_json::to_vec(&job).unwrap())
                .unwrap();
        };
        let mut steps: Vec<quaero_core::Job> = jobs
            .children(&manager_id)
            .unwrap()
            .into_iter()
            .filter(|j| j.kind == quaero_core::JobKind::Step)
            .collect();
        steps.sort_by_key(|j| j.step_index().unwrap_or(usize::MAX));
        rewind(&manager_id, JobStatus::Running);
        rewind(&steps[1].id, JobStatus::Pending);
        // Drop the second step's leaves so it re-plans cleanly
        for leaf in jobs.children(&steps[1].id).unwrap() {
            store.delete(quaero_storage::keys::job(&leaf.id)).unwrap();
            store
                .delete(quaero_storage::keys::job_child(&steps[1].id, &leaf.id))
                .unwrap();
            store
                .delete(quaero_storage::keys::job_under_manager(&manager_id, &leaf.id))
                .unwrap();
        }
        store.flush().unwrap();
    }

    let h = start_in(dir, EngineConfig::default()).await;
    // Recovery notices the stalled manager and re-runs the pending step
    h.wait_for_status(&manager_id, JobStatus::Completed).await;
    let steps = h.steps(&manager_id);
    assert_eq!(steps[1].status, JobStatus::Completed);

    h.shutdown().await;
}
