// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-step single-leaf success: the canonical happy path.

use crate::specs::prelude::*;
use quaero_core::{Event, JobKind, JobStatus};

#[tokio::test]
async fn single_leaf_document_pipeline_completes() {
    let mut h = start().await;
    let def = definition(
        "def-single",
        vec![work_step("produce", vec![json!({"action": "doc", "doc_id": "doc-1"})])],
    );

    let manager_id = h.engine.execute_definition(&def).await.unwrap();
    h.wait_for_status(&manager_id, JobStatus::Completed).await;

    // Final tree: everything completed
    let steps = h.steps(&manager_id);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, JobStatus::Completed);
    let leaves = h.leaves(&steps[0].id);
    assert_eq!(leaves.len(), 1);
    assert_eq!(leaves[0].status, JobStatus::Completed);

    // Unique document counted on every level
    let ok = wait_until(5_000, || {
        h.engine.jobs().must_get(&manager_id).unwrap().document_count == 1
    })
    .await;
    assert!(ok, "manager document_count never reached 1");
    assert_eq!(h.engine.jobs().must_get(&steps[0].id).unwrap().document_count, 1);
    assert_eq!(h.engine.jobs().must_get(&leaves[0].id).unwrap().document_count, 1);

    // Leaf logs are a contiguous sequence starting at 1
    let meta = h.engine.jobs().logs_meta(&leaves[0].id).unwrap();
    assert!(meta.total_count >= 1);
    let entries = h.engine.queries().logs(&leaves[0].id, 1, 100, None).unwrap();
    let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=meta.total_count).collect::<Vec<u64>>());

    // Event stream: every expected kind showed up, causally ordered
    let events = h.drain_events().await;
    let position = |pred: &dyn Fn(&Event) -> bool| events.iter().position(|e| pred(e));

    let leaf_id = leaves[0].id;
    let step_id = steps[0].id;
    let leaf_done = position(&|e| {
        matches!(e, Event::JobStatusChange { job_id, new_status: JobStatus::Completed, .. } if *job_id == leaf_id)
    })
    .expect("no leaf completion event");
    let step_done = position(&|e| {
        matches!(e, Event::JobStatusChange { job_id, new_status: JobStatus::Completed, .. } if *job_id == step_id)
    })
    .expect("no step completion event");
    let manager_done = position(&|e| {
        matches!(e, Event::JobStatusChange { job_id, new_status: JobStatus::Completed, .. } if *job_id == manager_id)
    })
    .expect("no manager completion event");
    assert!(leaf_done < step_done, "leaf must complete before its step");
    assert!(step_done < manager_done, "step must complete before its manager");

    let saved = position(&|e| matches!(e, Event::DocumentSaved { is_new: true, .. }))
        .expect("no document:saved event");
    assert!(saved < leaf_done, "document saved before the leaf completed");

    assert!(events.iter().any(|e| matches!(e,
        Event::JobStatusChange { job_id, kind: JobKind::Manager, old_status: JobStatus::Pending, new_status: JobStatus::Running, .. } if *job_id == manager_id)));
    assert!(events.iter().any(|e| matches!(e, Event::StepProgress { .. })));
    assert!(events.iter().any(|e| matches!(e, Event::ManagerProgress { .. })));

    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn query_api_reflects_the_finished_tree() {
    let h = start().await;
    let def = definition(
        "def-query",
        vec![work_step("produce", vec![json!({"action": "ok"}), json!({"action": "ok"})])],
    );

    let manager_id = h.engine.execute_definition(&def).await.unwrap();
    h.wait_for_status(&manager_id, JobStatus::Completed).await;

    let tree = h.engine.queries().manager_tree(&manager_id).unwrap();
    assert_eq!(tree.manager.status, JobStatus::Completed);
    assert_eq!(tree.steps.len(), 1);
    assert_eq!(tree.steps[0].counts.completed, 2);
    assert_eq!(tree.steps[0].total_leaves, 2);

    let page = h
        .engine
        .queries()
        .list_leaves_by_step(&tree.steps[0].job.id, Default::default())
        .unwrap();
    assert_eq!(page.total, 2);

    let managers = h
        .engine
        .queries()
        .list_managers(&Default::default(), Default::default())
        .unwrap();
    assert_eq!(managers.total, 1);
    assert_eq!(managers.items[0].id, manager_id);

    h.engine.shutdown().await.unwrap();
}
