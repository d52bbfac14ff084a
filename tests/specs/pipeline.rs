// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-step pipelines: ordered advancement, document-count semantics,
//! and failure tolerance boundaries.

use crate::specs::prelude::*;
use quaero_core::{ErrorTolerance, JobStatus};

#[tokio::test]
async fn second_step_starts_only_after_first_completes() {
    let h = start().await;
    let def = definition(
        "def-two-step",
        vec![
            work_step(
                "produce",
                vec![
                    json!({"action": "doc", "doc_id": "page-0"}),
                    json!({"action": "doc", "doc_id": "page-1"}),
                    json!({"action": "doc", "doc_id": "page-2"}),
                ],
            ),
            work_step(
                "merge",
                vec![json!({
                    "action": "merge",
                    "update_ids": ["page-0", "page-1", "page-2"],
                    "doc_id": "merged"
                })],
            ),
        ],
    );

    let manager_id = h.engine.execute_definition(&def).await.unwrap();
    h.wait_for_status(&manager_id, JobStatus::Completed).await;

    let steps = h.steps(&manager_id);
    assert_eq!(steps[0].status, JobStatus::Completed);
    assert_eq!(steps[1].status, JobStatus::Completed);

    // The merge leaf could only read documents that exist, so step order
    // held; and every producer leaf finished before the merge leaf began
    let producers = h.leaves(&steps[0].id);
    let merger = &h.leaves(&steps[1].id)[0];
    let merge_started = merger.started_at.unwrap();
    for producer in &producers {
        assert!(
            producer.finished_at.unwrap() <= merge_started,
            "producer finished after merge started"
        );
    }

    // 3 new documents + 1 merged; the 3 updates never counted
    let ok = wait_until(5_000, || {
        h.engine.jobs().must_get(&manager_id).unwrap().document_count == 4
    })
    .await;
    assert_eq!(
        h.engine.jobs().must_get(&manager_id).unwrap().document_count,
        4,
        "updates must not inflate document_count (ok={ok})"
    );

    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn all_leaves_failing_under_fail_fast_fails_manager() {
    let h = start().await;
    let def = definition(
        "def-failfast",
        vec![
            work_step("doomed", vec![json!({"action": "fail"}), json!({"action": "fail"})]),
            work_step("unreached", vec![json!({"action": "ok"})]),
        ],
    );

    let manager_id = h.engine.execute_definition(&def).await.unwrap();
    h.wait_for_status(&manager_id, JobStatus::Failed).await;

    let steps = h.steps(&manager_id);
    assert_eq!(steps[0].status, JobStatus::Failed);
    assert_eq!(steps[1].status, JobStatus::Pending, "failed manager must not advance");

    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn one_failure_within_tolerance_completes_step() {
    let h = start().await;
    let mut step = work_step("mostly-ok", vec![json!({"action": "ok"}), json!({"action": "fail"})]);
    step.tolerance = ErrorTolerance::Tolerate { max_failures: 1 };
    let def = definition("def-tolerate-1", vec![step]);

    let manager_id = h.engine.execute_definition(&def).await.unwrap();
    h.wait_for_status(&manager_id, JobStatus::Completed).await;

    assert_eq!(h.steps(&manager_id)[0].status, JobStatus::Completed);

    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn two_failures_past_tolerance_fail_step_but_not_manager() {
    let h = start().await;
    let mut first = work_step(
        "overrun",
        vec![json!({"action": "fail"}), json!({"action": "fail"}), json!({"action": "ok"})],
    );
    first.tolerance = ErrorTolerance::Tolerate { max_failures: 1 };
    let def = definition("def-tolerate-2", vec![first, work_step("after", vec![json!({"action": "ok"})])]);

    let manager_id = h.engine.execute_definition(&def).await.unwrap();
    h.wait_for_status(&manager_id, JobStatus::Completed).await;

    let steps = h.steps(&manager_id);
    assert_eq!(steps[0].status, JobStatus::Failed);
    // Tolerant steps never fail the manager; it continued and completed
    assert_eq!(steps[1].status, JobStatus::Completed);
    let manager = h.engine.jobs().must_get(&manager_id).unwrap();
    assert_eq!(manager.metadata.get("degraded"), Some(&true.into()));

    h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn empty_step_between_steps_is_skipped_through() {
    let h = start().await;
    let def = definition(
        "def-empty-middle",
        vec![
            work_step("first", vec![json!({"action": "ok"})]),
            work_step("empty", vec![]),
            work_step("last", vec![json!({"action": "ok"})]),
        ],
    );

    let manager_id = h.engine.execute_definition(&def).await.unwrap();
    h.wait_for_status(&manager_id, JobStatus::Completed).await;

    let steps = h.steps(&manager_id);
    assert!(steps.iter().all(|s| s.status == JobStatus::Completed));

    h.engine.shutdown().await.unwrap();
}
