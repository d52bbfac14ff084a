// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mid-flight cancellation: the manager, its steps, queued leaves, and
//! the leaf currently executing all come to rest as `cancelled`.

use crate::specs::prelude::*;
use quaero_core::{Event, JobStatus};

#[tokio::test]
async fn cancel_manager_stops_everything_without_effects() {
    let mut h = start().await;
    let def = definition(
        "def-cancel",
        vec![work_step(
            "long-haul",
            vec![
                json!({"action": "sleep", "sleep_ms": 60_000}),
                json!({"action": "sleep", "sleep_ms": 60_000}),
                json!({"action": "sleep", "sleep_ms": 60_000}),
                json!({"action": "sleep", "sleep_ms": 60_000}),
                json!({"action": "sleep", "sleep_ms": 60_000}),
            ],
        )],
    );
    let manager_id = h.engine.execute_definition(&def).await.unwrap();

    // Wait for the single dispatcher to pick up the first leaf
    let steps = h.steps(&manager_id);
    let ok = wait_until(5_000, || {
        h.leaves(&steps[0].id)
            .iter()
            .any(|leaf| leaf.status == JobStatus::Running)
    })
    .await;
    assert!(ok, "no leaf ever started");

    h.engine.cancel_manager(&manager_id).await.unwrap();

    h.wait_for_status(&manager_id, JobStatus::Cancelled).await;
    let ok = wait_until(5_000, || {
        h.engine
            .jobs()
            .jobs_under_manager(&manager_id)
            .unwrap()
            .iter()
            .all(|job| job.status == JobStatus::Cancelled)
    })
    .await;
    assert!(ok, "descendants never settled as cancelled");

    // Pending messages were dropped; nothing waits for delivery
    assert!(wait_until(5_000, || h.engine.queue().is_empty()).await);

    // No effects escaped: no documents, counters untouched
    let events = h.drain_events().await;
    assert!(
        !events.iter().any(|e| matches!(e, Event::DocumentSaved { .. })),
        "cancelled leaves must not emit documents"
    );
    assert_eq!(h.engine.jobs().must_get(&manager_id).unwrap().document_count, 0);

    // Cancellation is not an error
    assert!(h.engine.jobs().must_get(&manager_id).unwrap().error.is_none());

    h.shutdown().await;
}

#[tokio::test]
async fn cancelled_manager_never_advances_to_later_steps() {
    let h = start().await;
    let def = definition(
        "def-cancel-two",
        vec![
            work_step("first", vec![json!({"action": "sleep", "sleep_ms": 60_000})]),
            work_step("second", vec![json!({"action": "ok"})]),
        ],
    );
    let manager_id = h.engine.execute_definition(&def).await.unwrap();

    let steps = h.steps(&manager_id);
    let ok = wait_until(5_000, || {
        h.leaves(&steps[0].id)
            .iter()
            .any(|leaf| leaf.status == JobStatus::Running)
    })
    .await;
    assert!(ok);

    h.engine.cancel_manager(&manager_id).await.unwrap();
    h.wait_for_status(&manager_id, JobStatus::Cancelled).await;

    // The second step was never activated, let alone planned
    let steps = h.steps(&manager_id);
    assert_eq!(steps[1].status, JobStatus::Cancelled);
    assert!(h.leaves(&steps[1].id).is_empty());

    h.shutdown().await;
}
