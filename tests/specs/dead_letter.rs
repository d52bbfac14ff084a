// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dead-lettering: a message that keeps getting received without an ack
//! (a worker crashing before completion) exhausts its budget, lands in
//! the dead-letter prefix, and fails its job through the normal event
//! flow.

use crate::specs::prelude::*;
use quaero_core::JobStatus;
use std::time::Duration;

#[tokio::test]
async fn five_crashed_deliveries_dead_letter_the_leaf() {
    let h = start().await;
    // Orphan leaves are receivable by hand but invisible to the
    // dispatcher, so this test plays the crashing worker itself
    let def = definition(
        "def-dead",
        vec![typed_step("stuck", ORPHAN, vec![json!({})])],
    );
    let manager_id = h.engine.execute_definition(&def).await.unwrap();

    let steps = h.steps(&manager_id);
    let leaf_id = h.leaves(&steps[0].id)[0].id;
    let types = vec![ORPHAN.to_string()];

    // Five receives, each "crashing" before ack: visibility expires and
    // the message comes back
    for delivery in 1..=5 {
        let msg = h
            .engine
            .queue()
            .try_receive(&types)
            .unwrap()
            .unwrap_or_else(|| panic!("delivery {delivery} not received"));
        assert_eq!(msg.receive_count, delivery);
        h.clock.advance(Duration::from_secs(31));
    }

    // The sixth attempt dead-letters instead of delivering
    assert!(h.engine.queue().try_receive(&types).unwrap().is_none());

    let dead = h.engine.queue().dead_letters().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id, leaf_id);
    assert_eq!(dead[0].receive_count, 5);

    let leaf = h.engine.jobs().must_get(&leaf_id).unwrap();
    assert_eq!(leaf.status, JobStatus::Failed);
    assert_eq!(leaf.error.as_deref(), Some("exceeded max receives"));

    // The failure flowed through the monitor: fail-fast step and manager
    h.wait_for_status(&steps[0].id, JobStatus::Failed).await;
    h.wait_for_status(&manager_id, JobStatus::Failed).await;

    h.shutdown().await;
}
