// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log pipeline under burst: gap-free sequences from parallel producers
//! and debounced refresh triggers.

use crate::specs::prelude::*;
use quaero_core::{Event, JobStatus};

const PRODUCERS: usize = 10;
const LOGS_PER_PRODUCER: usize = 100;

#[tokio::test]
async fn parallel_burst_yields_contiguous_sequences() {
    let mut h = start().await;
    let def = definition("def-burst", vec![work_step("noisy", vec![json!({"action": "ok"})])]);
    let manager_id = h.engine.execute_definition(&def).await.unwrap();
    h.wait_for_status(&manager_id, JobStatus::Completed).await;

    let steps = h.steps(&manager_id);
    let leaf = h.leaves(&steps[0].id)[0].clone();
    let already_logged = h.engine.jobs().logs_meta(&leaf.id).unwrap().total_count;

    // 10 producers, 100 lines each, all bound to the same job
    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let logger = h.engine.log_sender().logger_for(&leaf, Some(format!("producer-{p}")));
        producers.push(tokio::spawn(async move {
            for n in 0..LOGS_PER_PRODUCER {
                logger.debug(format!("producer {p} line {n}"));
                if n % 25 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    let expected = already_logged + (PRODUCERS * LOGS_PER_PRODUCER) as u64;
    let ok = wait_until(10_000, || {
        h.engine.jobs().logs_meta(&leaf.id).map(|m| m.total_count) == Ok(expected)
    })
    .await;
    assert!(ok, "burst was not fully persisted");

    // Contiguous 1..=n, no duplicates, no gaps
    let entries = h
        .engine
        .queries()
        .logs(&leaf.id, 1, expected as usize + 10, None)
        .unwrap();
    let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=expected).collect::<Vec<u64>>());

    // Debounce bound: at most one trigger per count window plus the
    // time-based flushes (clock is frozen, so effectively count-driven)
    let step_id = steps[0].id;
    let events = h.drain_events().await;
    let triggers = events
        .iter()
        .filter(|e| {
            matches!(e, Event::RefreshLogs { step_ids } if step_ids.contains(&step_id))
        })
        .count();
    let bound = (PRODUCERS * LOGS_PER_PRODUCER) / 10 + 10;
    assert!(
        triggers <= bound,
        "refresh triggers not debounced: {triggers} > {bound}"
    );

    h.shutdown().await;
}

#[tokio::test]
async fn min_level_filter_tails_only_matching_entries() {
    let h = start().await;
    let def = definition("def-levels", vec![work_step("noisy", vec![json!({"action": "ok"})])]);
    let manager_id = h.engine.execute_definition(&def).await.unwrap();
    h.wait_for_status(&manager_id, JobStatus::Completed).await;

    let steps = h.steps(&manager_id);
    let leaf = h.leaves(&steps[0].id)[0].clone();
    let base = h.engine.jobs().logs_meta(&leaf.id).unwrap().total_count;

    let logger = h.engine.log_sender().logger_for(&leaf, None);
    logger.debug("noise");
    logger.error("signal");
    logger.debug("noise");

    let ok = wait_until(5_000, || {
        h.engine.jobs().logs_meta(&leaf.id).map(|m| m.total_count) == Ok(base + 3)
    })
    .await;
    assert!(ok);

    let errors = h
        .engine
        .queries()
        .logs(&leaf.id, base + 1, 100, Some(quaero_core::LogLevel::Error))
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "signal");

    h.shutdown().await;
}
