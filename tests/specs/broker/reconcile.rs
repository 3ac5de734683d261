// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! No line is lost when nobody is listening: ledger entries survive
//! until a subscriber appears, then drain in order.

use crate::helpers::{start_broker, submit, wait_until, Client};
use courier_broker::ledger::read_entries;
use courier_core::{DeliveryStatus, JobPaths, ProcessStatus};
use courier_wire::Response;

#[tokio::test]
async fn output_without_subscribers_waits_in_the_ledger_then_drains() {
    let broker = start_broker().await;
    let mut submitter = Client::connect(&broker).await;

    let response = submitter.request(&submit("abc", "echo hello")).await;
    assert_eq!(response, Response::Accepted { job_id: "abc".to_string() });

    // job finishes with nobody listening
    wait_until(|| broker.cleaner.pending_count() == 1, "job to finish").await;

    let paths = JobPaths::new(&broker.jobs_dir, "abc");
    let entries = read_entries(&paths.ledger).expect("ledger");
    assert_eq!(entries.len(), 3);
    assert!(
        entries.iter().all(|e| e.delivery == DeliveryStatus::NotDelivered),
        "nothing can be delivered without a subscriber"
    );
    // the pid file went away when the job was queued for reconciliation
    assert!(!paths.pid.exists());

    // directory survives as long as entries are undelivered
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert!(paths.dir.is_dir());

    // a subscriber appears; everything drains, in original order
    let mut subscriber = Client::subscribe(&broker).await;
    let first = subscriber.next_delivery().await;
    assert_eq!(first.text, "hello");
    assert_eq!(first.process, ProcessStatus::Running);
    let _metrics = subscriber.next_delivery().await;
    let terminal = subscriber.next_delivery().await;
    assert_eq!(terminal.text, "Cmd done");
    assert_eq!(terminal.process, ProcessStatus::Succeeded);

    wait_until(|| !paths.dir.exists(), "job directory removal").await;
    assert_eq!(broker.cleaner.pending_count(), 0);
}

#[tokio::test]
async fn messages_delivered_live_are_not_redelivered() {
    let broker = start_broker().await;
    let mut subscriber = Client::subscribe(&broker).await;
    let mut submitter = Client::connect(&broker).await;

    submitter.request(&submit("abc", "echo once")).await;

    let mut seen = Vec::new();
    loop {
        let message = subscriber.next_delivery().await;
        let done = message.process != ProcessStatus::Running;
        seen.push(message);
        if done {
            break;
        }
    }
    assert_eq!(seen.len(), 3);

    wait_until(|| broker.cleaner.pending_count() == 0, "reconciliation").await;

    // reconciliation must not have pushed duplicates to the subscriber
    let extra = tokio::time::timeout(
        std::time::Duration::from_millis(200),
        subscriber.next_delivery(),
    )
    .await;
    assert!(extra.is_err(), "unexpected redelivery: {:?}", extra);
}

#[tokio::test]
async fn multiple_finished_jobs_all_reconcile() {
    let broker = start_broker().await;
    let mut submitter = Client::connect(&broker).await;

    for i in 0..3 {
        let id = format!("job-{i}");
        let response = submitter.request(&submit(&id, "echo out")).await;
        assert_eq!(response, Response::Accepted { job_id: id });
    }
    wait_until(|| broker.cleaner.pending_count() == 3, "all jobs to finish").await;

    let _subscriber = Client::subscribe(&broker).await;
    wait_until(|| broker.cleaner.pending_count() == 0, "all jobs to reconcile").await;
    assert!(std::fs::read_dir(&broker.jobs_dir).unwrap().next().is_none());
}
