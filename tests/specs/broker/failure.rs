// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failing and cancelled commands surface as job status, never as
//! broker faults.

use crate::helpers::{start_broker, submit, wait_until, Client};
use courier_core::ProcessStatus;
use courier_wire::{Request, Response};

#[tokio::test]
async fn nonzero_exit_yields_failed_terminal_and_still_reconciles() {
    let broker = start_broker().await;
    let mut subscriber = Client::subscribe(&broker).await;
    let mut submitter = Client::connect(&broker).await;

    let response = submitter.request(&submit("bad", "exit 1")).await;
    assert_eq!(response, Response::Accepted { job_id: "bad".to_string() });

    // metrics first, then the failed terminal message
    let mut terminal = subscriber.next_delivery().await;
    while terminal.process == ProcessStatus::Running {
        terminal = subscriber.next_delivery().await;
    }
    assert_eq!(terminal.process, ProcessStatus::Failed);
    assert!(terminal.text.contains('1'), "terminal text: {}", terminal.text);

    // delivery happened, so the directory is still removed
    let dir = broker.jobs_dir.join("bad");
    wait_until(|| !dir.exists(), "failed job directory removal").await;
}

#[tokio::test]
async fn cancel_kills_a_running_job() {
    let broker = start_broker().await;
    let mut subscriber = Client::subscribe(&broker).await;
    let mut submitter = Client::connect(&broker).await;

    submitter.request(&submit("stuck", "sleep 30")).await;
    wait_until(|| broker.jobs_dir.join("stuck").join("pid").exists(), "pid file").await;

    let response = submitter.request(&Request::Cancel { job_id: "stuck".to_string() }).await;
    assert_eq!(response, Response::Ok);

    let mut terminal = subscriber.next_delivery().await;
    while terminal.process == ProcessStatus::Running {
        terminal = subscriber.next_delivery().await;
    }
    assert_eq!(terminal.process, ProcessStatus::Failed);

    wait_until(|| broker.runner.running_count() == 0, "job to stop").await;
    wait_until(|| !broker.jobs_dir.join("stuck").exists(), "directory removal").await;
}

#[tokio::test]
async fn cancel_of_unknown_job_is_an_error() {
    let broker = start_broker().await;
    let mut client = Client::connect(&broker).await;

    match client.request(&Request::Cancel { job_id: "ghost".to_string() }).await {
        Response::Error { message } => assert!(message.contains("ghost")),
        other => panic!("expected Error, got {:?}", other),
    }
}

#[tokio::test]
async fn capacity_overflow_is_rejected_explicitly() {
    let broker = crate::helpers::start_broker_with_ceiling(1).await;
    let mut subscriber = Client::subscribe(&broker).await;
    let mut submitter = Client::connect(&broker).await;

    let first = submitter.request(&submit("one", "sleep 0.5")).await;
    assert_eq!(first, Response::Accepted { job_id: "one".to_string() });

    match submitter.request(&submit("two", "echo hi")).await {
        Response::Error { message } => assert!(message.contains("limit")),
        other => panic!("expected Error, got {:?}", other),
    }

    // the rejected job left nothing on disk
    assert!(!broker.jobs_dir.join("two").exists());

    while subscriber.next_delivery().await.process == ProcessStatus::Running {}
    wait_until(|| broker.cleaner.pending_count() == 0, "reconciliation").await;
}
