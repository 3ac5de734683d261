// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end: submit a job with a subscriber connected throughout.

use crate::helpers::{start_broker, submit, wait_until, Client};
use courier_core::{JobMetrics, ProcessStatus};
use courier_wire::{Request, Response};

#[tokio::test]
async fn echo_job_streams_three_messages_and_reconciles_away() {
    let broker = start_broker().await;
    let mut subscriber = Client::subscribe(&broker).await;
    let mut submitter = Client::connect(&broker).await;

    let response = submitter.request(&submit("abc", "echo hello")).await;
    assert_eq!(response, Response::Accepted { job_id: "abc".to_string() });

    // one output line, then metrics, then the terminal line
    let first = subscriber.next_delivery().await;
    assert_eq!(first.text, "hello");
    assert_eq!(first.process, ProcessStatus::Running);

    let second = subscriber.next_delivery().await;
    let metrics: JobMetrics = serde_json::from_str(&second.text).expect("metrics payload");
    assert!(metrics.start_time.is_some());
    assert!(metrics.end_time.is_some());

    let third = subscriber.next_delivery().await;
    assert_eq!(third.text, "Cmd done");
    assert_eq!(third.process, ProcessStatus::Succeeded);

    // fully delivered → the job's directory disappears
    let dir = broker.jobs_dir.join("abc");
    wait_until(|| !dir.exists(), "job directory removal").await;
    wait_until(|| broker.cleaner.pending_count() == 0, "pending count to drain").await;
}

#[tokio::test]
async fn status_reports_counts_and_running_jobs() {
    let broker = start_broker().await;
    let mut subscriber = Client::subscribe(&broker).await;
    let mut submitter = Client::connect(&broker).await;

    let response = submitter.request(&submit("slow", "sleep 0.5; echo bye")).await;
    assert_eq!(response, Response::Accepted { job_id: "slow".to_string() });

    // while running, the job shows up with a PID
    wait_until(|| broker.jobs_dir.join("slow").join("pid").exists(), "pid file").await;
    match submitter.request(&Request::Status).await {
        Response::Status { state, jobs, jobs_running, jobs_total, .. } => {
            assert_eq!(state, "running");
            assert_eq!(jobs_running, 1);
            assert_eq!(jobs_total, 1);
            let entry = jobs.iter().find(|j| j.job_id == "slow").expect("job listed");
            assert!(entry.pid.is_some());
        }
        other => panic!("expected Status, got {:?}", other),
    }

    // drain the stream so the job can finish and reconcile
    while subscriber.next_delivery().await.process == ProcessStatus::Running {}
    wait_until(|| broker.cleaner.pending_count() == 0, "reconciliation").await;
    assert_eq!(broker.runner.running_count(), 0);
}

#[tokio::test]
async fn invalid_submissions_are_refused_without_state() {
    let broker = start_broker().await;
    let mut client = Client::connect(&broker).await;

    let response = client
        .request(&Request::Submit {
            submission: courier_core::Submission::new(" ", "echo hi", "{}"),
        })
        .await;
    match response {
        Response::Error { message } => assert!(message.contains("jobId")),
        other => panic!("expected Error, got {:?}", other),
    }
    assert_eq!(broker.runner.total_count(), 0);
    assert!(std::fs::read_dir(&broker.jobs_dir).unwrap().next().is_none());
}

#[tokio::test]
async fn ping_and_hello_are_answered() {
    let broker = start_broker().await;
    let mut client = Client::connect(&broker).await;

    assert_eq!(client.request(&Request::Ping).await, Response::Pong);
    let hello = Request::Hello { version: "test".to_string(), token: None };
    match client.request(&hello).await {
        Response::Hello { version } => assert!(!version.is_empty()),
        other => panic!("expected Hello, got {:?}", other),
    }
}
