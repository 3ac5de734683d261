// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Draining refuses new work and the broker knows when it may exit.

use crate::helpers::{start_broker, submit, wait_until, Client};
use courier_core::ProcessStatus;
use courier_wire::{Request, Response};

#[tokio::test]
async fn shutdown_drains_and_refuses_new_jobs() {
    let broker = start_broker().await;
    let mut subscriber = Client::subscribe(&broker).await;
    let mut submitter = Client::connect(&broker).await;

    submitter.request(&submit("last", "sleep 0.3; echo done")).await;

    let response = submitter.request(&Request::Shutdown).await;
    assert_eq!(response, Response::ShuttingDown);

    // draining: no admission, regardless of capacity
    match submitter.request(&submit("late", "echo hi")).await {
        Response::Error { message } => assert!(message.contains("draining")),
        other => panic!("expected Error, got {:?}", other),
    }

    match submitter.request(&Request::Status).await {
        Response::Status { state, .. } => assert_eq!(state, "draining"),
        other => panic!("expected Status, got {:?}", other),
    }

    // not terminable while the admitted job still runs
    assert!(!broker.lifecycle.should_terminate(&broker.runner, &broker.cleaner));

    while subscriber.next_delivery().await.process == ProcessStatus::Running {}
    wait_until(
        || broker.lifecycle.should_terminate(&broker.runner, &broker.cleaner),
        "drain to complete",
    )
    .await;
}

#[tokio::test]
async fn drained_idle_broker_may_exit_immediately() {
    let broker = start_broker().await;
    let mut client = Client::connect(&broker).await;

    assert!(!broker.lifecycle.should_terminate(&broker.runner, &broker.cleaner));
    client.request(&Request::Shutdown).await;
    wait_until(
        || broker.lifecycle.should_terminate(&broker.runner, &broker.cleaner),
        "idle drain",
    )
    .await;
}
