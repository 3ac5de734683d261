// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process broker harness plus a small framed-protocol client.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::{UnixListener, UnixStream};

use courier_broker::{Broadcaster, Cleaner, Lifecycle, ListenCtx, Listener, Runner};
use courier_core::{Message, SystemClock};
use courier_wire::{decode, encode, read_message, write_message, Request, Response};

pub struct TestBroker {
    // Held for the lifetime of the test; the directory disappears with it.
    #[allow(dead_code)]
    tmp: TempDir,
    pub socket: PathBuf,
    pub jobs_dir: PathBuf,
    pub lifecycle: Arc<Lifecycle>,
    pub runner: Arc<Runner>,
    pub cleaner: Arc<Cleaner>,
}

/// Start a full broker (listener, runner, cleaner) on a temp socket,
/// with `/bin/sh -c` as the command path.
pub async fn start_broker() -> TestBroker {
    start_broker_with_ceiling(8).await
}

pub async fn start_broker_with_ceiling(max_in_flight: usize) -> TestBroker {
    let tmp = TempDir::new().expect("tempdir");
    let jobs_dir = tmp.path().join("jobs");
    std::fs::create_dir_all(&jobs_dir).expect("jobs dir");
    let socket = tmp.path().join("courierd.sock");

    let lifecycle = Arc::new(Lifecycle::new());
    let broadcaster = Arc::new(Broadcaster::new());
    let cleaner = Arc::new(Cleaner::new(Arc::clone(&broadcaster), Duration::from_millis(25)));
    let runner = Arc::new(Runner::new(max_in_flight, Arc::clone(&lifecycle)));
    tokio::spawn(Arc::clone(&cleaner).run(Arc::clone(&lifecycle)));

    let unix = UnixListener::bind(&socket).expect("bind socket");
    let ctx = Arc::new(ListenCtx {
        lifecycle: Arc::clone(&lifecycle),
        runner: Arc::clone(&runner),
        cleaner: Arc::clone(&cleaner),
        broadcaster,
        command_path: vec!["/bin/sh".to_string(), "-c".to_string()],
        jobs_dir: jobs_dir.clone(),
        auth_token: None,
        clock: SystemClock,
    });
    tokio::spawn(Listener::new(unix, ctx).run());
    lifecycle.set_running();

    TestBroker { tmp, socket, jobs_dir, lifecycle, runner, cleaner }
}

/// One framed-protocol connection to the broker.
pub struct Client {
    stream: UnixStream,
}

impl Client {
    pub async fn connect(broker: &TestBroker) -> Self {
        let stream = UnixStream::connect(&broker.socket).await.expect("connect");
        Self { stream }
    }

    pub async fn request(&mut self, request: &Request) -> Response {
        self.send(request).await;
        self.read_response().await
    }

    pub async fn send(&mut self, request: &Request) {
        let payload = encode(request).expect("encode");
        write_message(&mut self.stream, &payload).await.expect("write");
    }

    pub async fn read_response(&mut self) -> Response {
        let payload = read_message(&mut self.stream).await.expect("read");
        decode(&payload).expect("decode")
    }

    /// Read frames until the next `Delivery`.
    pub async fn next_delivery(&mut self) -> Message {
        loop {
            if let Response::Delivery { message } = self.read_response().await {
                return message;
            }
        }
    }

    /// Connect and upgrade into a subscriber.
    pub async fn subscribe(broker: &TestBroker) -> Self {
        let mut client = Self::connect(broker).await;
        let response = client.request(&Request::Subscribe).await;
        assert_eq!(response, Response::Subscribed);
        client
    }
}

pub fn submit(job_id: &str, command: &str) -> Request {
    Request::Submit {
        submission: courier_core::Submission::new(job_id, command, "{}"),
    }
}

/// Poll `cond` until it holds or a 10s deadline passes.
pub async fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
