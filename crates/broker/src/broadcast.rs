// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fan-out delivery of messages to the current subscriber set.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use courier_core::Message;
use courier_wire::{encode, write_message, Response};

use std::sync::Arc;

/// Write half of a subscriber connection.
///
/// Shared with the connection's request loop so broadcast frames and
/// request responses interleave as whole frames, never interleaved bytes.
pub type FrameWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Handle identifying a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    writer: FrameWriter,
}

/// Maintains the live subscriber set and fans one message out to all of
/// them. A subscriber whose write fails is assumed dead and removed;
/// delivery continues to the rest.
pub struct Broadcaster {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(Vec::new()), next_id: AtomicU64::new(1) }
    }

    /// Register a new delivery target. Never fails.
    pub async fn add_subscriber(&self, writer: FrameWriter) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().await.push(Subscriber { id, writer });
        debug!(subscriber = id.0, "subscriber added");
        id
    }

    /// Drop a subscriber, e.g. when its connection loop ends.
    pub async fn remove_subscriber(&self, id: SubscriberId) {
        self.subscribers.lock().await.retain(|s| s.id != id);
        debug!(subscriber = id.0, "subscriber removed");
    }

    pub async fn has_subscribers(&self) -> bool {
        !self.subscribers.lock().await.is_empty()
    }

    /// Write `message` to every registered subscriber.
    ///
    /// Returns `true` iff at least one subscriber accepted the write.
    /// This is a best-effort transport signal, not a confirmed receipt.
    pub async fn deliver(&self, message: &Message) -> bool {
        let frame = match encode(&Response::Delivery { message: message.clone() }) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "message did not serialize");
                return false;
            }
        };

        let mut subscribers = self.subscribers.lock().await;
        let mut delivered = false;
        let mut dead = Vec::new();
        for subscriber in subscribers.iter() {
            let mut writer = subscriber.writer.lock().await;
            match write_message(&mut *writer, &frame).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    debug!(subscriber = subscriber.id.0, error = %e, "dropping dead subscriber");
                    dead.push(subscriber.id);
                }
            }
        }
        if !dead.is_empty() {
            subscribers.retain(|s| !dead.contains(&s.id));
        }
        delivered
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
