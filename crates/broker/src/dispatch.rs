// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job pump between the runner and the rest of the broker.

use std::sync::Arc;

use tracing::warn;

use crate::broadcast::Broadcaster;
use crate::cleaner::Cleaner;
use crate::ledger::Ledger;
use crate::runner::JobHandle;

/// Consume one job's live outputs until its process finishes.
///
/// Every message is broadcast to current subscribers and appended to the
/// job's ledger, already marked delivered when the broadcast reached at
/// least one subscriber, so reconciliation only retries genuine misses.
/// A failed append is logged and must not abort the running job;
/// the line is still broadcast and the operator sees the error.
///
/// When the stream closes the ledger is closed first, then the job is
/// handed to the cleaner: the ledger file has exactly one writer at any
/// time.
pub async fn dispatch(
    mut handle: JobHandle,
    mut ledger: Ledger,
    broadcaster: Arc<Broadcaster>,
    cleaner: Arc<Cleaner>,
) {
    let job_id = handle.job_id.clone();
    let mut pid_pending = true;
    loop {
        tokio::select! {
            pid = &mut handle.pid, if pid_pending => {
                pid_pending = false;
                if let Ok(pid) = pid {
                    if let Err(e) = ledger.record_pid(pid) {
                        warn!(job_id = %job_id, error = %e, "pid file write failed");
                    }
                }
            }
            next = handle.messages.recv() => match next {
                Some(mut message) => {
                    if broadcaster.deliver(&message).await {
                        message.mark_delivered();
                    }
                    if let Err(e) = ledger.append(&message) {
                        warn!(job_id = %job_id, error = %e, "ledger append failed");
                    }
                }
                None => break,
            }
        }
    }

    // A short-lived job can close the stream before the pid branch ran.
    if pid_pending {
        if let Ok(pid) = handle.pid.try_recv() {
            if let Err(e) = ledger.record_pid(pid) {
                warn!(job_id = %job_id, error = %e, "pid file write failed");
            }
        }
    }

    ledger.close();
    match handle.done.await {
        Ok(job) => cleaner.enqueue(&job),
        // The supervision task always resolves `done`; a drop here means
        // the runtime is being torn down.
        Err(_) => warn!(job_id = %job_id, "job completion signal was dropped"),
    }
}
