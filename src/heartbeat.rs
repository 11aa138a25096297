//! Heartbeat engine (C6).
//!
//! Produces periodic ticks on a single-slot channel once given an interval.
//! Liveness (whether a tick arrived before the prior heartbeat was
//! acknowledged) is a C5/C4 concern, not this module's — this engine only
//! ever says "time to beat" (§4.6).

use std::time::Duration;
use tokio::task::JoinHandle;

/// A live heartbeat ticker and the handle to stop it.
pub struct HeartbeatHandle {
    /// Receiver side of the single-slot tick channel; C5 polls this.
    pub ticks: flume::Receiver<()>,
    request_tx: flume::Sender<()>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Stop the ticker. Idempotent: aborting an already-finished task is a
    /// no-op.
    pub fn stop(&self) {
        self.task.abort();
    }

    /// Request an out-of-band tick right away, without waiting for the next
    /// `interval` to elapse. Used when the server sends an op 1 heartbeat
    /// request (§4.5 `send_heartbeat` effect: "request one tick on the
    /// current heartbeat channel"). A no-op if a tick is already pending.
    pub fn request_tick(&self) {
        let _ = self.request_tx.try_send(());
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a heartbeat ticker at `interval`. An immediate tick is requested
/// right away (§4.5 `start_heartbeat` effect: "immediately request one
/// tick"), then one every `interval` thereafter.
pub fn start(interval: Duration) -> HeartbeatHandle {
    let (tx, rx) = flume::bounded(1);
    let request_tx = tx.clone();

    let task = tokio::spawn(async move {
        if tx.send_async(()).await.is_err() {
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        // The immediate tick above already covers the first beat.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            // Single-slot, drop-oldest: if the previous tick hasn't been
            // consumed yet, replace it rather than blocking forever.
            let _ = tx.try_send(());
            if tx.is_disconnected() {
                break;
            }
        }
    });

    HeartbeatHandle { ticks: rx, request_tx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_an_immediate_tick() {
        let handle = start(Duration::from_secs(3600));
        let tick = tokio::time::timeout(Duration::from_millis(500), handle.ticks.recv_async())
            .await
            .expect("immediate tick should arrive promptly");
        assert!(tick.is_ok());
    }

    #[tokio::test]
    async fn stops_producing_ticks_after_stop() {
        let handle = start(Duration::from_millis(20));
        let _ = handle.ticks.recv_async().await;
        handle.stop();
        // Give the aborted task a moment to actually stop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Draining whatever is left in the single slot should not hang.
        let _ = handle.ticks.try_recv();
    }
}
