//! Per-turn wait-signal watcher. One task per turn: it observes the
//! store's wait flag (broadcast for same-process writers, a 2-second
//! poll for the `adaf` CLI processes agents run) and incoming interrupt
//! payloads, and cancels the turn-scoped context on either. At most one
//! wait observation is latched per turn.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use adaf_store::Store;

/// Polling fallback period for out-of-process writers.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
pub(crate) struct WatcherOutcome {
    /// The one-slot latch: true when this turn observed the wait signal.
    pub wait_triggered: bool,
    /// Interrupt payloads observed during the turn, in arrival order.
    pub interrupts: Vec<String>,
}

/// Start the watcher for one turn. The interrupt receiver (if any) is
/// borrowed for the duration of the turn and handed back on join.
pub(crate) fn spawn_watcher(
    store: Arc<Store>,
    turn_id: i64,
    turn_token: CancellationToken,
    mut interrupt_rx: Option<mpsc::Receiver<String>>,
) -> JoinHandle<(Option<mpsc::Receiver<String>>, WatcherOutcome)> {
    tokio::spawn(async move {
        let mut outcome = WatcherOutcome::default();
        let mut wait_chan = store.wait_signal_chan(turn_id);
        let mut interrupts_open = interrupt_rx.is_some();

        // The flag may already be set when the turn starts.
        if let Err(e) = store.refresh() {
            tracing::warn!(error = %e, "store refresh failed in watcher");
        }
        if store.is_waiting(turn_id) {
            outcome.wait_triggered = true;
            turn_token.cancel();
        }

        let mut tick = tokio::time::interval(POLL_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await; // first tick fires immediately; consumed above

        while !turn_token.is_cancelled() {
            tokio::select! {
                _ = turn_token.cancelled() => break,

                recv = wait_chan.recv() => {
                    match recv {
                        Ok(()) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            if !outcome.wait_triggered {
                                outcome.wait_triggered = true;
                                tracing::debug!(turn_id, "wait signal observed mid-turn");
                                turn_token.cancel();
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            // Rely on the polling tick from here on.
                            wait_chan = store.wait_signal_chan(turn_id);
                        }
                    }
                }

                msg = recv_or_pending(&mut interrupt_rx), if interrupts_open => {
                    match msg {
                        Some(payload) => {
                            tracing::debug!(turn_id, "interrupt received, cancelling turn");
                            outcome.interrupts.push(payload);
                            turn_token.cancel();
                        }
                        None => interrupts_open = false,
                    }
                }

                _ = tick.tick() => {
                    if let Err(e) = store.refresh() {
                        tracing::warn!(error = %e, "store refresh failed in watcher");
                        continue;
                    }
                    if store.is_waiting(turn_id) && !outcome.wait_triggered {
                        outcome.wait_triggered = true;
                        tracing::debug!(turn_id, "wait flag observed via poll");
                        turn_token.cancel();
                    }
                    match store.take_interrupts_for_turn(turn_id) {
                        Ok(payloads) if !payloads.is_empty() => {
                            outcome.interrupts.extend(payloads);
                            turn_token.cancel();
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "draining turn interrupts failed"),
                    }
                }
            }
        }

        // Catch payloads that raced the cancellation.
        if let Some(rx) = interrupt_rx.as_mut() {
            while let Ok(payload) = rx.try_recv() {
                outcome.interrupts.push(payload);
            }
        }
        if let Ok(payloads) = store.take_interrupts_for_turn(turn_id) {
            outcome.interrupts.extend(payloads);
        }

        (interrupt_rx, outcome)
    })
}

async fn recv_or_pending(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
