//! Out-of-band signals: the wait flag (per turn), stop and wind-down
//! flags (per loop run), and the in-process spawn-event broadcast.
//!
//! Flags persist as marker files under `<store>/signals/` so the
//! short-lived `adaf` CLI processes agents invoke can raise them; the
//! broadcast channels only wake same-process subscribers, which is why
//! every watcher also polls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use adaf_domain::Result;

use crate::records::SpawnStatus;

/// Emitted whenever a spawn's status changes.
#[derive(Debug, Clone)]
pub struct SpawnEvent {
    pub spawn_id: i64,
    pub parent_turn_id: i64,
    pub status: SpawnStatus,
}

const CHANNEL_CAPACITY: usize = 64;

pub(crate) struct Signals {
    dir: PathBuf,
    wait_chans: Mutex<HashMap<i64, broadcast::Sender<()>>>,
    stop_chans: Mutex<HashMap<i64, broadcast::Sender<()>>>,
    spawn_events: broadcast::Sender<SpawnEvent>,
}

impl Signals {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            wait_chans: Mutex::new(HashMap::new()),
            stop_chans: Mutex::new(HashMap::new()),
            spawn_events: broadcast::channel(CHANNEL_CAPACITY).0,
        })
    }

    fn marker(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn set(&self, name: &str) -> Result<()> {
        std::fs::write(self.marker(name), b"1")?;
        Ok(())
    }

    fn is_set(&self, name: &str) -> bool {
        self.marker(name).exists()
    }

    fn clear(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.marker(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ── Wait flag (per turn) ───────────────────────────────────────

    pub fn signal_wait(&self, turn_id: i64) -> Result<()> {
        self.set(&format!("wait-{turn_id}"))?;
        if let Some(tx) = self.wait_chans.lock().get(&turn_id) {
            let _ = tx.send(());
        }
        Ok(())
    }

    pub fn is_waiting(&self, turn_id: i64) -> bool {
        self.is_set(&format!("wait-{turn_id}"))
    }

    pub fn clear_wait(&self, turn_id: i64) -> Result<()> {
        self.clear(&format!("wait-{turn_id}"))
    }

    /// Subscribe to same-process wait signals for a turn. Cross-process
    /// writers are only visible through [`Signals::is_waiting`] polling.
    pub fn wait_chan(&self, turn_id: i64) -> broadcast::Receiver<()> {
        self.wait_chans
            .lock()
            .entry(turn_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop the wait channel once the turn is done.
    pub fn cleanup_wait_chan(&self, turn_id: i64) {
        self.wait_chans.lock().remove(&turn_id);
    }

    // ── Stop / wind-down (per loop run) ────────────────────────────

    pub fn signal_loop_stop(&self, run_id: i64) -> Result<()> {
        self.set(&format!("stop-{run_id}"))?;
        if let Some(tx) = self.stop_chans.lock().get(&run_id) {
            let _ = tx.send(());
        }
        Ok(())
    }

    pub fn is_loop_stopped(&self, run_id: i64) -> bool {
        self.is_set(&format!("stop-{run_id}"))
    }

    pub fn loop_stop_chan(&self, run_id: i64) -> broadcast::Receiver<()> {
        self.stop_chans
            .lock()
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn cleanup_stop_chan(&self, run_id: i64) {
        self.stop_chans.lock().remove(&run_id);
    }

    pub fn signal_wind_down(&self, run_id: i64) -> Result<()> {
        self.set(&format!("wind_down-{run_id}"))
    }

    pub fn is_wind_down(&self, run_id: i64) -> bool {
        self.is_set(&format!("wind_down-{run_id}"))
    }

    // ── Spawn events ───────────────────────────────────────────────

    pub fn subscribe_spawn_events(&self) -> broadcast::Receiver<SpawnEvent> {
        self.spawn_events.subscribe()
    }

    pub fn emit_spawn_event(&self, event: SpawnEvent) {
        let _ = self.spawn_events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> (tempfile::TempDir, Signals) {
        let dir = tempfile::tempdir().unwrap();
        let sig = Signals::new(&dir.path().join("signals")).unwrap();
        (dir, sig)
    }

    #[test]
    fn wait_flag_set_once_and_clear() {
        let (_dir, sig) = signals();
        assert!(!sig.is_waiting(7));
        sig.signal_wait(7).unwrap();
        sig.signal_wait(7).unwrap(); // idempotent
        assert!(sig.is_waiting(7));
        assert!(!sig.is_waiting(8));
        sig.clear_wait(7).unwrap();
        assert!(!sig.is_waiting(7));
        // Clearing an absent flag is fine.
        sig.clear_wait(7).unwrap();
    }

    #[test]
    fn wait_flag_visible_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals");
        let a = Signals::new(&path).unwrap();
        let b = Signals::new(&path).unwrap();

        a.signal_wait(3).unwrap();
        assert!(b.is_waiting(3));
    }

    #[tokio::test]
    async fn wait_chan_wakes_subscriber() {
        let (_dir, sig) = signals();
        let mut rx = sig.wait_chan(5);
        sig.signal_wait(5).unwrap();
        rx.recv().await.unwrap();
    }

    #[test]
    fn stop_and_wind_down_are_independent() {
        let (_dir, sig) = signals();
        sig.signal_wind_down(1).unwrap();
        assert!(sig.is_wind_down(1));
        assert!(!sig.is_loop_stopped(1));
        sig.signal_loop_stop(1).unwrap();
        assert!(sig.is_loop_stopped(1));
    }

    #[tokio::test]
    async fn spawn_events_broadcast() {
        let (_dir, sig) = signals();
        let mut rx = sig.subscribe_spawn_events();
        sig.emit_spawn_event(SpawnEvent {
            spawn_id: 9,
            parent_turn_id: 2,
            status: SpawnStatus::Completed,
        });
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.spawn_id, 9);
        assert_eq!(ev.status, SpawnStatus::Completed);
    }
}
