//! Shared feed state: the simulated plant and the hot JSON cache.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};

use crate::plant::Plant;

// snapshots buffered per slow client before it starts skipping
const UPDATE_BACKLOG: usize = 16;

#[derive(Clone)]
pub struct AppState {
    pub plant: Arc<Mutex<Plant>>,

    // Last serialized snapshot, sent to every client on connect
    pub last_json: Arc<RwLock<String>>,
    pub updates: broadcast::Sender<String>,

    pub client_count: Arc<AtomicUsize>,
    pub csrf_token: Option<String>,
}

impl AppState {
    pub fn new(plant: Plant, csrf_token: Option<String>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BACKLOG);
        Self {
            plant: Arc::new(Mutex::new(plant)),
            last_json: Arc::new(RwLock::new(String::new())),
            updates,
            client_count: Arc::new(AtomicUsize::new(0)),
            csrf_token,
        }
    }

    /// Serializes the current plant, refreshes the cache and broadcasts it.
    ///
    /// The plant stays locked until the broadcast is sent, so concurrent
    /// publishers reach the cache and the clients in snapshot order.
    pub async fn publish(&self) -> Result<(), serde_json::Error> {
        let plant = self.plant.lock().await;
        let json = serde_json::to_string(&plant.snapshot())?;
        *self.last_json.write().await = json.clone();
        // no receivers just means no clients yet
        let _ = self.updates.send(json);
        drop(plant);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coldview::types::EditRequest;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    fn setpoint(room: i64, value: f64) -> EditRequest {
        EditRequest {
            cold_room: room,
            property: "setpointTemperature".into(),
            value: json!(value),
        }
    }

    #[tokio::test]
    async fn publish_refreshes_cache_and_broadcasts() {
        let state = AppState::new(Plant::new(1), None);
        let mut rx = state.updates.subscribe();
        state.plant.lock().await.write(&setpoint(1, 7.5)).unwrap();
        state.publish().await.unwrap();

        let cached = state.last_json.read().await.clone();
        assert!(cached.contains("\"setpointTemperature\":7.5"), "{cached}");
        assert_eq!(rx.recv().await.unwrap(), cached);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_publishers_leave_latest_snapshot_cached() {
        let state = AppState::new(Plant::new(2), None);
        let mut rx = state.updates.subscribe();
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let state = state.clone();
                tokio::spawn(async move {
                    state
                        .plant
                        .lock()
                        .await
                        .write(&setpoint(1 + i % 2, (i % 10) as f64))
                        .unwrap();
                    state.publish().await.unwrap();
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        let expected = serde_json::to_string(&state.plant.lock().await.snapshot()).unwrap();
        assert_eq!(*state.last_json.read().await, expected);
        // the final broadcast matches the cache too
        let mut last = None;
        loop {
            match rx.try_recv() {
                Ok(json) => last = Some(json),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        assert_eq!(last.as_deref(), Some(expected.as_str()));
    }
}
