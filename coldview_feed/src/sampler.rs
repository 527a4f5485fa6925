//! Background sampler: advances the simulation and pushes a fresh snapshot
//! to every connected client once per period.

use std::sync::atomic::Ordering;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use crate::state::AppState;

pub fn spawn_sampler(state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick fires immediately; the cache is already warm
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let (tick, alarms) = {
                let mut plant = state.plant.lock().await;
                plant.step(Utc::now());
                (plant.tick(), plant.alarms().len())
            };
            if let Err(e) = state.publish().await {
                warn!(error = %e, "failed to serialize snapshot");
                continue;
            }
            debug!(tick, alarms, clients = state.client_count.load(Ordering::Relaxed), "snapshot published");
        }
    })
}
