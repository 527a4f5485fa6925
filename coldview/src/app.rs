//! App state and main loop: receive transport events, update histories and
//! alarms, and redraw the console view.

use std::collections::BTreeSet;
use std::io;
use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::alarms::{select_alarms, AlarmFilter, AlarmView};
use crate::history::HistoryBook;
use crate::transport::{ConnectionState, Transport, TransportConfig, TransportEvent};
use crate::types::{EntityId, Inbound, Snapshot, SnapshotError, StatusEvent, StructError};
use crate::view;
use crate::writer::{WriteBatch, WriteCoordinator, WriterConfig};

/// Samples kept per sparkline.
pub const HISTORY_LEN: usize = 500;
pub const DEFAULT_METRICS: [&str; 4] = ["temperature", "humidity", "CO2", "C2H4"];
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    Status,
    Snapshot,
    Ignored,
}

pub struct Dashboard {
    // Latest connection status for the banner
    status: Option<StatusEvent>,
    last_snapshot: Option<Snapshot>,
    histories: HistoryBook,
    alarms: Vec<AlarmView>,
    filter: AlarmFilter,
    metrics: Vec<String>,
    snapshots_seen: u64,
}

impl Dashboard {
    pub fn new(filter: AlarmFilter) -> Self {
        Self {
            status: None,
            last_snapshot: None,
            histories: HistoryBook::new(HISTORY_LEN),
            alarms: Vec::new(),
            filter,
            metrics: DEFAULT_METRICS.iter().map(|m| m.to_string()).collect(),
            snapshots_seen: 0,
        }
    }

    pub fn with_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_history_len(mut self, len: usize) -> Self {
        self.histories = HistoryBook::new(len);
        self
    }

    pub fn apply(&mut self, event: &TransportEvent) -> Result<Update, SnapshotError> {
        match event {
            TransportEvent::Status(s) => {
                self.status = Some(s.clone());
                Ok(Update::Status)
            }
            TransportEvent::Binary(_) => Ok(Update::Ignored),
            TransportEvent::Text(text) => match Inbound::parse(text)? {
                Inbound::Status(s) => {
                    self.status = Some(s);
                    Ok(Update::Status)
                }
                Inbound::Pong => Ok(Update::Ignored),
                Inbound::Snapshot(snapshot) => self.apply_snapshot(*snapshot),
            },
        }
    }

    /// Validates first; a rejected snapshot leaves the previous state intact.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> Result<Update, SnapshotError> {
        snapshot.validate()?;
        let alarms = select_alarms(&snapshot, &self.filter)?;

        let ids: BTreeSet<EntityId> = snapshot.structs.iter().map(|s| s.cold_room).collect();
        self.histories.retain_entities(&ids);
        let samples = self.histories.record(&snapshot, &self.metrics);
        debug!(rooms = ids.len(), samples, alarms = alarms.len(), "snapshot applied");

        self.alarms = alarms;
        self.last_snapshot = Some(snapshot);
        self.snapshots_seen += 1;
        Ok(Update::Snapshot)
    }

    pub fn status(&self) -> Option<&StatusEvent> {
        self.status.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.status.as_ref().is_some_and(StatusEvent::is_connected)
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn histories(&self) -> &HistoryBook {
        &self.histories
    }

    pub fn alarms(&self) -> &[AlarmView] {
        &self.alarms
    }

    pub fn struct_errors(&self) -> Vec<StructError> {
        self.last_snapshot
            .as_ref()
            .map(Snapshot::errors)
            .unwrap_or_default()
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn filter(&self) -> &AlarmFilter {
        &self.filter
    }

    pub fn snapshots_seen(&self) -> u64 {
        self.snapshots_seen
    }
}

/// Resolved runtime settings (profile + command line).
#[derive(Debug, Clone)]
pub struct Settings {
    pub url: String,
    pub write_url: Option<String>,
    pub csrf_token: Option<String>,
    pub reconnect_delay: Duration,
    pub filter: AlarmFilter,
}

/// Follows the feed until Ctrl-C.
pub async fn run(settings: &Settings) -> anyhow::Result<()> {
    let transport = Transport::new(TransportConfig {
        url: settings.url.clone(),
        reconnect_delay: settings.reconnect_delay,
        max_attempts: None,
    });
    let (_sub, mut events) = transport.subscribe_channel();
    transport
        .connect()
        .with_context(|| format!("connecting to {}", settings.url))?;
    info!(url = %settings.url, "following feed");

    let mut dashboard = Dashboard::new(settings.filter.clone());
    let mut keepalive = interval(PING_INTERVAL);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stdout = io::stdout();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = keepalive.tick() => {
                if transport.state() == ConnectionState::Connected {
                    if let Err(e) = transport.send_text("ping") {
                        debug!(error = %e, "keepalive skipped");
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match dashboard.apply(&event) {
                    Ok(Update::Ignored) => {}
                    Ok(_) => view::render(&mut stdout, &dashboard)?,
                    // abort this render pass, keep the last good state
                    Err(e) => warn!(error = %e, "dropping malformed snapshot"),
                }
            }
        }
    }

    transport.dispose();
    Ok(())
}

/// Sends one edit through the write coordinator.
pub async fn write_once(
    settings: &Settings,
    entity: EntityId,
    edit: &Value,
) -> anyhow::Result<WriteBatch> {
    let endpoint = settings
        .write_url
        .clone()
        .context("no write url configured (use --write-url or a profile)")?;
    let coordinator = WriteCoordinator::new(WriterConfig {
        csrf_token: settings.csrf_token.clone(),
        ..WriterConfig::new(endpoint)
    })?;
    let batch = coordinator.write(entity, edit).await?;
    Ok(batch)
}
