//! Live cold-room telemetry: a reconnecting WebSocket feed, bounded
//! per-metric histories, alarm selection and property writes.

pub mod alarms;
pub mod app;
pub mod codec;
pub mod history;
pub mod profiles;
pub mod transport;
pub mod types;
pub mod view;
pub mod writer;
