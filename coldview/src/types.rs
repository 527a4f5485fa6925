//! Types that mirror the feed's JSON schema.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Cold room primary key as sent by the server.
pub type EntityId = i64;

/// Identity of an alarm: (alarm kind id, cold room).
pub type AlarmKey = (i64, Option<EntityId>);

/// Property names every struct carries that are not described in `fields`.
pub const RESERVED_KEYS: [&str; 2] = ["cold_room", "error"];

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("'fields' not found in snapshot")]
    MissingFields,
    #[error("'alarms' not found in snapshot")]
    MissingAlarms,
    #[error("property '{property}' of cold room {entity} not found in fields")]
    UnknownProperty { entity: EntityId, property: String },
    #[error("alarm '{0}' not found in fields")]
    UnknownAlarm(String),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub desc: String,
}

/// Current values of one cold room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStruct {
    pub cold_room: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

impl EntityStruct {
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.values.get(property)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmMeta {
    pub alarm: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cold_room: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRecord {
    /// Field name of the alarm kind; described in `fields`.
    pub name: String,
    pub meta: AlarmMeta,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_ack: Option<DateTime<Utc>>,
}

impl AlarmRecord {
    // No end timestamp means the condition is still present
    pub fn is_active(&self) -> bool {
        self.ts_end.is_none()
    }

    pub fn key(&self) -> AlarmKey {
        (self.meta.alarm, self.meta.cold_room)
    }
}

/// Error string reported for a cold room, shown as a notification banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructError {
    pub cold_room: EntityId,
    pub error: String,
}

/// One full state push from the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, FieldMeta>>,
    #[serde(default)]
    pub structs: Vec<EntityStruct>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarms: Option<Vec<AlarmRecord>>,
    // Operator prompts; passed through untouched
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Value>,
}

impl Snapshot {
    pub fn fields(&self) -> Result<&BTreeMap<String, FieldMeta>, SnapshotError> {
        self.fields.as_ref().ok_or(SnapshotError::MissingFields)
    }

    pub fn alarms(&self) -> Result<&[AlarmRecord], SnapshotError> {
        self.alarms.as_deref().ok_or(SnapshotError::MissingAlarms)
    }

    /// Checks that every struct property is described in `fields`.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let fields = self.fields()?;
        for s in &self.structs {
            if let Some(property) = s
                .values
                .keys()
                .find(|k| !RESERVED_KEYS.contains(&k.as_str()) && !fields.contains_key(*k))
            {
                return Err(SnapshotError::UnknownProperty {
                    entity: s.cold_room,
                    property: property.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityStruct> {
        self.structs.iter().find(|s| s.cold_room == id)
    }

    pub fn errors(&self) -> Vec<StructError> {
        self.structs
            .iter()
            .filter_map(|s| {
                s.error.as_ref().map(|e| StructError {
                    cold_room: s.cold_room,
                    error: e.clone(),
                })
            })
            .collect()
    }

    /// Sorted, de-duplicated set of every tag used by `fields`.
    pub fn tag_set(&self) -> Vec<String> {
        let tags: BTreeSet<&str> = self
            .fields
            .iter()
            .flat_map(|f| f.values())
            .flat_map(|m| m.tags.iter().map(String::as_str))
            .collect();
        tags.into_iter().map(str::to_owned).collect()
    }

    pub fn fields_tagged<'a>(&'a self, tag: &str) -> BTreeMap<&'a str, &'a FieldMeta> {
        self.fields
            .iter()
            .flat_map(|f| f.iter())
            .filter(|(_, m)| m.tags.iter().any(|t| t == tag))
            .map(|(name, m)| (name.as_str(), m))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Connected,
    Closed,
    Error,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusKind::Connected => "connected",
            StatusKind::Closed => "closed",
            StatusKind::Error => "error",
        };
        f.write_str(s)
    }
}

/// Connection status as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub value: StatusKind,
    pub desc: String,
}

impl StatusEvent {
    pub fn connected() -> Self {
        Self {
            value: StatusKind::Connected,
            desc: "websocket connected".into(),
        }
    }

    pub fn closed(desc: impl Into<String>) -> Self {
        Self {
            value: StatusKind::Closed,
            desc: desc.into(),
        }
    }

    pub fn error(desc: impl Into<String>) -> Self {
        Self {
            value: StatusKind::Error,
            desc: desc.into(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.value == StatusKind::Connected
    }

    /// `{"type": "status", "value": ..., "desc": ...}`
    pub fn to_envelope(&self) -> Value {
        json!({ "type": "status", "value": self.value, "desc": self.desc })
    }
}

/// A classified inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Status(StatusEvent),
    Snapshot(Box<Snapshot>),
    Pong,
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, SnapshotError> {
        if matches!(text.trim(), "pong" | "pong!") {
            return Ok(Inbound::Pong);
        }
        let value: Value = serde_json::from_str(text)?;
        if value.get("type").and_then(Value::as_str) == Some("status") {
            return Ok(Inbound::Status(serde_json::from_value(value)?));
        }
        Ok(Inbound::Snapshot(Box::new(serde_json::from_value(value)?)))
    }
}

/// Body of a single property write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRequest {
    pub cold_room: EntityId,
    pub property: String,
    pub value: Value,
}

/// What the server reports as persisted for one write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteConfirmation {
    pub cold_room: EntityId,
    pub property: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl WriteConfirmation {
    // The server may coerce or refuse the value; callers compare
    pub fn matches(&self, req: &EditRequest) -> bool {
        self.cold_room == req.cold_room && self.property == req.property && self.value == req.value
    }
}

impl fmt::Display for WriteConfirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cold_room[pk={}].{}={}",
            self.cold_room, self.property, self.value
        )
    }
}

/// `{"data": {...}}` wrapper returned by the write endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    pub data: WriteConfirmation,
}
