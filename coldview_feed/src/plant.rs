//! Simulated cold rooms. Readings drift deterministically with the tick count,
//! so two runs with the same settings produce the same series.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;

use coldview::types::{
    AlarmMeta, AlarmRecord, EditRequest, EntityId, EntityStruct, FieldMeta, Snapshot,
};

pub const HIGH_TEMPERATURE_ALARM: &str = "highTemperatureAlarm";
pub const HIGH_TEMPERATURE_ALARM_ID: i64 = 1;
/// Degrees above setpoint before the alarm is raised.
pub const ALARM_BAND: f64 = 2.0;
pub const SETPOINT_RANGE: (f64, f64) = (-5.0, 15.0);
const MAX_ALARM_RECORDS: usize = 100;
// warming per tick with the system off
const WARMING: f64 = 0.25;

#[derive(Debug, Error, PartialEq)]
pub enum WriteRejection {
    #[error("cold room {0} not found")]
    UnknownRoom(EntityId),
    #[error("property '{0}' is not writable")]
    NotWritable(String),
    #[error("property '{property}' expects a {expected} value")]
    WrongType {
        property: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: EntityId,
    pub temperature: f64,
    pub humidity: f64,
    pub co2: f64,
    pub c2h4: f64,
    pub setpoint: f64,
    pub system_on: bool,
}

#[derive(Debug)]
pub struct Plant {
    rooms: Vec<Room>,
    alarms: Vec<AlarmRecord>,
    fields: BTreeMap<String, FieldMeta>,
    tick: u64,
}

fn field(tags: &[&str], kind: &str, addr: &str, desc: &str) -> FieldMeta {
    FieldMeta {
        tags: tags.iter().map(|t| t.to_string()).collect(),
        kind: kind.into(),
        addr: addr.into(),
        desc: desc.into(),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl Plant {
    /// Rooms are numbered from 1. The last one starts with its system off,
    /// so it warms up and eventually raises an alarm.
    pub fn new(count: usize) -> Self {
        let last = count as EntityId;
        let rooms = (1..=last)
            .map(|id| Room {
                id,
                temperature: 2.0,
                humidity: 88.0,
                co2: 600.0,
                c2h4: 1.2,
                setpoint: 2.0,
                system_on: id != last,
            })
            .collect();

        let mut fields = BTreeMap::new();
        fields.insert("temperature".into(), field(&["computed", "measurement"], "f32", "IR0", "Temperature"));
        fields.insert("humidity".into(), field(&["measurement"], "f32", "IR1", "Relative humidity"));
        fields.insert("CO2".into(), field(&["measurement"], "f32", "IR2", "CO2"));
        fields.insert("C2H4".into(), field(&["measurement"], "f32", "IR3", "Ethylene"));
        fields.insert("setpointTemperature".into(), field(&["param"], "f32", "HR0", "Temperature setpoint"));
        fields.insert("systemOn".into(), field(&["param", "iodata"], "bool", "HR3.0", "System running"));
        fields.insert(
            HIGH_TEMPERATURE_ALARM.into(),
            field(&["alarm"], "bool", "HR9.1", "High temperature"),
        );

        Self {
            rooms,
            alarms: Vec::new(),
            fields,
            tick: 0,
        }
    }

    pub fn alarms(&self) -> &[AlarmRecord] {
        &self.alarms
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advances every room one tick and raises or ends alarms.
    pub fn step(&mut self, now: DateTime<Utc>) {
        self.tick += 1;
        let t = self.tick as f64;
        for room in &mut self.rooms {
            let phase = t * 0.2 + room.id as f64;
            if room.system_on {
                room.temperature += (room.setpoint - room.temperature) * 0.1;
            } else {
                room.temperature += WARMING;
            }
            room.temperature += 0.05 * phase.sin();
            room.humidity = 88.0 + 4.0 * (phase * 0.5).sin();
            room.co2 = 600.0 + 120.0 * (phase * 0.3).sin();
            room.c2h4 = 1.2 + 0.4 * (phase * 0.7).sin();
        }
        self.update_alarms(now);
    }

    fn update_alarms(&mut self, now: DateTime<Utc>) {
        for room in &self.rooms {
            let high = room.temperature > room.setpoint + ALARM_BAND;
            let active = self.alarms.iter().position(|a| {
                a.is_active() && a.key() == (HIGH_TEMPERATURE_ALARM_ID, Some(room.id))
            });
            match (high, active) {
                (true, None) => {
                    tracing::info!(cold_room = room.id, temperature = room.temperature, "alarm raised");
                    self.alarms.push(AlarmRecord {
                        name: HIGH_TEMPERATURE_ALARM.into(),
                        meta: AlarmMeta {
                            alarm: HIGH_TEMPERATURE_ALARM_ID,
                            cold_room: Some(room.id),
                            extra: Map::new(),
                        },
                        ts: now,
                        ts_end: None,
                        ts_ack: None,
                    });
                }
                (false, Some(i)) => {
                    tracing::info!(cold_room = room.id, "alarm ended");
                    self.alarms[i].ts_end = Some(now);
                }
                _ => {}
            }
        }
        if self.alarms.len() > MAX_ALARM_RECORDS {
            let excess = self.alarms.len() - MAX_ALARM_RECORDS;
            self.alarms.drain(..excess);
        }
    }

    fn alarm_active(&self, room: EntityId) -> bool {
        self.alarms
            .iter()
            .any(|a| a.is_active() && a.meta.cold_room == Some(room))
    }

    pub fn snapshot(&self) -> Snapshot {
        let structs = self
            .rooms
            .iter()
            .map(|r| {
                let mut values = Map::new();
                values.insert("temperature".into(), json!(round2(r.temperature)));
                values.insert("humidity".into(), json!(round2(r.humidity)));
                values.insert("CO2".into(), json!(round2(r.co2)));
                values.insert("C2H4".into(), json!(round2(r.c2h4)));
                values.insert("setpointTemperature".into(), json!(r.setpoint));
                values.insert("systemOn".into(), json!(r.system_on));
                values.insert(HIGH_TEMPERATURE_ALARM.into(), json!(self.alarm_active(r.id)));
                EntityStruct {
                    cold_room: r.id,
                    error: None,
                    values,
                }
            })
            .collect();
        Snapshot {
            fields: Some(self.fields.clone()),
            structs,
            alarms: Some(self.alarms.clone()),
            messages: Vec::new(),
        }
    }

    /// Applies one property write and returns the value actually stored.
    /// Setpoints are clamped to [`SETPOINT_RANGE`].
    pub fn write(&mut self, req: &EditRequest) -> Result<Value, WriteRejection> {
        let room = self
            .rooms
            .iter_mut()
            .find(|r| r.id == req.cold_room)
            .ok_or(WriteRejection::UnknownRoom(req.cold_room))?;
        match req.property.as_str() {
            "setpointTemperature" => {
                let v = req.value.as_f64().ok_or_else(|| WriteRejection::WrongType {
                    property: req.property.clone(),
                    expected: "numeric",
                })?;
                room.setpoint = v.clamp(SETPOINT_RANGE.0, SETPOINT_RANGE.1);
                Ok(json!(room.setpoint))
            }
            "systemOn" => {
                let v = req.value.as_bool().ok_or_else(|| WriteRejection::WrongType {
                    property: req.property.clone(),
                    expected: "boolean",
                })?;
                room.system_on = v;
                Ok(json!(v))
            }
            other => Err(WriteRejection::NotWritable(other.to_string())),
        }
    }

    /// Marks active, unacknowledged alarms as acknowledged. `None` covers
    /// every room. Returns how many records changed.
    pub fn acknowledge(&mut self, room: Option<EntityId>, now: DateTime<Utc>) -> usize {
        let mut n = 0;
        for a in &mut self.alarms {
            if a.is_active() && a.ts_ack.is_none() && room.map_or(true, |id| a.meta.cold_room == Some(id)) {
                a.ts_ack = Some(now);
                n += 1;
            }
        }
        n
    }
}
