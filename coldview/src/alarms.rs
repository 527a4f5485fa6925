//! Alarm selection: filter the snapshot's alarms and keep one per (kind, room).

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::types::{AlarmKey, AlarmRecord, EntityId, Snapshot, SnapshotError};

/// Which record represents a group of alarms sharing a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Acknowledged (ended) alarms sort before active ones, then earliest start.
    AcknowledgedFirst,
    /// Active alarms sort before ended ones, then earliest start.
    #[default]
    ActiveFirst,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmFilter {
    /// Only this cold room. Ids <= 0 mean all rooms.
    pub entity: Option<EntityId>,
    pub active_only: bool,
    pub tie_break: TieBreak,
}

/// Alarm record enriched for display.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmView {
    pub record: AlarmRecord,
    pub desc: String,
    pub entity: Option<EntityId>,
    pub active: bool,
}

/// Returns one alarm per key, in order of each key's first appearance.
///
/// Fails when the snapshot has no `fields` or `alarms`, or when a selected
/// alarm's name is not described in `fields`.
pub fn select_alarms(
    snapshot: &Snapshot,
    filter: &AlarmFilter,
) -> Result<Vec<AlarmView>, SnapshotError> {
    let fields = snapshot.fields()?;
    let alarms = snapshot.alarms()?;
    let entity = filter.entity.filter(|id| *id > 0);

    let mut order: Vec<AlarmKey> = Vec::new();
    let mut groups: HashMap<AlarmKey, Vec<AlarmView>> = HashMap::new();

    for record in alarms {
        if entity.is_some() && record.meta.cold_room != entity {
            continue;
        }
        let active = record.is_active();
        if filter.active_only && !active {
            continue;
        }
        let desc = fields
            .get(&record.name)
            .ok_or_else(|| SnapshotError::UnknownAlarm(record.name.clone()))?
            .desc
            .clone();

        let key = record.key();
        let view = AlarmView {
            record: record.clone(),
            desc,
            entity: record.meta.cold_room,
            active,
        };
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(view);
    }

    Ok(order
        .iter()
        .filter_map(|k| groups.remove(k))
        .filter_map(|group| {
            group
                .into_iter()
                .min_by(|a, b| rank(a, b, filter.tie_break))
        })
        .collect())
}

fn rank(a: &AlarmView, b: &AlarmView, tie_break: TieBreak) -> Ordering {
    let by_state = match tie_break {
        TieBreak::AcknowledgedFirst => a.active.cmp(&b.active),
        TieBreak::ActiveFirst => b.active.cmp(&a.active),
    };
    by_state.then_with(|| a.record.ts.cmp(&b.record.ts))
}
