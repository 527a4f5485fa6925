//! Plain-text view: status banner, one row per room with sparklines, and the
//! selected alarms. Writes to any `io::Write` so it can be tested.

use std::io::{self, Write};

use crate::app::Dashboard;
use crate::history::CircularBuffer;
use crate::types::EntityStruct;

const SPARK_POINTS: usize = 24;
const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

pub fn render<W: Write>(out: &mut W, d: &Dashboard) -> io::Result<()> {
    writeln!(out, "{}", header(d))?;

    // Notifications first, like the banner above the synoptic
    for e in d.struct_errors() {
        writeln!(out, "  ! room {}: {}", e.cold_room, e.error)?;
    }

    if let Some(snapshot) = d.snapshot() {
        let mut title = format!("  {:<6}", "room");
        for m in d.metrics() {
            title.push_str(&format!(" {:>10}", truncate(m, 10)));
        }
        if let Some(first) = d.metrics().first() {
            title.push_str(&format!("  {first} trend"));
        }
        writeln!(out, "{title}")?;

        for s in &snapshot.structs {
            writeln!(out, "{}", room_row(d, s))?;
        }
    }

    for a in d.alarms() {
        let room = a
            .entity
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into());
        let state = if a.active { "ACTIVE" } else { "ended" };
        writeln!(
            out,
            "  [{state}] room {room}: {} ({}) since {}",
            a.desc,
            a.record.name,
            a.record.ts.format("%Y-%m-%d %H:%M:%S")
        )?;
    }
    out.flush()
}

fn header(d: &Dashboard) -> String {
    let status = match d.status() {
        Some(s) => format!("[{}] {}", s.value, s.desc),
        None => "[connecting]".into(),
    };
    let rooms = d.snapshot().map(|s| s.structs.len()).unwrap_or(0);
    format!(
        "coldview | {status} | snapshot #{} | rooms: {rooms} | alarms: {}",
        d.snapshots_seen(),
        d.alarms().len()
    )
}

fn room_row(d: &Dashboard, s: &EntityStruct) -> String {
    let mut row = format!("  {:<6}", s.cold_room);
    for m in d.metrics() {
        let cell = match s.get(m) {
            Some(serde_json::Value::Number(n)) => n
                .as_f64()
                .map(|v| format!("{v:.1}"))
                .unwrap_or_else(|| n.to_string()),
            Some(serde_json::Value::Bool(b)) => (if *b { "on" } else { "off" }).to_string(),
            Some(serde_json::Value::Null) | None => "--".to_string(),
            Some(other) => truncate(&other.to_string(), 10),
        };
        row.push_str(&format!(" {cell:>10}"));
    }
    if let Some(hist) = d
        .metrics()
        .first()
        .and_then(|m| d.histories().get(s.cold_room, m))
    {
        row.push_str("  ");
        row.push_str(&sparkline(hist, SPARK_POINTS));
    }
    row
}

/// Last `max_points` samples as block characters scaled to their own range.
pub fn sparkline(hist: &CircularBuffer<f64>, max_points: usize) -> String {
    let start = hist.capacity().saturating_sub(max_points);
    let data: Vec<f64> = hist.iter().skip(start).copied().collect();
    let (lo, hi) = data.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(*v), hi.max(*v))
    });
    let span = hi - lo;
    data.iter()
        .map(|v| {
            if !span.is_finite() || span <= f64::EPSILON {
                return BARS[0];
            }
            let idx = (((v - lo) / span) * (BARS.len() - 1) as f64).round() as usize;
            BARS[idx.min(BARS.len() - 1)]
        })
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{keep}…")
}
