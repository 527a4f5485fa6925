//! Small utilities to manage bounded history buffers for charts.

use std::collections::{BTreeMap, BTreeSet};
use std::iter::Chain;
use std::slice;

use serde_json::Value;

use crate::types::{EntityId, Snapshot};

pub type Iter<'a, T> = Chain<slice::Iter<'a, T>, slice::Iter<'a, T>>;

/// Fixed-size ring of the most recent samples.
///
/// Every slot starts out holding the fill value, so the buffer always yields
/// exactly `capacity` items; an unsampled slot looks like a real sample.
#[derive(Debug, Clone, PartialEq)]
pub struct CircularBuffer<T> {
    slots: Vec<T>,
    // next slot to overwrite == oldest sample
    cursor: usize,
}

impl<T: Clone> CircularBuffer<T> {
    pub fn new(capacity: usize, fill: T) -> Self {
        Self {
            slots: vec![fill; capacity],
            cursor: 0,
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T> CircularBuffer<T> {
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    // Overwrite the oldest slot
    pub fn push(&mut self, v: T) {
        if self.slots.is_empty() {
            return;
        }
        self.slots[self.cursor] = v;
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    /// Oldest to newest. A fresh pass every call.
    pub fn iter(&self) -> Iter<'_, T> {
        let (newer, older) = self.slots.split_at(self.cursor);
        older.iter().chain(newer.iter())
    }

    pub fn latest(&self) -> Option<&T> {
        let n = self.slots.len();
        if n == 0 {
            return None;
        }
        self.slots.get((self.cursor + n - 1) % n)
    }
}

impl CircularBuffer<f64> {
    /// Range of the current contents, for chart scaling.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.iter().copied().fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

impl<'a, T> IntoIterator for &'a CircularBuffer<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// Keeps one ring per (cold room, metric) with a fixed capacity
#[derive(Debug, Clone)]
pub struct HistoryBook {
    buffers: BTreeMap<(EntityId, String), CircularBuffer<f64>>,
    cap: usize,
}

impl HistoryBook {
    pub fn new(cap: usize) -> Self {
        Self {
            buffers: BTreeMap::new(),
            cap,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn push(&mut self, entity: EntityId, metric: &str, v: f64) {
        let cap = self.cap;
        self.buffers
            .entry((entity, metric.to_owned()))
            .or_insert_with(|| CircularBuffer::new(cap, 0.0))
            .push(v);
    }

    pub fn get(&self, entity: EntityId, metric: &str) -> Option<&CircularBuffer<f64>> {
        self.buffers.get(&(entity, metric.to_owned()))
    }

    // Drop rooms that disappeared from the feed
    pub fn retain_entities(&mut self, ids: &BTreeSet<EntityId>) {
        self.buffers.retain(|(id, _), _| ids.contains(id));
    }

    /// Push one sample per tracked metric per room. Returns how many samples
    /// were recorded; missing or non-numeric values are skipped.
    pub fn record(&mut self, snapshot: &Snapshot, metrics: &[String]) -> usize {
        let mut n = 0;
        for s in &snapshot.structs {
            for metric in metrics {
                if let Some(v) = s.get(metric).and_then(sample_value) {
                    self.push(s.cold_room, metric, v);
                    n += 1;
                }
            }
        }
        n
    }
}

fn sample_value(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
