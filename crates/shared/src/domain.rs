use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque row key of a snapshot, e.g. `line1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(pub String);

impl LineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    #[default]
    Stopped,
    Started,
}

impl PollStatus {
    pub fn is_started(self) -> bool {
        matches!(self, PollStatus::Started)
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollStatus::Stopped => f.write_str("stopped"),
            PollStatus::Started => f.write_str("started"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: PollStatus,
}

impl From<PollStatus> for StatusReport {
    fn from(status: PollStatus) -> Self {
        Self { status }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Icon {
    Up,
    Down,
}

impl Icon {
    pub fn toggled(self) -> Self {
        match self {
            Icon::Up => Icon::Down,
            Icon::Down => Icon::Up,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Icon::Up => "up",
            Icon::Down => "down",
        }
    }
}

/// Typed view of one table row. Rows may carry more fields than these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRateEntry {
    pub value: f64,
    pub icon: Icon,
}

/// Full set of polled rates. Always replaced wholesale, never merged.
///
/// Rows are kept as received: source order, extra fields and number
/// formatting all survive a round trip, so the table serializes to the same
/// JSON it was parsed from. Every row is checked against
/// [`ExchangeRateEntry`] on the way in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct ExchangeRateSnapshot(Map<String, Value>);

impl ExchangeRateSnapshot {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }

    pub fn get(&self, line: &LineId) -> Option<ExchangeRateEntry> {
        self.0.get(line.as_str()).and_then(decode_entry)
    }

    /// Edits one row in place, leaving its other fields untouched.
    pub fn update(
        &mut self,
        line: &LineId,
        edit: impl FnOnce(&mut ExchangeRateEntry),
    ) -> Option<ExchangeRateEntry> {
        let row = self.0.get_mut(line.as_str())?.as_object_mut()?;
        let mut entry: ExchangeRateEntry =
            serde_json::from_value(Value::Object(row.clone())).ok()?;
        edit(&mut entry);
        row.insert("value".into(), Value::from(entry.value));
        row.insert("icon".into(), Value::from(entry.icon.as_str()));
        Some(entry)
    }

    pub fn insert(&mut self, line: LineId, entry: ExchangeRateEntry) {
        self.0.insert(line.0, entry_value(entry));
    }

    /// Rows in source order.
    pub fn iter(&self) -> impl Iterator<Item = (LineId, ExchangeRateEntry)> + '_ {
        self.0
            .iter()
            .filter_map(|(line, row)| Some((LineId::new(line.as_str()), decode_entry(row)?)))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn decode_entry(row: &Value) -> Option<ExchangeRateEntry> {
    ExchangeRateEntry::deserialize(row).ok()
}

fn entry_value(entry: ExchangeRateEntry) -> Value {
    let mut row = Map::new();
    row.insert("value".into(), Value::from(entry.value));
    row.insert("icon".into(), Value::from(entry.icon.as_str()));
    Value::Object(row)
}

impl TryFrom<Map<String, Value>> for ExchangeRateSnapshot {
    type Error = serde_json::Error;

    fn try_from(rows: Map<String, Value>) -> Result<Self, Self::Error> {
        for row in rows.values() {
            ExchangeRateEntry::deserialize(row)?;
        }
        Ok(Self(rows))
    }
}

impl From<ExchangeRateSnapshot> for Map<String, Value> {
    fn from(snapshot: ExchangeRateSnapshot) -> Self {
        snapshot.0
    }
}

impl FromIterator<(LineId, ExchangeRateEntry)> for ExchangeRateSnapshot {
    fn from_iter<T: IntoIterator<Item = (LineId, ExchangeRateEntry)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(line, entry)| (line.0, entry_value(entry)))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastSnapshot {
    pub snapshot: ExchangeRateSnapshot,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Rotator {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

/// Node transform in the scene graph's own field naming.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transform {
    pub location: Vector3,
    pub rotator: Rotator,
    #[serde(rename = "Scale3D")]
    pub scale_3d: Vector3,
}
