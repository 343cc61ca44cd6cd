// Station identity, connectivity status, provider readings and persisted snapshot rows.

use chrono::{NaiveDate, NaiveDateTime};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Canonical station identifier.
///
/// The provider sends ids as JSON numbers in one endpoint and strings in another, and
/// SQLite hands them back as text. Every boundary goes through [`StationId::normalize`]
/// so map keys built on either side compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn normalize(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }

    /// Accepts a JSON string or number; anything else (or an empty string) is not an id.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self::normalize(s)),
            Value::Number(n) => Some(Self::normalize(&n.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id in the shape the provider expects back in request bodies (number when numeric).
    pub fn to_json(&self) -> Value {
        match self.0.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::from(self.0.clone()),
        }
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for StationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        StationId::from_json(&value)
            .ok_or_else(|| D::Error::custom("station id must be a non-empty string or a number"))
    }
}

/// Connection state reported by the provider (`connectStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectStatus {
    Online,
    NoData,
    Offline,
}

impl ConnectStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Online),
            2 => Some(Self::NoData),
            3 => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Online => 1,
            Self::NoData => 2,
            Self::Offline => 3,
        }
    }

    /// NoData and Offline both count as an outage.
    pub fn is_error(self) -> bool {
        !matches!(self, Self::Online)
    }
}

/// One station as just observed from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationReading {
    pub station_id: StationId,
    pub station_name: String,
    pub identification_name: String,
    pub connect_status: ConnectStatus,
}

impl StationReading {
    /// Display label used in alert lists: `NAME (identification)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.station_name, self.identification_name)
    }
}

/// Persisted per-station row: current snapshot table and append-only history share this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationSnapshot {
    pub station_id: StationId,
    pub station_name: String,
    pub identification_name: String,
    pub connect_status: ConnectStatus,
    pub scan_time: NaiveDateTime,
    /// Set when the station entered NoData/Offline; carried forward during the outage.
    pub error_start_time: Option<NaiveDateTime>,
}

/// Scans observed in an error state for one station on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStatusCount {
    pub date: NaiveDate,
    pub station_id: StationId,
    pub station_name: String,
    pub offline_count: i64,
    pub no_data_count: i64,
}
