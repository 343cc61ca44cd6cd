// Fixed-rate samples (5-min tier) and rollups (15-min / hourly tiers).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Station label of rollups: the aggregate across all stations.
pub const ALL_STATIONS_LABEL: &str = "ALL";

/// Aggregation granularity. Each tier is derived from the one below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "5m")]
    FiveMinute,
    #[serde(rename = "15m")]
    FifteenMinute,
    #[serde(rename = "hourly")]
    Hourly,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FiveMinute => "5m",
            Self::FifteenMinute => "15m",
            Self::Hourly => "hourly",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::FiveMinute => "fixed_rate_5m",
            Self::FifteenMinute => "fixed_rate_15m",
            Self::Hourly => "fixed_rate_hourly",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "5m" => Ok(Self::FiveMinute),
            "15m" => Ok(Self::FifteenMinute),
            "hourly" | "1h" => Ok(Self::Hourly),
            other => Err(anyhow::anyhow!("unknown tier {:?} (expected 5m, 15m or hourly)", other)),
        }
    }
}

/// One online user connection as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConnection {
    /// Station group the user is attached to (`masterStationName`).
    pub station_group: String,
    pub status: i64,
}

impl UserConnection {
    const FIXED_STATUS: i64 = 4;

    pub fn is_fixed(&self) -> bool {
        self.status == Self::FIXED_STATUS
    }
}

/// One observation per (scan timestamp, station group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSample {
    pub timestamp: NaiveDateTime,
    pub station: String,
    /// Percent, 0-100.
    pub fixed_rate: f64,
    pub users: u32,
    pub fixed_users: u32,
}

/// One row per aggregation bucket; values are averages over the preceding window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRollup {
    pub timestamp: NaiveDateTime,
    pub station: String,
    /// 15-min tier only: mean active stations per scan, minus one.
    pub active_stations: Option<f64>,
    pub fixed_rate: f64,
    pub users: f64,
    pub fixed_users: f64,
}

/// Average over the 5-min samples of one station or one name prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSummary {
    pub fixed_rate: f64,
    /// Per record, not per scan.
    pub users: f64,
    pub fixed_users: f64,
    pub records: usize,
    /// Distinct station labels that contributed.
    pub stations: usize,
}
