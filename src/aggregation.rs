// Fixed-rate window math for the three tiers plus per-station / per-prefix summaries.
// Pure functions only; reading windows and writing rows lives in `rollup`.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{NaiveDateTime, Timelike};

use crate::models::{ALL_STATIONS_LABEL, RateRollup, RateSample, UserConnection, WindowSummary};

/// Label used for connections that carry no station group.
pub const UNKNOWN_STATION: &str = "unknown";

/// `fixed / total * 100`, or 0 when there is nothing to divide by.
pub fn fixed_rate(fixed: f64, total: f64) -> f64 {
    if total > 0.0 {
        fixed / total * 100.0
    } else {
        0.0
    }
}

/// Stage 1: one sample per station group, all stamped with the scan time.
/// Groups come out sorted by station name.
pub fn rate_samples(connections: &[UserConnection], timestamp: NaiveDateTime) -> Vec<RateSample> {
    let mut groups: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    for c in connections {
        let station = if c.station_group.trim().is_empty() {
            UNKNOWN_STATION
        } else {
            c.station_group.as_str()
        };
        let entry = groups.entry(station).or_default();
        entry.0 += 1;
        if c.is_fixed() {
            entry.1 += 1;
        }
    }
    groups
        .into_iter()
        .map(|(station, (users, fixed_users))| RateSample {
            timestamp,
            station: station.to_string(),
            fixed_rate: fixed_rate(fixed_users as f64, users as f64),
            users,
            fixed_users,
        })
        .collect()
}

/// Stage 2: folds the 5-min samples of one window into a 15-min rollup stamped `timestamp`.
///
/// Users are averaged per distinct scan timestamp, not per sample. `active_stations` is the
/// mean number of stations with users per scan, minus one.
pub fn rollup_fifteen_minute(
    samples: &[RateSample],
    timestamp: NaiveDateTime,
) -> Option<RateRollup> {
    if samples.is_empty() {
        return None;
    }

    let mut total_users = 0.0;
    let mut total_fixed_users = 0.0;
    let mut active_by_scan: BTreeMap<NaiveDateTime, HashSet<&str>> = BTreeMap::new();
    for s in samples {
        total_users += s.users as f64;
        total_fixed_users += s.fixed_users as f64;
        let active = active_by_scan.entry(s.timestamp).or_default();
        if s.users > 0 {
            active.insert(s.station.as_str());
        }
    }

    let scans = active_by_scan.len() as f64;
    let active_total: usize = active_by_scan.values().map(HashSet::len).sum();

    Some(RateRollup {
        timestamp,
        station: ALL_STATIONS_LABEL.to_string(),
        active_stations: Some(active_total as f64 / scans - 1.0),
        fixed_rate: fixed_rate(total_fixed_users, total_users),
        users: total_users / scans,
        fixed_users: total_fixed_users / scans,
    })
}

/// Stage 3: unweighted average of the 15-min rollups of the trailing hour.
pub fn rollup_hourly(rollups: &[RateRollup], timestamp: NaiveDateTime) -> Option<RateRollup> {
    if rollups.is_empty() {
        return None;
    }

    let count = rollups.len() as f64;
    let total_users: f64 = rollups.iter().map(|r| r.users).sum();
    let total_fixed_users: f64 = rollups.iter().map(|r| r.fixed_users).sum();

    Some(RateRollup {
        timestamp,
        station: ALL_STATIONS_LABEL.to_string(),
        active_stations: None,
        fixed_rate: fixed_rate(total_fixed_users, total_users),
        users: total_users / count,
        fixed_users: total_fixed_users / count,
    })
}

/// Start of the hour containing `ts`; the key hourly rollups are stored under.
pub fn hour_bucket(ts: NaiveDateTime) -> NaiveDateTime {
    ts.date()
        .and_hms_opt(ts.hour(), 0, 0)
        .unwrap_or(ts)
}

/// Average over the samples of one station (name compared trimmed, case-insensitive).
pub fn summarize_station(samples: &[RateSample], station: &str) -> Option<WindowSummary> {
    let wanted = station.trim();
    summarize(
        samples
            .iter()
            .filter(|s| s.station.trim().eq_ignore_ascii_case(wanted)),
    )
}

/// Average over the samples of every station whose name starts with `prefix`.
pub fn summarize_prefix(samples: &[RateSample], prefix: &str) -> Option<WindowSummary> {
    let wanted = prefix.trim().to_uppercase();
    summarize(
        samples
            .iter()
            .filter(|s| s.station.trim().to_uppercase().starts_with(&wanted)),
    )
}

// Per-record averages: a station sampled twice in the window counts twice.
fn summarize<'a>(samples: impl Iterator<Item = &'a RateSample>) -> Option<WindowSummary> {
    let mut records = 0usize;
    let mut total_users = 0.0;
    let mut total_fixed_users = 0.0;
    let mut stations: BTreeSet<&str> = BTreeSet::new();
    for s in samples {
        records += 1;
        total_users += s.users as f64;
        total_fixed_users += s.fixed_users as f64;
        stations.insert(s.station.as_str());
    }
    if records == 0 {
        return None;
    }
    Some(WindowSummary {
        fixed_rate: fixed_rate(total_fixed_users, total_users),
        users: total_users / records as f64,
        fixed_users: total_fixed_users / records as f64,
        records,
        stations: stations.len(),
    })
}
