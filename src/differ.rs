// Snapshot diff: classifies each station against its last persisted row and tracks outage starts.
// Pure; the caller owns reading the previous snapshot and persisting the next one.

use std::collections::{BTreeSet, HashMap};

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};

use crate::config::AlertingConfig;
use crate::whitelist::station_key;
use crate::models::{
    ChangeEntry, ChangeReport, ConnectStatus, StationId, StationReading, StationSnapshot,
    StatusCounts,
};

/// Time-of-day thresholds that silence alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cutoffs {
    /// Online → error transitions after this time are not reported as new problems.
    pub evening: NaiveTime,
    /// Outages that started yesterday at or before this time are treated as stale.
    pub carry_over: NaiveTime,
}

impl Default for Cutoffs {
    fn default() -> Self {
        Self::from(&AlertingConfig::default())
    }
}

impl From<&AlertingConfig> for Cutoffs {
    fn from(cfg: &AlertingConfig) -> Self {
        Self {
            evening: cfg.evening_cutoff,
            carry_over: cfg.carry_over_cutoff,
        }
    }
}

pub fn diff(
    current: &[StationReading],
    previous: &HashMap<StationId, StationSnapshot>,
    whitelist: &BTreeSet<String>,
    now: NaiveDateTime,
    cutoffs: Cutoffs,
) -> ChangeReport {
    let mut report = ChangeReport {
        counts: count_statuses(current),
        ..ChangeReport::default()
    };

    for station in current {
        if station_key(&station.station_name).is_some_and(|name| whitelist.contains(&name)) {
            continue;
        }

        let Some(prev) = previous.get(&station.station_id) else {
            if station.connect_status.is_error() {
                report.new_problems.push(station.label());
            }
            continue;
        };

        match (station.connect_status.is_error(), prev.connect_status.is_error()) {
            (true, false) => {
                if now.time() > cutoffs.evening {
                    continue;
                }
                report.new_problems.push(station.label());
            }
            (true, true) => {
                if let Some(entry) = outage_entry(station, prev, now, cutoffs) {
                    report.still_problems.push(entry);
                }
            }
            (false, true) => {
                if let Some(entry) = outage_entry(station, prev, now, cutoffs) {
                    report.fixed_stations.push(entry);
                }
            }
            (false, false) => {}
        }
    }

    report
}

/// Rows to persist for this scan. Error start is stamped on entering an error state,
/// carried forward while the outage lasts and cleared once the station is back online.
pub fn next_snapshot(
    current: &[StationReading],
    previous: &HashMap<StationId, StationSnapshot>,
    now: NaiveDateTime,
) -> Vec<StationSnapshot> {
    current
        .iter()
        .map(|station| {
            let error_start_time = if station.connect_status.is_error() {
                previous
                    .get(&station.station_id)
                    .filter(|prev| prev.connect_status.is_error())
                    .and_then(|prev| prev.error_start_time)
                    .or(Some(now))
            } else {
                None
            };
            StationSnapshot {
                station_id: station.station_id.clone(),
                station_name: station.station_name.clone(),
                identification_name: station.identification_name.clone(),
                connect_status: station.connect_status,
                scan_time: now,
                error_start_time,
            }
        })
        .collect()
}

/// An outage that began on the previous calendar day no later than the carry-over
/// cutoff is stale and should not be reported again.
pub fn is_stale_carry_over(
    error_start: NaiveDateTime,
    now: NaiveDateTime,
    carry_over: NaiveTime,
) -> bool {
    now.date().pred_opt() == Some(error_start.date()) && error_start.time() <= carry_over
}

fn outage_entry(
    station: &StationReading,
    prev: &StationSnapshot,
    now: NaiveDateTime,
    cutoffs: Cutoffs,
) -> Option<ChangeEntry> {
    let downtime = match prev.error_start_time {
        Some(start) if is_stale_carry_over(start, now, cutoffs.carry_over) => return None,
        Some(start) => Some(truncate_seconds(now - start)),
        None => None,
    };
    Some(ChangeEntry {
        label: station.label(),
        downtime,
    })
}

fn truncate_seconds(delta: TimeDelta) -> TimeDelta {
    TimeDelta::seconds(delta.num_seconds())
}

fn count_statuses(current: &[StationReading]) -> StatusCounts {
    let mut counts = StatusCounts {
        total: current.len(),
        ..StatusCounts::default()
    };
    for station in current {
        match station.connect_status {
            ConnectStatus::Online => counts.online += 1,
            ConnectStatus::NoData => counts.no_data += 1,
            ConnectStatus::Offline => counts.offline += 1,
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, day)
            .and_then(|d| d.and_hms_opt(h, m, 0))
            .unwrap()
    }

    #[test]
    fn carry_over_only_applies_to_yesterday() {
        let cutoff = NaiveTime::from_hms_opt(21, 0, 0).unwrap();
        let now = at(10, 8, 0);
        assert!(is_stale_carry_over(at(9, 21, 0), now, cutoff));
        assert!(!is_stale_carry_over(at(9, 21, 1), now, cutoff));
        assert!(!is_stale_carry_over(at(8, 10, 0), now, cutoff));
        assert!(!is_stale_carry_over(at(10, 7, 0), now, cutoff));
    }

    #[test]
    fn downtime_drops_subsecond_part() {
        let d = truncate_seconds(TimeDelta::milliseconds(61_900));
        assert_eq!(d.num_seconds(), 61);
        assert_eq!(d.subsec_nanos(), 0);
    }
}
