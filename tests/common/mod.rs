// Shared test helpers: fake provider, recording notifier, store and config builders

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use stationwatch::config::AppConfig;
use stationwatch::models::*;
use stationwatch::notify::Notifier;
use stationwatch::store::MetricStore;
use stationwatch::telemetry::{Page, StationInfo, StationStatus, TelemetryError, TelemetrySource};
use tempfile::TempDir;

pub fn at(day: u32, hour: u32, min: u32, sec: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, day)
        .unwrap()
        .and_hms_opt(hour, min, sec)
        .unwrap()
}

pub fn reading(id: &str, name: &str, status: ConnectStatus) -> StationReading {
    StationReading {
        station_id: StationId::normalize(id),
        station_name: name.to_string(),
        identification_name: format!("{name}-RTK"),
        connect_status: status,
    }
}

pub fn snapshot_row(
    id: &str,
    name: &str,
    status: ConnectStatus,
    scan_time: NaiveDateTime,
    error_start_time: Option<NaiveDateTime>,
) -> StationSnapshot {
    StationSnapshot {
        station_id: StationId::normalize(id),
        station_name: name.to_string(),
        identification_name: format!("{name}-RTK"),
        connect_status: status,
        scan_time,
        error_start_time,
    }
}

pub fn sample(ts: NaiveDateTime, station: &str, users: u32, fixed_users: u32) -> RateSample {
    RateSample {
        timestamp: ts,
        station: station.to_string(),
        fixed_rate: if users > 0 {
            fixed_users as f64 / users as f64 * 100.0
        } else {
            0.0
        },
        users,
        fixed_users,
    }
}

pub fn connection(station: &str, status: i64) -> UserConnection {
    UserConnection {
        station_group: station.to_string(),
        status,
    }
}

pub async fn temp_store() -> (TempDir, MetricStore) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("monitor.db");
    let store = MetricStore::connect(path.to_str().unwrap(), 2).await.unwrap();
    store.init().await.unwrap();
    (dir, store)
}

pub const TEST_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[database]
path = "data/test.db"
max_pool_size = 2

[api]
base_url = "http://127.0.0.1:9"
access_key = "test-access"
secret_key = "test-secret"
page_size = 2
max_attempts = 3
backoff_base_ms = 1

[notify]
webhook_url = "http://127.0.0.1:9/hook"

[alerting]
whitelist = ["PYN1"]
# keep wall-clock driven tests independent of the time of day
evening_cutoff = "23:59:59"
carry_over_cutoff = "00:00"

[report]
decimal_comma = false
"#;

pub fn test_config() -> AppConfig {
    AppConfig::load_from_str_with_env(TEST_CONFIG, |_| None).unwrap()
}

/// In-memory provider. `fail_next` makes the next N calls fail; `empty_statuses` makes the
/// live-status call answer with no records; `events` records when a station fetch starts
/// and finishes.
#[derive(Default)]
pub struct FakeSource {
    pub users: Mutex<Vec<UserConnection>>,
    pub stations: Mutex<Vec<StationReading>>,
    pub fail_next: AtomicU32,
    pub empty_statuses: AtomicBool,
    pub calls: AtomicU32,
    pub events: Mutex<Vec<&'static str>>,
    pub status_delay: Option<Duration>,
}

impl FakeSource {
    pub fn with_stations(stations: Vec<StationReading>) -> Self {
        Self {
            stations: Mutex::new(stations),
            ..Self::default()
        }
    }

    pub fn with_users(users: Vec<UserConnection>) -> Self {
        Self {
            users: Mutex::new(users),
            ..Self::default()
        }
    }

    pub fn set_stations(&self, stations: Vec<StationReading>) {
        *self.stations.lock().unwrap() = stations;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), TelemetryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(TelemetryError::Api {
                uri: "/fake".into(),
                code: "BUSY".into(),
            })
        } else {
            Ok(())
        }
    }
}

fn page_of<T: Clone>(all: &[T], page: u32, size: u32) -> Page<T> {
    let start = ((page - 1) * size) as usize;
    Page {
        records: all.iter().skip(start).take(size as usize).cloned().collect(),
        total: Some(all.len() as u64),
    }
}

#[async_trait]
impl TelemetrySource for FakeSource {
    async fn online_users(
        &self,
        page: u32,
        size: u32,
    ) -> Result<Page<UserConnection>, TelemetryError> {
        self.check()?;
        Ok(page_of(&self.users.lock().unwrap(), page, size))
    }

    async fn list_stations(&self, page: u32, size: u32) -> Result<Page<StationInfo>, TelemetryError> {
        self.check()?;
        if page == 1 {
            self.events.lock().unwrap().push("fetch_start");
        }
        let infos: Vec<StationInfo> = self
            .stations
            .lock()
            .unwrap()
            .iter()
            .map(|s| StationInfo {
                id: s.station_id.clone(),
                station_name: s.station_name.clone(),
                identification_name: s.identification_name.clone(),
            })
            .collect();
        Ok(page_of(&infos, page, size))
    }

    async fn station_statuses(
        &self,
        ids: &[StationId],
    ) -> Result<Vec<StationStatus>, TelemetryError> {
        self.check()?;
        if let Some(delay) = self.status_delay {
            tokio::time::sleep(delay).await;
        }
        if self.empty_statuses.load(Ordering::SeqCst) {
            self.events.lock().unwrap().push("fetch_end");
            return Ok(Vec::new());
        }
        let statuses = self
            .stations
            .lock()
            .unwrap()
            .iter()
            .filter(|s| ids.contains(&s.station_id))
            .map(|s| StationStatus {
                station_id: s.station_id.clone(),
                station_name: s.station_name.clone(),
                connect_status: s.connect_status,
            })
            .collect();
        self.events.lock().unwrap().push("fetch_end");
        Ok(statuses)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, text: &str) -> bool {
        self.sent.lock().unwrap().push(text.to_string());
        true
    }
}
