// Rollup job tests: scan → 5-min, 15-min rollup with pruning, hourly upsert, cleanup

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{FakeSource, at, connection, sample, snapshot_row, temp_store};
use stationwatch::models::ConnectStatus::Offline;
use stationwatch::models::*;
use stationwatch::rollup::{Retention, RollupJobs};
use stationwatch::store::MetricStore;
use stationwatch::telemetry::{RetryPolicy, Telemetry};

const RETENTION: Retention = Retention {
    raw_days: 3,
    history_days: 3,
    cleanup_days: 180,
};

fn jobs(store: MetricStore, source: Arc<FakeSource>) -> RollupJobs {
    let telemetry = Telemetry::new(
        source,
        RetryPolicy {
            max_attempts: 2,
            backoff_base: Duration::from_millis(1),
        },
        50,
    );
    RollupJobs::new(store, telemetry, RETENTION)
}

#[tokio::test]
async fn scan_saves_one_sample_per_station() {
    let (_dir, store) = temp_store().await;
    let source = Arc::new(FakeSource::with_users(vec![
        connection("PYN1", 4),
        connection("PYN1", 2),
        connection("HNI1", 4),
    ]));
    let jobs = jobs(store.clone(), source);
    let now = at(10, 9, 0, 0);

    assert_eq!(jobs.scan(now).await.unwrap(), Some(2));
    let saved = store.samples_between(now, now).await.unwrap();
    assert_eq!(saved.len(), 2);
    let pyn = saved.iter().find(|s| s.station == "PYN1").unwrap();
    assert_eq!(pyn.users, 2);
    assert_eq!(pyn.fixed_rate, 50.0);
}

#[tokio::test]
async fn scan_with_no_users_writes_nothing() {
    let (_dir, store) = temp_store().await;
    let jobs = jobs(store.clone(), Arc::new(FakeSource::default()));
    let now = at(10, 9, 0, 0);
    assert_eq!(jobs.scan(now).await.unwrap(), Some(0));
    assert!(store.samples_between(now, now).await.unwrap().is_empty());
}

#[tokio::test]
async fn scan_skips_when_provider_unavailable() {
    let (_dir, store) = temp_store().await;
    let source = Arc::new(FakeSource::with_users(vec![connection("PYN1", 4)]));
    source.fail_next.store(u32::MAX, Ordering::SeqCst);
    let jobs = jobs(store.clone(), source);
    let now = at(10, 9, 0, 0);

    assert_eq!(jobs.scan(now).await.unwrap(), None);
    assert!(store.samples_between(now, now).await.unwrap().is_empty());
}

#[tokio::test]
async fn fifteen_minute_rollup_and_pruning() {
    let (_dir, store) = temp_store().await;
    let now = at(10, 9, 16, 0);
    store
        .save_samples(&[
            sample(at(6, 9, 0, 0), "PYN1", 5, 5),
            sample(at(10, 8, 59, 0), "PYN1", 50, 50),
            sample(at(10, 9, 3, 0), "PYN1", 10, 5),
            sample(at(10, 9, 3, 0), "HNI1", 10, 10),
            sample(at(10, 9, 12, 0), "PYN1", 20, 15),
        ])
        .await
        .unwrap();
    store
        .persist_snapshot(&[snapshot_row("1", "PYN1", Offline, at(6, 9, 0, 0), Some(at(6, 9, 0, 0)))])
        .await
        .unwrap();

    let jobs = jobs(store.clone(), Arc::new(FakeSource::default()));
    let rollup = jobs.aggregate_fifteen_minute(now).await.unwrap().unwrap();

    // 40 users over 2 scans, 30 fixed
    assert_eq!(rollup.timestamp, now);
    assert!((rollup.users - 20.0).abs() < 1e-9);
    assert!((rollup.fixed_users - 15.0).abs() < 1e-9);
    assert!((rollup.fixed_rate - 75.0).abs() < 1e-9);
    assert_eq!(rollup.active_stations, Some(0.5));

    let stored = store
        .rollups_between(Tier::FifteenMinute, now, now)
        .await
        .unwrap();
    assert_eq!(stored, vec![rollup]);

    // the 4-day-old sample and history row are gone
    assert!(
        store
            .samples_between(at(1, 0, 0, 0), at(7, 0, 0, 0))
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        store
            .station_history(&StationId::normalize("1"), 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn fifteen_minute_without_samples_writes_nothing() {
    let (_dir, store) = temp_store().await;
    let jobs = jobs(store.clone(), Arc::new(FakeSource::default()));
    let now = at(10, 9, 16, 0);
    assert!(jobs.aggregate_fifteen_minute(now).await.unwrap().is_none());
    assert!(
        store
            .rollups_between(Tier::FifteenMinute, at(10, 0, 0, 0), now)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn hourly_rollup_upserts_current_hour() {
    let (_dir, store) = temp_store().await;
    for (minute, users) in [(1, 10.0), (16, 20.0), (31, 30.0), (46, 40.0)] {
        store
            .insert_fifteen_minute(&RateRollup {
                timestamp: at(10, 9, minute, 0),
                station: ALL_STATIONS_LABEL.into(),
                active_stations: Some(2.0),
                fixed_rate: 50.0,
                users,
                fixed_users: users / 2.0,
            })
            .await
            .unwrap();
    }
    let jobs = jobs(store.clone(), Arc::new(FakeSource::default()));

    let first = jobs.aggregate_hourly(at(10, 10, 2, 0)).await.unwrap().unwrap();
    assert_eq!(first.timestamp, at(10, 10, 0, 0));
    // window 09:02..10:02 holds the 09:16, 09:31 and 09:46 rows
    assert!((first.users - 30.0).abs() < 1e-9);

    // same hour again: replaced, not duplicated
    let second = jobs.aggregate_hourly(at(10, 10, 20, 0)).await.unwrap().unwrap();
    assert!((second.users - 35.0).abs() < 1e-9);

    let rows = store
        .rollups_between(Tier::Hourly, at(10, 0, 0, 0), at(10, 23, 0, 0))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].users, second.users);
}

#[tokio::test]
async fn cleanup_uses_long_retention() {
    let (_dir, store) = temp_store().await;
    let now = at(10, 2, 0, 0);
    let ancient = now - chrono::TimeDelta::days(200);
    store
        .save_samples(&[sample(ancient, "PYN1", 1, 1), sample(at(9, 9, 0, 0), "PYN1", 1, 1)])
        .await
        .unwrap();
    let jobs = jobs(store.clone(), Arc::new(FakeSource::default()));

    let summary = jobs.cleanup(now).await.unwrap();
    assert_eq!(summary.total(), 1);
    assert_eq!(summary.deleted["fixed_rate_5m"], 1);
    assert_eq!(jobs.retention().cleanup_days, 180);
}
