// StatusService tests: locked cycle, persistence, prefix filtering, notify decision

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeSource, at, reading, temp_store};
use stationwatch::differ::Cutoffs;
use stationwatch::models::ConnectStatus::{NoData, Offline, Online};
use stationwatch::models::StationId;
use stationwatch::status::StatusService;
use stationwatch::store::MetricStore;
use stationwatch::telemetry::{RetryPolicy, Telemetry};
use stationwatch::whitelist::Whitelist;
use tokio::sync::Barrier;

fn service(store: MetricStore, source: Arc<FakeSource>, whitelist: &[&str]) -> StatusService {
    let telemetry = Telemetry::new(
        source,
        RetryPolicy {
            max_attempts: 2,
            backoff_base: Duration::from_millis(1),
        },
        50,
    );
    StatusService::new(
        store,
        telemetry,
        Arc::new(Whitelist::new(whitelist.iter().copied())),
        Cutoffs::default(),
    )
}

#[tokio::test]
async fn unavailable_provider_persists_nothing() {
    let (_dir, store) = temp_store().await;
    let source = Arc::new(FakeSource::with_stations(vec![reading("1", "PYN2", Offline)]));
    source.fail_next.store(10, std::sync::atomic::Ordering::SeqCst);
    let svc = service(store.clone(), source.clone(), &[]);

    let out = svc.run_at(None, true, at(10, 9, 0, 0)).await.unwrap();
    assert!(out.is_none());
    assert_eq!(source.calls(), 2);
    assert!(store.previous_snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn first_cycle_reports_new_problems_and_persists() {
    let (_dir, store) = temp_store().await;
    let source = Arc::new(FakeSource::with_stations(vec![
        reading("1", "PYN2", Offline),
        reading("2", "HNI2", Online),
    ]));
    let svc = service(store.clone(), source, &[]);

    let out = svc.run_at(None, false, at(10, 9, 0, 0)).await.unwrap().unwrap();
    assert_eq!(out.report.new_problems, vec!["PYN2 (PYN2-RTK)".to_string()]);
    assert!(out.should_notify);
    assert!(out.text.contains("PYN2 (PYN2-RTK)"));

    let saved = store.previous_snapshot().await.unwrap();
    assert_eq!(saved.len(), 2);
    assert_eq!(
        saved[&StationId::normalize("1")].error_start_time,
        Some(at(10, 9, 0, 0))
    );
}

#[tokio::test]
async fn unchanged_cycle_still_persists_and_stays_quiet() {
    let (_dir, store) = temp_store().await;
    let source = Arc::new(FakeSource::with_stations(vec![reading("1", "PYN2", Offline)]));
    let svc = service(store.clone(), source, &[]);

    svc.run_at(None, false, at(10, 9, 0, 0)).await.unwrap();
    let out = svc.run_at(None, false, at(10, 9, 5, 0)).await.unwrap().unwrap();

    assert!(out.report.new_problems.is_empty());
    assert_eq!(out.report.still_problems.len(), 1);
    assert_eq!(out.report.still_problems[0].downtime_display(), "0:05:00");
    assert!(!out.should_notify);

    let history = store
        .station_history(&StationId::normalize("1"), 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    // outage start carried forward, not reset
    assert_eq!(history[0].error_start_time, Some(at(10, 9, 0, 0)));
}

#[tokio::test]
async fn force_always_notifies() {
    let (_dir, store) = temp_store().await;
    let source = Arc::new(FakeSource::with_stations(vec![reading("1", "HNI2", Online)]));
    let svc = service(store, source, &[]);
    let out = svc.run_at(None, true, at(10, 9, 0, 0)).await.unwrap().unwrap();
    assert!(!out.report.has_changes());
    assert!(out.should_notify);
}

#[tokio::test]
async fn prefix_filters_diff_but_persists_everything() {
    let (_dir, store) = temp_store().await;
    let source = Arc::new(FakeSource::with_stations(vec![
        reading("1", "PYN2", Offline),
        reading("2", "HNI2", NoData),
        reading("3", "PYN6", Online),
    ]));
    let svc = service(store.clone(), source.clone(), &[]);

    let out = svc
        .run_at(Some("pyn"), false, at(10, 9, 0, 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(out.report.new_problems, vec!["PYN2 (PYN2-RTK)".to_string()]);
    assert_eq!(out.report.counts.total, 2);
    assert!(out.text.contains("for province PYN"));
    assert_eq!(store.previous_snapshot().await.unwrap().len(), 3);

    // still-erroring stations alone notify when a prefix was asked for
    let again = svc
        .run_at(Some("PYN"), false, at(10, 9, 5, 0))
        .await
        .unwrap()
        .unwrap();
    assert!(again.report.new_problems.is_empty());
    assert_eq!(again.report.still_problems.len(), 1);
    assert!(again.should_notify);
}

#[tokio::test]
async fn unmatched_prefix_returns_none_but_persists() {
    let (_dir, store) = temp_store().await;
    let source = Arc::new(FakeSource::with_stations(vec![reading("1", "PYN2", Offline)]));
    let svc = service(store.clone(), source, &[]);

    let out = svc.run_at(Some("YBI"), true, at(10, 9, 0, 0)).await.unwrap();
    assert!(out.is_none());
    assert_eq!(store.previous_snapshot().await.unwrap().len(), 1);
}

#[tokio::test]
async fn whitelisted_station_is_not_reported() {
    let (_dir, store) = temp_store().await;
    let source = Arc::new(FakeSource::with_stations(vec![
        reading("1", "PYN1", Offline),
        reading("2", "PYN2", NoData),
    ]));
    let svc = service(store, source, &["PYN1"]);
    let out = svc.run_at(None, false, at(10, 9, 0, 0)).await.unwrap().unwrap();
    assert_eq!(out.report.new_problems, vec!["PYN2 (PYN2-RTK)".to_string()]);
    assert_eq!(out.report.counts.offline, 1);
    assert!(out.text.contains("ignored: PYN1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cycles_never_overlap() {
    let (_dir, store) = temp_store().await;
    let source = Arc::new(FakeSource {
        status_delay: Some(Duration::from_millis(50)),
        ..FakeSource::with_stations(vec![reading("1", "PYN2", Offline)])
    });
    let svc = Arc::new(service(store.clone(), source.clone(), &[]));
    let barrier = Arc::new(Barrier::new(3));

    let mut handles = Vec::new();
    for minute in 0..3u32 {
        let svc = svc.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            svc.run_at(None, false, at(10, 9, minute, 0)).await
        }));
    }

    let mut new_problem_cycles = 0;
    for handle in handles {
        let out = handle.await.unwrap().unwrap().unwrap();
        new_problem_cycles += out.report.new_problems.len();
    }

    let events = source.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec!["fetch_start", "fetch_end", "fetch_start", "fetch_end", "fetch_start", "fetch_end"]
    );
    // only the first cycle to take the lock saw an empty previous snapshot
    assert_eq!(new_problem_cycles, 1);
    let history = store
        .station_history(&StationId::normalize("1"), 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
}

#[tokio::test]
async fn empty_status_response_keeps_previous_snapshot() {
    let (_dir, store) = temp_store().await;
    let source = Arc::new(FakeSource::with_stations(vec![reading("1", "PYN2", Offline)]));
    let svc = service(store.clone(), source.clone(), &[]);

    svc.run_at(None, false, at(10, 9, 0, 0)).await.unwrap();

    source
        .empty_statuses
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let out = svc.run_at(None, false, at(10, 9, 5, 0)).await.unwrap();
    assert!(out.is_none());
    let saved = store.previous_snapshot().await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(
        saved[&StationId::normalize("1")].error_start_time,
        Some(at(10, 9, 0, 0))
    );

    source
        .empty_statuses
        .store(false, std::sync::atomic::Ordering::SeqCst);
    let out = svc.run_at(None, false, at(10, 9, 10, 0)).await.unwrap().unwrap();
    assert!(out.report.new_problems.is_empty());
    assert_eq!(out.report.still_problems.len(), 1);
    assert_eq!(out.report.still_problems[0].downtime_display(), "0:10:00");
}

#[tokio::test]
async fn whitelist_seed_matches_regardless_of_case() {
    let (_dir, store) = temp_store().await;
    let source = Arc::new(FakeSource::with_stations(vec![
        reading("1", "Hni1", Offline),
        reading("2", "hni2", NoData),
    ]));
    let svc = service(store, source, &["Hni1"]);
    let out = svc.run_at(None, false, at(10, 9, 0, 0)).await.unwrap().unwrap();
    assert_eq!(out.report.new_problems, vec!["hni2 (hni2-RTK)".to_string()]);
    assert_eq!(out.report.counts.total, 2);
}
