// Background scheduler: fixed intervals and cron expressions feed one select loop that spawns jobs.
// Daytime-gated jobs are dropped outside the configured hours. A job still running when it
// fires again is skipped, except status jobs, which queue on the status lock instead.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, instrument, warn};

use crate::config::ScheduleConfig;
use crate::monitor::Monitor;
use crate::store::now_local;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    Scan,
    Aggregate15m,
    AggregateHourly,
    StatusCheck,
    StatusReport,
    FixedRateReport,
    DailyReport,
    Cleanup,
}

impl Job {
    pub fn name(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Aggregate15m => "aggregate_15m",
            Self::AggregateHourly => "aggregate_hourly",
            Self::StatusCheck => "status_check",
            Self::StatusReport => "status_report",
            Self::FixedRateReport => "fixed_rate_report",
            Self::DailyReport => "daily_report",
            Self::Cleanup => "cleanup",
        }
    }

    pub fn daytime_only(self) -> bool {
        matches!(
            self,
            Self::Scan | Self::Aggregate15m | Self::AggregateHourly | Self::StatusCheck
        )
    }

    /// Status jobs serialize on the status lock rather than being skipped.
    pub fn waits_for_previous(self) -> bool {
        matches!(self, Self::StatusCheck | Self::StatusReport)
    }
}

/// `start <= hour < end`.
pub fn is_daytime(hour: u32, config: &ScheduleConfig) -> bool {
    (config.daytime_start_hour..config.daytime_end_hour).contains(&hour)
}

/// Spawns the scheduler loop. Returns a join handle.
pub fn spawn(monitor: Arc<Monitor>, config: ScheduleConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        run(monitor, config).await;
    })
}

#[instrument(skip_all, fields(scan_interval_secs = config.scan_interval_secs))]
async fn run(monitor: Arc<Monitor>, config: ScheduleConfig) {
    let mut scan_interval = delayed_interval(config.scan_interval_secs);
    let mut status_interval = delayed_interval(config.status_check_interval_secs);

    let (cron_tx, mut cron_rx) = mpsc::channel::<Job>(16);
    for (job, exprs) in cron_jobs(&config) {
        for expr in exprs {
            tokio::spawn(cron_trigger(job, expr.clone(), cron_tx.clone()));
        }
    }
    drop(cron_tx);

    let mut running: HashMap<Job, JoinHandle<()>> = HashMap::new();
    info!("scheduler started");

    loop {
        let job = tokio::select! {
            _ = scan_interval.tick() => Job::Scan,
            _ = status_interval.tick() => Job::StatusCheck,
            Some(job) = cron_rx.recv() => job,
        };
        dispatch(&monitor, &config, &mut running, job);
    }
}

fn dispatch(
    monitor: &Arc<Monitor>,
    config: &ScheduleConfig,
    running: &mut HashMap<Job, JoinHandle<()>>,
    job: Job,
) {
    if job.daytime_only() && !is_daytime(now_local().hour(), config) {
        info!(job = job.name(), "skipped (outside daytime hours)");
        return;
    }
    if !job.waits_for_previous()
        && running.get(&job).is_some_and(|handle| !handle.is_finished())
    {
        warn!(job = job.name(), "skipped (previous run still in progress)");
        return;
    }

    let monitor = monitor.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = execute(&monitor, job).await {
            warn!(job = job.name(), error = %e, "job failed");
        }
    });
    running.insert(job, handle);
}

async fn execute(monitor: &Monitor, job: Job) -> anyhow::Result<()> {
    match job {
        Job::Scan => monitor.jobs().scan(now_local()).await.map(|_| ()),
        Job::Aggregate15m => monitor
            .jobs()
            .aggregate_fifteen_minute(now_local())
            .await
            .map(|_| ()),
        Job::AggregateHourly => monitor.jobs().aggregate_hourly(now_local()).await.map(|_| ()),
        Job::StatusCheck => monitor.scheduled_status(false).await,
        Job::StatusReport => monitor.scheduled_status(true).await,
        Job::FixedRateReport => monitor.scheduled_fixed_rate_report().await,
        Job::DailyReport => monitor.scheduled_daily_report().await,
        Job::Cleanup => monitor.cleanup().await.map(|_| ()),
    }
}

fn cron_jobs(config: &ScheduleConfig) -> [(Job, &[String]); 6] {
    [
        (Job::Aggregate15m, config.aggregate_15m.as_slice()),
        (Job::AggregateHourly, config.aggregate_hourly.as_slice()),
        (Job::StatusReport, config.status_report.as_slice()),
        (Job::FixedRateReport, config.fixed_rate_report.as_slice()),
        (Job::DailyReport, config.daily_report.as_slice()),
        (Job::Cleanup, config.cleanup.as_slice()),
    ]
}

// First tick after one full period, not immediately at startup.
fn delayed_interval(secs: u64) -> tokio::time::Interval {
    let period = Duration::from_secs(secs);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Sends `job` on `tx` at each fire time of `expr`. Uses local time.
async fn cron_trigger(job: Job, expr: String, tx: mpsc::Sender<Job>) {
    let Ok(schedule) = cron::Schedule::from_str(&expr) else {
        warn!(job = job.name(), cron = %expr, "invalid cron expression; trigger disabled");
        return;
    };
    loop {
        let now = chrono::Local::now();
        let next = schedule.after(&now).next();
        if let Some(next) = next {
            let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
            tokio::time::sleep(delay).await;
            if tx.send(job).await.is_err() {
                break;
            }
        } else {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daytime_window_is_half_open() {
        let config = ScheduleConfig::default();
        assert!(!is_daytime(5, &config));
        assert!(is_daytime(6, &config));
        assert!(is_daytime(19, &config));
        assert!(!is_daytime(20, &config));
    }

    #[test]
    fn only_collection_jobs_are_gated() {
        assert!(Job::Scan.daytime_only());
        assert!(Job::StatusCheck.daytime_only());
        assert!(!Job::StatusReport.daytime_only());
        assert!(!Job::Cleanup.daytime_only());
        assert!(Job::StatusReport.waits_for_previous());
        assert!(!Job::Aggregate15m.waits_for_previous());
    }

    #[test]
    fn every_cron_job_is_wired() {
        let config = ScheduleConfig::default();
        let jobs: Vec<Job> = cron_jobs(&config).iter().map(|(job, _)| *job).collect();
        assert_eq!(jobs.len(), config.cron_sets().len());
        for ((job, exprs), (name, cfg_exprs)) in cron_jobs(&config).iter().zip(config.cron_sets()) {
            assert_eq!(job.name(), name);
            assert_eq!(*exprs, cfg_exprs);
        }
    }
}
