// Store-backed stage runners: scan (raw → 5-min), 15-min, hourly, retention cleanup.
// Each pass reads its trailing window, applies the pure rollup in `aggregation` and writes one tier.

use chrono::{NaiveDateTime, TimeDelta};
use tracing::{info, instrument};

use crate::aggregation;
use crate::config::DatabaseConfig;
use crate::models::{CleanupSummary, RateRollup, Tier};
use crate::store::MetricStore;
use crate::telemetry::Telemetry;

const FIFTEEN_MINUTE_WINDOW: TimeDelta = TimeDelta::minutes(15);
const HOURLY_WINDOW: TimeDelta = TimeDelta::hours(1);

/// Retention horizons, in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub raw_days: u32,
    pub history_days: u32,
    pub cleanup_days: u32,
}

impl From<&DatabaseConfig> for Retention {
    fn from(cfg: &DatabaseConfig) -> Self {
        Self {
            raw_days: cfg.raw_retention_days,
            history_days: cfg.history_retention_days,
            cleanup_days: cfg.cleanup_retention_days,
        }
    }
}

#[derive(Clone)]
pub struct RollupJobs {
    store: MetricStore,
    telemetry: Telemetry,
    retention: Retention,
}

impl RollupJobs {
    pub fn new(store: MetricStore, telemetry: Telemetry, retention: Retention) -> Self {
        Self {
            store,
            telemetry,
            retention,
        }
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Stage 1: fetch online users and write one 5-min sample per station group.
    /// `None` when the provider was unavailable; nothing is written then.
    #[instrument(skip(self), fields(job = "scan"))]
    pub async fn scan(&self, now: NaiveDateTime) -> anyhow::Result<Option<usize>> {
        let Some(connections) = self.telemetry.fetch_online_users().await.ready() else {
            info!("no online user data, scan skipped");
            return Ok(None);
        };
        let samples = aggregation::rate_samples(&connections, now);
        if !samples.is_empty() {
            self.store.save_samples(&samples).await?;
        }
        info!(
            connections = connections.len(),
            samples = samples.len(),
            "5-min samples saved"
        );
        Ok(Some(samples.len()))
    }

    /// Stage 2: roll the last 15 minutes of samples into one 15-min row, then purge expired
    /// samples and station history.
    #[instrument(skip(self), fields(job = "aggregate_15m"))]
    pub async fn aggregate_fifteen_minute(
        &self,
        now: NaiveDateTime,
    ) -> anyhow::Result<Option<RateRollup>> {
        let samples = self
            .store
            .samples_between(now - FIFTEEN_MINUTE_WINDOW, now)
            .await?;
        let Some(rollup) = aggregation::rollup_fifteen_minute(&samples, now) else {
            info!("no data for 15-min aggregation");
            return Ok(None);
        };
        self.store.insert_fifteen_minute(&rollup).await?;

        let pruned_samples = self
            .store
            .prune_samples_before(now - TimeDelta::days(self.retention.raw_days.into()))
            .await?;
        let pruned_history = self
            .store
            .prune_history_before(now - TimeDelta::days(self.retention.history_days.into()))
            .await?;
        info!(
            samples = samples.len(),
            pruned_samples, pruned_history, "15-min rollup saved"
        );
        Ok(Some(rollup))
    }

    /// Stage 3: average the last hour of 15-min rows into the hourly row of the current hour.
    #[instrument(skip(self), fields(job = "aggregate_hourly"))]
    pub async fn aggregate_hourly(&self, now: NaiveDateTime) -> anyhow::Result<Option<RateRollup>> {
        let rollups = self
            .store
            .rollups_between(Tier::FifteenMinute, now - HOURLY_WINDOW, now)
            .await?;
        let Some(hourly) = aggregation::rollup_hourly(&rollups, aggregation::hour_bucket(now))
        else {
            info!("no data for hourly aggregation");
            return Ok(None);
        };
        self.store.upsert_hourly(&hourly).await?;
        info!(rollups = rollups.len(), hour = %hourly.timestamp, "hourly rollup saved");
        Ok(Some(hourly))
    }

    /// Deletes rows past the long retention horizon from every aged table, then vacuums.
    #[instrument(skip(self), fields(job = "cleanup"))]
    pub async fn cleanup(&self, now: NaiveDateTime) -> anyhow::Result<CleanupSummary> {
        let cutoff = now - TimeDelta::days(self.retention.cleanup_days.into());
        let summary = self.store.cleanup_before(cutoff).await?;
        self.store.vacuum().await?;
        info!(
            deleted = summary.total(),
            retention_days = self.retention.cleanup_days,
            "cleanup complete"
        );
        Ok(summary)
    }
}
