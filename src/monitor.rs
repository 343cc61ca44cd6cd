// Façade over store, status cycle, rollup jobs, whitelist and notifier.
// Query methods return data or rendered text; `scheduled_*` methods also deliver.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregation;
use crate::config::AppConfig;
use crate::differ::Cutoffs;
use crate::models::{CleanupSummary, RateRollup, RateSample, StoreStats, Tier};
use crate::notify::Notifier;
use crate::report::{self, NumberFormat, Subject};
use crate::rollup::{Retention, RollupJobs};
use crate::status::{StatusOutcome, StatusService};
use crate::store::{MetricStore, now_local};
use crate::telemetry::{RetryPolicy, Telemetry, TelemetrySource};
use crate::whitelist::Whitelist;

/// Rows of one tier: the 5-min tier holds samples, the others rollups.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TierRows {
    Samples(Vec<RateSample>),
    Rollups(Vec<RateRollup>),
}

impl TierRows {
    pub fn len(&self) -> usize {
        match self {
            Self::Samples(v) => v.len(),
            Self::Rollups(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistUpdate {
    pub added: Vec<String>,
    pub names: Vec<String>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub summary: CleanupSummary,
    pub stats: StoreStats,
    pub text: String,
}

pub struct Monitor {
    store: MetricStore,
    status: StatusService,
    jobs: RollupJobs,
    whitelist: Arc<Whitelist>,
    notifier: Arc<dyn Notifier>,
    numbers: NumberFormat,
}

impl Monitor {
    pub fn new(
        config: &AppConfig,
        store: MetricStore,
        source: Arc<dyn TelemetrySource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let telemetry = Telemetry::new(
            source,
            RetryPolicy::from(&config.api),
            config.api.page_size,
        );
        let whitelist = Arc::new(Whitelist::new(&config.alerting.whitelist));
        let status = StatusService::new(
            store.clone(),
            telemetry.clone(),
            whitelist.clone(),
            Cutoffs::from(&config.alerting),
        );
        let jobs = RollupJobs::new(store.clone(), telemetry, Retention::from(&config.database));
        Self {
            store,
            status,
            jobs,
            whitelist,
            notifier,
            numbers: NumberFormat::from(&config.report),
        }
    }

    pub fn jobs(&self) -> &RollupJobs {
        &self.jobs
    }

    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    /// On-demand status diff, always rendered. Nothing is delivered.
    pub async fn status_now(&self, prefix: Option<&str>) -> anyhow::Result<Option<StatusOutcome>> {
        self.status.run(prefix, true).await
    }

    /// Latest 15-min rollup within the trailing `hours`, rendered.
    pub async fn fixed_rate_summary(&self, hours: u32) -> anyhow::Result<String> {
        self.fixed_rate_summary_at(hours, now_local()).await
    }

    pub async fn fixed_rate_summary_at(
        &self,
        hours: u32,
        now: NaiveDateTime,
    ) -> anyhow::Result<String> {
        let rollups = self
            .store
            .rollups_between(Tier::FifteenMinute, now - TimeDelta::hours(hours.into()), now)
            .await?;
        Ok(report::render_fixed_rate(rollups.last(), now, self.numbers))
    }

    pub async fn rollups(&self, tier: Tier, hours: u32) -> anyhow::Result<TierRows> {
        let now = now_local();
        let from = now - TimeDelta::hours(hours.into());
        Ok(match tier {
            Tier::FiveMinute => TierRows::Samples(self.store.samples_between(from, now).await?),
            _ => TierRows::Rollups(self.store.rollups_between(tier, from, now).await?),
        })
    }

    /// Fixed rate of one station or one province prefix over the trailing window.
    /// `minutes` defaults to 10 for a station and 15 for a prefix.
    pub async fn window_report(&self, name: &str, minutes: Option<u32>) -> anyhow::Result<String> {
        self.window_report_at(name, minutes, now_local()).await
    }

    pub async fn window_report_at(
        &self,
        name: &str,
        minutes: Option<u32>,
        now: NaiveDateTime,
    ) -> anyhow::Result<String> {
        let name = name.trim().to_uppercase();
        anyhow::ensure!(!name.is_empty(), "station or province name is required");
        let subject = Subject::classify(&name);
        let minutes = minutes.unwrap_or_else(|| subject.default_window_minutes());
        anyhow::ensure!(minutes > 0, "window must be at least one minute");

        let samples = self
            .store
            .samples_between(now - TimeDelta::minutes(minutes.into()), now)
            .await?;
        let summary = match subject {
            Subject::Station(station) => aggregation::summarize_station(&samples, station),
            Subject::Prefix(prefix) => aggregation::summarize_prefix(&samples, prefix),
        };
        Ok(report::render_window_summary(
            summary.as_ref(),
            subject,
            minutes,
            self.numbers,
        ))
    }

    /// Hourly table of `day`.
    pub async fn hourly_table(&self, day: NaiveDate) -> anyhow::Result<String> {
        let from = day.and_time(NaiveTime::MIN);
        let to = from + TimeDelta::days(1) - TimeDelta::seconds(1);
        let rollups = self.store.rollups_between(Tier::Hourly, from, to).await?;
        Ok(report::render_hourly_table(&rollups, day, self.numbers))
    }

    pub fn add_to_whitelist(&self, csv: &str) -> WhitelistUpdate {
        let added = self.whitelist.add_csv(csv);
        let names = self.whitelist.names();
        info!(operation = "whitelist_add", added = ?added, whitelist = ?names, "Whitelist updated");
        WhitelistUpdate {
            text: report::render_whitelist_added(&added),
            added,
            names,
        }
    }

    pub fn whitelist(&self) -> Vec<String> {
        self.whitelist.names()
    }

    pub async fn cleanup(&self) -> anyhow::Result<CleanupReport> {
        let summary = self.jobs.cleanup(now_local()).await?;
        let stats = self.store.stats().await?;
        info!(operation = "cleanup", stats = ?stats.tables, file_size_mb = stats.file_size_mb, "Store stats after cleanup");
        Ok(CleanupReport {
            text: report::render_cleanup(&summary, self.jobs.retention().cleanup_days),
            summary,
            stats,
        })
    }

    pub async fn stats(&self) -> anyhow::Result<StoreStats> {
        self.store.stats().await
    }

    /// Scheduled status cycle; delivers when the cycle decides it should.
    pub async fn scheduled_status(&self, force: bool) -> anyhow::Result<()> {
        match self.status.run(None, force).await? {
            Some(outcome) if outcome.should_notify => self.deliver(&outcome.text).await,
            Some(_) => info!(operation = "status_check", "No significant status changes, report not sent"),
            None => {}
        }
        Ok(())
    }

    pub async fn scheduled_fixed_rate_report(&self) -> anyhow::Result<()> {
        let text = self.fixed_rate_summary(1).await?;
        self.deliver(&text).await;
        Ok(())
    }

    pub async fn scheduled_daily_report(&self) -> anyhow::Result<()> {
        let text = self.hourly_table(now_local().date()).await?;
        self.deliver(&text).await;
        Ok(())
    }

    async fn deliver(&self, text: &str) {
        if !self.notifier.deliver(text).await {
            warn!(operation = "notify", "Report was not delivered");
        }
    }
}
