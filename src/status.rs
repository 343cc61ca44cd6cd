// Station status cycle: fetch, diff against the last snapshot, render, persist. One cycle at a time.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::differ::{self, Cutoffs};
use crate::models::{ChangeReport, StationReading, StationSnapshot};
use crate::report;
use crate::store::{MetricStore, now_local};
use crate::telemetry::Telemetry;
use crate::whitelist::Whitelist;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOutcome {
    pub report: ChangeReport,
    pub text: String,
    pub should_notify: bool,
}

pub struct StatusService {
    store: MetricStore,
    telemetry: Telemetry,
    whitelist: Arc<Whitelist>,
    cutoffs: Cutoffs,
    // Held across fetch, diff and persist so cycles never interleave.
    cycle: Mutex<()>,
}

impl StatusService {
    pub fn new(
        store: MetricStore,
        telemetry: Telemetry,
        whitelist: Arc<Whitelist>,
        cutoffs: Cutoffs,
    ) -> Self {
        Self {
            store,
            telemetry,
            whitelist,
            cutoffs,
            cycle: Mutex::new(()),
        }
    }

    /// Runs one cycle at the current local time. `None` means there is nothing to report:
    /// the provider was unavailable or no station matched `prefix`.
    pub async fn run(
        &self,
        prefix: Option<&str>,
        force: bool,
    ) -> anyhow::Result<Option<StatusOutcome>> {
        self.run_with_clock(prefix, force, now_local).await
    }

    /// Same as [`run`](Self::run) with a fixed clock.
    pub async fn run_at(
        &self,
        prefix: Option<&str>,
        force: bool,
        now: NaiveDateTime,
    ) -> anyhow::Result<Option<StatusOutcome>> {
        self.run_with_clock(prefix, force, move || now).await
    }

    async fn run_with_clock(
        &self,
        prefix: Option<&str>,
        force: bool,
        clock: impl FnOnce() -> NaiveDateTime,
    ) -> anyhow::Result<Option<StatusOutcome>> {
        let _cycle = self.cycle.lock().await;
        let now = clock();
        let prefix = prefix.map(str::trim).filter(|p| !p.is_empty());
        info!(operation = "status_check", prefix = ?prefix, force, "Status cycle started");

        let Some(current) = self.telemetry.fetch_stations().await.ready() else {
            error!(operation = "status_check", "Failed to retrieve current station data");
            return Ok(None);
        };

        let previous = match self.store.previous_snapshot().await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(operation = "status_check", error = %e, "Reading previous snapshot failed, diffing against empty state");
                HashMap::new()
            }
        };
        let snapshot = differ::next_snapshot(&current, &previous, now);

        let matching: Vec<StationReading>;
        let scoped: &[StationReading] = match prefix {
            Some(p) => {
                let wanted = p.to_uppercase();
                matching = current
                    .iter()
                    .filter(|s| s.station_name.trim().to_uppercase().starts_with(&wanted))
                    .cloned()
                    .collect();
                &matching
            }
            None => &current,
        };

        if scoped.is_empty() {
            warn!(operation = "status_check", prefix = ?prefix, "No stations match prefix");
            self.persist(&snapshot).await?;
            return Ok(None);
        }

        let whitelist = self.whitelist.snapshot();
        let report = differ::diff(scoped, &previous, &whitelist, now, self.cutoffs);
        let names: Vec<String> = whitelist.into_iter().collect();
        let text = report::render_status_report(&report, prefix, &names, now);
        let should_notify = force
            || report.has_changes()
            || (prefix.is_some() && !report.still_problems.is_empty());

        self.persist(&snapshot).await?;

        info!(
            operation = "status_check",
            new = report.new_problems.len(),
            fixed = report.fixed_stations.len(),
            still = report.still_problems.len(),
            should_notify,
            "Status cycle finished"
        );
        Ok(Some(StatusOutcome {
            report,
            text,
            should_notify,
        }))
    }

    async fn persist(&self, snapshot: &[StationSnapshot]) -> anyhow::Result<()> {
        self.store
            .persist_snapshot(snapshot)
            .await
            .context("Failed to persist station snapshot")
    }
}
