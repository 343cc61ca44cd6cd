// SQLite metric store: rate tiers, current station snapshot, history log, daily counts.
// Rows that fail to decode are skipped with a warning rather than failing the whole read.

mod schema;

use crate::models::{
    CleanupSummary, ConnectStatus, DailyStatusCount, RateRollup, RateSample, StationId,
    StationSnapshot, StoreStats, Tier,
};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::instrument;

pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), TS_FORMAT).ok()
}

/// Local wall-clock time truncated to whole seconds, the resolution every table stores.
pub fn now_local() -> NaiveDateTime {
    let now = chrono::Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

#[derive(Clone)]
pub struct MetricStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl MetricStore {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self {
            pool,
            path: PathBuf::from(path),
        })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        schema::init_tables(&self.pool).await
    }

    /// Appends one scan's 5-min samples in a single transaction.
    #[instrument(skip(self, samples), fields(store = "metric", operation = "save_samples", samples_count = samples.len()))]
    pub async fn save_samples(&self, samples: &[RateSample]) -> anyhow::Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for s in samples {
            sqlx::query(
                "INSERT INTO fixed_rate_5m (timestamp, station, fixed_rate, users, fixed_users) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(format_ts(s.timestamp))
            .bind(&s.station)
            .bind(s.fixed_rate)
            .bind(s.users as i64)
            .bind(s.fixed_users as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// 5-min samples with `from <= timestamp <= to`, ascending.
    #[instrument(skip(self), fields(store = "metric", operation = "samples_between"))]
    pub async fn samples_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> anyhow::Result<Vec<RateSample>> {
        let rows = sqlx::query(
            "SELECT timestamp, station, fixed_rate, users, fixed_users
             FROM fixed_rate_5m WHERE timestamp >= $1 AND timestamp <= $2 ORDER BY timestamp ASC, id ASC",
        )
        .bind(format_ts(from))
        .bind(format_ts(to))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| match parse_sample_row(row) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(error = %e, table = "fixed_rate_5m", "skipping malformed sample row");
                    None
                }
            })
            .collect())
    }

    /// Appends a 15-min rollup.
    #[instrument(skip(self, rollup), fields(store = "metric", operation = "insert_fifteen_minute"))]
    pub async fn insert_fifteen_minute(&self, rollup: &RateRollup) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO fixed_rate_15m (timestamp, station, active_stations, fixed_rate, users, fixed_users)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(format_ts(rollup.timestamp))
        .bind(&rollup.station)
        .bind(rollup.active_stations)
        .bind(rollup.fixed_rate)
        .bind(rollup.users)
        .bind(rollup.fixed_users)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Writes an hourly rollup; an existing row with the same (timestamp, station) is updated in place.
    #[instrument(skip(self, rollup), fields(store = "metric", operation = "upsert_hourly"))]
    pub async fn upsert_hourly(&self, rollup: &RateRollup) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fixed_rate_hourly (timestamp, station, active_stations, fixed_rate, users, fixed_users)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(timestamp, station) DO UPDATE SET
                active_stations = excluded.active_stations,
                fixed_rate = excluded.fixed_rate,
                users = excluded.users,
                fixed_users = excluded.fixed_users,
                created_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(format_ts(rollup.timestamp))
        .bind(&rollup.station)
        .bind(rollup.active_stations)
        .bind(rollup.fixed_rate)
        .bind(rollup.users)
        .bind(rollup.fixed_users)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rollups of the 15-min or hourly tier with `from <= timestamp <= to`, ascending.
    #[instrument(skip(self), fields(store = "metric", operation = "rollups_between"))]
    pub async fn rollups_between(
        &self,
        tier: Tier,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> anyhow::Result<Vec<RateRollup>> {
        anyhow::ensure!(
            tier != Tier::FiveMinute,
            "the 5m tier holds samples, not rollups"
        );
        let sql = format!(
            "SELECT timestamp, station, active_stations, fixed_rate, users, fixed_users
             FROM {} WHERE timestamp >= $1 AND timestamp <= $2 ORDER BY timestamp ASC, id ASC",
            tier.table()
        );
        let rows = sqlx::query(&sql)
            .bind(format_ts(from))
            .bind(format_ts(to))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| match parse_rollup_row(row) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(error = %e, table = tier.table(), "skipping malformed rollup row");
                    None
                }
            })
            .collect())
    }

    /// Last persisted snapshot, keyed by normalized station id.
    #[instrument(skip(self), fields(store = "metric", operation = "previous_snapshot"))]
    pub async fn previous_snapshot(&self) -> anyhow::Result<HashMap<StationId, StationSnapshot>> {
        let rows = sqlx::query(
            "SELECT station_id, station_name, identification_name, connect_status, scan_time, error_start_time
             FROM station_status_current",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in &rows {
            match parse_snapshot_row(row) {
                Ok(s) => {
                    out.insert(s.station_id.clone(), s);
                }
                Err(e) => {
                    tracing::warn!(error = %e, table = "station_status_current", "skipping malformed snapshot row");
                }
            }
        }
        Ok(out)
    }

    /// Replaces the current snapshot, appends every row to history and bumps today's
    /// outage counters, all in one transaction.
    #[instrument(skip(self, snapshot), fields(store = "metric", operation = "persist_snapshot", stations = snapshot.len()))]
    pub async fn persist_snapshot(&self, snapshot: &[StationSnapshot]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM station_status_current")
            .execute(&mut *tx)
            .await?;

        for s in snapshot {
            let scan_time = format_ts(s.scan_time);
            let error_start = s.error_start_time.map(format_ts);

            sqlx::query(
                "INSERT OR REPLACE INTO station_status_current
                 (station_id, station_name, identification_name, connect_status, scan_time, error_start_time)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(s.station_id.as_str())
            .bind(&s.station_name)
            .bind(&s.identification_name)
            .bind(s.connect_status.code())
            .bind(&scan_time)
            .bind(&error_start)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO station_status_history
                 (station_id, station_name, identification_name, connect_status, scan_time, error_start_time)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(s.station_id.as_str())
            .bind(&s.station_name)
            .bind(&s.identification_name)
            .bind(s.connect_status.code())
            .bind(&scan_time)
            .bind(&error_start)
            .execute(&mut *tx)
            .await?;

            if s.connect_status.is_error() {
                let (offline, no_data) = match s.connect_status {
                    ConnectStatus::Offline => (1_i64, 0_i64),
                    _ => (0, 1),
                };
                sqlx::query(
                    r#"
                    INSERT INTO station_status_daily
                    (date, station_id, station_name, identification_name, offline_count, no_data_count)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT(date, station_id) DO UPDATE SET
                        station_name = excluded.station_name,
                        identification_name = excluded.identification_name,
                        offline_count = offline_count + excluded.offline_count,
                        no_data_count = no_data_count + excluded.no_data_count
                    "#,
                )
                .bind(s.scan_time.date().format(DATE_FORMAT).to_string())
                .bind(s.station_id.as_str())
                .bind(&s.station_name)
                .bind(&s.identification_name)
                .bind(offline)
                .bind(no_data)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// History rows for one station, newest first.
    pub async fn station_history(
        &self,
        station_id: &StationId,
        limit: u32,
    ) -> anyhow::Result<Vec<StationSnapshot>> {
        let rows = sqlx::query(
            "SELECT station_id, station_name, identification_name, connect_status, scan_time, error_start_time
             FROM station_status_history WHERE station_id = $1 ORDER BY id DESC LIMIT $2",
        )
        .bind(station_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| match parse_snapshot_row(row) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(error = %e, table = "station_status_history", "skipping malformed snapshot row");
                    None
                }
            })
            .collect())
    }

    /// Outage counters recorded for `date`, ordered by station name.
    pub async fn daily_counts(&self, date: NaiveDate) -> anyhow::Result<Vec<DailyStatusCount>> {
        let rows = sqlx::query(
            "SELECT date, station_id, station_name, offline_count, no_data_count
             FROM station_status_daily WHERE date = $1 ORDER BY station_name ASC",
        )
        .bind(date.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let date: String = row.try_get("date")?;
            let station_id: String = row.try_get("station_id")?;
            out.push(DailyStatusCount {
                date: NaiveDate::parse_from_str(&date, DATE_FORMAT)?,
                station_id: StationId::normalize(&station_id),
                station_name: row.try_get("station_name")?,
                offline_count: row.try_get("offline_count")?,
                no_data_count: row.try_get("no_data_count")?,
            });
        }
        Ok(out)
    }

    /// Delete 5-min samples older than `cutoff`.
    #[instrument(skip(self), fields(store = "metric", operation = "prune_samples_before"))]
    pub async fn prune_samples_before(&self, cutoff: NaiveDateTime) -> anyhow::Result<u64> {
        let r = sqlx::query("DELETE FROM fixed_rate_5m WHERE timestamp < $1")
            .bind(format_ts(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Delete station history older than `cutoff`.
    #[instrument(skip(self), fields(store = "metric", operation = "prune_history_before"))]
    pub async fn prune_history_before(&self, cutoff: NaiveDateTime) -> anyhow::Result<u64> {
        let r = sqlx::query("DELETE FROM station_status_history WHERE scan_time < $1")
            .bind(format_ts(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Delete rows older than `cutoff` from every aged table, in one transaction.
    #[instrument(skip(self), fields(store = "metric", operation = "cleanup_before"))]
    pub async fn cleanup_before(&self, cutoff: NaiveDateTime) -> anyhow::Result<CleanupSummary> {
        let mut tx = self.pool.begin().await?;
        let mut summary = CleanupSummary::default();
        for (table, column) in schema::RETAINED {
            let bound = if column == "date" {
                cutoff.date().format(DATE_FORMAT).to_string()
            } else {
                format_ts(cutoff)
            };
            let sql = format!("DELETE FROM {table} WHERE {column} < $1");
            let r = sqlx::query(&sql).bind(bound).execute(&mut *tx).await?;
            summary.deleted.insert(table.to_string(), r.rows_affected());
        }
        tx.commit().await?;
        Ok(summary)
    }

    /// Reclaim space after deletes (run after the daily cleanup).
    #[instrument(skip(self), fields(store = "metric", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(store = "metric", operation = "stats"))]
    pub async fn stats(&self) -> anyhow::Result<StoreStats> {
        let mut stats = StoreStats::default();
        for table in schema::TABLES {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            let count = sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await?;
            stats.tables.insert(table.to_string(), count);
        }
        if let Ok(meta) = std::fs::metadata(&self.path) {
            let mb = meta.len() as f64 / (1024.0 * 1024.0);
            stats.file_size_mb = (mb * 100.0).round() / 100.0;
        }
        Ok(stats)
    }
}

fn parse_sample_row(row: &SqliteRow) -> anyhow::Result<RateSample> {
    let timestamp: String = row.try_get("timestamp")?;
    let users: i64 = row.try_get("users")?;
    let fixed_users: i64 = row.try_get("fixed_users")?;
    Ok(RateSample {
        timestamp: parse_ts(&timestamp)
            .ok_or_else(|| anyhow::anyhow!("bad timestamp {:?}", timestamp))?,
        station: row.try_get("station")?,
        fixed_rate: row.try_get("fixed_rate")?,
        users: u32::try_from(users)?,
        fixed_users: u32::try_from(fixed_users)?,
    })
}

fn parse_rollup_row(row: &SqliteRow) -> anyhow::Result<RateRollup> {
    let timestamp: String = row.try_get("timestamp")?;
    Ok(RateRollup {
        timestamp: parse_ts(&timestamp)
            .ok_or_else(|| anyhow::anyhow!("bad timestamp {:?}", timestamp))?,
        station: row.try_get("station")?,
        active_stations: row.try_get("active_stations")?,
        fixed_rate: row.try_get("fixed_rate")?,
        users: row.try_get("users")?,
        fixed_users: row.try_get("fixed_users")?,
    })
}

fn parse_snapshot_row(row: &SqliteRow) -> anyhow::Result<StationSnapshot> {
    let station_id: String = row.try_get("station_id")?;
    let code: i64 = row.try_get("connect_status")?;
    let scan_time: String = row.try_get("scan_time")?;
    let error_start: Option<String> = row.try_get("error_start_time")?;
    let identification_name: Option<String> = row.try_get("identification_name")?;
    Ok(StationSnapshot {
        station_id: StationId::normalize(&station_id),
        station_name: row.try_get("station_name")?,
        identification_name: identification_name.unwrap_or_default(),
        connect_status: ConnectStatus::from_code(code)
            .ok_or_else(|| anyhow::anyhow!("unknown connect_status {}", code))?,
        scan_time: parse_ts(&scan_time)
            .ok_or_else(|| anyhow::anyhow!("bad scan_time {:?}", scan_time))?,
        // Unparsable start reads as unknown; the station still diffs, with "N/A" downtime.
        error_start_time: error_start
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .and_then(parse_ts),
    })
}
