use chrono::NaiveTime;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    /// 5-min samples older than this are purged after every 15-min rollup.
    #[serde(default = "default_raw_retention_days")]
    pub raw_retention_days: u32,
    #[serde(default = "default_raw_retention_days")]
    pub history_retention_days: u32,
    /// Horizon of the daily full cleanup (all tables).
    #[serde(default = "default_cleanup_retention_days")]
    pub cleanup_retention_days: u32,
}

fn default_raw_retention_days() -> u32 {
    3
}

fn default_cleanup_retention_days() -> u32 {
    180
}

/// Telemetry provider. Keys fall back to API_ACCESS_KEY / API_SECRET_KEY.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_sign_method")]
    pub sign_method: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry waits 2x this, then 4x, ...
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_key: None,
            secret_key: None,
            sign_method: default_sign_method(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_base_url() -> String {
    "http://rtk.taikhoandodac.vn:8090".into()
}

fn default_sign_method() -> String {
    "HmacSHA256".into()
}

fn default_page_size() -> u32 {
    50
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

/// Outbound webhook. URL falls back to WEBHOOK_URL.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertingConfig {
    /// Seed of the runtime whitelist; additions made at runtime are not written back.
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<String>,
    /// New outages after this time of day are not reported as new.
    #[serde(
        default = "default_evening_cutoff",
        deserialize_with = "deserialize_hhmm"
    )]
    pub evening_cutoff: NaiveTime,
    /// Outages that began yesterday at or before this time are not re-reported.
    #[serde(
        default = "default_carry_over_cutoff",
        deserialize_with = "deserialize_hhmm"
    )]
    pub carry_over_cutoff: NaiveTime,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            whitelist: default_whitelist(),
            evening_cutoff: default_evening_cutoff(),
            carry_over_cutoff: default_carry_over_cutoff(),
        }
    }
}

fn default_whitelist() -> Vec<String> {
    ["PYN1", "PYN3", "PYN4", "PYN5", "HNI1"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_evening_cutoff() -> NaiveTime {
    NaiveTime::from_hms_opt(20, 15, 0).unwrap_or(NaiveTime::MIN)
}

fn default_carry_over_cutoff() -> NaiveTime {
    NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn deserialize_hhmm<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
    let s = String::deserialize(d)?;
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S"))
        .map_err(|e| serde::de::Error::custom(format!("invalid time {:?}: {}", s, e)))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Render decimals with a comma separator.
    #[serde(default = "default_true")]
    pub decimal_comma: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            decimal_comma: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Trigger policy. Cron expressions use local time and carry a seconds field.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_status_check_interval_secs")]
    pub status_check_interval_secs: u64,
    /// Daytime-gated jobs run when start <= hour < end.
    #[serde(default = "default_daytime_start_hour")]
    pub daytime_start_hour: u32,
    #[serde(default = "default_daytime_end_hour")]
    pub daytime_end_hour: u32,
    #[serde(default = "default_aggregate_15m")]
    pub aggregate_15m: Vec<String>,
    #[serde(default = "default_aggregate_hourly")]
    pub aggregate_hourly: Vec<String>,
    #[serde(default = "default_status_report")]
    pub status_report: Vec<String>,
    #[serde(default = "default_fixed_rate_report")]
    pub fixed_rate_report: Vec<String>,
    #[serde(default = "default_daily_report")]
    pub daily_report: Vec<String>,
    #[serde(default = "default_cleanup")]
    pub cleanup: Vec<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            status_check_interval_secs: default_status_check_interval_secs(),
            daytime_start_hour: default_daytime_start_hour(),
            daytime_end_hour: default_daytime_end_hour(),
            aggregate_15m: default_aggregate_15m(),
            aggregate_hourly: default_aggregate_hourly(),
            status_report: default_status_report(),
            fixed_rate_report: default_fixed_rate_report(),
            daily_report: default_daily_report(),
            cleanup: default_cleanup(),
        }
    }
}

fn default_scan_interval_secs() -> u64 {
    139
}

fn default_status_check_interval_secs() -> u64 {
    300
}

fn default_daytime_start_hour() -> u32 {
    6
}

fn default_daytime_end_hour() -> u32 {
    20
}

fn default_aggregate_15m() -> Vec<String> {
    vec!["0 1,16,31,46 * * * *".into()]
}

fn default_aggregate_hourly() -> Vec<String> {
    vec!["0 2 * * * *".into()]
}

fn default_status_report() -> Vec<String> {
    vec!["0 30 6,20 * * *".into()]
}

fn default_fixed_rate_report() -> Vec<String> {
    vec!["0 31 10 * * *".into(), "0 1 16 * * *".into()]
}

fn default_daily_report() -> Vec<String> {
    vec!["0 30 20 * * *".into()]
}

fn default_cleanup() -> Vec<String> {
    vec!["0 0 2 * * *".into()]
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {}", path, e))?;
        Self::load_from_str(&s)
    }

    /// Parse, fill secrets from the environment, and validate (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        Self::load_from_str_with_env(s, |key| std::env::var(key).ok())
    }

    /// Like `load_from_str` with an explicit environment lookup.
    pub fn load_from_str_with_env(
        s: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut config: AppConfig = toml::from_str(s)?;
        config.fill_secrets(env);
        config.validate()?;
        Ok(config)
    }

    fn fill_secrets(&mut self, env: impl Fn(&str) -> Option<String>) {
        if self.api.access_key.is_none() {
            self.api.access_key = env("API_ACCESS_KEY");
        }
        if self.api.secret_key.is_none() {
            self.api.secret_key = env("API_SECRET_KEY");
        }
        if self.notify.webhook_url.is_none() {
            self.notify.webhook_url = env("WEBHOOK_URL");
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.raw_retention_days > 0,
            "database.raw_retention_days must be > 0, got {}",
            self.database.raw_retention_days
        );
        anyhow::ensure!(
            self.database.history_retention_days > 0,
            "database.history_retention_days must be > 0, got {}",
            self.database.history_retention_days
        );
        anyhow::ensure!(
            self.database.cleanup_retention_days > 0,
            "database.cleanup_retention_days must be > 0, got {}",
            self.database.cleanup_retention_days
        );
        anyhow::ensure!(
            !self.api.base_url.is_empty(),
            "api.base_url must be non-empty"
        );
        anyhow::ensure!(
            self.api.access_key.as_deref().is_some_and(|k| !k.is_empty()),
            "api.access_key is missing (set API_ACCESS_KEY)"
        );
        anyhow::ensure!(
            self.api.secret_key.as_deref().is_some_and(|k| !k.is_empty()),
            "api.secret_key is missing (set API_SECRET_KEY)"
        );
        anyhow::ensure!(
            self.notify
                .webhook_url
                .as_deref()
                .is_some_and(|u| !u.is_empty()),
            "notify.webhook_url is missing (set WEBHOOK_URL)"
        );
        anyhow::ensure!(
            self.api.page_size > 0,
            "api.page_size must be > 0, got {}",
            self.api.page_size
        );
        anyhow::ensure!(
            self.api.timeout_secs > 0,
            "api.timeout_secs must be > 0, got {}",
            self.api.timeout_secs
        );
        anyhow::ensure!(
            self.api.max_attempts > 0,
            "api.max_attempts must be > 0, got {}",
            self.api.max_attempts
        );
        anyhow::ensure!(
            self.notify.timeout_secs > 0,
            "notify.timeout_secs must be > 0, got {}",
            self.notify.timeout_secs
        );
        anyhow::ensure!(
            self.schedule.scan_interval_secs > 0,
            "schedule.scan_interval_secs must be > 0, got {}",
            self.schedule.scan_interval_secs
        );
        anyhow::ensure!(
            self.schedule.status_check_interval_secs > 0,
            "schedule.status_check_interval_secs must be > 0, got {}",
            self.schedule.status_check_interval_secs
        );
        anyhow::ensure!(
            self.schedule.daytime_start_hour < self.schedule.daytime_end_hour
                && self.schedule.daytime_end_hour <= 24,
            "schedule.daytime_start_hour/daytime_end_hour must satisfy start < end <= 24, got {}..{}",
            self.schedule.daytime_start_hour,
            self.schedule.daytime_end_hour
        );
        for (name, exprs) in self.schedule.cron_sets() {
            for expr in exprs {
                cron::Schedule::from_str(expr).map_err(|e| {
                    anyhow::anyhow!("schedule.{} has invalid cron {:?}: {}", name, expr, e)
                })?;
            }
        }
        Ok(())
    }
}

impl ScheduleConfig {
    /// Every cron-driven job with its expressions, keyed by config field name.
    pub fn cron_sets(&self) -> [(&'static str, &[String]); 6] {
        [
            ("aggregate_15m", self.aggregate_15m.as_slice()),
            ("aggregate_hourly", self.aggregate_hourly.as_slice()),
            ("status_report", self.status_report.as_slice()),
            ("fixed_rate_report", self.fixed_rate_report.as_slice()),
            ("daily_report", self.daily_report.as_slice()),
            ("cleanup", self.cleanup.as_slice()),
        ]
    }
}
