// Plain-text rendering of rollups, diff reports and maintenance results.
// Numbers are f64 with point decimals until the last step; `NumberFormat` decides the separator.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Timelike};

use crate::config::ReportConfig;
use crate::models::{ChangeEntry, ChangeReport, CleanupSummary, RateRollup, StoreStats, WindowSummary};

const DISPLAY_TS: &str = "%d/%m/%Y %H:%M:%S";
const EMPTY_LIST: &str = "None";

/// Display locale for decimal numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NumberFormat {
    pub decimal_comma: bool,
}

impl NumberFormat {
    pub fn percent(self, value: f64) -> String {
        localize(&format_percent(value), self.decimal_comma)
    }

    pub fn count(self, value: f64) -> String {
        localize(&format_count(value), self.decimal_comma)
    }
}

impl From<&ReportConfig> for NumberFormat {
    fn from(cfg: &ReportConfig) -> Self {
        Self {
            decimal_comma: cfg.decimal_comma,
        }
    }
}

/// What a window summary was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject<'a> {
    Station(&'a str),
    Prefix(&'a str),
}

impl<'a> Subject<'a> {
    /// Short or purely alphabetic names are province prefixes ("PYN"), the rest station names ("PYN1").
    pub fn classify(name: &'a str) -> Self {
        let name = name.trim();
        if name.chars().count() <= 3 || name.chars().all(char::is_alphabetic) {
            Self::Prefix(name)
        } else {
            Self::Station(name)
        }
    }

    pub fn default_window_minutes(self) -> u32 {
        match self {
            Self::Station(_) => 10,
            Self::Prefix(_) => 15,
        }
    }
}

pub fn format_percent(value: f64) -> String {
    format!("{value:.2}")
}

pub fn format_count(value: f64) -> String {
    format!("{value:.1}")
}

pub fn localize(formatted: &str, decimal_comma: bool) -> String {
    if decimal_comma {
        formatted.replace('.', ",")
    } else {
        formatted.to_string()
    }
}

/// `H:MM:SS` with hours not wrapped at a day; negative spans render as zero.
pub fn format_downtime(delta: TimeDelta) -> String {
    let total = delta.num_seconds().max(0);
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

pub fn render_status_report(
    report: &ChangeReport,
    prefix: Option<&str>,
    whitelist: &[String],
    now: NaiveDateTime,
) -> String {
    let scope = match prefix {
        Some(p) => format!(" for province {}", p.trim().to_uppercase()),
        None => String::new(),
    };
    let new_problems = bullet_list(report.new_problems.iter().cloned());
    let fixed = bullet_list(report.fixed_stations.iter().map(|e| entry_line(e, "outage")));
    let still = bullet_list(report.still_problems.iter().map(|e| entry_line(e, "down for")));
    let ignored = if whitelist.is_empty() {
        EMPTY_LIST.to_string()
    } else {
        whitelist.join(", ")
    };
    let (overview, total_label) = if prefix.is_some() {
        ("province", "Total stations in province")
    } else {
        ("system", "Total stations")
    };
    let counts = &report.counts;

    format!(
        "Station status report{scope} at {}\n\n\
         1. New problems:\n   - {new_problems}\n\n\
         2. Fixed stations:\n   - {fixed}\n\n\
         3. Still in error (ignored: {ignored}):\n   - {still}\n\n\
         4. Overview ({overview}):\n   \
         - {total_label}: {}\n   \
         - Online: {}\n   \
         - No data: {}\n   \
         - Offline: {}",
        now.format(DISPLAY_TS),
        counts.total,
        counts.online,
        counts.no_data,
        counts.offline,
    )
}

/// Quality report for the latest 15-minute rollup.
pub fn render_fixed_rate(rollup: Option<&RateRollup>, now: NaiveDateTime, fmt: NumberFormat) -> String {
    let Some(r) = rollup else {
        return "No data available for the fixed rate report.".to_string();
    };
    format!(
        "Quality report at {}:\n\
         + Fixed rate: {}%\n\
         + Average users: {}\n\
         + Average fixed users: {}\n\
         + Stations with users: {}",
        now.format(DISPLAY_TS),
        fmt.percent(r.fixed_rate),
        fmt.count(r.users),
        fmt.count(r.fixed_users),
        fmt.count(r.active_stations.unwrap_or(0.0)),
    )
}

pub fn render_window_summary(
    summary: Option<&WindowSummary>,
    subject: Subject<'_>,
    minutes: u32,
    fmt: NumberFormat,
) -> String {
    match (subject, summary) {
        (Subject::Station(name), None) => {
            format!("No data found for station '{name}' in the last {minutes} minutes.")
        }
        (Subject::Prefix(prefix), None) => {
            format!("No station starting with '{prefix}' in the last {minutes} minutes.")
        }
        (Subject::Station(name), Some(s)) => format!(
            "Average fixed rate for station: *{name}*\n\
             - Fixed rate (avg): `{}%`\n\
             - Users (avg): `{}`\n\
             - Fixed users (avg): `{}`\n\
             - Window: last {minutes} minutes",
            fmt.percent(s.fixed_rate),
            fmt.count(s.users),
            fmt.count(s.fixed_users),
        ),
        (Subject::Prefix(prefix), Some(s)) => format!(
            "Average fixed rate for province: *{}*\n\
             - Fixed rate (avg): `{}%`\n\
             - Users (avg per sample): `{}`\n\
             - Fixed users (avg per sample): `{}`\n\
             - Stations with data: `{}`\n\
             - Window: last {minutes} minutes",
            prefix.to_uppercase(),
            fmt.percent(s.fixed_rate),
            fmt.count(s.users),
            fmt.count(s.fixed_users),
            s.stations,
        ),
    }
}

/// One line per hour of `day`, ascending, in a code fence. Rollups from other days are ignored;
/// if an hour appears twice the later row wins.
pub fn render_hourly_table(rollups: &[RateRollup], day: NaiveDate, fmt: NumberFormat) -> String {
    let by_hour: BTreeMap<u32, &RateRollup> = rollups
        .iter()
        .filter(|r| r.timestamp.date() == day)
        .map(|r| (r.timestamp.hour(), r))
        .collect();
    if by_hour.is_empty() {
        return "No hourly data for today.".to_string();
    }

    let header = format!("{:^5} | {:^5} | {:^5} | {:^6}", "Hour", "Users", "Fixed", "Rate");
    let divider = "-".repeat(header.chars().count());
    let mut lines = vec![
        format!("Hourly fixed rate report for {}:", day.format("%Y-%m-%d")),
        String::new(),
        "```".to_string(),
        header,
        divider,
    ];
    for (hour, r) in by_hour {
        lines.push(format!(
            "{:^5} | {:^5} | {:^5} | {:^6}",
            format!("{hour:02}:00"),
            fmt.count(r.users),
            fmt.count(r.fixed_users),
            fmt.percent(r.fixed_rate),
        ));
    }
    lines.push("```".to_string());
    lines.join("\n")
}

pub fn render_whitelist(names: &[String]) -> String {
    if names.is_empty() {
        "The whitelist is empty.".to_string()
    } else {
        format!("Whitelisted stations:\n`{}`", names.join(", "))
    }
}

pub fn render_whitelist_added(added: &[String]) -> String {
    if added.is_empty() {
        "All of those stations are already whitelisted.".to_string()
    } else {
        format!("Added to whitelist: {}", added.join(", "))
    }
}

pub fn render_store_stats(stats: &StoreStats) -> String {
    let width = stats.tables.keys().map(String::len).max().unwrap_or(0);
    let mut lines = vec!["Database statistics:".to_string(), "```".to_string()];
    for (table, count) in &stats.tables {
        lines.push(format!("{table:<width$}  {count}"));
    }
    lines.push(format!("{:<width$}  {:.2} MB", "file size", stats.file_size_mb));
    lines.push("```".to_string());
    lines.join("\n")
}

pub fn render_cleanup(summary: &CleanupSummary, retention_days: u32) -> String {
    let total = summary.total();
    if total == 0 {
        return format!("No rows older than {retention_days} days.");
    }
    let mut lines = vec![format!("Deleted {total} rows older than {retention_days} days:")];
    for (table, count) in summary.deleted.iter().filter(|(_, n)| **n > 0) {
        lines.push(format!("  - {table}: {count}"));
    }
    lines.join("\n")
}

fn entry_line(entry: &ChangeEntry, what: &str) -> String {
    format!("{} - {what}: {}", entry.label, entry.downtime_display())
}

fn bullet_list(items: impl Iterator<Item = String>) -> String {
    let items: Vec<String> = items.collect();
    if items.is_empty() {
        EMPTY_LIST.to_string()
    } else {
        items.join("\n   - ")
    }
}
