// Table layout. Timestamps are local wall-clock text ("%Y-%m-%d %H:%M:%S") so lexical order
// is time order; numeric columns are REAL on every tier.

use sqlx::SqlitePool;

pub(super) const TABLES: [&str; 6] = [
    "fixed_rate_5m",
    "fixed_rate_15m",
    "fixed_rate_hourly",
    "station_status_current",
    "station_status_history",
    "station_status_daily",
];

/// Tables swept by the full cleanup, with the column compared against the cutoff.
/// The current-snapshot table is rewritten every scan and never aged out.
pub(super) const RETAINED: [(&str, &str); 5] = [
    ("fixed_rate_5m", "timestamp"),
    ("fixed_rate_15m", "timestamp"),
    ("fixed_rate_hourly", "timestamp"),
    ("station_status_history", "scan_time"),
    ("station_status_daily", "date"),
];

pub(super) async fn init_tables(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fixed_rate_5m (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            station TEXT NOT NULL,
            fixed_rate REAL NOT NULL,
            users INTEGER NOT NULL,
            fixed_users INTEGER NOT NULL,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    for (table, unique) in [
        ("fixed_rate_15m", ""),
        ("fixed_rate_hourly", ",\n            UNIQUE(timestamp, station)"),
    ] {
        let sql = format!(
            r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            station TEXT NOT NULL,
            active_stations REAL,
            fixed_rate REAL NOT NULL,
            users REAL NOT NULL,
            fixed_users REAL NOT NULL,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP{unique}
        )
        "#
        );
        sqlx::query(&sql).execute(pool).await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS station_status_current (
            station_id TEXT PRIMARY KEY,
            station_name TEXT NOT NULL,
            identification_name TEXT,
            connect_status INTEGER NOT NULL,
            scan_time TEXT NOT NULL,
            error_start_time TEXT,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS station_status_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            station_id TEXT NOT NULL,
            station_name TEXT NOT NULL,
            identification_name TEXT,
            connect_status INTEGER NOT NULL,
            scan_time TEXT NOT NULL,
            error_start_time TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS station_status_daily (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            station_id TEXT NOT NULL,
            station_name TEXT NOT NULL,
            identification_name TEXT,
            offline_count INTEGER NOT NULL DEFAULT 0,
            no_data_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(date, station_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_fixed_rate_5m_timestamp ON fixed_rate_5m(timestamp)",
        "CREATE INDEX IF NOT EXISTS idx_fixed_rate_5m_station ON fixed_rate_5m(station)",
        "CREATE INDEX IF NOT EXISTS idx_fixed_rate_15m_timestamp ON fixed_rate_15m(timestamp)",
        "CREATE INDEX IF NOT EXISTS idx_station_status_history_scan_time ON station_status_history(scan_time)",
        "CREATE INDEX IF NOT EXISTS idx_station_status_history_station ON station_status_history(station_id)",
    ] {
        sqlx::query(index).execute(pool).await?;
    }

    Ok(())
}
