// Domain models: stations, rate samples/rollups, diff reports, store maintenance.

mod rate;
mod report;
mod station;
mod stats;

pub use rate::{RateRollup, RateSample, Tier, UserConnection, WindowSummary, ALL_STATIONS_LABEL};
pub use report::{ChangeEntry, ChangeReport, StatusCounts};
pub use station::{ConnectStatus, DailyStatusCount, StationId, StationReading, StationSnapshot};
pub use stats::{CleanupSummary, StoreStats};
