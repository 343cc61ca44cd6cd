// Snapshot-diff result: classified station lists plus summary counts.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// A station in the fixed / still-erroring lists with how long it has been (or was) down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub label: String,
    /// `None` when the outage start is unknown.
    #[serde(with = "downtime_secs")]
    pub downtime: Option<TimeDelta>,
}

impl ChangeEntry {
    pub fn downtime_display(&self) -> String {
        match self.downtime {
            Some(d) => crate::report::format_downtime(d),
            None => "N/A".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub total: usize,
    pub online: usize,
    pub no_data: usize,
    pub offline: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeReport {
    pub new_problems: Vec<String>,
    pub fixed_stations: Vec<ChangeEntry>,
    pub still_problems: Vec<ChangeEntry>,
    pub counts: StatusCounts,
}

impl ChangeReport {
    /// New outages or recoveries; still-erroring stations alone are not a change.
    pub fn has_changes(&self) -> bool {
        !self.new_problems.is_empty() || !self.fixed_stations.is_empty()
    }
}

mod downtime_secs {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<TimeDelta>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&d.num_seconds()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<TimeDelta>, D::Error> {
        Ok(Option::<i64>::deserialize(d)?.map(TimeDelta::seconds))
    }
}
