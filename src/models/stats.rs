// Store maintenance results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Row count per table plus on-disk size.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub tables: BTreeMap<String, i64>,
    pub file_size_mb: f64,
}

/// Rows deleted per table by a retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub deleted: BTreeMap<String, u64>,
}

impl CleanupSummary {
    pub fn total(&self) -> u64 {
        self.deleted.values().sum()
    }
}
