// Station names excluded from alert lists. Seeded from config, grown at runtime, never persisted.

use std::collections::BTreeSet;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct Whitelist {
    names: RwLock<BTreeSet<String>>,
}

impl Whitelist {
    pub fn new<I, S>(seed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = seed
            .into_iter()
            .filter_map(|s| station_key(s.as_ref()))
            .collect();
        Self {
            names: RwLock::new(names),
        }
    }

    /// Case-insensitive match on the station name as reported by the provider.
    pub fn contains(&self, station_name: &str) -> bool {
        station_key(station_name).is_some_and(|name| self.read().contains(&name))
    }

    /// Adds every name of a comma separated list. Returns only the names that were new,
    /// in input order.
    pub fn add_csv(&self, csv: &str) -> Vec<String> {
        let mut names = self.write();
        let mut added = Vec::new();
        for name in csv.split(',').filter_map(station_key) {
            if names.insert(name.clone()) {
                added.push(name);
            }
        }
        added
    }

    /// Sorted copy of the current set.
    pub fn names(&self) -> Vec<String> {
        self.read().iter().cloned().collect()
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.read().clone()
    }

    // A poisoned lock still holds a valid set; keep serving it.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeSet<String>> {
        self.names.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeSet<String>> {
        self.names.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Key form of a station name: trimmed and uppercased. `None` for blank input.
pub fn station_key(raw: &str) -> Option<String> {
    let name = raw.trim();
    (!name.is_empty()).then(|| name.to_uppercase())
}
