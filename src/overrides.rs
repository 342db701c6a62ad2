//! Short-lived local overrides for goal completion.
//!
//! The goal feed lags behind toggles by several seconds, so the first
//! snapshots after a local change still report the old state. Entries here
//! substitute the locally requested value until the feed agrees or the entry
//! expires.
//!
//! Entries are keyed by goal title because the feed's toggle contract is
//! title based. Two goals sharing a title share one entry.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::goals::ExternalGoal;

pub const DEFAULT_TTL_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideState {
    /// Toggle issued, waiting for the feed to catch up.
    Pending,
    /// The confirmation window closed without the feed agreeing.
    Unconfirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub desired_completed: bool,
    pub recorded_at: DateTime<Utc>,
    pub state: OverrideState,
}

#[derive(Debug, Clone)]
pub struct OverrideCache {
    ttl: Duration,
    entries: HashMap<String, OverrideEntry>,
}

impl Default for OverrideCache {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TTL_SECS))
    }
}

impl OverrideCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Rebuild a cache from persisted entries.
    pub fn with_entries(ttl: Duration, entries: HashMap<String, OverrideEntry>) -> Self {
        Self { ttl, entries }
    }

    pub fn entries(&self) -> &HashMap<String, OverrideEntry> {
        &self.entries
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Remember a local change. Call before the toggle request goes out.
    pub fn record_at(&mut self, title: &str, desired_completed: bool, now: DateTime<Utc>) {
        self.entries.insert(
            title.to_string(),
            OverrideEntry {
                desired_completed,
                recorded_at: now,
                state: OverrideState::Pending,
            },
        );
    }

    /// Mask stale completion values in a fresh snapshot.
    pub fn apply_at(&mut self, goals: &[ExternalGoal], now: DateTime<Utc>) -> Vec<ExternalGoal> {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now - entry.recorded_at <= ttl);

        goals
            .iter()
            .map(|goal| {
                let desired = self.entries.get(&goal.title).map(|e| e.desired_completed);
                match desired {
                    Some(desired) if desired == goal.completed => {
                        self.entries.remove(&goal.title);
                        goal.clone()
                    }
                    Some(desired) => ExternalGoal {
                        completed: desired,
                        ..goal.clone()
                    },
                    None => goal.clone(),
                }
            })
            .collect()
    }

    /// Whether the feed already reports what was asked for.
    pub fn is_confirmed_by(&self, title: &str, goals: &[ExternalGoal]) -> bool {
        let Some(entry) = self.entries.get(title) else {
            return true;
        };
        goals
            .iter()
            .any(|goal| goal.title == title && goal.completed == entry.desired_completed)
    }

    pub fn mark_unconfirmed(&mut self, title: &str) {
        if let Some(entry) = self.entries.get_mut(title) {
            entry.state = OverrideState::Unconfirmed;
        }
    }

    /// Titles whose last toggle was never observed.
    pub fn unconfirmed(&self) -> Vec<String> {
        let mut titles: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == OverrideState::Unconfirmed)
            .map(|(title, _)| title.clone())
            .collect();
        titles.sort();
        titles
    }

    pub fn get(&self, title: &str) -> Option<&OverrideEntry> {
        self.entries.get(title)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goal(title: &str, completed: bool) -> ExternalGoal {
        ExternalGoal {
            id: title.to_lowercase(),
            title: title.to_string(),
            completed,
            parent_id: None,
        }
    }

    #[test]
    fn stale_snapshot_is_masked() {
        let t0 = Utc::now();
        let mut cache = OverrideCache::default();
        cache.record_at("Ship", true, t0);

        let applied = cache.apply_at(&[goal("Ship", false), goal("Other", false)], t0 + Duration::seconds(5));
        assert!(applied[0].completed);
        assert!(!applied[1].completed);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn agreement_clears_entry() {
        let t0 = Utc::now();
        let mut cache = OverrideCache::default();
        cache.record_at("Ship", true, t0);

        let applied = cache.apply_at(&[goal("Ship", true)], t0 + Duration::seconds(3));
        assert!(applied[0].completed);
        assert!(cache.is_empty());

        // A later stale echo is no longer masked.
        let applied = cache.apply_at(&[goal("Ship", false)], t0 + Duration::seconds(4));
        assert!(!applied[0].completed);
    }

    #[test]
    fn expired_entries_are_dropped_unconditionally() {
        let t0 = Utc::now();
        let mut cache = OverrideCache::default();
        cache.record_at("Ship", true, t0);

        let applied = cache.apply_at(&[goal("Ship", false)], t0 + Duration::seconds(31));
        assert!(!applied[0].completed);
        assert!(cache.is_empty());
    }

    #[test]
    fn unconfirmed_entries_are_listed_until_expiry() {
        let t0 = Utc::now();
        let mut cache = OverrideCache::new(Duration::seconds(10));
        cache.record_at("B", false, t0);
        cache.record_at("A", true, t0);
        cache.mark_unconfirmed("A");
        cache.mark_unconfirmed("missing");
        assert_eq!(cache.unconfirmed(), vec!["A".to_string()]);
        assert!(!cache.is_confirmed_by("A", &[goal("A", false)]));
        assert!(cache.is_confirmed_by("A", &[goal("A", true)]));

        cache.apply_at(&[], t0 + Duration::seconds(11));
        assert!(cache.unconfirmed().is_empty());
    }
}
