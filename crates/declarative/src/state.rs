//! Observed state of a target, as a set of keyed facts
//!
//! A key that was never observed is unknown. Steps check against this
//! state and declare how they change it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::ResourceState;

/// Facts observed on one target, keyed by a stable fact key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    #[serde(default)]
    facts: BTreeMap<String, ResourceState>,
}

impl ObservedState {
    /// An empty state: nothing observed
    pub fn new() -> Self {
        Self::default()
    }

    /// State of a fact; `None` if it was never observed
    pub fn get(&self, key: &str) -> Option<&ResourceState> {
        self.facts.get(key)
    }

    /// Record a fact. Recording `Unknown` forgets the key.
    pub fn set(&mut self, key: impl Into<String>, state: ResourceState) {
        let key = key.into();
        if state == ResourceState::Unknown {
            self.facts.remove(&key);
        } else {
            self.facts.insert(key, state);
        }
    }

    pub fn forget(&mut self, key: &str) {
        self.facts.remove(key);
    }

    /// Mark every known fact whose key matches `predicate` as absent
    pub fn mark_absent_where<F>(&mut self, mut predicate: F)
    where
        F: FnMut(&str) -> bool,
    {
        for (key, state) in &mut self.facts {
            if predicate(key) {
                *state = ResourceState::Absent;
            }
        }
    }

    /// Overlay `other` on top of this state; facts in `other` win
    pub fn merge(&mut self, other: &Self) {
        for (key, state) in &other.facts {
            self.facts.insert(key.clone(), state.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResourceState)> {
        self.facts.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_forgets_key() {
        let mut state = ObservedState::new();
        state.set("user:site", ResourceState::present());
        assert!(state.get("user:site").is_some());

        state.set("user:site", ResourceState::Unknown);
        assert!(state.get("user:site").is_none());
        assert!(state.is_empty());
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut journal = ObservedState::new();
        journal.set("deps:/srv/app/site", ResourceState::present());
        journal.set("user:site", ResourceState::Absent);

        let mut queried = ObservedState::new();
        queried.set("user:site", ResourceState::present());

        journal.merge(&queried);
        assert_eq!(journal.get("user:site"), Some(&ResourceState::present()));
        assert_eq!(
            journal.get("deps:/srv/app/site"),
            Some(&ResourceState::present())
        );
    }

    #[test]
    fn test_mark_absent_where() {
        let mut state = ObservedState::new();
        state.set("dir:/srv/app", ResourceState::present());
        state.set("dir:/srv/app/logs", ResourceState::present());
        state.set("dir:/srv/other", ResourceState::present());

        state.mark_absent_where(|key| key.starts_with("dir:/srv/app"));

        assert_eq!(state.get("dir:/srv/app/logs"), Some(&ResourceState::Absent));
        assert_eq!(state.get("dir:/srv/other"), Some(&ResourceState::present()));
    }
}
