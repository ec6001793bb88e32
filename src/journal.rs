//! Per-target journal
//!
//! Remembers, for each (host, home, project, environment) target, the
//! observed state projected after its last run and that run's report.
//! Facts that cannot be queried (installed requirements, an owed nginx
//! reload) are only known from here.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use declarative::{ObservedState, RunReport};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::operation::Operation;
use crate::profile::ValidatedProfile;

/// What the journal knows about one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Human-readable target, for whoever opens the file
    #[serde(default)]
    pub target: String,

    /// Operation of the last recorded run
    pub last_operation: Option<String>,

    /// Last time the entry was written
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(default)]
    pub observed: ObservedState,
}

/// Directory of journal entries, one pair of files per target
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    /// Journal under the state directory
    pub fn open() -> Result<Self> {
        Ok(Self::at(crate::paths::state_dir()?.join("journal")))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Stable file stem for a target
    pub fn key(profile: &ValidatedProfile) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [
            profile.host.as_str(),
            profile.home.as_str(),
            profile.project_name.as_str(),
            profile.environment.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().as_str()[..16].to_string()
    }

    fn state_file(&self, profile: &ValidatedProfile) -> PathBuf {
        self.dir.join(format!("{}.toml", Self::key(profile)))
    }

    fn report_file(&self, profile: &ValidatedProfile) -> PathBuf {
        self.dir.join(format!("{}.last-run.json", Self::key(profile)))
    }

    /// Load the entry for a target, or an empty one if there is none
    pub fn load(&self, profile: &ValidatedProfile) -> Result<JournalEntry> {
        let path = self.state_file(profile);
        if !path.exists() {
            log::debug!("No journal entry at {}", path.display());
            return Ok(JournalEntry::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read journal: {}", path.display()))?;
        let entry: JournalEntry = toml::from_str(&content)
            .with_context(|| format!("Failed to parse journal: {}", path.display()))?;

        log::debug!(
            "Loaded {} remembered fact(s) from {}",
            entry.observed.len(),
            path.display()
        );
        Ok(entry)
    }

    /// Record the state a run left behind
    pub fn record(
        &self,
        profile: &ValidatedProfile,
        operation: Operation,
        observed: &ObservedState,
        report: &RunReport,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create journal directory: {}", self.dir.display()))?;

        let entry = JournalEntry {
            target: format!(
                "{}@{}:{} ({})",
                profile.project_name, profile.host, profile.home, profile.environment
            ),
            last_operation: Some(operation.name().to_string()),
            last_updated: Some(Utc::now()),
            observed: observed.clone(),
        };
        let path = self.state_file(profile);
        let content = toml::to_string_pretty(&entry).context("Failed to serialize journal")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write journal: {}", path.display()))?;

        let report_path = self.report_file(profile);
        let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
        fs::write(&report_path, json)
            .with_context(|| format!("Failed to write run report: {}", report_path.display()))?;

        log::debug!("Saved journal to {}", path.display());
        Ok(())
    }

    /// Report of the last recorded run, if any
    pub fn last_report(&self, profile: &ValidatedProfile) -> Result<Option<RunReport>> {
        let path = self.report_file(profile);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read run report: {}", path.display()))?;
        let report = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse run report: {}", path.display()))?;
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing;
    use declarative::{FailurePolicy, ResourceState};
    use tempfile::TempDir;

    #[test]
    fn test_key_is_stable_per_target() {
        let a = testing::validated();
        let mut b = a.clone();
        assert_eq!(Journal::key(&a), Journal::key(&b));
        assert_eq!(Journal::key(&a).len(), 16);

        b.host = "h2".into();
        assert_ne!(Journal::key(&a), Journal::key(&b));
    }

    #[test]
    fn test_missing_entry_is_empty() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::at(dir.path().join("journal"));
        let entry = journal.load(&testing::validated()).unwrap();
        assert!(entry.observed.is_empty());
        assert!(journal.last_report(&testing::validated()).unwrap().is_none());
    }

    #[test]
    fn test_record_and_reload() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::at(dir.path().join("journal"));
        let profile = testing::validated();

        let mut observed = ObservedState::new();
        observed.set("deps:/srv/app/site", ResourceState::present());
        observed.set("pending-reload:nginx", ResourceState::Absent);
        observed.set(
            "link:/etc/nginx/sites-enabled/site.example.com",
            ResourceState::present_with("/srv/app/site/etc/nginx.conf"),
        );
        let report = RunReport::empty(FailurePolicy::FailFast);

        journal
            .record(&profile, Operation::Bootstrap, &observed, &report)
            .unwrap();

        let entry = journal.load(&profile).unwrap();
        assert_eq!(entry.observed, observed);
        assert_eq!(entry.last_operation.as_deref(), Some("bootstrap"));
        assert!(entry.target.contains("site@h1:/srv/app"));

        let last = journal.last_report(&profile).unwrap().unwrap();
        assert!(last.is_success());
        assert!(last.records().is_empty());
    }

    #[test]
    fn test_corrupt_entry_is_an_error() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::at(dir.path());
        let profile = testing::validated();
        fs::write(journal.state_file(&profile), "observed = 42").unwrap();
        assert!(journal.load(&profile).is_err());
    }
}
