/// Bounded run history persisted as a JSON array, used to bias planning.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::ExecutionLogEntry;
use crate::planner::Plan;

/// Records kept on disk; older ones are evicted first.
pub const MEMORY_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub goal: String,
    pub plan: Plan,
    pub success: bool,
    #[serde(default)]
    pub log: Vec<ExecutionLogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl MemoryRecord {
    pub fn new(goal: &str, plan: Plan, success: bool, log: Vec<ExecutionLogEntry>) -> Self {
        Self {
            goal: goal.to_string(),
            plan,
            success,
            log,
            recorded_at: Some(Utc::now()),
        }
    }
}

/// Drop the oldest records so at most `capacity` remain.
pub fn retain_recent(records: &mut Vec<MemoryRecord>, capacity: usize) {
    if records.len() > capacity {
        let excess = records.len() - capacity;
        records.drain(..excess);
    }
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absent or unreadable history is treated as empty.
    pub fn load(&self) -> Vec<MemoryRecord> {
        match self.read_records() {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %format!("{err:#}"),
                    "ignoring unreadable run memory"
                );
                Vec::new()
            }
        }
    }

    /// Append `record`, keep the most recent [`MEMORY_CAPACITY`] and rewrite
    /// the file. Failures are logged and reported as `false`.
    pub fn save(&self, record: MemoryRecord) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.load();
        records.push(record);
        retain_recent(&mut records, MEMORY_CAPACITY);
        match self.write_records(&records) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), records = records.len(), "run memory saved");
                true
            }
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %format!("{err:#}"),
                    "failed to save run memory"
                );
                false
            }
        }
    }

    /// Returns whether a memory file existed.
    pub fn clear(&self) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&self.path)
            .with_context(|| format!("failed to remove memory file '{}'", self.path.display()))?;
        Ok(true)
    }

    fn read_records(&self) -> Result<Vec<MemoryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read memory file '{}'", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str::<Vec<MemoryRecord>>(&content)
            .with_context(|| format!("memory file '{}' is not a record array", self.path.display()))
    }

    fn write_records(&self, records: &[MemoryRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create memory directory '{}'", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(records).context("failed to serialize memory")?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write memory file '{}'", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| {
            format!("failed to replace memory file '{}'", self.path.display())
        })
    }
}

pub fn run_memory_show(store: &MemoryStore, verbose: bool) -> Result<()> {
    let records = store.load();
    if records.is_empty() {
        println!("No run memory at '{}'.", store.path().display());
        return Ok(());
    }

    println!(
        "Run memory ({} of {MEMORY_CAPACITY}) at '{}':",
        records.len(),
        store.path().display()
    );
    for (index, record) in records.iter().enumerate().rev() {
        let when = record
            .recorded_at
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "unknown time".to_string());
        let outcome = if record.success { "success" } else { "degraded" };
        println!(
            "{}. [{outcome}] {when} steps={} goal={}",
            index + 1,
            record.plan.len(),
            record.goal
        );
        if verbose {
            for (step_index, step) in record.plan.iter().enumerate() {
                println!(
                    "    {}. {} -> {} ({})",
                    step_index + 1,
                    step.agent,
                    step.capability,
                    step.reasoning
                );
            }
            for entry in record.log.iter().filter(|entry| entry.error.is_some()) {
                println!(
                    "    failed {}.{}: {}",
                    entry.step.agent,
                    entry.step.capability,
                    entry.error.as_deref().unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

pub fn run_memory_clear(store: &MemoryStore, force: bool) -> Result<()> {
    if !force {
        return Err(anyhow::anyhow!(
            "refusing to clear run memory without --force (path: '{}')",
            store.path().display()
        ));
    }
    if store.clear()? {
        println!("Cleared run memory at '{}'.", store.path().display());
    } else {
        println!("No run memory at '{}'.", store.path().display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StepStatus;
    use crate::planner::{Step, fallback_plan};
    use tempfile::tempdir;

    fn record(goal: String, success: bool) -> MemoryRecord {
        MemoryRecord::new(&goal, fallback_plan(), success, Vec::new())
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().expect("temp directory should create");
        let store = MemoryStore::new(dir.path().join("memory.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempdir().expect("temp directory should create");
        let path = dir.path().join("memory.json");
        std::fs::write(&path, "{ definitely not an array").expect("fixture should write");
        let store = MemoryStore::new(&path);
        assert!(store.load().is_empty());

        assert!(store.save(record("after corruption".to_string(), true)));
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn twelve_saves_keep_the_last_ten_in_order() {
        let dir = tempdir().expect("temp directory should create");
        let store = MemoryStore::new(dir.path().join("nested").join("memory.json"));
        for index in 0..12 {
            assert!(store.save(record(format!("goal {index}"), index % 2 == 0)));
        }

        let records = store.load();
        assert_eq!(records.len(), MEMORY_CAPACITY);
        let goals = records.iter().map(|r| r.goal.as_str()).collect::<Vec<_>>();
        let expected = (2..12).map(|i| format!("goal {i}")).collect::<Vec<_>>();
        assert_eq!(goals, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn records_round_trip_with_log_entries() {
        let dir = tempdir().expect("temp directory should create");
        let store = MemoryStore::new(dir.path().join("memory.json"));
        let log = vec![ExecutionLogEntry {
            step: Step::new("Ghost", "fetch_ghosts", "haunt"),
            status: StepStatus::Failed,
            error: Some("agent not found".to_string()),
        }];
        let saved = MemoryRecord::new("goal", fallback_plan(), false, log);
        assert!(store.save(saved.clone()));
        assert_eq!(store.load(), vec![saved]);

        let raw = std::fs::read_to_string(store.path()).expect("memory file should exist");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("memory is json");
        assert_eq!(value[0]["log"][0]["status"], "failed");
        assert_eq!(value[0]["plan"][1]["capability"], "list_github_issues");
    }

    #[test]
    fn records_without_log_or_timestamp_still_load() {
        let dir = tempdir().expect("temp directory should create");
        let path = dir.path().join("memory.json");
        std::fs::write(
            &path,
            r#"[{"goal": "g", "plan": [{"agent": "A", "capability": "fetch_a"}], "success": true}]"#,
        )
        .expect("fixture should write");
        let records = MemoryStore::new(&path).load();
        assert_eq!(records.len(), 1);
        assert!(records[0].log.is_empty());
        assert!(records[0].recorded_at.is_none());
    }

    #[test]
    fn save_into_unwritable_location_reports_failure() {
        let dir = tempdir().expect("temp directory should create");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").expect("fixture should write");
        let store = MemoryStore::new(blocker.join("memory.json"));
        assert!(!store.save(record("goal".to_string(), true)));
    }

    #[test]
    fn clear_requires_force_and_removes_file() {
        let dir = tempdir().expect("temp directory should create");
        let store = MemoryStore::new(dir.path().join("memory.json"));
        assert!(store.save(record("goal".to_string(), true)));

        assert!(run_memory_clear(&store, false).is_err());
        assert!(store.path().exists());
        run_memory_clear(&store, true).expect("clear should succeed");
        assert!(!store.path().exists());
        assert!(!store.clear().expect("second clear should succeed"));
    }
}
