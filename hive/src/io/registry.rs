//! Registry of active workers (`.hive/workers.json`).

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, instrument};

use crate::core::types::{RegistryDoc, WorkerRecord};
use crate::io::store::JsonStore;

/// Multi-process safe handle to the worker registry.
#[derive(Debug, Clone)]
pub struct Registry {
    store: JsonStore,
}

impl Registry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Create an empty registry file, replacing any existing content.
    pub fn reset(&self) -> Result<()> {
        self.store.write(&RegistryDoc {
            workers: Vec::new(),
            last_updated: Some(Utc::now()),
        })
    }

    /// Insert or replace the record with the same worker id.
    #[instrument(skip_all, fields(worker = %record.id, task = %record.current_task))]
    pub fn register(&self, record: WorkerRecord) -> Result<()> {
        self.store.update(|doc: &mut RegistryDoc| {
            doc.workers.retain(|w| w.id != record.id);
            doc.workers.push(record);
            doc.last_updated = Some(Utc::now());
        })?;
        debug!("worker registered");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn unregister(&self, worker_id: &str) -> Result<()> {
        self.store.update(|doc: &mut RegistryDoc| {
            doc.workers.retain(|w| w.id != worker_id);
            doc.last_updated = Some(Utc::now());
        })?;
        debug!("worker unregistered");
        Ok(())
    }

    /// Refresh the heartbeat of `worker_id`. Returns false if no such record exists.
    pub fn touch(&self, worker_id: &str) -> Result<bool> {
        self.store.update(|doc: &mut RegistryDoc| {
            let now = Utc::now();
            match doc.workers.iter_mut().find(|w| w.id == worker_id) {
                Some(worker) => {
                    worker.last_activity = now;
                    doc.last_updated = Some(now);
                    true
                }
                None => false,
            }
        })
    }

    pub fn list(&self) -> Result<Vec<WorkerRecord>> {
        Ok(self.store.read::<RegistryDoc>()?.workers)
    }

    pub fn get(&self, worker_id: &str) -> Result<Option<WorkerRecord>> {
        Ok(self.list()?.into_iter().find(|w| w.id == worker_id))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::TimeDelta;

    use super::*;

    fn record(id: &str, task: &str) -> WorkerRecord {
        let started = Utc::now() - TimeDelta::seconds(60);
        WorkerRecord {
            id: id.to_string(),
            pid: 4242,
            tmux_session: format!("hive-{id}-{task}"),
            worktree: PathBuf::from(format!("/repo/worktrees/{id}-{task}")),
            current_task: task.to_string(),
            started_at: started,
            last_activity: started,
        }
    }

    #[test]
    fn register_then_list_returns_identical_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(temp.path().join("workers.json"));
        let r = record("worker-1", "hive-a");

        registry.register(r.clone()).expect("register");
        let listed = registry.list().expect("list");
        assert_eq!(listed, vec![r]);
    }

    #[test]
    fn register_upserts_by_worker_id() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(temp.path().join("workers.json"));

        registry.register(record("worker-1", "hive-a")).expect("register");
        registry.register(record("worker-1", "hive-b")).expect("register");
        let listed = registry.list().expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].current_task, "hive-b");
    }

    #[test]
    fn unregister_removes_only_that_worker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(temp.path().join("workers.json"));
        registry.register(record("worker-1", "a")).expect("register");
        registry.register(record("worker-2", "b")).expect("register");

        registry.unregister("worker-1").expect("unregister");
        let ids: Vec<String> = registry
            .list()
            .expect("list")
            .into_iter()
            .map(|w| w.id)
            .collect();
        assert_eq!(ids, vec!["worker-2".to_string()]);
        assert!(registry.get("worker-1").expect("get").is_none());
    }

    #[test]
    fn touch_updates_heartbeat_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(temp.path().join("workers.json"));
        let original = record("worker-1", "a");
        registry.register(original.clone()).expect("register");

        assert!(registry.touch("worker-1").expect("touch"));
        let touched = registry.get("worker-1").expect("get").expect("present");
        assert!(touched.last_activity > original.last_activity);
        assert_eq!(touched.started_at, original.started_at);
        assert_eq!(touched.current_task, original.current_task);
    }

    #[test]
    fn touch_missing_worker_is_noop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(temp.path().join("workers.json"));
        assert!(!registry.touch("ghost").expect("touch"));
        assert!(registry.list().expect("list").is_empty());
    }

    #[test]
    fn invalid_json_is_treated_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("workers.json");
        fs::write(&path, "garbage").expect("write");
        let registry = Registry::new(&path);
        assert!(registry.list().expect("list").is_empty());
    }

    #[test]
    fn reset_writes_empty_document() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("workers.json");
        let registry = Registry::new(&path);
        registry.register(record("worker-1", "a")).expect("register");
        registry.reset().expect("reset");

        let raw = fs::read_to_string(&path).expect("read");
        let doc: RegistryDoc = serde_json::from_str(&raw).expect("parse");
        assert!(doc.workers.is_empty());
        assert!(doc.last_updated.is_some());
    }
}
