//! Run records for turns one session starts on another
//!
//! `sessions_send` registers a run for every message it delivers, so the
//! requesting session can see what it started, what is still in flight and
//! how each run ended. Records can be persisted to a JSON file and are
//! archived some time after they finish.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RunError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Error,
    Timeout,
}

impl RunStatus {
    pub fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ended_at: DateTime<Utc>,
}

impl RunOutcome {
    fn new(status: RunStatus) -> Self {
        Self {
            status,
            result: None,
            error: None,
            ended_at: Utc::now(),
        }
    }

    pub fn completed(result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            ..Self::new(RunStatus::Completed)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(RunStatus::Error)
        }
    }

    pub fn timed_out(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(RunStatus::Timeout)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub child_session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_agent_id: Option<String>,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}

impl RunRecord {
    pub fn status(&self) -> RunStatus {
        match (&self.outcome, self.started_at) {
            (Some(outcome), _) => outcome.status,
            (None, Some(_)) => RunStatus::Running,
            (None, None) => RunStatus::Pending,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status().is_final()
    }

    /// Wall time from start to end, once both are known
    pub fn duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let ended = self.outcome.as_ref()?.ended_at;
        (ended - started).to_std().ok()
    }
}

/// What the caller knows when it starts a run
#[derive(Debug, Clone, Default)]
pub struct NewRun {
    pub child_session_id: String,
    pub requester_session_id: Option<String>,
    pub requester_agent_id: Option<String>,
    pub task: String,
    pub label: Option<String>,
    /// Falls back to the registry default
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RunRegistryConfig {
    /// JSON file the records are mirrored to; `None` keeps them in memory
    pub persist_path: Option<PathBuf>,
    pub default_timeout: Duration,
    /// How long a finished run is kept before the sweeper drops it
    pub archive_after: Duration,
    pub sweep_interval: Duration,
}

impl Default for RunRegistryConfig {
    fn default() -> Self {
        Self {
            persist_path: None,
            default_timeout: Duration::from_secs(10 * 60),
            archive_after: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub by_status: BTreeMap<RunStatus, usize>,
    /// Active runs per requesting session
    pub active_by_requester: BTreeMap<String, usize>,
}

struct Inner {
    config: RunRegistryConfig,
    runs: RwLock<HashMap<String, RunRecord>>,
}

/// Shared registry of session runs
#[derive(Clone)]
pub struct RunRegistry {
    inner: Arc<Inner>,
}

impl RunRegistry {
    /// Create a registry, loading any records already persisted
    pub fn new(config: RunRegistryConfig) -> Self {
        let runs = config
            .persist_path
            .as_deref()
            .map(restore)
            .unwrap_or_default();
        Self {
            inner: Arc::new(Inner {
                config,
                runs: RwLock::new(runs),
            }),
        }
    }

    pub fn register(&self, run: NewRun) -> RunRecord {
        let now = Utc::now();
        let record = RunRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            child_session_id: run.child_session_id,
            requester_session_id: run.requester_session_id,
            requester_agent_id: run.requester_agent_id,
            task: run.task,
            label: run.label,
            created_at: now,
            started_at: None,
            timeout: Some(run.timeout.unwrap_or(self.inner.config.default_timeout)),
            archive_at: None,
            outcome: None,
        };
        debug!(
            "Registered run {} on session {}",
            record.run_id, record.child_session_id
        );
        let mut runs = self.inner.runs.write();
        runs.insert(record.run_id.clone(), record.clone());
        self.persist(&runs);
        record
    }

    pub fn start(&self, run_id: &str) -> Result<(), RunError> {
        let mut runs = self.inner.runs.write();
        let record = runs
            .get_mut(run_id)
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))?;
        if record.is_complete() {
            return Err(RunError::AlreadyFinished(run_id.to_string()));
        }
        record.started_at = Some(Utc::now());
        self.persist(&runs);
        Ok(())
    }

    /// Record how a run ended. A run finishes once; later outcomes are refused.
    pub fn complete(&self, run_id: &str, outcome: RunOutcome) -> Result<RunRecord, RunError> {
        let mut runs = self.inner.runs.write();
        let record = runs
            .get_mut(run_id)
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))?;
        if record.is_complete() {
            return Err(RunError::AlreadyFinished(run_id.to_string()));
        }
        record.archive_at = archive_time(outcome.ended_at, self.inner.config.archive_after);
        record.outcome = Some(outcome);
        info!(
            "Run {} on session {} finished: {:?}",
            run_id,
            record.child_session_id,
            record.status()
        );
        let finished = record.clone();
        self.persist(&runs);
        Ok(finished)
    }

    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        self.inner.runs.read().get(run_id).cloned()
    }

    /// Runs started by one session, oldest first
    pub fn list_for_requester(&self, session_id: &str) -> Vec<RunRecord> {
        sorted(
            self.inner
                .runs
                .read()
                .values()
                .filter(|r| r.requester_session_id.as_deref() == Some(session_id))
                .cloned(),
        )
    }

    /// Runs that have not finished, oldest first
    pub fn list_active(&self) -> Vec<RunRecord> {
        sorted(
            self.inner
                .runs
                .read()
                .values()
                .filter(|r| !r.is_complete())
                .cloned(),
        )
    }

    pub fn remove(&self, run_id: &str) -> Option<RunRecord> {
        let mut runs = self.inner.runs.write();
        let removed = runs.remove(run_id);
        if removed.is_some() {
            self.persist(&runs);
        }
        removed
    }

    /// Mark started runs past their timeout as timed out. Returns how many.
    pub fn check_timeouts(&self) -> usize {
        let now = Utc::now();
        let archive_after = self.inner.config.archive_after;
        let mut runs = self.inner.runs.write();
        let mut expired = 0;
        for record in runs.values_mut() {
            if record.is_complete() {
                continue;
            }
            let (Some(started), Some(timeout)) = (record.started_at, record.timeout) else {
                continue;
            };
            let overdue = chrono::Duration::from_std(timeout)
                .ok()
                .and_then(|t| started.checked_add_signed(t))
                .is_some_and(|deadline| now > deadline);
            if overdue {
                warn!("Run {} timed out after {:?}", record.run_id, timeout);
                record.archive_at = archive_time(now, archive_after);
                record.outcome = Some(RunOutcome {
                    ended_at: now,
                    ..RunOutcome::timed_out(format!("run exceeded {}s", timeout.as_secs()))
                });
                expired += 1;
            }
        }
        if expired > 0 {
            self.persist(&runs);
        }
        expired
    }

    /// Drop finished runs whose archive time has passed. Returns how many.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut runs = self.inner.runs.write();
        let before = runs.len();
        runs.retain(|_, r| !(r.is_complete() && r.archive_at.is_some_and(|at| at <= now)));
        let dropped = before - runs.len();
        if dropped > 0 {
            debug!("Archived {} finished run(s)", dropped);
            self.persist(&runs);
        }
        dropped
    }

    pub fn stats(&self) -> RunStats {
        let runs = self.inner.runs.read();
        let mut stats = RunStats {
            total: runs.len(),
            ..Default::default()
        };
        for record in runs.values() {
            *stats.by_status.entry(record.status()).or_default() += 1;
            if record.is_complete() {
                stats.completed += 1;
            } else {
                stats.active += 1;
                if let Some(requester) = &record.requester_session_id {
                    *stats.active_by_requester.entry(requester.clone()).or_default() += 1;
                }
            }
        }
        stats
    }

    /// Expire and archive runs every `sweep_interval` until cancelled
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        let period = self.inner.config.sweep_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Run sweeper stopped");
                        break;
                    }
                    _ = tokio::time::sleep(period) => {}
                }
                registry.check_timeouts();
                registry.sweep();
            }
        })
    }

    fn persist(&self, runs: &HashMap<String, RunRecord>) {
        let Some(path) = &self.inner.config.persist_path else {
            return;
        };
        if let Err(e) = write_atomic(path, runs) {
            warn!("Failed to persist runs to {}: {}", path.display(), e);
        }
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(RunRegistryConfig::default())
    }
}

fn archive_time(ended: DateTime<Utc>, after: Duration) -> Option<DateTime<Utc>> {
    if after.is_zero() {
        return None;
    }
    ended.checked_add_signed(chrono::Duration::from_std(after).ok()?)
}

fn sorted(runs: impl Iterator<Item = RunRecord>) -> Vec<RunRecord> {
    let mut runs: Vec<_> = runs.collect();
    runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.run_id.cmp(&b.run_id)));
    runs
}

fn write_atomic(path: &Path, runs: &HashMap<String, RunRecord>) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(runs)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn restore(path: &Path) -> HashMap<String, RunRecord> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!("Failed to read runs from {}: {}", path.display(), e);
            return HashMap::new();
        }
    };
    match serde_json::from_slice(&data) {
        Ok(runs) => runs,
        Err(e) => {
            warn!("Ignoring unreadable runs file {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run(child: &str, requester: &str) -> NewRun {
        NewRun {
            child_session_id: child.into(),
            requester_session_id: Some(requester.into()),
            task: "summarize the thread".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_lifecycle() {
        let runs = RunRegistry::default();
        let record = runs.register(run("child", "parent"));
        assert_eq!(record.status(), RunStatus::Pending);
        assert_eq!(record.timeout, Some(Duration::from_secs(600)));

        runs.start(&record.run_id).unwrap();
        assert_eq!(runs.get(&record.run_id).unwrap().status(), RunStatus::Running);
        assert_eq!(runs.list_active().len(), 1);

        let finished = runs
            .complete(&record.run_id, RunOutcome::completed("all good"))
            .unwrap();
        assert_eq!(finished.status(), RunStatus::Completed);
        assert!(finished.duration().is_some());
        assert!(finished.archive_at.is_some());
        assert!(runs.list_active().is_empty());

        let err = runs
            .complete(&record.run_id, RunOutcome::failed("late"))
            .unwrap_err();
        assert!(matches!(err, RunError::AlreadyFinished(_)));
        assert!(matches!(runs.start("missing"), Err(RunError::NotFound(_))));
    }

    #[test]
    fn test_list_for_requester() {
        let runs = RunRegistry::default();
        let first = runs.register(run("c1", "parent"));
        runs.register(run("c2", "other"));
        let second = runs.register(run("c3", "parent"));

        let ids: Vec<String> = runs
            .list_for_requester("parent")
            .into_iter()
            .map(|r| r.run_id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.run_id) && ids.contains(&second.run_id));
    }

    #[test]
    fn test_timeouts_only_hit_started_runs() {
        let runs = RunRegistry::default();
        let pending = runs.register(NewRun {
            timeout: Some(Duration::ZERO),
            ..run("c1", "p")
        });
        let started = runs.register(NewRun {
            timeout: Some(Duration::ZERO),
            ..run("c2", "p")
        });
        runs.start(&started.run_id).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(runs.check_timeouts(), 1);
        assert_eq!(runs.get(&started.run_id).unwrap().status(), RunStatus::Timeout);
        assert_eq!(runs.get(&pending.run_id).unwrap().status(), RunStatus::Pending);
        assert_eq!(runs.check_timeouts(), 0);
    }

    #[test]
    fn test_sweep_drops_archived_runs() {
        let runs = RunRegistry::new(RunRegistryConfig {
            archive_after: Duration::from_millis(1),
            ..Default::default()
        });
        let done = runs.register(run("c1", "p"));
        runs.complete(&done.run_id, RunOutcome::failed("boom")).unwrap();
        let open = runs.register(run("c2", "p"));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(runs.sweep(), 1);
        assert!(runs.get(&done.run_id).is_none());
        assert!(runs.get(&open.run_id).is_some());
    }

    #[test]
    fn test_stats() {
        let runs = RunRegistry::default();
        let a = runs.register(run("c1", "p"));
        runs.start(&a.run_id).unwrap();
        let b = runs.register(run("c2", "p"));
        runs.complete(&b.run_id, RunOutcome::completed("ok")).unwrap();
        runs.register(run("c3", "q"));

        let stats = runs.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.by_status[&RunStatus::Running], 1);
        assert_eq!(stats.by_status[&RunStatus::Pending], 1);
        assert_eq!(stats.by_status[&RunStatus::Completed], 1);
        assert_eq!(stats.active_by_requester["p"], 1);
        assert_eq!(stats.active_by_requester["q"], 1);
    }

    #[test]
    fn test_persist_and_restore() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state/runs.json");
        let config = RunRegistryConfig {
            persist_path: Some(path.clone()),
            ..Default::default()
        };

        let runs = RunRegistry::new(config.clone());
        let record = runs.register(NewRun {
            label: Some("digest".into()),
            ..run("child", "parent")
        });
        runs.start(&record.run_id).unwrap();
        assert!(path.exists());

        let restored = RunRegistry::new(config).get(&record.run_id).unwrap();
        assert_eq!(restored.label.as_deref(), Some("digest"));
        assert_eq!(restored.status(), RunStatus::Running);
        assert_eq!(restored.timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_unreadable_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("runs.json");
        std::fs::write(&path, "not json").unwrap();
        let runs = RunRegistry::new(RunRegistryConfig {
            persist_path: Some(path),
            ..Default::default()
        });
        assert_eq!(runs.stats().total, 0);
    }

    #[tokio::test]
    async fn test_sweeper_expires_runs() {
        let runs = RunRegistry::new(RunRegistryConfig {
            sweep_interval: Duration::from_millis(10),
            ..Default::default()
        });
        let record = runs.register(NewRun {
            timeout: Some(Duration::ZERO),
            ..run("c1", "p")
        });
        runs.start(&record.run_id).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let cancel = CancellationToken::new();
        let handle = runs.spawn_sweeper(cancel.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.get(&record.run_id).unwrap().status(), RunStatus::Timeout);

        cancel.cancel();
        handle.await.unwrap();
    }
}
