//! Periodic pipeline scheduler
//!
//! Runs consolidation, the blindspot report and domain sync on fixed
//! intervals inside the server process. Each job is its own tokio task; a
//! failing run is logged and the job keeps its schedule.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::knowledge::KnowledgeBase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Consolidate, then rebuild the lookup from the fresh staging rows
    ConsolidateThenSync,
    Consolidate,
    Blindspot,
    Sync,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConsolidateThenSync => "consolidate+sync",
            Self::Consolidate => "consolidate",
            Self::Blindspot => "blindspot",
            Self::Sync => "sync",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJob {
    pub kind: JobKind,
    pub period: Duration,
}

impl ScheduledJob {
    pub fn new(kind: JobKind, period: Duration) -> Self {
        Self { kind, period }
    }
}

/// Result of the most recent run of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastRun {
    pub ok: bool,
    pub summary: String,
    pub runs: u64,
}

pub struct TaskScheduler {
    kb: Arc<KnowledgeBase>,
    jobs: Vec<ScheduledJob>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    last_runs: Arc<RwLock<HashMap<JobKind, LastRun>>>,
}

impl TaskScheduler {
    pub fn new(kb: Arc<KnowledgeBase>, jobs: Vec<ScheduledJob>) -> Self {
        Self {
            kb,
            jobs,
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            last_runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Spawn one loop per job. The first run of each job happens one full
    /// period after start.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            tracing::warn!("Scheduler already started");
            return;
        }
        for job in &self.jobs {
            handles.push(tokio::spawn(run_loop(
                self.kb.clone(),
                job.clone(),
                self.cancel.clone(),
                self.last_runs.clone(),
            )));
            tracing::info!(job = %job.kind, period_secs = job.period.as_secs(), "Scheduled job");
        }
        tracing::info!(jobs = self.jobs.len(), "Scheduler started");
    }

    /// Stop all loops. A run already in progress completes first.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Scheduled job panicked");
            }
        }
        tracing::info!("Scheduler stopped");
    }

    pub async fn last_run(&self, kind: JobKind) -> Option<LastRun> {
        self.last_runs.read().await.get(&kind).cloned()
    }
}

async fn run_loop(
    kb: Arc<KnowledgeBase>,
    job: ScheduledJob,
    cancel: CancellationToken,
    last_runs: Arc<RwLock<HashMap<JobKind, LastRun>>>,
) {
    let mut ticker = tokio::time::interval(job.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let (ok, summary) = run_once(&kb, job.kind).await;
                let mut last = last_runs.write().await;
                let runs = last.get(&job.kind).map_or(0, |r| r.runs) + 1;
                last.insert(job.kind, LastRun { ok, summary, runs });
            }
        }
    }
    tracing::debug!(job = %job.kind, "Job loop exited");
}

/// Execute one job and return `(ok, summary)`.
pub async fn run_once(kb: &KnowledgeBase, kind: JobKind) -> (bool, String) {
    let result = match kind {
        JobKind::Consolidate => kb.consolidate().await.map(|r| r.summary),
        JobKind::Blindspot => Ok(kb.blindspot_report().await.summary),
        JobKind::Sync => kb.sync_domains().await.map(|r| r.summary().to_string()),
        JobKind::ConsolidateThenSync => match kb.consolidate().await {
            Ok(consolidated) => kb
                .sync_domains()
                .await
                .map(|synced| format!("{}; {}", consolidated.summary, synced.summary())),
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(summary) => {
            tracing::info!(job = %kind, %summary, "Scheduled run finished");
            (true, summary)
        }
        Err(e) => {
            tracing::error!(job = %kind, error = %e, "Scheduled run failed");
            (false, e.public_message())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::EpisodicRecord;
    use crate::store::{DocumentStore, Family, InMemoryStore, StoreOp};

    fn kb_with_store() -> (Arc<KnowledgeBase>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (Arc::new(KnowledgeBase::new(store.clone())), store)
    }

    async fn seed_episode(store: &InMemoryStore) {
        let ep = EpisodicRecord::new("pool exhausted", "database", 0.9, vec![]);
        store
            .index(Family::Episodic, serde_json::to_value(&ep).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_run_after_one_period() {
        let (kb, _store) = kb_with_store();
        let scheduler = TaskScheduler::new(
            kb,
            vec![ScheduledJob::new(JobKind::Blindspot, Duration::from_secs(60))],
        );
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(scheduler.last_run(JobKind::Blindspot).await.is_none());

        tokio::time::sleep(Duration::from_secs(35)).await;
        let last = scheduler.last_run(JobKind::Blindspot).await.unwrap();
        assert!(last.ok);
        assert_eq!(last.runs, 1);
        assert!(last.summary.starts_with("VOID 0"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(scheduler.last_run(JobKind::Blindspot).await.unwrap().runs, 2);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_keeps_schedule() {
        let (kb, store) = kb_with_store();
        seed_episode(&store).await;
        store.fail_on_family(StoreOp::Search, Family::Episodic).await;

        let scheduler = TaskScheduler::new(
            kb,
            vec![ScheduledJob::new(JobKind::Consolidate, Duration::from_secs(10))],
        );
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(11)).await;
        let last = scheduler.last_run(JobKind::Consolidate).await.unwrap();
        assert!(!last.ok);
        assert_eq!(last.summary, "store unavailable");

        store.clear_faults().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        let last = scheduler.last_run(JobKind::Consolidate).await.unwrap();
        assert!(last.ok);
        assert_eq!(last.runs, 2);
        assert!(last.summary.starts_with("Consolidated 1 episodes"));

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_loops() {
        let (kb, _store) = kb_with_store();
        let scheduler = TaskScheduler::new(
            kb,
            vec![
                ScheduledJob::new(JobKind::Sync, Duration::from_secs(5)),
                ScheduledJob::new(JobKind::Blindspot, Duration::from_secs(5)),
            ],
        );
        scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        scheduler.stop().await;

        let runs = scheduler.last_run(JobKind::Sync).await.unwrap().runs;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(scheduler.last_run(JobKind::Sync).await.unwrap().runs, runs);
    }

    #[tokio::test]
    async fn test_consolidate_then_sync_fills_lookup() {
        let (kb, store) = kb_with_store();
        seed_episode(&store).await;

        let (ok, summary) = run_once(&kb, JobKind::ConsolidateThenSync).await;
        assert!(ok);
        assert!(summary.contains("Sync complete: 1 domains"));
        assert_eq!(store.count(Family::DomainLookup).await, 1);
    }

    #[test]
    fn test_job_kind_display() {
        assert_eq!(JobKind::ConsolidateThenSync.to_string(), "consolidate+sync");
        assert_eq!(JobKind::Blindspot.to_string(), "blindspot");
    }
}
