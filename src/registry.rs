//! Concurrent job store.
//!
//! Backed by a sharded [`DashMap`], so reads and writes of one job only
//! contend with other jobs hashed to the same shard. Every update runs under
//! the entry's lock, which makes multi-field transitions atomic for readers:
//! a poll never sees a result attached while the status still says
//! `processing`. Readers always get owned snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::job::{Job, JobId};

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<JobId, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    pub fn insert(&self, job: Job) {
        self.jobs.insert(job.id, job);
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every job, keyed by id.
    pub fn list(&self) -> BTreeMap<JobId, Job> {
        self.jobs
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Apply `f` to one job while holding its entry lock.
    ///
    /// Returns `None` when the job is unknown.
    pub fn update<T, F>(&self, id: &JobId, f: F) -> Option<T>
    where
        F: FnOnce(&mut Job) -> T,
    {
        self.jobs.get_mut(id).map(|mut entry| f(entry.value_mut()))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drop terminal jobs that finished before `cutoff`. Active jobs stay.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.finished_at.is_some_and(|at| at < cutoff))
        });
        before.saturating_sub(self.jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::transcript::OutputFormat;

    fn queued() -> Job {
        Job::new(JobId::new(), "https://video.example/abc", OutputFormat::Text, None)
    }

    #[test]
    fn get_returns_a_detached_snapshot() {
        let registry = JobRegistry::new();
        let job = queued();
        let id = job.id;
        registry.insert(job);

        let mut snapshot = registry.get(&id).unwrap();
        snapshot.progress = 77;
        assert_eq!(registry.get(&id).unwrap().progress, 0);
        assert_eq!(registry.get(&id), registry.get(&id));
    }

    #[test]
    fn update_applies_under_entry_lock() {
        let registry = JobRegistry::new();
        let job = queued();
        let id = job.id;
        registry.insert(job);

        let started = registry.update(&id, |job| job.start()).unwrap();
        assert!(started.is_ok());
        assert_eq!(registry.get(&id).unwrap().status, JobStatus::Processing);
        assert!(registry.update(&JobId::new(), |job| job.start()).is_none());
    }

    #[test]
    fn eviction_only_removes_old_terminal_jobs() {
        let registry = JobRegistry::new();

        let active = queued();
        let active_id = active.id;
        registry.insert(active);

        let mut failed = queued();
        failed.fail("boom").unwrap();
        let failed_id = failed.id;
        registry.insert(failed);

        assert_eq!(registry.evict_finished_before(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(registry.evict_finished_before(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert!(registry.get(&failed_id).is_none());
        assert!(registry.get(&active_id).is_some());
        assert_eq!(registry.len(), 1);

        registry.update(&active_id, |job| job.fail("cancelled")).unwrap().unwrap();
        registry.evict_finished_before(Utc::now() + chrono::Duration::seconds(1));
        assert!(registry.is_empty());
    }
}
