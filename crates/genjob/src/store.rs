//! In-memory job store.
//!
//! Jobs live only as long as the process (or the owning view) does; nothing
//! is persisted.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::events::{JobEvent, JobEventBroadcaster};
use crate::job::{GenerationJob, GenerationKind, JobStatus, JobUpdate, Transition};

/// Filters for job listing.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub kind: Option<GenerationKind>,
    pub client_id: Option<String>,
    pub limit: Option<usize>,
}

/// Job counts per status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl JobStats {
    pub fn active(&self) -> usize {
        self.pending + self.processing
    }

    pub fn total(&self) -> usize {
        self.active() + self.succeeded + self.failed
    }
}

/// Job store keyed by provider job id.
///
/// Uses `std::sync::RwLock`; no lock is held across an await point.
pub struct JobStore {
    jobs: RwLock<HashMap<String, GenerationJob>>,
    events: JobEventBroadcaster,
}

impl JobStore {
    pub fn new(events: JobEventBroadcaster) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, GenerationJob>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, GenerationJob>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Adds a job and announces it.
    ///
    /// Returns `false` and leaves the store untouched if a job with the same
    /// id is already tracked.
    pub fn insert(&self, job: GenerationJob) -> bool {
        let event = JobEvent::from_job(&job);
        match self.write().entry(job.job_id.clone()) {
            Entry::Occupied(_) => {
                log::warn!("Job {} is already tracked", event.job_id);
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(job);
            }
        }
        self.events.send(event);
        true
    }

    /// Runs an update through the job's transition function.
    ///
    /// Returns `None` for unknown jobs, otherwise the transition and the
    /// job as it is afterwards.
    pub fn apply(&self, update: JobUpdate) -> Option<(Transition, GenerationJob)> {
        let (transition, snapshot) = {
            let mut jobs = self.write();
            let job = jobs.get_mut(&update.job_id)?;
            let source = update.source;
            let transition = job.apply(update);
            if !transition.changed() {
                log::debug!(
                    "Ignored {:?} update for job {} in state {}",
                    source,
                    job.job_id,
                    job.status
                );
            }
            (transition, job.clone())
        };

        self.events.publish(&snapshot, transition);
        Some((transition, snapshot))
    }

    pub fn get(&self, job_id: &str) -> Option<GenerationJob> {
        self.read().get(job_id).cloned()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.read().contains_key(job_id)
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.read().get(job_id).map(|job| job.status)
    }

    pub fn is_finished(&self, job_id: &str) -> bool {
        self.read().get(job_id).is_some_and(GenerationJob::is_finished)
    }

    pub fn remove(&self, job_id: &str) -> Option<GenerationJob> {
        self.write().remove(job_id)
    }

    /// Removes a job only while it is still pending or processing.
    pub fn remove_unfinished(&self, job_id: &str) -> Option<GenerationJob> {
        let mut jobs = self.write();
        if jobs.get(job_id).is_some_and(GenerationJob::is_finished) {
            return None;
        }
        jobs.remove(job_id)
    }

    /// Drops finished jobs, except those `keep` asks to hold on to.
    /// Returns how many were removed.
    pub fn prune_finished<F>(&self, keep: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|job_id, job| !job.is_finished() || keep(job_id));
        before - jobs.len()
    }

    /// Returns all jobs, newest submission first.
    pub fn list(&self) -> Vec<GenerationJob> {
        self.query(&JobQuery::default())
    }

    pub fn query(&self, query: &JobQuery) -> Vec<GenerationJob> {
        let mut jobs: Vec<GenerationJob> = self
            .read()
            .values()
            .filter(|job| query.status.map_or(true, |status| job.status == status))
            .filter(|job| query.kind.map_or(true, |kind| job.kind == kind))
            .filter(|job| {
                query
                    .client_id
                    .as_deref()
                    .map_or(true, |client| job.client_id == client)
            })
            .cloned()
            .collect();

        jobs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        if let Some(limit) = query.limit {
            jobs.truncate(limit);
        }
        jobs
    }

    /// Number of jobs still pending or processing.
    pub fn active_count(&self) -> usize {
        self.read()
            .values()
            .filter(|job| !job.status.is_terminal())
            .count()
    }

    pub fn stats(&self) -> JobStats {
        let mut stats = JobStats::default();
        for job in self.read().values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Succeeded => stats.succeeded += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        &self.events
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(JobEventBroadcaster::default())
    }
}
