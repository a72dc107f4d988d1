//! Generation tracker.
//!
//! Ties the pieces together: validates and submits requests, starts one
//! poll loop per accepted job, routes push messages, and records finished
//! generations in the recent-generations history.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::TrackerConfig;
use crate::error::{GenJobError, Result};
use crate::events::JobEvent;
use crate::history::RecentGenerations;
use crate::job::{GenerationJob, GenerationKind, JobStatus, JobUpdate, Transition};
use crate::materializer::GenerationResult;
use crate::notify::{Notification, Notifier};
use crate::poller::{JobPoller, PollExit, UpdateSink};
use crate::provider::{GenerationProvider, HttpProvider, ProviderError};
use crate::push::{PushAction, PushListener, PushMessage};
use crate::request::GenerationRequest;
use crate::store::{JobQuery, JobStats, JobStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Tracker lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

struct ActivePoll {
    /// Distinguishes this poll task from an earlier one for the same job id.
    poll_id: u64,
    cancel: CancellationToken,
    wake: Arc<Notify>,
}

/// State shared between the tracker, its poll tasks and the push listener.
struct TrackerState {
    store: JobStore,
    history: Mutex<RecentGenerations>,
    notifier: Notifier,
    active: Mutex<HashMap<String, ActivePoll>>,
    next_poll_id: AtomicU64,
}

impl TrackerState {
    fn new(history_capacity: usize) -> Self {
        Self {
            store: JobStore::default(),
            history: Mutex::new(RecentGenerations::new(history_capacity)),
            notifier: Notifier::default(),
            active: Mutex::new(HashMap::new()),
            next_poll_id: AtomicU64::new(0),
        }
    }

    fn record(&self, update: JobUpdate) -> Option<(Transition, GenerationJob)> {
        let (transition, job) = self.store.apply(update)?;
        if transition == Transition::Completed {
            self.on_completed(&job);
        }
        Some((transition, job))
    }

    /// Runs once per job: terminal jobs ignore every later update.
    fn on_completed(&self, job: &GenerationJob) {
        match job.status {
            JobStatus::Succeeded => {
                if let Some(result) = &job.result {
                    lock(&self.history).push(result.clone());
                }
                info!("{} job {} succeeded", job.kind, job.job_id);
                self.notifier
                    .info(Some(&job.job_id), &format!("{} ready", job.kind.label()));
            }
            JobStatus::Failed => {
                let message = job.error.as_deref().unwrap_or("Generation failed");
                self.notifier.error(Some(&job.job_id), message);
            }
            JobStatus::Pending | JobStatus::Processing => {}
        }
    }

    fn handle_push(&self, message: &PushMessage) -> Transition {
        match message.action() {
            PushAction::Apply(update) => {
                let job_id = update.job_id.clone();
                match self.record(update) {
                    Some((transition, _)) => {
                        if transition == Transition::Completed {
                            // Let the poller notice right away instead of after its next wait
                            self.wake(&job_id);
                        }
                        transition
                    }
                    None => {
                        debug!("Ignoring push message for unknown job {}", job_id);
                        Transition::Ignored
                    }
                }
            }
            PushAction::Wake(job_id) => {
                if !self.wake(&job_id) {
                    debug!("No active poller for pushed job {}", job_id);
                }
                Transition::Ignored
            }
        }
    }

    fn wake(&self, job_id: &str) -> bool {
        match lock(&self.active).get(job_id) {
            Some(active) => {
                active.wake.notify_one();
                true
            }
            None => false,
        }
    }

    /// Cleans up after a poll task. Only the task that still owns the job's
    /// active entry may touch the store, and a cancelled task never removes
    /// a job that already reached a terminal state.
    fn finish(&self, job_id: &str, poll_id: u64, exit: PollExit) {
        {
            let mut active = lock(&self.active);
            if !active.get(job_id).is_some_and(|entry| entry.poll_id == poll_id) {
                debug!("Poll task for job {} no longer owns it", job_id);
                return;
            }
            active.remove(job_id);
        }
        if exit == PollExit::Cancelled && self.store.remove_unfinished(job_id).is_some() {
            debug!("Dropped cancelled job {}", job_id);
        }
    }
}

impl UpdateSink for TrackerState {
    fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.store.status(job_id)
    }

    fn apply(&self, update: JobUpdate) -> Option<Transition> {
        self.record(update).map(|(transition, _)| transition)
    }
}

/// Submits generation requests and follows each job to completion.
///
/// Every accepted job gets its own poll task. Jobs are independent: there
/// is no shared rate limit and no cap on concurrent jobs.
pub struct GenerationTracker {
    provider: Arc<dyn GenerationProvider>,
    state: Arc<TrackerState>,
    config: TrackerConfig,
    shutdown: CancellationToken,
}

impl GenerationTracker {
    pub fn new(provider: Arc<dyn GenerationProvider>, config: TrackerConfig) -> Self {
        Self {
            provider,
            state: Arc::new(TrackerState::new(config.history_capacity)),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Builds a tracker that talks to the relay over HTTP.
    pub fn from_config(config: TrackerConfig) -> Result<Self> {
        let api_token = config.api_token()?;
        let provider = HttpProvider::from_config(&config, api_token)?;
        Ok(Self::new(Arc::new(provider), config))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Validates and submits a request, then starts polling the new job.
    ///
    /// Invalid requests fail before any network call. Every failure also
    /// produces one error notification.
    pub async fn submit(&self, request: GenerationRequest) -> Result<JobHandle> {
        let span = tracing::info_span!("submit", kind = %request.kind);
        self.submit_inner(request).instrument(span).await
    }

    async fn submit_inner(&self, request: GenerationRequest) -> Result<JobHandle> {
        if let Err(e) = request.validate() {
            self.state.notifier.error(None, &e.to_string());
            return Err(e.into());
        }

        let kind = request.kind;
        let job_id = match self.provider.submit(&request).await {
            Ok(job_id) if !job_id.trim().is_empty() => job_id,
            Ok(_) => return Err(self.submission_failed(kind, ProviderError::MissingJobId)),
            Err(e) => return Err(self.submission_failed(kind, e)),
        };

        if !self.state.store.insert(GenerationJob::pending(&job_id, &request)) {
            return Err(self.submission_failed(kind, ProviderError::DuplicateJobId(job_id)));
        }
        info!("Submitted {} generation as job {}", kind, job_id);
        Ok(self.spawn_poller(&job_id, kind))
    }

    fn submission_failed(&self, kind: GenerationKind, error: ProviderError) -> GenJobError {
        self.state.notifier.error(
            None,
            &format!("Failed to start {} generation: {}", kind, error),
        );
        GenJobError::Submission(error)
    }

    fn spawn_poller(&self, job_id: &str, kind: GenerationKind) -> JobHandle {
        let cancel = self.shutdown.child_token();
        let wake = Arc::new(Notify::new());
        let poll_id = self.state.next_poll_id.fetch_add(1, Ordering::Relaxed);

        lock(&self.state.active).insert(
            job_id.to_string(),
            ActivePoll {
                poll_id,
                cancel: cancel.clone(),
                wake: Arc::clone(&wake),
            },
        );

        let poller = JobPoller::new(
            Arc::clone(&self.provider),
            self.state.clone(),
            self.config.poll_policy(kind),
            job_id,
            kind,
        )
        .with_cancellation(cancel.clone())
        .with_wake(wake);

        let state = Arc::clone(&self.state);
        let task_job_id = job_id.to_string();
        let span = tracing::info_span!("poll", job_id = %job_id, kind = %kind);
        let task = tokio::spawn(
            async move {
                let exit = poller.run().await;
                state.finish(&task_job_id, poll_id, exit);
                exit
            }
            .instrument(span),
        );

        JobHandle {
            job_id: job_id.to_string(),
            kind,
            cancel,
            task: Some(task),
            state: Arc::clone(&self.state),
            detached: false,
        }
    }

    /// Routes one push message through the job's transition function.
    pub fn handle_push(&self, message: &PushMessage) -> Transition {
        self.state.handle_push(message)
    }

    /// Starts the push listener if it is enabled in the configuration.
    pub fn start_push(&self) -> Result<Option<JoinHandle<()>>> {
        if !self.config.push.enabled {
            debug!("Push channel disabled, relying on polling");
            return Ok(None);
        }

        let listener = PushListener::new(
            self.config.push_url()?,
            Duration::from_secs(self.config.push.reconnect_delay_secs),
        );
        let cancel = self.shutdown.child_token();
        let state = Arc::clone(&self.state);

        Ok(Some(tokio::spawn(async move {
            listener
                .run(cancel, |message| {
                    state.handle_push(&message);
                })
                .await;
            debug!("Push listener stopped");
        })))
    }

    /// Stops polling a job and forgets it. Returns whether it was tracked.
    pub fn cancel(&self, job_id: &str) -> bool {
        let active = lock(&self.state.active).remove(job_id);
        if let Some(active) = &active {
            active.cancel.cancel();
        }
        let removed = self.state.store.remove(job_id).is_some();
        if removed {
            info!("Cancelled job {}", job_id);
        }
        active.is_some() || removed
    }

    /// Forgets finished jobs whose poll task has already stopped.
    ///
    /// Jobs stay in the store after they finish so late readers can still
    /// fetch them; a long-lived tracker calls this to keep the store small.
    /// The recent-generations history is not affected.
    pub fn prune_finished(&self) -> usize {
        let active = lock(&self.state.active);
        let removed = self
            .state
            .store
            .prune_finished(|job_id| active.contains_key(job_id));
        if removed > 0 {
            debug!("Pruned {} finished jobs", removed);
        }
        removed
    }

    /// Cancels every poll loop and the push listener.
    pub fn shutdown(&self) {
        info!("Shutting down generation tracker");
        self.shutdown.cancel();
    }

    pub fn job(&self, job_id: &str) -> Option<GenerationJob> {
        self.state.store.get(job_id)
    }

    /// All tracked jobs, newest first.
    pub fn jobs(&self) -> Vec<GenerationJob> {
        self.state.store.list()
    }

    pub fn query(&self, query: &JobQuery) -> Vec<GenerationJob> {
        self.state.store.query(query)
    }

    /// Recent successful generations, newest first.
    pub fn recent(&self) -> Vec<GenerationResult> {
        lock(&self.state.history).to_vec()
    }

    pub fn latest(&self) -> Option<GenerationResult> {
        lock(&self.state.history).latest().cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.state.store.events().subscribe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.state.notifier.subscribe()
    }

    pub fn stats(&self) -> JobStats {
        self.state.store.stats()
    }

    pub fn active_count(&self) -> usize {
        self.state.store.active_count()
    }
}

impl Drop for GenerationTracker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Handle to one submitted job.
///
/// Dropping the handle cancels the job's polling unless it was detached.
pub struct JobHandle {
    job_id: String,
    kind: GenerationKind,
    cancel: CancellationToken,
    task: Option<JoinHandle<PollExit>>,
    state: Arc<TrackerState>,
    detached: bool,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn kind(&self) -> GenerationKind {
        self.kind
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for polling to stop and returns the final job.
    ///
    /// Returns `None` if the job was cancelled first.
    pub async fn wait(mut self) -> Option<GenerationJob> {
        let task = self.task.take()?;
        let exit = match task.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!("Poll task for job {} ended abnormally: {}", self.job_id, e);
                PollExit::Cancelled
            }
        };
        self.detached = true;

        match exit {
            PollExit::Cancelled => None,
            PollExit::Terminal(_) | PollExit::AlreadyTerminal => self.state.store.get(&self.job_id),
        }
    }

    /// Lets polling continue after the handle is dropped.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Outcome;
    use futures_util::FutureExt;

    fn state() -> TrackerState {
        TrackerState::new(3)
    }

    fn register(state: &TrackerState, job_id: &str, poll_id: u64) -> Arc<Notify> {
        let wake = Arc::new(Notify::new());
        lock(&state.active).insert(
            job_id.to_string(),
            ActivePoll {
                poll_id,
                cancel: CancellationToken::new(),
                wake: Arc::clone(&wake),
            },
        );
        wake
    }

    fn insert_job(state: &TrackerState, job_id: &str) {
        let request = GenerationRequest::new(GenerationKind::Image, "a red bicycle").client("c1");
        state.store.insert(GenerationJob::pending(job_id, &request));
    }

    #[test]
    fn test_history_recorded_once() {
        let state = state();
        insert_job(&state, "job-1");
        let result = GenerationResult::new(GenerationKind::Image, "https://x/1.png");

        let first = state.record(JobUpdate::from_poll("job-1", Outcome::Succeeded(result.clone())));
        let second = state.record(JobUpdate::from_poll("job-1", Outcome::Succeeded(result)));

        assert_eq!(first.unwrap().0, Transition::Completed);
        assert_eq!(second.unwrap().0, Transition::Ignored);
        assert_eq!(lock(&state.history).len(), 1);
    }

    #[test]
    fn test_failure_notifies_once() {
        let state = state();
        let mut rx = state.notifier.subscribe();
        insert_job(&state, "job-1");

        state.handle_push(&PushMessage::new("job-1", "failed").with_error("NSFW"));
        state.handle_push(&PushMessage::new("job-1", "failed").with_error("NSFW"));

        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.message, "NSFW");
        assert!(rx.try_recv().is_err());
        assert!(lock(&state.history).is_empty());
    }

    #[test]
    fn test_push_for_unknown_job_is_ignored() {
        let state = state();
        let transition = state.handle_push(&PushMessage::new("ghost", "processing"));
        assert_eq!(transition, Transition::Ignored);
    }

    #[test]
    fn test_pushed_success_wakes_poller() {
        let state = state();
        insert_job(&state, "job-1");
        let wake = register(&state, "job-1", 0);

        let transition = state.handle_push(&PushMessage::new("job-1", "succeeded"));

        assert_eq!(transition, Transition::Ignored);
        assert_eq!(state.store.status("job-1"), Some(JobStatus::Pending));
        assert!(wake.notified().now_or_never().is_some());
    }

    #[test]
    fn test_finish_drops_cancelled_jobs_only() {
        let state = state();
        insert_job(&state, "job-1");
        insert_job(&state, "job-2");
        register(&state, "job-1", 0);
        register(&state, "job-2", 1);

        state.finish("job-1", 0, PollExit::Cancelled);
        state.finish("job-2", 1, PollExit::AlreadyTerminal);

        assert!(!state.store.contains("job-1"));
        assert!(state.store.contains("job-2"));
        assert!(lock(&state.active).is_empty());
    }

    #[test]
    fn test_finish_keeps_terminal_job_when_cancelled() {
        let state = state();
        insert_job(&state, "job-1");
        register(&state, "job-1", 0);
        state.handle_push(&PushMessage::new("job-1", "failed").with_error("quota"));

        state.finish("job-1", 0, PollExit::Cancelled);

        assert_eq!(state.store.status("job-1"), Some(JobStatus::Failed));
    }

    #[test]
    fn test_superseded_poll_leaves_new_job_alone() {
        let state = state();
        insert_job(&state, "job-1");
        register(&state, "job-1", 7);

        state.finish("job-1", 3, PollExit::Cancelled);

        assert!(state.store.contains("job-1"));
        assert!(lock(&state.active).contains_key("job-1"));
    }
}
