//! Scripted provider that never touches the network.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use genjob::provider::{GenerationProvider, ProviderError, StatusPayload};
use genjob::{GenerationKind, GenerationRequest};

type StatusResponse = Result<StatusPayload, ProviderError>;

/// Hands out job ids on submit and replays a script of status responses
/// per job. The last scripted response repeats forever; unscripted jobs
/// report `processing`.
#[derive(Default)]
pub struct FakeProvider {
    job_ids: Mutex<VecDeque<String>>,
    submit_error: Mutex<Option<ProviderError>>,
    scripts: Mutex<HashMap<String, VecDeque<StatusResponse>>>,
    submitted: Mutex<Vec<GenerationRequest>>,
    submit_calls: AtomicUsize,
    status_calls: Mutex<HashMap<String, usize>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the id returned by the next submit.
    pub fn with_job_id(self, job_id: &str) -> Self {
        self.job_ids.lock().unwrap().push_back(job_id.to_string());
        self
    }

    pub fn with_submit_error(self, error: ProviderError) -> Self {
        *self.submit_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_script(self, job_id: &str, responses: Vec<StatusResponse>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(job_id.to_string(), responses.into());
        self
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self, job_id: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn submitted(&self) -> Vec<GenerationRequest> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for FakeProvider {
    async fn submit(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let call = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.submitted.lock().unwrap().push(request.clone());

        if let Some(error) = self.submit_error.lock().unwrap().clone() {
            return Err(error);
        }

        let next = self.job_ids.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| format!("job-{}", call)))
    }

    async fn status(
        &self,
        _kind: GenerationKind,
        job_id: &str,
    ) -> Result<StatusPayload, ProviderError> {
        *self
            .status_calls
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_insert(0) += 1;

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(job_id) {
            Some(script) if script.len() > 1 => script
                .pop_front()
                .unwrap_or_else(|| Ok(StatusPayload::new("processing"))),
            Some(script) => script
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(StatusPayload::new("processing"))),
            None => Ok(StatusPayload::new("processing")),
        }
    }
}
