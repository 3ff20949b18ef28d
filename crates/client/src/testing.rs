// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Scripted in-memory transport for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use protocol::{Generation, JobStatus, SubmitRequest, SubmitResponse, WorkerEntry};

use crate::error::TransportError;
use crate::transport::HordeTransport;

pub(crate) struct FakeTransport {
    workers: Option<Vec<WorkerEntry>>,
    submit: SubmitResponse,
    statuses: Mutex<VecDeque<JobStatus>>,
    status_delay: Duration,
    failing_polls: AtomicUsize,
    pub worker_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub last_submit: Mutex<Option<SubmitRequest>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            workers: Some(Vec::new()),
            submit: SubmitResponse {
                id: Some("job-1".to_string()),
                ..SubmitResponse::default()
            },
            statuses: Mutex::new(VecDeque::new()),
            status_delay: Duration::ZERO,
            failing_polls: AtomicUsize::new(0),
            worker_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            last_submit: Mutex::new(None),
        }
    }

    /// one worker per name, each advertising that model first.
    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.workers = Some(
            models
                .iter()
                .enumerate()
                .map(|(i, m)| WorkerEntry {
                    id: Some(format!("w{i}")),
                    name: Some(format!("worker-{i}")),
                    models: vec![m.to_string()],
                })
                .collect(),
        );
        self
    }

    pub fn with_workers(mut self, workers: Vec<WorkerEntry>) -> Self {
        self.workers = Some(workers);
        self
    }

    /// the workers endpoint answers with something that is not a list.
    pub fn with_malformed_workers(mut self) -> Self {
        self.workers = None;
        self
    }

    pub fn with_submit(mut self, reply: SubmitResponse) -> Self {
        self.submit = reply;
        self
    }

    pub fn with_statuses(self, statuses: Vec<JobStatus>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    pub fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    /// the first `n` status checks fail at the http layer.
    pub fn with_failing_polls(self, n: usize) -> Self {
        self.failing_polls.store(n, Ordering::SeqCst);
        self
    }

    pub fn submitted(&self) -> Option<SubmitRequest> {
        self.last_submit.lock().unwrap().clone()
    }
}

pub(crate) fn done(texts: &[(&str, &str)], kudos: f64) -> JobStatus {
    JobStatus {
        done: true,
        generations: texts
            .iter()
            .map(|(text, model)| Generation {
                text: text.to_string(),
                model: model.to_string(),
                worker_id: None,
                worker_name: None,
            })
            .collect(),
        kudos,
        ..JobStatus::default()
    }
}

pub(crate) fn pending() -> JobStatus {
    JobStatus {
        queue_position: Some(3),
        wait_time: Some(20),
        ..JobStatus::default()
    }
}

fn malformed(body: &str) -> TransportError {
    TransportError::Malformed {
        status: 200,
        reason: "expected a sequence".to_string(),
        body: body.to_string(),
    }
}

#[async_trait]
impl HordeTransport for FakeTransport {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, TransportError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_submit.lock().unwrap() = Some(request.clone());
        Ok(self.submit.clone())
    }

    async fn status(&self, _id: &str) -> Result<JobStatus, TransportError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if !self.status_delay.is_zero() {
            tokio::time::sleep(self.status_delay).await;
        }
        let failing = self.failing_polls.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_polls.store(failing - 1, Ordering::SeqCst);
            return Err(malformed("<html>502 Bad Gateway</html>"));
        }
        let mut statuses = self.statuses.lock().unwrap();
        Ok(statuses.pop_front().unwrap_or_default())
    }

    async fn workers(&self) -> Result<Vec<WorkerEntry>, TransportError> {
        self.worker_calls.fetch_add(1, Ordering::SeqCst);
        self.workers
            .clone()
            .ok_or_else(|| malformed(r#"{"message": "internal error"}"#))
    }
}
