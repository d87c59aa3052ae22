//! In-process stand-in for the remote simulation service.
//!
//! Accepts every submission and finishes each job after a fixed number of
//! polls. Used by the binary's dry-run mode; the `with_*` knobs script the
//! failure paths a real service can produce.

use crate::simulation::client::{ClientFactory, SimulationClient};
use crate::simulation::types::*;
use crate::task::TaskStatus;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Tunables for the dry-run service
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DryRunConfig {
    /// Polls a job answers "running" before it finishes
    pub polls_until_done: u32,
    /// Retry hint returned with submissions and running polls
    pub retry_after: Duration,
    /// Jobs per submission the simulated session may send
    pub max_jobs: usize,
    /// Fraction of simulations that finish with an error status
    pub failure_rate: f64,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            polls_until_done: 2,
            retry_after: Duration::from_millis(500),
            max_jobs: MAX_ELEVATED_JOBS,
            failure_rate: 0.0,
        }
    }
}

/// Per-method call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DryRunCalls {
    pub submit_single: usize,
    pub submit_multi: usize,
    pub poll_single: usize,
    pub poll_multi: usize,
    pub cancel: usize,
    pub fetch_child: usize,
    pub tag_alpha: usize,
    pub close: usize,
}

#[derive(Default)]
struct CallCounters {
    submit_single: AtomicUsize,
    submit_multi: AtomicUsize,
    poll_single: AtomicUsize,
    poll_multi: AtomicUsize,
    cancel: AtomicUsize,
    fetch_child: AtomicUsize,
    tag_alpha: AtomicUsize,
    close: AtomicUsize,
}

struct DryRunJob {
    polls: u32,
    children: Vec<String>,
}

pub struct DryRunClient {
    config: DryRunConfig,
    // 0 stands for an unrecognized operator role
    max_jobs: AtomicUsize,
    jobs: DashMap<String, DryRunJob>,
    calls: CallCounters,
    submit_delay: Duration,
    reject_submissions: bool,
    fail_polls: AtomicBool,
    cancel_succeeds: bool,
    child_count: Option<usize>,
    child_polls_until_done: u32,
    child_polls: DashMap<String, u32>,
    result_status: SimulationResultStatus,
    tag_fails: bool,
}

impl DryRunClient {
    pub fn new(config: DryRunConfig) -> Self {
        let max_jobs = config.max_jobs;
        Self {
            config,
            max_jobs: AtomicUsize::new(max_jobs),
            jobs: DashMap::new(),
            calls: CallCounters::default(),
            submit_delay: Duration::ZERO,
            reject_submissions: false,
            fail_polls: AtomicBool::new(false),
            cancel_succeeds: true,
            child_count: None,
            child_polls_until_done: 0,
            child_polls: DashMap::new(),
            result_status: SimulationResultStatus::Complete,
            tag_fails: false,
        }
    }

    /// Factory handing every worker its own dry-run client
    pub fn factory(config: DryRunConfig) -> ClientFactory {
        Arc::new(move || Arc::new(DryRunClient::new(config.clone())) as Arc<dyn SimulationClient>)
    }

    /// Block inside every submission for `delay`
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn with_rejected_submissions(mut self) -> Self {
        self.reject_submissions = true;
        self
    }

    pub fn with_failing_polls(self) -> Self {
        self.fail_polls.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_cancel_refused(mut self) -> Self {
        self.cancel_succeeds = false;
        self
    }

    /// Report this many children for every multi-job regardless of its size
    pub fn with_child_count(mut self, count: usize) -> Self {
        self.child_count = Some(count);
        self
    }

    /// Children answer "not finished" this many times before resolving
    pub fn with_child_polls(mut self, polls: u32) -> Self {
        self.child_polls_until_done = polls;
        self
    }

    pub fn with_result_status(mut self, status: SimulationResultStatus) -> Self {
        self.result_status = status;
        self
    }

    pub fn with_failing_tags(mut self) -> Self {
        self.tag_fails = true;
        self
    }

    /// Change the session capability; `None` simulates an unrecognized role
    pub fn set_capability(&self, capability: Option<SubmissionCapability>) {
        let max_jobs = capability.map_or(0, |c| c.max_jobs);
        self.max_jobs.store(max_jobs, Ordering::SeqCst);
    }

    pub fn set_failing_polls(&self, failing: bool) {
        self.fail_polls.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> DryRunCalls {
        let c = &self.calls;
        DryRunCalls {
            submit_single: c.submit_single.load(Ordering::SeqCst),
            submit_multi: c.submit_multi.load(Ordering::SeqCst),
            poll_single: c.poll_single.load(Ordering::SeqCst),
            poll_multi: c.poll_multi.load(Ordering::SeqCst),
            cancel: c.cancel.load(Ordering::SeqCst),
            fetch_child: c.fetch_child.load(Ordering::SeqCst),
            tag_alpha: c.tag_alpha.load(Ordering::SeqCst),
            close: c.close.load(Ordering::SeqCst),
        }
    }

    /// Jobs submitted and not yet finished or cancelled
    pub fn open_jobs(&self) -> usize {
        self.jobs.len()
    }

    async fn accept(&self, children: usize) -> SubmitOutcome {
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        if self.reject_submissions {
            return SubmitOutcome::rejected();
        }

        let progress_id = format!("dry-{}", Uuid::new_v4());
        let children = (0..children)
            .map(|i| format!("{}-child-{}", progress_id, i))
            .collect();
        self.jobs.insert(
            progress_id.clone(),
            DryRunJob { polls: 0, children },
        );
        debug!("Dry-run accepted job {}", progress_id);
        SubmitOutcome::accepted(progress_id, self.config.retry_after)
    }

    /// Count one poll; returns the job's children once it is done
    fn advance(&self, progress_id: &str) -> Result<Option<Vec<String>>, SimulationError> {
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(SimulationError::Network(format!(
                "connection reset while polling {}",
                progress_id
            )));
        }

        let mut job = self
            .jobs
            .get_mut(progress_id)
            .ok_or_else(|| SimulationError::NotFound(progress_id.to_string()))?;
        job.polls += 1;
        if job.polls < self.config.polls_until_done {
            return Ok(None);
        }

        let children = job.children.clone();
        drop(job);
        self.jobs.remove(progress_id);
        Ok(Some(children))
    }

    fn running<T>(&self, progress_id: &str) -> PollOutcome<T> {
        let polls = self.jobs.get(progress_id).map_or(0, |job| job.polls);
        PollOutcome::Running {
            progress: Some(polls as f64 / self.config.polls_until_done.max(1) as f64),
            retry_after: self.config.retry_after,
        }
    }

    fn finished_result(&self, id: &str, parent: Option<&str>) -> SimulationResult {
        let status = if self.config.failure_rate > 0.0 && rand::random::<f64>() < self.config.failure_rate
        {
            SimulationResultStatus::Error
        } else {
            self.result_status
        };

        let alpha = (status.task_status() == TaskStatus::Complete)
            .then(|| format!("alpha-{}", &Uuid::new_v4().simple().to_string()[..8]));

        SimulationResult {
            id: id.to_string(),
            status,
            alpha,
            message: (status != SimulationResultStatus::Complete)
                .then(|| format!("dry-run simulation finished with {:?}", status)),
            parent: parent.map(str::to_string),
            regular: None,
            settings: None,
        }
    }
}

impl Default for DryRunClient {
    fn default() -> Self {
        Self::new(DryRunConfig::default())
    }
}

#[async_trait::async_trait]
impl SimulationClient for DryRunClient {
    async fn submit_single(
        &self,
        _request: &SimulationRequest,
    ) -> Result<SubmitOutcome, SimulationError> {
        self.calls.submit_single.fetch_add(1, Ordering::SeqCst);
        Ok(self.accept(0).await)
    }

    async fn submit_multi(
        &self,
        requests: &[SimulationRequest],
    ) -> Result<SubmitOutcome, SimulationError> {
        self.calls.submit_multi.fetch_add(1, Ordering::SeqCst);
        if requests.len() > self.max_jobs.load(Ordering::SeqCst) {
            return Err(SimulationError::InvalidRequest(format!(
                "{} jobs exceed the session limit",
                requests.len()
            )));
        }
        let children = self.child_count.unwrap_or(requests.len());
        Ok(self.accept(children).await)
    }

    async fn poll_single(
        &self,
        progress_id: &str,
    ) -> Result<PollOutcome<SimulationResult>, SimulationError> {
        self.calls.poll_single.fetch_add(1, Ordering::SeqCst);
        match self.advance(progress_id)? {
            Some(_) => Ok(PollOutcome::Finished(
                self.finished_result(progress_id, None),
            )),
            None => Ok(self.running(progress_id)),
        }
    }

    async fn poll_multi(
        &self,
        progress_id: &str,
    ) -> Result<PollOutcome<MultiSimulationResult>, SimulationError> {
        self.calls.poll_multi.fetch_add(1, Ordering::SeqCst);
        match self.advance(progress_id)? {
            Some(children) => Ok(PollOutcome::Finished(MultiSimulationResult {
                children,
                status: SimulationResultStatus::Complete,
            })),
            None => Ok(self.running(progress_id)),
        }
    }

    async fn cancel(&self, progress_id: &str) -> Result<bool, SimulationError> {
        self.calls.cancel.fetch_add(1, Ordering::SeqCst);
        if !self.cancel_succeeds {
            return Ok(false);
        }
        Ok(self.jobs.remove(progress_id).is_some())
    }

    async fn fetch_child_result(
        &self,
        child_progress_id: &str,
    ) -> Result<(bool, SimulationResult), SimulationError> {
        self.calls.fetch_child.fetch_add(1, Ordering::SeqCst);

        let mut polls = self.child_polls.entry(child_progress_id.to_string()).or_insert(0);
        *polls += 1;
        let finished = *polls > self.child_polls_until_done;
        drop(polls);

        let parent = child_progress_id
            .rsplit_once("-child-")
            .map(|(parent, _)| parent);
        Ok((finished, self.finished_result(child_progress_id, parent)))
    }

    async fn tag_alpha(&self, alpha_id: &str, _tags: &[String]) -> Result<(), SimulationError> {
        self.calls.tag_alpha.fetch_add(1, Ordering::SeqCst);
        if self.tag_fails {
            return Err(SimulationError::Unknown(format!(
                "tagging {} rejected",
                alpha_id
            )));
        }
        Ok(())
    }

    fn submission_capability(&self) -> Option<SubmissionCapability> {
        match self.max_jobs.load(Ordering::SeqCst) {
            0 => None,
            max_jobs => Some(SubmissionCapability::new(max_jobs)),
        }
    }

    async fn close(&self) -> Result<(), SimulationError> {
        self.calls.close.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
