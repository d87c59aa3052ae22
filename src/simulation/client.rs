use crate::simulation::types::*;
use std::sync::Arc;

/// Remote simulation service as seen by a worker.
///
/// Implementations own authentication, session refresh and rate-limit
/// backoff; callers only honour the `retry_after` hints they return.
#[async_trait::async_trait]
pub trait SimulationClient: Send + Sync {
    async fn submit_single(
        &self,
        request: &SimulationRequest,
    ) -> Result<SubmitOutcome, SimulationError>;

    async fn submit_multi(
        &self,
        requests: &[SimulationRequest],
    ) -> Result<SubmitOutcome, SimulationError>;

    async fn poll_single(
        &self,
        progress_id: &str,
    ) -> Result<PollOutcome<SimulationResult>, SimulationError>;

    async fn poll_multi(
        &self,
        progress_id: &str,
    ) -> Result<PollOutcome<MultiSimulationResult>, SimulationError>;

    /// Ask the service to drop a job; `Ok(false)` when it refused
    async fn cancel(&self, progress_id: &str) -> Result<bool, SimulationError>;

    /// Result of one multi-job child, `(finished, result)`
    async fn fetch_child_result(
        &self,
        child_progress_id: &str,
    ) -> Result<(bool, SimulationResult), SimulationError>;

    /// Attach tags to a finished alpha
    async fn tag_alpha(&self, alpha_id: &str, tags: &[String]) -> Result<(), SimulationError>;

    /// Capability of the current session; `None` when the operator role is not recognized
    fn submission_capability(&self) -> Option<SubmissionCapability>;

    /// Release the session
    async fn close(&self) -> Result<(), SimulationError> {
        Ok(())
    }
}

/// Builds one client per worker
pub type ClientFactory = Arc<dyn Fn() -> Arc<dyn SimulationClient> + Send + Sync>;
