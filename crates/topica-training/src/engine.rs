use crate::error::TrainingResult;
use crate::job::{IdentityJobRequest, JobCounters, JobRequest};
use async_trait::async_trait;

/// Client of the distributed compute engine.
///
/// Each call submits one job and resolves once it has finished; polling and
/// cluster bookkeeping stay behind this boundary. A failed job surfaces as
/// [`TrainingError::JobExecution`](crate::TrainingError::JobExecution).
#[async_trait]
pub trait ComputeEngine: Send + Sync {
    fn id(&self) -> &'static str;

    /// Run the expectation step and per-term aggregation for one iteration.
    ///
    /// Partitions are written under `request.outputs.dir`:
    /// `<beta_prefix>*` always, `<gamma_prefix>*` when
    /// [`JobRequest::emits_posteriors`] holds, and the sufficient statistics
    /// file when training.
    async fn run_variational(&self, request: &JobRequest) -> TrainingResult<JobCounters>;

    /// Copy every input record into a single partition `part-00000` under `request.output_dir`.
    async fn run_identity(&self, request: &IdentityJobRequest) -> TrainingResult<()>;
}
