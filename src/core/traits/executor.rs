use tokio_util::sync::CancellationToken;

use crate::core::{
    domain::{ProcessExecutionResult, ProcessRequest},
    error::ExecutorError,
};

/// Launches one host process and reports how it went.
///
/// Submission-caused outcomes (timeouts, crashes, memory overuse) come back as
/// `Ok` with the matching `ProcessResultType`. `Err` is reserved for the
/// executor being unable to do its job at all.
///
/// Cancelling `cancel` kills the whole process tree and yields a result
/// marked as killed.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ProcessExecutor: std::fmt::Debug + Send + Sync {
    async fn execute(
        &self,
        request: ProcessRequest,
        cancel: CancellationToken,
    ) -> Result<ProcessExecutionResult, ExecutorError>;
}
