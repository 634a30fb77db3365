use tokio_util::sync::CancellationToken;

use crate::core::{
    domain::{ExecutionContext, ExecutionResult},
    error::EngineError,
};

/// Compiles (when the toolchain needs it), runs and grades one submission.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ExecutionStrategy: std::fmt::Debug + Send + Sync {
    async fn execute(
        &self,
        context: &ExecutionContext,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, EngineError>;
}
