use tokio_util::sync::CancellationToken;

use crate::{
    checkers,
    core::{
        domain::{ExecutionContext, ExecutionResult, ExecutionStage, TestResult, TestVerdict},
        error::EngineError,
        traits::strategy::ExecutionStrategy,
    },
    strategies::test_loop::apply_checker,
};

/// The submission is the answer itself. Nothing is compiled or run, and a
/// problem without tests is accepted as is.
#[derive(Debug)]
pub struct PlainTextStrategy {
    id: String,
}

impl PlainTextStrategy {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

#[async_trait::async_trait]
impl ExecutionStrategy for PlainTextStrategy {
    #[tracing::instrument(skip_all, fields(toolchain = %self.id))]
    async fn execute(
        &self,
        context: &ExecutionContext,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        let checker = checkers::resolve(&context.checker)?;
        let answer = context.wrapped_source().ok_or_else(|| EngineError::UnsupportedSource {
            toolchain: self.id.clone(),
        })?;

        let mut results = Vec::with_capacity(context.tests.len());
        for (test_index, test) in context.tests.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            tracing::debug!(stage = ?ExecutionStage::Executing { test_index }, test_id = test.id);

            let mut result = TestResult {
                test_id: test.id,
                verdict: TestVerdict::CorrectAnswer,
                time_used_ms: 0,
                memory_used_bytes: 0,
                checker_message: String::new(),
                execution_comment: String::new(),
                is_trial: test.is_trial,
                details: None,
            };
            apply_checker(&mut result, test, &answer, checker.as_ref());
            results.push(result);
        }
        tracing::debug!(stage = ?ExecutionStage::Completed, tests = results.len());

        Ok(ExecutionResult::completed(String::new(), results))
    }
}
