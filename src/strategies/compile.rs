use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::CompilationSettings,
    core::{
        domain::{ProcessExecutionResult, ProcessRequest, ProcessResultType},
        error::EngineError,
        traits::executor::ProcessExecutor,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompileOutcome {
    /// Carries compiler warnings, if any.
    Succeeded { diagnostic: String },
    Failed { diagnostic: String },
}

/// Runs trusted toolchain binaries under the compilation limits.
#[derive(Clone, Debug)]
pub struct CompileStep {
    executor: Arc<dyn ProcessExecutor>,
    limits: CompilationSettings,
}

impl CompileStep {
    pub fn new(executor: Arc<dyn ProcessExecutor>, limits: CompilationSettings) -> Self {
        Self { executor, limits }
    }

    pub fn limits(&self) -> &CompilationSettings {
        &self.limits
    }

    #[tracing::instrument(skip(self, program, args, cancel), fields(program = %program.display()))]
    pub async fn run(
        &self,
        program: &Path,
        args: Vec<String>,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> Result<CompileOutcome, EngineError> {
        let request = ProcessRequest {
            program: program.to_path_buf(),
            args,
            stdin: String::new(),
            time_limit_ms: self.limits.time_limit_ms,
            memory_limit_bytes: self.limits.memory_limit_bytes,
            working_dir: workdir.to_path_buf(),
            timeout_multiplier: None,
        };

        let result = self.executor.execute(request, cancel.clone()).await?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let outcome = outcome_of(&result);
        if let CompileOutcome::Failed { diagnostic } = &outcome {
            tracing::debug!("Compilation failed: {}", diagnostic);
        }
        Ok(outcome)
    }
}

fn outcome_of(result: &ProcessExecutionResult) -> CompileOutcome {
    let diagnostic = [result.stderr.trim(), result.stdout.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    match result.result_type {
        ProcessResultType::Success => CompileOutcome::Succeeded { diagnostic },
        ProcessResultType::TimeLimit => CompileOutcome::Failed {
            diagnostic: "Compilation exceeded the time limit".to_string(),
        },
        ProcessResultType::MemoryLimit => CompileOutcome::Failed {
            diagnostic: "Compilation exceeded the memory limit".to_string(),
        },
        ProcessResultType::Killed => CompileOutcome::Failed {
            diagnostic: "Compilation was interrupted".to_string(),
        },
        ProcessResultType::RunTimeError if diagnostic.is_empty() => CompileOutcome::Failed {
            diagnostic: format!(
                "Compiler exited with code {}",
                result
                    .exit_code
                    .map_or_else(|| "unknown".to_string(), |c| c.to_string())
            ),
        },
        ProcessResultType::RunTimeError => CompileOutcome::Failed { diagnostic },
    }
}

/// Replaces `{name}` placeholders in toolchain arguments.
pub fn expand_args(args: &[String], vars: &[(&str, &Path)]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |arg, (name, value)| {
                arg.replace(&format!("{{{}}}", name), &value.to_string_lossy())
            })
        })
        .collect()
}

/// Fails with the offending path when a configured toolchain file is missing.
pub fn require_paths<'a>(
    toolchain: &str,
    paths: impl IntoIterator<Item = &'a PathBuf>,
) -> Result<(), EngineError> {
    for path in paths {
        if !path.exists() {
            return Err(EngineError::MissingToolchainPath {
                toolchain: toolchain.to_string(),
                path: path.clone(),
            });
        }
    }
    Ok(())
}
