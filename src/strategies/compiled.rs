use tokio_util::sync::CancellationToken;

use crate::{
    checkers,
    config::CompiledToolchain,
    core::{
        domain::{ExecutionContext, ExecutionResult, ExecutionStage},
        error::EngineError,
        traits::strategy::ExecutionStrategy,
    },
    strategies::{
        Toolbox,
        compile::{CompileOutcome, expand_args, require_paths},
        test_loop::{Launch, TestLoop},
        workspace::Workspace,
    },
};

/// Ahead-of-time compiled languages: build once, run the artifact per test.
#[derive(Debug)]
pub struct CompiledStrategy {
    id: String,
    toolchain: CompiledToolchain,
    toolbox: Toolbox,
    test_loop: TestLoop,
}

impl CompiledStrategy {
    pub fn new(id: &str, toolchain: CompiledToolchain, toolbox: Toolbox) -> Result<Self, EngineError> {
        require_paths(
            id,
            std::iter::once(&toolchain.compiler)
                .chain(toolchain.runner.iter())
                .chain(toolchain.support_paths.iter()),
        )?;

        let test_loop = TestLoop::new(toolbox.runner.clone(), toolchain.runtime.clone());
        Ok(Self {
            id: id.to_string(),
            toolchain,
            toolbox,
            test_loop,
        })
    }
}

#[async_trait::async_trait]
impl ExecutionStrategy for CompiledStrategy {
    #[tracing::instrument(skip_all, fields(toolchain = %self.id))]
    async fn execute(
        &self,
        context: &ExecutionContext,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        if context.tests.is_empty() {
            return Err(EngineError::NoTests {
                toolchain: self.id.clone(),
            });
        }
        let checker = checkers::resolve(&context.checker)?;
        let workspace = Workspace::create(&self.toolbox.work_root).await?;
        tracing::debug!(stage = ?ExecutionStage::Received, workdir = %workspace.path().display());

        let source = context.wrapped_source().ok_or_else(|| EngineError::UnsupportedSource {
            toolchain: self.id.clone(),
        })?;
        let source_path = workspace.write_file(&self.toolchain.source_file, &source).await?;
        let artifact = workspace.file(&self.toolchain.artifact_file);

        tracing::debug!(stage = ?ExecutionStage::Compiling);
        let args = expand_args(
            &self.toolchain.compiler_args,
            &[
                ("source", source_path.as_path()),
                ("output", artifact.as_path()),
                ("workdir", workspace.path()),
            ],
        );
        let compiler_comment = match self
            .toolbox
            .compiler
            .run(&self.toolchain.compiler, args, workspace.path(), &cancel)
            .await?
        {
            CompileOutcome::Succeeded { diagnostic } if artifact.exists() => diagnostic,
            CompileOutcome::Succeeded { .. } => {
                tracing::debug!(stage = ?ExecutionStage::CompileFailed);
                return Ok(ExecutionResult::compile_failed(
                    "Compiler finished without producing an executable",
                ));
            }
            CompileOutcome::Failed { diagnostic } => {
                tracing::debug!(stage = ?ExecutionStage::CompileFailed);
                return Ok(ExecutionResult::compile_failed(diagnostic));
            }
        };
        tracing::debug!(stage = ?ExecutionStage::Compiled);

        let vars = [("artifact", artifact.as_path()), ("workdir", workspace.path())];
        let launch = match &self.toolchain.runner {
            Some(runner) => Launch {
                program: runner.clone(),
                args: expand_args(&self.toolchain.run_args, &vars),
                working_dir: workspace.path().to_path_buf(),
            },
            None => Launch {
                program: artifact.clone(),
                args: expand_args(&self.toolchain.run_args, &vars),
                working_dir: workspace.path().to_path_buf(),
            },
        };

        let results = self
            .test_loop
            .run(&launch, context, checker.as_ref(), &cancel)
            .await?;
        tracing::debug!(stage = ?ExecutionStage::Completed, tests = results.len());

        Ok(ExecutionResult::completed(compiler_comment, results))
    }
}
