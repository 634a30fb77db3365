use tokio_util::sync::CancellationToken;

use crate::{
    checkers,
    config::InterpretedToolchain,
    core::{
        domain::{ExecutionContext, ExecutionResult, ExecutionStage},
        error::EngineError,
        traits::strategy::ExecutionStrategy,
    },
    strategies::{
        Toolbox,
        compile::{CompileOutcome, expand_args, require_paths},
        templates::Template,
        test_loop::{Launch, TestLoop},
        workspace::Workspace,
    },
};

/// Interpreted languages. The submission is wrapped into a sandboxing
/// template and handed to the interpreter once per test.
#[derive(Debug)]
pub struct InterpretedStrategy {
    id: String,
    toolchain: InterpretedToolchain,
    template: &'static Template,
    toolbox: Toolbox,
    test_loop: TestLoop,
}

impl InterpretedStrategy {
    pub fn new(
        id: &str,
        toolchain: InterpretedToolchain,
        toolbox: Toolbox,
    ) -> Result<Self, EngineError> {
        require_paths(
            id,
            std::iter::once(&toolchain.interpreter).chain(toolchain.support_paths.iter()),
        )?;
        let template = Template::get(&toolchain.template)?;

        let test_loop = TestLoop::new(toolbox.runner.clone(), toolchain.runtime.clone());
        Ok(Self {
            id: id.to_string(),
            toolchain,
            template,
            toolbox,
            test_loop,
        })
    }
}

#[async_trait::async_trait]
impl ExecutionStrategy for InterpretedStrategy {
    #[tracing::instrument(skip_all, fields(toolchain = %self.id, template = self.template.name))]
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

        let code = context.wrapped_source().ok_or_else(|| EngineError::UnsupportedSource {
            toolchain: self.id.clone(),
        })?;
        let source_path = workspace
            .write_file(&self.toolchain.source_file, &self.template.render(&code))
            .await?;
        let vars = [("source", source_path.as_path()), ("workdir", workspace.path())];

        let mut compiler_comment = String::new();
        if let Some(check_args) = &self.toolchain.check_args {
            tracing::debug!(stage = ?ExecutionStage::Compiling);
            match self
                .toolbox
                .compiler
                .run(
                    &self.toolchain.interpreter,
                    expand_args(check_args, &vars),
                    workspace.path(),
                    &cancel,
                )
                .await?
            {
                CompileOutcome::Succeeded { diagnostic } => compiler_comment = diagnostic,
                CompileOutcome::Failed { diagnostic } => {
                    tracing::debug!(stage = ?ExecutionStage::CompileFailed);
                    return Ok(ExecutionResult::compile_failed(diagnostic));
                }
            }
            tracing::debug!(stage = ?ExecutionStage::Compiled);
        }

        let launch = Launch {
            program: self.toolchain.interpreter.clone(),
            args: expand_args(&self.toolchain.run_args, &vars),
            working_dir: workspace.path().to_path_buf(),
        };
        let results = self
            .test_loop
            .run(&launch, context, checker.as_ref(), &cancel)
            .await?;
        tracing::debug!(stage = ?ExecutionStage::Completed, tests = results.len());

        Ok(ExecutionResult::completed(compiler_comment, results))
    }
}
