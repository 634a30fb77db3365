use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    config::{EngineConfig, ToolchainConfig},
    core::{error::EngineError, traits::{executor::ProcessExecutor, strategy::ExecutionStrategy}},
    strategies::{
        Toolbox, compile::CompileStep, compiled::CompiledStrategy,
        interpreted::InterpretedStrategy, plain_text::PlainTextStrategy,
        project_tests::ProjectTestsStrategy,
    },
};

/// Toolchain id -> strategy. Every toolchain is validated when the registry
/// is built, so a missing binary stops the engine at startup.
#[derive(Debug, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn ExecutionStrategy>>,
}

impl StrategyRegistry {
    pub fn from_config(
        config: &EngineConfig,
        run_executor: Arc<dyn ProcessExecutor>,
        compile_executor: Arc<dyn ProcessExecutor>,
    ) -> Result<Self, EngineError> {
        let toolbox = Toolbox {
            work_root: config.work_root.clone(),
            runner: run_executor,
            compiler: CompileStep::new(compile_executor, config.compilation.clone()),
        };

        let mut registry = Self::default();
        for (id, toolchain) in &config.toolchains {
            let strategy: Arc<dyn ExecutionStrategy> = match toolchain {
                ToolchainConfig::Compiled(t) => {
                    Arc::new(CompiledStrategy::new(id, t.clone(), toolbox.clone())?)
                }
                ToolchainConfig::Interpreted(t) => {
                    Arc::new(InterpretedStrategy::new(id, t.clone(), toolbox.clone())?)
                }
                ToolchainConfig::ProjectTests(t) => {
                    Arc::new(ProjectTestsStrategy::new(id, t.clone(), toolbox.clone())?)
                }
                ToolchainConfig::PlainText => Arc::new(PlainTextStrategy::new(id)),
            };
            tracing::info!(toolchain = %id, "Registered toolchain");
            registry.insert(id, strategy);
        }

        Ok(registry)
    }

    pub fn insert(&mut self, id: &str, strategy: Arc<dyn ExecutionStrategy>) {
        self.strategies.insert(id.to_string(), strategy);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn ExecutionStrategy>, EngineError> {
        self.strategies
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownToolchain(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
