//! Per-toolchain pipelines that compile, run and grade a submission.

use std::path::PathBuf;
use std::sync::Arc;

use crate::core::traits::executor::ProcessExecutor;
use compile::CompileStep;

pub mod compile;
pub mod compiled;
pub mod interpreted;
pub mod plain_text;
pub mod registry;
pub mod report;
pub mod templates;
pub mod test_loop;
pub mod workspace;

/// Shared by every strategy. `runner` starts submitted programs, `compiler`
/// starts trusted toolchain binaries.
#[derive(Clone, Debug)]
pub struct Toolbox {
    pub work_root: PathBuf,
    pub runner: Arc<dyn ProcessExecutor>,
    pub compiler: CompileStep,
}
