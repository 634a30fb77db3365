use std::path::PathBuf;

use crate::constants::ADMIN_NOTIFIED_MSG;

/// Failures of the executor itself. Anything the submitted program does
/// wrong is reported through `ProcessResultType` instead.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Process {program} has no pid right after spawn")]
    MissingPid { program: PathBuf },
    #[error("Failed to wait for process: {source}")]
    Wait {
        #[source]
        source: std::io::Error,
    },
    #[error("Working directory {} does not exist", path.display())]
    WorkingDirectory { path: PathBuf },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("Unknown toolchain: {0}")]
    UnknownToolchain(String),
    #[error("Toolchain {toolchain}: required path {} does not exist", path.display())]
    MissingToolchainPath { toolchain: String, path: PathBuf },
    #[error("Unknown template asset: {0}")]
    UnknownTemplate(String),
    #[error("Unknown checker: {0}")]
    UnknownChecker(String),
    #[error("Checker {name} rejected its parameter: {msg}")]
    InvalidCheckerParameter { name: String, msg: String },
    #[error("Toolchain {toolchain} does not accept this kind of submission source")]
    UnsupportedSource { toolchain: String },
    #[error("Toolchain {toolchain} requires at least one test")]
    NoTests { toolchain: String },
    #[error("Test report does not match the submitted tests: {msg}")]
    ReportMismatch { msg: String },
    #[error("Failed to prepare working directory {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Execution was cancelled")]
    Cancelled,
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether running the same submission again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Executor(_) | EngineError::Workspace { .. } | EngineError::Cancelled
        )
    }

    /// Text that may be shown to the submitter. Never carries internals.
    pub fn public_message(&self) -> &'static str {
        ADMIN_NOTIFIED_MSG
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckerError {
    #[error("Invalid checker parameter: {0}")]
    InvalidParameter(String),
    #[error("Checker failed: {0}")]
    Failed(String),
}
