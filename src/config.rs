use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::constants::*;
use crate::core::error::EngineError;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parent of every per-attempt working directory.
    pub work_root: PathBuf,
    pub executor: ExecutorSettings,
    pub compilation: CompilationSettings,
    pub pipeline: PipelineSettings,
    pub toolchains: BTreeMap<String, ToolchainConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("coderunner-judge"),
            executor: ExecutorSettings::default(),
            compilation: CompilationSettings::default(),
            pipeline: PipelineSettings::default(),
            toolchains: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml(text: &str) -> Result<Self, EngineError> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the file at `path`. A missing file means "all defaults".
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "Config file {} not found, using defaults without toolchains",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(EngineError::Config(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn from_env() -> Result<Self, EngineError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Path::new(&path))
    }

    fn validate(&self) -> Result<(), EngineError> {
        if !valid_multiplier(self.executor.timeout_multiplier) {
            return Err(EngineError::Config(
                "executor.timeout_multiplier must be a finite number of at least 1.0".to_string(),
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(EngineError::Config(
                "pipeline.workers must be positive".to_string(),
            ));
        }
        if self.pipeline.max_attempts == 0 {
            return Err(EngineError::Config(
                "pipeline.max_attempts must be positive".to_string(),
            ));
        }
        for (id, toolchain) in &self.toolchains {
            if let Some(multiplier) = toolchain.runtime().and_then(|r| r.timeout_multiplier) {
                if !valid_multiplier(multiplier) {
                    return Err(EngineError::Config(format!(
                        "toolchains.{}.timeout_multiplier must be a finite number of at least 1.0",
                        id
                    )));
                }
            }
        }
        Ok(())
    }
}

fn valid_multiplier(multiplier: f64) -> bool {
    multiplier.is_finite() && multiplier >= 1.0
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub timeout_multiplier: f64,
    /// Upper bound of the extra time the watchdog grants past the primary timeout.
    pub watchdog_extra_cap_ms: u64,
    /// Absolute upper bound of the watchdog timeout.
    pub watchdog_ceiling_ms: u64,
    pub memory_sample_interval_ms: u64,
    pub output_grace_period_ms: u64,
    pub max_output_bytes: usize,
    pub path: String,
    pub environment: BTreeMap<String, String>,
    pub restricted: Option<RestrictedIdentity>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout_multiplier: DEFAULT_TIMEOUT_MULTIPLIER,
            watchdog_extra_cap_ms: DEFAULT_WATCHDOG_EXTRA_CAP_MS,
            watchdog_ceiling_ms: DEFAULT_WATCHDOG_CEILING_MS,
            memory_sample_interval_ms: DEFAULT_MEMORY_SAMPLE_INTERVAL_MS,
            output_grace_period_ms: DEFAULT_OUTPUT_GRACE_PERIOD_MS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            path: DEFAULT_PATH_ENV.to_string(),
            environment: BTreeMap::new(),
            restricted: None,
        }
    }
}

impl ExecutorSettings {
    pub fn memory_sample_interval(&self) -> Duration {
        Duration::from_millis(self.memory_sample_interval_ms.max(1))
    }

    pub fn output_grace_period(&self) -> Duration {
        Duration::from_millis(self.output_grace_period_ms)
    }
}

/// Low-privilege identity submitted programs run under.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RestrictedIdentity {
    pub user: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl RestrictedIdentity {
    /// Explicit ids win over the user name lookup.
    pub fn resolve(&self) -> Result<(u32, u32), EngineError> {
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            return Ok((uid, gid));
        }

        let name = self.user.as_deref().ok_or_else(|| {
            EngineError::Config("executor.restricted needs either uid and gid or user".to_string())
        })?;
        let user = nix::unistd::User::from_name(name)
            .map_err(|e| EngineError::Config(format!("Failed to look up user {}: {}", name, e)))?
            .ok_or_else(|| EngineError::Config(format!("User {} does not exist", name)))?;

        Ok((
            self.uid.unwrap_or(user.uid.as_raw()),
            self.gid.unwrap_or(user.gid.as_raw()),
        ))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CompilationSettings {
    pub time_limit_ms: u64,
    pub memory_limit_bytes: u64,
    /// Total uncompressed size a submitted archive may unpack to.
    pub max_archive_bytes: u64,
    pub max_archive_entries: usize,
}

impl Default for CompilationSettings {
    fn default() -> Self {
        Self {
            time_limit_ms: DEFAULT_COMPILE_TIME_LIMIT_MS,
            memory_limit_bytes: DEFAULT_COMPILE_MEMORY_LIMIT_BYTES,
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            max_archive_entries: DEFAULT_MAX_ARCHIVE_ENTRIES,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub channel_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ToolchainConfig {
    Compiled(CompiledToolchain),
    Interpreted(InterpretedToolchain),
    ProjectTests(ProjectTestsToolchain),
    PlainText,
}

impl ToolchainConfig {
    pub fn runtime(&self) -> Option<&RuntimeSettings> {
        match self {
            ToolchainConfig::Compiled(c) => Some(&c.runtime),
            ToolchainConfig::Interpreted(c) => Some(&c.runtime),
            ToolchainConfig::ProjectTests(c) => Some(&c.runtime),
            ToolchainConfig::PlainText => None,
        }
    }
}

/// Per-toolchain calibration of the fixed startup cost.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub base_time_ms: u64,
    pub base_memory_bytes: u64,
    pub timeout_multiplier: Option<f64>,
}

impl RuntimeSettings {
    pub fn base_time(&self) -> Duration {
        Duration::from_millis(self.base_time_ms)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CompiledToolchain {
    pub compiler: PathBuf,
    /// Placeholders: `{source}`, `{output}`, `{workdir}`.
    pub compiler_args: Vec<String>,
    pub source_file: String,
    #[serde(default = "default_artifact_file")]
    pub artifact_file: String,
    /// Runs the artifact through this program (e.g. a VM) instead of directly.
    #[serde(default)]
    pub runner: Option<PathBuf>,
    /// Placeholders: `{artifact}`, `{workdir}`.
    #[serde(default)]
    pub run_args: Vec<String>,
    #[serde(default)]
    pub support_paths: Vec<PathBuf>,
    #[serde(flatten)]
    pub runtime: RuntimeSettings,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InterpretedToolchain {
    pub interpreter: PathBuf,
    /// Versioned template asset, e.g. `python.v1`.
    pub template: String,
    pub source_file: String,
    /// Placeholders: `{source}`, `{workdir}`.
    #[serde(default = "default_interpreter_args")]
    pub run_args: Vec<String>,
    /// Syntax check run as the compile step.
    #[serde(default)]
    pub check_args: Option<Vec<String>>,
    #[serde(default)]
    pub support_paths: Vec<PathBuf>,
    #[serde(flatten)]
    pub runtime: RuntimeSettings,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProjectTestsToolchain {
    pub compiler: PathBuf,
    #[serde(default = "default_edition")]
    pub edition: String,
    #[serde(default = "default_project_template")]
    pub template: String,
    #[serde(default)]
    pub extra_compiler_args: Vec<String>,
    #[serde(default)]
    pub support_paths: Vec<PathBuf>,
    #[serde(flatten)]
    pub runtime: RuntimeSettings,
}

fn default_artifact_file() -> String {
    "solution".to_string()
}

fn default_interpreter_args() -> Vec<String> {
    vec!["{source}".to_string()]
}

fn default_edition() -> String {
    "2021".to_string()
}

fn default_project_template() -> String {
    "rust-tests.v1".to_string()
}
