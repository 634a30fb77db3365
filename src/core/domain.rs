use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of work handed to the engine by the coordinator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionJob {
    pub submission_id: Uuid,
    pub context: ExecutionContext,
}

/// Everything one execution attempt needs. Built once and only read afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub toolchain: String,
    pub source: SubmissionSource,
    /// Code the submission is embedded into before the toolchain template
    /// is applied. See [`ExecutionContext::wrapped_source`].
    #[serde(default)]
    pub skeleton: Option<String>,
    #[serde(default)]
    pub tests: Vec<TestCase>,
    pub time_limit_ms: u64,
    pub memory_limit_bytes: u64,
    #[serde(default)]
    pub checker: CheckerSelector,
}

pub const SKELETON_MARKER: &str = "{{SUBMISSION}}";

impl ExecutionContext {
    /// Submission text with the skeleton applied, or `None` for archives.
    pub fn wrapped_source(&self) -> Option<String> {
        let code = self.source.as_text()?;
        Some(match &self.skeleton {
            Some(skeleton) if skeleton.contains(SKELETON_MARKER) => {
                skeleton.replace(SKELETON_MARKER, code)
            }
            Some(skeleton) => format!("{}\n{}", skeleton, code),
            None => code.to_string(),
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionSource {
    Text { code: String },
    Archive { bytes: Vec<u8> },
}

impl SubmissionSource {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SubmissionSource::Text { code } => Some(code),
            SubmissionSource::Archive { .. } => None,
        }
    }

    pub fn as_archive(&self) -> Option<&[u8]> {
        match self {
            SubmissionSource::Archive { bytes } => Some(bytes),
            SubmissionSource::Text { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckerSelector {
    pub name: String,
    #[serde(default)]
    pub parameter: Option<String>,
}

impl CheckerSelector {
    pub fn new(name: &str, parameter: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            parameter: parameter.map(str::to_string),
        }
    }
}

impl Default for CheckerSelector {
    fn default() -> Self {
        Self::new("exact", None)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: u64,
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_trial: bool,
}

impl TestCase {
    /// Non-trial tests never expose their data to the submitter.
    pub fn is_hidden(&self) -> bool {
        !self.is_trial
    }
}

/// One host process invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin: String,
    pub time_limit_ms: u64,
    pub memory_limit_bytes: u64,
    pub working_dir: PathBuf,
    /// Overrides the executor-wide multiplier for toolchains with a slow start.
    pub timeout_multiplier: Option<f64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessResultType {
    #[default]
    Success,
    TimeLimit,
    MemoryLimit,
    RunTimeError,
    Killed,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub time_worked: Duration,
    pub user_processor_time: Duration,
    pub privileged_processor_time: Duration,
    pub memory_used_bytes: u64,
    pub result_type: ProcessResultType,
    pub was_killed: bool,
}

impl ProcessExecutionResult {
    pub fn total_processor_time(&self) -> Duration {
        self.user_processor_time + self.privileged_processor_time
    }

    /// Removes the fixed startup cost of a toolchain. A measurement at or
    /// below the baseline is left untouched.
    pub fn apply_time_and_memory_offset(&mut self, base_time: Duration, base_memory_bytes: u64) {
        if self.time_worked > base_time {
            self.time_worked -= base_time;
        }

        if self.total_processor_time() > base_time {
            let from_user = self.user_processor_time.min(base_time);
            self.user_processor_time -= from_user;
            self.privileged_processor_time -= base_time - from_user;
        }

        if self.memory_used_bytes > base_memory_bytes {
            self.memory_used_bytes -= base_memory_bytes;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestVerdict {
    CorrectAnswer,
    WrongAnswer,
    TimeLimit,
    MemoryLimit,
    RunTimeError,
    CheckerError,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerDetails {
    pub expected_fragment: String,
    pub actual_fragment: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: u64,
    pub verdict: TestVerdict,
    pub time_used_ms: u64,
    pub memory_used_bytes: u64,
    pub checker_message: String,
    pub execution_comment: String,
    pub is_trial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<CheckerDetails>,
}

/// The only thing the engine hands back to the coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub is_compiled_successfully: bool,
    pub compiler_comment: String,
    pub test_results: Vec<TestResult>,
}

impl ExecutionResult {
    pub fn compile_failed(diagnostic: impl Into<String>) -> Self {
        Self {
            is_compiled_successfully: false,
            compiler_comment: diagnostic.into(),
            test_results: Vec::new(),
        }
    }

    pub fn completed(compiler_comment: impl Into<String>, test_results: Vec<TestResult>) -> Self {
        Self {
            is_compiled_successfully: true,
            compiler_comment: compiler_comment.into(),
            test_results,
        }
    }
}

/// Where a single attempt currently is. Only used for tracing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStage {
    Received,
    Compiling,
    Compiled,
    CompileFailed,
    Executing { test_index: usize },
    Completed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionUpdate {
    pub submission_id: Uuid,
    pub at: DateTime<Utc>,
    /// Inlined, so the tag and its payload sit next to `submission_id`.
    #[serde(flatten)]
    pub state: SubmissionState,
}

impl SubmissionUpdate {
    pub fn new(submission_id: Uuid, state: SubmissionState) -> Self {
        Self {
            submission_id,
            at: Utc::now(),
            state,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionState {
    Received,
    Executing { attempt: u32 },
    Completed { result: ExecutionResult },
    Failed { message: String },
}
