use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    checkers,
    config::RuntimeSettings,
    constants::{DETAILS_FRAGMENT_LEN, EXECUTION_COMMENT_LEN},
    core::{
        domain::{
            CheckerDetails, ExecutionContext, ExecutionStage, ProcessExecutionResult,
            ProcessRequest, ProcessResultType, TestCase, TestResult, TestVerdict,
        },
        error::EngineError,
        traits::{checker::Checker, executor::ProcessExecutor},
    },
};

/// How to start the submitted program for a single test.
#[derive(Clone, Debug)]
pub struct Launch {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

/// Shared compile-then-test loop: one process per test, sequentially, in
/// test order.
#[derive(Clone, Debug)]
pub struct TestLoop {
    executor: Arc<dyn ProcessExecutor>,
    runtime: RuntimeSettings,
}

impl TestLoop {
    pub fn new(executor: Arc<dyn ProcessExecutor>, runtime: RuntimeSettings) -> Self {
        Self { executor, runtime }
    }

    /// Limits handed to the executor include the toolchain baseline, which
    /// is taken off again before grading.
    pub fn request(&self, launch: &Launch, context: &ExecutionContext, stdin: &str) -> ProcessRequest {
        ProcessRequest {
            program: launch.program.clone(),
            args: launch.args.clone(),
            stdin: stdin.to_string(),
            time_limit_ms: context.time_limit_ms.saturating_add(self.runtime.base_time_ms),
            memory_limit_bytes: context
                .memory_limit_bytes
                .saturating_add(self.runtime.base_memory_bytes),
            working_dir: launch.working_dir.clone(),
            timeout_multiplier: self.runtime.timeout_multiplier,
        }
    }

    /// Runs `request` and normalizes the measurements. Cancellation wins over
    /// whatever the process did.
    pub async fn execute(
        &self,
        request: ProcessRequest,
        cancel: &CancellationToken,
    ) -> Result<ProcessExecutionResult, EngineError> {
        let mut result = self.executor.execute(request, cancel.clone()).await?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        result.apply_time_and_memory_offset(self.runtime.base_time(), self.runtime.base_memory_bytes);
        Ok(result)
    }

    pub async fn run(
        &self,
        launch: &Launch,
        context: &ExecutionContext,
        checker: &dyn Checker,
        cancel: &CancellationToken,
    ) -> Result<Vec<TestResult>, EngineError> {
        let mut results = Vec::with_capacity(context.tests.len());

        for (test_index, test) in context.tests.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            tracing::debug!(stage = ?ExecutionStage::Executing { test_index }, test_id = test.id);

            let request = self.request(launch, context, &test.input);
            let result = self.execute(request, cancel).await?;
            results.push(grade(test, &result, checker));
        }

        Ok(results)
    }
}

/// Turns one process run into a verdict. Only a clean exit reaches the checker.
pub fn grade(test: &TestCase, result: &ProcessExecutionResult, checker: &dyn Checker) -> TestResult {
    process_failure(test, result).unwrap_or_else(|| {
        let mut test_result = measured(test, result);
        apply_checker(&mut test_result, test, &result.stdout, checker);
        test_result
    })
}

/// The verdict of a process that did not exit cleanly, `None` otherwise.
pub fn process_failure(test: &TestCase, result: &ProcessExecutionResult) -> Option<TestResult> {
    let mut test_result = measured(test, result);
    match result.result_type {
        ProcessResultType::TimeLimit | ProcessResultType::Killed => {
            test_result.verdict = TestVerdict::TimeLimit;
        }
        ProcessResultType::MemoryLimit => {
            test_result.verdict = TestVerdict::MemoryLimit;
        }
        ProcessResultType::RunTimeError => {
            test_result.verdict = TestVerdict::RunTimeError;
            test_result.execution_comment = truncate(result.stderr.trim_end(), EXECUTION_COMMENT_LEN);
        }
        ProcessResultType::Success => return None,
    }
    Some(test_result)
}

/// A correct-answer result carrying the run's measurements.
pub fn measured(test: &TestCase, result: &ProcessExecutionResult) -> TestResult {
    TestResult {
        test_id: test.id,
        verdict: TestVerdict::CorrectAnswer,
        time_used_ms: result.total_processor_time().as_millis() as u64,
        memory_used_bytes: result.memory_used_bytes,
        checker_message: String::new(),
        execution_comment: String::new(),
        is_trial: test.is_trial,
        details: None,
    }
}

/// Grades `actual` against the test's expected output and fills the verdict,
/// message and trial details.
pub fn apply_checker(test_result: &mut TestResult, test: &TestCase, actual: &str, checker: &dyn Checker) {
    match checkers::compare_guarded(checker, &test.expected_output, actual) {
        Ok(outcome) if outcome.is_correct => {
            test_result.verdict = TestVerdict::CorrectAnswer;
            test_result.checker_message = outcome.message;
        }
        Ok(outcome) => {
            test_result.verdict = TestVerdict::WrongAnswer;
            test_result.checker_message = outcome.message;
            if test.is_trial {
                test_result.details = Some(CheckerDetails {
                    expected_fragment: truncate(&test.expected_output, DETAILS_FRAGMENT_LEN),
                    actual_fragment: truncate(actual, DETAILS_FRAGMENT_LEN),
                });
            }
        }
        Err(e) => {
            tracing::warn!(test_id = test.id, "Checker failed: {}", e);
            test_result.verdict = TestVerdict::CheckerError;
            test_result.checker_message = e.to_string();
        }
    }
}

/// At most `max` bytes of `text`, cut on a char boundary.
pub fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockall::Sequence;

    use super::*;
    use crate::checkers::text::ExactChecker;
    use crate::core::domain::{CheckerSelector, SubmissionSource};
    use crate::core::error::CheckerError;
    use crate::core::traits::checker::{CheckerOutcome, MockChecker};
    use crate::core::traits::executor::MockProcessExecutor;

    fn test_case(id: u64, expected: &str, is_trial: bool) -> TestCase {
        TestCase {
            id,
            input: format!("input {}", id),
            expected_output: expected.to_string(),
            is_trial,
        }
    }

    fn context(tests: Vec<TestCase>) -> ExecutionContext {
        ExecutionContext {
            toolchain: "python".to_string(),
            source: SubmissionSource::Text {
                code: String::new(),
            },
            skeleton: None,
            tests,
            time_limit_ms: 100,
            memory_limit_bytes: 1024,
            checker: CheckerSelector::default(),
        }
    }

    fn launch() -> Launch {
        Launch {
            program: PathBuf::from("/usr/bin/python3"),
            args: vec!["main.py".to_string()],
            working_dir: PathBuf::from("/tmp"),
        }
    }

    fn stdout(text: &str) -> ProcessExecutionResult {
        ProcessExecutionResult {
            stdout: text.to_string(),
            user_processor_time: Duration::from_millis(70),
            memory_used_bytes: 5_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_grade_bypasses_checker_for_killed_process() {
        let mut checker = MockChecker::new();
        checker.expect_compare().never();
        let test = test_case(1, "Hello", true);

        let timed_out = ProcessExecutionResult {
            result_type: ProcessResultType::TimeLimit,
            was_killed: true,
            ..Default::default()
        };
        assert_eq!(grade(&test, &timed_out, &checker).verdict, TestVerdict::TimeLimit);

        let out_of_memory = ProcessExecutionResult {
            result_type: ProcessResultType::MemoryLimit,
            was_killed: true,
            ..Default::default()
        };
        assert_eq!(grade(&test, &out_of_memory, &checker).verdict, TestVerdict::MemoryLimit);
    }

    #[test]
    fn test_grade_runtime_error_keeps_stderr() {
        let checker = ExactChecker;
        let crashed = ProcessExecutionResult {
            stderr: "Traceback: ZeroDivisionError\n".to_string(),
            exit_code: Some(1),
            result_type: ProcessResultType::RunTimeError,
            ..Default::default()
        };

        let result = grade(&test_case(1, "1", false), &crashed, &checker);
        assert_eq!(result.verdict, TestVerdict::RunTimeError);
        assert_eq!(result.execution_comment, "Traceback: ZeroDivisionError");
    }

    #[test]
    fn test_grade_details_only_for_trial_tests() {
        let checker = ExactChecker;

        let trial = grade(&test_case(1, "Hello", true), &stdout("Bye"), &checker);
        assert_eq!(trial.verdict, TestVerdict::WrongAnswer);
        assert_eq!(
            trial.details,
            Some(CheckerDetails {
                expected_fragment: "Hello".to_string(),
                actual_fragment: "Bye".to_string(),
            })
        );

        let hidden = grade(&test_case(2, "Hello", false), &stdout("Bye"), &checker);
        assert_eq!(hidden.verdict, TestVerdict::WrongAnswer);
        assert_eq!(hidden.details, None);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[tokio::test]
    async fn test_run_applies_baseline_and_keeps_order() {
        let mut executor = MockProcessExecutor::new();
        let mut seq = Sequence::new();
        for (input, output) in [("input 1", "1"), ("input 2", "2")] {
            executor
                .expect_execute()
                .withf(move |req, _| {
                    req.stdin == input && req.time_limit_ms == 150 && req.memory_limit_bytes == 2024
                })
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_, _| Ok(stdout(output)));
        }
        let runtime = RuntimeSettings {
            base_time_ms: 50,
            base_memory_bytes: 1000,
            timeout_multiplier: None,
        };
        let test_loop = TestLoop::new(Arc::new(executor), runtime);
        let context = context(vec![test_case(1, "1", false), test_case(2, "3", false)]);

        let results = test_loop
            .run(&launch(), &context, &ExactChecker, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].test_id, 1);
        assert_eq!(results[0].verdict, TestVerdict::CorrectAnswer);
        assert_eq!(results[0].time_used_ms, 20);
        assert_eq!(results[0].memory_used_bytes, 4_000);
        assert_eq!(results[1].verdict, TestVerdict::WrongAnswer);
    }

    #[test]
    fn test_request_limits_saturate() {
        let test_loop = TestLoop::new(
            Arc::new(MockProcessExecutor::new()),
            RuntimeSettings {
                base_time_ms: 50,
                base_memory_bytes: 1000,
                timeout_multiplier: None,
            },
        );
        let mut context = context(vec![test_case(1, "1", false)]);
        context.time_limit_ms = u64::MAX;
        context.memory_limit_bytes = u64::MAX - 1;

        let request = test_loop.request(&launch(), &context, "");

        assert_eq!(request.time_limit_ms, u64::MAX);
        assert_eq!(request.memory_limit_bytes, u64::MAX);
    }

    #[tokio::test]
    async fn test_checker_error_is_isolated_to_one_test() {
        let mut executor = MockProcessExecutor::new();
        executor
            .expect_execute()
            .times(3)
            .returning(|req, _| Ok(stdout(&req.stdin.replace("input ", ""))));

        let mut checker = MockChecker::new();
        checker.expect_compare().returning(|expected, actual| match actual {
            "2" => Err(CheckerError::Failed("custom comparator crashed".to_string())),
            _ if expected == actual => Ok(CheckerOutcome::correct()),
            _ => Ok(CheckerOutcome::wrong("differs")),
        });

        let test_loop = TestLoop::new(Arc::new(executor), RuntimeSettings::default());
        let context = context(vec![
            test_case(1, "1", false),
            test_case(2, "2", false),
            test_case(3, "4", false),
        ]);

        let results = test_loop
            .run(&launch(), &context, &checker, &CancellationToken::new())
            .await
            .unwrap();

        let verdicts: Vec<TestVerdict> = results.iter().map(|r| r.verdict).collect();
        assert_eq!(
            verdicts,
            vec![
                TestVerdict::CorrectAnswer,
                TestVerdict::CheckerError,
                TestVerdict::WrongAnswer
            ]
        );
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_loop() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut executor = MockProcessExecutor::new();
        executor.expect_execute().times(1).returning(move |_, _| {
            trigger.cancel();
            Ok(ProcessExecutionResult {
                result_type: ProcessResultType::Killed,
                was_killed: true,
                ..Default::default()
            })
        });

        let test_loop = TestLoop::new(Arc::new(executor), RuntimeSettings::default());
        let context = context(vec![test_case(1, "1", false), test_case(2, "2", false)]);

        let result = test_loop.run(&launch(), &context, &ExactChecker, &cancel).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
