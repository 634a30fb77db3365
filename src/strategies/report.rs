use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::constants::REPORT_PATTERN_ERR;
use crate::core::error::EngineError;

static SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^test result: (?:ok|FAILED)\. (\d+) passed; (\d+) failed;")
        .expect(REPORT_PATTERN_ERR)
});
// raw prints from the test body can land between the name and the outcome
static STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^test (\S+) \.\.\. .*?(ok|FAILED)$").expect(REPORT_PATTERN_ERR));
static FAILURE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^---- (\S+) stdout ----$").expect(REPORT_PATTERN_ERR));

/// What a libtest run said about itself.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TestReport {
    pub passed: usize,
    pub failed: usize,
    /// Per-test status lines in the order printed, `true` for `ok`.
    pub statuses: Vec<(String, bool)>,
    /// Test name -> captured output of the failure.
    pub failures: HashMap<String, String>,
}

impl TestReport {
    /// `None` when the output has no summary line, i.e. the harness died
    /// before finishing.
    ///
    /// Only the last summary counts and anything printed after it is ignored.
    pub fn parse(output: &str) -> Option<TestReport> {
        let summary = SUMMARY.captures_iter(output).last()?;
        let passed = summary[1].parse().ok()?;
        let failed = summary[2].parse().ok()?;
        let body = &output[..summary.get(0)?.start()];

        Some(TestReport {
            passed,
            failed,
            statuses: parse_statuses(body),
            failures: parse_failures(body),
        })
    }

    /// The report must account for exactly the tests that were submitted:
    /// one status line per name, and a failure block for every `FAILED`.
    pub fn validate(&self, expected: &[String]) -> Result<(), EngineError> {
        if self.failed != self.failures.len() {
            return mismatch(format!(
                "{} failures reported, {} failure blocks found",
                self.failed,
                self.failures.len()
            ));
        }
        if self.passed + self.failed != expected.len() {
            return mismatch(format!(
                "{} tests reported, {} submitted",
                self.passed + self.failed,
                expected.len()
            ));
        }

        let known: HashSet<&str> = expected.iter().map(String::as_str).collect();
        let mut seen = HashMap::new();
        for (name, ok) in &self.statuses {
            if !known.contains(name.as_str()) {
                return mismatch(format!("status reported for unknown test {}", name));
            }
            if seen.insert(name.as_str(), *ok).is_some() {
                return mismatch(format!("test {} reported twice", name));
            }
        }
        if let Some(missing) = expected.iter().find(|name| !seen.contains_key(name.as_str())) {
            return mismatch(format!("no status line for test {}", missing));
        }

        let ok_count = seen.values().filter(|ok| **ok).count();
        if ok_count != self.passed {
            return mismatch(format!(
                "{} tests passed by status, summary says {}",
                ok_count, self.passed
            ));
        }
        if let Some(name) = self
            .failures
            .keys()
            .find(|name| seen.get(name.as_str()) != Some(&false))
        {
            return mismatch(format!("failure block for test {} without a FAILED status", name));
        }
        Ok(())
    }
}

fn mismatch(msg: String) -> Result<(), EngineError> {
    Err(EngineError::ReportMismatch { msg })
}

fn parse_statuses(output: &str) -> Vec<(String, bool)> {
    output
        .lines()
        .take_while(|line| *line != "failures:")
        .filter_map(|line| STATUS.captures(line))
        .map(|caps| (caps[1].to_string(), &caps[2] == "ok"))
        .collect()
}

fn parse_failures(output: &str) -> HashMap<String, String> {
    let mut failures = HashMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in output.lines() {
        if let Some(caps) = FAILURE_HEADER.captures(line) {
            if let Some((name, body)) = current.take() {
                failures.insert(name, body.join("\n").trim_end().to_string());
            }
            current = Some((caps[1].to_string(), Vec::new()));
            continue;
        }

        // the block list ends where libtest repeats the failing names
        if line == "failures:" || line.starts_with("test result:") {
            if let Some((name, body)) = current.take() {
                failures.insert(name, body.join("\n").trim_end().to_string());
            }
            continue;
        }

        if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }

    if let Some((name, body)) = current {
        failures.insert(name, body.join("\n").trim_end().to_string());
    }
    failures
}
