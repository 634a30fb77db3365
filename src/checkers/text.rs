use crate::core::{
    error::CheckerError,
    traits::checker::{Checker, CheckerOutcome},
};

/// Byte-for-byte equality.
#[derive(Debug, Default)]
pub struct ExactChecker;

impl Checker for ExactChecker {
    fn compare(&self, expected: &str, actual: &str) -> Result<CheckerOutcome, CheckerError> {
        if expected == actual {
            return Ok(CheckerOutcome::correct());
        }
        let expected: Vec<&str> = expected.split('\n').collect();
        let actual: Vec<&str> = actual.split('\n').collect();
        Ok(first_difference(&expected, &actual, |a, b| a == b))
    }
}

/// Equality after normalizing line endings, whitespace around each line and
/// trailing blank lines.
#[derive(Debug, Default)]
pub struct TrimChecker;

impl Checker for TrimChecker {
    fn compare(&self, expected: &str, actual: &str) -> Result<CheckerOutcome, CheckerError> {
        Ok(first_difference(
            &normalized_lines(expected),
            &normalized_lines(actual),
            |a, b| a == b,
        ))
    }
}

/// Like [`TrimChecker`], ignoring letter case.
#[derive(Debug, Default)]
pub struct CaseInsensitiveChecker;

impl Checker for CaseInsensitiveChecker {
    fn compare(&self, expected: &str, actual: &str) -> Result<CheckerOutcome, CheckerError> {
        Ok(first_difference(
            &normalized_lines(expected),
            &normalized_lines(actual),
            |a, b| a.to_lowercase() == b.to_lowercase(),
        ))
    }
}

/// Compares normalized lines as multisets, for answers printed in any order.
#[derive(Debug, Default)]
pub struct SortChecker;

impl Checker for SortChecker {
    fn compare(&self, expected: &str, actual: &str) -> Result<CheckerOutcome, CheckerError> {
        let mut expected = normalized_lines(expected);
        let mut actual = normalized_lines(actual);
        expected.sort_unstable();
        actual.sort_unstable();

        Ok(match first_difference(&expected, &actual, |a, b| a == b) {
            outcome if outcome.is_correct => outcome,
            _ => CheckerOutcome::wrong(format!(
                "Sorted output differs: expected {} lines, got {}",
                expected.len(),
                actual.len()
            )),
        })
    }
}

/// Lines with `\r` and surrounding whitespace stripped, without trailing blank lines.
pub(crate) fn normalized_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().map(str::trim).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Names the first line (1-based) where the two outputs part ways.
pub(crate) fn first_difference<F>(expected: &[&str], actual: &[&str], eq: F) -> CheckerOutcome
where
    F: Fn(&str, &str) -> bool,
{
    for (idx, (e, a)) in expected.iter().zip(actual.iter()).enumerate() {
        if !eq(e, a) {
            return CheckerOutcome::wrong(format!("Line {} differs", idx + 1));
        }
    }

    if expected.len() != actual.len() {
        return CheckerOutcome::wrong(format!(
            "Expected {} lines, got {}",
            expected.len(),
            actual.len()
        ));
    }

    CheckerOutcome::correct()
}
