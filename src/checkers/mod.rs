//! Compiled-in output comparators, looked up by name.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use itertools::Itertools;

use crate::core::{
    domain::CheckerSelector,
    error::{CheckerError, EngineError},
    traits::checker::{Checker, CheckerOutcome},
};

pub mod precision;
pub mod text;

use precision::PrecisionChecker;
use text::{CaseInsensitiveChecker, ExactChecker, SortChecker, TrimChecker};

const NAMES: &[&str] = &["exact", "trim", "sort", "case-insensitive", "precision"];

pub fn names() -> impl Iterator<Item = &'static str> {
    NAMES.iter().copied()
}

fn build(name: &str, parameter: Option<&str>) -> Option<Result<Arc<dyn Checker>, CheckerError>> {
    let checker: Arc<dyn Checker> = match name {
        "exact" => Arc::new(ExactChecker),
        "trim" => Arc::new(TrimChecker),
        "sort" => Arc::new(SortChecker),
        "case-insensitive" => Arc::new(CaseInsensitiveChecker),
        "precision" => match PrecisionChecker::from_parameter(parameter) {
            Ok(checker) => Arc::new(checker),
            Err(e) => return Some(Err(e)),
        },
        _ => return None,
    };
    Some(Ok(checker))
}

/// Builds the checker a submission asked for, with its parameter bound.
pub fn resolve(selector: &CheckerSelector) -> Result<Arc<dyn Checker>, EngineError> {
    build(&selector.name, selector.parameter.as_deref())
        .ok_or_else(|| {
            tracing::warn!(known = %names().join(", "), "Unknown checker {}", selector.name);
            EngineError::UnknownChecker(selector.name.clone())
        })?
        .map_err(|e| EngineError::InvalidCheckerParameter {
            name: selector.name.clone(),
            msg: e.to_string(),
        })
}

/// Runs a comparison, turning a panicking checker into an error for this
/// comparison only.
pub fn compare_guarded(
    checker: &dyn Checker,
    expected: &str,
    actual: &str,
) -> Result<CheckerOutcome, CheckerError> {
    match catch_unwind(AssertUnwindSafe(|| checker.compare(expected, actual))) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "checker panicked".to_string());
            Err(CheckerError::Failed(msg))
        }
    }
}
