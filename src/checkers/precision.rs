use crate::core::{
    error::CheckerError,
    traits::checker::{Checker, CheckerOutcome},
};

const DEFAULT_DIGITS: u32 = 6;
const MAX_DIGITS: u32 = 15;

/// Compares whitespace-separated tokens; numbers may differ by less than
/// `10^-digits`, everything else must match exactly.
#[derive(Debug)]
pub struct PrecisionChecker {
    digits: u32,
    tolerance: f64,
}

impl PrecisionChecker {
    pub fn new(digits: u32) -> Result<Self, CheckerError> {
        if digits > MAX_DIGITS {
            return Err(CheckerError::InvalidParameter(format!(
                "precision must be at most {} digits, got {}",
                MAX_DIGITS, digits
            )));
        }
        Ok(Self {
            digits,
            tolerance: 10f64.powi(-(digits as i32)),
        })
    }

    /// `parameter` is the number of decimal digits, 6 when absent.
    pub fn from_parameter(parameter: Option<&str>) -> Result<Self, CheckerError> {
        let digits = match parameter.map(str::trim) {
            None | Some("") => DEFAULT_DIGITS,
            Some(p) => p.parse().map_err(|_| {
                CheckerError::InvalidParameter(format!("precision {:?} is not a digit count", p))
            })?,
        };
        Self::new(digits)
    }

    fn tokens_match(&self, expected: &str, actual: &str) -> bool {
        match (parse_number(expected), parse_number(actual)) {
            (Some(e), Some(a)) => (e - a).abs() < self.tolerance || e == a,
            _ => expected == actual,
        }
    }
}

impl Checker for PrecisionChecker {
    fn compare(&self, expected: &str, actual: &str) -> Result<CheckerOutcome, CheckerError> {
        let expected: Vec<&str> = expected.split_whitespace().collect();
        let actual: Vec<&str> = actual.split_whitespace().collect();

        for (idx, (e, a)) in expected.iter().zip(actual.iter()).enumerate() {
            if !self.tokens_match(e, a) {
                return Ok(CheckerOutcome::wrong(format!(
                    "Token {} differs by more than {} digits",
                    idx + 1,
                    self.digits
                )));
            }
        }

        if expected.len() != actual.len() {
            return Ok(CheckerOutcome::wrong(format!(
                "Expected {} tokens, got {}",
                expected.len(),
                actual.len()
            )));
        }

        Ok(CheckerOutcome::correct())
    }
}

fn parse_number(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}
