use crate::core::error::CheckerError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckerOutcome {
    pub is_correct: bool,
    pub message: String,
}

impl CheckerOutcome {
    pub fn correct() -> Self {
        Self {
            is_correct: true,
            message: String::new(),
        }
    }

    pub fn wrong(message: impl Into<String>) -> Self {
        Self {
            is_correct: false,
            message: message.into(),
        }
    }
}

/// Output comparison policy. Any parameter is bound when the checker is built.
#[mockall::automock]
pub trait Checker: std::fmt::Debug + Send + Sync {
    fn compare(&self, expected: &str, actual: &str) -> Result<CheckerOutcome, CheckerError>;
}
