pub const UPDATE_TX_ERR: &str = "Failed to send submission update to publisher";
pub const JOB_TX_ERR: &str = "Failed to send submission job to judging pipeline";
pub const REPORT_PATTERN_ERR: &str = "Failed to compile test report pattern";

/// Returned instead of stdout/stderr when a stream can't be drained in time
/// or grows past the configured cap.
pub const OUTPUT_TOO_LARGE: &str = "<output too large>";

/// Shown to submitters for any infrastructure failure.
pub const ADMIN_NOTIFIED_MSG: &str =
    "Something went wrong while judging this submission. The administrator was notified.";

pub const DEFAULT_CONFIG_PATH: &str = "judge.toml";
pub const CONFIG_PATH_ENV: &str = "JUDGE_CONFIG";

pub const DEFAULT_PATH_ENV: &str = "/usr/local/bin:/usr/bin:/bin";

pub const DEFAULT_TIMEOUT_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_WATCHDOG_EXTRA_CAP_MS: u64 = 5_000;
pub const DEFAULT_WATCHDOG_CEILING_MS: u64 = 120_000;
pub const DEFAULT_MEMORY_SAMPLE_INTERVAL_MS: u64 = 15;
pub const DEFAULT_OUTPUT_GRACE_PERIOD_MS: u64 = 200;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

pub const DEFAULT_COMPILE_TIME_LIMIT_MS: u64 = 30_000;
pub const DEFAULT_COMPILE_MEMORY_LIMIT_BYTES: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_MAX_ARCHIVE_ENTRIES: usize = 1_000;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

pub const KILL_ATTEMPTS: u32 = 3;
pub const KILL_RETRY_DELAY_MS: u64 = 1_000;
pub const KILL_CONFIRM_TIMEOUT_MS: u64 = 2_000;
pub const KILL_CONFIRM_POLL_MS: u64 = 20;

pub const STDIN_FLUSH_TIMEOUT_MS: u64 = 100;

/// Length of expected/actual fragments published for trial tests.
pub const DETAILS_FRAGMENT_LEN: usize = 256;
/// Length of stderr kept as execution comment.
pub const EXECUTION_COMMENT_LEN: usize = 1024;
