use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::resource::{Resource, setrlimit};
use nix::sys::wait::{Id, WaitPidFlag, waitid};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ExecutorSettings,
    constants::{KILL_CONFIRM_TIMEOUT_MS, STDIN_FLUSH_TIMEOUT_MS},
    core::{
        domain::{ProcessExecutionResult, ProcessRequest, ProcessResultType},
        error::{EngineError, ExecutorError},
        traits::executor::ProcessExecutor,
    },
    native::{
        output,
        process_tree::{KillReason, ProcessTree},
        procfs,
        sampler::ResourceSampler,
        watchdog::{Watchdog, watchdog_timeout},
    },
};

/// Runs programs directly on the host.
///
/// The standard variant is meant for trusted toolchains (compilers). The
/// restricted variant switches to a low-privilege identity before `exec`
/// and is what submitted programs run under.
#[derive(Clone, Debug)]
pub struct NativeProcessExecutor {
    settings: ExecutorSettings,
    identity: Option<(u32, u32)>,
}

impl NativeProcessExecutor {
    pub fn standard(settings: ExecutorSettings) -> Self {
        NativeProcessExecutor {
            settings,
            identity: None,
        }
    }

    pub fn restricted(settings: ExecutorSettings, uid: u32, gid: u32) -> Self {
        NativeProcessExecutor {
            settings,
            identity: Some((uid, gid)),
        }
    }

    /// Restricted when `[executor.restricted]` is configured, standard otherwise.
    pub fn from_settings(settings: &ExecutorSettings) -> Result<Self, EngineError> {
        match &settings.restricted {
            Some(identity) => {
                let (uid, gid) = identity.resolve()?;
                Ok(Self::restricted(settings.clone(), uid, gid))
            }
            None => Ok(Self::standard(settings.clone())),
        }
    }

    pub fn is_restricted(&self) -> bool {
        self.identity.is_some()
    }

    fn primary_timeout(&self, request: &ProcessRequest) -> Duration {
        let multiplier = request
            .timeout_multiplier
            .unwrap_or(self.settings.timeout_multiplier);
        Duration::try_from_secs_f64(request.time_limit_ms as f64 * multiplier / 1000.0)
            .unwrap_or(Duration::MAX)
    }

    fn build_command(&self, request: &ProcessRequest) -> Command {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .current_dir(&request.working_dir)
            .env_clear()
            .env("PATH", &self.settings.path)
            .envs(&self.settings.environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        if let Some((uid, gid)) = self.identity {
            cmd.gid(gid).uid(uid);
            // SAFETY: setrlimit is async-signal-safe and touches no shared state.
            unsafe {
                cmd.pre_exec(|| {
                    setrlimit(Resource::RLIMIT_CORE, 0, 0).map_err(std::io::Error::from)
                });
            }
        }

        cmd
    }
}

enum Outcome {
    Exited,
    Killed,
}

#[async_trait::async_trait]
impl ProcessExecutor for NativeProcessExecutor {
    #[tracing::instrument(skip_all, fields(program = %request.program.display()))]
    async fn execute(
        &self,
        request: ProcessRequest,
        cancel: CancellationToken,
    ) -> Result<ProcessExecutionResult, ExecutorError> {
        if !request.working_dir.is_dir() {
            return Err(ExecutorError::WorkingDirectory {
                path: request.working_dir.clone(),
            });
        }

        let primary = self.primary_timeout(&request);
        let watchdog_after = watchdog_timeout(
            primary,
            Duration::from_millis(self.settings.watchdog_extra_cap_ms),
            Duration::from_millis(self.settings.watchdog_ceiling_ms),
        );

        let mut child =
            self.build_command(&request)
                .spawn()
                .map_err(|source| ExecutorError::Spawn {
                    program: request.program.clone(),
                    source,
                })?;
        let started = Instant::now();
        let pid = child.id().ok_or_else(|| ExecutorError::MissingPid {
            program: request.program.clone(),
        })?;
        let tree = ProcessTree::new(pid);
        tracing::debug!(pid, primary_ms = primary.as_millis() as u64, "Process started");

        // Readers start before stdin is written, so a program echoing its
        // input can't deadlock on a full pipe.
        let max_output = self.settings.max_output_bytes;
        let stdout = child
            .stdout
            .take()
            .map(|s| tokio::spawn(output::capture(s, max_output)));
        let stderr = child
            .stderr
            .take()
            .map(|s| tokio::spawn(output::capture(s, max_output)));
        let stdin = child
            .stdin
            .take()
            .map(|s| tokio::spawn(output::feed(s, request.stdin.clone())));

        let memory_exceeded = CancellationToken::new();
        let sampler = ResourceSampler::start(
            tree.clone(),
            self.settings.memory_sample_interval(),
            request.memory_limit_bytes,
            memory_exceeded.clone(),
        );

        // External cancellation and watchdog expiry both land in `scope`.
        let scope = cancel.child_token();
        let watchdog = Watchdog::arm(tree.clone(), watchdog_after, scope.clone());

        let mut exit = tokio::task::spawn_blocking(move || wait_for_exit(pid));

        let outcome = tokio::select! {
            biased;
            _ = &mut exit => Outcome::Exited,
            _ = memory_exceeded.cancelled() => {
                tree.terminate(KillReason::MemoryLimit).await;
                Outcome::Killed
            }
            _ = tokio::time::sleep(primary) => {
                tree.terminate(KillReason::TimeLimit).await;
                Outcome::Killed
            }
            _ = scope.cancelled() => {
                if tree.kill_reason().is_none() {
                    tree.terminate(KillReason::Cancelled).await;
                }
                Outcome::Killed
            }
        };

        let exit_observed = match outcome {
            Outcome::Exited => true,
            Outcome::Killed => {
                tokio::time::timeout(Duration::from_millis(KILL_CONFIRM_TIMEOUT_MS), &mut exit)
                    .await
                    .is_ok()
            }
        };
        let time_worked = started.elapsed();

        // The leader is a zombie now: its counters are final, and its pid
        // can't be reused until it is reaped below.
        let final_stat = if exit_observed {
            procfs::read_stat(pid as i32)
        } else {
            None
        };
        if exit_observed {
            tree.sweep();
        }

        let memory_used = sampler.stop().await;
        watchdog.disarm();

        let status = if exit_observed {
            Some(reap(&mut child).await?)
        } else {
            tracing::error!(pid, "Process did not exit after being killed, leaving it to the reaper");
            None
        };

        if let Some(stdin) = stdin {
            let abort = stdin.abort_handle();
            if tokio::time::timeout(Duration::from_millis(STDIN_FLUSH_TIMEOUT_MS), stdin)
                .await
                .is_err()
            {
                abort.abort();
                tracing::debug!(pid, "Stdin was not flushed before exit");
            }
        }

        let grace = self.settings.output_grace_period();
        let stdout = output::collect(stdout, grace, "stdout").await;
        let stderr = output::collect(stderr, grace, "stderr").await;

        let (user_processor_time, privileged_processor_time) = final_stat
            .map(|s| (s.user_time(), s.system_time()))
            .unwrap_or_default();

        let (result_type, was_killed) = classify(
            tree.kill_reason(),
            status.as_ref().is_some_and(ExitStatus::success),
            memory_used,
            request.memory_limit_bytes,
            user_processor_time + privileged_processor_time,
            Duration::from_millis(request.time_limit_ms),
        );

        tracing::debug!(
            pid,
            ?result_type,
            was_killed,
            time_ms = time_worked.as_millis() as u64,
            memory_used,
            "Process finished"
        );

        Ok(ProcessExecutionResult {
            stdout,
            stderr,
            exit_code: status.and_then(|s| s.code()),
            time_worked,
            user_processor_time,
            privileged_processor_time,
            memory_used_bytes: memory_used,
            result_type,
            was_killed,
        })
    }
}

/// Blocks until the leader exits without reaping it.
fn wait_for_exit(pid: u32) {
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT;
    loop {
        match waitid(Id::Pid(Pid::from_raw(pid as i32)), flags) {
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) | Ok(_) => return,
            Err(e) => {
                tracing::warn!(pid, "waitid failed: {}", e);
                return;
            }
        }
    }
}

async fn reap(child: &mut tokio::process::Child) -> Result<ExitStatus, ExecutorError> {
    match tokio::time::timeout(Duration::from_millis(KILL_CONFIRM_TIMEOUT_MS), child.wait()).await {
        Ok(status) => status.map_err(|source| ExecutorError::Wait { source }),
        Err(_) => Err(ExecutorError::Wait {
            source: std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "exited process could not be reaped",
            ),
        }),
    }
}

/// A recorded kill decides the outcome; otherwise the measurements do.
fn classify(
    kill_reason: Option<KillReason>,
    success: bool,
    memory_used: u64,
    memory_limit: u64,
    processor_time: Duration,
    time_limit: Duration,
) -> (ProcessResultType, bool) {
    match kill_reason {
        Some(KillReason::MemoryLimit) => (ProcessResultType::MemoryLimit, true),
        Some(KillReason::TimeLimit | KillReason::Watchdog) => (ProcessResultType::TimeLimit, true),
        Some(KillReason::Cancelled) => (ProcessResultType::Killed, true),
        None if memory_used > memory_limit => (ProcessResultType::MemoryLimit, false),
        None if processor_time > time_limit => (ProcessResultType::TimeLimit, false),
        None if !success => (ProcessResultType::RunTimeError, false),
        None => (ProcessResultType::Success, false),
    }
}
