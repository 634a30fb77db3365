use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::FuturesUnordered;
use tokio::{
    sync::{
        Semaphore,
        mpsc::{Receiver, Sender},
    },
    task::JoinHandle,
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::PipelineSettings,
    constants::UPDATE_TX_ERR,
    core::{
        domain::{SubmissionJob, SubmissionState, SubmissionUpdate},
        error::EngineError,
    },
    strategies::registry::StrategyRegistry,
};

/// Submission id -> cancellation of the attempt currently judging it.
pub type InFlight = Arc<DashMap<Uuid, CancellationToken>>;

/// Worker pool: at most `settings.workers` submissions are judged at once.
/// The returned task ends once the job channel is closed and every
/// submission it started is finished.
#[tracing::instrument(skip_all)]
pub fn handle_judging(
    mut job_rx: Receiver<SubmissionJob>,
    update_tx: Sender<SubmissionUpdate>,
    registry: Arc<StrategyRegistry>,
    settings: PipelineSettings,
    in_flight: InFlight,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let workers = Arc::new(Semaphore::new(settings.workers));
        let mut running = FuturesUnordered::new();

        loop {
            let job = tokio::select! {
                Some(joined) = running.next(), if !running.is_empty() => {
                    log_join(joined);
                    continue;
                }
                job = job_rx.recv() => job,
            };
            let Some(job) = job else {
                break;
            };

            let submission_id = job.submission_id;
            if in_flight.contains_key(&submission_id) {
                tracing::warn!(%submission_id, "Submission is already being judged, dropping duplicate");
                continue;
            }
            let cancel = shutdown.child_token();
            in_flight.insert(submission_id, cancel.clone());

            let Ok(permit) = workers.clone().acquire_owned().await else {
                break;
            };
            let update_tx = update_tx.clone();
            let registry = registry.clone();
            let settings = settings.clone();
            let in_flight = in_flight.clone();

            running.push(tokio::spawn(async move {
                judge(job, &update_tx, &registry, &settings, cancel).await;
                in_flight.remove(&submission_id);
                drop(permit);
            }));
        }

        while let Some(joined) = running.next().await {
            log_join(joined);
        }
        tracing::debug!("Judging finished");
    })
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!("Judging task failed: {}", e);
    }
}

async fn send(update_tx: &Sender<SubmissionUpdate>, submission_id: Uuid, state: SubmissionState) {
    update_tx
        .send(SubmissionUpdate::new(submission_id, state))
        .await
        .expect(UPDATE_TX_ERR);
}

#[tracing::instrument(skip_all, fields(submission_id = %job.submission_id, toolchain = %job.context.toolchain))]
async fn judge(
    job: SubmissionJob,
    update_tx: &Sender<SubmissionUpdate>,
    registry: &StrategyRegistry,
    settings: &PipelineSettings,
    cancel: CancellationToken,
) {
    let id = job.submission_id;
    send(update_tx, id, SubmissionState::Received).await;

    let strategy = match registry.get(&job.context.toolchain) {
        Ok(strategy) => strategy,
        Err(e) => {
            tracing::error!("Cannot judge submission: {}", e);
            send(update_tx, id, failed(&e)).await;
            return;
        }
    };

    for attempt in 1..=settings.max_attempts {
        send(update_tx, id, SubmissionState::Executing { attempt }).await;

        let err = match strategy.execute(&job.context, cancel.clone()).await {
            Ok(result) => {
                tracing::info!(
                    attempt,
                    compiled = result.is_compiled_successfully,
                    tests = result.test_results.len(),
                    "Submission judged"
                );
                send(update_tx, id, SubmissionState::Completed { result }).await;
                return;
            }
            Err(e) => e,
        };

        if cancel.is_cancelled() {
            // left unpublished so the coordinator redelivers it
            tracing::info!(attempt, "Judging interrupted by shutdown: {}", err);
            return;
        }
        if !err.is_retryable() || attempt == settings.max_attempts {
            tracing::error!(attempt, "Judging failed: {}", err);
            send(update_tx, id, failed(&err)).await;
            return;
        }

        tracing::warn!(attempt, "Judging attempt failed, retrying: {}", err);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(settings.retry_delay_ms)) => {}
        }
    }
}

fn failed(err: &EngineError) -> SubmissionState {
    SubmissionState::Failed {
        message: err.public_message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tokio::sync::mpsc;

    use super::*;
    use crate::constants::ADMIN_NOTIFIED_MSG;
    use crate::core::domain::{
        CheckerSelector, ExecutionContext, ExecutionResult, SubmissionSource,
    };
    use crate::core::error::ExecutorError;
    use crate::core::traits::strategy::MockExecutionStrategy;

    fn job(toolchain: &str) -> SubmissionJob {
        SubmissionJob {
            submission_id: Uuid::new_v4(),
            context: ExecutionContext {
                toolchain: toolchain.to_string(),
                source: SubmissionSource::Text {
                    code: "print('Hello')".to_string(),
                },
                skeleton: None,
                tests: vec![],
                time_limit_ms: 1000,
                memory_limit_bytes: 64 * 1024 * 1024,
                checker: CheckerSelector::default(),
            },
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            workers: 2,
            max_attempts: 3,
            retry_delay_ms: 1,
            channel_capacity: 10,
        }
    }

    fn registry(strategy: MockExecutionStrategy) -> Arc<StrategyRegistry> {
        let mut registry = StrategyRegistry::default();
        registry.insert("python", Arc::new(strategy));
        Arc::new(registry)
    }

    fn spawn_error() -> EngineError {
        EngineError::Executor(ExecutorError::Spawn {
            program: PathBuf::from("/usr/bin/python3"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    }

    async fn states(update_rx: &mut mpsc::Receiver<SubmissionUpdate>, count: usize) -> Vec<SubmissionState> {
        let mut states = Vec::new();
        for _ in 0..count {
            states.push(update_rx.recv().await.unwrap().state);
        }
        states
    }

    #[tokio::test]
    async fn test_successful_submission() {
        let mut strategy = MockExecutionStrategy::new();
        strategy
            .expect_execute()
            .times(1)
            .returning(|_, _| Ok(ExecutionResult::completed("", vec![])));

        let (job_tx, job_rx) = mpsc::channel(10);
        let (update_tx, mut update_rx) = mpsc::channel(10);
        let handle = handle_judging(
            job_rx,
            update_tx,
            registry(strategy),
            settings(),
            InFlight::default(),
            CancellationToken::new(),
        );

        let job = job("python");
        job_tx.send(job.clone()).await.unwrap();

        let states = states(&mut update_rx, 3).await;
        assert!(matches!(states[0], SubmissionState::Received));
        assert!(matches!(states[1], SubmissionState::Executing { attempt: 1 }));
        assert!(matches!(
            &states[2],
            SubmissionState::Completed { result } if result.is_compiled_successfully
        ));

        drop(job_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried() {
        let mut strategy = MockExecutionStrategy::new();
        let mut seq = mockall::Sequence::new();
        strategy
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(spawn_error()));
        strategy
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ExecutionResult::compile_failed("SyntaxError")));

        let (job_tx, job_rx) = mpsc::channel(10);
        let (update_tx, mut update_rx) = mpsc::channel(10);
        handle_judging(
            job_rx,
            update_tx,
            registry(strategy),
            settings(),
            InFlight::default(),
            CancellationToken::new(),
        );
        job_tx.send(job("python")).await.unwrap();

        let states = states(&mut update_rx, 4).await;
        assert!(matches!(states[1], SubmissionState::Executing { attempt: 1 }));
        assert!(matches!(states[2], SubmissionState::Executing { attempt: 2 }));
        assert!(matches!(
            &states[3],
            SubmissionState::Completed { result } if !result.is_compiled_successfully
        ));
    }

    #[tokio::test]
    async fn test_attempts_are_bounded_and_details_hidden() {
        let mut strategy = MockExecutionStrategy::new();
        strategy
            .expect_execute()
            .times(3)
            .returning(|_, _| Err(spawn_error()));

        let (job_tx, job_rx) = mpsc::channel(10);
        let (update_tx, mut update_rx) = mpsc::channel(10);
        handle_judging(
            job_rx,
            update_tx,
            registry(strategy),
            settings(),
            InFlight::default(),
            CancellationToken::new(),
        );
        job_tx.send(job("python")).await.unwrap();

        let states = states(&mut update_rx, 5).await;
        match &states[4] {
            SubmissionState::Failed { message } => {
                assert_eq!(message, ADMIN_NOTIFIED_MSG);
                assert!(!message.contains("python3"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_report_mismatch_is_not_retried() {
        let mut strategy = MockExecutionStrategy::new();
        strategy.expect_execute().times(1).returning(|_, _| {
            Err(EngineError::ReportMismatch {
                msg: "3 failures reported, 2 failure blocks found".to_string(),
            })
        });

        let (job_tx, job_rx) = mpsc::channel(10);
        let (update_tx, mut update_rx) = mpsc::channel(10);
        handle_judging(
            job_rx,
            update_tx,
            registry(strategy),
            settings(),
            InFlight::default(),
            CancellationToken::new(),
        );
        job_tx.send(job("python")).await.unwrap();

        let states = states(&mut update_rx, 3).await;
        assert!(matches!(states[2], SubmissionState::Failed { .. }));
        tokio::time::timeout(Duration::from_millis(100), update_rx.recv())
            .await
            .expect_err("No further updates expected");
    }

    #[tokio::test]
    async fn test_unknown_toolchain_fails_without_executing() {
        let mut strategy = MockExecutionStrategy::new();
        strategy.expect_execute().never();

        let (job_tx, job_rx) = mpsc::channel(10);
        let (update_tx, mut update_rx) = mpsc::channel(10);
        handle_judging(
            job_rx,
            update_tx,
            registry(strategy),
            settings(),
            InFlight::default(),
            CancellationToken::new(),
        );
        job_tx.send(job("cobol")).await.unwrap();

        let states = states(&mut update_rx, 2).await;
        assert!(matches!(states[0], SubmissionState::Received));
        assert!(matches!(states[1], SubmissionState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_submission_is_dropped() {
        let mut strategy = MockExecutionStrategy::new();
        strategy.expect_execute().never();

        let (job_tx, job_rx) = mpsc::channel(10);
        let (update_tx, mut update_rx) = mpsc::channel(10);
        let in_flight = InFlight::default();
        let job = job("python");
        in_flight.insert(job.submission_id, CancellationToken::new());

        let handle = handle_judging(
            job_rx,
            update_tx,
            registry(strategy),
            settings(),
            in_flight,
            CancellationToken::new(),
        );
        job_tx.send(job).await.unwrap();
        drop(job_tx);
        handle.await.unwrap();

        assert!(update_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_submission() {
        let mut strategy = MockExecutionStrategy::new();
        strategy.expect_execute().times(1).returning(|_, cancel| {
            assert!(cancel.is_cancelled());
            Err(EngineError::Cancelled)
        });

        let (job_tx, job_rx) = mpsc::channel(10);
        let (update_tx, mut update_rx) = mpsc::channel(10);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let handle = handle_judging(
            job_rx,
            update_tx,
            registry(strategy),
            settings(),
            InFlight::default(),
            shutdown,
        );
        job_tx.send(job("python")).await.unwrap();
        drop(job_tx);
        handle.await.unwrap();

        let states = states(&mut update_rx, 2).await;
        assert!(matches!(states[1], SubmissionState::Executing { attempt: 1 }));
        assert!(update_rx.recv().await.is_none());
    }
}
