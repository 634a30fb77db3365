use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::mpsc::Sender,
    task::JoinHandle,
};
use tokio_stream::{StreamExt, wrappers::LinesStream};
use tokio_util::sync::CancellationToken;

use crate::{constants::JOB_TX_ERR, core::domain::SubmissionJob};

/// Reads one JSON-encoded `SubmissionJob` per line until the input ends or
/// `shutdown` fires. Lines that don't parse are logged and skipped.
pub fn handle_accepting<R>(
    reader: R,
    job_tx: Sender<SubmissionJob>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = LinesStream::new(reader.lines());

        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next() => line,
            };

            let line = match line {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    tracing::error!("Failed to read job input: {}", e);
                    break;
                }
                None => break,
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<SubmissionJob>(&line) {
                Ok(job) => {
                    tracing::info!(submission_id = %job.submission_id, "Accepted submission");
                    job_tx.send(job).await.expect(JOB_TX_ERR);
                }
                Err(e) => tracing::warn!("Skipping malformed job: {}", e),
            }
        }

        tracing::debug!("Job intake finished");
    })
}
