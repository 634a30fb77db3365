use std::sync::Arc;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{Mutex, mpsc::Receiver},
    task::JoinHandle,
};

use crate::core::{
    domain::SubmissionUpdate,
    traits::publisher::{PublishError, Publisher},
};

/// Forwards every update to the publisher in the order it was produced.
/// A failed publish is logged and the next update is still delivered.
pub fn handle_publishing(
    mut update_rx: Receiver<SubmissionUpdate>,
    publisher: Arc<dyn Publisher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = update_rx.recv().await {
            if let Err(e) = publisher.publish(update).await {
                tracing::error!("{}", e);
            }
        }
        tracing::debug!("Publishing finished");
    })
}

/// Writes one JSON document per update.
pub struct JsonLinesPublisher {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl JsonLinesPublisher {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }
}

impl std::fmt::Debug for JsonLinesPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesPublisher").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Publisher for JsonLinesPublisher {
    async fn publish(&self, update: SubmissionUpdate) -> Result<(), PublishError> {
        let failure = |msg: String| PublishError {
            submission_id: update.submission_id,
            msg,
        };

        let mut line = serde_json::to_vec(&update).map_err(|e| failure(e.to_string()))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| failure(e.to_string()))?;
        writer.flush().await.map_err(|e| failure(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::core::domain::SubmissionState;
    use crate::core::traits::publisher::MockPublisher;

    #[tokio::test]
    async fn test_updates_are_published_in_order() {
        let id = Uuid::new_v4();
        let mut publisher = MockPublisher::new();
        let mut seq = mockall::Sequence::new();
        publisher
            .expect_publish()
            .withf(|u| matches!(u.state, SubmissionState::Received))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|u| {
                Err(PublishError {
                    submission_id: u.submission_id,
                    msg: "broker unavailable".to_string(),
                })
            });
        publisher
            .expect_publish()
            .withf(|u| matches!(u.state, SubmissionState::Executing { attempt: 1 }))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let (update_tx, update_rx) = mpsc::channel(10);
        let handle = handle_publishing(update_rx, Arc::new(publisher));

        update_tx
            .send(SubmissionUpdate::new(id, SubmissionState::Received))
            .await
            .unwrap();
        update_tx
            .send(SubmissionUpdate::new(id, SubmissionState::Executing { attempt: 1 }))
            .await
            .unwrap();
        drop(update_tx);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_json_lines_publisher_writes_one_line_per_update() {
        let (writer, mut reader) = tokio::io::duplex(4096);
        let publisher = JsonLinesPublisher::new(writer);
        let id = Uuid::new_v4();

        publisher
            .publish(SubmissionUpdate::new(id, SubmissionState::Received))
            .await
            .unwrap();
        publisher
            .publish(SubmissionUpdate::new(
                id,
                SubmissionState::Failed {
                    message: "oops".to_string(),
                },
            ))
            .await
            .unwrap();
        drop(publisher);

        let mut output = String::new();
        reader.read_to_string(&mut output).await.unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["state"], "received");
        assert_eq!(lines[1]["state"], "failed");
        assert_eq!(lines[1]["message"], "oops");
        assert_eq!(lines[1]["submission_id"], id.to_string());
    }
}
