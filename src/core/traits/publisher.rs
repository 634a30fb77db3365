use uuid::Uuid;

use crate::core::domain::SubmissionUpdate;

#[derive(Debug, thiserror::Error)]
#[error("Failed to publish update for {submission_id}: {msg}")]
pub struct PublishError {
    pub submission_id: Uuid,
    pub msg: String,
}

/// Outbound side of the coordinator: `publish(submissionId, update)`.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Publisher: std::fmt::Debug + Send + Sync {
    async fn publish(&self, update: SubmissionUpdate) -> Result<(), PublishError>;
}
