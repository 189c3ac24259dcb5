//! Job database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use strum::VariantArray;

use crate::database::query::Column;
use crate::domain::JobStatus;
use crate::{Error, Result};

/// Job database model.
/// One user submission and everything the pipeline produced for it.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct JobDbModel {
    pub id: String,
    pub user_email: String,
    pub user_name: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub input_image_url: String,
    /// Object-storage key of the uploaded input image.
    pub input_image_key: String,
    pub style: String,
    /// RECEIVED, PROCESSING, VEO_GENERATING, VEO_COMPLETED, QUE_PROCESSING,
    /// RENDERING, COMPLETED, FAILED, CANCELLED
    pub status: String,
    pub veo_video_url: Option<String>,
    pub veo_video_key: Option<String>,
    /// Seconds.
    pub veo_duration: Option<i64>,
    pub que_job_id: Option<String>,
    pub que_job_status: Option<String>,
    pub final_video_url: Option<String>,
    pub final_video_key: Option<String>,
    /// Seconds.
    pub final_video_duration: Option<i64>,
    /// Bytes.
    pub final_video_size: Option<i64>,
    pub signed_url: Option<String>,
    /// Unix epoch milliseconds (UTC) after which `signed_url` is invalid.
    pub signed_url_expiry: Option<i64>,
    pub email_sent: bool,
    pub email_sent_at: Option<i64>,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
    /// Failure-triggered re-attempts so far. Never decreases.
    pub retry_count: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Milliseconds between `started_at` and `completed_at`.
    pub total_processing_time: Option<i64>,
    pub converted_to_order: bool,
    pub order_id: Option<String>,
    pub content_moderated: bool,
    /// Opaque JSON blob returned by the moderation provider.
    pub content_moderation_result: Option<String>,
    /// Unix epoch milliseconds (UTC) when created.
    pub created_at: i64,
    /// Unix epoch milliseconds (UTC) when last updated.
    pub updated_at: i64,
}

impl JobDbModel {
    /// Create a freshly received job.
    pub fn new(
        user_email: impl Into<String>,
        user_name: impl Into<String>,
        input_image_url: impl Into<String>,
        input_image_key: impl Into<String>,
        style: impl Into<String>,
    ) -> Self {
        let now = crate::database::time::now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_email: user_email.into(),
            user_name: user_name.into(),
            ip_address: None,
            user_agent: None,
            input_image_url: input_image_url.into(),
            input_image_key: input_image_key.into(),
            style: style.into(),
            status: JobStatus::Received.as_str().to_string(),
            veo_video_url: None,
            veo_video_key: None,
            veo_duration: None,
            que_job_id: None,
            que_job_status: None,
            final_video_url: None,
            final_video_key: None,
            final_video_duration: None,
            final_video_size: None,
            signed_url: None,
            signed_url_expiry: None,
            email_sent: false,
            email_sent_at: None,
            error_message: None,
            error_stack: None,
            retry_count: 0,
            started_at: None,
            completed_at: None,
            total_processing_time: None,
            converted_to_order: false,
            order_id: None,
            content_moderated: false,
            content_moderation_result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the requester's network identity.
    pub fn with_client(mut self, ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Parsed status. Fails on a value this build does not know.
    pub fn status(&self) -> Result<JobStatus> {
        JobStatus::parse(&self.status)
            .ok_or_else(|| Error::Other(format!("job {} has unknown status '{}'", self.id, self.status)))
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status.as_str().to_string();
    }

    /// Completed and not yet turned into an order.
    pub fn is_convertible(&self) -> bool {
        !self.converted_to_order && matches!(self.status(), Ok(JobStatus::Completed))
    }

    /// Parsed moderation result.
    pub fn moderation_result(&self) -> Result<Option<serde_json::Value>> {
        self.content_moderation_result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(Error::from)
    }

    pub fn set_moderation_result(&mut self, result: &serde_json::Value) -> Result<()> {
        self.content_moderated = true;
        self.content_moderation_result = Some(serde_json::to_string(result)?);
        Ok(())
    }
}

/// Columns of the `jobs` table that may be used for lookups and ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr, strum::VariantArray,
)]
#[strum(serialize_all = "snake_case")]
pub enum JobField {
    Id,
    UserEmail,
    UserName,
    IpAddress,
    UserAgent,
    InputImageUrl,
    InputImageKey,
    Style,
    Status,
    VeoVideoUrl,
    VeoVideoKey,
    VeoDuration,
    QueJobId,
    QueJobStatus,
    FinalVideoUrl,
    FinalVideoKey,
    FinalVideoDuration,
    FinalVideoSize,
    SignedUrl,
    SignedUrlExpiry,
    EmailSent,
    EmailSentAt,
    ErrorMessage,
    ErrorStack,
    RetryCount,
    StartedAt,
    CompletedAt,
    TotalProcessingTime,
    ConvertedToOrder,
    OrderId,
    ContentModerated,
    ContentModerationResult,
    CreatedAt,
    UpdatedAt,
}

impl Column for JobField {
    fn column(&self) -> &'static str {
        (*self).into()
    }

    fn all() -> &'static [Self] {
        Self::VARIANTS
    }
}

impl std::str::FromStr for JobField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

/// Filter criteria for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilters {
    /// Match any of these statuses; empty matches every job.
    pub statuses: Vec<JobStatus>,
}

impl JobFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        if !self.statuses.contains(&status) {
            self.statuses.push(status);
        }
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        for status in statuses {
            self = self.with_status(status);
        }
        self
    }

    /// Jobs still moving through the pipeline.
    pub fn active() -> Self {
        Self::new().with_statuses(
            JobStatus::PIPELINE
                .into_iter()
                .filter(|s| !s.is_terminal()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_new() {
        let job = JobDbModel::new("a@b.c", "Ann", "https://img", "uploads/1.png", "anime");
        assert_eq!(job.status, "RECEIVED");
        assert_eq!(job.status().unwrap(), JobStatus::Received);
        assert_eq!(job.retry_count, 0);
        assert!(!job.converted_to_order);
        assert_eq!(job.created_at, job.updated_at);
        assert!(!job.is_convertible());
    }

    #[test]
    fn test_unknown_status_is_error() {
        let mut job = JobDbModel::new("a@b.c", "Ann", "u", "k", "s");
        job.status = "BOGUS".to_string();
        assert!(job.status().is_err());
    }

    #[test]
    fn test_field_names_match_schema() {
        assert_eq!(JobField::Id.column(), "id");
        assert_eq!(JobField::VeoVideoUrl.column(), "veo_video_url");
        assert_eq!(JobField::QueJobId.column(), "que_job_id");
        assert_eq!(JobField::ContentModerationResult.column(), "content_moderation_result");
        assert_eq!(JobField::all().len(), 34);
        assert_eq!("final_video_size".parse::<JobField>().unwrap(), JobField::FinalVideoSize);
        assert!("password".parse::<JobField>().is_err());
    }

    #[test]
    fn test_filters_dedupe() {
        let filters = JobFilters::new()
            .with_status(JobStatus::Failed)
            .with_status(JobStatus::Failed);
        assert_eq!(filters.statuses, vec![JobStatus::Failed]);
        assert_eq!(JobFilters::active().statuses.len(), 6);
    }

    #[test]
    fn test_moderation_result() {
        let mut job = JobDbModel::new("a@b.c", "Ann", "u", "k", "s");
        assert_eq!(job.moderation_result().unwrap(), None);
        job.set_moderation_result(&serde_json::json!({"flagged": false}))
            .unwrap();
        assert!(job.content_moderated);
        assert_eq!(
            job.moderation_result().unwrap(),
            Some(serde_json::json!({"flagged": false}))
        );
    }
}
