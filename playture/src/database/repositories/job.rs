//! Job repository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use super::{Repository, resolve_id};
use crate::database::models::{JobDbModel, JobField, JobFilters};
use crate::database::query::{
    Column, FieldValue, Pagination, bind_page, order_clause, placeholders, where_clause,
};
use crate::database::scope::{self, TxScope};
use crate::database::time::now_ms;
use crate::domain::JobStatus;
use crate::{Error, Result};

/// SQLx implementation of the job repository.
#[derive(Debug, Clone)]
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn check_status(job: &JobDbModel) -> Result<()> {
        if JobStatus::parse(&job.status).is_none() {
            return Err(Error::validation(format!(
                "unknown job status '{}'",
                job.status
            )));
        }
        if job.retry_count < 0 {
            return Err(Error::validation("retry_count must not be negative"));
        }
        Ok(())
    }

    fn filter_conditions(filters: &JobFilters) -> Vec<String> {
        let mut conditions = Vec::new();
        if !filters.statuses.is_empty() {
            conditions.push(format!(
                "status IN ({})",
                placeholders(filters.statuses.len())
            ));
        }
        conditions
    }
}

#[async_trait]
impl Repository for SqlxJobRepository {
    type Entity = JobDbModel;
    type Field = JobField;
    type Filters = JobFilters;

    fn id_field() -> JobField {
        JobField::Id
    }

    async fn create(&self, job: &JobDbModel, tx: TxScope<'_>) -> Result<String> {
        Self::check_status(job)?;
        let id = resolve_id(&job.id);

        let query = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, user_email, user_name, ip_address, user_agent,
                input_image_url, input_image_key, style, status,
                veo_video_url, veo_video_key, veo_duration,
                que_job_id, que_job_status,
                final_video_url, final_video_key, final_video_duration, final_video_size,
                signed_url, signed_url_expiry, email_sent, email_sent_at,
                error_message, error_stack, retry_count,
                started_at, completed_at, total_processing_time,
                converted_to_order, order_id, content_moderated, content_moderation_result,
                created_at, updated_at
            ) VALUES (
                ?, ?, ?, ?, ?,
                ?, ?, ?, ?,
                ?, ?, ?,
                ?, ?,
                ?, ?, ?, ?,
                ?, ?, ?, ?,
                ?, ?, ?,
                ?, ?, ?,
                ?, ?, ?, ?,
                ?, ?
            )
            "#,
        )
        .bind(&id)
        .bind(&job.user_email)
        .bind(&job.user_name)
        .bind(&job.ip_address)
        .bind(&job.user_agent)
        .bind(&job.input_image_url)
        .bind(&job.input_image_key)
        .bind(&job.style)
        .bind(&job.status)
        .bind(&job.veo_video_url)
        .bind(&job.veo_video_key)
        .bind(job.veo_duration)
        .bind(&job.que_job_id)
        .bind(&job.que_job_status)
        .bind(&job.final_video_url)
        .bind(&job.final_video_key)
        .bind(job.final_video_duration)
        .bind(job.final_video_size)
        .bind(&job.signed_url)
        .bind(job.signed_url_expiry)
        .bind(job.email_sent)
        .bind(job.email_sent_at)
        .bind(&job.error_message)
        .bind(&job.error_stack)
        .bind(job.retry_count)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.total_processing_time)
        .bind(job.converted_to_order)
        .bind(&job.order_id)
        .bind(job.content_moderated)
        .bind(&job.content_moderation_result)
        .bind(job.created_at)
        .bind(job.updated_at);

        scope::execute(&self.pool, tx, query)
            .await
            .map_err(|e| Error::from_query("create job", e))?;

        debug!(job_id = %id, status = %job.status, "Created job");
        Ok(id)
    }

    async fn find_by_field(
        &self,
        field: JobField,
        value: FieldValue,
        tx: TxScope<'_>,
    ) -> Result<JobDbModel> {
        let sql = format!("SELECT * FROM jobs WHERE {} = ? LIMIT 1", field.column());
        let query = value.bind_to(sqlx::query_as::<_, JobDbModel>(&sql));

        scope::fetch_optional(&self.pool, tx, query)
            .await
            .map_err(|e| Error::from_query("find job", e))?
            .ok_or_else(|| Error::not_found("Job", format!("{}={}", field, value)))
    }

    async fn update(&self, job: &JobDbModel, tx: TxScope<'_>) -> Result<()> {
        Self::check_status(job)?;
        let now = now_ms();

        let query = sqlx::query(
            r#"
            UPDATE jobs SET
                user_email = ?,
                user_name = ?,
                ip_address = ?,
                user_agent = ?,
                input_image_url = ?,
                input_image_key = ?,
                style = ?,
                status = ?,
                veo_video_url = ?,
                veo_video_key = ?,
                veo_duration = ?,
                que_job_id = ?,
                que_job_status = ?,
                final_video_url = ?,
                final_video_key = ?,
                final_video_duration = ?,
                final_video_size = ?,
                signed_url = ?,
                signed_url_expiry = ?,
                email_sent = ?,
                email_sent_at = ?,
                error_message = ?,
                error_stack = ?,
                retry_count = ?,
                started_at = ?,
                completed_at = ?,
                total_processing_time = ?,
                converted_to_order = ?,
                order_id = ?,
                content_moderated = ?,
                content_moderation_result = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&job.user_email)
        .bind(&job.user_name)
        .bind(&job.ip_address)
        .bind(&job.user_agent)
        .bind(&job.input_image_url)
        .bind(&job.input_image_key)
        .bind(&job.style)
        .bind(&job.status)
        .bind(&job.veo_video_url)
        .bind(&job.veo_video_key)
        .bind(job.veo_duration)
        .bind(&job.que_job_id)
        .bind(&job.que_job_status)
        .bind(&job.final_video_url)
        .bind(&job.final_video_key)
        .bind(job.final_video_duration)
        .bind(job.final_video_size)
        .bind(&job.signed_url)
        .bind(job.signed_url_expiry)
        .bind(job.email_sent)
        .bind(job.email_sent_at)
        .bind(&job.error_message)
        .bind(&job.error_stack)
        .bind(job.retry_count)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.total_processing_time)
        .bind(job.converted_to_order)
        .bind(&job.order_id)
        .bind(job.content_moderated)
        .bind(&job.content_moderation_result)
        .bind(now)
        .bind(&job.id);

        let result = scope::execute(&self.pool, tx, query)
            .await
            .map_err(|e| Error::from_query("update job", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Job", &job.id));
        }

        debug!(job_id = %job.id, status = %job.status, "Updated job");
        Ok(())
    }

    async fn delete(&self, id: &str, tx: TxScope<'_>) -> Result<()> {
        let query = sqlx::query("DELETE FROM jobs WHERE id = ?").bind(id);
        let result = scope::execute(&self.pool, tx, query)
            .await
            .map_err(|e| Error::from_query("delete job", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Job", id));
        }

        debug!(job_id = %id, "Deleted job");
        Ok(())
    }

    async fn list(
        &self,
        filters: &JobFilters,
        order_by: JobField,
        ascending: bool,
        pagination: Pagination,
        tx: TxScope<'_>,
    ) -> Result<Vec<JobDbModel>> {
        pagination.validate()?;

        let conditions = Self::filter_conditions(filters);
        let sql = format!(
            "SELECT * FROM jobs {} {} LIMIT ? OFFSET ?",
            where_clause(&conditions),
            order_clause(order_by, ascending)
        );

        let mut query = sqlx::query_as::<_, JobDbModel>(&sql);
        for status in &filters.statuses {
            query = query.bind(status.as_str());
        }
        let query = bind_page(query, &pagination);

        let jobs = scope::fetch_all(&self.pool, tx, query)
            .await
            .map_err(|e| Error::from_query("list jobs", e))?;

        if jobs.is_empty() {
            return Err(Error::not_found(
                "Job",
                format!(
                    "statuses={:?} page={} limit={}",
                    filters.statuses, pagination.page, pagination.limit
                ),
            ));
        }
        Ok(jobs)
    }

    async fn count(&self, filters: &JobFilters, tx: TxScope<'_>) -> Result<u64> {
        let conditions = Self::filter_conditions(filters);
        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause(&conditions));

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for status in &filters.statuses {
            query = query.bind(status.as_str());
        }

        let count = scope::fetch_scalar(&self.pool, tx, query)
            .await
            .map_err(|e| Error::from_query("count jobs", e))?;
        Ok(count.max(0) as u64)
    }
}
