//! Turning a completed job into its order.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::database::models::{JobDbModel, JobField, OrderDbModel, OrderDraft, OrderField};
use crate::database::repositories::Repository;
use crate::database::{TxScope, UnitOfWork};
use crate::domain::JobStatus;
use crate::{Error, Result};

/// The job and order as stored after a successful conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionOutcome {
    pub job: JobDbModel,
    pub order: OrderDbModel,
}

/// Links a completed job to exactly one order.
///
/// The job is flagged and the order inserted in one unit of work; if either
/// write fails neither is kept.
pub struct OrderConversionService<J, O>
where
    J: Repository<Entity = JobDbModel, Field = JobField>,
    O: Repository<Entity = OrderDbModel, Field = OrderField>,
{
    uow: UnitOfWork,
    jobs: Arc<J>,
    orders: Arc<O>,
}

impl<J, O> OrderConversionService<J, O>
where
    J: Repository<Entity = JobDbModel, Field = JobField> + 'static,
    O: Repository<Entity = OrderDbModel, Field = OrderField> + 'static,
{
    pub fn new(uow: UnitOfWork, jobs: Arc<J>, orders: Arc<O>) -> Self {
        Self { uow, jobs, orders }
    }

    /// Convert `job_id` into an order built from `draft`.
    ///
    /// Fails with [`Error::NotConvertible`] unless the job is `COMPLETED` and
    /// not yet converted.
    pub async fn convert(&self, job_id: &str, draft: OrderDraft) -> Result<ConversionOutcome> {
        draft.validate()?;

        let jobs = Arc::clone(&self.jobs);
        let orders = Arc::clone(&self.orders);
        let job_id = job_id.to_string();

        let outcome = self
            .uow
            .run_default(move |conn| {
                Box::pin(async move {
                    let mut job = jobs.find_by_id(&job_id, TxScope::from(&mut *conn)).await?;
                    ensure_convertible(&job)?;

                    let order = OrderDbModel::from_job(&job, draft);
                    job.converted_to_order = true;
                    job.order_id = Some(order.id.clone());

                    // jobs.order_id is checked at commit, so the job may be
                    // written before the order exists
                    jobs.update(&job, TxScope::from(&mut *conn)).await?;
                    let order_id = orders.create(&order, TxScope::from(&mut *conn)).await?;

                    Ok(ConversionOutcome {
                        job: jobs.find_by_id(&job_id, TxScope::from(&mut *conn)).await?,
                        order: orders.find_by_id(&order_id, TxScope::from(&mut *conn)).await?,
                    })
                })
            })
            .await?;

        info!(
            job_id = %outcome.job.id,
            order_id = %outcome.order.id,
            order_type = %outcome.order.order_type,
            "Job converted to order"
        );
        Ok(outcome)
    }
}

fn ensure_convertible(job: &JobDbModel) -> Result<()> {
    if job.converted_to_order {
        return Err(Error::not_convertible(
            &job.id,
            format!(
                "already converted to order {}",
                job.order_id.as_deref().unwrap_or("<unknown>")
            ),
        ));
    }
    let status = job.status()?;
    if status != JobStatus::Completed {
        return Err(Error::not_convertible(
            &job.id,
            format!("status is {}, expected {}", status, JobStatus::Completed),
        ));
    }
    Ok(())
}

/// Conversion is one-way: once `stored` records its order, a rewrite must keep
/// `converted_to_order` set and `order_id` unchanged.
pub(crate) fn ensure_conversion_kept(stored: &JobDbModel, next: &JobDbModel) -> Result<()> {
    if stored.converted_to_order
        && (!next.converted_to_order || next.order_id != stored.order_id)
    {
        return Err(Error::validation(format!(
            "job {} is linked to order {} and cannot be unlinked",
            stored.id,
            stored.order_id.as_deref().unwrap_or("<unknown>")
        )));
    }
    Ok(())
}
