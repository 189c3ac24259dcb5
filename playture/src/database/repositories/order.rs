//! Order repository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use super::{Repository, resolve_id};
use crate::database::models::{OrderDbModel, OrderField, OrderFilters};
use crate::database::query::{
    Column, FieldValue, Pagination, bind_page, order_clause, where_clause,
};
use crate::database::scope::{self, TxScope};
use crate::database::time::now_ms;
use crate::{Error, Result};

/// SQLx implementation of the order repository.
#[derive(Debug, Clone)]
pub struct SqlxOrderRepository {
    pool: SqlitePool,
}

impl SqlxOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn check(order: &OrderDbModel) -> Result<()> {
        if order.job_id.is_empty() {
            return Err(Error::validation("order must reference a job"));
        }
        order.payment_status().map_err(|e| Error::validation(e.to_string()))?;
        order.production_status().map_err(|e| Error::validation(e.to_string()))?;
        order.order_type().map_err(|e| Error::validation(e.to_string()))?;
        order.delivery_method().map_err(|e| Error::validation(e.to_string()))?;
        Ok(())
    }

    fn filter_conditions(filters: &OrderFilters) -> Vec<String> {
        let mut conditions = Vec::new();
        if filters.payment_status.is_some() {
            conditions.push("payment_status = ?".to_string());
        }
        if filters.production_status.is_some() {
            conditions.push("production_status = ?".to_string());
        }
        conditions
    }

    /// Bound values for [`Self::filter_conditions`], in the same order.
    fn filter_values(filters: &OrderFilters) -> Vec<&'static str> {
        filters
            .payment_status
            .map(|s| s.as_str())
            .into_iter()
            .chain(filters.production_status.map(|s| s.as_str()))
            .collect()
    }
}

#[async_trait]
impl Repository for SqlxOrderRepository {
    type Entity = OrderDbModel;
    type Field = OrderField;
    type Filters = OrderFilters;

    fn id_field() -> OrderField {
        OrderField::Id
    }

    async fn create(&self, order: &OrderDbModel, tx: TxScope<'_>) -> Result<String> {
        Self::check(order)?;
        let id = resolve_id(&order.id);

        let query = sqlx::query(
            r#"
            INSERT INTO orders (
                id, job_id, user_email, user_name, ip_address, user_agent,
                payment_intent_id, customer_id, amount, currency, payment_status, paid_at,
                order_type, requirements, production_job_id, production_status,
                delivery_method, delivered_at, customer_notes, support_ticket_id, expires_at,
                created_at, updated_at
            ) VALUES (
                ?, ?, ?, ?, ?, ?,
                ?, ?, ?, ?, ?, ?,
                ?, ?, ?, ?,
                ?, ?, ?, ?, ?,
                ?, ?
            )
            "#,
        )
        .bind(&id)
        .bind(&order.job_id)
        .bind(&order.user_email)
        .bind(&order.user_name)
        .bind(&order.ip_address)
        .bind(&order.user_agent)
        .bind(&order.payment_intent_id)
        .bind(&order.customer_id)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(&order.payment_status)
        .bind(order.paid_at)
        .bind(&order.order_type)
        .bind(&order.requirements)
        .bind(&order.production_job_id)
        .bind(&order.production_status)
        .bind(&order.delivery_method)
        .bind(order.delivered_at)
        .bind(&order.customer_notes)
        .bind(&order.support_ticket_id)
        .bind(order.expires_at)
        .bind(order.created_at)
        .bind(order.updated_at);

        scope::execute(&self.pool, tx, query)
            .await
            .map_err(|e| Error::from_query("create order", e))?;

        debug!(order_id = %id, job_id = %order.job_id, "Created order");
        Ok(id)
    }

    async fn find_by_field(
        &self,
        field: OrderField,
        value: FieldValue,
        tx: TxScope<'_>,
    ) -> Result<OrderDbModel> {
        let sql = format!("SELECT * FROM orders WHERE {} = ? LIMIT 1", field.column());
        let query = value.bind_to(sqlx::query_as::<_, OrderDbModel>(&sql));

        scope::fetch_optional(&self.pool, tx, query)
            .await
            .map_err(|e| Error::from_query("find order", e))?
            .ok_or_else(|| Error::not_found("Order", format!("{}={}", field, value)))
    }

    /// `job_id` is fixed at creation and not rewritten here.
    async fn update(&self, order: &OrderDbModel, tx: TxScope<'_>) -> Result<()> {
        Self::check(order)?;
        let now = now_ms();

        let query = sqlx::query(
            r#"
            UPDATE orders SET
                user_email = ?,
                user_name = ?,
                ip_address = ?,
                user_agent = ?,
                payment_intent_id = ?,
                customer_id = ?,
                amount = ?,
                currency = ?,
                payment_status = ?,
                paid_at = ?,
                order_type = ?,
                requirements = ?,
                production_job_id = ?,
                production_status = ?,
                delivery_method = ?,
                delivered_at = ?,
                customer_notes = ?,
                support_ticket_id = ?,
                expires_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&order.user_email)
        .bind(&order.user_name)
        .bind(&order.ip_address)
        .bind(&order.user_agent)
        .bind(&order.payment_intent_id)
        .bind(&order.customer_id)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(&order.payment_status)
        .bind(order.paid_at)
        .bind(&order.order_type)
        .bind(&order.requirements)
        .bind(&order.production_job_id)
        .bind(&order.production_status)
        .bind(&order.delivery_method)
        .bind(order.delivered_at)
        .bind(&order.customer_notes)
        .bind(&order.support_ticket_id)
        .bind(order.expires_at)
        .bind(now)
        .bind(&order.id);

        let result = scope::execute(&self.pool, tx, query)
            .await
            .map_err(|e| Error::from_query("update order", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Order", &order.id));
        }

        debug!(
            order_id = %order.id,
            payment_status = %order.payment_status,
            production_status = %order.production_status,
            "Updated order"
        );
        Ok(())
    }

    async fn delete(&self, id: &str, tx: TxScope<'_>) -> Result<()> {
        let query = sqlx::query("DELETE FROM orders WHERE id = ?").bind(id);
        let result = scope::execute(&self.pool, tx, query)
            .await
            .map_err(|e| Error::from_query("delete order", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Order", id));
        }

        debug!(order_id = %id, "Deleted order");
        Ok(())
    }

    async fn list(
        &self,
        filters: &OrderFilters,
        order_by: OrderField,
        ascending: bool,
        pagination: Pagination,
        tx: TxScope<'_>,
    ) -> Result<Vec<OrderDbModel>> {
        pagination.validate()?;

        let conditions = Self::filter_conditions(filters);
        let sql = format!(
            "SELECT * FROM orders {} {} LIMIT ? OFFSET ?",
            where_clause(&conditions),
            order_clause(order_by, ascending)
        );

        let mut query = sqlx::query_as::<_, OrderDbModel>(&sql);
        for value in Self::filter_values(filters) {
            query = query.bind(value);
        }
        let query = bind_page(query, &pagination);

        let orders = scope::fetch_all(&self.pool, tx, query)
            .await
            .map_err(|e| Error::from_query("list orders", e))?;

        if orders.is_empty() {
            return Err(Error::not_found(
                "Order",
                format!("{:?} page={} limit={}", filters, pagination.page, pagination.limit),
            ));
        }
        Ok(orders)
    }

    async fn count(&self, filters: &OrderFilters, tx: TxScope<'_>) -> Result<u64> {
        let conditions = Self::filter_conditions(filters);
        let sql = format!("SELECT COUNT(*) FROM orders {}", where_clause(&conditions));

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in Self::filter_values(filters) {
            query = query.bind(value);
        }

        let count = scope::fetch_scalar(&self.pool, tx, query)
            .await
            .map_err(|e| Error::from_query("count orders", e))?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::database::Database;
    use crate::database::models::{JobDbModel, OrderDraft};
    use crate::database::repositories::SqlxJobRepository;
    use crate::domain::{OrderType, PaymentStatus, ProductionStatus};

    async fn setup() -> (tempfile::TempDir, Database, SqlxJobRepository, SqlxOrderRepository) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("orders.db").display());
        let mut config = DatabaseConfig::with_url(url);
        config.min_connections = 1;
        let db = Database::connect(&config).await.unwrap();
        db.migrate().await.unwrap();
        let jobs = SqlxJobRepository::new(db.pool().clone());
        let orders = SqlxOrderRepository::new(db.pool().clone());
        (dir, db, jobs, orders)
    }

    async fn seed_job(jobs: &SqlxJobRepository) -> JobDbModel {
        let job = JobDbModel::new("buyer@example.com", "Buyer", "u", "k", "anime");
        jobs.create(&job, TxScope::Autocommit).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_create_and_find_by_job() {
        let (_dir, _db, jobs, orders) = setup().await;
        let job = seed_job(&jobs).await;
        let order = OrderDbModel::from_job(&job, OrderDraft::new(OrderType::Basic, 9.5, "usd"));

        let id = orders.create(&order, TxScope::Autocommit).await.unwrap();
        let found = orders
            .find_by_field(OrderField::JobId, job.id.as_str().into(), TxScope::Autocommit)
            .await
            .unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found, order);
    }

    #[tokio::test]
    async fn test_order_requires_existing_job() {
        let (_dir, _db, _jobs, orders) = setup().await;
        let job = JobDbModel::new("ghost@example.com", "Ghost", "u", "k", "anime");
        let order = OrderDbModel::from_job(&job, OrderDraft::new(OrderType::Basic, 1.0, "usd"));

        let err = orders.create(&order, TxScope::Autocommit).await.unwrap_err();
        assert!(err.is_constraint_violation(), "{err}");
    }

    #[tokio::test]
    async fn test_one_order_per_job() {
        let (_dir, _db, jobs, orders) = setup().await;
        let job = seed_job(&jobs).await;
        let first = OrderDbModel::from_job(&job, OrderDraft::new(OrderType::Basic, 1.0, "usd"));
        let second = OrderDbModel::from_job(&job, OrderDraft::new(OrderType::Premium, 2.0, "usd"));

        orders.create(&first, TxScope::Autocommit).await.unwrap();
        let err = orders.create(&second, TxScope::Autocommit).await.unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[tokio::test]
    async fn test_job_with_order_cannot_be_deleted() {
        let (_dir, _db, jobs, orders) = setup().await;
        let job = seed_job(&jobs).await;
        let order = OrderDbModel::from_job(&job, OrderDraft::new(OrderType::Basic, 1.0, "usd"));
        orders.create(&order, TxScope::Autocommit).await.unwrap();

        let err = jobs.delete(&job.id, TxScope::Autocommit).await.unwrap_err();
        assert!(err.is_constraint_violation());

        orders.delete(&order.id, TxScope::Autocommit).await.unwrap();
        jobs.delete(&job.id, TxScope::Autocommit).await.unwrap();
    }

    #[tokio::test]
    async fn test_statuses_update_independently() {
        let (_dir, _db, jobs, orders) = setup().await;
        let job = seed_job(&jobs).await;
        let mut order = OrderDbModel::from_job(&job, OrderDraft::new(OrderType::Basic, 1.0, "usd"));
        orders.create(&order, TxScope::Autocommit).await.unwrap();

        order.set_payment_status(PaymentStatus::Paid);
        orders.update(&order, TxScope::Autocommit).await.unwrap();

        let stored = orders.find_by_id(&order.id, TxScope::Autocommit).await.unwrap();
        assert_eq!(stored.payment_status().unwrap(), PaymentStatus::Paid);
        assert_eq!(stored.production_status().unwrap(), ProductionStatus::Pending);
        assert!(stored.paid_at.is_some());
        assert!(stored.updated_at >= order.updated_at);

        let paid_pending = orders
            .count(
                &OrderFilters::new()
                    .with_payment_status(PaymentStatus::Paid)
                    .with_production_status(ProductionStatus::Pending),
                TxScope::Autocommit,
            )
            .await
            .unwrap();
        assert_eq!(paid_pending, 1);

        let err = orders
            .list(
                &OrderFilters::new().with_production_status(ProductionStatus::Completed),
                OrderField::CreatedAt,
                false,
                Pagination::default(),
                TxScope::Autocommit,
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_missing_order_is_not_found() {
        let (_dir, _db, jobs, orders) = setup().await;
        let job = seed_job(&jobs).await;
        let order = OrderDbModel::from_job(&job, OrderDraft::new(OrderType::Basic, 1.0, "usd"));

        let err = orders.update(&order, TxScope::Autocommit).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
