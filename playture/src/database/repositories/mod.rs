//! Repository layer for database access.
//!
//! Every operation takes a [`TxScope`]: run it standalone on the pool, or pass
//! the connection a [`UnitOfWork`](crate::database::UnitOfWork) handed you so
//! it joins that transaction. Repositories never begin, commit or roll back.

pub mod job;
pub mod order;

pub use job::*;
pub use order::*;

use async_trait::async_trait;

use crate::Result;
use crate::database::query::{Column, FieldValue, Pagination};
use crate::database::scope::TxScope;

/// Persistence contract shared by jobs and orders.
#[async_trait]
pub trait Repository: Send + Sync {
    type Entity: Send + Sync;
    /// Columns usable in lookups and ordering.
    type Field: Column;
    /// Closed set of listing filter dimensions.
    type Filters: Send + Sync;

    /// The primary-key column.
    fn id_field() -> Self::Field;

    /// Insert a fully populated record and return its id. An empty id is
    /// replaced by a fresh UUID.
    async fn create(&self, entity: &Self::Entity, tx: TxScope<'_>) -> Result<String>;

    /// Fetch the single record whose `field` equals `value`.
    async fn find_by_field(
        &self,
        field: Self::Field,
        value: FieldValue,
        tx: TxScope<'_>,
    ) -> Result<Self::Entity>;

    /// Replace every mutable column of the stored record.
    ///
    /// The write is unconditional. Business rules such as the one-way job to
    /// order link are enforced by the services before they call it.
    async fn update(&self, entity: &Self::Entity, tx: TxScope<'_>) -> Result<()>;

    async fn delete(&self, id: &str, tx: TxScope<'_>) -> Result<()>;

    /// One page of records matching `filters`. An empty page is `NotFound`.
    async fn list(
        &self,
        filters: &Self::Filters,
        order_by: Self::Field,
        ascending: bool,
        pagination: Pagination,
        tx: TxScope<'_>,
    ) -> Result<Vec<Self::Entity>>;

    /// Number of records matching `filters`.
    async fn count(&self, filters: &Self::Filters, tx: TxScope<'_>) -> Result<u64>;

    async fn find_by_id(&self, id: &str, tx: TxScope<'_>) -> Result<Self::Entity> {
        self.find_by_field(Self::id_field(), FieldValue::from(id), tx)
            .await
    }
}

/// Use the caller's id or mint one.
pub(crate) fn resolve_id(id: &str) -> String {
    if id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        id.to_string()
    }
}
