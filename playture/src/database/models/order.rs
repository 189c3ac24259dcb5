//! Order database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use strum::VariantArray;

use super::JobDbModel;
use crate::database::query::Column;
use crate::domain::{DeliveryMethod, OrderType, PaymentStatus, ProductionStatus};
use crate::{Error, Result};

/// Order database model.
///
/// Always derived from exactly one job. `payment_status` and
/// `production_status` move independently of each other.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct OrderDbModel {
    pub id: String,
    /// Originating job. Set once at creation.
    pub job_id: String,
    pub user_email: String,
    pub user_name: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub payment_intent_id: Option<String>,
    pub customer_id: Option<String>,
    pub amount: f64,
    /// ISO 4217 code, lowercase as the payment provider reports it.
    pub currency: String,
    /// PENDING, PAID, FAILED, REFUNDED
    pub payment_status: String,
    pub paid_at: Option<i64>,
    /// BASIC, PREMIUM, CUSTOM
    pub order_type: String,
    pub requirements: Option<String>,
    /// Production-side job, distinct from `job_id`.
    pub production_job_id: Option<String>,
    /// PENDING, PROCESSING, COMPLETED, FAILED
    pub production_status: String,
    /// DOWNLOAD, EMAIL, BOTH
    pub delivery_method: String,
    pub delivered_at: Option<i64>,
    pub customer_notes: Option<String>,
    pub support_ticket_id: Option<String>,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// What the purchaser chose when turning a job into an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub order_type: OrderType,
    pub amount: f64,
    pub currency: String,
    pub delivery_method: DeliveryMethod,
    pub payment_intent_id: Option<String>,
    pub customer_id: Option<String>,
    pub requirements: Option<String>,
    pub customer_notes: Option<String>,
    pub expires_at: Option<i64>,
}

impl OrderDraft {
    pub fn new(order_type: OrderType, amount: f64, currency: impl Into<String>) -> Self {
        Self {
            order_type,
            amount,
            currency: currency.into(),
            delivery_method: DeliveryMethod::default(),
            payment_intent_id: None,
            customer_id: None,
            requirements: None,
            customer_notes: None,
            expires_at: None,
        }
    }

    pub fn with_delivery(mut self, method: DeliveryMethod) -> Self {
        self.delivery_method = method;
        self
    }

    pub fn with_payment_intent(mut self, payment_intent_id: impl Into<String>) -> Self {
        self.payment_intent_id = Some(payment_intent_id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(Error::validation(format!(
                "order amount must be a non-negative number, got {}",
                self.amount
            )));
        }
        if self.currency.trim().is_empty() {
            return Err(Error::validation("order currency must not be empty"));
        }
        Ok(())
    }
}

impl OrderDbModel {
    /// Build the order for `job`, copying the requester identity from it.
    pub fn from_job(job: &JobDbModel, draft: OrderDraft) -> Self {
        let now = crate::database::time::now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            user_email: job.user_email.clone(),
            user_name: job.user_name.clone(),
            ip_address: job.ip_address.clone(),
            user_agent: job.user_agent.clone(),
            payment_intent_id: draft.payment_intent_id,
            customer_id: draft.customer_id,
            amount: draft.amount,
            currency: draft.currency,
            payment_status: PaymentStatus::Pending.as_str().to_string(),
            paid_at: None,
            order_type: draft.order_type.as_str().to_string(),
            requirements: draft.requirements,
            production_job_id: None,
            production_status: ProductionStatus::Pending.as_str().to_string(),
            delivery_method: draft.delivery_method.as_str().to_string(),
            delivered_at: None,
            customer_notes: draft.customer_notes,
            support_ticket_id: None,
            expires_at: draft.expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn payment_status(&self) -> Result<PaymentStatus> {
        PaymentStatus::parse(&self.payment_status).ok_or_else(|| {
            Error::Other(format!(
                "order {} has unknown payment status '{}'",
                self.id, self.payment_status
            ))
        })
    }

    /// Record a payment outcome. Entering `Paid` stamps `paid_at` once.
    pub fn set_payment_status(&mut self, status: PaymentStatus) {
        if status.is_settled() && self.paid_at.is_none() {
            self.paid_at = Some(crate::database::time::now_ms());
        }
        self.payment_status = status.as_str().to_string();
    }

    pub fn production_status(&self) -> Result<ProductionStatus> {
        ProductionStatus::parse(&self.production_status).ok_or_else(|| {
            Error::Other(format!(
                "order {} has unknown production status '{}'",
                self.id, self.production_status
            ))
        })
    }

    pub fn set_production_status(&mut self, status: ProductionStatus) {
        self.production_status = status.as_str().to_string();
    }

    pub fn order_type(&self) -> Result<OrderType> {
        OrderType::parse(&self.order_type).ok_or_else(|| {
            Error::Other(format!(
                "order {} has unknown order type '{}'",
                self.id, self.order_type
            ))
        })
    }

    pub fn delivery_method(&self) -> Result<DeliveryMethod> {
        DeliveryMethod::parse(&self.delivery_method).ok_or_else(|| {
            Error::Other(format!(
                "order {} has unknown delivery method '{}'",
                self.id, self.delivery_method
            ))
        })
    }
}

/// Columns of the `orders` table that may be used for lookups and ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr, strum::VariantArray,
)]
#[strum(serialize_all = "snake_case")]
pub enum OrderField {
    Id,
    JobId,
    UserEmail,
    UserName,
    IpAddress,
    UserAgent,
    PaymentIntentId,
    CustomerId,
    Amount,
    Currency,
    PaymentStatus,
    PaidAt,
    OrderType,
    Requirements,
    ProductionJobId,
    ProductionStatus,
    DeliveryMethod,
    DeliveredAt,
    CustomerNotes,
    SupportTicketId,
    ExpiresAt,
    CreatedAt,
    UpdatedAt,
}

impl Column for OrderField {
    fn column(&self) -> &'static str {
        (*self).into()
    }

    fn all() -> &'static [Self] {
        Self::VARIANTS
    }
}

impl std::str::FromStr for OrderField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

/// Filter criteria for listing orders. Unset dimensions match everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderFilters {
    pub payment_status: Option<PaymentStatus>,
    pub production_status: Option<ProductionStatus>,
}

impl OrderFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payment_status(mut self, status: PaymentStatus) -> Self {
        self.payment_status = Some(status);
        self
    }

    pub fn with_production_status(mut self, status: ProductionStatus) -> Self {
        self.production_status = Some(status);
        self
    }
}
