//! Order domain module.

mod state;

pub use state::{DeliveryMethod, OrderType, PaymentStatus, ProductionStatus};
