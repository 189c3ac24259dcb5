//! Domain layer.
//!
//! Status enumerations and the rules that govern how they may change.

pub mod job;
pub mod order;
pub mod value_objects;

pub use job::JobStatus;
pub use order::{DeliveryMethod, OrderType, PaymentStatus, ProductionStatus};
pub use value_objects::*;
