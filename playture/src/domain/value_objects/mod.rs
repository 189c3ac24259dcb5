//! Value objects shared by the job and order domains.

mod retry_policy;

pub use retry_policy::RetryPolicy;
