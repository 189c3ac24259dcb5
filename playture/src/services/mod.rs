//! Orchestration services built on the unit of work.

pub mod conversion;
pub mod job_lifecycle;

pub use conversion::{ConversionOutcome, OrderConversionService};
pub use job_lifecycle::{JobLifecycleService, StageFailureOutcome, StageOutput};
