//! Job domain module.

mod state;

pub use state::JobStatus;
