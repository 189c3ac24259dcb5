//! playture library crate.
//!
//! Transactional persistence and lifecycle core for video jobs and the orders
//! derived from them.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod services;

pub use error::{Error, Result};
