//! Database models.
//!
//! These map directly to the `jobs` and `orders` tables. Enumerated columns
//! are stored as text and exposed through typed accessors.

pub mod job;
pub mod order;

pub use job::*;
pub use order::*;
