//! The order aggregate carried on the ingest topic, and the checks it must pass
//! before it is persisted.

pub mod order;
pub mod validate;

pub use order::*;
pub use validate::{validate, ValidationError};
