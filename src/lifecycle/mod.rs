//! Pipeline supervision and process-wide setup.
//!
//! - [`PipelineSystem`] starts the stages in dependency order and runs the
//!   drain sequence on shutdown
//! - [`setup_tracing`] initializes logging once for the binary

pub mod pipeline_system;
pub mod tracing;

pub use pipeline_system::*;
pub use tracing::*;
