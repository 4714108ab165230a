//! # Observability & Tracing
//!
//! [`setup_tracing`] installs a compact `tracing-subscriber` formatter that
//! hides module paths (`with_target(false)`). Levels come from `RUST_LOG`
//! and default to `info`.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Lifecycle, duplicates, rejected and failed messages
//! RUST_LOG=info cargo run
//!
//! # Every fetched, persisted and acknowledged message
//! RUST_LOG=debug cargo run
//!
//! # Quiet the Kafka and sqlx internals
//! RUST_LOG=debug,rdkafka=warn,sqlx=warn cargo run
//! ```
//!
//! ## What Gets Traced
//!
//! - **Stage lifecycle**: each fetcher, worker and committer logs when it
//!   starts and stops, with its counters
//! - **Per message**: workers run inside a `worker{id}` span and each task in
//!   a `task{handle}` span, so every line names the message it is about
//! - **Failures**: rejected payloads at `warn`, persistence failures at `error`
//!
//! With `RUST_LOG=info` a rejected order looks like:
//!
//! ```text
//! WARN worker:task: Dropping message id=2 handle=orders[0]@17 error=order failed validation: payment.amount is negative: -5
//! ```
use tracing_subscriber::EnvFilter;

pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
