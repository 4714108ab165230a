//! # Order Ingest
//!
//! > **Kafka to PostgreSQL order ingestion with a read-through lookup cache.**
//!
//! Order events arrive as JSON on a Kafka topic. Each one is decoded,
//! validated and written to PostgreSQL in a single transaction, and only then
//! acknowledged. Delivery is at-least-once: anything not acknowledged comes
//! back, and the store's uniqueness constraints make the repeat harmless.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Data ([`model`])
//! The `Order` aggregate (delivery, payment, items) and the [`validate`](model::validate)
//! function that decides whether an order is acceptable.
//!
//! ### 2. The Edges ([`broker`], [`store`])
//! Traits for the two external systems, each with a production implementation:
//! - [`Broker`](broker::Broker): fetch a message, later acknowledge it. [`KafkaBroker`](broker::KafkaBroker).
//! - [`OrderStore`](store::OrderStore): idempotent transactional insert and snapshot reads. [`PgOrderStore`](store::PgOrderStore).
//!
//! ### 3. The Engine ([`pipeline`])
//! `Fetcher → task queue → Worker × N → ack queue → Committer`. Both queues are
//! bounded, so a slow store throttles the whole chain instead of buffering.
//!
//! ### 4. The Orchestrator ([`lifecycle`])
//! [`PipelineSystem`](lifecycle::PipelineSystem) starts the stages in order
//! and drains them on shutdown without losing dequeued work.
//!
//! ### 5. The Read Side ([`cache`], [`api`])
//! An unbounded, never-evicting read-through cache over the store, served over
//! HTTP as `GET /order?id=…`.
//!
//! ## 🧪 Testing
//!
//! [`mock`] provides an in-memory broker and store with fault injection, so
//! the whole pipeline runs in tests without Kafka or PostgreSQL.
//!
//! ```bash
//! cargo test
//!
//! # PostgreSQL-backed tests
//! DATABASE_URL=postgres://... cargo test -- --ignored
//! ```

pub mod api;
pub mod broker;
pub mod cache;
pub mod config;
pub mod lifecycle;
pub mod mock;
pub mod model;
pub mod pipeline;
pub mod store;
