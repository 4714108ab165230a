//! HTTP lookup surface.
//!
//! # Route Structure
//!
//! ```text
//! GET  /order?id=<order_uid>   - Order as JSON
//! GET  /order/{order_uid}      - Order as JSON
//! GET  /health                 - Supervisor state
//! ```
//!
//! "Not found" (404) and "lookup failed" (500) are distinct responses. A
//! failed lookup never exposes the underlying error to the caller.

pub mod error;

pub use error::ApiError;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::cache::OrderLookup;
use crate::lifecycle::SystemState;
use crate::model::Order;

/// Shared state for the lookup handlers.
#[derive(Clone)]
pub struct ApiState {
    lookup: Arc<dyn OrderLookup>,
    state: watch::Receiver<SystemState>,
}

impl ApiState {
    pub fn new(lookup: Arc<dyn OrderLookup>, state: watch::Receiver<SystemState>) -> Self {
        Self { lookup, state }
    }
}

#[derive(Debug, Deserialize)]
struct OrderQuery {
    id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Health {
    pub state: SystemState,
}

/// Builds the lookup router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/order", get(order_by_query))
        .route("/order/{id}", get(order_by_path))
        .route("/health", get(health))
        .with_state(state)
}

async fn order_by_query(
    State(state): State<ApiState>,
    Query(query): Query<OrderQuery>,
) -> Result<Json<Order>, ApiError> {
    lookup(&state, query.id.as_deref().unwrap_or_default()).await
}

async fn order_by_path(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    lookup(&state, &id).await
}

/// Both routes trim the identifier and reject a blank one.
async fn lookup(state: &ApiState, id: &str) -> Result<Json<Order>, ApiError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::MissingId);
    }

    debug!(order_uid = %id, "Lookup");
    match state.lookup.lookup(id).await? {
        Some(order) => Ok(Json(order)),
        None => Err(ApiError::NotFound(id.to_owned())),
    }
}

async fn health(State(state): State<ApiState>) -> Json<Health> {
    Json(Health {
        state: *state.state.borrow(),
    })
}
