//! Structural and semantic checks applied to a decoded [`Order`] before it
//! reaches the store.
//!
//! Checks run in a fixed order and stop at the first violation, so the same
//! payload always yields the same [`ValidationError`].

use crate::model::Order;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$").expect("Invalid email regex")
});

/// The invariant an order violates.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("order_uid is empty")]
    EmptyOrderUid,

    #[error("track_number is empty")]
    EmptyTrackNumber,

    #[error("customer_id is empty")]
    EmptyCustomerId,

    #[error("payment.amount is negative: {0}")]
    NegativeAmount(i64),

    #[error("payment.transaction is empty")]
    EmptyTransaction,

    #[error("delivery.email is malformed: {0}")]
    MalformedEmail(String),

    #[error("items[{index}].price is negative: {price}")]
    NegativeItemPrice { index: usize, price: i64 },

    #[error("items[{index}].track_number is empty")]
    EmptyItemTrackNumber { index: usize },
}

/// Checks `order` against every ingest invariant.
///
/// An empty delivery email is treated as absent and accepted.
pub fn validate(order: &Order) -> Result<(), ValidationError> {
    if order.order_uid.is_empty() {
        return Err(ValidationError::EmptyOrderUid);
    }
    if order.track_number.is_empty() {
        return Err(ValidationError::EmptyTrackNumber);
    }
    if order.customer_id.is_empty() {
        return Err(ValidationError::EmptyCustomerId);
    }
    if order.payment.amount < 0 {
        return Err(ValidationError::NegativeAmount(order.payment.amount));
    }
    if order.payment.transaction.is_empty() {
        return Err(ValidationError::EmptyTransaction);
    }
    let email = &order.delivery.email;
    if !email.is_empty() && !EMAIL_RE.is_match(email) {
        return Err(ValidationError::MalformedEmail(email.clone()));
    }
    for (index, item) in order.items.iter().enumerate() {
        if item.price < 0 {
            return Err(ValidationError::NegativeItemPrice {
                index,
                price: item.price,
            });
        }
        if item.track_number.is_empty() {
            return Err(ValidationError::EmptyItemTrackNumber { index });
        }
    }
    Ok(())
}
