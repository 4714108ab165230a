use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a customer order as delivered on the ingest topic.
///
/// `Order` is the aggregate root: it owns exactly one [`Delivery`], exactly one
/// [`Payment`] and an ordered list of [`Item`]s. The whole aggregate is written
/// to the store as one unit and is never modified afterwards.
///
/// Every field defaults when absent from the payload so that a missing value is
/// reported by [`validate`](crate::model::validate) with a precise reason rather
/// than as an opaque decode failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    #[serde(rename = "shardkey")]
    pub shard_key: String,
    pub sm_id: i32,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

/// Recipient details, keyed 1:1 by the owning order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delivery {
    /// Foreign key to [`Order::order_uid`]; filled by [`Order::stamp_foreign_keys`].
    #[serde(skip)]
    pub order_id: String,
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment details, keyed 1:1 by the owning order.
///
/// `transaction` is globally unique and acts as the natural deduplication key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payment {
    /// Foreign key to [`Order::order_uid`]; filled by [`Order::stamp_foreign_keys`].
    #[serde(skip)]
    pub order_id: String,
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    /// Epoch seconds.
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    pub custom_fee: i64,
}

/// A single line of an order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    /// Foreign key to [`Order::order_uid`]; filled by [`Order::stamp_foreign_keys`].
    #[serde(skip)]
    pub order_id: String,
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    /// Discount percentage.
    pub sale: i32,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

impl Order {
    /// Decodes an order from a raw message payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Copies the order identifier into every child entity.
    ///
    /// Children arrive without their foreign key; it must be set before the
    /// aggregate is handed to the store.
    pub fn stamp_foreign_keys(&mut self) {
        self.delivery.order_id.clone_from(&self.order_uid);
        self.payment.order_id.clone_from(&self.order_uid);
        for item in &mut self.items {
            item.order_id.clone_from(&self.order_uid);
        }
    }
}
