use serde::{Deserialize, Serialize};

use postbox_events::ItemLine;
use postbox_order::{CreateOrderCommand, Order};

/// Item line in a create-order request.
#[derive(Debug, Deserialize)]
pub struct ItemLineRequest {
    pub sku: String,
    pub quantity: u32,
    pub price: f64,
}

/// Request body for `POST /orders`.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<ItemLineRequest>,
}

impl CreateOrderRequest {
    pub fn into_command(self) -> CreateOrderCommand {
        CreateOrderCommand {
            order_id: self.order_id,
            customer_id: self.customer_id,
            items: self
                .items
                .into_iter()
                .map(|item| ItemLine {
                    sku: item.sku,
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect(),
        }
    }
}

/// Response body for order endpoints.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub customer_id: String,
    pub status: String,
    pub total_amount: f64,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
}

pub fn order_to_response(order: &Order) -> OrderResponse {
    OrderResponse {
        order_id: order.order_id().to_string(),
        customer_id: order.customer_id().to_string(),
        status: order.status().as_str().to_string(),
        total_amount: order.total_amount(),
        version: order.version(),
        fail_reason: order.fail_reason().map(str::to_string),
    }
}
