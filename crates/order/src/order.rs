use core::str::FromStr;

use serde::{Deserialize, Serialize};

use postbox_core::{CustomerId, DomainError, DomainResult, OrderId};
use postbox_events::{ItemLine, ProcessedStatus};

/// Order status lifecycle: `pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Done,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Done => "done",
            OrderStatus::Failed => "failed",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "done" => Ok(OrderStatus::Done),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(DomainError::validation(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

/// Result of feeding an `order.processed` outcome through the version gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    /// The order moved out of `pending`; version advanced strictly upward.
    Applied,
    /// The incoming version did not exceed the stored one; state unchanged.
    Stale,
}

/// Aggregate root: an order as the order service sees it.
///
/// Created at version 0 with status `pending`; mutated only by
/// [`Order::apply_processed`]; never deleted. `total_amount` is derived from
/// the items at creation and carried as stored state afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    order_id: OrderId,
    customer_id: CustomerId,
    items: Vec<ItemLine>,
    total_amount: f64,
    status: OrderStatus,
    fail_reason: Option<String>,
    version: u64,
}

impl Order {
    /// Validate and construct a new order at version 0.
    pub fn create(
        order_id: OrderId,
        customer_id: CustomerId,
        items: Vec<ItemLine>,
    ) -> DomainResult<Self> {
        if items.is_empty() {
            return Err(DomainError::validation(
                "order must contain at least one item",
            ));
        }
        for item in &items {
            if item.sku.trim().is_empty() {
                return Err(DomainError::validation("item sku must not be empty"));
            }
            if item.quantity == 0 {
                return Err(DomainError::validation("item quantity must be at least 1"));
            }
            if !item.price.is_finite() || item.price < 0.0 {
                return Err(DomainError::validation("item price must not be negative"));
            }
        }

        let total_amount = items.iter().map(ItemLine::total).sum();

        Ok(Self {
            order_id,
            customer_id,
            items,
            total_amount,
            status: OrderStatus::Pending,
            fail_reason: None,
            version: 0,
        })
    }

    /// Rebuild an order from stored state, bypassing creation validation.
    #[allow(clippy::too_many_arguments)]
    pub fn hydrate(
        order_id: OrderId,
        customer_id: CustomerId,
        items: Vec<ItemLine>,
        total_amount: f64,
        status: OrderStatus,
        fail_reason: Option<String>,
        version: u64,
    ) -> Self {
        Self {
            order_id,
            customer_id,
            items,
            total_amount,
            status,
            fail_reason,
            version,
        }
    }

    /// Apply a processed outcome under the version gate.
    ///
    /// The highest-versioned outcome wins regardless of delivery order; an
    /// incoming version that does not strictly exceed the stored one leaves
    /// the order untouched.
    pub fn apply_processed(
        &mut self,
        status: ProcessedStatus,
        fail_reason: Option<String>,
        version: u64,
    ) -> ApplyResult {
        if version <= self.version {
            return ApplyResult::Stale;
        }

        match status {
            ProcessedStatus::Success => {
                self.status = OrderStatus::Done;
                self.fail_reason = None;
            }
            ProcessedStatus::Failed => {
                self.status = OrderStatus::Failed;
                // A failed order always carries a reason.
                self.fail_reason = Some(
                    fail_reason
                        .filter(|r| !r.trim().is_empty())
                        .unwrap_or_else(|| "unspecified".to_string()),
                );
            }
        }
        self.version = version;

        ApplyResult::Applied
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    pub fn items(&self) -> &[ItemLine] {
        &self.items
    }

    pub fn total_amount(&self) -> f64 {
        self.total_amount
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn fail_reason(&self) -> Option<&str> {
        self.fail_reason.as_deref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(sku: &str, quantity: u32, price: f64) -> ItemLine {
        ItemLine {
            sku: sku.to_string(),
            quantity,
            price,
        }
    }

    fn new_order(items: Vec<ItemLine>) -> DomainResult<Order> {
        Order::create(
            OrderId::new("ord-1").unwrap(),
            CustomerId::new("c-1").unwrap(),
            items,
        )
    }

    #[test]
    fn create_computes_total_and_starts_pending_at_version_zero() {
        let order = new_order(vec![item("laptop", 1, 1200.0), item("mouse", 2, 25.0)]).unwrap();

        assert_eq!(order.total_amount(), 1250.0);
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.version(), 0);
        assert_eq!(order.fail_reason(), None);
    }

    #[test]
    fn create_rejects_empty_items() {
        let err = new_order(vec![]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_rejects_zero_quantity_and_negative_price() {
        assert!(new_order(vec![item("laptop", 0, 10.0)]).is_err());
        assert!(new_order(vec![item("laptop", 1, -0.01)]).is_err());
    }

    #[test]
    fn zero_price_is_valid() {
        let order = new_order(vec![item("flyer", 3, 0.0)]).unwrap();
        assert_eq!(order.total_amount(), 0.0);
    }

    #[test]
    fn apply_success_moves_to_done_and_bumps_version() {
        let mut order = new_order(vec![item("laptop", 1, 1200.0)]).unwrap();

        let result = order.apply_processed(ProcessedStatus::Success, None, 1);
        assert_eq!(result, ApplyResult::Applied);
        assert_eq!(order.status(), OrderStatus::Done);
        assert_eq!(order.version(), 1);
    }

    #[test]
    fn apply_failed_records_reason() {
        let mut order = new_order(vec![item("teapot", 1, 9.0)]).unwrap();

        order.apply_processed(ProcessedStatus::Failed, Some("embargo:teapot".to_string()), 1);
        assert_eq!(order.status(), OrderStatus::Failed);
        assert_eq!(order.fail_reason(), Some("embargo:teapot"));
    }

    #[test]
    fn apply_failed_without_reason_still_satisfies_invariant() {
        let mut order = new_order(vec![item("x", 1, 1.0)]).unwrap();

        order.apply_processed(ProcessedStatus::Failed, None, 1);
        assert_eq!(order.fail_reason(), Some("unspecified"));
    }

    #[test]
    fn stale_version_leaves_state_unchanged() {
        let mut order = new_order(vec![item("laptop", 1, 1200.0)]).unwrap();
        order.apply_processed(ProcessedStatus::Success, None, 1);

        let result = order.apply_processed(ProcessedStatus::Failed, Some("late".to_string()), 1);
        assert_eq!(result, ApplyResult::Stale);
        assert_eq!(order.status(), OrderStatus::Done);
        assert_eq!(order.version(), 1);

        let result = order.apply_processed(ProcessedStatus::Failed, Some("later".to_string()), 0);
        assert_eq!(result, ApplyResult::Stale);
        assert_eq!(order.status(), OrderStatus::Done);
    }

    #[test]
    fn version_is_monotonic_across_applies() {
        let mut order = new_order(vec![item("laptop", 1, 1200.0)]).unwrap();
        let mut last = order.version();

        for (status, version) in [
            (ProcessedStatus::Failed, 2),
            (ProcessedStatus::Success, 1),
            (ProcessedStatus::Success, 3),
        ] {
            order.apply_processed(status, Some("r".to_string()), version);
            assert!(order.version() >= last);
            last = order.version();
        }
        assert_eq!(order.version(), 3);
    }
}
