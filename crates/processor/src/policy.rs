//! Processing policy: a deterministic function of the order's items.
//!
//! The policy is injected into the handle-order-created use case so tests
//! can replace the stochastic default with a fixed decision.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use postbox_core::OrderId;
use postbox_events::{ItemLine, ProcessedStatus};

/// Embargoed skus when none are configured.
pub const DEFAULT_EMBARGO_SKUS: [&str; 2] = ["pineapple_pizza", "teapot"];

/// Success probability when none is configured.
pub const DEFAULT_SUCCESS_PROBABILITY: f64 = 0.8;

/// Failure reason for the simulated outcome path.
pub const PROCESSING_ERROR_REASON: &str = "processing_error";

/// Outcome of evaluating one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub status: ProcessedStatus,
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub fn success() -> Self {
        Self {
            status: ProcessedStatus::Success,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ProcessedStatus::Failed,
            reason: Some(reason.into()),
        }
    }
}

pub trait ProcessingPolicy: Send + Sync {
    fn evaluate(&self, order_id: &OrderId, items: &[ItemLine]) -> PolicyDecision;
}

/// Production policy: embargo check, then a simulated outcome.
///
/// The simulated roll uses an RNG seeded from the order id, so the decision
/// for a given order is reproducible across retries and processes.
#[derive(Debug, Clone)]
pub struct StandardPolicy {
    embargo: BTreeSet<String>,
    success_probability: f64,
}

impl StandardPolicy {
    pub fn new(embargo: impl IntoIterator<Item = String>, success_probability: f64) -> Self {
        Self {
            embargo: embargo.into_iter().collect(),
            success_probability: success_probability.clamp(0.0, 1.0),
        }
    }
}

impl Default for StandardPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_EMBARGO_SKUS.iter().map(|s| s.to_string()),
            DEFAULT_SUCCESS_PROBABILITY,
        )
    }
}

impl ProcessingPolicy for StandardPolicy {
    fn evaluate(&self, order_id: &OrderId, items: &[ItemLine]) -> PolicyDecision {
        if let Some(item) = items.iter().find(|i| self.embargo.contains(&i.sku)) {
            return PolicyDecision::failed(format!("embargo:{}", item.sku));
        }

        let mut rng = StdRng::seed_from_u64(order_seed(order_id));
        if rng.gen::<f64>() < self.success_probability {
            PolicyDecision::success()
        } else {
            PolicyDecision::failed(PROCESSING_ERROR_REASON)
        }
    }
}

/// Test double returning one fixed decision.
#[derive(Debug, Clone)]
pub struct FixedPolicy {
    decision: PolicyDecision,
}

impl FixedPolicy {
    pub fn new(decision: PolicyDecision) -> Self {
        Self { decision }
    }

    pub fn succeeding() -> Self {
        Self::new(PolicyDecision::success())
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self::new(PolicyDecision::failed(reason))
    }
}

impl ProcessingPolicy for FixedPolicy {
    fn evaluate(&self, _order_id: &OrderId, _items: &[ItemLine]) -> PolicyDecision {
        self.decision.clone()
    }
}

// DefaultHasher with fixed keys is stable across processes, unlike a
// RandomState-backed map hasher.
fn order_seed(order_id: &OrderId) -> u64 {
    let mut hasher = DefaultHasher::new();
    order_id.as_str().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(sku: &str) -> ItemLine {
        ItemLine {
            sku: sku.to_string(),
            quantity: 1,
            price: 10.0,
        }
    }

    fn order_id(s: &str) -> OrderId {
        OrderId::new(s).unwrap()
    }

    #[test]
    fn embargoed_sku_fails_with_named_reason() {
        let policy = StandardPolicy::default();
        let decision = policy.evaluate(
            &order_id("ord-embargo"),
            &[item("mouse"), item("pineapple_pizza"), item("teapot")],
        );

        assert_eq!(decision.status, ProcessedStatus::Failed);
        assert_eq!(decision.reason.as_deref(), Some("embargo:pineapple_pizza"));
    }

    #[test]
    fn decision_is_deterministic_per_order_id() {
        let policy = StandardPolicy::default();
        let items = [item("laptop")];

        let first = policy.evaluate(&order_id("ord-1"), &items);
        for _ in 0..10 {
            assert_eq!(policy.evaluate(&order_id("ord-1"), &items), first);
        }
    }

    #[test]
    fn probability_bounds_force_the_outcome() {
        let always = StandardPolicy::new(Vec::new(), 1.0);
        let never = StandardPolicy::new(Vec::new(), 0.0);
        let items = [item("laptop")];

        for id in ["a", "b", "c", "d", "e"] {
            assert_eq!(
                always.evaluate(&order_id(id), &items).status,
                ProcessedStatus::Success
            );
            let decision = never.evaluate(&order_id(id), &items);
            assert_eq!(decision.status, ProcessedStatus::Failed);
            assert_eq!(decision.reason.as_deref(), Some(PROCESSING_ERROR_REASON));
        }
    }

    #[test]
    fn embargo_wins_over_simulated_success() {
        let policy = StandardPolicy::new(["teapot".to_string()], 1.0);
        let decision = policy.evaluate(&order_id("ord-1"), &[item("teapot")]);
        assert_eq!(decision.status, ProcessedStatus::Failed);
    }
}
