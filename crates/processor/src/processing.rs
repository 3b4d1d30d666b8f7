use core::str::FromStr;

use serde::{Deserialize, Serialize};

use postbox_core::{DomainError, OrderId};
use postbox_events::ProcessedStatus;

use crate::policy::PolicyDecision;

/// Processing state lifecycle: `∅ → pending → {success, failed}`. Retries
/// re-enter with an incremented attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Success,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Success => "success",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "success" => Ok(ProcessingStatus::Success),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(DomainError::validation(format!(
                "unknown processing status: {other}"
            ))),
        }
    }
}

/// Per-order processing record on the processor side.
///
/// `version` tracks the result version this state last emitted, so a
/// creation event that would re-emit an already-published result is detected
/// as stale even without an inbox hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingState {
    order_id: OrderId,
    version: u64,
    status: ProcessingStatus,
    attempt_count: u32,
    last_error: Option<String>,
}

impl ProcessingState {
    /// Fresh state for an order seen for the first time.
    pub fn new(order_id: OrderId) -> Self {
        Self {
            order_id,
            version: 0,
            status: ProcessingStatus::Pending,
            attempt_count: 0,
            last_error: None,
        }
    }

    /// Rebuild from stored state.
    pub fn hydrate(
        order_id: OrderId,
        version: u64,
        status: ProcessingStatus,
        attempt_count: u32,
        last_error: Option<String>,
    ) -> Self {
        Self {
            order_id,
            version,
            status,
            attempt_count,
            last_error,
        }
    }

    /// Whether emitting `result_version` would republish an outcome this
    /// state already produced.
    pub fn is_stale(&self, result_version: u64) -> bool {
        result_version <= self.version
    }

    /// Record one processing attempt and its policy decision.
    pub fn apply_decision(&mut self, decision: &PolicyDecision, result_version: u64) {
        self.attempt_count += 1;
        self.version = result_version;
        match decision.status {
            ProcessedStatus::Success => {
                self.status = ProcessingStatus::Success;
                self.last_error = None;
            }
            ProcessedStatus::Failed => {
                self.status = ProcessingStatus::Failed;
                self.last_error = decision.reason.clone();
            }
        }
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
