//! Processor service domain and application layer.
//!
//! Processing states, the injected processing policy, and the
//! handle-order-created use case, all as deterministic logic over storage
//! ports. Adapters for the ports live in `postbox-infra`.

pub mod policy;
pub mod ports;
pub mod processing;
pub mod use_cases;

pub use policy::{
    FixedPolicy, PolicyDecision, ProcessingPolicy, StandardPolicy, DEFAULT_EMBARGO_SKUS,
    DEFAULT_SUCCESS_PROBABILITY, PROCESSING_ERROR_REASON,
};
pub use ports::{ProcessorUnitOfWork, ProcessorUnitOfWorkFactory};
pub use processing::{ProcessingState, ProcessingStatus};
pub use use_cases::{
    HandleOrderCreatedCommand, HandleOrderCreatedUseCase, HandleOutcome, ProcessorError,
};
