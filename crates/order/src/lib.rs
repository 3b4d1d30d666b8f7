//! Order service domain and application layer.
//!
//! This crate contains the order aggregate and its two use cases as
//! deterministic logic over storage ports (no IO, no HTTP, no concrete
//! database). Adapters for the ports live in `postbox-infra`.

pub mod order;
pub mod ports;
pub mod use_cases;

pub use order::{ApplyResult, Order, OrderStatus};
pub use ports::{OrderUnitOfWork, OrderUnitOfWorkFactory};
pub use use_cases::{
    ApplyOutcome, ApplyProcessedCommand, ApplyProcessedUseCase, CreateOrderCommand, CreateOutcome,
    CreateOrderUseCase, OrderError,
};
