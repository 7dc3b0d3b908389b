// SPDX-License-Identifier: MIT
//! In-flight operation tracking for conversational AI applications.
//!
//! Tracks the lifecycle of concurrently running asynchronous units of work —
//! generation runs, tool invocations, nested sub-tasks — and provides
//! cooperative cancellation, parent/child cancel cascades, context-scoped
//! lookup, and bounded memory retention. The registry itself never performs
//! or awaits any of the real work: callers start an operation, wire the
//! returned cancellation token into their own async task, and report the
//! terminal outcome back exactly once.
//!
//! # Example
//! ```rust,ignore
//! use optrack::{OperationRegistry, OperationType, StartOperation, OperationContext};
//!
//! let mut registry = OperationRegistry::new();
//! let started = registry.start_operation(StartOperation {
//!     context: OperationContext {
//!         session_id: Some("session-1".into()),
//!         topic_id: Some("topic-1".into()),
//!         ..Default::default()
//!     },
//!     ..StartOperation::new(OperationType::ExecAgentRuntime)
//! });
//!
//! // Hand started.cancel_token to the streaming client; on its own
//! // termination the client calls back:
//! registry.complete_operation(&started.operation_id);
//! ```

pub mod operations;

pub use operations::janitor::{run_operation_janitor, JanitorConfig};
pub use operations::model::{
    new_operation_id, CancelCallback, CancelContext, ContextKey, Operation, OperationContext,
    OperationError, OperationFilter, OperationMetadata, OperationMetadataPatch, OperationProgress,
    OperationStatus, OperationType, OperationView, StartOperation, StartedOperation,
};
pub use operations::{OperationRegistry, RegistryConfig, RegistryError, SharedOperationRegistry};
