//! Read-only queries over the registry and its derived indices.
//!
//! Everything here is a pure read: no selector mutates state, and
//! context-scoped selectors go through the context index rather than
//! scanning the registry. Policy selectors (`can_send_message`) are
//! advisory — they compute an answer from state, they do not enforce it.

use super::model::{ContextKey, Operation, OperationType, OperationView};
use super::OperationRegistry;

impl OperationRegistry {
    /// Look up an operation by id.
    pub fn get(&self, operation_id: &str) -> Option<&Operation> {
        self.operations.get(operation_id)
    }

    /// Every tracked operation, running or terminal. Iteration order is
    /// unspecified.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// All operations of a type, in start order.
    pub fn operations_by_type(&self, op_type: OperationType) -> Vec<&Operation> {
        self.by_type
            .get(&op_type)
            .map(|ids| ids.iter().filter_map(|id| self.operations.get(id)).collect())
            .unwrap_or_default()
    }

    /// All operations in a `(session, topic)` context, in start order.
    pub fn operations_in_context(&self, key: &ContextKey) -> Vec<&Operation> {
        self.by_context
            .get(key)
            .map(|ids| ids.iter().filter_map(|id| self.operations.get(id)).collect())
            .unwrap_or_default()
    }

    /// Every operation ever associated with a message, in association order.
    pub fn operations_for_message(&self, message_id: &str) -> Vec<&Operation> {
        self.by_message
            .get(message_id)
            .map(|ids| ids.iter().filter_map(|id| self.operations.get(id)).collect())
            .unwrap_or_default()
    }

    /// The single (latest) operation a message maps to.
    pub fn operation_for_message(&self, message_id: &str) -> Option<&Operation> {
        self.message_operation_map
            .get(message_id)
            .and_then(|id| self.operations.get(id))
    }

    pub fn running_operations(&self) -> Vec<&Operation> {
        self.operations
            .values()
            .filter(|op| op.status.is_running())
            .collect()
    }

    pub fn running_operations_in_context(&self, key: &ContextKey) -> Vec<&Operation> {
        self.operations_in_context(key)
            .into_iter()
            .filter(|op| op.status.is_running())
            .collect()
    }

    pub fn has_any_running_operation(&self) -> bool {
        self.operations.values().any(|op| op.status.is_running())
    }

    pub fn has_running_operation_of_type(&self, op_type: OperationType) -> bool {
        self.operations_by_type(op_type)
            .iter()
            .any(|op| op.status.is_running())
    }

    /// Whether any agent-runtime generation is live anywhere. Runs that are
    /// already tearing down (`is_aborting`) no longer count as live.
    pub fn is_agent_runtime_running(&self) -> bool {
        self.operations_by_type(OperationType::ExecAgentRuntime)
            .iter()
            .any(|op| op.status.is_running() && !op.metadata.is_aborting)
    }

    /// Whether a generation is live in the main window of the given context —
    /// thread-scoped runs and aborting runs don't count.
    pub fn is_main_window_agent_runtime_running(&self, key: &ContextKey) -> bool {
        self.running_operations_in_context(key).iter().any(|op| {
            op.op_type == OperationType::ExecAgentRuntime
                && !op.metadata.in_thread
                && !op.metadata.is_aborting
        })
    }

    /// Advisory send gate: false while a blocking generation is live in the
    /// active context. `start_operation` never enforces this — exclusivity is
    /// a caller-side convention layered on top of this read.
    pub fn can_send_message(&self, key: &ContextKey) -> bool {
        !self.is_main_window_agent_runtime_running(key)
    }

    /// Whether there is anything running in the active context for the user
    /// to stop.
    pub fn can_interrupt(&self, key: &ContextKey) -> bool {
        !self.running_operations_in_context(key).is_empty()
    }

    /// Serializable snapshot of one operation.
    pub fn view(&self, operation_id: &str) -> Option<OperationView> {
        self.get(operation_id).map(OperationView::from)
    }

    /// Serializable snapshots of every operation in a context, in start order.
    pub fn views_in_context(&self, key: &ContextKey) -> Vec<OperationView> {
        self.operations_in_context(key)
            .into_iter()
            .map(OperationView::from)
            .collect()
    }
}
