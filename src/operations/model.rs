//! Operation data model — the tracked unit of asynchronous work.
//!
//! An `Operation` records one in-flight piece of work (an AI generation run,
//! a tool invocation, a nested sub-task) together with its lifecycle status,
//! the conversational context it belongs to, its position in the parent/child
//! tree, and the cancellation token its real async work observes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Lifecycle state of an operation.
///
/// Transitions are monotonic: `Running` may move to any terminal state, and
/// terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, OperationStatus::Running)
    }

    /// Completed, failed, and cancelled are all terminal — no further
    /// transitions are possible from any of them.
    pub fn is_terminal(&self) -> bool {
        !self.is_running()
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of work an operation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    /// A full agent-runtime generation run — the primary, user-visible
    /// "assistant is responding" operation.
    ExecAgentRuntime,
    /// Sending a user message through the pipeline (pre-generation stage).
    SendMessage,
    /// A reasoning pass inside a generation run.
    Reasoning,
    /// The tool-calling phase of a generation run.
    ToolCalling,
    /// Execution of a single tool call.
    ExecuteToolCall,
    /// A builtin page-agent run.
    PageAgent,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::ExecAgentRuntime => "execAgentRuntime",
            OperationType::SendMessage => "sendMessage",
            OperationType::Reasoning => "reasoning",
            OperationType::ToolCalling => "toolCalling",
            OperationType::ExecuteToolCall => "executeToolCall",
            OperationType::PageAgent => "pageAgent",
        }
    }

    /// Whether a running operation of this type blocks sending a new message
    /// in its context. Advisory only — enforced by callers, never by the
    /// registry.
    pub fn is_blocking(&self) -> bool {
        matches!(self, OperationType::ExecAgentRuntime)
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an operation logically belongs in the conversation.
///
/// All fields are optional; a child operation inherits its parent's fields
/// unless it overrides them at start time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationContext {
    pub session_id: Option<String>,
    pub topic_id: Option<String>,
    pub thread_id: Option<String>,
    pub group_id: Option<String>,
    pub message_id: Option<String>,
    pub agent_id: Option<String>,
}

impl OperationContext {
    /// Context index key for this operation, or `None` when the operation has
    /// no session and therefore is not context-indexed.
    pub fn key(&self) -> Option<ContextKey> {
        self.session_id
            .as_deref()
            .map(|sid| ContextKey::new(sid, self.topic_id.as_deref()))
    }

    /// This context (as the parent base) overlaid with every field the
    /// override explicitly sets.
    pub fn merged_with(&self, overrides: &OperationContext) -> OperationContext {
        OperationContext {
            session_id: overrides.session_id.clone().or_else(|| self.session_id.clone()),
            topic_id: overrides.topic_id.clone().or_else(|| self.topic_id.clone()),
            thread_id: overrides.thread_id.clone().or_else(|| self.thread_id.clone()),
            group_id: overrides.group_id.clone().or_else(|| self.group_id.clone()),
            message_id: overrides.message_id.clone().or_else(|| self.message_id.clone()),
            agent_id: overrides.agent_id.clone().or_else(|| self.agent_id.clone()),
        }
    }
}

/// Deterministic `(session, topic)` index key — `"{session}_{topic}"`, with
/// `"null"` standing in for a missing topic. Matches the key shape the
/// conversation layer uses, so topic switches never leak operations across
/// contexts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextKey(String);

impl ContextKey {
    pub fn new(session_id: &str, topic_id: Option<&str>) -> Self {
        ContextKey(format!("{}_{}", session_id, topic_id.unwrap_or("null")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Progress reported by a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationProgress {
    pub current: u64,
    pub total: u64,
    /// Only computed when the caller supplied a total in the same update.
    pub percentage: Option<u32>,
}

/// Error recorded by `fail_operation`. The registry never surfaces this to
/// the UI itself — selectors expose it for the caller to translate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub code: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl OperationError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        OperationError {
            error_type: error_type.into(),
            message: message.into(),
            code: None,
            details: None,
        }
    }
}

/// Timing and outcome bookkeeping attached to every operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub cancel_reason: Option<String>,
    pub error: Option<OperationError>,
    /// Set when a cancel has been requested for a generation run — lets the
    /// UI flip the stop button before teardown finishes.
    pub is_aborting: bool,
    /// Set for operations that run inside a thread rather than the main
    /// conversation window.
    pub in_thread: bool,
    pub progress: Option<OperationProgress>,
}

impl OperationMetadata {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        OperationMetadata {
            start_time,
            end_time: None,
            duration_ms: None,
            cancel_reason: None,
            error: None,
            is_aborting: false,
            in_thread: false,
            progress: None,
        }
    }
}

/// Partial metadata update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct OperationMetadataPatch {
    pub is_aborting: Option<bool>,
    pub in_thread: Option<bool>,
    pub cancel_reason: Option<String>,
    pub error: Option<OperationError>,
    pub progress: Option<OperationProgress>,
}

impl OperationMetadataPatch {
    pub fn apply(self, metadata: &mut OperationMetadata) {
        if let Some(v) = self.is_aborting {
            metadata.is_aborting = v;
        }
        if let Some(v) = self.in_thread {
            metadata.in_thread = v;
        }
        if let Some(v) = self.cancel_reason {
            metadata.cancel_reason = Some(v);
        }
        if let Some(v) = self.error {
            metadata.error = Some(v);
        }
        if let Some(v) = self.progress {
            metadata.progress = Some(v);
        }
    }
}

/// Context handed to a registered cancel callback.
#[derive(Debug, Clone)]
pub struct CancelContext {
    pub operation_id: String,
    pub op_type: OperationType,
    pub reason: String,
    pub metadata: OperationMetadata,
}

/// Once-only callback invoked when an operation is cancelled. Errors are
/// logged by the registry and never interrupt a cascade.
pub type CancelCallback = Box<dyn FnOnce(CancelContext) -> anyhow::Result<()> + Send + Sync>;

/// One tracked unit of asynchronous work.
///
/// The registry owns the record; the real async work runs outside it, wired
/// to the operation's cancellation token.
pub struct Operation {
    pub id: String,
    pub op_type: OperationType,
    pub status: OperationStatus,
    pub context: OperationContext,
    /// Single parent pointer — the parent/child relation is a tree.
    pub parent_operation_id: Option<String>,
    /// Children in insertion order; cascade cancellation visits them in this
    /// order.
    pub child_operation_ids: Vec<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub metadata: OperationMetadata,
    pub(crate) cancel_token: CancellationToken,
    pub(crate) on_cancel: Option<CancelCallback>,
}

impl Operation {
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// A clone of this operation's cancellation token. Clones share the same
    /// underlying single-fire state.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn context_key(&self) -> Option<ContextKey> {
        self.context.key()
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("op_type", &self.op_type)
            .field("status", &self.status)
            .field("context", &self.context)
            .field("parent_operation_id", &self.parent_operation_id)
            .field("child_operation_ids", &self.child_operation_ids)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Serializable snapshot of an operation, for RPC/UI consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationView {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub status: OperationStatus,
    pub context: OperationContext,
    pub parent_operation_id: Option<String>,
    pub child_operation_ids: Vec<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub metadata: OperationMetadata,
}

impl From<&Operation> for OperationView {
    fn from(op: &Operation) -> Self {
        OperationView {
            id: op.id.clone(),
            op_type: op.op_type,
            status: op.status,
            context: op.context.clone(),
            parent_operation_id: op.parent_operation_id.clone(),
            child_operation_ids: op.child_operation_ids.clone(),
            label: op.label.clone(),
            description: op.description.clone(),
            metadata: op.metadata.clone(),
        }
    }
}

/// Parameters for `start_operation`.
#[derive(Debug, Clone)]
pub struct StartOperation {
    pub op_type: OperationType,
    /// Explicit context fields; merged over the parent's context when a
    /// parent is given.
    pub context: OperationContext,
    pub parent_operation_id: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
}

impl StartOperation {
    pub fn new(op_type: OperationType) -> Self {
        StartOperation {
            op_type,
            context: OperationContext::default(),
            parent_operation_id: None,
            label: None,
            description: None,
        }
    }
}

/// Handle returned by `start_operation`: the new id plus the token the real
/// async work must observe.
#[derive(Debug, Clone)]
pub struct StartedOperation {
    pub operation_id: String,
    pub cancel_token: CancellationToken,
}

/// Batch-cancel filter. Empty vecs / `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    pub types: Vec<OperationType>,
    pub statuses: Vec<OperationStatus>,
    /// Exact `(session, topic)` key match — the narrowest context filter.
    pub context_key: Option<ContextKey>,
    /// Session-wide match, regardless of topic.
    pub session_id: Option<String>,
    pub thread_id: Option<String>,
    pub group_id: Option<String>,
    pub message_id: Option<String>,
    pub agent_id: Option<String>,
}

impl OperationFilter {
    pub fn matches(&self, op: &Operation) -> bool {
        if !self.types.is_empty() && !self.types.contains(&op.op_type) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&op.status) {
            return false;
        }
        if let Some(key) = &self.context_key {
            if op.context.key().as_ref() != Some(key) {
                return false;
            }
        }
        if let Some(v) = &self.session_id {
            if op.context.session_id.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(v) = &self.thread_id {
            if op.context.thread_id.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(v) = &self.group_id {
            if op.context.group_id.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(v) = &self.message_id {
            if op.context.message_id.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(v) = &self.agent_id {
            if op.context.agent_id.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Construct an operation ID in the canonical `op-{uuid}` format.
pub fn new_operation_id() -> String {
    format!("op-{}", uuid::Uuid::new_v4())
}
