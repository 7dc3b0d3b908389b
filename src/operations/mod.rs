// SPDX-License-Identifier: MIT
//! Operation registry — canonical map of in-flight operations plus the
//! derived indices (by type, by context, by message) and every mutator.
//!
//! The registry is the single source of truth for operation state. All
//! mutators are synchronous `&mut self` calls: each one is an atomic,
//! non-interleaved step that records state and returns immediately. The real
//! async work an operation represents runs outside the registry, wired to
//! the cancellation token handed back by [`OperationRegistry::start_operation`];
//! the worker observes the token and reports its own terminal outcome with
//! `complete_operation` or `fail_operation` exactly once.
//!
//! Derived indices are maintained transactionally inside each mutator —
//! never by external observers — so they exactly reflect registry content
//! after every call.

pub mod janitor;
pub mod model;
pub mod selectors;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::model::{
    new_operation_id, CancelContext, ContextKey, Operation, OperationError, OperationFilter,
    OperationMetadata, OperationMetadataPatch, OperationProgress, OperationStatus, OperationType,
    StartOperation, StartedOperation,
};

const DEFAULT_CANCEL_REASON: &str = "user cancelled";
const BATCH_CANCEL_REASON: &str = "batch cancelled";
const CANCEL_ALL_REASON: &str = "cancel all operations";

/// Errors returned by the registry's throwing accessors. Lifecycle mutators
/// never error: an unknown id is a silent no-op, since a late callback may
/// land after a janitor sweep has removed its operation.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("operation not found: {0}")]
    OperationNotFound(String),
    #[error("operation {0} has no session in its context")]
    MissingSessionContext(String),
}

/// Registry tuning knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Terminal operations older than this are opportunistically swept each
    /// time a new root operation starts. `None` disables the opportunistic
    /// sweep (the background janitor still applies).
    pub auto_sweep_age: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            auto_sweep_age: Some(Duration::from_secs(30)),
        }
    }
}

/// In-memory registry of every operation tracked in this application
/// session. Rebuilt empty on restart; nothing is persisted.
pub struct OperationRegistry {
    config: RegistryConfig,
    operations: HashMap<String, Operation>,
    by_type: HashMap<OperationType, Vec<String>>,
    by_context: HashMap<ContextKey, Vec<String>>,
    by_message: HashMap<String, Vec<String>>,
    /// Latest operation associated with each message — later associations
    /// overwrite earlier ones.
    message_operation_map: HashMap<String, String>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        OperationRegistry {
            config,
            operations: HashMap::new(),
            by_type: HashMap::new(),
            by_context: HashMap::new(),
            by_message: HashMap::new(),
            message_operation_map: HashMap::new(),
        }
    }

    // ─── Start ───────────────────────────────────────────────────────────────

    /// Create and register a new running operation.
    ///
    /// When a parent is given and resolves, the child's context is the
    /// parent's context overlaid with any explicitly set fields, and the
    /// child is registered in the parent's `child_operation_ids`. A parent id
    /// that does not resolve degrades to an orphan root — bookkeeping gaps
    /// never block user-initiated work.
    ///
    /// Returns the fresh operation id plus the cancellation token the real
    /// async work must observe. Starting never performs any work itself.
    pub fn start_operation(&mut self, params: StartOperation) -> StartedOperation {
        let StartOperation {
            op_type,
            context,
            parent_operation_id,
            label,
            description,
        } = params;

        let operation_id = new_operation_id();

        let (context, parent_operation_id) = match parent_operation_id {
            Some(pid) => match self.operations.get(&pid) {
                Some(parent) => (parent.context.merged_with(&context), Some(pid)),
                None => {
                    warn!(
                        parent = %pid,
                        id = %operation_id,
                        "parent operation not found — starting as orphan root"
                    );
                    (context, None)
                }
            },
            None => (context, None),
        };

        let cancel_token = CancellationToken::new();
        let op = Operation {
            id: operation_id.clone(),
            op_type,
            status: OperationStatus::Running,
            context: context.clone(),
            parent_operation_id: parent_operation_id.clone(),
            child_operation_ids: Vec::new(),
            label,
            description,
            metadata: OperationMetadata::new(Utc::now()),
            cancel_token: cancel_token.clone(),
            on_cancel: None,
        };
        self.operations.insert(operation_id.clone(), op);

        self.by_type
            .entry(op_type)
            .or_default()
            .push(operation_id.clone());
        if let Some(key) = context.key() {
            self.by_context
                .entry(key)
                .or_default()
                .push(operation_id.clone());
        }
        if let Some(message_id) = &context.message_id {
            let ids = self.by_message.entry(message_id.clone()).or_default();
            if !ids.iter().any(|i| i == &operation_id) {
                ids.push(operation_id.clone());
            }
            // Auto-associate: the most granular operation wins the map entry.
            self.message_operation_map
                .insert(message_id.clone(), operation_id.clone());
        }
        if let Some(pid) = &parent_operation_id {
            if let Some(parent) = self.operations.get_mut(pid) {
                parent.child_operation_ids.push(operation_id.clone());
            }
        }

        debug!(id = %operation_id, op_type = %op_type, "operation started");

        // Root starts opportunistically sweep aged terminal operations so
        // long-lived sessions stay bounded without waiting on the janitor.
        if parent_operation_id.is_none() {
            if let Some(age) = self.config.auto_sweep_age {
                self.cleanup_completed_operations(age);
            }
        }

        StartedOperation {
            operation_id,
            cancel_token,
        }
    }

    // ─── Terminal transitions ────────────────────────────────────────────────

    /// Mark an operation completed. Missing or already-terminal ids are
    /// silent no-ops. Completion is leaf-local: children are untouched.
    pub fn complete_operation(&mut self, operation_id: &str) {
        self.complete_operation_with(operation_id, OperationMetadataPatch::default());
    }

    /// `complete_operation` plus a final metadata patch (e.g. usage totals
    /// reported by the worker on its way out).
    pub fn complete_operation_with(&mut self, operation_id: &str, patch: OperationMetadataPatch) {
        let Some(op) = self.operations.get_mut(operation_id) else {
            debug!(id = %operation_id, "complete: operation not found — ignoring");
            return;
        };
        if op.status.is_terminal() {
            debug!(id = %operation_id, status = %op.status, "complete: already terminal — ignoring");
            return;
        }

        let now = Utc::now();
        op.status = OperationStatus::Completed;
        op.metadata.end_time = Some(now);
        op.metadata.duration_ms = Some((now - op.metadata.start_time).num_milliseconds());
        patch.apply(&mut op.metadata);

        debug!(
            id = %operation_id,
            op_type = %op.op_type,
            duration_ms = op.metadata.duration_ms,
            "operation completed"
        );
    }

    /// Mark an operation failed, recording the error for selectors to expose.
    /// Missing or already-terminal ids are silent no-ops. Failure does NOT
    /// cascade to children — independent children may still produce useful
    /// partial results.
    pub fn fail_operation(&mut self, operation_id: &str, error: OperationError) {
        let Some(op) = self.operations.get_mut(operation_id) else {
            debug!(id = %operation_id, "fail: operation not found — ignoring");
            return;
        };
        if op.status.is_terminal() {
            debug!(id = %operation_id, status = %op.status, "fail: already terminal — ignoring");
            return;
        }

        let now = Utc::now();
        op.status = OperationStatus::Failed;
        op.metadata.end_time = Some(now);
        op.metadata.duration_ms = Some((now - op.metadata.start_time).num_milliseconds());
        op.metadata.error = Some(error);

        warn!(
            id = %operation_id,
            op_type = %op.op_type,
            error = %op.metadata.error.as_ref().map(|e| e.message.as_str()).unwrap_or(""),
            "operation failed"
        );
    }

    /// Cancel an operation and cascade to all of its descendants.
    ///
    /// Missing or already-terminal ids are silent no-ops, which also makes
    /// re-entrant calls from an in-flight cascade safe. For each live
    /// operation visited: status flips to cancelled, end time and reason are
    /// stamped, the cancellation token fires (at most once per operation —
    /// repeated cancels cannot re-fire it), any registered cancel callback
    /// runs, and the children are visited in stored insertion order with the
    /// same reason. A failing callback is logged and never stops the rest of
    /// the cascade.
    pub fn cancel_operation(&mut self, operation_id: &str, reason: Option<&str>) {
        let reason = reason.unwrap_or(DEFAULT_CANCEL_REASON);

        // The relation is a tree (single parent pointer per node); the
        // visited set keeps a malformed graph from looping the cascade.
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack = vec![operation_id.to_string()];

        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }

            let (callback, ctx) = {
                let Some(op) = self.operations.get_mut(&id) else {
                    debug!(id = %id, "cancel: operation not found — ignoring");
                    continue;
                };
                if op.status.is_terminal() {
                    debug!(id = %id, status = %op.status, "cancel: already terminal — skipping");
                    continue;
                }

                let now = Utc::now();
                op.status = OperationStatus::Cancelled;
                op.metadata.end_time = Some(now);
                op.metadata.duration_ms =
                    Some((now - op.metadata.start_time).num_milliseconds());
                op.metadata.cancel_reason = Some(reason.to_string());
                if op.op_type == OperationType::ExecAgentRuntime {
                    // UI stop button flips immediately, before teardown lands.
                    op.metadata.is_aborting = true;
                }

                // Idempotent single-fire; safe under repeated cancels.
                op.cancel_token.cancel();

                // Depth-first, children in insertion order.
                for child in op.child_operation_ids.iter().rev() {
                    stack.push(child.clone());
                }

                (
                    op.on_cancel.take(),
                    CancelContext {
                        operation_id: id.clone(),
                        op_type: op.op_type,
                        reason: reason.to_string(),
                        metadata: op.metadata.clone(),
                    },
                )
            };

            if let Some(cb) = callback {
                if let Err(err) = cb(ctx) {
                    warn!(id = %id, err = %err, "cancel callback failed — continuing cascade");
                }
            }

            info!(id = %id, reason, "operation cancelled");
        }
    }

    /// Cancel every running operation matching the filter. The candidate set
    /// is narrowed through the context or type index when the filter allows,
    /// instead of scanning the whole registry. Live status is re-checked per
    /// candidate, so operations already cascade-cancelled earlier in the same
    /// batch are skipped. Returns exactly the ids this call transitioned.
    pub fn cancel_operations(
        &mut self,
        filter: &OperationFilter,
        reason: Option<&str>,
    ) -> Vec<String> {
        let reason = reason.or(Some(BATCH_CANCEL_REASON));

        let candidates: Vec<String> = if let Some(key) = &filter.context_key {
            self.by_context.get(key).cloned().unwrap_or_default()
        } else if !filter.types.is_empty() {
            filter
                .types
                .iter()
                .flat_map(|t| self.by_type.get(t).cloned().unwrap_or_default())
                .collect()
        } else {
            self.operations.keys().cloned().collect()
        };

        let mut cancelled = Vec::new();
        for id in candidates {
            let Some(op) = self.operations.get(&id) else {
                continue;
            };
            // Re-check at call time, not on a snapshot: a cascade triggered
            // earlier in this loop may have already terminated this one.
            if !op.status.is_running() || !filter.matches(op) {
                continue;
            }
            self.cancel_operation(&id, reason);
            cancelled.push(id);
        }

        if !cancelled.is_empty() {
            info!(count = cancelled.len(), "batch-cancelled operations");
        }
        cancelled
    }

    /// Cancel every running operation in the registry.
    pub fn cancel_all_operations(&mut self, reason: Option<&str>) {
        let reason = reason.or(Some(CANCEL_ALL_REASON));
        let running: Vec<String> = self
            .operations
            .values()
            .filter(|op| op.status.is_running())
            .map(|op| op.id.clone())
            .collect();
        for id in running {
            self.cancel_operation(&id, reason);
        }
    }

    // ─── Message association & metadata ──────────────────────────────────────

    /// Point a message at an operation. Unconditional — no existence check on
    /// the operation id, because the message may be produced before the
    /// operation registers (or after it was swept). Later associations for
    /// the same message overwrite earlier ones.
    pub fn associate_message_with_operation(&mut self, message_id: &str, operation_id: &str) {
        self.message_operation_map
            .insert(message_id.to_string(), operation_id.to_string());
        let ids = self.by_message.entry(message_id.to_string()).or_default();
        if !ids.iter().any(|i| i == operation_id) {
            ids.push(operation_id.to_string());
        }
        debug!(message = %message_id, id = %operation_id, "message associated with operation");
    }

    /// Merge a metadata patch into an operation. Missing ids are no-ops.
    /// Status is never touched here — `complete`/`fail`/`cancel` are the only
    /// status mutators.
    pub fn update_operation_metadata(&mut self, operation_id: &str, patch: OperationMetadataPatch) {
        let Some(op) = self.operations.get_mut(operation_id) else {
            return;
        };
        patch.apply(&mut op.metadata);
    }

    /// Update an operation's progress. When `total` is omitted, the previous
    /// total (or `current` itself) is kept, and no percentage is computed.
    pub fn update_operation_progress(
        &mut self,
        operation_id: &str,
        current: u64,
        total: Option<u64>,
    ) {
        let Some(op) = self.operations.get_mut(operation_id) else {
            return;
        };
        let prior_total = op.metadata.progress.as_ref().map(|p| p.total);
        let resolved_total = total.or(prior_total).unwrap_or(current);
        let percentage = total
            .filter(|t| *t > 0)
            .map(|t| ((current as f64 / t as f64) * 100.0).round() as u32);
        op.metadata.progress = Some(OperationProgress {
            current,
            total: resolved_total,
            percentage,
        });
    }

    /// Register a once-only callback invoked when the operation is cancelled.
    /// Replaces any previously registered callback. Never fires for an
    /// operation that completes or fails.
    pub fn on_operation_cancel<F>(&mut self, operation_id: &str, callback: F)
    where
        F: FnOnce(CancelContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let Some(op) = self.operations.get_mut(operation_id) else {
            warn!(id = %operation_id, "on_operation_cancel: operation not found");
            return;
        };
        op.on_cancel = Some(Box::new(callback));
    }

    // ─── Throwing accessors ──────────────────────────────────────────────────

    /// The cancellation token for an operation, for wiring into downstream
    /// async work. Unlike the lifecycle mutators, this errors on a missing
    /// id rather than minting a token nothing will ever fire.
    pub fn cancel_token(&self, operation_id: &str) -> Result<CancellationToken, RegistryError> {
        self.operations
            .get(operation_id)
            .map(|op| op.cancel_token.clone())
            .ok_or_else(|| RegistryError::OperationNotFound(operation_id.to_string()))
    }

    /// The `(session, topic)` an operation belongs to — used by sibling
    /// subsystems to recover where work should land.
    pub fn session_context(
        &self,
        operation_id: &str,
    ) -> Result<(String, Option<String>), RegistryError> {
        let op = self
            .operations
            .get(operation_id)
            .ok_or_else(|| RegistryError::OperationNotFound(operation_id.to_string()))?;
        let session_id = op
            .context
            .session_id
            .clone()
            .ok_or_else(|| RegistryError::MissingSessionContext(operation_id.to_string()))?;
        Ok((session_id, op.context.topic_id.clone()))
    }

    // ─── Explicit removal ────────────────────────────────────────────────────

    /// Remove an operation outright, unlinking it from every index. Returns
    /// whether anything was removed. This is the explicit-delete escape
    /// hatch; normal retention goes through the janitor. Does NOT fire the
    /// cancellation token — cancel first if the work is still running.
    pub fn remove_operation(&mut self, operation_id: &str) -> bool {
        match self.operations.remove(operation_id) {
            Some(op) => {
                self.unlink(&op);
                debug!(id = %operation_id, "operation removed");
                true
            }
            None => false,
        }
    }

    /// Unlink a removed operation from every derived index, its parent's
    /// child list, and (to keep the tree invariant intact) the parent
    /// pointers of any surviving children.
    fn unlink(&mut self, op: &Operation) {
        if let Some(ids) = self.by_type.get_mut(&op.op_type) {
            ids.retain(|id| id != &op.id);
            if ids.is_empty() {
                self.by_type.remove(&op.op_type);
            }
        }
        if let Some(key) = op.context.key() {
            if let Some(ids) = self.by_context.get_mut(&key) {
                ids.retain(|id| id != &op.id);
                if ids.is_empty() {
                    self.by_context.remove(&key);
                }
            }
        }
        // A message can be re-associated, so the operation may appear under
        // message ids other than its own context's — unlink everywhere.
        self.by_message.retain(|_, ids| {
            ids.retain(|id| id != &op.id);
            !ids.is_empty()
        });
        self.message_operation_map.retain(|_, id| id != &op.id);

        if let Some(pid) = &op.parent_operation_id {
            if let Some(parent) = self.operations.get_mut(pid) {
                parent.child_operation_ids.retain(|id| id != &op.id);
            }
        }
        for child_id in &op.child_operation_ids {
            if let Some(child) = self.operations.get_mut(child_id) {
                child.parent_operation_id = None;
            }
        }
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe shared registry. Async callers serialize access through the
/// lock; no mutator holds an await point.
pub type SharedOperationRegistry = Arc<tokio::sync::RwLock<OperationRegistry>>;
