// SPDX-License-Identifier: MIT
//! Property-based tests.
//!
//! 1. Status state machine: running is the only non-terminal state, and no
//!    terminal state admits a further transition.
//! 2. Index consistency: any random mutator sequence leaves every derived
//!    index exactly consistent with registry content.
//!
//! Run with: cargo test --test proptest_operations

use std::time::Duration;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use optrack::{
    OperationContext, OperationError, OperationRegistry, OperationStatus, OperationType,
    StartOperation,
};

// ─── 1. Status state machine properties ──────────────────────────────────────

const ALL_STATUSES: &[OperationStatus] = &[
    OperationStatus::Running,
    OperationStatus::Completed,
    OperationStatus::Failed,
    OperationStatus::Cancelled,
];

/// Valid transitions: running may move to any terminal state; terminal
/// states move nowhere.
fn valid_next_states(status: OperationStatus) -> &'static [OperationStatus] {
    match status {
        OperationStatus::Running => &[
            OperationStatus::Completed,
            OperationStatus::Failed,
            OperationStatus::Cancelled,
        ],
        _ => &[],
    }
}

proptest! {
    /// A status is terminal exactly when it has no valid next states.
    #[test]
    fn terminality_matches_the_transition_table(idx in 0_usize..4) {
        let status = ALL_STATUSES[idx % ALL_STATUSES.len()];
        prop_assert_eq!(status.is_terminal(), valid_next_states(status).is_empty());
    }

    /// Every reachable transition target is terminal — one hop ends the
    /// lifecycle, so no sequence of transitions can exceed length one.
    #[test]
    fn lifecycles_end_after_one_transition(idx in 0_usize..4) {
        let status = ALL_STATUSES[idx % ALL_STATUSES.len()];
        for &next in valid_next_states(status) {
            prop_assert!(next.is_terminal());
            prop_assert!(valid_next_states(next).is_empty());
        }
    }
}

// ─── 2. Index consistency under random mutator sequences ─────────────────────

const TYPES: &[OperationType] = &[
    OperationType::ExecAgentRuntime,
    OperationType::ToolCalling,
    OperationType::Reasoning,
];

/// One registry mutation, picked by the fuzzed command tuple. Index operands
/// select existing operations modulo the created-id list.
fn apply_command(
    reg: &mut OperationRegistry,
    created: &mut Vec<String>,
    cmd: u8,
    a: u8,
    b: u8,
) {
    let pick = |created: &Vec<String>, n: u8| -> Option<String> {
        if created.is_empty() {
            None
        } else {
            Some(created[n as usize % created.len()].clone())
        }
    };

    match cmd {
        0 => {
            // Root start.
            let context = OperationContext {
                session_id: Some(format!("s{}", b % 2)),
                topic_id: if a % 2 == 0 { None } else { Some("t1".into()) },
                ..Default::default()
            };
            let started = reg.start_operation(StartOperation {
                context,
                ..StartOperation::new(TYPES[a as usize % TYPES.len()])
            });
            created.push(started.operation_id);
        }
        1 => {
            // Child start (parent picked from the created list).
            let started = reg.start_operation(StartOperation {
                parent_operation_id: pick(created, b),
                ..StartOperation::new(TYPES[a as usize % TYPES.len()])
            });
            created.push(started.operation_id);
        }
        2 => {
            if let Some(id) = pick(created, b) {
                reg.complete_operation(&id);
            }
        }
        3 => {
            if let Some(id) = pick(created, b) {
                reg.fail_operation(&id, OperationError::new("fuzz", "induced failure"));
            }
        }
        4 => {
            if let Some(id) = pick(created, b) {
                reg.cancel_operation(&id, Some("fuzz cancel"));
            }
        }
        5 => {
            if let Some(id) = pick(created, a) {
                reg.associate_message_with_operation(&format!("m{}", b % 4), &id);
            }
        }
        _ => {
            // Sweep everything terminal, regardless of age.
            reg.cleanup_completed_operations(Duration::ZERO);
        }
    }
}

/// Check every cross-reference the registry promises to keep exact.
fn assert_consistent(reg: &OperationRegistry) -> Result<(), TestCaseError> {
    let mut seen = 0_usize;

    for op in reg.operations() {
        // Parent/child bidirectional tree invariant.
        if let Some(pid) = &op.parent_operation_id {
            let parent = reg.get(pid);
            prop_assert!(parent.is_some(), "parent {} of {} must exist", pid, op.id);
            prop_assert!(
                parent.unwrap().child_operation_ids.contains(&op.id),
                "parent {} must list child {}",
                pid,
                op.id
            );
        }
        for child_id in &op.child_operation_ids {
            let child = reg.get(child_id);
            prop_assert!(child.is_some(), "child {} of {} must exist", child_id, op.id);
            prop_assert_eq!(
                child.unwrap().parent_operation_id.as_deref(),
                Some(op.id.as_str())
            );
        }

        // Context index membership matches the operation's own key.
        if let Some(key) = op.context_key() {
            let in_context: Vec<_> =
                reg.operations_in_context(&key).iter().map(|o| o.id.clone()).collect();
            prop_assert!(
                in_context.contains(&op.id),
                "operation {} missing from its context index {}",
                op.id,
                key
            );
        }

        // Terminal bookkeeping.
        if op.is_terminal() {
            prop_assert!(op.metadata.end_time.is_some());
        } else {
            prop_assert!(op.metadata.end_time.is_none());
        }

        seen += 1;
    }

    // The type index partitions the registry exactly.
    let mut by_type_total = 0_usize;
    for &ty in TYPES {
        for op in reg.operations_by_type(ty) {
            prop_assert_eq!(op.op_type, ty);
            by_type_total += 1;
        }
    }
    prop_assert_eq!(by_type_total, seen);
    prop_assert_eq!(reg.len(), seen);

    // Message map entries always resolve to live operations.
    for m in ["m0", "m1", "m2", "m3"] {
        if let Some(op) = reg.operation_for_message(m) {
            prop_assert!(reg.get(&op.id).is_some());
        }
        for op in reg.operations_for_message(m) {
            prop_assert!(reg.get(&op.id).is_some());
        }
    }

    Ok(())
}

proptest! {
    /// Any interleaving of start/complete/fail/cancel/associate/sweep leaves
    /// the registry and every derived index exactly consistent.
    #[test]
    fn indices_stay_consistent_under_any_mutation_sequence(
        commands in prop::collection::vec((0_u8..7, any::<u8>(), any::<u8>()), 0..80)
    ) {
        let mut reg = OperationRegistry::new();
        let mut created = Vec::new();

        for (cmd, a, b) in commands {
            apply_command(&mut reg, &mut created, cmd, a, b);
            assert_consistent(&reg)?;
        }
    }
}
