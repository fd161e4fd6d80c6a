// options.rs — Processing options for metadata walks
//
// Flag set recognized by the walker plus the presets used by the public
// entry points. A `CancellationSignal` is checked once per visited node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a walk and its requester.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Options steering one metadata walk.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Return immediately when the root is already runtime-ready.
    pub skip_if_cached: bool,
    /// Declare implementation collections but do not descend into them.
    pub skip_private_children: bool,
    /// Never run constraints.
    pub skip_constraints: bool,
    /// Give every unbound runtime argument an empty binding.
    pub create_empty_bindings: bool,
    /// Keep each node's diagnostics on the node instead of the aggregate.
    pub store_temp_violations: bool,
    /// Process exactly one node.
    pub only_visit_single_level: bool,
    /// Invoke the per-node callback on first declaration only.
    pub only_callback_for_declarations: bool,
    pub cancellation: CancellationSignal,
}

impl ProcessOptions {
    /// Options used before a workflow runs: full walk, empty bindings, skip
    /// roots that are already ready.
    pub fn full_caching() -> Self {
        ProcessOptions {
            skip_if_cached: true,
            create_empty_bindings: true,
            only_callback_for_declarations: true,
            ..Self::default()
        }
    }

    /// Design-time validation: full walk, never shortcut.
    pub fn validation() -> Self {
        Self::default()
    }

    /// Inspect one node without descending.
    pub fn single_level_validation() -> Self {
        ProcessOptions {
            only_visit_single_level: true,
            ..Self::default()
        }
    }

    /// Options for completing one subtree from inside a walk callback.
    ///
    /// Constraints are left to the enclosing walk and diagnostics are stored
    /// on the nodes so the enclosing walk drains them when it gets there.
    pub fn finish_caching_subtree(original: &ProcessOptions) -> Self {
        ProcessOptions {
            skip_if_cached: false,
            skip_private_children: original.skip_private_children,
            skip_constraints: true,
            create_empty_bindings: original.create_empty_bindings,
            store_temp_violations: true,
            only_visit_single_level: false,
            only_callback_for_declarations: true,
            cancellation: original.cancellation.clone(),
        }
    }

    /// A walk with these options can mark its root runtime-ready.
    ///
    /// Deferred diagnostics never reach the aggregate of a root pass, so a
    /// deferring walk cannot vouch for its root.
    pub fn is_runtime_ready_options(&self) -> bool {
        !self.skip_private_children
            && self.create_empty_bindings
            && !self.only_visit_single_level
            && !self.store_temp_violations
    }

    pub fn with_cancellation(mut self, cancellation: CancellationSignal) -> Self {
        self.cancellation = cancellation;
        self
    }
}
