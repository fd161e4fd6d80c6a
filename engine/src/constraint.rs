// constraint.rs — Structural validation rules and their executor
//
// A constraint is a named rule evaluated against one occurrence of an
// activity: the activity itself plus the ancestor chain it was reached
// through. The walker decides whether an occurrence is eligible; the
// `ConstraintExecutor` installed on the tree decides how rules run.

use std::fmt;
use std::sync::Arc;

use crate::activity::ActivityTree;
use crate::call_stack::ActivityCallStack;
use crate::diag::ValidationError;
use crate::id::ActivityId;
use crate::options::ProcessOptions;

/// Everything a rule may inspect for one occurrence.
pub struct ConstraintContext<'a> {
    pub tree: &'a ActivityTree,
    pub activity: ActivityId,
    pub parent_chain: &'a ActivityCallStack,
    pub options: &'a ProcessOptions,
}

impl ConstraintContext<'_> {
    pub fn display_name(&self) -> &str {
        self.tree.display_name(self.activity)
    }

    /// Display names of the ancestors, nearest parent first.
    pub fn ancestor_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.parent_chain
            .iter()
            .map(move |frame| self.tree.display_name(frame.activity))
    }
}

pub trait ConstraintRule: Send + Sync {
    fn check(&self, context: &ConstraintContext<'_>) -> Vec<ValidationError>;
}

impl<F> ConstraintRule for F
where
    F: Fn(&ConstraintContext<'_>) -> Vec<ValidationError> + Send + Sync,
{
    fn check(&self, context: &ConstraintContext<'_>) -> Vec<ValidationError> {
        self(context)
    }
}

/// A named rule attached to an activity declaration.
#[derive(Clone)]
pub struct Constraint {
    name: String,
    rule: Arc<dyn ConstraintRule>,
}

impl Constraint {
    pub fn new(name: impl Into<String>, rule: impl ConstraintRule + 'static) -> Self {
        Constraint {
            name: name.into(),
            rule: Arc::new(rule),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check(&self, context: &ConstraintContext<'_>) -> Vec<ValidationError> {
        self.rule.check(context)
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraint").field("name", &self.name).finish()
    }
}

// ── Executors ───────────────────────────────────────────────────────────────

/// Runs the constraints of one eligible occurrence.
pub trait ConstraintExecutor: Send + Sync {
    fn run_constraints(&self, context: &ConstraintContext<'_>, constraints: &[Constraint]) -> Vec<ValidationError>;
}

/// Runs every rule in declaration order and concatenates the results.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleConstraintExecutor;

impl ConstraintExecutor for RuleConstraintExecutor {
    fn run_constraints(&self, context: &ConstraintContext<'_>, constraints: &[Constraint]) -> Vec<ValidationError> {
        constraints.iter().flat_map(|c| c.check(context)).collect()
    }
}

// ── Built-in rules ──────────────────────────────────────────────────────────

/// Fails unless some ancestor has the given display name.
#[derive(Debug, Clone)]
pub struct RequiresAncestor {
    pub ancestor: String,
}

impl ConstraintRule for RequiresAncestor {
    fn check(&self, context: &ConstraintContext<'_>) -> Vec<ValidationError> {
        if context.ancestor_names().any(|name| name == self.ancestor) {
            return Vec::new();
        }
        vec![ValidationError::new(format!(
            "Activity '{}' must be placed inside an activity named '{}'.",
            context.display_name(),
            self.ancestor
        ))]
    }
}

/// Fails when any ancestor has the given display name.
#[derive(Debug, Clone)]
pub struct ForbidsAncestor {
    pub ancestor: String,
}

impl ConstraintRule for ForbidsAncestor {
    fn check(&self, context: &ConstraintContext<'_>) -> Vec<ValidationError> {
        if !context.ancestor_names().any(|name| name == self.ancestor) {
            return Vec::new();
        }
        vec![ValidationError::new(format!(
            "Activity '{}' cannot be placed inside an activity named '{}'.",
            context.display_name(),
            self.ancestor
        ))]
    }
}
