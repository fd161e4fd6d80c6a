// validation.rs — Argument checks and diagnostic attribution
//
// Per-activity diagnostics are produced without a source, then attributed
// here: each is given the activity (or private-implementation owner) it is
// reported against, that activity's qualified id, and a prefix describing
// the ancestor chain of the occurrence that produced it. Attributed errors
// go either to the caller's aggregate or to the activity's deferred store.
//
// Preconditions: `activity` and every chain entry belong to `tree`.
// Postconditions: merged errors keep their production order.
// Failure modes: none.
// Side effects: deferred mode writes into the activity's cache state.

use crate::activity::{ActivityTree, Declaration};
use crate::call_stack::ActivityCallStack;
use crate::diag::ValidationError;
use crate::id::ActivityId;

/// Report required arguments that have no binding. The root's arguments are
/// supplied by the host when an instance starts, so the root is exempt.
pub fn validate_arguments(declaration: &Declaration, is_root: bool, errors: &mut Vec<ValidationError>) {
    if is_root {
        return;
    }
    for argument in declaration.arguments.iter().filter(|a| a.is_required && a.is_unbound()) {
        errors.push(ValidationError::new(format!(
            "Value for a required activity argument '{}' was not supplied.",
            argument.name
        )));
    }
}

/// Source and prefix for diagnostics raised by `activity` at this occurrence.
///
/// When the activity or any ancestor on the chain sits inside a private
/// implementation, the error is reported against the owner of the outermost
/// such implementation, since the inner activities are not visible to the
/// workflow author. Otherwise the prefix is the display-name path of the
/// occurrence.
pub fn generate_prefix(tree: &ActivityTree, activity: ActivityId, chain: &ActivityCallStack) -> (ActivityId, Option<String>) {
    let occurrence = chain.iter_from_root().map(|c| c.activity).chain(std::iter::once(activity));

    for member in occurrence {
        let Some(node) = tree.get(member) else { continue };
        if !node.state.is_private() {
            continue;
        }
        if let Some(owner) = node.state.parent {
            let prefix = format!(
                "The private implementation of activity '{}' has the following validation error: ",
                tree.display_name(owner)
            );
            return (owner, Some(prefix));
        }
    }

    if chain.is_empty() {
        return (activity, None);
    }
    let mut prefix = String::new();
    for frame in chain.iter_from_root() {
        prefix.push_str(tree.display_name(frame.activity));
        prefix.push_str(" > ");
    }
    prefix.push_str(tree.display_name(activity));
    prefix.push_str(": ");
    (activity, Some(prefix))
}

/// Attribute `produced` to this occurrence of `activity`, then append it to
/// `aggregate`, or to the activity's deferred store when `defer` is set.
pub fn merge_errors(
    tree: &mut ActivityTree,
    activity: ActivityId,
    chain: &ActivityCallStack,
    produced: Vec<ValidationError>,
    defer: bool,
    aggregate: &mut Vec<ValidationError>,
) {
    if produced.is_empty() {
        return;
    }
    let (source, prefix) = generate_prefix(tree, activity, chain);
    let source_id = tree.qualified_id(source).cloned();
    let attributed = produced.into_iter().map(|mut error| {
        error.source = Some(source);
        error.source_id = source_id.clone();
        if let Some(prefix) = &prefix {
            error.prefix = Some(prefix.clone());
        }
        error
    });

    if defer {
        if let Some(node) = tree.get_mut(activity) {
            node.state.deferred_errors.extend(attributed);
        }
    } else {
        aggregate.extend(attributed);
    }
}

/// Move the deferred errors of `activity` into `aggregate`.
pub fn drain_deferred(tree: &mut ActivityTree, activity: ActivityId, aggregate: &mut Vec<ValidationError>) {
    if let Some(node) = tree.get_mut(activity) {
        aggregate.append(&mut node.state.deferred_errors);
    }
}

/// Drain every activity's deferred store, in qualified-id order.
pub fn drain_all_deferred(tree: &mut ActivityTree, aggregate: &mut Vec<ValidationError>) {
    let mut pending: Vec<ActivityId> = tree.ids().filter(|&id| tree[id].state().has_deferred_errors()).collect();
    pending.sort_by(|a, b| tree.qualified_id(*a).cmp(&tree.qualified_id(*b)));
    for id in pending {
        drain_deferred(tree, id, aggregate);
    }
}
