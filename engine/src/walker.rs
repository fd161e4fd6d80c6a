// walker.rs — Metadata cache walk over activity definition graphs
//
// Declares every activity reachable from a root exactly once: assigns its
// qualified id, runs its declaration hook, validates its arguments, builds
// its scopes, and relates everything it references. Shared activities are
// revisited once per referencing occurrence so constraints see each ancestor
// chain, but are never declared twice.
//
// Preconditions: the tree was initialized for a pass (`cache_root_metadata`
//   does this) before any activity is walked.
// Postconditions: on success every reachable activity is declared; the root
//   is runtime-ready iff the pass used runtime-ready options and produced no
//   error-level diagnostics. Starting a pass clears readiness first.
// Failure modes: `CacheError` for usage errors and cancellation. Soft
//   problems never abort the walk; they are returned as diagnostics.
// Side effects: rewrites the cache state, environments, and id-spaces of the
//   tree; invokes the caller's callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::activity::{
    ActivityMetadata, ActivityTree, CachingState, CollectionType, Declaration, DelegateRef, RelationshipType,
    RuntimeArgument,
};
use crate::call_stack::{ActivityCallStack, ChildActivity};
use crate::constraint::ConstraintContext;
use crate::diag::{has_errors, ValidationError};
use crate::environment::{HostEnvironment, LocationKind, LocationReference};
use crate::error::{CacheError, Result};
use crate::id::{ActivityId, EnvironmentId, IdSpaceId, LocalId};
use crate::options::ProcessOptions;
use crate::traverse::{self, DepthFirstVisitor, Worklist};
use crate::validation;

/// Per-activity hook invoked during a walk. Receives the tree so it can
/// inspect metadata or finish caching a subtree early.
pub type ProcessActivityCallback<'a> = dyn FnMut(&mut ActivityTree, ChildActivity, &ActivityCallStack) -> Result<()> + 'a;

// ── Workflow definition handle ──────────────────────────────────────────────

/// A root activity and its tree, shareable between threads that race to
/// cache it.
pub struct WorkflowDefinition {
    tree: Mutex<ActivityTree>,
    root: ActivityId,
    runtime_ready: AtomicBool,
    associated: AtomicBool,
}

impl WorkflowDefinition {
    pub fn new(tree: ActivityTree, root: ActivityId) -> Result<Self> {
        if !tree.contains(root) {
            return Err(CacheError::UnknownActivity(root));
        }
        Ok(WorkflowDefinition {
            tree: Mutex::new(tree),
            root,
            runtime_ready: AtomicBool::new(false),
            associated: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> ActivityId {
        self.root
    }

    pub fn is_runtime_ready(&self) -> bool {
        self.runtime_ready.load(Ordering::Acquire)
    }

    /// True once an instance has been started from this definition.
    pub fn is_associated(&self) -> bool {
        self.associated.load(Ordering::Acquire)
    }

    pub(crate) fn mark_associated(&self) {
        self.associated.store(true, Ordering::Release);
    }

    /// Exclusive access to the tree. Blocks while a cache pass runs.
    pub fn lock(&self) -> MutexGuard<'_, ActivityTree> {
        self.tree.lock()
    }

    pub fn into_tree(self) -> ActivityTree {
        self.tree.into_inner()
    }

    fn should_shortcut(&self, options: &ProcessOptions) -> bool {
        options.skip_if_cached && options.is_runtime_ready_options() && self.is_runtime_ready()
    }
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Cache `definition` starting at its root and return the diagnostics.
///
/// With `skip_if_cached` and runtime-ready options, a root that is already
/// ready returns immediately without declaring anything or invoking the
/// callback. Concurrent callers serialize on the definition's lock; the
/// losers observe the winner's result through the same shortcut.
pub fn cache_root_metadata(
    definition: &WorkflowDefinition,
    host: Option<&HostEnvironment>,
    options: &ProcessOptions,
    callback: Option<&mut ProcessActivityCallback<'_>>,
) -> Result<Vec<ValidationError>> {
    let root = definition.root;
    if definition.should_shortcut(options) {
        debug!(root = %root, "root already runtime-ready; skipping cache pass");
        return Ok(Vec::new());
    }

    let mut tree = definition.tree.lock();
    if definition.should_shortcut(options) {
        debug!(root = %root, "root became runtime-ready while waiting; skipping cache pass");
        return Ok(Vec::new());
    }
    if definition.is_associated() {
        return Err(CacheError::RootAlreadyAssociatedWithInstance {
            display_name: tree.display_name(root).to_string(),
        });
    }

    debug!(root = %root, name = tree.display_name(root), "cache pass start");
    definition.runtime_ready.store(false, Ordering::Release);
    initialize_as_root(&mut tree, root, host);

    let mut errors = Vec::new();
    process_activity_tree_core(&mut tree, ChildActivity::executable(root), None, options, callback, &mut errors)?;

    if !has_errors(&errors) && options.is_runtime_ready_options() {
        tree.runtime_ready = true;
        definition.runtime_ready.store(true, Ordering::Release);
    }
    debug!(
        root = %root,
        diagnostics = errors.len(),
        ready = tree.runtime_ready,
        "cache pass stop"
    );
    Ok(errors)
}

/// Finish caching the subtree under `subtree_root` from inside a walk
/// callback, so its metadata can be inspected before the enclosing walk
/// reaches it.
///
/// Constraints are skipped and diagnostics are stored on the activities;
/// the enclosing walk collects them when it revisits each activity.
pub fn finish_caching_subtree(
    tree: &mut ActivityTree,
    subtree_root: ChildActivity,
    parent_chain: &ActivityCallStack,
    options: &ProcessOptions,
    callback: Option<&mut ProcessActivityCallback<'_>>,
) -> Result<()> {
    let node = tree
        .get(subtree_root.activity)
        .ok_or(CacheError::UnknownActivity(subtree_root.activity))?;
    if node.state.member_of.is_none() {
        return Err(CacheError::UninitializedActivity {
            activity: subtree_root.activity,
            display_name: node.display_name().to_string(),
        });
    }

    let derived = ProcessOptions::finish_caching_subtree(options);
    let mut discarded = Vec::new();
    process_activity_tree_core(tree, subtree_root, Some(parent_chain), &derived, callback, &mut discarded)
}

/// Runtime argument `name` of the activity whose id-space `consumer`
/// belongs to.
pub fn find_argument<'t>(tree: &'t ActivityTree, name: &str, consumer: ActivityId) -> Option<&'t RuntimeArgument> {
    let owner = tree.id_space_owner(consumer)?;
    tree.get(owner)?.runtime.arguments.iter().find(|a| a.name == name)
}

/// Start a new pass rooted at `root`: forget the previous pass and make the
/// host environment the root of the scope chain.
fn initialize_as_root(tree: &mut ActivityTree, root: ActivityId, host: Option<&HostEnvironment>) {
    for activity in &mut tree.activities {
        activity.state = Default::default();
    }
    tree.environments.clear();
    tree.id_spaces.clear();

    let host_env = match host {
        Some(host) => host.materialize(&mut tree.environments),
        None => tree.environments.create_scope_root(),
    };
    let root_space = tree.id_spaces.create(None, None);

    tree.host_env = Some(host_env);
    tree.root = Some(root);
    tree.runtime_ready = false;
    tree.activities[root.0 as usize].state.member_of = Some(root_space);
}

fn process_activity_tree_core(
    tree: &mut ActivityTree,
    start: ChildActivity,
    parent_chain: Option<&ActivityCallStack>,
    options: &ProcessOptions,
    callback: Option<&mut ProcessActivityCallback<'_>>,
    errors: &mut Vec<ValidationError>,
) -> Result<()> {
    let mut walker = MetadataWalker {
        tree,
        chain: parent_chain.cloned().unwrap_or_default(),
        options,
        callback,
        errors,
    };

    if options.only_visit_single_level {
        walker.check_cancelled()?;
        let mut discarded = Worklist::new();
        walker.process(start, &mut discarded)
    } else {
        traverse::drive(start, &mut walker)
    }
}

// ── Walker ──────────────────────────────────────────────────────────────────

struct MetadataWalker<'t, 'c, 'f> {
    tree: &'t mut ActivityTree,
    chain: ActivityCallStack,
    options: &'t ProcessOptions,
    callback: Option<&'c mut ProcessActivityCallback<'f>>,
    errors: &'t mut Vec<ValidationError>,
}

impl DepthFirstVisitor<ChildActivity> for MetadataWalker<'_, '_, '_> {
    type Error = CacheError;

    fn admit(&mut self, child: &ChildActivity) -> Result<bool> {
        self.check_cancelled()?;
        let node = self
            .tree
            .get(child.activity)
            .ok_or(CacheError::UnknownActivity(child.activity))?;
        if !node.state.active {
            return Ok(true);
        }

        let message = format!(
            "Activity '{}' is reachable from itself; the cycle is not processed further.",
            node.display_name()
        );
        validation::merge_errors(
            self.tree,
            child.activity,
            &self.chain,
            vec![ValidationError::new(message)],
            self.options.store_temp_violations,
            self.errors,
        );
        Ok(false)
    }

    fn enter(&mut self, child: ChildActivity, worklist: &mut Worklist<ChildActivity>) -> Result<()> {
        self.process(child, worklist)?;
        if let Some(node) = self.tree.get_mut(child.activity) {
            node.state.active = true;
        }
        self.chain.push(child);
        Ok(())
    }

    fn exit(&mut self) -> Result<()> {
        let Some(completed) = self.chain.pop() else {
            return Ok(());
        };
        let caching = if self.options.skip_private_children {
            CachingState::Partial
        } else {
            CachingState::Full
        };
        if let Some(node) = self.tree.get_mut(completed.activity) {
            node.state.caching = caching;
            node.state.active = false;
        }
        Ok(())
    }
}

impl MetadataWalker<'_, '_, '_> {
    fn check_cancelled(&self) -> Result<()> {
        if self.options.cancellation.is_cancelled() {
            debug!("cache pass cancelled");
            return Err(CacheError::Cancelled);
        }
        Ok(())
    }

    fn process(&mut self, child: ChildActivity, worklist: &mut Worklist<ChildActivity>) -> Result<()> {
        let declared = self
            .tree
            .get(child.activity)
            .ok_or(CacheError::UnknownActivity(child.activity))?
            .state
            .declared;

        if declared {
            self.revisit(child, worklist)?;
        } else {
            self.declare(child, worklist)?;
        }
        self.run_constraints(child)
    }

    // ── First visit ──

    fn declare(&mut self, child: ChildActivity, worklist: &mut Worklist<ChildActivity>) -> Result<()> {
        let node = child.activity;
        let index = node.0 as usize;
        let options = self.options;

        let space = self.tree.activities[index]
            .state
            .member_of
            .ok_or_else(|| CacheError::UninitializedActivity {
                activity: node,
                display_name: self.tree.display_name(node).to_string(),
            })?;
        let host_env = self.tree.host_env.ok_or_else(|| CacheError::UninitializedActivity {
            activity: node,
            display_name: self.tree.display_name(node).to_string(),
        })?;

        let qualified_id = self.tree.id_spaces.add_member(space, node);
        trace!(activity = %node, id = %qualified_id, name = self.tree.display_name(node), "declaring activity");
        {
            let state = &mut self.tree.activities[index].state;
            state.qualified_id = Some(qualified_id);
            state.declared = true;
        }

        let mut local = Vec::new();
        let mut runtime = {
            let activity = &self.tree.activities[index];
            let behavior = Arc::clone(&activity.behavior);
            let mut metadata = ActivityMetadata::new(
                node,
                &activity.definition,
                &mut local,
                options.create_empty_bindings,
            );
            behavior.cache_metadata(&mut metadata);
            metadata.finish()
        };

        let is_root = self.tree.activities[index].state.parent.is_none();
        validation::validate_arguments(&runtime, is_root, &mut local);

        let implementation_env = self.tree.environments.create(Some(host_env), Some(node));
        let enclosing_env = self.enclosing_environment(node, host_env);
        {
            let state = &mut self.tree.activities[index].state;
            state.implementation_env = Some(implementation_env);
            state.enclosing_env = Some(enclosing_env);
        }

        let skip_private = options.skip_private_children;
        for &c in &runtime.children {
            if self.relate(node, c, RelationshipType::Child, None, &mut local) {
                worklist.schedule(ChildActivity::executable(c));
            }
        }
        for &c in &runtime.imported_children {
            if self.relate(node, c, RelationshipType::ImportedChild, None, &mut local) {
                worklist.schedule(ChildActivity::new(c, false));
            }
        }
        for &c in &runtime.implementation_children {
            if self.relate(node, c, RelationshipType::ImplementationChild, None, &mut local) && !skip_private {
                worklist.schedule(ChildActivity::executable(c));
            }
        }

        let mut next_id = 0u32;
        for argument in &mut runtime.arguments {
            argument.owner = Some(node);
            argument.id = Some(LocalId(next_id));
            let location = LocationReference {
                name: argument.name.clone(),
                value_type: argument.value_type.clone(),
                kind: LocationKind::Argument,
                owner: Some(node),
                id: LocalId(next_id),
            };
            next_id += 1;
            if let Err(e) = self.tree.environments.declare(implementation_env, location) {
                local.push(e);
            }
            if let Some(expression) = argument.expression() {
                if self.relate(node, expression, RelationshipType::ArgumentExpression, None, &mut local) {
                    worklist.schedule(ChildActivity::executable(expression));
                }
            }
        }

        let mut public_env: Option<EnvironmentId> = None;
        for variable in &mut runtime.variables {
            variable.owner = Some(node);
            variable.id = Some(LocalId(next_id));
            let env = *public_env.get_or_insert_with(|| self.tree.environments.create(Some(enclosing_env), None));
            let location = LocationReference {
                name: variable.name.clone(),
                value_type: variable.value_type.clone(),
                kind: LocationKind::Variable,
                owner: Some(node),
                id: LocalId(next_id),
            };
            next_id += 1;
            if let Err(e) = self.tree.environments.declare(env, location) {
                local.push(e);
            }
            if let Some(default) = variable.default {
                if self.relate(node, default, RelationshipType::VariableDefault, None, &mut local) {
                    worklist.schedule(ChildActivity::executable(default));
                }
            }
        }
        for variable in &mut runtime.implementation_variables {
            variable.owner = Some(node);
            variable.id = Some(LocalId(next_id));
            let location = LocationReference {
                name: variable.name.clone(),
                value_type: variable.value_type.clone(),
                kind: LocationKind::Variable,
                owner: Some(node),
                id: LocalId(next_id),
            };
            next_id += 1;
            if let Err(e) = self.tree.environments.declare(implementation_env, location) {
                local.push(e);
            }
            if let Some(default) = variable.default {
                let related = self.relate(
                    node,
                    default,
                    RelationshipType::ImplementationVariableDefault,
                    None,
                    &mut local,
                );
                if related && !skip_private {
                    worklist.schedule(ChildActivity::executable(default));
                }
            }
        }

        if let Some(handler_of) = self.tree.activities[index].state.handler_of {
            self.bind_delegate_arguments(node, handler_of, enclosing_env, &mut public_env, &mut next_id, &mut local);
        }

        let public_env = public_env.unwrap_or(enclosing_env);
        self.tree.activities[index].state.public_env = Some(public_env);

        let delegate_collections = [
            (CollectionType::Public, true, true),
            (CollectionType::Imports, false, true),
            (CollectionType::Implementation, true, !skip_private),
        ];
        for (collection, can_be_executed, schedule) in delegate_collections {
            for (i, delegate) in runtime.delegates_in(collection).iter().enumerate() {
                let Some(handler) = delegate.handler else { continue };
                let delegate_ref = DelegateRef {
                    owner: node,
                    collection,
                    index: i,
                };
                let related = self.relate(
                    node,
                    handler,
                    RelationshipType::DelegateHandler,
                    Some(delegate_ref),
                    &mut local,
                );
                if related && schedule {
                    worklist.schedule(ChildActivity::new(handler, can_be_executed));
                }
            }
        }

        self.tree.activities[index].runtime = runtime;

        self.invoke_callback(child)?;

        validation::merge_errors(
            self.tree,
            node,
            &self.chain,
            local,
            options.store_temp_violations,
            self.errors,
        );
        Ok(())
    }

    /// Environment the public scope of `node` hangs off.
    fn enclosing_environment(&self, node: ActivityId, host_env: EnvironmentId) -> EnvironmentId {
        let state = &self.tree.activities[node.0 as usize].state;
        let Some(parent) = state.parent else {
            return host_env;
        };
        let parent_state = &self.tree.activities[parent.0 as usize].state;
        let public = parent_state.public_env;
        let implementation = parent_state.implementation_env;
        let resolved = match state.relationship {
            Some(RelationshipType::Child)
            | Some(RelationshipType::ImportedChild)
            | Some(RelationshipType::VariableDefault) => public,
            Some(RelationshipType::ImplementationChild) | Some(RelationshipType::ImplementationVariableDefault) => {
                implementation
            }
            Some(RelationshipType::ArgumentExpression) => parent_state.enclosing_env,
            Some(RelationshipType::DelegateHandler) => match state.handler_of {
                Some(d) if d.collection == CollectionType::Implementation => implementation,
                _ => public,
            },
            None => None,
        };
        resolved.unwrap_or(host_env)
    }

    /// Delegate arguments of the delegate `node` handles become locations of
    /// `node`, continuing its id sequence in its public scope.
    fn bind_delegate_arguments(
        &mut self,
        node: ActivityId,
        handler_of: DelegateRef,
        enclosing_env: EnvironmentId,
        public_env: &mut Option<EnvironmentId>,
        next_id: &mut u32,
        local: &mut Vec<ValidationError>,
    ) {
        let owner = handler_of.owner.0 as usize;
        let count = self.tree.activities[owner]
            .runtime
            .delegates_in(handler_of.collection)
            .get(handler_of.index)
            .map_or(0, |d| d.arguments.len());

        for j in 0..count {
            let location = {
                let delegates = self.tree.activities[owner]
                    .runtime
                    .delegates_in_mut(handler_of.collection);
                let argument = &mut delegates[handler_of.index].arguments[j];
                argument.owner = Some(node);
                argument.id = Some(LocalId(*next_id));
                LocationReference {
                    name: argument.name.clone(),
                    value_type: argument.value_type.clone(),
                    kind: LocationKind::DelegateArgument,
                    owner: Some(node),
                    id: LocalId(*next_id),
                }
            };
            *next_id += 1;
            let env = *public_env.get_or_insert_with(|| self.tree.environments.create(Some(enclosing_env), None));
            if let Err(e) = self.tree.environments.declare(env, location) {
                local.push(e);
            }
        }
    }

    /// Record that `parent` references `child`. Returns whether `child`
    /// should be scheduled. The first relation of a pass decides the
    /// child's parent and id-space; later ones only schedule it again.
    fn relate(
        &mut self,
        parent: ActivityId,
        child: ActivityId,
        relationship: RelationshipType,
        handler_of: Option<DelegateRef>,
        local: &mut Vec<ValidationError>,
    ) -> bool {
        if !self.tree.contains(child) {
            local.push(ValidationError::new(format!(
                "Activity '{}' references activity {} which does not exist.",
                self.tree.display_name(parent),
                child
            )));
            return false;
        }
        if child == parent {
            local.push(ValidationError::new(format!(
                "Activity '{}' cannot reference itself.",
                self.tree.display_name(parent)
            )));
            return false;
        }
        if Some(child) == self.tree.root {
            local.push(ValidationError::new(format!(
                "The root activity '{}' cannot be referenced by activity '{}'.",
                self.tree.display_name(child),
                self.tree.display_name(parent)
            )));
            return false;
        }

        if self.tree.activities[child.0 as usize].state.member_of.is_some() {
            return true;
        }

        let is_implementation = matches!(
            relationship,
            RelationshipType::ImplementationChild | RelationshipType::ImplementationVariableDefault
        ) || matches!(handler_of, Some(d) if d.collection == CollectionType::Implementation);

        let space = if is_implementation {
            self.own_id_space(parent)
        } else {
            self.tree.activities[parent.0 as usize].state.member_of
        };

        let state = &mut self.tree.activities[child.0 as usize].state;
        state.parent = Some(parent);
        state.relationship = Some(relationship);
        state.handler_of = handler_of;
        state.member_of = space;
        true
    }

    fn own_id_space(&mut self, owner: ActivityId) -> Option<IdSpaceId> {
        let state = &self.tree.activities[owner.0 as usize].state;
        if let Some(space) = state.own_space {
            return Some(space);
        }
        let owner_id = state.qualified_id.clone();
        let space = self.tree.id_spaces.create(Some(owner), owner_id);
        self.tree.activities[owner.0 as usize].state.own_space = Some(space);
        Some(space)
    }

    // ── Subsequent visits ──

    fn revisit(&mut self, child: ChildActivity, worklist: &mut Worklist<ChildActivity>) -> Result<()> {
        let node = child.activity;
        let root = self.tree.root;
        let len = self.tree.len();
        let relatable = |c: ActivityId| c != node && Some(c) != root && (c.0 as usize) < len;
        schedule_references(
            &self.tree.activities[node.0 as usize].runtime,
            self.options,
            relatable,
            worklist,
        );

        if !self.options.only_callback_for_declarations {
            self.invoke_callback(child)?;
        }
        if !self.options.store_temp_violations {
            validation::drain_deferred(self.tree, node, self.errors);
        }
        Ok(())
    }

    fn invoke_callback(&mut self, child: ChildActivity) -> Result<()> {
        if let Some(callback) = self.callback.as_mut() {
            callback(&mut *self.tree, child, &self.chain)?;
        }
        Ok(())
    }

    // ── Constraints ──

    fn run_constraints(&mut self, child: ChildActivity) -> Result<()> {
        let node = child.activity;
        let options = self.options;
        let eligible = !options.skip_constraints && self.chain.will_execute() && child.can_be_executed;
        if !eligible {
            return Ok(());
        }
        let constraints = self.tree.activities[node.0 as usize].runtime.constraints.clone();
        if constraints.is_empty() {
            return Ok(());
        }

        let executor = Arc::clone(&self.tree.constraint_executor);
        let found = {
            let context = ConstraintContext {
                tree: &*self.tree,
                activity: node,
                parent_chain: &self.chain,
                options,
            };
            executor.run_constraints(&context, &constraints)
        };
        trace!(activity = %node, constraints = constraints.len(), errors = found.len(), "constraints evaluated");
        validation::merge_errors(
            self.tree,
            node,
            &self.chain,
            found,
            options.store_temp_violations,
            self.errors,
        );
        Ok(())
    }
}

/// Schedule everything a declared activity references, without relating.
/// References rejected when the activity was declared stay unscheduled.
fn schedule_references(
    runtime: &Declaration,
    options: &ProcessOptions,
    relatable: impl Fn(ActivityId) -> bool,
    worklist: &mut Worklist<ChildActivity>,
) {
    let mut schedule = |activity: ActivityId, can_be_executed: bool| {
        if relatable(activity) {
            worklist.schedule(ChildActivity::new(activity, can_be_executed));
        }
    };

    for &c in &runtime.children {
        schedule(c, true);
    }
    for &c in &runtime.imported_children {
        schedule(c, false);
    }
    for expression in runtime.arguments.iter().filter_map(RuntimeArgument::expression) {
        schedule(expression, true);
    }
    for default in runtime.variables.iter().filter_map(|v| v.default) {
        schedule(default, true);
    }
    for handler in runtime.delegates.iter().filter_map(|d| d.handler) {
        schedule(handler, true);
    }
    for handler in runtime.imported_delegates.iter().filter_map(|d| d.handler) {
        schedule(handler, false);
    }
    if !options.skip_private_children {
        for &c in &runtime.implementation_children {
            schedule(c, true);
        }
        for handler in runtime.implementation_delegates.iter().filter_map(|d| d.handler) {
            schedule(handler, true);
        }
        for default in runtime.implementation_variables.iter().filter_map(|v| v.default) {
            schedule(default, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{
        ActivityBehavior, ActivityDelegate, ArgumentDirection, DefaultBehavior, DelegateArgument, ValueType, Variable,
    };
    use crate::constraint::Constraint;
    use crate::options::CancellationSignal;
    use std::sync::atomic::AtomicUsize;

    struct Counting(Arc<AtomicUsize>);

    impl ActivityBehavior for Counting {
        fn cache_metadata(&self, metadata: &mut ActivityMetadata<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
            DefaultBehavior.cache_metadata(metadata);
        }
    }

    fn always_fails(context: &ConstraintContext<'_>) -> Vec<ValidationError> {
        vec![ValidationError::new(format!("{} checked", context.display_name()))]
    }

    fn int() -> ValueType {
        ValueType::new("Int32")
    }

    fn cache(tree: ActivityTree, root: ActivityId, options: &ProcessOptions) -> (WorkflowDefinition, Vec<ValidationError>) {
        let definition = WorkflowDefinition::new(tree, root).unwrap();
        let errors = cache_root_metadata(&definition, None, options, None).unwrap();
        (definition, errors)
    }

    fn qid(tree: &ActivityTree, id: ActivityId) -> String {
        tree.qualified_id(id).map(ToString::to_string).unwrap_or_default()
    }

    #[test]
    fn qualified_ids_follow_visit_order() {
        let mut tree = ActivityTree::new();
        let a = tree.add("A", Declaration::new());
        let b = tree.add("B", Declaration::new());
        let root = tree.add("Root", Declaration::new().with_child(a).with_child(b));
        let (definition, errors) = cache(tree, root, &ProcessOptions::full_caching());
        assert!(errors.is_empty(), "{:#?}", errors);
        assert!(definition.is_runtime_ready());

        let tree = definition.lock();
        assert_eq!(qid(&tree, root), "1");
        assert_eq!(qid(&tree, b), "2");
        assert_eq!(qid(&tree, a), "3");
        assert_eq!(tree[a].state().caching(), CachingState::Full);
        assert!(tree.is_runtime_ready());
    }

    #[test]
    fn arguments_then_variables_share_one_id_sequence() {
        let mut tree = ActivityTree::new();
        let node = tree.add(
            "Node",
            Declaration::new()
                .with_argument(RuntimeArgument::new("a", int(), ArgumentDirection::In))
                .with_argument(RuntimeArgument::new("b", int(), ArgumentDirection::Out))
                .with_variable(Variable::new("v", int())),
        );
        let root = tree.add("Root", Declaration::new().with_child(node));
        let (definition, _) = cache(tree, root, &ProcessOptions::full_caching());
        let tree = definition.lock();
        let runtime = tree[node].runtime();
        assert_eq!(runtime.arguments[0].id, Some(LocalId(0)));
        assert_eq!(runtime.arguments[1].id, Some(LocalId(1)));
        assert_eq!(runtime.variables[0].id, Some(LocalId(2)));
        assert_eq!(runtime.variables[0].owner, Some(node));

        let implementation = tree[node].state().implementation_environment().unwrap();
        let env = tree.environments().get(implementation).unwrap();
        assert_eq!(env.parent(), tree.host_environment());
        assert_eq!(env.root_of(), Some(node));
        assert_eq!(env.declarations().len(), 2);
    }

    #[test]
    fn undeclaring_activities_share_the_enclosing_scope() {
        let mut tree = ActivityTree::new();
        let plain = tree.add("Plain", Declaration::new());
        let scoped = tree.add("Scoped", Declaration::new().with_variable(Variable::new("w", int())));
        let root = tree.add(
            "Root",
            Declaration::new()
                .with_variable(Variable::new("v", int()))
                .with_child(plain)
                .with_child(scoped),
        );
        let (definition, _) = cache(tree, root, &ProcessOptions::full_caching());
        let tree = definition.lock();

        let root_public = tree[root].state().public_environment().unwrap();
        assert_eq!(tree.environments().get(root_public).unwrap().parent(), tree.host_environment());
        assert_eq!(tree[plain].state().public_environment(), Some(root_public));

        let scoped_public = tree[scoped].state().public_environment().unwrap();
        assert_ne!(scoped_public, root_public);
        assert_eq!(tree.environments().get(scoped_public).unwrap().parent(), Some(root_public));
        let (found_in, location) = tree.environments().resolve(scoped_public, "v").unwrap();
        assert_eq!(found_in, root_public);
        assert_eq!(location.owner, Some(root));
    }

    #[test]
    fn shared_activity_is_declared_once_and_constrained_per_occurrence() {
        let declarations = Arc::new(AtomicUsize::new(0));
        let mut tree = ActivityTree::new();
        let shared = tree.add_with_behavior(
            "Shared",
            Declaration::new().with_constraint(Constraint::new("fails", always_fails)),
            Counting(Arc::clone(&declarations)),
        );
        let p1 = tree.add("P1", Declaration::new().with_child(shared));
        let p2 = tree.add("P2", Declaration::new().with_imported_child(shared));
        let root = tree.add("Root", Declaration::new().with_child(p1).with_child(p2));

        let (definition, errors) = cache(tree, root, &ProcessOptions::validation());
        assert_eq!(declarations.load(Ordering::SeqCst), 1);
        assert_eq!(errors.len(), 1, "{:#?}", errors);
        assert_eq!(errors[0].full_message(), "Root > P1 > Shared: Shared checked");
        assert_eq!(errors[0].source, Some(shared));
        drop(definition);
    }

    #[test]
    fn constraints_below_imported_ancestors_never_fire() {
        let mut tree = ActivityTree::new();
        let leaf = tree.add(
            "Leaf",
            Declaration::new().with_constraint(Constraint::new("fails", always_fails)),
        );
        let template = tree.add("Template", Declaration::new().with_child(leaf));
        let root = tree.add("Root", Declaration::new().with_imported_child(template));
        let (_, errors) = cache(tree, root, &ProcessOptions::validation());
        assert!(errors.is_empty(), "{:#?}", errors);
    }

    #[test]
    fn cached_root_is_skipped_without_work() {
        let declarations = Arc::new(AtomicUsize::new(0));
        let mut tree = ActivityTree::new();
        let leaf = tree.add_with_behavior("Leaf", Declaration::new(), Counting(Arc::clone(&declarations)));
        let root = tree.add("Root", Declaration::new().with_child(leaf));
        let (definition, _) = cache(tree, root, &ProcessOptions::full_caching());
        assert_eq!(declarations.load(Ordering::SeqCst), 1);

        let mut calls = 0;
        let mut callback = |_: &mut ActivityTree, _: ChildActivity, _: &ActivityCallStack| -> Result<()> {
            calls += 1;
            Ok(())
        };
        let errors =
            cache_root_metadata(&definition, None, &ProcessOptions::full_caching(), Some(&mut callback)).unwrap();
        assert!(errors.is_empty());
        assert_eq!(calls, 0);
        assert_eq!(declarations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn associated_root_cannot_be_recached() {
        let mut tree = ActivityTree::new();
        let root = tree.add("Root", Declaration::new());
        let definition = WorkflowDefinition::new(tree, root).unwrap();
        definition.mark_associated();
        let err = cache_root_metadata(&definition, None, &ProcessOptions::validation(), None).unwrap_err();
        assert_eq!(
            err,
            CacheError::RootAlreadyAssociatedWithInstance {
                display_name: "Root".into()
            }
        );
    }

    #[test]
    fn cancellation_aborts_the_walk() {
        let mut tree = ActivityTree::new();
        let root = tree.add("Root", Declaration::new());
        let definition = WorkflowDefinition::new(tree, root).unwrap();
        let signal = CancellationSignal::new();
        signal.cancel();
        let options = ProcessOptions::full_caching().with_cancellation(signal);
        let err = cache_root_metadata(&definition, None, &options, None).unwrap_err();
        assert_eq!(err, CacheError::Cancelled);
        assert!(!definition.is_runtime_ready());
    }

    #[test]
    fn cancellation_from_a_callback_stops_at_the_next_activity() {
        let mut tree = ActivityTree::new();
        let a = tree.add("A", Declaration::new());
        let b = tree.add("B", Declaration::new());
        let root = tree.add("Root", Declaration::new().with_child(a).with_child(b));
        let definition = WorkflowDefinition::new(tree, root).unwrap();
        let signal = CancellationSignal::new();
        let options = ProcessOptions::full_caching().with_cancellation(signal.clone());

        let mut calls = 0;
        let mut callback = |_: &mut ActivityTree, _: ChildActivity, _: &ActivityCallStack| -> Result<()> {
            calls += 1;
            signal.cancel();
            Ok(())
        };
        let err = cache_root_metadata(&definition, None, &options, Some(&mut callback)).unwrap_err();
        assert_eq!(err, CacheError::Cancelled);
        assert_eq!(calls, 1);
        assert!(!definition.is_runtime_ready());

        let tree = definition.lock();
        assert!(tree[root].state().is_declared());
        assert!(!tree[a].state().is_declared());
        assert!(!tree[b].state().is_declared());
    }

    #[test]
    fn deferring_root_pass_is_never_runtime_ready() {
        let mut tree = ActivityTree::new();
        let leaf = tree.add(
            "Leaf",
            Declaration::new().with_argument(RuntimeArgument::new("Text", int(), ArgumentDirection::In).required()),
        );
        let root = tree.add("Root", Declaration::new().with_child(leaf));
        let options = ProcessOptions {
            store_temp_violations: true,
            ..ProcessOptions::full_caching()
        };
        let (definition, errors) = cache(tree, root, &options);
        assert!(errors.is_empty(), "{:#?}", errors);
        assert!(!definition.is_runtime_ready());

        let tree = definition.lock();
        assert!(!tree.is_runtime_ready());
        assert_eq!(tree[leaf].state().deferred_errors().len(), 1);
    }

    #[test]
    fn new_pass_clears_readiness_of_the_previous_one() {
        let mut tree = ActivityTree::new();
        let leaf = tree.add("Leaf", Declaration::new());
        let root = tree.add("Root", Declaration::new().with_child(leaf));
        let (definition, errors) = cache(tree, root, &ProcessOptions::full_caching());
        assert!(errors.is_empty());
        assert!(definition.is_runtime_ready());

        definition.lock().set_definition(
            leaf,
            Declaration::new().with_argument(RuntimeArgument::new("Text", int(), ArgumentDirection::In).required()),
        );
        let errors = cache_root_metadata(&definition, None, &ProcessOptions::validation(), None).unwrap();
        assert_eq!(errors.len(), 1, "{:#?}", errors);
        assert!(!definition.is_runtime_ready());
        assert!(!definition.lock().is_runtime_ready());

        let mut calls = 0;
        let mut callback = |_: &mut ActivityTree, _: ChildActivity, _: &ActivityCallStack| -> Result<()> {
            calls += 1;
            Ok(())
        };
        let errors =
            cache_root_metadata(&definition, None, &ProcessOptions::full_caching(), Some(&mut callback)).unwrap();
        assert_eq!(calls, 2);
        assert_eq!(errors.len(), 1, "{:#?}", errors);
        assert!(!definition.is_runtime_ready());
    }

    #[test]
    fn partial_pass_after_a_ready_one_clears_readiness() {
        let mut tree = ActivityTree::new();
        let inner = tree.add("Inner", Declaration::new());
        let root = tree.add("Root", Declaration::new().with_implementation_child(inner));
        let (definition, _) = cache(tree, root, &ProcessOptions::full_caching());
        assert!(definition.is_runtime_ready());

        let partial = ProcessOptions {
            skip_private_children: true,
            ..ProcessOptions::full_caching()
        };
        cache_root_metadata(&definition, None, &partial, None).unwrap();
        assert!(!definition.is_runtime_ready());
        assert!(!definition.lock()[inner].state().is_declared());

        cache_root_metadata(&definition, None, &ProcessOptions::full_caching(), None).unwrap();
        assert!(definition.is_runtime_ready());
        assert!(definition.lock()[inner].state().is_declared());
    }

    #[test]
    fn invalid_references_are_reported_on_the_parent() {
        let mut tree = ActivityTree::new();
        let root = tree.add("Root", Declaration::new());
        let node = tree.add("Node", Declaration::new());
        tree.set_definition(node, Declaration::new().with_child(node).with_child(root));
        tree.set_definition(root, Declaration::new().with_child(node));

        let (definition, errors) = cache(tree, root, &ProcessOptions::full_caching());
        let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
        assert!(messages.contains(&"Activity 'Node' cannot reference itself."), "{:#?}", messages);
        assert!(
            messages.contains(&"The root activity 'Root' cannot be referenced by activity 'Node'."),
            "{:#?}",
            messages
        );
        assert!(!definition.is_runtime_ready());
    }

    #[test]
    fn cycles_are_reported_and_cut() {
        let mut tree = ActivityTree::new();
        let a = tree.add("A", Declaration::new());
        let b = tree.add("B", Declaration::new().with_child(a));
        tree.set_definition(a, Declaration::new().with_child(b));
        let root = tree.add("Root", Declaration::new().with_child(a));
        let (_, errors) = cache(tree, root, &ProcessOptions::full_caching());
        assert_eq!(errors.len(), 1, "{:#?}", errors);
        assert!(errors[0].message.contains("reachable from itself"));
        assert_eq!(errors[0].source, Some(a));
    }

    #[test]
    fn duplicate_variable_names_are_reported() {
        let mut tree = ActivityTree::new();
        let root = tree.add(
            "Root",
            Declaration::new()
                .with_variable(Variable::new("x", int()))
                .with_variable(Variable::new("x", int())),
        );
        let (_, errors) = cache(tree, root, &ProcessOptions::full_caching());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].full_message(), "a symbol named 'x' is already declared in this scope");
    }

    #[test]
    fn delegate_arguments_continue_the_handler_sequence() {
        let mut tree = ActivityTree::new();
        let handler = tree.add(
            "Handler",
            Declaration::new().with_argument(RuntimeArgument::new("own", int(), ArgumentDirection::In)),
        );
        let delegate = ActivityDelegate::new(Some(handler))
            .with_argument(DelegateArgument::new("item", int(), ArgumentDirection::In));
        let root = tree.add("Root", Declaration::new().with_delegate(delegate));
        let (definition, errors) = cache(tree, root, &ProcessOptions::full_caching());
        assert!(errors.is_empty(), "{:#?}", errors);

        let tree = definition.lock();
        let item = &tree[root].runtime().delegates[0].arguments[0];
        assert_eq!(item.owner, Some(handler));
        assert_eq!(item.id, Some(LocalId(1)));

        let public = tree[handler].state().public_environment().unwrap();
        let env = tree.environments().get(public).unwrap();
        assert_eq!(env.get("item").unwrap().kind, LocationKind::DelegateArgument);
        assert_eq!(env.parent(), tree[root].state().public_environment());
        assert_eq!(
            tree[handler].state().handler_of(),
            Some(DelegateRef {
                owner: root,
                collection: CollectionType::Public,
                index: 0
            })
        );
    }

    #[test]
    fn locations_are_numbered_across_every_collection() {
        let mut tree = ActivityTree::new();
        let handler = tree.add(
            "Handler",
            Declaration::new()
                .with_argument(RuntimeArgument::new("a", int(), ArgumentDirection::In))
                .with_variable(Variable::new("v", int()))
                .with_implementation_variable(Variable::new("iv", int())),
        );
        let delegate = ActivityDelegate::new(Some(handler))
            .with_argument(DelegateArgument::new("item", int(), ArgumentDirection::In));
        let root = tree.add("Root", Declaration::new().with_delegate(delegate));
        let (definition, errors) = cache(tree, root, &ProcessOptions::full_caching());
        assert!(errors.is_empty(), "{:#?}", errors);

        let tree = definition.lock();
        let runtime = tree[handler].runtime();
        assert_eq!(runtime.arguments[0].id, Some(LocalId(0)));
        assert_eq!(runtime.variables[0].id, Some(LocalId(1)));
        assert_eq!(runtime.implementation_variables[0].id, Some(LocalId(2)));
        assert_eq!(runtime.implementation_variables[0].owner, Some(handler));
        assert_eq!(tree[root].runtime().delegates[0].arguments[0].id, Some(LocalId(3)));

        let implementation = tree[handler].state().implementation_environment().unwrap();
        let env = tree.environments().get(implementation).unwrap();
        assert_eq!(env.get("a").unwrap().kind, LocationKind::Argument);
        assert_eq!(env.get("iv").unwrap().kind, LocationKind::Variable);
        assert_eq!(env.get("iv").unwrap().id, LocalId(2));
        assert!(env.get("v").is_none());

        let public = tree[handler].state().public_environment().unwrap();
        let env = tree.environments().get(public).unwrap();
        assert!(env.get("v").is_some());
        assert!(env.get("item").is_some());
        assert!(env.get("iv").is_none());
    }

    #[test]
    fn imported_delegate_handlers_are_declared_but_not_constrained() {
        let mut tree = ActivityTree::new();
        let leaf = tree.add(
            "Leaf",
            Declaration::new().with_constraint(Constraint::new("fails", always_fails)),
        );
        let handler = tree.add(
            "Template",
            Declaration::new()
                .with_child(leaf)
                .with_constraint(Constraint::new("fails", always_fails)),
        );
        let root = tree.add(
            "Root",
            Declaration::new().with_imported_delegate(ActivityDelegate::new(Some(handler))),
        );
        let (definition, errors) = cache(tree, root, &ProcessOptions::validation());
        assert!(errors.is_empty(), "{:#?}", errors);

        let tree = definition.lock();
        assert!(tree[handler].state().is_declared());
        assert!(tree[leaf].state().is_declared());
        assert_eq!(
            tree[handler].state().handler_of().map(|d| d.collection),
            Some(CollectionType::Imports)
        );
    }

    #[test]
    fn implementation_delegate_errors_name_the_owner() {
        let mut tree = ActivityTree::new();
        let handler = tree.add(
            "Handler",
            Declaration::new().with_argument(RuntimeArgument::new("Text", int(), ArgumentDirection::In).required()),
        );
        let root = tree.add(
            "Root",
            Declaration::new().with_implementation_delegate(ActivityDelegate::new(Some(handler))),
        );
        let (definition, errors) = cache(tree, root, &ProcessOptions::full_caching());
        assert_eq!(errors.len(), 1, "{:#?}", errors);
        assert_eq!(errors[0].source, Some(root));
        assert_eq!(
            errors[0].full_message(),
            "The private implementation of activity 'Root' has the following validation error: \
             Value for a required activity argument 'Text' was not supplied."
        );
        let tree = definition.lock();
        assert_eq!(qid(&tree, handler), "1.1");
    }

    #[test]
    fn private_implementation_errors_name_the_owner() {
        let mut tree = ActivityTree::new();
        let inner = tree.add(
            "Inner",
            Declaration::new().with_argument(RuntimeArgument::new("Text", int(), ArgumentDirection::In).required()),
        );
        let root = tree.add("Root", Declaration::new().with_implementation_child(inner));
        let (definition, errors) = cache(tree, root, &ProcessOptions::full_caching());
        assert_eq!(errors.len(), 1, "{:#?}", errors);
        assert_eq!(errors[0].source, Some(root));
        assert_eq!(
            errors[0].full_message(),
            "The private implementation of activity 'Root' has the following validation error: \
             Value for a required activity argument 'Text' was not supplied."
        );
        let tree = definition.lock();
        assert_eq!(qid(&tree, inner), "1.1");
    }

    #[test]
    fn skipping_private_children_leaves_them_undeclared() {
        let mut tree = ActivityTree::new();
        let inner = tree.add("Inner", Declaration::new());
        let root = tree.add("Root", Declaration::new().with_implementation_child(inner));
        let options = ProcessOptions {
            skip_private_children: true,
            ..ProcessOptions::full_caching()
        };
        let (definition, errors) = cache(tree, root, &options);
        assert!(errors.is_empty());
        assert!(!definition.is_runtime_ready());
        let tree = definition.lock();
        assert!(!tree[inner].state().is_declared());
        assert_eq!(tree[root].state().caching(), CachingState::Partial);
    }

    #[test]
    fn single_level_declares_only_the_root() {
        let mut tree = ActivityTree::new();
        let leaf = tree.add("Leaf", Declaration::new());
        let root = tree.add("Root", Declaration::new().with_child(leaf));
        let (definition, _) = cache(tree, root, &ProcessOptions::single_level_validation());
        let tree = definition.lock();
        assert!(tree[root].state().is_declared());
        assert!(!tree[leaf].state().is_declared());
        assert_eq!(tree[leaf].state().parent(), Some(root));
    }

    #[test]
    fn subtree_errors_are_deferred_until_the_walk_arrives() {
        let mut tree = ActivityTree::new();
        let leaf = tree.add(
            "Leaf",
            Declaration::new().with_argument(RuntimeArgument::new("Text", int(), ArgumentDirection::In).required()),
        );
        let parent = tree.add("Parent", Declaration::new().with_child(leaf));
        let root = tree.add("Root", Declaration::new().with_child(parent));
        let definition = WorkflowDefinition::new(tree, root).unwrap();

        let options = ProcessOptions::validation();
        let mut deferred_seen = 0;
        let mut callback = |tree: &mut ActivityTree, child: ChildActivity, chain: &ActivityCallStack| -> Result<()> {
            if child.activity == parent && !tree[leaf].state().is_declared() {
                let mut chain = chain.clone();
                chain.push(child);
                finish_caching_subtree(tree, ChildActivity::executable(leaf), &chain, &options, None)?;
                deferred_seen = tree[leaf].state().deferred_errors().len();
            }
            Ok(())
        };
        let errors = cache_root_metadata(&definition, None, &options, Some(&mut callback)).unwrap();
        assert_eq!(deferred_seen, 1);
        assert_eq!(errors.len(), 1, "{:#?}", errors);
        assert_eq!(errors[0].source, Some(leaf));
        assert_eq!(errors[0].prefix.as_deref(), Some("Root > Parent > Leaf: "));
        assert!(!definition.lock()[leaf].state().has_deferred_errors());
    }

    #[test]
    fn unrelated_subtree_root_is_rejected() {
        let mut tree = ActivityTree::new();
        let stray = tree.add("Stray", Declaration::new());
        let err = finish_caching_subtree(
            &mut tree,
            ChildActivity::executable(stray),
            &ActivityCallStack::new(),
            &ProcessOptions::validation(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CacheError::UninitializedActivity { activity, .. } if activity == stray));
    }

    #[test]
    fn find_argument_reads_the_id_space_owner() {
        let mut tree = ActivityTree::new();
        let inner = tree.add("Inner", Declaration::new());
        let root = tree.add(
            "Root",
            Declaration::new()
                .with_argument(RuntimeArgument::new("Text", ValueType::new("String"), ArgumentDirection::In))
                .with_implementation_child(inner),
        );
        let (definition, _) = cache(tree, root, &ProcessOptions::full_caching());
        let tree = definition.lock();
        let found = find_argument(&tree, "Text", inner).unwrap();
        assert_eq!(found.owner, Some(root));
        assert!(find_argument(&tree, "Missing", inner).is_none());
        assert!(find_argument(&tree, "Text", root).is_none());
    }
}
