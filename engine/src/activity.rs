// activity.rs — Activity definition graph and per-pass cache state
//
// An `ActivityTree` is an arena of activity definitions. Definitions refer
// to each other by `ActivityId`, so one activity may be listed by several
// parents and the graph is a DAG. Each activity carries its authored
// `Declaration`, a declaration hook (`ActivityBehavior`) that turns the
// authored form into the runtime declaration used by a cache pass, and the
// `CacheState` the walker fills in.
//
// Preconditions: ids handed to a tree must have been returned by that tree.
// Postconditions: `add` never reorders existing ids.
// Failure modes: none (construction only; walks report through `walker`).
// Side effects: none.

use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constraint::{Constraint, ConstraintExecutor, RuleConstraintExecutor};
use crate::diag::ValidationError;
use crate::environment::Environments;
use crate::id::{ActivityId, EnvironmentId, IdSpaceId, IdSpaces, LocalId, QualifiedId};
use crate::specialization::{self, ArgumentType};

// ── Value types ─────────────────────────────────────────────────────────────

/// Descriptor naming the type of value a location holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueType(Arc<str>);

impl ValueType {
    pub fn new(name: &str) -> Self {
        ValueType(Arc::from(name))
    }

    pub fn object() -> Self {
        Self::new("Object")
    }

    pub fn of<T: WorkflowValue>() -> Self {
        Self::new(T::TYPE_NAME)
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rust types usable as workflow values, with their descriptor names.
pub trait WorkflowValue {
    const TYPE_NAME: &'static str;
}

impl WorkflowValue for bool {
    const TYPE_NAME: &'static str = "Boolean";
}

impl WorkflowValue for i32 {
    const TYPE_NAME: &'static str = "Int32";
}

impl WorkflowValue for i64 {
    const TYPE_NAME: &'static str = "Int64";
}

impl WorkflowValue for f64 {
    const TYPE_NAME: &'static str = "Double";
}

impl WorkflowValue for String {
    const TYPE_NAME: &'static str = "String";
}

impl WorkflowValue for serde_json::Value {
    const TYPE_NAME: &'static str = "Object";
}

// ── Arguments ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentDirection {
    In,
    Out,
    InOut,
}

impl fmt::Display for ArgumentDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArgumentDirection::In => "In",
            ArgumentDirection::Out => "Out",
            ArgumentDirection::InOut => "InOut",
        };
        f.write_str(s)
    }
}

/// What a bound argument reads from or writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentBinding {
    /// Placeholder created for an unbound argument.
    Empty,
    /// An expression activity evaluated for the argument.
    Expression(ActivityId),
    /// The value of a named argument of the enclosing activity.
    ArgumentValue(String),
    /// The location of a named argument of the enclosing activity.
    ArgumentReference(String),
}

/// A specialized argument wrapper and its binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    argument_type: Arc<ArgumentType>,
    pub binding: ArgumentBinding,
}

impl Argument {
    pub(crate) fn from_type(argument_type: Arc<ArgumentType>, binding: ArgumentBinding) -> Self {
        Argument {
            argument_type,
            binding,
        }
    }

    pub fn argument_type(&self) -> &Arc<ArgumentType> {
        &self.argument_type
    }

    pub fn direction(&self) -> ArgumentDirection {
        self.argument_type.direction
    }

    pub fn type_name(&self) -> &str {
        &self.argument_type.type_name
    }

    pub fn is_empty(&self) -> bool {
        self.binding == ArgumentBinding::Empty
    }

    pub fn expression(&self) -> Option<ActivityId> {
        match self.binding {
            ArgumentBinding::Expression(id) => Some(id),
            _ => None,
        }
    }
}

/// An argument as declared on an activity for a cache pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeArgument {
    pub name: String,
    pub value_type: ValueType,
    pub direction: ArgumentDirection,
    pub is_required: bool,
    pub bound: Option<Argument>,
    pub owner: Option<ActivityId>,
    pub id: Option<LocalId>,
}

impl RuntimeArgument {
    pub fn new(name: impl Into<String>, value_type: ValueType, direction: ArgumentDirection) -> Self {
        RuntimeArgument {
            name: name.into(),
            value_type,
            direction,
            is_required: false,
            bound: None,
            owner: None,
            id: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn bound_to(mut self, argument: Argument) -> Self {
        self.bound = Some(argument);
        self
    }

    /// Bind to an expression activity.
    pub fn with_expression(self, expression: ActivityId) -> Self {
        let argument = Argument::from_type(
            specialization::argument_type(&self.value_type, self.direction),
            ArgumentBinding::Expression(expression),
        );
        self.bound_to(argument)
    }

    pub fn expression(&self) -> Option<ActivityId> {
        self.bound.as_ref().and_then(Argument::expression)
    }

    /// True when no binding or only an empty placeholder is present.
    pub fn is_unbound(&self) -> bool {
        self.bound.as_ref().map_or(true, Argument::is_empty)
    }
}

// ── Variables and delegates ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableModifiers {
    pub read_only: bool,
    pub mapped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value_type: ValueType,
    pub modifiers: VariableModifiers,
    pub default: Option<ActivityId>,
    pub owner: Option<ActivityId>,
    pub id: Option<LocalId>,
}

impl Variable {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Variable {
            name: name.into(),
            value_type,
            modifiers: VariableModifiers::default(),
            default: None,
            owner: None,
            id: None,
        }
    }

    pub fn with_modifiers(mut self, modifiers: VariableModifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_default(mut self, default: ActivityId) -> Self {
        self.default = Some(default);
        self
    }
}

/// Parameter a delegate passes to its handler. Owned by the handler once
/// the handler is declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateArgument {
    pub name: String,
    pub value_type: ValueType,
    pub direction: ArgumentDirection,
    pub owner: Option<ActivityId>,
    pub id: Option<LocalId>,
}

impl DelegateArgument {
    pub fn new(name: impl Into<String>, value_type: ValueType, direction: ArgumentDirection) -> Self {
        DelegateArgument {
            name: name.into(),
            value_type,
            direction,
            owner: None,
            id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityDelegate {
    pub handler: Option<ActivityId>,
    pub arguments: Vec<DelegateArgument>,
}

impl ActivityDelegate {
    pub fn new(handler: Option<ActivityId>) -> Self {
        ActivityDelegate {
            handler,
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, argument: DelegateArgument) -> Self {
        self.arguments.push(argument);
        self
    }
}

// ── Declarations ────────────────────────────────────────────────────────────

/// Which collection of its parent a reference was listed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionType {
    Public,
    Imports,
    Implementation,
}

/// Collections an activity declares.
#[derive(Debug, Clone, Default)]
pub struct Declaration {
    pub children: Vec<ActivityId>,
    pub imported_children: Vec<ActivityId>,
    pub implementation_children: Vec<ActivityId>,
    pub arguments: Vec<RuntimeArgument>,
    pub variables: Vec<Variable>,
    pub implementation_variables: Vec<Variable>,
    pub delegates: Vec<ActivityDelegate>,
    pub imported_delegates: Vec<ActivityDelegate>,
    pub implementation_delegates: Vec<ActivityDelegate>,
    pub constraints: Vec<Constraint>,
}

impl Declaration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_child(mut self, child: ActivityId) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_imported_child(mut self, child: ActivityId) -> Self {
        self.imported_children.push(child);
        self
    }

    pub fn with_implementation_child(mut self, child: ActivityId) -> Self {
        self.implementation_children.push(child);
        self
    }

    pub fn with_argument(mut self, argument: RuntimeArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn with_implementation_variable(mut self, variable: Variable) -> Self {
        self.implementation_variables.push(variable);
        self
    }

    pub fn with_delegate(mut self, delegate: ActivityDelegate) -> Self {
        self.delegates.push(delegate);
        self
    }

    pub fn with_imported_delegate(mut self, delegate: ActivityDelegate) -> Self {
        self.imported_delegates.push(delegate);
        self
    }

    pub fn with_implementation_delegate(mut self, delegate: ActivityDelegate) -> Self {
        self.implementation_delegates.push(delegate);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn delegates_in(&self, collection: CollectionType) -> &[ActivityDelegate] {
        match collection {
            CollectionType::Public => &self.delegates,
            CollectionType::Imports => &self.imported_delegates,
            CollectionType::Implementation => &self.implementation_delegates,
        }
    }

    pub(crate) fn delegates_in_mut(&mut self, collection: CollectionType) -> &mut Vec<ActivityDelegate> {
        match collection {
            CollectionType::Public => &mut self.delegates,
            CollectionType::Imports => &mut self.imported_delegates,
            CollectionType::Implementation => &mut self.implementation_delegates,
        }
    }
}

// ── Declaration hook ────────────────────────────────────────────────────────

/// Collects the runtime declaration of one activity during its first visit.
pub struct ActivityMetadata<'a> {
    activity: ActivityId,
    definition: &'a Declaration,
    declaration: Declaration,
    errors: &'a mut Vec<ValidationError>,
    create_empty_bindings: bool,
}

impl<'a> ActivityMetadata<'a> {
    pub(crate) fn new(
        activity: ActivityId,
        definition: &'a Declaration,
        errors: &'a mut Vec<ValidationError>,
        create_empty_bindings: bool,
    ) -> Self {
        ActivityMetadata {
            activity,
            definition,
            declaration: Declaration::default(),
            errors,
            create_empty_bindings,
        }
    }

    pub fn activity(&self) -> ActivityId {
        self.activity
    }

    /// The authored declaration of the activity.
    pub fn definition(&self) -> &'a Declaration {
        self.definition
    }

    pub fn create_empty_bindings(&self) -> bool {
        self.create_empty_bindings
    }

    /// Replace everything declared so far.
    pub fn set_declaration(&mut self, declaration: Declaration) {
        self.declaration = declaration;
    }

    pub fn add_child(&mut self, child: ActivityId) {
        self.declaration.children.push(child);
    }

    pub fn add_imported_child(&mut self, child: ActivityId) {
        self.declaration.imported_children.push(child);
    }

    pub fn add_implementation_child(&mut self, child: ActivityId) {
        self.declaration.implementation_children.push(child);
    }

    pub fn add_argument(&mut self, argument: RuntimeArgument) {
        self.declaration.arguments.push(argument);
    }

    pub fn add_variable(&mut self, variable: Variable) {
        self.declaration.variables.push(variable);
    }

    pub fn add_implementation_variable(&mut self, variable: Variable) {
        self.declaration.implementation_variables.push(variable);
    }

    pub fn add_delegate(&mut self, delegate: ActivityDelegate) {
        self.declaration.delegates.push(delegate);
    }

    pub fn add_imported_delegate(&mut self, delegate: ActivityDelegate) {
        self.declaration.imported_delegates.push(delegate);
    }

    pub fn add_implementation_delegate(&mut self, delegate: ActivityDelegate) {
        self.declaration.implementation_delegates.push(delegate);
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.declaration.constraints.push(constraint);
    }

    pub fn add_validation_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Close the declaration, giving unbound arguments an empty binding when
    /// requested.
    pub(crate) fn finish(self) -> Declaration {
        let mut declaration = self.declaration;
        if self.create_empty_bindings {
            for argument in declaration.arguments.iter_mut().filter(|a| a.bound.is_none()) {
                argument.bound = Some(specialization::create_argument(&argument.value_type, argument.direction));
            }
        }
        declaration
    }
}

/// Declaration hook of an activity kind.
pub trait ActivityBehavior: Send + Sync {
    fn cache_metadata(&self, metadata: &mut ActivityMetadata<'_>);
}

/// Declares exactly what was authored.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBehavior;

impl ActivityBehavior for DefaultBehavior {
    fn cache_metadata(&self, metadata: &mut ActivityMetadata<'_>) {
        let authored = metadata.definition().clone();
        metadata.set_declaration(authored);
    }
}

// ── Cache state ─────────────────────────────────────────────────────────────

/// How a parent refers to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipType {
    Child,
    ImportedChild,
    ImplementationChild,
    DelegateHandler,
    ArgumentExpression,
    VariableDefault,
    ImplementationVariableDefault,
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationshipType::Child => "child",
            RelationshipType::ImportedChild => "imported-child",
            RelationshipType::ImplementationChild => "implementation-child",
            RelationshipType::DelegateHandler => "delegate-handler",
            RelationshipType::ArgumentExpression => "argument-expression",
            RelationshipType::VariableDefault => "variable-default",
            RelationshipType::ImplementationVariableDefault => "implementation-variable-default",
        };
        f.write_str(s)
    }
}

/// Location of a delegate inside its owner's runtime declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelegateRef {
    pub owner: ActivityId,
    pub collection: CollectionType,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CachingState {
    #[default]
    Uncached,
    /// Cached while implementation collections were skipped.
    Partial,
    Full,
}

/// Per-pass bookkeeping for one activity. Reset when a root pass starts.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    pub(crate) declared: bool,
    pub(crate) caching: CachingState,
    pub(crate) active: bool,
    pub(crate) parent: Option<ActivityId>,
    pub(crate) relationship: Option<RelationshipType>,
    pub(crate) member_of: Option<IdSpaceId>,
    pub(crate) own_space: Option<IdSpaceId>,
    pub(crate) handler_of: Option<DelegateRef>,
    pub(crate) qualified_id: Option<QualifiedId>,
    pub(crate) public_env: Option<EnvironmentId>,
    pub(crate) implementation_env: Option<EnvironmentId>,
    pub(crate) enclosing_env: Option<EnvironmentId>,
    pub(crate) deferred_errors: Vec<ValidationError>,
}

impl CacheState {
    pub fn is_declared(&self) -> bool {
        self.declared
    }

    pub fn caching(&self) -> CachingState {
        self.caching
    }

    pub fn parent(&self) -> Option<ActivityId> {
        self.parent
    }

    pub fn relationship(&self) -> Option<RelationshipType> {
        self.relationship
    }

    pub fn member_of(&self) -> Option<IdSpaceId> {
        self.member_of
    }

    pub fn handler_of(&self) -> Option<DelegateRef> {
        self.handler_of
    }

    pub fn qualified_id(&self) -> Option<&QualifiedId> {
        self.qualified_id.as_ref()
    }

    pub fn public_environment(&self) -> Option<EnvironmentId> {
        self.public_env
    }

    pub fn implementation_environment(&self) -> Option<EnvironmentId> {
        self.implementation_env
    }

    pub fn has_deferred_errors(&self) -> bool {
        !self.deferred_errors.is_empty()
    }

    pub fn deferred_errors(&self) -> &[ValidationError] {
        &self.deferred_errors
    }

    /// True when this activity sits in its parent's implementation.
    pub fn is_private(&self) -> bool {
        match self.relationship {
            Some(RelationshipType::ImplementationChild)
            | Some(RelationshipType::ImplementationVariableDefault) => true,
            Some(RelationshipType::DelegateHandler) => {
                matches!(self.handler_of, Some(d) if d.collection == CollectionType::Implementation)
            }
            _ => false,
        }
    }
}

// ── Activity and tree ───────────────────────────────────────────────────────

pub struct Activity {
    pub(crate) name: String,
    pub(crate) definition: Declaration,
    pub(crate) behavior: Arc<dyn ActivityBehavior>,
    pub(crate) runtime: Declaration,
    pub(crate) state: CacheState,
}

impl Activity {
    pub fn display_name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &Declaration {
        &self.definition
    }

    /// Declaration produced by the hook during the latest pass.
    pub fn runtime(&self) -> &Declaration {
        &self.runtime
    }

    pub fn state(&self) -> &CacheState {
        &self.state
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Arena owning every activity of a workflow plus the scope and identity
/// structures of the latest cache pass.
pub struct ActivityTree {
    pub(crate) activities: Vec<Activity>,
    pub(crate) environments: Environments,
    pub(crate) id_spaces: IdSpaces,
    pub(crate) host_env: Option<EnvironmentId>,
    pub(crate) root: Option<ActivityId>,
    pub(crate) runtime_ready: bool,
    pub(crate) constraint_executor: Arc<dyn ConstraintExecutor>,
}

impl Default for ActivityTree {
    fn default() -> Self {
        ActivityTree {
            activities: Vec::new(),
            environments: Environments::new(),
            id_spaces: IdSpaces::new(),
            host_env: None,
            root: None,
            runtime_ready: false,
            constraint_executor: Arc::new(RuleConstraintExecutor),
        }
    }
}

impl ActivityTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, definition: Declaration) -> ActivityId {
        self.add_with_behavior(name, definition, DefaultBehavior)
    }

    pub fn add_with_behavior(
        &mut self,
        name: impl Into<String>,
        definition: Declaration,
        behavior: impl ActivityBehavior + 'static,
    ) -> ActivityId {
        let id = ActivityId(self.activities.len() as u32);
        self.activities.push(Activity {
            name: name.into(),
            definition,
            behavior: Arc::new(behavior),
            runtime: Declaration::default(),
            state: CacheState::default(),
        });
        id
    }

    /// Replace the authored declaration of an existing activity. Returns
    /// false when `id` is not in this tree.
    pub fn set_definition(&mut self, id: ActivityId, definition: Declaration) -> bool {
        match self.activities.get_mut(id.0 as usize) {
            Some(activity) => {
                activity.definition = definition;
                true
            }
            None => false,
        }
    }

    pub fn set_constraint_executor(&mut self, executor: impl ConstraintExecutor + 'static) {
        self.constraint_executor = Arc::new(executor);
    }

    pub fn get(&self, id: ActivityId) -> Option<&Activity> {
        self.activities.get(id.0 as usize)
    }

    pub(crate) fn get_mut(&mut self, id: ActivityId) -> Option<&mut Activity> {
        self.activities.get_mut(id.0 as usize)
    }

    pub fn contains(&self, id: ActivityId) -> bool {
        (id.0 as usize) < self.activities.len()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ActivityId> {
        (0..self.activities.len() as u32).map(ActivityId)
    }

    /// Display name, or the empty string for an unknown id.
    pub fn display_name(&self, id: ActivityId) -> &str {
        self.get(id).map_or("", Activity::display_name)
    }

    pub fn qualified_id(&self, id: ActivityId) -> Option<&QualifiedId> {
        self.get(id).and_then(|a| a.state.qualified_id.as_ref())
    }

    /// Root of the latest cache pass.
    pub fn root(&self) -> Option<ActivityId> {
        self.root
    }

    pub fn host_environment(&self) -> Option<EnvironmentId> {
        self.host_env
    }

    pub fn environments(&self) -> &Environments {
        &self.environments
    }

    pub fn id_spaces(&self) -> &IdSpaces {
        &self.id_spaces
    }

    pub fn is_runtime_ready(&self) -> bool {
        self.runtime_ready
    }

    /// Activity whose arguments `consumer` reads through argument
    /// references: the owner of the id-space it belongs to.
    pub fn id_space_owner(&self, consumer: ActivityId) -> Option<ActivityId> {
        let space = self.get(consumer)?.state.member_of?;
        self.id_spaces.get(space)?.owner()
    }
}

impl Index<ActivityId> for ActivityTree {
    type Output = Activity;

    fn index(&self, id: ActivityId) -> &Activity {
        &self.activities[id.0 as usize]
    }
}

impl fmt::Debug for ActivityTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityTree")
            .field("activities", &self.activities)
            .field("root", &self.root)
            .field("runtime_ready", &self.runtime_ready)
            .finish_non_exhaustive()
    }
}
