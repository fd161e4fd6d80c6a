// specialization.rs — Memoized per-type wrapper factories
//
// Argument wrappers and location-access templates are specialized per value
// type and memoized for the lifetime of the process. Each role (argument
// direction, location-access kind) has its own table and its own lock; a
// miss builds the specialization under that table's write lock with a
// double-checked insert, a hit only takes the shared read lock.
//
// Preconditions: none.
// Postconditions: equal (role, value type) requests return the same `Arc`.
// Failure modes: none.
// Side effects: grows process-wide tables; entries are never evicted.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::trace;

use crate::activity::{
    Argument, ArgumentBinding, ArgumentDirection, ValueType, Variable, VariableModifiers,
};
use crate::environment::LocationReference;

// ── Specialized descriptors ─────────────────────────────────────────────────

/// Specialized argument wrapper, e.g. `InArgument<Int32>`.
#[derive(Debug, PartialEq, Eq)]
pub struct ArgumentType {
    pub direction: ArgumentDirection,
    pub value_type: ValueType,
    pub type_name: String,
}

impl ArgumentType {
    fn new(value_type: &ValueType, direction: ArgumentDirection) -> Self {
        let open = match direction {
            ArgumentDirection::In => "InArgument",
            ArgumentDirection::Out => "OutArgument",
            ArgumentDirection::InOut => "InOutArgument",
        };
        ArgumentType {
            direction,
            value_type: value_type.clone(),
            type_name: format!("{}<{}>", open, value_type),
        }
    }
}

/// How a location is read from an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationAccessKind {
    LocationReferenceValue,
    EnvironmentLocationReference,
    EnvironmentLocationValue,
}

impl LocationAccessKind {
    fn open_name(self) -> &'static str {
        match self {
            LocationAccessKind::LocationReferenceValue => "LocationReferenceValue",
            LocationAccessKind::EnvironmentLocationReference => "EnvironmentLocationReference",
            LocationAccessKind::EnvironmentLocationValue => "EnvironmentLocationValue",
        }
    }
}

/// An unbound location-access template. The cached instance never refers to
/// a location so it cannot pin any tree.
#[derive(Debug, PartialEq, Eq)]
pub struct LocationAccessTemplate {
    pub kind: LocationAccessKind,
    pub value_type: ValueType,
    pub type_name: String,
}

impl LocationAccessTemplate {
    /// Produce an expression reading `location` through this template.
    pub fn create_new_instance(self: &Arc<Self>, location: LocationReference) -> LocationAccessExpression {
        LocationAccessExpression {
            template: Arc::clone(self),
            location,
        }
    }
}

/// An expression bound to one location.
#[derive(Debug, Clone)]
pub struct LocationAccessExpression {
    template: Arc<LocationAccessTemplate>,
    location: LocationReference,
}

impl LocationAccessExpression {
    pub fn template(&self) -> &Arc<LocationAccessTemplate> {
        &self.template
    }

    pub fn location(&self) -> &LocationReference {
        &self.location
    }

    pub fn type_name(&self) -> &str {
        &self.template.type_name
    }

    pub fn is_reference(&self) -> bool {
        self.template.kind == LocationAccessKind::EnvironmentLocationReference
    }
}

// ── Tables ──────────────────────────────────────────────────────────────────

struct SpecializationTable<V> {
    name: &'static str,
    entries: RwLock<HashMap<ValueType, Arc<V>>>,
}

impl<V> SpecializationTable<V> {
    fn new(name: &'static str) -> Self {
        SpecializationTable {
            name,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_create(&self, key: &ValueType, create: impl FnOnce() -> V) -> Arc<V> {
        if let Some(hit) = self.entries.read().get(key) {
            return Arc::clone(hit);
        }
        let mut entries = self.entries.write();
        if let Some(hit) = entries.get(key) {
            return Arc::clone(hit);
        }
        trace!(table = self.name, value_type = %key, "specialization miss");
        let created = Arc::new(create());
        entries.insert(key.clone(), Arc::clone(&created));
        created
    }

    fn contains(&self, key: &ValueType) -> bool {
        self.entries.read().contains_key(key)
    }
}

static IN_ARGUMENTS: Lazy<SpecializationTable<ArgumentType>> =
    Lazy::new(|| SpecializationTable::new("in_argument"));
static OUT_ARGUMENTS: Lazy<SpecializationTable<ArgumentType>> =
    Lazy::new(|| SpecializationTable::new("out_argument"));
static IN_OUT_ARGUMENTS: Lazy<SpecializationTable<ArgumentType>> =
    Lazy::new(|| SpecializationTable::new("in_out_argument"));

static LOCATION_REFERENCE_VALUES: Lazy<SpecializationTable<LocationAccessTemplate>> =
    Lazy::new(|| SpecializationTable::new("location_reference_value"));
static ENVIRONMENT_LOCATION_REFERENCES: Lazy<SpecializationTable<LocationAccessTemplate>> =
    Lazy::new(|| SpecializationTable::new("environment_location_reference"));
static ENVIRONMENT_LOCATION_VALUES: Lazy<SpecializationTable<LocationAccessTemplate>> =
    Lazy::new(|| SpecializationTable::new("environment_location_value"));

fn argument_table(direction: ArgumentDirection) -> &'static SpecializationTable<ArgumentType> {
    match direction {
        ArgumentDirection::In => &IN_ARGUMENTS,
        ArgumentDirection::Out => &OUT_ARGUMENTS,
        ArgumentDirection::InOut => &IN_OUT_ARGUMENTS,
    }
}

fn location_table(kind: LocationAccessKind) -> &'static SpecializationTable<LocationAccessTemplate> {
    match kind {
        LocationAccessKind::LocationReferenceValue => &LOCATION_REFERENCE_VALUES,
        LocationAccessKind::EnvironmentLocationReference => &ENVIRONMENT_LOCATION_REFERENCES,
        LocationAccessKind::EnvironmentLocationValue => &ENVIRONMENT_LOCATION_VALUES,
    }
}

// ── Public factories ────────────────────────────────────────────────────────

/// Memoized argument specialization for `(value_type, direction)`.
pub fn argument_type(value_type: &ValueType, direction: ArgumentDirection) -> Arc<ArgumentType> {
    argument_table(direction).get_or_create(value_type, || ArgumentType::new(value_type, direction))
}

/// True once `(value_type, direction)` has been specialized.
pub fn is_argument_type_cached(value_type: &ValueType, direction: ArgumentDirection) -> bool {
    argument_table(direction).contains(value_type)
}

/// A fresh argument with an empty binding.
pub fn create_argument(value_type: &ValueType, direction: ArgumentDirection) -> Argument {
    Argument::from_type(argument_type(value_type, direction), ArgumentBinding::Empty)
}

pub fn create_argument_of_object(direction: ArgumentDirection) -> Argument {
    create_argument(&ValueType::object(), direction)
}

/// An argument forwarding to an argument of the enclosing activity.
/// `In` arguments read the referenced value; `Out`/`InOut` bind its location.
pub fn create_reference_argument(
    value_type: &ValueType,
    direction: ArgumentDirection,
    referenced_argument_name: impl Into<String>,
) -> Argument {
    let name = referenced_argument_name.into();
    let binding = match direction {
        ArgumentDirection::In => ArgumentBinding::ArgumentValue(name),
        ArgumentDirection::Out | ArgumentDirection::InOut => ArgumentBinding::ArgumentReference(name),
    };
    Argument::from_type(argument_type(value_type, direction), binding)
}

pub fn create_variable(
    name: impl Into<String>,
    value_type: ValueType,
    modifiers: VariableModifiers,
) -> Variable {
    Variable::new(name, value_type).with_modifiers(modifiers)
}

/// Memoized location-access template for `(value_type, kind)`.
pub fn location_access_template(value_type: &ValueType, kind: LocationAccessKind) -> Arc<LocationAccessTemplate> {
    location_table(kind).get_or_create(value_type, || LocationAccessTemplate {
        kind,
        value_type: value_type.clone(),
        type_name: format!("{}<{}>", kind.open_name(), value_type),
    })
}

/// Build an expression accessing `location`.
pub fn create_location_access_expression(
    location: &LocationReference,
    is_reference: bool,
    use_location_reference_value: bool,
) -> LocationAccessExpression {
    let kind = if use_location_reference_value {
        LocationAccessKind::LocationReferenceValue
    } else if is_reference {
        LocationAccessKind::EnvironmentLocationReference
    } else {
        LocationAccessKind::EnvironmentLocationValue
    };
    location_access_template(&location.value_type, kind).create_new_instance(location.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::LocationKind;
    use crate::id::LocalId;
    use std::thread;

    #[test]
    fn argument_types_are_memoized_per_direction() {
        let ty = ValueType::new("SpecTestInt");
        let a = argument_type(&ty, ArgumentDirection::In);
        let b = argument_type(&ty, ArgumentDirection::In);
        let c = argument_type(&ty, ArgumentDirection::Out);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.type_name, "InArgument<SpecTestInt>");
        assert_eq!(c.type_name, "OutArgument<SpecTestInt>");
        assert!(is_argument_type_cached(&ty, ArgumentDirection::In));
        assert!(!is_argument_type_cached(&ty, ArgumentDirection::InOut));
    }

    #[test]
    fn concurrent_misses_converge_on_one_entry() {
        let ty = ValueType::new("SpecTestConcurrent");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ty = ty.clone();
                thread::spawn(move || argument_type(&ty, ArgumentDirection::InOut))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], r));
        }
    }

    #[test]
    fn reference_argument_form_follows_direction() {
        let ty = ValueType::new("String");
        let value = create_reference_argument(&ty, ArgumentDirection::In, "text");
        assert_eq!(value.binding, ArgumentBinding::ArgumentValue("text".into()));
        let reference = create_reference_argument(&ty, ArgumentDirection::Out, "text");
        assert_eq!(reference.binding, ArgumentBinding::ArgumentReference("text".into()));
        assert!(create_argument_of_object(ArgumentDirection::In).is_empty());
    }

    #[test]
    fn location_access_kind_selection() {
        let location = LocationReference {
            name: "count".into(),
            value_type: ValueType::new("SpecTestLoc"),
            kind: LocationKind::Variable,
            owner: None,
            id: LocalId(0),
        };
        let by_value = create_location_access_expression(&location, false, false);
        let by_ref = create_location_access_expression(&location, true, false);
        let lrv = create_location_access_expression(&location, true, true);
        assert_eq!(by_value.type_name(), "EnvironmentLocationValue<SpecTestLoc>");
        assert!(by_ref.is_reference());
        assert_eq!(lrv.type_name(), "LocationReferenceValue<SpecTestLoc>");

        let again = create_location_access_expression(&location, false, false);
        assert!(Arc::ptr_eq(by_value.template(), again.template()));
        assert_eq!(again.location().name, "count");
    }
}
