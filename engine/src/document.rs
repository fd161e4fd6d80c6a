// document.rs — JSON workflow definition documents
//
// Loads an activity tree from a serde_json document. Activities refer to
// each other by display name; names are resolved in a second pass so
// references may point forward, and an activity may be referenced from
// several places to share it.
//
// Preconditions: none.
// Postconditions: on success every named reference resolved to an arena id,
//   and arena ids follow document order.
// Failure modes: malformed JSON, duplicate names, unknown references or an
//   unknown root yield `DocumentError`.
// Side effects: none.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::activity::{
    ActivityDelegate, ActivityTree, ArgumentDirection, Declaration, DelegateArgument, RuntimeArgument, ValueType,
    Variable, VariableModifiers,
};
use crate::constraint::{Constraint, ForbidsAncestor, RequiresAncestor};
use crate::environment::HostEnvironment;
use crate::error::DocumentError;
use crate::id::ActivityId;
use crate::specialization;

// ── Document schema ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionDocument {
    pub root: String,
    #[serde(default)]
    pub host: Vec<HostLocationDoc>,
    pub activities: Vec<ActivityDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostLocationDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityDoc {
    pub name: String,
    pub children: Vec<String>,
    pub imported_children: Vec<String>,
    pub implementation_children: Vec<String>,
    pub arguments: Vec<ArgumentDoc>,
    pub variables: Vec<VariableDoc>,
    pub implementation_variables: Vec<VariableDoc>,
    pub delegates: Vec<DelegateDoc>,
    pub imported_delegates: Vec<DelegateDoc>,
    pub implementation_delegates: Vec<DelegateDoc>,
    pub constraints: Vec<ConstraintDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default = "default_direction")]
    pub direction: ArgumentDirection,
    #[serde(default)]
    pub required: bool,
    /// Name of the expression activity computing the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Name of an argument of the enclosing activity to forward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

fn default_direction() -> ArgumentDirection {
    ArgumentDirection::In
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub modifiers: VariableModifiers,
    /// Name of the expression activity computing the initial value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegateDoc {
    pub handler: Option<String>,
    pub arguments: Vec<DelegateArgumentDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateArgumentDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default = "default_direction")]
    pub direction: ArgumentDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ConstraintDoc {
    RequiresAncestor { name: String },
    ForbidsAncestor { name: String },
}

// ── Loading ─────────────────────────────────────────────────────────────────

/// A tree built from a document, ready to be wrapped in a
/// `WorkflowDefinition`.
#[derive(Debug)]
pub struct LoadedDefinition {
    pub tree: ActivityTree,
    pub root: ActivityId,
    pub host: HostEnvironment,
}

pub fn from_json(source: &str) -> Result<LoadedDefinition, DocumentError> {
    let document: DefinitionDocument = serde_json::from_str(source)?;
    build(&document)
}

/// Build the arena: one pass to allocate ids by name, one to resolve
/// references into declarations.
pub fn build(document: &DefinitionDocument) -> Result<LoadedDefinition, DocumentError> {
    let mut tree = ActivityTree::new();
    let mut ids: HashMap<&str, ActivityId> = HashMap::with_capacity(document.activities.len());
    for activity in &document.activities {
        if ids.contains_key(activity.name.as_str()) {
            return Err(DocumentError::DuplicateActivity(activity.name.clone()));
        }
        let id = tree.add(activity.name.clone(), Declaration::new());
        ids.insert(activity.name.as_str(), id);
    }

    for activity in &document.activities {
        let resolver = Resolver {
            ids: &ids,
            referrer: &activity.name,
        };
        let declaration = resolver.declaration(activity)?;
        tree.set_definition(ids[activity.name.as_str()], declaration);
    }

    let root = *ids
        .get(document.root.as_str())
        .ok_or_else(|| DocumentError::UnknownRoot(document.root.clone()))?;
    let host = document
        .host
        .iter()
        .fold(HostEnvironment::new(), |host, loc| host.with_location(loc.name.clone(), loc.value_type.clone()));

    Ok(LoadedDefinition { tree, root, host })
}

struct Resolver<'a> {
    ids: &'a HashMap<&'a str, ActivityId>,
    referrer: &'a str,
}

impl Resolver<'_> {
    fn lookup(&self, name: &str) -> Result<ActivityId, DocumentError> {
        self.ids.get(name).copied().ok_or_else(|| DocumentError::UnknownReference {
            referrer: self.referrer.to_string(),
            name: name.to_string(),
        })
    }

    fn lookup_all(&self, names: &[String]) -> Result<Vec<ActivityId>, DocumentError> {
        names.iter().map(|name| self.lookup(name)).collect()
    }

    fn declaration(&self, doc: &ActivityDoc) -> Result<Declaration, DocumentError> {
        let mut declaration = Declaration::new();
        declaration.children = self.lookup_all(&doc.children)?;
        declaration.imported_children = self.lookup_all(&doc.imported_children)?;
        declaration.implementation_children = self.lookup_all(&doc.implementation_children)?;
        declaration.arguments = doc
            .arguments
            .iter()
            .map(|a| self.argument(a))
            .collect::<Result<_, _>>()?;
        declaration.variables = doc
            .variables
            .iter()
            .map(|v| self.variable(v))
            .collect::<Result<_, _>>()?;
        declaration.implementation_variables = doc
            .implementation_variables
            .iter()
            .map(|v| self.variable(v))
            .collect::<Result<_, _>>()?;
        declaration.delegates = self.delegates(&doc.delegates)?;
        declaration.imported_delegates = self.delegates(&doc.imported_delegates)?;
        declaration.implementation_delegates = self.delegates(&doc.implementation_delegates)?;
        declaration.constraints = doc.constraints.iter().map(constraint).collect();
        Ok(declaration)
    }

    fn argument(&self, doc: &ArgumentDoc) -> Result<RuntimeArgument, DocumentError> {
        let mut argument = RuntimeArgument::new(doc.name.clone(), doc.value_type.clone(), doc.direction);
        if doc.required {
            argument = argument.required();
        }
        if let Some(expression) = &doc.expression {
            argument = argument.with_expression(self.lookup(expression)?);
        } else if let Some(reference) = &doc.reference {
            let bound = specialization::create_reference_argument(&doc.value_type, doc.direction, reference.clone());
            argument = argument.bound_to(bound);
        }
        Ok(argument)
    }

    fn variable(&self, doc: &VariableDoc) -> Result<Variable, DocumentError> {
        let mut variable = specialization::create_variable(doc.name.clone(), doc.value_type.clone(), doc.modifiers);
        if let Some(default) = &doc.default {
            variable = variable.with_default(self.lookup(default)?);
        }
        Ok(variable)
    }

    fn delegates(&self, docs: &[DelegateDoc]) -> Result<Vec<ActivityDelegate>, DocumentError> {
        docs.iter()
            .map(|doc| {
                let handler = doc.handler.as_deref().map(|h| self.lookup(h)).transpose()?;
                Ok(doc.arguments.iter().fold(ActivityDelegate::new(handler), |delegate, a| {
                    delegate.with_argument(DelegateArgument::new(a.name.clone(), a.value_type.clone(), a.direction))
                }))
            })
            .collect()
    }
}

fn constraint(doc: &ConstraintDoc) -> Constraint {
    match doc {
        ConstraintDoc::RequiresAncestor { name } => Constraint::new(
            format!("requires_ancestor({})", name),
            RequiresAncestor { ancestor: name.clone() },
        ),
        ConstraintDoc::ForbidsAncestor { name } => Constraint::new(
            format!("forbids_ancestor({})", name),
            ForbidsAncestor { ancestor: name.clone() },
        ),
    }
}
