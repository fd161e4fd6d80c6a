// environment.rs — Lexical scope chain for cached activity trees
//
// Environments are scope layers mapping declared names to locations. Each
// layer refers to its enclosing layer by `EnvironmentId`; layers never own
// their parents, so one enclosing layer can be shared by any number of
// nested scopes. A layer is mutated only by the walk that creates it.
//
// Preconditions: parent ids passed to `create` must come from the same arena.
// Postconditions: `resolve` finds the innermost declaration of a name.
// Failure modes: duplicate names in one layer, or an unknown layer id, yield
//   a soft `ValidationError`.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use crate::activity::ValueType;
use crate::diag::ValidationError;
use crate::id::{ActivityId, EnvironmentId, LocalId};

// ── Locations ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationKind {
    Argument,
    Variable,
    DelegateArgument,
    /// Supplied by the host before any activity is declared.
    Host,
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LocationKind::Argument => "argument",
            LocationKind::Variable => "variable",
            LocationKind::DelegateArgument => "delegate argument",
            LocationKind::Host => "host",
        };
        f.write_str(s)
    }
}

/// A declared, addressable storage slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationReference {
    pub name: String,
    pub value_type: ValueType,
    pub kind: LocationKind,
    /// Declaring activity; `None` for host locations.
    pub owner: Option<ActivityId>,
    pub id: LocalId,
}

// ── Environment ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Environment {
    declarations: Vec<LocationReference>,
    by_name: HashMap<String, usize>,
    parent: Option<EnvironmentId>,
    root_of: Option<ActivityId>,
    is_scope_root: bool,
}

impl Environment {
    pub fn parent(&self) -> Option<EnvironmentId> {
        self.parent
    }

    /// Activity whose implementation this layer roots, if any.
    pub fn root_of(&self) -> Option<ActivityId> {
        self.root_of
    }

    pub fn is_scope_root(&self) -> bool {
        self.is_scope_root
    }

    /// Declarations in declaration order.
    pub fn declarations(&self) -> &[LocationReference] {
        &self.declarations
    }

    pub fn get(&self, name: &str) -> Option<&LocationReference> {
        self.by_name.get(name).map(|&i| &self.declarations[i])
    }
}

/// Arena of scope layers for one cache pass.
#[derive(Debug, Default)]
pub struct Environments {
    layers: Vec<Environment>,
}

impl Environments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, parent: Option<EnvironmentId>, root_of: Option<ActivityId>) -> EnvironmentId {
        let id = EnvironmentId(self.layers.len() as u32);
        self.layers.push(Environment {
            parent,
            root_of,
            ..Environment::default()
        });
        id
    }

    /// Create a parentless layer marked as the root of the scope chain.
    pub fn create_scope_root(&mut self) -> EnvironmentId {
        let id = self.create(None, None);
        self.layers[id.0 as usize].is_scope_root = true;
        id
    }

    pub fn get(&self, id: EnvironmentId) -> Option<&Environment> {
        self.layers.get(id.0 as usize)
    }

    /// Declare `location` in `env`. Unnamed locations never collide.
    pub fn declare(&mut self, env: EnvironmentId, location: LocationReference) -> Result<(), ValidationError> {
        let Some(layer) = self.layers.get_mut(env.0 as usize) else {
            return Err(ValidationError::new(format!(
                "cannot declare '{}': environment {} does not exist",
                location.name, env.0
            )));
        };
        if !location.name.is_empty() {
            if layer.by_name.contains_key(&location.name) {
                return Err(ValidationError::new(format!(
                    "a symbol named '{}' is already declared in this scope",
                    location.name
                )));
            }
            layer.by_name.insert(location.name.clone(), layer.declarations.len());
        }
        layer.declarations.push(location);
        Ok(())
    }

    /// Find `name` in `env` or the nearest enclosing layer declaring it.
    pub fn resolve(&self, env: EnvironmentId, name: &str) -> Option<(EnvironmentId, &LocationReference)> {
        let mut cursor = Some(env);
        while let Some(id) = cursor {
            let layer = self.get(id)?;
            if let Some(location) = layer.get(name) {
                return Some((id, location));
            }
            cursor = layer.parent;
        }
        None
    }

    /// Number of layers between `env` and the scope root, inclusive.
    pub fn depth(&self, env: EnvironmentId) -> usize {
        let mut depth = 0;
        let mut cursor = Some(env);
        while let Some(id) = cursor {
            depth += 1;
            cursor = self.get(id).and_then(Environment::parent);
        }
        depth
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn clear(&mut self) {
        self.layers.clear();
    }
}

// ── Host environment ────────────────────────────────────────────────────────

/// Locations the host makes visible to every activity of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnvironment {
    locations: Vec<(String, ValueType)>,
}

impl HostEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_location(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.locations.push((name.into(), value_type));
        self
    }

    pub fn locations(&self) -> &[(String, ValueType)] {
        &self.locations
    }

    /// Build the scope-chain root for a cache pass. Duplicate host names keep
    /// the first declaration.
    pub(crate) fn materialize(&self, environments: &mut Environments) -> EnvironmentId {
        let env = environments.create_scope_root();
        for (i, (name, value_type)) in self.locations.iter().enumerate() {
            let location = LocationReference {
                name: name.clone(),
                value_type: value_type.clone(),
                kind: LocationKind::Host,
                owner: None,
                id: LocalId(i as u32),
            };
            if environments.declare(env, location).is_err() {
                tracing::debug!(name = %name, "duplicate host location ignored");
            }
        }
        env
    }
}
