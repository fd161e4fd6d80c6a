// id.rs — Stable identifiers and id-spaces for cached activity trees
//
// Arena handles (`ActivityId`, `EnvironmentId`, `IdSpaceId`, `InstanceId`)
// address nodes inside their owning arenas. `QualifiedId` is the identity an
// activity receives when it is registered in an id-space during a cache pass;
// `LocalId` is the slot a declared argument or variable occupies inside its
// environment. Ids are allocated in registration order, so two passes over an
// unmodified tree assign identical ids.

use std::fmt;

/// Handle of an activity definition node inside an `ActivityTree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivityId(pub u32);

/// Handle of a scope layer inside `Environments`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvironmentId(pub u32);

/// Handle of an id-space inside `IdSpaces`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdSpaceId(pub u32);

/// Handle of a live execution instance inside an `InstanceArena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u32);

/// Slot of a declared location within one environment's id sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dotted identity of a registered activity (`1`, `2`, `1.1`, ...).
///
/// The last component is the member number inside the activity's id-space;
/// the preceding components are the qualified id of the id-space owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedId(Vec<u32>);

impl QualifiedId {
    pub fn new(parts: Vec<u32>) -> Self {
        QualifiedId(parts)
    }

    pub fn parts(&self) -> &[u32] {
        &self.0
    }

    fn child(&self, member: u32) -> Self {
        let mut parts = Vec::with_capacity(self.0.len() + 1);
        parts.extend_from_slice(&self.0);
        parts.push(member);
        QualifiedId(parts)
    }
}

impl fmt::Display for QualifiedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

// ── Id-spaces ───────────────────────────────────────────────────────────────

/// A registry numbering the activities that belong to one scope of identity.
///
/// The root id-space has no owner. Every activity that declares
/// implementation children owns an id-space of its own, created on demand.
#[derive(Debug, Clone)]
pub struct IdSpace {
    owner: Option<ActivityId>,
    owner_id: Option<QualifiedId>,
    members: Vec<ActivityId>,
}

impl IdSpace {
    pub fn owner(&self) -> Option<ActivityId> {
        self.owner
    }

    pub fn members(&self) -> &[ActivityId] {
        &self.members
    }
}

/// Arena of id-spaces for one cache pass.
#[derive(Debug, Default)]
pub struct IdSpaces {
    spaces: Vec<IdSpace>,
}

impl IdSpaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an id-space. `owner_id` must be the owner's qualified id when
    /// `owner` is set.
    pub fn create(&mut self, owner: Option<ActivityId>, owner_id: Option<QualifiedId>) -> IdSpaceId {
        let id = IdSpaceId(self.spaces.len() as u32);
        self.spaces.push(IdSpace {
            owner,
            owner_id,
            members: Vec::new(),
        });
        id
    }

    /// Register `activity` and return its qualified id. Member numbers start
    /// at 1 and are never reused within a pass.
    pub fn add_member(&mut self, space: IdSpaceId, activity: ActivityId) -> QualifiedId {
        let entry = &mut self.spaces[space.0 as usize];
        entry.members.push(activity);
        let member = entry.members.len() as u32;
        match &entry.owner_id {
            Some(owner_id) => owner_id.child(member),
            None => QualifiedId(vec![member]),
        }
    }

    pub fn get(&self, space: IdSpaceId) -> Option<&IdSpace> {
        self.spaces.get(space.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    pub fn clear(&mut self) {
        self.spaces.clear();
    }
}
