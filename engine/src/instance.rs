// instance.rs — Level-order traversal of live activity instance trees
//
// Instances mirror declared activities while a workflow runs. The runtime
// applies tree-wide operations (fault or cancel propagation) level by level:
// every instance at depth d is handed to the callback before any instance
// at depth d + 1. Pending siblings are held in a `TreeProcessingList`, which
// borrows a parent's child slice instead of copying it and only allocates
// once a level has to merge items from several parents.
//
// Preconditions: the instance tree is not mutated during a traversal.
// Postconditions: children of an instance whose callback returned false are
//   never visited.
// Failure modes: none.
// Side effects: none beyond the callback's.

use std::collections::VecDeque;
use std::fmt;

use crate::id::{ActivityId, InstanceId};
use crate::walker::WorkflowDefinition;

// ── Instances ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityInstanceState {
    Executing,
    Closed,
    Canceled,
    Faulted,
}

impl fmt::Display for ActivityInstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityInstanceState::Executing => "Executing",
            ActivityInstanceState::Closed => "Closed",
            ActivityInstanceState::Canceled => "Canceled",
            ActivityInstanceState::Faulted => "Faulted",
        };
        f.write_str(s)
    }
}

/// True for every state an instance can end in.
pub fn is_completed_state(state: ActivityInstanceState) -> bool {
    state != ActivityInstanceState::Executing
}

#[derive(Debug, Clone)]
pub struct ActivityInstance {
    pub id: InstanceId,
    pub activity: ActivityId,
    pub state: ActivityInstanceState,
    pub parent: Option<InstanceId>,
    children: Vec<InstanceId>,
}

impl ActivityInstance {
    pub fn children(&self) -> &[InstanceId] {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

/// Arena of the live instances of one workflow run.
#[derive(Debug, Default)]
pub struct InstanceArena {
    instances: Vec<ActivityInstance>,
}

impl InstanceArena {
    /// Start a run of `definition`. The definition can no longer be cached
    /// as a root afterwards.
    pub fn new_root(definition: &WorkflowDefinition) -> (Self, InstanceId) {
        definition.mark_associated();
        let mut arena = InstanceArena::default();
        let root = arena.push(definition.root(), None);
        (arena, root)
    }

    /// Schedule a child of `parent`. Returns `None` for an unknown parent.
    pub fn add_child(&mut self, parent: InstanceId, activity: ActivityId) -> Option<InstanceId> {
        self.instances.get(parent.0 as usize)?;
        let child = self.push(activity, Some(parent));
        self.instances[parent.0 as usize].children.push(child);
        Some(child)
    }

    fn push(&mut self, activity: ActivityId, parent: Option<InstanceId>) -> InstanceId {
        let id = InstanceId(self.instances.len() as u32);
        self.instances.push(ActivityInstance {
            id,
            activity,
            state: ActivityInstanceState::Executing,
            parent,
            children: Vec::new(),
        });
        id
    }

    pub fn get(&self, id: InstanceId) -> Option<&ActivityInstance> {
        self.instances.get(id.0 as usize)
    }

    pub fn set_state(&mut self, id: InstanceId, state: ActivityInstanceState) -> bool {
        match self.instances.get_mut(id.0 as usize) {
            Some(instance) => {
                instance.state = state;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// True when `potential_child` is `scope` or lies beneath it. Every
    /// instance is in the scope `None`.
    pub fn is_in_scope(&self, potential_child: InstanceId, scope: Option<InstanceId>) -> bool {
        let Some(scope) = scope else {
            return true;
        };
        let mut cursor = Some(potential_child);
        while let Some(id) = cursor {
            if id == scope {
                return true;
            }
            cursor = self.get(id).and_then(|i| i.parent);
        }
        false
    }
}

/// Read-only child access for level-order traversal.
pub trait InstanceTree {
    type Id: Copy;

    fn children(&self, id: Self::Id) -> &[Self::Id];
}

impl InstanceTree for InstanceArena {
    type Id = InstanceId;

    fn children(&self, id: InstanceId) -> &[InstanceId] {
        match self.get(id) {
            Some(instance) => &instance.children,
            None => &[],
        }
    }
}

// ── Sibling list ────────────────────────────────────────────────────────────

/// Items of one level awaiting the callback.
///
/// `Shared` borrows a child slice; the first `add` to it copies the slice
/// into an owned list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TreeProcessingList<'a, T> {
    #[default]
    Empty,
    Single(T),
    Shared(&'a [T]),
    Owned(Vec<T>),
}

impl<'a, T: Copy> TreeProcessingList<'a, T> {
    /// List over `items` without copying them.
    pub fn from_slice(items: &'a [T]) -> Self {
        match items {
            [] => TreeProcessingList::Empty,
            [single] => TreeProcessingList::Single(*single),
            many => TreeProcessingList::Shared(many),
        }
    }

    pub fn add(&mut self, item: T) {
        match self {
            TreeProcessingList::Empty => *self = TreeProcessingList::Single(item),
            TreeProcessingList::Single(first) => {
                let first = *first;
                *self = TreeProcessingList::Owned(vec![first, item]);
            }
            TreeProcessingList::Shared(items) => {
                let mut owned = Vec::with_capacity(items.len() + 1);
                owned.extend_from_slice(items);
                owned.push(item);
                *self = TreeProcessingList::Owned(owned);
            }
            TreeProcessingList::Owned(items) => items.push(item),
        }
    }

    pub fn as_slice(&self) -> &[T] {
        match self {
            TreeProcessingList::Empty => &[],
            TreeProcessingList::Single(item) => std::slice::from_ref(item),
            TreeProcessingList::Shared(items) => items,
            TreeProcessingList::Owned(items) => items,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

// ── Traversal ───────────────────────────────────────────────────────────────

/// Visit `root` and its descendants in level order. `callback` returns
/// whether to descend into the children of the instance it was given.
pub fn process_activity_instance_tree<T, C, F>(tree: &T, root: T::Id, context: &mut C, mut callback: F)
where
    T: InstanceTree,
    F: FnMut(T::Id, &mut C) -> bool,
{
    let mut current = TreeProcessingList::Single(root);
    let mut current_groups: VecDeque<&[T::Id]> = VecDeque::new();

    loop {
        let mut next = TreeProcessingList::Empty;
        let mut next_groups: VecDeque<&[T::Id]> = VecDeque::new();

        let level = current
            .as_slice()
            .iter()
            .chain(current_groups.iter().flat_map(|group| group.iter()));
        for &id in level {
            if !callback(id, context) {
                continue;
            }
            let children = tree.children(id);
            if children.is_empty() {
                continue;
            }
            if next.is_empty() {
                next = TreeProcessingList::from_slice(children);
            } else if next_groups.is_empty() && children.len() == 1 {
                next.add(children[0]);
            } else {
                next_groups.push_back(children);
            }
        }

        if next.is_empty() {
            break;
        }
        current = next;
        current_groups = next_groups;
    }
}
