// call_stack.rs — Ancestor chain tracking for metadata walks
//
// The walker pushes each node after declaring it and pops it when the node's
// exit marker comes off the worklist. The stack counts ancestors that were
// reached through a non-executing (imported/template) reference; constraints
// only fire while that count is zero.

use crate::id::ActivityId;

/// One occurrence of an activity during a walk.
///
/// `can_be_executed` is false when this occurrence was reached through an
/// imported child or imported delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildActivity {
    pub activity: ActivityId,
    pub can_be_executed: bool,
}

impl ChildActivity {
    pub fn new(activity: ActivityId, can_be_executed: bool) -> Self {
        ChildActivity {
            activity,
            can_be_executed,
        }
    }

    pub fn executable(activity: ActivityId) -> Self {
        Self::new(activity, true)
    }
}

/// Ordered chain of ancestors of the node currently being processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityCallStack {
    frames: Vec<ChildActivity>,
    non_executing_parent_count: usize,
}

impl ActivityCallStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff no ancestor on the chain is a non-executing occurrence.
    pub fn will_execute(&self) -> bool {
        self.non_executing_parent_count == 0
    }

    pub fn push(&mut self, child: ChildActivity) {
        if !child.can_be_executed {
            self.non_executing_parent_count += 1;
        }
        self.frames.push(child);
    }

    pub fn pop(&mut self) -> Option<ChildActivity> {
        let child = self.frames.pop()?;
        if !child.can_be_executed {
            self.non_executing_parent_count -= 1;
        }
        Some(child)
    }

    /// Ancestor at `index`, counting from the nearest parent (0).
    pub fn get(&self, index: usize) -> Option<ChildActivity> {
        let len = self.frames.len();
        if index < len {
            Some(self.frames[len - 1 - index])
        } else {
            None
        }
    }

    /// Nearest parent first.
    pub fn iter(&self) -> impl Iterator<Item = ChildActivity> + '_ {
        self.frames.iter().rev().copied()
    }

    /// Outermost ancestor first.
    pub fn iter_from_root(&self) -> impl Iterator<Item = ChildActivity> + '_ {
        self.frames.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
