// bookmark.rs — Completion and fault callback wrappers bound to an owner
//
// When an instance schedules a child it may ask to be told when the child
// completes or faults. The factories here pair such a callback with the
// owning instance. A missing callback yields no wrapper at all, which
// callers read as "nothing to invoke".
//
// Failure modes: typed completions fail when the child's result does not
//   deserialize into the requested type.
// Side effects: none beyond the wrapped callbacks.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::id::InstanceId;
use crate::instance::ActivityInstanceState;

/// The child instance a completion or fault is reported for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedInstance {
    pub id: InstanceId,
    pub state: ActivityInstanceState,
}

/// A fault travelling up the instance tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultPropagation {
    pub source: InstanceId,
    pub message: String,
}

pub type CompletionCallback = Arc<dyn Fn(InstanceId, CompletedInstance) + Send + Sync>;
pub type DelegateCompletionCallback = Arc<dyn Fn(InstanceId, CompletedInstance, &BTreeMap<String, Value>) + Send + Sync>;
pub type FuncCompletionCallback<T> = Arc<dyn Fn(InstanceId, CompletedInstance, T) + Send + Sync>;
/// Returns true when the owner handled the fault.
pub type FaultCallback = Arc<dyn Fn(InstanceId, &FaultPropagation) -> bool + Send + Sync>;

// ── Completion ──────────────────────────────────────────────────────────────

#[derive(Clone)]
enum CompletionKind {
    Activity(CompletionCallback),
    Delegate(DelegateCompletionCallback),
}

/// Completion callback bound to the instance that scheduled the child.
#[derive(Clone)]
pub struct CompletionBookmark {
    owner: InstanceId,
    kind: CompletionKind,
}

impl CompletionBookmark {
    pub fn for_activity(callback: Option<CompletionCallback>, owner: InstanceId) -> Option<Self> {
        callback.map(|callback| CompletionBookmark {
            owner,
            kind: CompletionKind::Activity(callback),
        })
    }

    /// Completion of a delegate handler, reported with the handler's outputs.
    pub fn for_delegate(callback: Option<DelegateCompletionCallback>, owner: InstanceId) -> Option<Self> {
        callback.map(|callback| CompletionBookmark {
            owner,
            kind: CompletionKind::Delegate(callback),
        })
    }

    pub fn owner(&self) -> InstanceId {
        self.owner
    }

    /// Deliver a completion. Activity callbacks ignore `outputs`.
    pub fn invoke(&self, completed: CompletedInstance, outputs: &BTreeMap<String, Value>) {
        trace!(owner = self.owner.0, child = completed.id.0, state = %completed.state, "completion");
        match &self.kind {
            CompletionKind::Activity(callback) => callback(self.owner, completed),
            CompletionKind::Delegate(callback) => callback(self.owner, completed, outputs),
        }
    }
}

impl fmt::Debug for CompletionBookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            CompletionKind::Activity(_) => "activity",
            CompletionKind::Delegate(_) => "delegate",
        };
        f.debug_struct("CompletionBookmark")
            .field("owner", &self.owner)
            .field("kind", &kind)
            .finish()
    }
}

/// Completion of a child that produces a result of type `T`.
pub struct FuncCompletionBookmark<T> {
    owner: InstanceId,
    callback: FuncCompletionCallback<T>,
    _result: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> FuncCompletionBookmark<T> {
    pub fn new(callback: Option<FuncCompletionCallback<T>>, owner: InstanceId) -> Option<Self> {
        callback.map(|callback| FuncCompletionBookmark {
            owner,
            callback,
            _result: PhantomData,
        })
    }

    pub fn owner(&self) -> InstanceId {
        self.owner
    }

    /// Decode `result` and deliver it. The callback is not called when
    /// decoding fails.
    pub fn invoke(&self, completed: CompletedInstance, result: &Value) -> serde_json::Result<()> {
        let value: T = serde_json::from_value(result.clone())?;
        (self.callback)(self.owner, completed, value);
        Ok(())
    }
}

impl<T> fmt::Debug for FuncCompletionBookmark<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncCompletionBookmark").field("owner", &self.owner).finish()
    }
}

// ── Faults ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct FaultBookmark {
    owner: InstanceId,
    callback: FaultCallback,
}

impl FaultBookmark {
    pub fn new(callback: Option<FaultCallback>, owner: InstanceId) -> Option<Self> {
        callback.map(|callback| FaultBookmark { owner, callback })
    }

    pub fn owner(&self) -> InstanceId {
        self.owner
    }

    pub fn invoke(&self, fault: &FaultPropagation) -> bool {
        trace!(owner = self.owner.0, source = fault.source.0, "fault");
        (self.callback)(self.owner, fault)
    }
}

impl fmt::Debug for FaultBookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultBookmark").field("owner", &self.owner).finish()
    }
}

// ── Trace strings ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub name: Option<String>,
    pub id: u64,
}

impl Bookmark {
    pub fn trace_string(&self) -> String {
        match &self.name {
            Some(name) => format!("'{}'", name),
            None => format!("<Unnamed Id={}>", self.id),
        }
    }
}

/// A scope is initialized once the host assigns it a permanent id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookmarkScope {
    pub id: Option<String>,
    pub temporary_id: u64,
}

pub fn scope_trace_string(scope: Option<&BookmarkScope>) -> String {
    match scope {
        None => "<None>".to_string(),
        Some(BookmarkScope { id: Some(id), .. }) => format!("'{}'", id),
        Some(BookmarkScope { id: None, temporary_id }) => {
            format!("<Uninitialized TemporaryId={}>", temporary_id)
        }
    }
}
