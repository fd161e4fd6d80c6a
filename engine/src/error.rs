// error.rs — Hard failures of the metadata cache and the document loader
//
// Soft problems such as bad bindings or failed constraints are
// `ValidationError` data. The variants here are usage errors and aborts
// that stop a walk or a load.
//
// Preconditions: none.
// Failure modes: none (pure data).
// Side effects: none.

use thiserror::Error;

use crate::id::ActivityId;

/// Result alias for cache entry points.
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("root activity '{display_name}' is already associated with a workflow instance and cannot be cached as a root again")]
    RootAlreadyAssociatedWithInstance { display_name: String },

    #[error("activity '{display_name}' ({activity}) has not been related to a parent in the current cache pass")]
    UninitializedActivity {
        activity: ActivityId,
        display_name: String,
    },

    #[error("activity {0} does not exist in this tree")]
    UnknownActivity(ActivityId),

    #[error("metadata caching was cancelled")]
    Cancelled,
}

/// Errors raised while turning a JSON definition document into a tree.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid definition document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate activity name '{0}'")]
    DuplicateActivity(String),

    #[error("activity '{referrer}' references unknown activity '{name}'")]
    UnknownReference { referrer: String, name: String },

    #[error("root activity '{0}' is not defined")]
    UnknownRoot(String),
}
