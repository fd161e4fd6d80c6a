// diag.rs — Validation diagnostics model
//
// Soft errors produced while caching metadata: argument binding problems,
// scope collisions, relationship violations, and constraint failures. They
// are collected as data and never abort a walk.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::id::{ActivityId, QualifiedId};

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Validation error ─────────────────────────────────────────────────────

/// A diagnostic attributed to one activity of a cached tree.
///
/// `prefix` describes the ancestor chain that produced the diagnostic; it is
/// kept apart from `message` so consumers can show either form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub level: DiagLevel,
    pub message: String,
    pub source: Option<ActivityId>,
    pub source_id: Option<QualifiedId>,
    pub prefix: Option<String>,
}

impl ValidationError {
    /// Create an error-level diagnostic with no source or prefix.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            level: DiagLevel::Error,
            message: message.into(),
            source: None,
            source_id: None,
            prefix: None,
        }
    }

    /// Create a warning-level diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: DiagLevel::Warning,
            ..Self::new(message)
        }
    }

    /// Attribute the diagnostic to an activity.
    pub fn with_source(mut self, source: ActivityId, source_id: Option<QualifiedId>) -> Self {
        self.source = Some(source);
        self.source_id = source_id;
        self
    }

    /// Attach an ancestor path prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn is_warning(&self) -> bool {
        self.level == DiagLevel::Warning
    }

    /// Prefix and message joined the way they are displayed to users.
    pub fn full_message(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, self.message),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(id) = &self.source_id {
            write!(f, "{}[{}]: {}", level, id, self.full_message())
        } else {
            write!(f, "{}: {}", level, self.full_message())
        }
    }
}

/// True when any diagnostic is error-level. Warnings never block readiness.
pub fn has_errors(errors: &[ValidationError]) -> bool {
    errors.iter().any(|e| e.level == DiagLevel::Error)
}
