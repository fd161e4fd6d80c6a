// report.rs — Canonical text report of a cached tree
//
// Renders every declared activity in qualified-id order with its
// relationship, caching state and the locations it declares, followed by
// the diagnostics of the pass. The rendering is deterministic for a given
// tree and diagnostic list, so its SHA-256 is usable as a fingerprint.
//
// Preconditions: the tree has been through a cache pass.
// Postconditions: none (read-only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::activity::{ActivityDelegate, ActivityTree, Declaration, Variable};
use crate::diag::ValidationError;
use crate::id::{LocalId, QualifiedId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub qualified_id: QualifiedId,
    pub name: String,
    /// Relationship to the parent, or `root`.
    pub relation: String,
    pub parent_id: Option<QualifiedId>,
    pub caching: String,
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheReport {
    pub runtime_ready: bool,
    pub entries: Vec<ReportEntry>,
    pub diagnostics: Vec<String>,
}

impl CacheReport {
    pub fn new(tree: &ActivityTree, errors: &[ValidationError]) -> Self {
        let mut entries: Vec<ReportEntry> = tree
            .ids()
            .filter_map(|id| {
                let activity = &tree[id];
                let state = activity.state();
                let qualified_id = state.qualified_id()?.clone();
                if !state.is_declared() {
                    return None;
                }
                let relation = state.relationship().map_or_else(|| "root".to_string(), |r| r.to_string());
                let parent_id = state.parent().and_then(|p| tree.qualified_id(p)).cloned();
                Some(ReportEntry {
                    qualified_id,
                    name: activity.display_name().to_string(),
                    relation,
                    parent_id,
                    caching: format!("{:?}", state.caching()),
                    locations: locations(activity.runtime()),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.qualified_id.cmp(&b.qualified_id));

        CacheReport {
            runtime_ready: tree.is_runtime_ready(),
            entries,
            diagnostics: errors.iter().map(ToString::to_string).collect(),
        }
    }

    /// SHA-256 of the rendered report, as 64 hex characters.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        bytes_to_hex(&digest)
    }
}

fn locations(runtime: &Declaration) -> Vec<String> {
    let mut out = Vec::new();
    for a in &runtime.arguments {
        let mut line = format!("argument {}: {} {}{}", a.name, a.direction, a.value_type, local(a.id));
        if a.is_required {
            line.push_str(" required");
        }
        if a.is_unbound() {
            line.push_str(" unbound");
        }
        out.push(line);
    }
    push_variables(&mut out, "variable", &runtime.variables);
    push_variables(&mut out, "implementation-variable", &runtime.implementation_variables);
    for delegates in [&runtime.delegates, &runtime.imported_delegates, &runtime.implementation_delegates] {
        push_delegate_arguments(&mut out, delegates);
    }
    out
}

fn push_variables(out: &mut Vec<String>, label: &str, variables: &[Variable]) {
    for v in variables {
        out.push(format!("{} {}: {}{}", label, v.name, v.value_type, local(v.id)));
    }
}

fn push_delegate_arguments(out: &mut Vec<String>, delegates: &[ActivityDelegate]) {
    for a in delegates.iter().flat_map(|d| &d.arguments) {
        out.push(format!("delegate-argument {}: {} {}{}", a.name, a.direction, a.value_type, local(a.id)));
    }
}

fn local(id: Option<LocalId>) -> String {
    id.map(|id| format!(" #{}", id)).unwrap_or_default()
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

impl fmt::Display for CacheReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "runtime-ready: {}", self.runtime_ready)?;
        for entry in &self.entries {
            write!(f, "{} '{}' {}", entry.qualified_id, entry.name, entry.relation)?;
            if let Some(parent) = &entry.parent_id {
                write!(f, " of {}", parent)?;
            }
            writeln!(f, " [{}]", entry.caching)?;
            for location in &entry.locations {
                writeln!(f, "  {}", location)?;
            }
        }
        if !self.diagnostics.is_empty() {
            writeln!(f, "diagnostics:")?;
            for d in &self.diagnostics {
                writeln!(f, "  {}", d)?;
            }
        }
        Ok(())
    }
}
