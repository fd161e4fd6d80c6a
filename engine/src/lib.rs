// wfmeta — Workflow metadata cache
//
// Library root. Declares, scopes and validates activity definition graphs
// ahead of execution, and walks live instance trees level by level.

pub mod activity;
pub mod bookmark;
pub mod call_stack;
pub mod constraint;
pub mod diag;
pub mod document;
pub mod environment;
pub mod error;
pub mod id;
pub mod instance;
pub mod options;
pub mod report;
pub mod specialization;
pub mod traverse;
pub mod validation;
pub mod walker;
