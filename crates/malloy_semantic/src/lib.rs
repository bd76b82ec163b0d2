//! Semantic analysis and query-plan construction for the Malloy analytics
//! language.
//!
//! The crate consumes a parsed [`malloy_ast::Document`] plus schema lookups
//! and produces a language-independent plan — typed [`model::Query`] values
//! a per-dialect SQL writer can translate. Parsing, SQL generation, schema
//! fetching and execution all live elsewhere; this is the middle end:
//! name resolution across schema/input/output scopes, expression typing
//! with temporal granularity, segment legality, pipeline composition, and
//! source refinement.
//!
//! The entry point is [`execute`], which compiles a document against the
//! process-scoped schema and sql zones, returning either a finished
//! [`PassResult`] or a [`zones::ModelDataRequest`] asking the driver to
//! fetch schemas and re-run the pass.

pub mod context;
pub mod diagnostics;
pub mod dialect;
pub mod document;
pub mod exprs;
pub mod model;
pub mod pipeline;
pub mod segments;
pub mod sentinel;
pub mod sources;
pub mod spaces;
pub mod zones;

pub use context::{ModelEntry, ModelEnvironment, ModelValue};
pub use diagnostics::{Diagnostic, Diagnostics};
pub use document::{execute, PassResult};
pub use sentinel::ErrorFactory;
pub use zones::{ModelDataRequest, SchemaZone, SqlZone, ZoneEntry};
