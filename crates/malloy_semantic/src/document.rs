//! The top-level compilation pass: walk a document's statements, building
//! the model environment and the query list, pausing when external schema
//! data is missing.

use crate::context::{Analyzer, ModelEnvironment, ModelValue};
use crate::diagnostics::Diagnostic;
use crate::model::Query;
use crate::spaces::ReferenceRecord;
use crate::zones::{ModelDataRequest, SchemaZone, SqlZone, ZoneEntry};
use malloy_ast as ast;

/// Everything one pass produced. When `request` is set the pass paused for
/// external data; the driver fills the zones and runs a fresh pass.
#[derive(Debug)]
pub struct PassResult {
    pub request: Option<ModelDataRequest>,
    pub queries: Vec<Query>,
    pub model: ModelEnvironment,
    pub diagnostics: Vec<Diagnostic>,
    /// Field/join references seen during compilation, for tooling.
    pub references: Vec<ReferenceRecord>,
}

impl PassResult {
    pub fn is_complete(&self) -> bool {
        self.request.is_none()
    }
}

/// Compile a document. No state persists across calls; re-running after the
/// driver fills the zones starts from scratch.
pub fn execute(doc: &ast::Document, schema_zone: &SchemaZone, sql_zone: &SqlZone) -> PassResult {
    let mut an = Analyzer::new(schema_zone, sql_zone);

    for statement in &doc.statements {
        run_statement(&mut an, statement);
        if an.is_paused() {
            tracing::debug!("pass suspended for external schema data");
            break;
        }
    }

    PassResult {
        request: an.take_request(),
        queries: an.query_list,
        model: an.model,
        diagnostics: an.diagnostics.into_vec(),
        references: an.spaces.references,
    }
}

fn run_statement(an: &mut Analyzer<'_>, statement: &ast::Statement) {
    match statement {
        ast::Statement::DefineSource {
            name,
            source,
            exported,
            loc,
        } => {
            let def = crate::sources::resolve_source(an, source);
            if an.is_paused() {
                return;
            }
            if an.model.contains(name) {
                an.diagnostics
                    .log(loc, format!("Cannot redefine '{name}'"));
                return;
            }
            an.model.define(name, ModelValue::Source(def), *exported);
        }
        ast::Statement::DefineQuery {
            name,
            query,
            exported,
            loc,
        } => {
            let compiled = match crate::pipeline::compile_query(an, query) {
                Ok(compiled) => compiled,
                Err(err) => {
                    an.diagnostics
                        .log(loc, format!("Internal error: {err}"));
                    return;
                }
            };
            if an.is_paused() {
                return;
            }
            if an.model.contains(name) {
                an.diagnostics
                    .log(loc, format!("Cannot redefine '{name}'"));
                return;
            }
            an.model
                .define(name, ModelValue::Query(compiled.query), *exported);
        }
        ast::Statement::RunQuery { query, loc } => {
            let compiled = match crate::pipeline::compile_query(an, query) {
                Ok(compiled) => compiled,
                Err(err) => {
                    an.diagnostics
                        .log(loc, format!("Internal error: {err}"));
                    return;
                }
            };
            if an.is_paused() {
                return;
            }
            an.query_list.push(compiled.query);
        }
        ast::Statement::DefineSql { name, select, loc } => {
            match an.sql_zone.get_entry(name) {
                Some(ZoneEntry::Present(_)) => {
                    if an.model.contains(name) {
                        an.diagnostics
                            .log(loc, format!("Cannot redefine '{name}'"));
                        return;
                    }
                    an.model.define(name, ModelValue::Sql, false);
                }
                Some(ZoneEntry::Error(msg)) => {
                    an.diagnostics.log(loc, msg);
                }
                Some(ZoneEntry::Reference) | None => {
                    an.need_sql(name, select, loc);
                }
            }
        }
    }
}
