//! Name and field spaces: the scope stack of a compilation.
//!
//! All spaces live in a compilation-scoped [`Spaces`] arena and are
//! addressed by [`SpaceRef`]. Back-references (a nested query to its
//! enclosing query) are refs, never owned pointers, and "complete later"
//! work is a registry of continuations keyed by ref, drained when the space
//! finalizes.

pub mod entry;

pub use entry::{PendingJoin, SpaceEntry, TypeDesc, WildEntry};

use crate::diagnostics::Diagnostics;
use crate::exprs::ExprEvaluator;
use crate::model::{
    AtomicFieldDef, FieldDef, Parameter, StructDef, StructRelationship, TurtleDef,
};
use indexmap::IndexMap;
use malloy_ast as ast;
use malloy_ast::Location;
use malloy_error::{MalloyError, Result};
use std::collections::HashMap;
use std::fmt;

/// Index of a space in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceRef(usize);

impl fmt::Display for SpaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The shape of a segment's result space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Reduce,
    Project,
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    /// Read-only wrapper around a schema.
    Static,
    /// Accepts incremental additions; used while refining explores.
    Dynamic,
    /// The input side of a segment. `nest_parent` points at the enclosing
    /// query's input space when this query is nested.
    Query { nest_parent: Option<SpaceRef> },
    /// The output side of a segment; expression lookups delegate to
    /// `expr_space`.
    Result {
        shape: ResultShape,
        expr_space: SpaceRef,
    },
}

enum SpaceState {
    Mutable,
    Frozen(StructDef),
}

/// Ran when a space finalizes, receiving the finalized struct.
pub type Completion = Box<dyn FnOnce(&StructDef, &mut Diagnostics)>;

pub struct Space {
    pub kind: SpaceKind,
    /// Identity of the wrapped struct with its field list emptied; entries
    /// carry the fields.
    seed: StructDef,
    entries: IndexMap<String, SpaceEntry>,
    state: SpaceState,
    /// Names of entries added by in-segment `declare:`/`join:` extensions,
    /// in insertion order.
    extend_list: Vec<String>,
}

impl fmt::Debug for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Space")
            .field("kind", &self.kind)
            .field("name", &self.seed.name)
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .field("frozen", &matches!(self.state, SpaceState::Frozen(_)))
            .finish()
    }
}

/// What a lookup emitted for downstream tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Field,
    Join,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRecord {
    pub kind: RefKind,
    pub path: String,
    pub location: Location,
}

/// Result of a path lookup: the resolved leaf entry, or the message to
/// report.
#[derive(Debug, Clone)]
pub enum Lookup {
    Found(SpaceEntry),
    Error(String),
}

#[derive(Default)]
pub struct Spaces {
    spaces: Vec<Space>,
    completions: HashMap<usize, Vec<Completion>>,
    pub references: Vec<ReferenceRecord>,
}

impl fmt::Debug for Spaces {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spaces")
            .field("spaces", &self.spaces)
            .field("references", &self.references.len())
            .finish()
    }
}

impl Spaces {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, space: Space) -> SpaceRef {
        let r = SpaceRef(self.spaces.len());
        self.spaces.push(space);
        r
    }

    pub fn get(&self, r: SpaceRef) -> Result<&Space> {
        self.spaces
            .get(r.0)
            .ok_or_else(|| MalloyError::internal(format!("missing space {r}")))
    }

    fn get_mut(&mut self, r: SpaceRef) -> Result<&mut Space> {
        self.spaces
            .get_mut(r.0)
            .ok_or_else(|| MalloyError::internal(format!("missing space {r}")))
    }

    /// Seed entries from a struct's fields and parameters.
    fn seed_entries(struct_def: &StructDef) -> IndexMap<String, SpaceEntry> {
        let mut entries = IndexMap::new();
        for field in &struct_def.fields {
            let entry = match field {
                FieldDef::Atomic(def) => SpaceEntry::Column(def.clone()),
                FieldDef::Struct(s) => SpaceEntry::Struct(s.clone()),
                FieldDef::Turtle(t) => SpaceEntry::Query(t.clone()),
            };
            entries.insert(field.name().to_string(), entry);
        }
        for (name, param) in &struct_def.parameters {
            entries.insert(
                name.clone(),
                SpaceEntry::Parameter {
                    param: param.clone(),
                    defined: !param.is_required(),
                },
            );
        }
        entries
    }

    pub fn new_static(&mut self, struct_def: &StructDef) -> SpaceRef {
        self.push(Space {
            kind: SpaceKind::Static,
            seed: struct_def.empty_like(),
            entries: Self::seed_entries(struct_def),
            state: SpaceState::Mutable,
            extend_list: Vec::new(),
        })
    }

    pub fn new_dynamic(&mut self, struct_def: &StructDef) -> SpaceRef {
        self.push(Space {
            kind: SpaceKind::Dynamic,
            seed: struct_def.empty_like(),
            entries: Self::seed_entries(struct_def),
            state: SpaceState::Mutable,
            extend_list: Vec::new(),
        })
    }

    /// A dynamic space over `struct_def` with an accept/except filter
    /// applied to the seeded fields. Parameters are never filtered.
    pub fn filtered_from(
        &mut self,
        struct_def: &StructDef,
        edit: Option<&ast::FieldListEdit>,
    ) -> SpaceRef {
        let r = self.new_dynamic(struct_def);
        if let Some(edit) = edit {
            let space = &mut self.spaces[r.0];
            space.entries.retain(|name, entry| {
                if matches!(entry, SpaceEntry::Parameter { .. }) {
                    return true;
                }
                let listed = edit.names.iter().any(|n| n == name);
                match edit.kind {
                    ast::FieldListEditKind::Accept => listed,
                    ast::FieldListEditKind::Except => !listed,
                }
            });
        }
        r
    }

    /// A query space sharing the current entries of an in-progress space,
    /// without finalizing it. Used when a turtle or nest compiles against a
    /// space still being refined.
    pub fn new_query_space_from(
        &mut self,
        source: SpaceRef,
        nest_parent: Option<SpaceRef>,
    ) -> Result<SpaceRef> {
        let space = self.get(source)?;
        let seed = space.seed.clone();
        let entries = space.entries.clone();
        Ok(self.push(Space {
            kind: SpaceKind::Query { nest_parent },
            seed,
            entries,
            state: SpaceState::Mutable,
            extend_list: Vec::new(),
        }))
    }

    /// A struct assembled from the current entries without freezing the
    /// space. Join `on` expressions stay unresolved; the finalize pass
    /// resolves them.
    pub fn provisional_struct(&self, r: SpaceRef) -> Result<StructDef> {
        let space = self.get(r)?;
        if let SpaceState::Frozen(def) = &space.state {
            return Ok(def.clone());
        }

        let mut fields = Vec::new();
        for (name, entry) in &space.entries {
            if let Some(def) = atomic_field(name, entry) {
                fields.push(FieldDef::Atomic(def));
            }
        }
        for (name, entry) in &space.entries {
            match resolve_rename(entry) {
                SpaceEntry::Struct(s) => fields.push(FieldDef::Struct(StructDef {
                    name: name.clone(),
                    ..s.clone()
                })),
                SpaceEntry::Join(join) => fields.push(FieldDef::Struct(StructDef {
                    name: name.clone(),
                    struct_relationship: StructRelationship::Join { on: None },
                    ..join.struct_def.clone()
                })),
                _ => {}
            }
        }
        for (name, entry) in &space.entries {
            if let SpaceEntry::Query(t) = resolve_rename(entry) {
                fields.push(FieldDef::Turtle(TurtleDef {
                    name: name.clone(),
                    ..t.clone()
                }));
            }
        }

        let mut def = space.seed.clone();
        def.fields = fields;
        Ok(def)
    }

    pub fn new_query_space(
        &mut self,
        struct_def: &StructDef,
        nest_parent: Option<SpaceRef>,
    ) -> SpaceRef {
        self.push(Space {
            kind: SpaceKind::Query { nest_parent },
            seed: struct_def.empty_like(),
            entries: Self::seed_entries(struct_def),
            state: SpaceState::Mutable,
            extend_list: Vec::new(),
        })
    }

    /// A result space starts empty of fields but keeps the input's dialect
    /// and parameters.
    pub fn new_result_space(&mut self, shape: ResultShape, expr_space: SpaceRef) -> Result<SpaceRef> {
        let seed = self.get(expr_space)?.seed.clone();
        Ok(self.push(Space {
            kind: SpaceKind::Result { shape, expr_space },
            seed,
            entries: IndexMap::new(),
            state: SpaceState::Mutable,
            extend_list: Vec::new(),
        }))
    }

    pub fn dialect_name(&self, r: SpaceRef) -> Result<&str> {
        Ok(&self.get(r)?.seed.dialect)
    }

    pub fn nest_parent(&self, r: SpaceRef) -> Option<SpaceRef> {
        match self.get(r).ok()?.kind {
            SpaceKind::Query { nest_parent } => nest_parent,
            SpaceKind::Result { expr_space, .. } => self.nest_parent(expr_space),
            _ => None,
        }
    }

    pub fn expr_space(&self, r: SpaceRef) -> Option<SpaceRef> {
        match self.get(r).ok()?.kind {
            SpaceKind::Result { expr_space, .. } => Some(expr_space),
            _ => None,
        }
    }

    pub fn result_shape(&self, r: SpaceRef) -> Option<ResultShape> {
        match self.get(r).ok()?.kind {
            SpaceKind::Result { shape, .. } => Some(shape),
            _ => None,
        }
    }

    pub fn entry(&self, r: SpaceRef, name: &str) -> Option<&SpaceEntry> {
        self.get(r).ok()?.entries.get(name)
    }

    pub fn entries(&self, r: SpaceRef) -> Result<&IndexMap<String, SpaceEntry>> {
        Ok(&self.get(r)?.entries)
    }

    pub fn is_frozen(&self, r: SpaceRef) -> bool {
        matches!(
            self.get(r).map(|s| &s.state),
            Ok(SpaceState::Frozen(_))
        )
    }

    fn check_mutable(space: &Space) -> Result<()> {
        match space.state {
            SpaceState::Mutable => Ok(()),
            SpaceState::Frozen(_) => Err(MalloyError::internal(format!(
                "write to finalized space '{}'",
                space.seed.name
            ))),
        }
    }

    /// Add a named entry. Duplicate names are a diagnostic, not an error;
    /// returns whether the entry was added. Writing to a frozen space is a
    /// programming error.
    pub fn add_entry(
        &mut self,
        r: SpaceRef,
        name: &str,
        entry: SpaceEntry,
        loc: &Location,
        diagnostics: &mut Diagnostics,
    ) -> Result<bool> {
        let is_result = matches!(self.get(r)?.kind, SpaceKind::Result { .. });
        let space = self.get_mut(r)?;
        Self::check_mutable(space)?;

        if space.entries.contains_key(name) {
            if is_result {
                diagnostics.log(loc, format!("Output already has a field named '{name}'"));
            } else {
                diagnostics.log(loc, format!("Cannot redefine '{name}'"));
            }
            return Ok(false);
        }
        space.entries.insert(name.to_string(), entry);
        Ok(true)
    }

    /// Add an entry contributed by an in-segment `declare:`/`join:`; it also
    /// lands in the segment's `extend_source`.
    pub fn extend_entry(
        &mut self,
        r: SpaceRef,
        name: &str,
        entry: SpaceEntry,
        loc: &Location,
        diagnostics: &mut Diagnostics,
    ) -> Result<bool> {
        let added = self.add_entry(r, name, entry, loc, diagnostics)?;
        if added {
            self.get_mut(r)?.extend_list.push(name.to_string());
        }
        Ok(added)
    }

    pub fn add_parameters(
        &mut self,
        r: SpaceRef,
        params: impl IntoIterator<Item = Parameter>,
    ) -> Result<()> {
        let space = self.get_mut(r)?;
        Self::check_mutable(space)?;
        for param in params {
            let name = param.name().to_string();
            let defined = !param.is_required();
            space.seed.parameters.insert(name.clone(), param.clone());
            space
                .entries
                .insert(name, SpaceEntry::Parameter { param, defined });
        }
        Ok(())
    }

    pub fn add_filter(&mut self, r: SpaceRef, filter: crate::model::FilterExpr) -> Result<()> {
        let space = self.get_mut(r)?;
        Self::check_mutable(space)?;
        space.seed.filter_list.push(filter);
        Ok(())
    }

    /// Sets the primary key; duplicate definitions log at both the first and
    /// the repeated location.
    pub fn set_primary_key(
        &mut self,
        r: SpaceRef,
        name: &str,
        loc: &Location,
        diagnostics: &mut Diagnostics,
        first_loc: &mut Option<Location>,
    ) -> Result<()> {
        let space = self.get_mut(r)?;
        Self::check_mutable(space)?;
        if space.seed.primary_key.is_some() {
            if let Some(first) = first_loc.as_ref() {
                diagnostics.log(first, "Duplicate primary key definition");
            }
            diagnostics.log(loc, "Duplicate primary key definition");
            *first_loc = None;
            return Ok(());
        }
        space.seed.primary_key = Some(name.to_string());
        *first_loc = Some(loc.clone());
        Ok(())
    }

    pub fn rename_field(
        &mut self,
        r: SpaceRef,
        new_name: &str,
        old_name: &str,
        loc: &Location,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let space = self.get_mut(r)?;
        Self::check_mutable(space)?;

        if new_name == old_name {
            diagnostics.log(loc, format!("Can't rename '{old_name}' to itself"));
            return Ok(());
        }
        if space.entries.contains_key(new_name) {
            diagnostics.log(loc, format!("Cannot redefine '{new_name}'"));
            return Ok(());
        }
        let Some(old) = space.entries.get(old_name) else {
            diagnostics.log(loc, format!("Can't rename '{old_name}', no such field"));
            return Ok(());
        };
        if !old.is_renamable() {
            diagnostics.log(loc, format!("'{old_name}' cannot be renamed"));
            return Ok(());
        }
        let old = space.entries.shift_remove(old_name).unwrap();
        space.entries.insert(
            new_name.to_string(),
            SpaceEntry::Rename {
                from: old_name.to_string(),
                entry: Box::new(old),
            },
        );
        Ok(())
    }

    /// Path-walked lookup. Emits a reference record on success.
    pub fn lookup(&mut self, r: SpaceRef, path: &[String], loc: &Location) -> Lookup {
        let Some(head) = path.first() else {
            return Lookup::Error("empty reference".to_string());
        };
        let Ok(space) = self.get(r) else {
            return Lookup::Error(format!("missing space {r}"));
        };

        let Some(mut entry) = space.entries.get(head).cloned() else {
            return Lookup::Error(format!("'{head}' is not defined"));
        };

        // Renames are transparent to lookup.
        while let SpaceEntry::Rename { entry: inner, .. } = entry {
            entry = *inner;
        }

        let mut walked = vec![head.clone()];
        for seg in &path[1..] {
            let inner = match &entry {
                SpaceEntry::Struct(s) => s,
                SpaceEntry::Join(j) => &j.struct_def,
                _ => {
                    return Lookup::Error(format!(
                        "'{}' cannot contain '{seg}'",
                        walked.join(".")
                    ))
                }
            };
            let Some(field) = inner.field(seg) else {
                return Lookup::Error(format!(
                    "'{seg}' is not defined in '{}'",
                    walked.join(".")
                ));
            };
            entry = match field {
                FieldDef::Atomic(def) => SpaceEntry::Column(def.clone()),
                FieldDef::Struct(s) => SpaceEntry::Struct(s.clone()),
                FieldDef::Turtle(t) => SpaceEntry::Query(t.clone()),
            };
            walked.push(seg.clone());
        }

        self.references.push(ReferenceRecord {
            kind: if entry.is_struct_like() {
                RefKind::Join
            } else {
                RefKind::Field
            },
            path: path.join("."),
            location: loc.clone(),
        });
        Lookup::Found(entry)
    }

    /// Expand a wildcard into dotted column paths, insertion-ordered.
    pub fn expand_wild(
        &mut self,
        r: SpaceRef,
        wild: &WildEntry,
        loc: &Location,
        diagnostics: &mut Diagnostics,
    ) -> Vec<String> {
        let base_struct = if wild.prefix.is_empty() {
            None
        } else {
            match self.lookup(r, &wild.prefix, loc) {
                Lookup::Found(SpaceEntry::Struct(s)) => Some(s),
                Lookup::Found(SpaceEntry::Join(j)) => Some(j.struct_def),
                Lookup::Found(_) => {
                    diagnostics.log(
                        loc,
                        format!("'{}' is not a join", wild.prefix.join(".")),
                    );
                    return Vec::new();
                }
                Lookup::Error(msg) => {
                    diagnostics.log(loc, msg);
                    return Vec::new();
                }
            }
        };

        let mut out = Vec::new();
        match base_struct {
            Some(s) => expand_struct_fields(&s, &wild.prefix, wild.deep, &mut out),
            None => {
                let Ok(space) = self.get(r) else {
                    return out;
                };
                for (name, entry) in &space.entries {
                    match entry {
                        SpaceEntry::Column(_)
                        | SpaceEntry::Expression(_)
                        | SpaceEntry::Reference { .. } => out.push(name.clone()),
                        SpaceEntry::Struct(s) if wild.deep => {
                            expand_struct_fields(s, &[name.clone()], true, &mut out)
                        }
                        SpaceEntry::Join(j) if wild.deep => {
                            expand_struct_fields(&j.struct_def, &[name.clone()], true, &mut out)
                        }
                        _ => {}
                    }
                }
            }
        }
        out
    }

    /// Register work to run when `r` finalizes. If it already has, the work
    /// runs immediately.
    pub fn when_complete(
        &mut self,
        r: SpaceRef,
        cb: Completion,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        if let SpaceState::Frozen(def) = &self.get(r)?.state {
            let def = def.clone();
            cb(&def, diagnostics);
            return Ok(());
        }
        self.completions.entry(r.0).or_default().push(cb);
        Ok(())
    }

    /// Finalize into a struct. The first structural read freezes the space:
    /// fields are emitted atomics first, then joins (with their `on`
    /// expressions resolved against the completed space), then turtles, and
    /// registered completion callbacks run in registration order.
    pub fn struct_def(&mut self, r: SpaceRef, diagnostics: &mut Diagnostics) -> Result<StructDef> {
        if let SpaceState::Frozen(def) = &self.get(r)?.state {
            return Ok(def.clone());
        }

        let entries: Vec<(String, SpaceEntry)> = self
            .get(r)?
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut fields = Vec::new();
        // Atomic fields in entry order.
        for (name, entry) in &entries {
            if let Some(def) = atomic_field(name, entry) {
                fields.push(FieldDef::Atomic(def));
            }
        }
        // Joins second; `on` resolves against this space now that every
        // addition is visible.
        for (name, entry) in &entries {
            if let Some(field) = self.join_field(r, name, entry, diagnostics) {
                fields.push(field);
            }
        }
        // Turtles last.
        for (name, entry) in &entries {
            let resolved = resolve_rename(entry);
            if let SpaceEntry::Query(t) = resolved {
                fields.push(FieldDef::Turtle(TurtleDef {
                    name: name.clone(),
                    ..t.clone()
                }));
            }
        }

        let space = self.get_mut(r)?;
        let mut def = space.seed.clone();
        def.fields = fields;
        space.state = SpaceState::Frozen(def.clone());

        self.run_completions(r, &def, diagnostics);
        // A result space's completion also completes its expression space:
        // nested children have contributed by now, and exclude() checks run
        // against this output.
        if let SpaceKind::Result { expr_space, .. } = self.get(r)?.kind {
            self.run_completions(expr_space, &def, diagnostics);
        }

        Ok(def)
    }

    fn run_completions(&mut self, r: SpaceRef, def: &StructDef, diagnostics: &mut Diagnostics) {
        if let Some(cbs) = self.completions.remove(&r.0) {
            for cb in cbs {
                cb(def, diagnostics);
            }
        }
    }

    fn join_field(
        &mut self,
        r: SpaceRef,
        name: &str,
        entry: &SpaceEntry,
        diagnostics: &mut Diagnostics,
    ) -> Option<FieldDef> {
        match resolve_rename(entry) {
            SpaceEntry::Struct(s) => Some(FieldDef::Struct(StructDef {
                name: name.to_string(),
                ..s.clone()
            })),
            SpaceEntry::Join(join) => {
                let on = join.key.as_ref().map(|key| {
                    let mut evaluator = ExprEvaluator::new(self, r, diagnostics);
                    evaluator.eval(key).value
                });
                Some(FieldDef::Struct(StructDef {
                    name: name.to_string(),
                    struct_relationship: StructRelationship::Join { on },
                    ..join.struct_def.clone()
                }))
            }
            _ => None,
        }
    }

    /// The `extend_source` fields a segment contributed, in insertion order.
    pub fn extended_fields(
        &mut self,
        r: SpaceRef,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<FieldDef>> {
        let names = self.get(r)?.extend_list.clone();
        let mut out = Vec::new();
        for name in names {
            let Some(entry) = self.entry(r, &name).cloned() else {
                continue;
            };
            if let Some(def) = atomic_field(&name, &entry) {
                out.push(FieldDef::Atomic(def));
            } else if let Some(field) = self.join_field(r, &name, &entry, diagnostics) {
                out.push(field);
            }
        }
        Ok(out)
    }
}

fn resolve_rename(entry: &SpaceEntry) -> &SpaceEntry {
    match entry {
        SpaceEntry::Rename { entry, .. } => resolve_rename(entry),
        other => other,
    }
}

fn atomic_field(name: &str, entry: &SpaceEntry) -> Option<AtomicFieldDef> {
    match resolve_rename(entry) {
        SpaceEntry::Column(def) | SpaceEntry::Expression(def) => Some(AtomicFieldDef {
            name: name.to_string(),
            ..def.clone()
        }),
        SpaceEntry::Reference { def, .. } => Some(AtomicFieldDef {
            name: name.to_string(),
            ..def.clone()
        }),
        _ => None,
    }
}

fn expand_struct_fields(s: &StructDef, prefix: &[String], deep: bool, out: &mut Vec<String>) {
    for field in &s.fields {
        match field {
            FieldDef::Atomic(def) => {
                let mut path = prefix.to_vec();
                path.push(def.name.clone());
                out.push(path.join("."));
            }
            FieldDef::Struct(inner) if deep => {
                let mut path = prefix.to_vec();
                path.push(inner.name.clone());
                expand_struct_fields(inner, &path, true, out);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AtomicFieldType, StructSource};

    fn sample_struct() -> StructDef {
        StructDef {
            name: "airports".into(),
            dialect: "standardsql".into(),
            fields: vec![
                FieldDef::Atomic(AtomicFieldDef::column("code", AtomicFieldType::String)),
                FieldDef::Atomic(AtomicFieldDef::column("state", AtomicFieldType::String)),
                FieldDef::Atomic(AtomicFieldDef::column("elevation", AtomicFieldType::Number)),
            ],
            parameters: Default::default(),
            filter_list: Vec::new(),
            primary_key: None,
            struct_source: StructSource::Table {
                table: "airports".into(),
            },
            struct_relationship: StructRelationship::BaseTable,
            location: None,
        }
    }

    #[test]
    fn static_lookup_finds_columns() {
        let mut spaces = Spaces::new();
        let r = spaces.new_static(&sample_struct());
        let lookup = spaces.lookup(r, &["state".into()], &Location::detached());
        match lookup {
            Lookup::Found(entry) => {
                let td = entry.type_desc().unwrap();
                assert_eq!(td.data_type, AtomicFieldType::String);
            }
            Lookup::Error(e) => panic!("unexpected error: {e}"),
        }
        assert_eq!(spaces.references.len(), 1);
        assert_eq!(spaces.references[0].kind, RefKind::Field);
    }

    #[test]
    fn walking_through_a_column_fails() {
        let mut spaces = Spaces::new();
        let r = spaces.new_static(&sample_struct());
        let lookup = spaces.lookup(
            r,
            &["state".into(), "name".into()],
            &Location::detached(),
        );
        match lookup {
            Lookup::Error(msg) => assert_eq!(msg, "'state' cannot contain 'name'"),
            Lookup::Found(_) => panic!("expected error"),
        }
    }

    #[test]
    fn undefined_name() {
        let mut spaces = Spaces::new();
        let r = spaces.new_static(&sample_struct());
        match spaces.lookup(r, &["altitude".into()], &Location::detached()) {
            Lookup::Error(msg) => assert_eq!(msg, "'altitude' is not defined"),
            Lookup::Found(_) => panic!("expected error"),
        }
    }

    #[test]
    fn finalize_is_idempotent_and_freezing() {
        let mut spaces = Spaces::new();
        let mut diagnostics = Diagnostics::new();
        let r = spaces.new_dynamic(&sample_struct());

        let first = spaces.struct_def(r, &mut diagnostics).unwrap();
        let second = spaces.struct_def(r, &mut diagnostics).unwrap();
        assert_eq!(first, second);

        let err = spaces.add_entry(
            r,
            "late",
            SpaceEntry::Column(AtomicFieldDef::column("late", AtomicFieldType::Number)),
            &Location::detached(),
            &mut diagnostics,
        );
        assert!(err.is_err());
    }

    #[test]
    fn completion_callbacks_run_on_finalize_in_order() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut spaces = Spaces::new();
        let mut diagnostics = Diagnostics::new();
        let r = spaces.new_dynamic(&sample_struct());

        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let order = Rc::clone(&order);
            spaces
                .when_complete(
                    r,
                    Box::new(move |_, _| order.borrow_mut().push(tag)),
                    &mut diagnostics,
                )
                .unwrap();
        }
        assert!(order.borrow().is_empty());

        spaces.struct_def(r, &mut diagnostics).unwrap();
        assert_eq!(*order.borrow(), ["first", "second"]);

        // Registered after finalize runs immediately.
        let order2 = Rc::clone(&order);
        spaces
            .when_complete(
                r,
                Box::new(move |_, _| order2.borrow_mut().push("late")),
                &mut diagnostics,
            )
            .unwrap();
        assert_eq!(*order.borrow(), ["first", "second", "late"]);
    }

    #[test]
    fn filtered_from_accept_and_except() {
        let mut spaces = Spaces::new();
        let edit = ast::FieldListEdit {
            kind: ast::FieldListEditKind::Accept,
            names: vec!["code".into(), "state".into()],
            loc: Location::detached(),
        };
        let r = spaces.filtered_from(&sample_struct(), Some(&edit));
        let names: Vec<_> = spaces.entries(r).unwrap().keys().cloned().collect();
        assert_eq!(names, ["code", "state"]);

        let edit = ast::FieldListEdit {
            kind: ast::FieldListEditKind::Except,
            names: vec!["code".into()],
            loc: Location::detached(),
        };
        let r = spaces.filtered_from(&sample_struct(), Some(&edit));
        let names: Vec<_> = spaces.entries(r).unwrap().keys().cloned().collect();
        assert_eq!(names, ["state", "elevation"]);
    }

    #[test]
    fn rename_rules() {
        let mut spaces = Spaces::new();
        let mut diagnostics = Diagnostics::new();
        let r = spaces.new_dynamic(&sample_struct());

        spaces
            .rename_field(r, "state", "state", &Location::detached(), &mut diagnostics)
            .unwrap();
        assert!(diagnostics.any_contains("to itself"));

        spaces
            .rename_field(r, "st", "state", &Location::detached(), &mut diagnostics)
            .unwrap();
        let lookup = spaces.lookup(r, &["st".into()], &Location::detached());
        assert!(matches!(lookup, Lookup::Found(_)));
        let gone = spaces.lookup(r, &["state".into()], &Location::detached());
        assert!(matches!(gone, Lookup::Error(_)));
    }

    #[test]
    fn duplicate_output_name_logs() {
        let mut spaces = Spaces::new();
        let mut diagnostics = Diagnostics::new();
        let input = spaces.new_query_space(&sample_struct(), None);
        let result = spaces
            .new_result_space(ResultShape::Reduce, input)
            .unwrap();

        let def = AtomicFieldDef::column("state", AtomicFieldType::String);
        spaces
            .add_entry(
                result,
                "state",
                SpaceEntry::Column(def.clone()),
                &Location::detached(),
                &mut diagnostics,
            )
            .unwrap();
        let added = spaces
            .add_entry(
                result,
                "state",
                SpaceEntry::Column(def),
                &Location::detached(),
                &mut diagnostics,
            )
            .unwrap();
        assert!(!added);
        assert!(diagnostics.any_contains("Output already has a field named 'state'"));
    }

    #[test]
    fn wildcard_expansion_orders_by_entry() {
        let mut spaces = Spaces::new();
        let mut diagnostics = Diagnostics::new();
        let r = spaces.new_query_space(&sample_struct(), None);
        let wild = WildEntry {
            prefix: Vec::new(),
            deep: false,
        };
        let cols = spaces.expand_wild(r, &wild, &Location::detached(), &mut diagnostics);
        assert_eq!(cols, ["code", "state", "elevation"]);
    }
}
