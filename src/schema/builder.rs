//! Builder API replacing struct-tag reflection (spec §4.4).
//!
//! Each Go struct tag from the source system becomes one method here,
//! called once per entity when the schema is assembled — not once per
//! compile. `BranchBuilder::new(...).field(...).related_str(...)` reads
//! like the struct-tag vocabulary it replaces.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use compact_str::CompactString;

use super::{BranchId, CompiledBranch, JoinDirection, RegistryEntry, RelationSpec, Schema, Source};
use crate::condition::Operator;
use crate::error::{Result, ShapeQlError};
use crate::order::Direction;
use crate::sql::snake_case;

#[derive(Debug, Clone)]
struct FieldSpec {
    shape_name: CompactString,
    column: CompactString,
    /// SQL type tag for this field (spec §3 registry entry's
    /// `fieldTypes`). No caller currently reads this back out of the
    /// registry for casting decisions, but it's part of the registry
    /// entry's documented shape, so it's tracked rather than dropped.
    /// Defaults to `"text"`; override with [`BranchBuilder::field_type`].
    sql_type: CompactString,
}

/// One unresolved `related` atom, kept around until the whole tree is
/// assembled (we don't know the parent's alias until then).
#[derive(Debug, Clone)]
struct RawRelation {
    local_field: CompactString,
    operator: Operator,
    external_alias: CompactString,
    external_field: CompactString,
}

/// Fluent schema builder for one branch (the root, or any descendant).
pub struct BranchBuilder {
    alias: CompactString,
    name: CompactString,
    source: Arc<dyn Source>,
    join: JoinDirection,
    slice: bool,
    anonymous: bool,
    is_cte: bool,
    fields: Vec<FieldSpec>,
    relations: Vec<RawRelation>,
    limit: Option<i64>,
    offset: Option<i64>,
    select: Vec<CompactString>,
    distinct: Vec<CompactString>,
    order_by: Vec<(CompactString, Direction)>,
    group_by: Vec<CompactString>,
    children: Vec<BranchBuilder>,
}

impl BranchBuilder {
    pub fn new(alias: impl Into<CompactString>, source: impl Source + 'static) -> Self {
        let alias = alias.into();
        BranchBuilder {
            name: alias.clone(),
            alias,
            source: Arc::new(source),
            join: JoinDirection::Left,
            slice: false,
            anonymous: false,
            is_cte: false,
            fields: Vec::new(),
            relations: Vec::new(),
            limit: None,
            offset: None,
            select: Vec::new(),
            distinct: Vec::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Display name, when it should differ from the alias.
    pub fn name(mut self, name: impl Into<CompactString>) -> Self {
        self.name = name.into();
        self
    }

    pub fn join(mut self, direction: JoinDirection) -> Self {
        self.join = direction;
        self
    }

    /// Marks this branch as producing a JSON array (`liqu:"slice"`
    /// equivalent — a `[]T` field in the source system).
    pub fn slice(mut self) -> Self {
        self.slice = true;
        self
    }

    /// Embedded shape: selected columns are emitted directly rather than
    /// wrapped in a `jsonb_build_object`/`to_jsonb` envelope.
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    /// `liqu:"cte"` — emit as a CTE prologue entry instead of an inline
    /// lateral join.
    pub fn cte(mut self) -> Self {
        self.is_cte = true;
        self
    }

    /// `db:"name"` default: physical column is `snake_case(shape_name)`.
    pub fn field(mut self, shape_name: impl Into<CompactString>) -> Self {
        let shape_name = shape_name.into();
        let column = CompactString::from(snake_case(&shape_name));
        self.fields.push(FieldSpec {
            shape_name,
            column,
            sql_type: CompactString::from("text"),
        });
        self
    }

    /// `db:"name"` explicit override.
    pub fn field_db(mut self, shape_name: impl Into<CompactString>, column: impl Into<CompactString>) -> Self {
        self.fields.push(FieldSpec {
            shape_name: shape_name.into(),
            column: column.into(),
            sql_type: CompactString::from("text"),
        });
        self
    }

    /// Overrides the SQL type tag of a field already declared via
    /// [`BranchBuilder::field`]/[`BranchBuilder::field_db`] (spec §3
    /// registry entry's `fieldTypes`). A no-op if `shape_name` wasn't
    /// already declared.
    pub fn field_type(mut self, shape_name: impl AsRef<str>, sql_type: impl Into<CompactString>) -> Self {
        let shape_name = shape_name.as_ref();
        if let Some(f) = self.fields.iter_mut().find(|f| f.shape_name == shape_name) {
            f.sql_type = sql_type.into();
        }
        self
    }

    /// `related:"A.f<op>B.g"` — parsed eagerly; resolved against the
    /// registry (and the parent alias, for `is_parent`) at `build()`.
    pub fn related_str(mut self, atom: &str) -> Result<Self> {
        let (local_field, operator, external_alias, external_field) =
            parse_relation_atom(atom, &self.alias)?;
        self.relations.push(RawRelation {
            local_field,
            operator,
            external_alias,
            external_field,
        });
        Ok(self)
    }

    /// Structured equivalent of `related_str`, for callers that already
    /// have the parts in hand.
    pub fn related(
        mut self,
        local_field: impl Into<CompactString>,
        operator: Operator,
        external_alias: impl Into<CompactString>,
        external_field: impl Into<CompactString>,
    ) -> Self {
        self.relations.push(RawRelation {
            local_field: local_field.into(),
            operator,
            external_alias: external_alias.into(),
            external_field: external_field.into(),
        });
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: i64) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn select(mut self, fields: impl IntoIterator<Item = impl Into<CompactString>>) -> Self {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn distinct(mut self, fields: impl IntoIterator<Item = impl Into<CompactString>>) -> Self {
        self.distinct = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by(mut self, field: impl Into<CompactString>, direction: Direction) -> Self {
        self.order_by.push((field.into(), direction));
        self
    }

    pub fn group_by(mut self, field: impl Into<CompactString>) -> Self {
        self.group_by.push(field.into());
        self
    }

    pub fn child(mut self, child: BranchBuilder) -> Self {
        self.children.push(child);
        self
    }

    /// Scan this builder tree into an immutable [`Schema`] (spec §4.4).
    /// This is the root entry point — call it on the root branch.
    pub fn build_schema(self) -> Result<Schema> {
        let mut branches = HashMap::new();
        let mut registry = HashMap::new();
        let mut next_id = 0u32;
        let root = compile_branch(self, None, &mut next_id, &mut branches, &mut registry)?;
        resolve_relations(&mut branches, &registry)?;
        Ok(Schema {
            root,
            branches,
            registry,
        })
    }
}

fn compile_branch(
    builder: BranchBuilder,
    parent: Option<BranchId>,
    next_id: &mut u32,
    branches: &mut HashMap<BranchId, CompiledBranch>,
    registry: &mut HashMap<CompactString, RegistryEntry>,
) -> Result<BranchId> {
    let id = BranchId(*next_id);
    *next_id += 1;

    if registry.contains_key(builder.alias.as_str()) {
        return Err(ShapeQlError::InvalidShape(CompactString::from(format!(
            "duplicate branch alias: {}",
            builder.alias
        ))));
    }

    let mut field_database: HashMap<CompactString, CompactString> = builder
        .fields
        .iter()
        .map(|f| (f.shape_name.clone(), f.column.clone()))
        .collect();
    let mut field_types: HashMap<CompactString, CompactString> = builder
        .fields
        .iter()
        .map(|f| (f.shape_name.clone(), f.sql_type.clone()))
        .collect();

    // Primary keys are always selected (spec invariant); auto-declare any
    // that the caller didn't already add via `.field()`.
    let mut primary_keys: Vec<CompactString> = Vec::new();
    for pk in builder.source.primary_keys() {
        let existing = field_database
            .keys()
            .find(|k| k.eq_ignore_ascii_case(pk))
            .cloned();
        match existing {
            Some(shape_name) => primary_keys.push(shape_name),
            None => {
                let shape_name = CompactString::from(*pk);
                field_database.insert(shape_name.clone(), CompactString::from(snake_case(pk)));
                field_types.insert(shape_name.clone(), CompactString::from("text"));
                primary_keys.push(shape_name);
            }
        }
    }

    let initial_select = if builder.select.is_empty() {
        primary_keys.clone()
    } else {
        builder.select.clone()
    };

    for field in initial_select.iter().chain(builder.distinct.iter()) {
        if !field_database.contains_key(field) {
            return Err(ShapeQlError::UnknownField(CompactString::from(format!(
                "{}.{}",
                builder.alias, field
            ))));
        }
    }

    let compiled_relations: Vec<RelationSpec> = builder
        .relations
        .iter()
        .map(|r| RelationSpec {
            local_field: r.local_field.clone(),
            operator: r.operator,
            external_alias: r.external_alias.clone(),
            external_field: r.external_field.clone(),
            is_parent: false, // resolved in `resolve_relations` once the tree is complete
        })
        .collect();

    registry.insert(
        builder.alias.clone(),
        RegistryEntry {
            field_database: field_database.clone(),
            field_types: field_types.clone(),
            table: builder.source.table_name(),
            branch_id: id,
        },
    );

    let mut compiled = CompiledBranch {
        id,
        alias: builder.alias.clone(),
        name: builder.name.clone(),
        table: builder.source.table_name(),
        parent,
        children: Vec::new(),
        primary_keys,
        field_database,
        field_types,
        relations: compiled_relations,
        join: builder.join,
        slice: builder.slice,
        anonymous: builder.anonymous,
        is_cte: builder.is_cte,
        limit: builder.limit,
        offset: builder.offset,
        initial_select,
        initial_distinct: builder.distinct.clone(),
        initial_order_by: builder.order_by.clone(),
        initial_group_by: builder.group_by.clone(),
    };

    let mut child_ids = Vec::with_capacity(builder.children.len());
    for child in builder.children {
        let child_id = compile_branch(child, Some(id), next_id, branches, registry)?;
        child_ids.push(child_id);
    }
    compiled.children = child_ids;

    branches.insert(id, compiled);
    Ok(id)
}

/// Second pass: now that every alias is known, compute `is_parent` and
/// reject relations whose external alias doesn't exist (spec invariant:
/// "a relation's externalBranchAlias must exist in the registry").
fn resolve_relations(
    branches: &mut HashMap<BranchId, CompiledBranch>,
    registry: &HashMap<CompactString, RegistryEntry>,
) -> Result<()> {
    let parents: HashMap<BranchId, Option<BranchId>> =
        branches.iter().map(|(id, b)| (*id, b.parent)).collect();
    let alias_by_id: HashMap<BranchId, CompactString> =
        branches.iter().map(|(id, b)| (*id, b.alias.clone())).collect();

    for branch in branches.values_mut() {
        let parent_alias = parents
            .get(&branch.id)
            .and_then(|p| *p)
            .and_then(|pid| alias_by_id.get(&pid).cloned());

        for relation in &mut branch.relations {
            if !branch.field_database.contains_key(relation.local_field.as_str()) {
                return Err(ShapeQlError::InvalidRelation(CompactString::from(format!(
                    "{}: local field {} is not declared on this branch",
                    branch.alias, relation.local_field
                ))));
            }
            let external = registry.get(relation.external_alias.as_str()).ok_or_else(|| {
                ShapeQlError::InvalidRelation(CompactString::from(format!(
                    "{}: unknown external alias {}",
                    branch.alias, relation.external_alias
                )))
            })?;
            if !external
                .field_database
                .contains_key(relation.external_field.as_str())
            {
                return Err(ShapeQlError::InvalidRelation(CompactString::from(format!(
                    "{}: external field {}.{} is not declared",
                    branch.alias, relation.external_alias, relation.external_field
                ))));
            }
            relation.is_parent = parent_alias.as_deref() == Some(relation.external_alias.as_str());
        }
    }
    Ok(())
}

const OPERATOR_TOKENS: [&str; 7] = ["<>", "!=", "<=", ">=", "=", "<", ">"];

/// Parse a single `A.f<op>B.g` atom, requiring `current_alias` to appear
/// on exactly one side (swapping so the local side always comes first).
fn parse_relation_atom(
    atom: &str,
    current_alias: &str,
) -> Result<(CompactString, Operator, CompactString, CompactString)> {
    let atom = atom.trim();
    let (op_str, op_pos) = OPERATOR_TOKENS
        .iter()
        .find_map(|op| atom.find(op).map(|pos| (*op, pos)))
        .ok_or_else(|| {
            ShapeQlError::InvalidRelation(CompactString::from(format!(
                "no operator found in relation atom: {atom}"
            )))
        })?;
    let operator = Operator::from_str(op_str).ok_or_else(|| {
        ShapeQlError::InvalidRelation(CompactString::from(format!("bad operator in: {atom}")))
    })?;

    let (left, right) = (
        atom[..op_pos].trim(),
        atom[op_pos + op_str.len()..].trim(),
    );

    let split = |side: &str| -> Result<(CompactString, CompactString)> {
        let (alias, field) = side.split_once('.').ok_or_else(|| {
            ShapeQlError::InvalidRelation(CompactString::from(format!(
                "expected Alias.Field in relation atom, got: {side}"
            )))
        })?;
        Ok((CompactString::from(alias), CompactString::from(field)))
    };

    let (left_alias, left_field) = split(left)?;
    let (right_alias, right_field) = split(right)?;

    if left_alias == current_alias {
        Ok((left_field, operator, right_alias, right_field))
    } else if right_alias == current_alias {
        Ok((right_field, operator, left_alias, left_field))
    } else {
        Err(ShapeQlError::InvalidRelation(CompactString::from(format!(
            "relation atom {atom} does not reference current branch {current_alias}"
        ))))
    }
}

/// Validates that a branch's field set has no duplicate shape-names,
/// used by callers constructing fields programmatically.
pub fn assert_unique_fields(fields: &[&str]) -> Result<()> {
    let mut seen = HashSet::new();
    for f in fields {
        if !seen.insert(*f) {
            return Err(ShapeQlError::InvalidShape(CompactString::from(format!(
                "duplicate field: {f}"
            ))));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestSource {
        table: &'static str,
        pks: &'static [&'static str],
    }
    impl Source for TestSource {
        fn table_name(&self) -> &'static str {
            self.table
        }
        fn primary_keys(&self) -> &'static [&'static str] {
            self.pks
        }
    }

    #[test]
    fn parses_relation_atom_with_current_on_left() {
        let (local, op, alias, field) =
            parse_relation_atom("ProjectTags.ProjectID=Project.ID", "ProjectTags").unwrap();
        assert_eq!(local, "ProjectID");
        assert_eq!(op, Operator::Eq);
        assert_eq!(alias, "Project");
        assert_eq!(field, "ID");
    }

    #[test]
    fn parses_relation_atom_with_current_on_right_and_swaps() {
        let (local, _op, alias, field) =
            parse_relation_atom("Project.ID=ProjectTags.ProjectID", "ProjectTags").unwrap();
        assert_eq!(local, "ProjectID");
        assert_eq!(alias, "Project");
        assert_eq!(field, "ID");
    }

    #[test]
    fn rejects_atom_not_mentioning_current_branch() {
        let err = parse_relation_atom("A.x=B.y", "C").unwrap_err();
        assert!(matches!(err, ShapeQlError::InvalidRelation(_)));
    }

    #[test]
    fn builds_simple_two_branch_schema() {
        let root = BranchBuilder::new(
            "Project",
            TestSource {
                table: "project",
                pks: &["ID"],
            },
        )
        .field("ID")
        .child(
            BranchBuilder::new(
                "ProjectTags",
                TestSource {
                    table: "project_tag",
                    pks: &["ID"],
                },
            )
            .slice()
            .field("ID")
            .field("ProjectID")
            .related_str("ProjectTags.ProjectID=Project.ID")
            .unwrap(),
        );

        let schema = root.build_schema().unwrap();
        assert_eq!(schema.branches.len(), 2);
        let tags_id = schema.alias_to_id("ProjectTags").unwrap();
        let tags = schema.branch(tags_id);
        assert!(tags.relations[0].is_parent);
    }
}
