//! Applies a parsed `where`/`order_by`/`select` filter onto a [`crate::plan::Plan`].
//!
//! A branch's own builder accumulates clauses as plain text rather than
//! through [`ConditionBuilder`]'s typed helpers here: the grammar's
//! combinator tree doesn't map onto one target's builder until its
//! leaves are known, so the tree is rendered to SQL text first (pushing
//! bind values into the plan's shared [`ParamSink`] as it goes) and
//! attached as a single `and_raw`/`or_raw` clause.

pub mod grammar;

use std::collections::{HashMap, HashSet};

use compact_str::CompactString;

use crate::condition::{Combinator as CondCombinator, ConditionBuilder, Operator, ParamSink};
use crate::error::{Result, ShapeQlError};
use crate::filter::grammar::{Combinator, OrderSpec, SelectSpec, WhereAtom, WhereNode};
use crate::order::Direction;
use crate::plan::Plan;
use crate::value::SqlValue;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TargetKey {
    Branch(CompactString),
    Cte(CompactString),
}

fn atom_target(atom: &WhereAtom, root_alias: &str) -> TargetKey {
    match &atom.cte_alias {
        Some(c) => TargetKey::Cte(c.clone()),
        None => TargetKey::Branch(atom.model.clone().unwrap_or_else(|| CompactString::from(root_alias))),
    }
}

fn collect_targets(node: &WhereNode, root_alias: &str, out: &mut HashSet<TargetKey>) {
    match node {
        WhereNode::Atom(a) => {
            out.insert(atom_target(a, root_alias));
        }
        WhereNode::Nested { children, .. } => {
            for c in children {
                collect_targets(c, root_alias, out);
            }
        }
    }
}

fn collect_fields(node: &WhereNode, out: &mut Vec<CompactString>) {
    match node {
        WhereNode::Atom(a) => out.push(a.field.clone()),
        WhereNode::Nested { children, .. } => {
            for c in children {
                collect_fields(c, out);
            }
        }
    }
}

/// Apply a parsed `where` tree to every branch/CTE it touches.
pub fn apply_where(plan: &mut Plan, node: &WhereNode) -> Result<()> {
    let root_alias = plan.schema.branch(plan.schema.root).alias.clone();
    distribute(plan, node, CondCombinator::And, &root_alias)
}

fn distribute(plan: &mut Plan, node: &WhereNode, combinator: CondCombinator, root_alias: &str) -> Result<()> {
    match node {
        WhereNode::Atom(atom) => attach(plan, &atom_target(atom, root_alias), node, combinator, root_alias),
        WhereNode::Nested {
            combinator: Combinator::And,
            children,
        } => {
            for child in children {
                distribute(plan, child, CondCombinator::And, root_alias)?;
            }
            Ok(())
        }
        WhereNode::Nested {
            combinator: Combinator::Or,
            ..
        } => {
            let mut targets = HashSet::new();
            collect_targets(node, root_alias, &mut targets);
            if targets.len() != 1 {
                return Err(ShapeQlError::MalformedFilter {
                    message: CompactString::from(
                        "OR group spans more than one branch/CTE; each branch's predicate is its own independent lateral WHERE, so a cross-branch OR cannot be expressed as one boolean tree",
                    ),
                    position: 0,
                });
            }
            let target = targets.into_iter().next().unwrap();
            attach(plan, &target, node, combinator, root_alias)
        }
    }
}

fn attach(plan: &mut Plan, target: &TargetKey, node: &WhereNode, combinator: CondCombinator, _root_alias: &str) -> Result<()> {
    let params = plan.params.clone();
    match target {
        TargetKey::Branch(alias) => {
            let branch_id = plan
                .schema
                .alias_to_id(alias)
                .ok_or_else(|| ShapeQlError::UnknownField(alias.clone()))?;
            plan.mark_searched(branch_id);
            let table = plan.schema.branch(branch_id).table;
            let field_db = plan.schema.branch(branch_id).field_database.clone();
            let is_root = branch_id == plan.schema.root;
            let pb = plan.branch_mut(branch_id);
            let rendered = render_node(node, &field_db, table, &params, &pb.where_builder)?;
            let mut fields = Vec::new();
            collect_fields(node, &mut fields);
            pb.referenced.extend(fields.iter().cloned());
            // spec §4.5: a filter touching a non-root branch also pulls the
            // filtered field into that branch's own selected set.
            if !is_root {
                pb.selected.extend(fields);
            }
            if let Some(text) = rendered {
                let builder = std::mem::replace(&mut pb.where_builder, ConditionBuilder::new(params));
                pb.where_builder = match combinator {
                    CondCombinator::And => builder.and_raw(text),
                    CondCombinator::Or => builder.or_raw(text),
                };
            }
            Ok(())
        }
        TargetKey::Cte(alias) => {
            let cte = plan
                .ctes
                .get(alias.as_str())
                .ok_or_else(|| ShapeQlError::InvalidCTEReference(alias.clone()))?;
            let field_db = cte.field_database.clone();
            let table = cte.base_table.clone();
            let rendered = render_node(node, &field_db, &table, &params, &cte.where_builder)?;
            if let Some(text) = rendered {
                let cte = plan.ctes.get_mut(alias.as_str()).unwrap();
                let builder = std::mem::replace(&mut cte.where_builder, ConditionBuilder::new(params));
                cte.where_builder = match combinator {
                    CondCombinator::And => builder.and_raw(text),
                    CondCombinator::Or => builder.or_raw(text),
                };
                cte.touched = true;
            }
            Ok(())
        }
    }
}

fn render_node(
    node: &WhereNode,
    field_db: &HashMap<CompactString, CompactString>,
    table: &str,
    params: &ParamSink,
    builder: &ConditionBuilder,
) -> Result<Option<String>> {
    match node {
        WhereNode::Atom(atom) => render_atom(atom, field_db, table, params, builder),
        WhereNode::Nested { combinator, children } => {
            let mut parts = Vec::new();
            for child in children {
                if let Some(part) = render_node(child, field_db, table, params, builder)? {
                    parts.push(part);
                }
            }
            if parts.is_empty() {
                Ok(None)
            } else {
                let sep = match combinator {
                    Combinator::And => " AND ",
                    Combinator::Or => " OR ",
                };
                Ok(Some(format!("({})", parts.join(sep))))
            }
        }
    }
}

fn render_atom(
    atom: &WhereAtom,
    field_db: &HashMap<CompactString, CompactString>,
    table: &str,
    params: &ParamSink,
    builder: &ConditionBuilder,
) -> Result<Option<String>> {
    if builder.is_protected(atom.field.as_str()) {
        tracing::trace!(field = %atom.field, "protected column: ignoring user-supplied where atom");
        return Ok(None);
    }
    let column = field_db.get(atom.field.as_str()).cloned().ok_or_else(|| {
        ShapeQlError::UnknownField(CompactString::from(format!("{}.{}", table, atom.field)))
    })?;
    let qualified = crate::sql::quote_qualified(table, &column);
    Ok(Some(render_condition(&qualified, atom, params)))
}

fn render_condition(qualified: &str, atom: &WhereAtom, params: &ParamSink) -> String {
    match atom.operator {
        Operator::IsNull => format!("{qualified} IS NULL"),
        Operator::IsNotNull => format!("{qualified} IS NOT NULL"),
        Operator::In | Operator::NotIn => {
            let keyword = if atom.operator == Operator::In { "IN" } else { "NOT IN" };
            let placeholders: Vec<String> = atom
                .value_list()
                .into_iter()
                .map(|v| format!("${}", params.push(SqlValue::Text(CompactString::from(v)))))
                .collect();
            if placeholders.is_empty() {
                format!("{qualified} {keyword} (NULL)")
            } else {
                format!("{qualified} {keyword} ({})", placeholders.join(","))
            }
        }
        Operator::Any | Operator::NotAny => {
            let values: Vec<SqlValue> = atom
                .value_list()
                .into_iter()
                .map(|v| SqlValue::Text(CompactString::from(v)))
                .collect();
            let idx = params.push(SqlValue::Array(values));
            if atom.operator == Operator::Any {
                format!("{qualified} && ${idx}")
            } else {
                format!("NOT({qualified} && ${idx})")
            }
        }
        Operator::Between | Operator::NotBetween => {
            let values = atom.value_list();
            let low = values.first().copied().unwrap_or("");
            let high = values.get(1).copied().unwrap_or("");
            let lo = params.push(SqlValue::Text(CompactString::from(low)));
            let hi = params.push(SqlValue::Text(CompactString::from(high)));
            let keyword = if atom.operator == Operator::Between {
                "BETWEEN"
            } else {
                "NOT BETWEEN"
            };
            format!("({qualified} {keyword} ${lo} AND ${hi})")
        }
        op => {
            let idx = params.push(SqlValue::Text(atom.raw_value.clone()));
            format!("{qualified} {} ${idx}", op.as_sql())
        }
    }
}

/// Apply a parsed `order_by` list, qualifying columns against the schema.
pub fn apply_order_by(plan: &mut Plan, specs: &[OrderSpec]) -> Result<()> {
    for spec in specs {
        let branch_id = plan
            .schema
            .alias_to_id(&spec.model)
            .ok_or_else(|| ShapeQlError::UnknownField(spec.model.clone()))?;
        let (table, column) = {
            let compiled = plan.schema.branch(branch_id);
            let column = compiled
                .field_database
                .get(spec.field.as_str())
                .cloned()
                .ok_or_else(|| {
                    ShapeQlError::UnknownField(CompactString::from(format!(
                        "{}.{}",
                        spec.model, spec.field
                    )))
                })?;
            (compiled.table, column)
        };
        let qualified = crate::sql::quote_qualified(table, &column);
        plan.branch_mut(branch_id).order_by.set(qualified.clone(), spec.direction);
        // spec §4.5: ordering on a column also enters that branch's GROUP BY.
        plan.branch_mut(branch_id).group_by.add(qualified);
        plan.reference_field(branch_id, spec.field.clone());
    }
    Ok(())
}

/// Apply a parsed `select` list, expanding `Model.*` wildcards against
/// the schema's declared fields.
///
/// spec §4.5: "The first select clause resets the model's selected field
/// set to its primary keys before applying" — so a caller-supplied
/// `select` string for a model starts from that model's primary keys
/// rather than accumulating on top of whatever defaults already chose.
pub fn apply_select(plan: &mut Plan, specs: &[SelectSpec]) -> Result<()> {
    let mut reset: HashSet<CompactString> = HashSet::new();
    for spec in specs {
        let branch_id = plan
            .schema
            .alias_to_id(&spec.model)
            .ok_or_else(|| ShapeQlError::UnknownField(spec.model.clone()))?;
        if reset.insert(spec.model.clone()) {
            let pks: HashSet<CompactString> = plan
                .schema
                .branch(branch_id)
                .primary_keys
                .iter()
                .cloned()
                .collect();
            plan.branch_mut(branch_id).selected = pks;
        }
        if spec.is_wildcard() {
            let fields: Vec<(CompactString, CompactString)> = plan
                .schema
                .branch(branch_id)
                .field_database
                .iter()
                .map(|(f, c)| (f.clone(), c.clone()))
                .collect();
            let table = plan.schema.branch(branch_id).table;
            for (field, column) in fields {
                plan.select_field(branch_id, field);
                // spec §4.7: each selected column also enters GROUP BY.
                let qualified = crate::sql::quote_qualified(table, &column);
                plan.branch_mut(branch_id).group_by.add(qualified);
            }
        } else {
            let column = {
                let compiled = plan.schema.branch(branch_id);
                compiled.field_database.get(spec.field.as_str()).cloned()
            };
            let Some(column) = column else {
                return Err(ShapeQlError::UnknownField(CompactString::from(format!(
                    "{}.{}",
                    spec.model, spec.field
                ))));
            };
            plan.select_field(branch_id, spec.field.clone());
            let table = plan.schema.branch(branch_id).table;
            let qualified = crate::sql::quote_qualified(table, &column);
            plan.branch_mut(branch_id).group_by.add(qualified);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::grammar::parse_where;
    use crate::schema::builder::BranchBuilder;
    use crate::schema::{JoinDirection, Source};
    use std::sync::Arc;

    struct Project;
    impl Source for Project {
        fn table_name(&self) -> &'static str {
            "project"
        }
        fn primary_keys(&self) -> &'static [&'static str] {
            &["ID"]
        }
    }

    struct Tag;
    impl Source for Tag {
        fn table_name(&self) -> &'static str {
            "tag"
        }
        fn primary_keys(&self) -> &'static [&'static str] {
            &["ID"]
        }
    }

    fn sample_plan() -> Plan {
        let child = BranchBuilder::new("Tag", Tag)
            .join(JoinDirection::Left)
            .field("ProjectID")
            .related_str("Tag.ProjectID=Project.ID")
            .unwrap();
        let root = BranchBuilder::new("Project", Project).field("Name").child(child);
        let schema = Arc::new(root.build_schema().unwrap());
        Plan::new(schema)
    }

    #[test]
    fn applies_simple_atom_to_branch() {
        let mut plan = sample_plan();
        let node = parse_where("Project.Name|=|Acme").unwrap();
        apply_where(&mut plan, &node).unwrap();
        let id = plan.schema.alias_to_id("Project").unwrap();
        assert_eq!(plan.branch(id).where_builder.build(), r#""project"."name" = $1"#);
    }

    #[test]
    fn searching_child_branch_promotes_to_inner_and_guards_root() {
        let mut plan = sample_plan();
        let node = parse_where("Tag.ID|=|5").unwrap();
        apply_where(&mut plan, &node).unwrap();
        let tag_id = plan.schema.alias_to_id("Tag").unwrap();
        assert_eq!(plan.branch(tag_id).join, JoinDirection::Inner);
        assert!(plan.root_guards.contains("Tag"));
    }

    #[test]
    fn rejects_cross_branch_or() {
        let mut plan = sample_plan();
        let node = parse_where("OR(Project.Name|=|Acme,Tag.ID|=|5)").unwrap();
        let err = apply_where(&mut plan, &node).unwrap_err();
        assert!(matches!(err, ShapeQlError::MalformedFilter { .. }));
    }

    #[test]
    fn same_branch_or_group_renders_nested_parens() {
        let mut plan = sample_plan();
        let node = parse_where("OR(Project.Name|=|Acme,Project.Name|=|Beta)").unwrap();
        apply_where(&mut plan, &node).unwrap();
        let id = plan.schema.alias_to_id("Project").unwrap();
        assert_eq!(
            plan.branch(id).where_builder.build(),
            r#"("project"."name" = $1 OR "project"."name" = $2)"#
        );
    }
}
