//! Compiles a [`crate::plan::Plan`] into one parameterized SQL string
//! (spec §4.7 "Tree emitter").
//!
//! Each branch becomes a `LATERAL` derived table correlated against its
//! parent; a `slice` branch aggregates its rows with `jsonb_agg`, a
//! singular nested branch picks a single row via `to_jsonb` and an
//! implicit `LIMIT 1`. A non-root branch flattens its own columns and
//! its descendants' aliases into one object. The root is asymmetric: its
//! own SELECT is built separately ([`render_root_own`]) and wrapped in
//! `to_jsonb("<RootAlias>") AS "<RootAlias>"`, a SIBLING of each direct
//! child's alias column rather than a container for them
//! ([`render_root_combine`]) — a caller's JSON has `{"Project": {...},
//! "Tags": [...]}`, not `{"Project": {..., "Tags": [...]}}`. Only the
//! outermost wrapper turns the result into a JSON document
//! (`coalesce(to_jsonb(q),'{}')` for a single root, `coalesce(jsonb_agg(q),
//! '[]')` for a paged one), which is what a caller actually decodes. A
//! slice root's `count(*) OVER() AS "TotalRows"` lives inside that same
//! inner query so it rides along as a key on every row of the aggregated
//! JSON array; `Request::post_process` is what later strips it back out
//! into [`crate::filters::Filters`]. An `anonymous` branch skips its own
//! envelope and merges its selected columns straight into the parent's
//! SELECT list instead.

use std::collections::HashMap;

use crate::plan::Plan;
use crate::schema::{BranchId, CompiledBranch};
use crate::sql::quote_qualified;

/// Compile the full request into one SQL string, bind parameters living
/// in `plan.params` (read via [`crate::condition::ParamSink::snapshot`]).
#[tracing::instrument(level = "trace", skip(plan))]
pub fn emit(plan: &Plan) -> String {
    let root_id = plan.schema.root;
    let root_compiled = plan.schema.branch(root_id);

    let (schema_cte_sql, schema_cte_where) = schema_cte_prologue(plan);

    let inner = if root_compiled.anonymous {
        // An anonymous root has no alias key of its own to nest under
        // (spec §4.7 step 2: "root alias reference (or the anonymous
        // fields)"), so it keeps the flat single-level body.
        let mut body = render_body(plan, root_id, None, false, &schema_cte_where);
        if root_compiled.slice {
            body.select_items.insert(0, "count(*) OVER() AS TotalRows".to_string());
        }
        body.into_sql()
    } else {
        // spec §4.7 "Root": 1) the root's own SELECT over its physical
        // table; 2) combine root-level SELECTs — the root alias
        // reference plus one column per child alias threaded through
        // the lateral joins, as *siblings* of the root's own key, not
        // flattened into it.
        let own_sql = render_root_own(plan, root_id, &schema_cte_where).into_sql();
        let mut combined = render_root_combine(plan, root_id, own_sql, &schema_cte_where);
        if root_compiled.slice {
            // Deliberately unquoted (unlike every other alias this emitter
            // produces): Postgres folds an unquoted identifier to lowercase,
            // so the resulting JSON key is "totalrows" — the exact key
            // `Request::post_process` strips back out (spec §6).
            combined
                .select_items
                .insert(0, "count(*) OVER() AS TotalRows".to_string());
        }
        combined.into_sql()
    };

    let mut sql = if root_compiled.anonymous {
        let projection = body_anonymous_projection(root_compiled);
        if root_compiled.slice {
            format!("SELECT coalesce(jsonb_agg({projection}),'[]') FROM ( {inner} ) q")
        } else {
            format!("SELECT {projection} FROM ( {inner} ) q LIMIT 1")
        }
    } else if root_compiled.slice {
        let order = root_order_by_parent(plan, root_id);
        format!("SELECT coalesce(jsonb_agg(q{order}),'[]') FROM ( {inner} ) q")
    } else {
        format!("SELECT coalesce(to_jsonb(q),'{{}}') FROM ( {inner} ) q")
    };

    let mut aliases: Vec<&str> = plan.ctes.keys().map(|k| k.as_str()).collect();
    aliases.sort_unstable();
    let mut prologue: Vec<String> = aliases.iter().map(|a| plan.ctes[*a].render()).collect();
    prologue.extend(schema_cte_sql);
    if !prologue.is_empty() {
        sql = format!("WITH {} {sql}", prologue.join(", "));
    }

    sql
}

fn body_anonymous_projection(compiled: &CompiledBranch) -> String {
    let mut fields: Vec<&str> = compiled.initial_select.iter().map(|f| f.as_str()).collect();
    fields.sort_unstable();
    if fields.len() == 1 {
        format!(r#"q."{}""#, fields[0])
    } else {
        "to_jsonb(q)".to_string()
    }
}

/// The root's own ORDER BY, rewritten against the outer JSON keys (the
/// shape field names a caller decodes) rather than the inner query's
/// qualified physical columns, and applied to the outer `jsonb_agg` call
/// so paging order survives aggregation (spec §4.7's "order-by-parent
/// rewrite"). Since the root's own fields now live nested under its own
/// alias key (`q."<alias>"`, a jsonb object), the rewrite reaches into
/// that object with `->` rather than referencing a flat `q."Field"`
/// column.
fn root_order_by_parent(plan: &Plan, root_id: BranchId) -> String {
    let compiled = plan.schema.branch(root_id);
    let pb = plan.branch(root_id);
    let order_sql = pb.order_by.build();
    if order_sql.is_empty() {
        return String::new();
    }
    let mut reverse = std::collections::HashMap::new();
    for (field, column) in &compiled.field_database {
        reverse.insert(column.as_str(), field.as_str());
    }
    let alias = &compiled.alias;
    let rewritten: Vec<String> = order_sql
        .split(", ")
        .filter_map(|entry| {
            let (qualified, dir) = entry.rsplit_once(' ')?;
            let column = qualified.rsplit('.').next()?.trim_matches('"');
            let field = reverse.get(column)?;
            Some(format!(r#"(q."{alias}"->'{field}') {dir}"#))
        })
        .collect();
    if rewritten.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", rewritten.join(", "))
    }
}

/// A branch's own rendered `SELECT ... FROM "table" ...` fragment,
/// split so the caller (root emission) can splice in `TotalRows` before
/// joining the final select list.
struct Body {
    select_items: Vec<String>,
    distinct_on: Vec<String>,
    from: String,
    joins: Vec<String>,
    where_parts: Vec<String>,
    group_by: String,
    order_by: String,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl Body {
    fn into_sql(self) -> String {
        let distinct = if self.distinct_on.is_empty() {
            String::new()
        } else {
            format!("DISTINCT ON ({}) ", self.distinct_on.join(", "))
        };
        let mut sql = format!(
            r#"SELECT {distinct}{} FROM {}"#,
            self.select_items.join(", "),
            self.from
        );
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.where_parts.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_parts.join(" AND "));
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by);
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by);
        }
        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }
        if let Some(o) = self.offset {
            sql.push_str(&format!(" OFFSET {o}"));
        }
        sql
    }
}

/// Render every `liqu:"cte"`-tagged branch (spec §4.4) as its own
/// `WITH` prologue entry, and collect the correlation predicate its
/// parent needs in its WHERE clause — the membership test that
/// replaces the lateral join a non-CTE child would otherwise get
/// (spec §4.6: a CTE is computed once, not per parent row).
fn schema_cte_prologue(plan: &Plan) -> (Vec<String>, HashMap<BranchId, Vec<String>>) {
    let mut rendered = Vec::new();
    let mut parent_where: HashMap<BranchId, Vec<String>> = HashMap::new();

    let mut cte_branches: Vec<BranchId> = plan
        .schema
        .branches
        .values()
        .filter(|b| b.is_cte)
        .map(|b| b.id)
        .collect();
    cte_branches.sort_by_key(|id| id.0);

    for id in cte_branches {
        let compiled = plan.schema.branch(id);
        let Some(relation) = compiled.relations.iter().find(|r| r.is_parent) else {
            continue;
        };
        let local_col = compiled.field_database[&relation.local_field].clone();

        let mut body = render_body(plan, id, None, false, &HashMap::new());
        body.select_items = vec![quote_qualified(compiled.table, &local_col)];
        let inner = body.into_sql();
        rendered.push(format!(r#""{}" AS ( {inner} )"#, compiled.alias));

        if let Some(parent_id) = compiled.parent {
            let parent_compiled = plan.schema.branch(parent_id);
            let parent_col = &parent_compiled.field_database[&relation.external_field];
            let predicate = format!(
                "{} {} (SELECT * FROM \"{}\")",
                quote_qualified(parent_compiled.table, parent_col),
                relation.operator.as_sql(),
                compiled.alias
            );
            parent_where.entry(parent_id).or_default().push(predicate);
        }
    }

    (rendered, parent_where)
}

#[tracing::instrument(level = "trace", skip(plan, correlation, schema_cte_where))]
fn render_body(
    plan: &Plan,
    id: BranchId,
    correlation: Option<String>,
    force_limit_one: bool,
    schema_cte_where: &HashMap<BranchId, Vec<String>>,
) -> Body {
    let compiled = plan.schema.branch(id);
    let pb = plan.branch(id);

    let mut fields: Vec<&str> = pb.selected.iter().map(|f| f.as_str()).collect();
    fields.sort_unstable();

    let mut select_items: Vec<String> = fields
        .into_iter()
        .map(|field| render_select_item(compiled, pb, field))
        .collect();

    let mut join_clauses: Vec<String> = Vec::new();
    let mut children: Vec<BranchId> = compiled.children.clone();
    children.sort_by_key(|c| c.0);
    for child_id in children {
        let child_compiled = plan.schema.branch(child_id);
        if child_compiled.is_cte {
            continue;
        }
        let correlation = child_compiled.relations.iter().find(|r| r.is_parent).map(|r| {
            let local_col = &child_compiled.field_database[&r.local_field];
            let parent_col = &compiled.field_database[&r.external_field];
            format!(
                "{} = {}",
                quote_qualified(child_compiled.table, local_col),
                quote_qualified(compiled.table, parent_col)
            )
        });

        if child_compiled.anonymous {
            let mut child_fields: Vec<&str> = plan
                .branch(child_id)
                .selected
                .iter()
                .map(|f| f.as_str())
                .collect();
            child_fields.sort_unstable();
            let child_select: Vec<String> = child_fields
                .iter()
                .map(|field| render_select_item(child_compiled, plan.branch(child_id), field))
                .collect();
            let mut inner = format!(
                r#"SELECT {} FROM "{}""#,
                child_select.join(", "),
                child_compiled.table
            );
            if let Some(c) = &correlation {
                inner.push_str(" WHERE ");
                inner.push_str(c);
            }
            inner.push_str(" LIMIT 1");
            join_clauses.push(format!(
                r#"{} JOIN LATERAL ( {inner} ) AS "{alias}" ON TRUE"#,
                child_compiled.join.as_sql(),
                alias = child_compiled.alias
            ));
            for field in child_fields {
                select_items.push(format!(r#""{alias}"."{field}" AS "{field}""#, alias = child_compiled.alias));
            }
            continue;
        }

        let inner = render_body(plan, child_id, correlation, !child_compiled.slice, schema_cte_where).into_sql();
        let data_expr = if child_compiled.slice {
            "jsonb_agg(to_jsonb(t))"
        } else {
            "to_jsonb(t)"
        };
        join_clauses.push(format!(
            r#"{} JOIN LATERAL ( SELECT {data_expr} AS "data" FROM ( {inner} ) t ) AS "{alias}" ON TRUE"#,
            child_compiled.join.as_sql(),
            alias = child_compiled.alias
        ));
        select_items.push(format!(r#""{alias}"."data" AS "{alias}""#, alias = child_compiled.alias));
    }

    let mut where_parts: Vec<String> = Vec::new();
    if let Some(c) = correlation {
        where_parts.push(c);
    }
    let own_where = pb.where_builder.build();
    if !own_where.is_empty() {
        where_parts.push(own_where);
    }
    for link in plan.active_cte_links() {
        if link.branch_alias == compiled.alias {
            let local_col = &compiled.field_database[&link.local_field];
            where_parts.push(link.render(compiled.table, local_col));
        }
    }
    if let Some(extra) = schema_cte_where.get(&id) {
        where_parts.extend(extra.iter().cloned());
    }
    if id == plan.schema.root {
        let mut guards: Vec<&str> = plan.root_guards.iter().map(|a| a.as_str()).collect();
        guards.sort_unstable();
        for alias in guards {
            where_parts.push(format!(r#""{alias}"."data" IS NOT NULL"#));
        }
    }

    let group_by = render_group_by(compiled, pb);

    let order_by = pb.order_by.build();

    let mut distinct_fields: Vec<&str> = pb.distinct.iter().map(|f| f.as_str()).collect();
    distinct_fields.sort_unstable();
    let distinct_on: Vec<String> = distinct_fields
        .into_iter()
        .map(|field| {
            let column = &compiled.field_database[field];
            quote_qualified(compiled.table, column)
        })
        .collect();

    let (limit, offset) = if id == plan.schema.root && plan.root_limit.is_some() {
        (plan.root_limit, plan.root_offset)
    } else {
        (
            compiled.limit.or(if force_limit_one { Some(1) } else { None }),
            compiled.offset,
        )
    };

    Body {
        select_items,
        distinct_on,
        from: format!(r#""{}""#, compiled.table),
        joins: join_clauses,
        where_parts,
        group_by,
        order_by,
        limit,
        offset,
    }
}

/// The root's own SELECT over its physical table (spec §4.7 "Root" step
/// 1) — none of its children's lateral joins live here; those are
/// threaded in by [`render_root_combine`] one level up so the root's own
/// alias key wraps only the root's own fields.
fn render_root_own(plan: &Plan, root_id: BranchId, schema_cte_where: &HashMap<BranchId, Vec<String>>) -> Body {
    let compiled = plan.schema.branch(root_id);
    let pb = plan.branch(root_id);

    let mut fields: Vec<&str> = pb.selected.iter().map(|f| f.as_str()).collect();
    fields.sort_unstable();
    let select_items: Vec<String> = fields
        .into_iter()
        .map(|field| render_select_item(compiled, pb, field))
        .collect();

    let mut where_parts: Vec<String> = Vec::new();
    let own_where = pb.where_builder.build();
    if !own_where.is_empty() {
        where_parts.push(own_where);
    }
    for link in plan.active_cte_links() {
        if link.branch_alias == compiled.alias {
            let local_col = &compiled.field_database[&link.local_field];
            where_parts.push(link.render(compiled.table, local_col));
        }
    }
    if let Some(extra) = schema_cte_where.get(&root_id) {
        where_parts.extend(extra.iter().cloned());
    }

    let group_by = render_group_by(compiled, pb);
    let order_by = pb.order_by.build();

    let mut distinct_fields: Vec<&str> = pb.distinct.iter().map(|f| f.as_str()).collect();
    distinct_fields.sort_unstable();
    let distinct_on: Vec<String> = distinct_fields
        .into_iter()
        .map(|field| {
            let column = &compiled.field_database[field];
            quote_qualified(compiled.table, column)
        })
        .collect();

    Body {
        select_items,
        distinct_on,
        from: format!(r#""{}""#, compiled.table),
        joins: Vec::new(),
        where_parts,
        group_by,
        order_by,
        limit: None,
        offset: None,
    }
}

/// Combines the root's own alias reference with one column per direct
/// child alias, threaded through lateral joins correlated against the
/// root-own derived table rather than the physical root table (spec
/// §4.7 "Root" step 2 — a root's direct children become *siblings* of
/// its own key instead of being flattened into it, unlike a non-root
/// branch's descendants).
fn render_root_combine(
    plan: &Plan,
    root_id: BranchId,
    own_sql: String,
    schema_cte_where: &HashMap<BranchId, Vec<String>>,
) -> Body {
    let compiled = plan.schema.branch(root_id);
    let alias = compiled.alias.as_str();

    let mut select_items: Vec<String> = vec![format!(r#"to_jsonb("{alias}") AS "{alias}""#)];
    let mut join_clauses: Vec<String> = Vec::new();

    let mut children: Vec<BranchId> = compiled.children.clone();
    children.sort_by_key(|c| c.0);
    for child_id in children {
        let child_compiled = plan.schema.branch(child_id);
        if child_compiled.is_cte {
            continue;
        }
        let correlation = child_compiled.relations.iter().find(|r| r.is_parent).map(|r| {
            let local_col = &child_compiled.field_database[&r.local_field];
            format!(
                r#"{} = "{alias}"."{}""#,
                quote_qualified(child_compiled.table, local_col),
                r.external_field
            )
        });

        if child_compiled.anonymous {
            let mut child_fields: Vec<&str> = plan
                .branch(child_id)
                .selected
                .iter()
                .map(|f| f.as_str())
                .collect();
            child_fields.sort_unstable();
            let child_select: Vec<String> = child_fields
                .iter()
                .map(|field| render_select_item(child_compiled, plan.branch(child_id), field))
                .collect();
            let mut inner = format!(
                r#"SELECT {} FROM "{}""#,
                child_select.join(", "),
                child_compiled.table
            );
            if let Some(c) = &correlation {
                inner.push_str(" WHERE ");
                inner.push_str(c);
            }
            inner.push_str(" LIMIT 1");
            join_clauses.push(format!(
                r#"{} JOIN LATERAL ( {inner} ) AS "{calias}" ON TRUE"#,
                child_compiled.join.as_sql(),
                calias = child_compiled.alias
            ));
            for field in child_fields {
                select_items.push(format!(
                    r#""{calias}"."{field}" AS "{field}""#,
                    calias = child_compiled.alias
                ));
            }
            continue;
        }

        let inner = render_body(plan, child_id, correlation, !child_compiled.slice, schema_cte_where).into_sql();
        let data_expr = if child_compiled.slice {
            "jsonb_agg(to_jsonb(t))"
        } else {
            "to_jsonb(t)"
        };
        join_clauses.push(format!(
            r#"{} JOIN LATERAL ( SELECT {data_expr} AS "data" FROM ( {inner} ) t ) AS "{calias}" ON TRUE"#,
            child_compiled.join.as_sql(),
            calias = child_compiled.alias
        ));
        select_items.push(format!(
            r#""{calias}"."data" AS "{calias}""#,
            calias = child_compiled.alias
        ));
    }

    let mut where_parts: Vec<String> = Vec::new();
    let mut guards: Vec<&str> = plan.root_guards.iter().map(|a| a.as_str()).collect();
    guards.sort_unstable();
    for galias in guards {
        where_parts.push(format!(r#""{galias}"."data" IS NOT NULL"#));
    }

    Body {
        select_items,
        distinct_on: Vec::new(),
        from: format!(r#"( {own_sql} ) AS "{alias}""#),
        joins: join_clauses,
        where_parts,
        group_by: String::new(),
        order_by: String::new(),
        limit: plan.root_limit,
        offset: plan.root_offset,
    }
}

fn render_select_item(
    compiled: &CompiledBranch,
    pb: &crate::plan::PlanBranch,
    field: &str,
) -> String {
    if let Some(sub) = pb.subqueries.get(field) {
        let pk_field = &compiled.primary_keys[0];
        let pk_column = &compiled.field_database[pk_field];
        format!("({}) AS \"{field}\"", sub.render(compiled.table, pk_column))
    } else if let Some(expr) = pb.select_overrides.get(field) {
        expr.to_string()
    } else {
        let column = &compiled.field_database[field];
        format!(r#"{} AS "{}""#, quote_qualified(compiled.table, column), field)
    }
}

/// Every selected plain column enters GROUP BY unconditionally (spec
/// §4.7 step 2/"Root" step 1), merged with whatever `order_by`/`select`
/// application already pushed into the branch's own `group_by` builder
/// (spec §4.5), de-duplicated.
fn render_group_by(compiled: &CompiledBranch, pb: &crate::plan::PlanBranch) -> String {
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut parts: Vec<String> = Vec::new();

    let mut fields: Vec<&str> = pb.selected.iter().map(|f| f.as_str()).collect();
    fields.sort_unstable();
    for field in fields {
        if pb.select_overrides.contains_key(field) || pb.subqueries.contains_key(field) {
            continue;
        }
        let column = &compiled.field_database[field];
        let qualified = quote_qualified(compiled.table, column);
        if seen.insert(qualified.clone()) {
            parts.push(qualified);
        }
    }

    let explicit = pb.group_by.build();
    if !explicit.is_empty() {
        for part in explicit.split(", ") {
            if seen.insert(part.to_string()) {
                parts.push(part.to_string());
            }
        }
    }

    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{apply_where, grammar::parse_where};
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

    struct ProjectTag;
    impl Source for ProjectTag {
        fn table_name(&self) -> &'static str {
            "project_tag"
        }
        fn primary_keys(&self) -> &'static [&'static str] {
            &["ID"]
        }
    }

    fn sample_schema() -> Arc<crate::schema::Schema> {
        let child = BranchBuilder::new("Tags", ProjectTag)
            .slice()
            .join(JoinDirection::Left)
            .field("Name")
            .field("ProjectID")
            .related_str("Tags.ProjectID=Project.ID")
            .unwrap();
        let root = BranchBuilder::new("Project", Project)
            .field("Name")
            .select(["ID", "Name"])
            .child(child);
        Arc::new(root.build_schema().unwrap())
    }

    #[test]
    fn emits_root_select_with_lateral_slice_join() {
        let schema = sample_schema();
        let plan = Plan::new(schema);
        let sql = emit(&plan);
        assert!(sql.contains(r#"FROM "project""#));
        assert!(sql.contains("LEFT JOIN LATERAL"));
        assert!(sql.contains("jsonb_agg(to_jsonb(t))"));
        assert!(sql.contains(r#""Tags"."data" AS "Tags""#));
        assert!(sql.contains(r#""project_tag"."project_id" = "Project"."ID""#));
        assert!(sql.contains(r#"to_jsonb("Project") AS "Project""#));
    }

    #[test]
    fn non_slice_root_wraps_with_to_jsonb() {
        let child = BranchBuilder::new("Tags", ProjectTag)
            .join(JoinDirection::Left)
            .field("Name")
            .field("ProjectID")
            .related_str("Tags.ProjectID=Project.ID")
            .unwrap();
        let root = BranchBuilder::new("Project", Project)
            .field("Name")
            .select(["ID"])
            .child(child);
        let schema = Arc::new(root.build_schema().unwrap());
        let plan = Plan::new(schema);
        let sql = emit(&plan);
        assert!(sql.starts_with(r#"SELECT coalesce(to_jsonb(q),'{}') FROM ( SELECT "#));
        assert!(sql.contains(") q"));
    }

    #[test]
    fn slice_root_wraps_with_jsonb_agg_and_total_rows() {
        let schema = sample_schema();
        let plan = Plan::new(schema);
        let sql = emit(&plan);
        assert!(sql.starts_with(r#"SELECT coalesce(jsonb_agg(q),'[]') FROM ( SELECT count(*) OVER() AS TotalRows, "#));
        assert!(sql.ends_with(") q"));
    }

    #[test]
    fn search_on_child_guards_root_with_inner_join() {
        let schema = sample_schema();
        let mut plan = Plan::new(schema);
        let node = parse_where("Tags.Name|=|urgent").unwrap();
        apply_where(&mut plan, &node).unwrap();
        let sql = emit(&plan);
        assert!(sql.contains("INNER JOIN LATERAL"));
        assert!(sql.contains(r#""Tags"."data" IS NOT NULL"#));
        assert!(sql.contains(r#""project_tag"."name" = $1"#));
    }

    #[test]
    fn aggregate_select_triggers_group_by_on_plain_columns() {
        use crate::defaults::{AggregateFn, Defaults};
        let root = BranchBuilder::new("Project", Project)
            .field("Name")
            .select(["ID", "Name"]);
        let schema = Arc::new(root.build_schema().unwrap());
        let mut plan = Plan::new(schema);
        let defaults = Defaults::new().aggregate("Project", "Name", AggregateFn::Count, "NameCount");
        defaults.apply(&mut plan).unwrap();
        let sql = emit(&plan);
        assert!(sql.contains(r#"GROUP BY "project"."id""#));
    }

    #[test]
    fn distinct_fields_render_as_distinct_on() {
        let root = BranchBuilder::new("Project", Project)
            .field("Name")
            .select(["ID", "Name"])
            .distinct(["Name"]);
        let schema = Arc::new(root.build_schema().unwrap());
        let plan = Plan::new(schema);
        let sql = emit(&plan);
        assert!(sql.contains(r#"SELECT DISTINCT ON ("project"."name") "#));
    }

    #[test]
    fn cte_tagged_branch_emits_with_prologue_and_parent_membership_test() {
        let cte_child = BranchBuilder::new("TagIds", ProjectTag)
            .cte()
            .field("ProjectID")
            .related_str("TagIds.ProjectID=Project.ID")
            .unwrap();
        let root = BranchBuilder::new("Project", Project)
            .field("Name")
            .select(["ID"])
            .child(cte_child);
        let schema = Arc::new(root.build_schema().unwrap());
        let plan = Plan::new(schema);
        let sql = emit(&plan);
        assert!(sql.starts_with(r#"WITH "TagIds" AS ( SELECT "project_tag"."project_id""#));
        assert!(sql.contains(r#""project"."id" = (SELECT * FROM "TagIds")"#));
        assert!(!sql.contains("LATERAL"));
    }
}
