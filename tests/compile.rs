use std::sync::Arc;

use shapeql::condition::Operator;
use shapeql::cte::{CteDef, CteLink, Trigger};
use shapeql::defaults::{AggregateFn, Defaults};
use shapeql::filters::Filters;
use shapeql::order::Direction;
use shapeql::request::Request;
use shapeql::schema::builder::BranchBuilder;
use shapeql::schema::Source;
use shapeql::subquery::SubQuery;

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

struct ProjectTimeEntry;
impl Source for ProjectTimeEntry {
    fn table_name(&self) -> &'static str {
        "project_time_entry"
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

fn project_with_tags_schema() -> Arc<shapeql::schema::Schema> {
    let tags = BranchBuilder::new("Tags", ProjectTag)
        .slice()
        .field("ProjectID")
        .field_db("Name", "tag_name")
        .related_str("Tags.ProjectID=Project.ID")
        .unwrap();
    let root = BranchBuilder::new("Project", Project)
        .field("Name")
        .select(["ID", "Name"])
        .child(tags);
    Arc::new(root.build_schema().unwrap())
}

#[test]
fn compiles_root_with_slice_child_and_default_company_filter() {
    let schema = project_with_tags_schema();
    let defaults = Defaults::new().where_("Project", "Name", Operator::NotEq, "deleted", false);
    let request = Request::new(schema).with_defaults(defaults);

    let filters = Filters::new();
    let (sql, params) = request.sql(&filters).unwrap();

    assert!(sql.contains(r#"FROM "project""#));
    assert!(sql.contains("LEFT JOIN LATERAL"));
    assert!(sql.contains(r#""Tags"."data" AS "Tags""#));
    assert_eq!(params.len(), 1);
}

#[test]
fn user_search_on_nested_branch_promotes_join_and_guards_root() {
    let schema = project_with_tags_schema();
    let request = Request::new(schema);

    let mut filters = Filters::new();
    filters.where_clause =
        Some(shapeql::filter::grammar::parse_where("Tags.Name|~~*|urgent").unwrap());

    let (sql, params) = request.sql(&filters).unwrap();
    assert!(sql.contains("INNER JOIN LATERAL"));
    assert!(sql.contains(r#""Tags"."data" IS NOT NULL"#));
    assert!(sql.contains(r#""project_tag"."tag_name" ~~* $1"#));
    assert_eq!(params.len(), 1);
}

#[test]
fn correlated_scalar_subquery_is_inlined_into_select_list() {
    let schema = project_with_tags_schema();
    let sub = SubQuery::new("Project", "Volume")
        .select("SUM(volume)")
        .from("project_time_entry")
        .relate("id_project", "ID");
    let request = Request::new(schema).with_subquery("Project", "Volume", sub);

    let (sql, _params) = request.sql(&Filters::new()).unwrap();
    assert!(sql.contains(
        r#"(SELECT SUM(volume) FROM "project_time_entry" WHERE project_time_entry.id_project = "project"."id") AS "Volume""#
    ));
}

#[test]
fn cte_link_is_emitted_in_with_prologue_and_root_where() {
    let schema = project_with_tags_schema();
    let cte = CteDef::new("TagSearch", "tag")
        .select("project_tag.project_id")
        .join("LEFT JOIN project_tag ON project_tag.id_tag = tag.id")
        .field("Name", "name");
    let link = CteLink::new("Project", "ID", Operator::In, "TagSearch", Trigger::Always);
    let request = Request::new(schema).with_cte(cte, vec![link]);

    let (sql, _params) = request.sql(&Filters::new()).unwrap();
    assert!(sql.starts_with(r#"WITH "TagSearch" AS ("#));
    assert!(sql.contains(r#""project"."id" IN (SELECT * FROM "TagSearch")"#));
}

#[test]
fn aggregate_default_overrides_plain_column_select() {
    let schema = project_with_tags_schema();
    let defaults = Defaults::new().aggregate("Project", "Name", AggregateFn::Count, "NameCount");
    let request = Request::new(schema).with_defaults(defaults);

    let (sql, _params) = request.sql(&Filters::new()).unwrap();
    assert!(sql.contains(r#"COUNT("project"."name") AS "NameCount""#));
}

#[test]
fn order_by_default_then_user_override_moves_column_to_end() {
    let schema = project_with_tags_schema();
    let defaults = Defaults::new().order_by("Project", "Name", Direction::Asc);
    let request = Request::new(schema).with_defaults(defaults);

    let mut filters = Filters::new();
    filters.order_by = shapeql::filter::grammar::parse_order_by("Project.Name|DESC").unwrap();

    let (sql, _params) = request.sql(&filters).unwrap();
    assert!(sql.contains(r#"ORDER BY "project"."name" DESC"#));
}

#[test]
fn unrelated_child_branch_defaults_to_left_join_when_not_searched() {
    let schema = project_with_tags_schema();
    let request = Request::new(schema);
    let (sql, _params) = request.sql(&Filters::new()).unwrap();
    assert!(sql.contains("LEFT JOIN LATERAL"));
    assert!(!sql.contains("INNER JOIN LATERAL"));
}

#[test]
fn rejects_subquery_bound_to_unknown_branch() {
    let schema = project_with_tags_schema();
    let sub = SubQuery::new("Bogus", "Volume")
        .select("SUM(volume)")
        .from("project_time_entry")
        .relate("id_project", "ID");
    let request = Request::new(schema).with_subquery("Bogus", "Volume", sub);

    let err = request.sql(&Filters::new()).unwrap_err();
    assert!(matches!(err, shapeql::error::ShapeQlError::InvalidSubquery(_)));
}

#[test]
fn rejects_filter_atom_referencing_unknown_field() {
    let schema = project_with_tags_schema();
    let request = Request::new(schema);
    let mut filters = Filters::new();
    filters.where_clause = Some(shapeql::filter::grammar::parse_where("Project.Bogus|=|x").unwrap());
    let err = request.sql(&filters).unwrap_err();
    assert!(matches!(err, shapeql::error::ShapeQlError::UnknownField(_)));
}

#[test]
fn singular_root_is_wrapped_in_to_jsonb_envelope() {
    let schema = project_with_tags_schema();
    let request = Request::new(schema);
    let (sql, _params) = request.sql(&Filters::new()).unwrap();
    assert!(sql.starts_with(r#"SELECT coalesce(to_jsonb(q),'{}') FROM ( SELECT "#));
    assert!(sql.ends_with(") q"));
}

fn paged_tags_schema() -> Arc<shapeql::schema::Schema> {
    let root = BranchBuilder::new("Project", Project)
        .slice()
        .field("Name")
        .select(["ID", "Name"]);
    Arc::new(root.build_schema().unwrap())
}

#[test]
fn slice_root_is_wrapped_in_jsonb_agg_envelope_with_total_rows() {
    let schema = paged_tags_schema();
    let request = Request::new(schema);
    let mut filters = Filters::new();
    filters.per_page = 25;
    let (sql, _params) = request.sql(&filters).unwrap();
    assert!(sql.starts_with(r#"SELECT coalesce(jsonb_agg(q),'[]') FROM ( SELECT count(*) OVER() AS TotalRows, "#));
    assert!(sql.contains("LIMIT 25 OFFSET 0"));
}

#[test]
fn root_envelope_nests_child_alias_as_sibling_not_inside_root_object() {
    let schema = project_with_tags_schema();
    let request = Request::new(schema);
    let (sql, _params) = request.sql(&Filters::new()).unwrap();

    // spec §4.7 "Root": the root's own columns are wrapped in their own
    // `to_jsonb("Project") AS "Project"` envelope, and "Tags" is a sibling
    // select item threaded through a lateral join — not flattened inside
    // the Project object the way a non-root branch would nest its children.
    assert!(sql.contains(r#"to_jsonb("Project") AS "Project""#));
    assert!(sql.contains(r#""Tags"."data" AS "Tags""#));
    let envelope = sql.find(r#"to_jsonb("Project") AS "Project""#).unwrap();
    let root_own_start = sql[envelope..].find("FROM ( ").unwrap() + envelope;
    let root_own_end = sql[root_own_start..].find(r#") AS "Project""#).unwrap() + root_own_start;
    let root_own = &sql[root_own_start..root_own_end];
    assert!(
        !root_own.contains("Tags"),
        "root's own derived table must not carry the child alias: {root_own}"
    );
}

#[test]
fn singular_root_still_paginates_when_filters_carry_a_limit() {
    // Comment 2 fix: LIMIT/OFFSET apply whenever `Filters::limit()` is
    // `Some`, even though this root has no slice child and isn't a slice
    // itself — a singular lookup still obeys page/per_page.
    let schema = project_with_tags_schema();
    let request = Request::new(schema);
    let mut filters = Filters::new();
    filters.per_page = 10;
    filters.page = 2;
    let (sql, _params) = request.sql(&filters).unwrap();
    assert!(sql.contains("LIMIT 10 OFFSET 10"));
}

#[test]
fn order_by_and_select_on_the_same_column_collapse_to_one_group_by_entry() {
    let schema = project_with_tags_schema();
    let request = Request::new(schema);
    let mut filters = Filters::new();
    filters.order_by = shapeql::filter::grammar::parse_order_by("Project.Name|ASC").unwrap();
    let (sql, _params) = request.sql(&filters).unwrap();
    assert_eq!(sql.matches(r#"GROUP BY "project"."id", "project"."name""#).count(), 1);
    assert!(!sql.contains(r#""project"."name", "project"."name""#));
}

#[test]
fn anonymous_root_skips_the_json_envelope() {
    // S3: an anonymously-embedded root projects its field directly with
    // no `to_jsonb`/`jsonb_agg` wrapper.
    let root = BranchBuilder::new("Project", Project)
        .anonymous()
        .select(["ID"]);
    let schema = Arc::new(root.build_schema().unwrap());
    let request = Request::new(schema);
    let (sql, _params) = request.sql(&Filters::new()).unwrap();
    assert!(sql.starts_with(r#"SELECT q."ID" FROM ( SELECT "#));
    assert!(sql.ends_with(r#") q LIMIT 1"#));
    assert!(!sql.contains("to_jsonb"));
    assert!(!sql.contains("jsonb_agg"));
}

#[test]
fn slice_root_with_no_children_matches_minimal_root_shape() {
    // S1/S2: a bare slice root with one field and no filters produces
    // TotalRows + the to_jsonb envelope + GROUP BY on its own PK, all
    // inside the paged outer jsonb_agg wrapper.
    let schema = paged_tags_schema();
    let request = Request::new(schema);
    let (sql, _params) = request.sql(&Filters::new()).unwrap();
    assert!(sql.starts_with(r#"SELECT coalesce(jsonb_agg(q),'[]') FROM ( SELECT count(*) OVER() AS TotalRows, to_jsonb("Project") AS "Project" FROM ( SELECT "#));
    assert!(sql.contains(r#"GROUP BY "project"."id""#));
    assert!(sql.contains("LIMIT 25 OFFSET 0"));
    assert!(sql.ends_with(") q"));
}

#[test]
fn post_process_strips_total_rows_and_fills_in_paging_envelope() {
    let schema = paged_tags_schema();
    let request = Request::new(schema);
    let mut filters = Filters::new();
    filters.per_page = 10;

    let decoded = serde_json::json!([
        { "totalrows": 25, "ID": 1, "Name": "Alpha" },
        { "totalrows": 25, "ID": 2, "Name": "Beta" },
    ]);
    let cleaned = request.post_process(&mut filters, decoded);

    assert_eq!(filters.total_results, 25);
    assert_eq!(filters.total_pages, 3);
    let rows = cleaned.as_array().unwrap();
    assert!(rows.iter().all(|r| r.get("totalrows").is_none()));
    assert_eq!(rows[0]["Name"], "Alpha");
}

