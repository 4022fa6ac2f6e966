//! Common Table Expression wiring (spec §4.6, §8 S6).

use std::collections::HashMap;

use compact_str::CompactString;

use crate::condition::{ConditionBuilder, Operator, ParamSink};

/// `Always` CTE links are applied unconditionally; `Search` links only
/// fire once a user filter actually touched the CTE's own query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Always,
    Search,
}

/// A named, pre-computed sub-SELECT, emitted once in the outer `WITH`
/// prologue and referenced by name from linked branches.
#[derive(Debug, Clone)]
pub struct CteDef {
    pub alias: CompactString,
    pub base_table: CompactString,
    pub select: CompactString,
    pub joins: Vec<CompactString>,
    pub where_builder: ConditionBuilder,
    /// Resolves `"Model.Field"` atoms in a `where` filter string that
    /// target this CTE (the `TagSearch--Tag.Name` form) to a column.
    pub field_database: HashMap<CompactString, CompactString>,
    /// Set once a user filter clause has actually touched this CTE,
    /// so `Trigger::Search` links know whether to fire.
    pub touched: bool,
}

impl CteDef {
    pub fn new(alias: impl Into<CompactString>, base_table: impl Into<CompactString>) -> Self {
        CteDef {
            alias: alias.into(),
            base_table: base_table.into(),
            select: CompactString::default(),
            joins: Vec::new(),
            where_builder: ConditionBuilder::new(ParamSink::new()),
            field_database: HashMap::new(),
            touched: false,
        }
    }

    pub fn select(mut self, expr: impl Into<CompactString>) -> Self {
        self.select = expr.into();
        self
    }

    pub fn join(mut self, fragment: impl Into<CompactString>) -> Self {
        self.joins.push(fragment.into());
        self
    }

    pub fn field(mut self, shape_name: impl Into<CompactString>, column: impl Into<CompactString>) -> Self {
        self.field_database.insert(shape_name.into(), column.into());
        self
    }

    /// Re-points this CTE's condition builder at the shared, request-wide
    /// parameter sink so its `$k` indices interleave correctly with
    /// every branch's (spec invariant: globally contiguous `$1..$N`).
    pub fn bind_params(&mut self, params: ParamSink) {
        self.where_builder = ConditionBuilder::new(params);
    }

    /// Render `WITH "<alias>" AS ( SELECT ... FROM "<base>" <joins> [WHERE ...] )`.
    pub fn render(&self) -> String {
        let mut sql = format!(r#"SELECT {} FROM "{}""#, self.select, self.base_table);
        for j in &self.joins {
            sql.push(' ');
            sql.push_str(j);
        }
        let where_sql = self.where_builder.build();
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        format!(r#""{}" AS ( {} )"#, self.alias, sql)
    }
}

/// `(branch alias, local field, operator, CTE field, trigger)` — spec §3 "CTE".
#[derive(Debug, Clone)]
pub struct CteLink {
    pub branch_alias: CompactString,
    pub local_field: CompactString,
    pub operator: Operator,
    pub cte_alias: CompactString,
    pub trigger: Trigger,
}

impl CteLink {
    pub fn new(
        branch_alias: impl Into<CompactString>,
        local_field: impl Into<CompactString>,
        operator: Operator,
        cte_alias: impl Into<CompactString>,
        trigger: Trigger,
    ) -> Self {
        CteLink {
            branch_alias: branch_alias.into(),
            local_field: local_field.into(),
            operator,
            cte_alias: cte_alias.into(),
            trigger,
        }
    }

    /// `"<table>"."<field>" <op> (SELECT * FROM "<cteAlias>")`
    pub fn render(&self, table: &str, column: &str) -> String {
        format!(
            r#""{}"."{}" {} (SELECT * FROM "{}")"#,
            table,
            column,
            self.operator.as_sql(),
            self.cte_alias
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_cte_with_join_and_where() {
        let params = ParamSink::new();
        let mut cte = CteDef::new("TagSearch", "tag")
            .select("project_advisor.id_project")
            .join("LEFT JOIN project_tag ON project_tag.id_tag = tag.id")
            .field("Name", "name");
        cte.bind_params(params.clone());
        cte.where_builder = cte
            .where_builder
            .clone()
            .and("\"tag\".\"name\"", Operator::ILike, "%needle%");
        assert_eq!(
            cte.render(),
            r#""TagSearch" AS ( SELECT project_advisor.id_project FROM "tag" LEFT JOIN project_tag ON project_tag.id_tag = tag.id WHERE "tag"."name" ~~* $1 )"#
        );
    }

    #[test]
    fn link_renders_in_predicate() {
        let link = CteLink::new("Project", "ID", Operator::In, "TagSearch", Trigger::Search);
        assert_eq!(
            link.render("project", "id"),
            r#""project"."id" IN (SELECT * FROM "TagSearch")"#
        );
    }
}
