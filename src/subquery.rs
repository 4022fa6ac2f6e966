//! Scalar subqueries attached to branch fields (spec §4.6, §8 S5).

use compact_str::CompactString;

/// A scalar `SELECT` bound to `(branch_alias, field_name)`. Emitted
/// inline in the branch's SELECT list in place of that field's plain
/// column reference, correlated against the parent branch.
#[derive(Debug, Clone)]
pub struct SubQuery {
    pub branch_alias: CompactString,
    pub field: CompactString,
    pub select: CompactString,
    pub from: CompactString,
    /// `(localField, parentField)` correlation pair, set via `.relate()`.
    pub relate: Option<(CompactString, CompactString)>,
    pub group_by: Vec<CompactString>,
    pub order_by: Option<(CompactString, crate::order::Direction)>,
    pub limit: Option<i64>,
    pub extra_where: Vec<CompactString>,
}

impl SubQuery {
    pub fn new(branch_alias: impl Into<CompactString>, field: impl Into<CompactString>) -> Self {
        SubQuery {
            branch_alias: branch_alias.into(),
            field: field.into(),
            select: CompactString::default(),
            from: CompactString::default(),
            relate: None,
            group_by: Vec::new(),
            order_by: None,
            limit: None,
            extra_where: Vec::new(),
        }
    }

    pub fn select(mut self, expr: impl Into<CompactString>) -> Self {
        self.select = expr.into();
        self
    }

    pub fn from(mut self, table: impl Into<CompactString>) -> Self {
        self.from = table.into();
        self
    }

    /// `(localField, parentField)`: correlates this subquery's `FROM`
    /// table against the parent branch's physical column.
    pub fn relate(mut self, local_field: impl Into<CompactString>, parent_field: impl Into<CompactString>) -> Self {
        self.relate = Some((local_field.into(), parent_field.into()));
        self
    }

    pub fn group_by(mut self, column: impl Into<CompactString>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<CompactString>, direction: crate::order::Direction) -> Self {
        self.order_by = Some((column.into(), direction));
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn extra_where(mut self, raw: impl Into<CompactString>) -> Self {
        self.extra_where.push(raw.into());
        self
    }

    /// Render `( SELECT ... FROM "<from>" WHERE <from>.<local> = "<parentTable>"."<parentColumn>" ... )`.
    pub fn render(&self, parent_table: &str, parent_column: &str) -> String {
        let mut sql = format!(r#"SELECT {} FROM "{}""#, self.select, self.from);

        let mut wheres = self.extra_where.clone();
        if let Some((local, _)) = &self.relate {
            wheres.push(CompactString::from(format!(
                r#"{}.{} = "{}"."{}""#,
                self.from, local, parent_table, parent_column
            )));
        }
        if !wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&wheres.join(" AND "));
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if let Some((col, dir)) = &self.order_by {
            sql.push_str(&format!(" ORDER BY {col} {}", dir.as_sql()));
        }
        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_correlated_scalar_subquery() {
        let sq = SubQuery::new("Project", "Volume")
            .relate("id_project", "ID")
            .select("SUM(volume)")
            .from("project_time_entry");
        assert_eq!(
            sq.render("project", "id"),
            r#"SELECT SUM(volume) FROM "project_time_entry" WHERE project_time_entry.id_project = "project"."id""#
        );
    }
}
