//! Request defaults, applied before any user-supplied filter (spec §4.5).
//!
//! A default `Where` entry can be marked `protect`ed so a later user
//! filter on the same field is silently dropped rather than overriding
//! the default (spec's override-suppression invariant).

use compact_str::CompactString;

use crate::condition::Operator;
use crate::error::{Result, ShapeQlError};
use crate::order::Direction;
use crate::plan::Plan;
use crate::value::SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateFn {
    fn as_sql(&self) -> &'static str {
        match self {
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
            AggregateFn::Count => "COUNT",
        }
    }
}

#[derive(Debug, Clone)]
enum DefaultEntry {
    Where {
        model: CompactString,
        field: CompactString,
        operator: Operator,
        value: SqlValue,
        protect: bool,
    },
    OrderBy {
        model: CompactString,
        field: CompactString,
        direction: Direction,
    },
    Select {
        model: CompactString,
        field: CompactString,
    },
    Aggregate {
        model: CompactString,
        field: CompactString,
        func: AggregateFn,
        alias: CompactString,
    },
}

/// A set of defaults applied to a [`Plan`] before the caller's own
/// `where`/`order_by`/`select` filter string.
#[derive(Debug, Clone, Default)]
pub struct Defaults {
    entries: Vec<DefaultEntry>,
}

impl Defaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// A default condition. `protect = true` suppresses any later user
    /// filter attempting to override this field.
    pub fn where_(
        mut self,
        model: impl Into<CompactString>,
        field: impl Into<CompactString>,
        operator: Operator,
        value: impl Into<SqlValue>,
        protect: bool,
    ) -> Self {
        self.entries.push(DefaultEntry::Where {
            model: model.into(),
            field: field.into(),
            operator,
            value: value.into(),
            protect,
        });
        self
    }

    pub fn order_by(
        mut self,
        model: impl Into<CompactString>,
        field: impl Into<CompactString>,
        direction: Direction,
    ) -> Self {
        self.entries.push(DefaultEntry::OrderBy {
            model: model.into(),
            field: field.into(),
            direction,
        });
        self
    }

    pub fn select(mut self, model: impl Into<CompactString>, field: impl Into<CompactString>) -> Self {
        self.entries.push(DefaultEntry::Select {
            model: model.into(),
            field: field.into(),
        });
        self
    }

    /// A computed aggregate field (spec §8 scalar-aggregate scenario),
    /// emitted as `FUNC("table"."column") AS "alias"` in place of the
    /// field's plain column reference.
    pub fn aggregate(
        mut self,
        model: impl Into<CompactString>,
        field: impl Into<CompactString>,
        func: AggregateFn,
        alias: impl Into<CompactString>,
    ) -> Self {
        self.entries.push(DefaultEntry::Aggregate {
            model: model.into(),
            field: field.into(),
            func,
            alias: alias.into(),
        });
        self
    }

    pub fn apply(&self, plan: &mut Plan) -> Result<()> {
        for entry in &self.entries {
            apply_entry(plan, entry)?;
        }
        Ok(())
    }
}

fn apply_entry(plan: &mut Plan, entry: &DefaultEntry) -> Result<()> {
    match entry {
        DefaultEntry::Where {
            model,
            field,
            operator,
            value,
            protect,
        } => {
            let branch_id = plan
                .schema
                .alias_to_id(model)
                .ok_or_else(|| ShapeQlError::UnknownField(model.clone()))?;
            let (table, column) = {
                let compiled = plan.schema.branch(branch_id);
                let column = compiled.field_database.get(field.as_str()).cloned().ok_or_else(|| {
                    ShapeQlError::UnknownField(CompactString::from(format!("{model}.{field}")))
                })?;
                (compiled.table, column)
            };
            let qualified = crate::sql::quote_qualified(table, &column);
            let params = plan.params.clone();
            let pb = plan.branch_mut(branch_id);
            let builder = std::mem::replace(&mut pb.where_builder, crate::condition::ConditionBuilder::new(params));
            let mut builder = builder.and(&qualified, *operator, value.clone());
            if *protect {
                builder = builder.protect(field.as_str());
            }
            pb.where_builder = builder;
            Ok(())
        }
        DefaultEntry::OrderBy { model, field, direction } => {
            let branch_id = plan
                .schema
                .alias_to_id(model)
                .ok_or_else(|| ShapeQlError::UnknownField(model.clone()))?;
            let (table, column) = {
                let compiled = plan.schema.branch(branch_id);
                let column = compiled.field_database.get(field.as_str()).cloned().ok_or_else(|| {
                    ShapeQlError::UnknownField(CompactString::from(format!("{model}.{field}")))
                })?;
                (compiled.table, column)
            };
            let qualified = crate::sql::quote_qualified(table, &column);
            plan.branch_mut(branch_id).order_by.add(qualified.clone(), *direction);
            // spec §4.5: ordering on a column also enters that branch's GROUP BY.
            plan.branch_mut(branch_id).group_by.add(qualified);
            Ok(())
        }
        DefaultEntry::Select { model, field } => {
            let branch_id = plan
                .schema
                .alias_to_id(model)
                .ok_or_else(|| ShapeQlError::UnknownField(model.clone()))?;
            let column = {
                let compiled = plan.schema.branch(branch_id);
                compiled.field_database.get(field.as_str()).cloned().ok_or_else(|| {
                    ShapeQlError::UnknownField(CompactString::from(format!("{model}.{field}")))
                })?
            };
            plan.select_field(branch_id, field.clone());
            let table = plan.schema.branch(branch_id).table;
            let qualified = crate::sql::quote_qualified(table, &column);
            plan.branch_mut(branch_id).group_by.add(qualified);
            Ok(())
        }
        DefaultEntry::Aggregate {
            model,
            field,
            func,
            alias,
        } => {
            let branch_id = plan
                .schema
                .alias_to_id(model)
                .ok_or_else(|| ShapeQlError::UnknownField(model.clone()))?;
            let (table, column) = {
                let compiled = plan.schema.branch(branch_id);
                let column = compiled.field_database.get(field.as_str()).cloned().ok_or_else(|| {
                    ShapeQlError::UnknownField(CompactString::from(format!("{model}.{field}")))
                })?;
                (compiled.table, column)
            };
            let expr = format!(r#"{}("{table}"."{column}") AS "{alias}""#, func.as_sql());
            let pb = plan.branch_mut(branch_id);
            pb.select_overrides.insert(field.clone(), CompactString::from(expr));
            pb.selected.insert(field.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::builder::BranchBuilder;
    use crate::schema::Source;
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

    fn sample_plan() -> Plan {
        let root = BranchBuilder::new("Project", Project).field("CompanyID").field("Name");
        let schema = Arc::new(root.build_schema().unwrap());
        Plan::new(schema)
    }

    #[test]
    fn protected_default_survives_user_override() {
        let mut plan = sample_plan();
        let defaults = Defaults::new().where_("Project", "CompanyID", Operator::Eq, "AAA", true);
        defaults.apply(&mut plan).unwrap();

        let node = crate::filter::grammar::parse_where("Project.CompanyID|=|BBB").unwrap();
        crate::filter::apply_where(&mut plan, &node).unwrap();

        let id = plan.schema.alias_to_id("Project").unwrap();
        assert_eq!(
            plan.branch(id).where_builder.build(),
            r#""project"."company_id" = $1"#
        );
    }

    #[test]
    fn aggregate_default_sets_select_override() {
        let mut plan = sample_plan();
        let defaults = Defaults::new().aggregate("Project", "Name", AggregateFn::Count, "NameCount");
        defaults.apply(&mut plan).unwrap();
        let id = plan.schema.alias_to_id("Project").unwrap();
        assert_eq!(
            plan.branch(id).select_overrides.get("Name").unwrap().as_str(),
            r#"COUNT("project"."name") AS "NameCount""#
        );
    }
}
