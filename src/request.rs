//! Public compiler entry point (spec §5).

use std::sync::Arc;

use compact_str::CompactString;

use crate::cte::{CteDef, CteLink};
use crate::defaults::Defaults;
use crate::emit;
use crate::error::{Result, ShapeQlError};
use crate::filter::{apply_order_by, apply_select, apply_where};
use crate::filters::Filters;
use crate::plan::Plan;
use crate::schema::Schema;
use crate::subquery::SubQuery;
use crate::value::SqlValue;

/// A single compile: a reusable [`Schema`], a set of server-side
/// defaults, and any subqueries/CTEs this particular request needs.
/// Built once per endpoint, then [`Request::sql`] is called per
/// incoming HTTP request with that request's parsed [`Filters`].
pub struct Request {
    schema: Arc<Schema>,
    defaults: Defaults,
    pending_subqueries: Vec<(CompactString, CompactString, SubQuery)>,
    pending_ctes: Vec<(CteDef, Vec<CteLink>)>,
}

impl Request {
    pub fn new(schema: Arc<Schema>) -> Self {
        Request {
            schema,
            defaults: Defaults::new(),
            pending_subqueries: Vec::new(),
            pending_ctes: Vec::new(),
        }
    }

    pub fn with_defaults(mut self, defaults: Defaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Attach a scalar subquery to `(branch_alias, field)`; resolved and
    /// validated against the schema at [`Request::sql`] time.
    pub fn with_subquery(
        mut self,
        branch_alias: impl Into<CompactString>,
        field: impl Into<CompactString>,
        subquery: SubQuery,
    ) -> Self {
        self.pending_subqueries
            .push((branch_alias.into(), field.into(), subquery));
        self
    }

    /// Register a CTE and its links for this request.
    pub fn with_cte(mut self, cte: CteDef, links: Vec<CteLink>) -> Self {
        self.pending_ctes.push((cte, links));
        self
    }

    /// Compile one set of filters into `(sql, bind_parameters)`.
    #[tracing::instrument(level = "debug", skip(self, filters))]
    pub fn sql(&self, filters: &Filters) -> Result<(String, Vec<SqlValue>)> {
        let mut plan = Plan::new(self.schema.clone());

        for (cte, links) in &self.pending_ctes {
            plan.register_cte(cte.clone());
            for link in links {
                plan.link_cte(link.clone());
            }
        }

        for (branch_alias, field, subquery) in &self.pending_subqueries {
            let branch_id = plan.schema.alias_to_id(branch_alias).ok_or_else(|| {
                ShapeQlError::InvalidSubquery(CompactString::from(format!(
                    "{branch_alias}.{field}"
                )))
            })?;
            plan.add_subquery(branch_id, field.clone(), subquery.clone());
        }

        self.defaults.apply(&mut plan)?;

        if !filters.select.is_empty() {
            apply_select(&mut plan, &filters.select)?;
        }
        if !filters.order_by.is_empty() {
            apply_order_by(&mut plan, &filters.order_by)?;
        }
        if let Some(node) = &filters.where_clause {
            apply_where(&mut plan, node)?;
        }

        if let Some(limit) = filters.limit() {
            // spec §4.7 step 3: root LIMIT/OFFSET come from Filters
            // unconditionally — a singular-lookup root still paginates
            // (S1's literal expected SQL carries `LIMIT 25 OFFSET 0`);
            // `slice` only gates whether `TotalRows` is computed.
            apply_root_paging(&mut plan, limit, filters.offset());
        }

        let sql = emit::emit(&plan);
        let params = plan.params.snapshot();
        Ok((sql, params))
    }

    /// Resolve the runtime branch id for a field-validation helper that
    /// needs to sanity-check a caller-supplied alias before building a
    /// [`SubQuery`]/[`CteLink`] against it.
    pub fn validate_alias(&self, alias: &str) -> Result<()> {
        self.schema
            .alias_to_id(alias)
            .map(|_| ())
            .ok_or_else(|| ShapeQlError::UnknownField(CompactString::from(alias)))
    }

    /// Strip the `"totalrows"` key a slice root's `count(*) OVER() AS
    /// TotalRows` smuggled into every element of the decoded JSON array
    /// (the unquoted alias folds to lowercase once Postgres builds the
    /// row's JSON key), recording it into `filters` as the paging
    /// envelope (spec §6's `PostProcess` step). A singular root carries
    /// no such key and is returned unchanged.
    pub fn post_process(&self, filters: &mut Filters, mut value: serde_json::Value) -> serde_json::Value {
        if let serde_json::Value::Array(rows) = &mut value {
            let total = rows
                .first()
                .and_then(|row| row.get("totalrows"))
                .and_then(|n| n.as_i64())
                .unwrap_or(0);
            for row in rows.iter_mut() {
                if let serde_json::Value::Object(map) = row {
                    map.remove("totalrows");
                }
            }
            filters.set_total_results(total);
        }
        value
    }
}

fn apply_root_paging(plan: &mut Plan, limit: i64, offset: i64) {
    plan.root_limit = Some(limit);
    plan.root_offset = Some(offset);
}
