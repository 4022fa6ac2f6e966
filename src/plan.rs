//! The mutable per-request working tree (spec §4.5, §4.7).
//!
//! A [`crate::schema::Schema`] is scanned once and reused across many
//! requests; a [`Plan`] is built fresh for each one, carrying the
//! per-branch condition/order/group builders a filter string mutates
//! and the join-promotion state a search triggers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use compact_str::CompactString;

use crate::condition::ParamSink;
use crate::condition::ConditionBuilder;
use crate::cte::{CteDef, CteLink, Trigger};
use crate::order::{GroupByBuilder, OrderByBuilder};
use crate::schema::{BranchId, JoinDirection, Schema};
use crate::subquery::SubQuery;

/// Per-branch mutable compile state.
#[derive(Debug, Clone)]
pub struct PlanBranch {
    pub id: BranchId,
    pub join: JoinDirection,
    pub where_builder: ConditionBuilder,
    pub order_by: OrderByBuilder,
    pub group_by: GroupByBuilder,
    pub selected: HashSet<CompactString>,
    pub distinct: HashSet<CompactString>,
    /// Fields referenced by a user filter/order/subquery even if not
    /// selected — still need their column present for correlation.
    pub referenced: HashSet<CompactString>,
    /// Set once any user filter touches this branch (spec §4.7:
    /// triggers INNER-promotion of this branch and its ancestors).
    pub is_searched: bool,
    pub subqueries: HashMap<CompactString, SubQuery>,
    /// Field -> raw SQL expression, for fields whose SELECT entry is a
    /// computed aggregate rather than a plain column reference (spec
    /// §4.5 "aggregate default").
    pub select_overrides: HashMap<CompactString, CompactString>,
}

impl PlanBranch {
    fn from_compiled(branch: &crate::schema::CompiledBranch, params: ParamSink) -> Self {
        let mut order_by = OrderByBuilder::new();
        for (col, dir) in &branch.initial_order_by {
            order_by.add(col.clone(), *dir);
        }
        let mut group_by = GroupByBuilder::new();
        for col in &branch.initial_group_by {
            group_by.add(col.clone());
        }
        PlanBranch {
            id: branch.id,
            join: branch.join,
            where_builder: ConditionBuilder::new(params),
            order_by,
            group_by,
            selected: branch.initial_select.iter().cloned().collect(),
            distinct: branch.initial_distinct.iter().cloned().collect(),
            referenced: HashSet::new(),
            is_searched: false,
            subqueries: HashMap::new(),
            select_overrides: HashMap::new(),
        }
    }
}

/// The full per-request compile state: one [`PlanBranch`] per scanned
/// branch, plus any CTEs registered for this request.
#[derive(Debug, Clone)]
pub struct Plan {
    pub schema: Arc<Schema>,
    pub params: ParamSink,
    pub branches: HashMap<BranchId, PlanBranch>,
    pub ctes: HashMap<CompactString, CteDef>,
    pub cte_links: Vec<CteLink>,
    /// Aliases of INNER-promoted non-root branches the root needs an
    /// `IS NOT NULL` guard for (spec §4.7).
    pub root_guards: HashSet<CompactString>,
    /// Request-level paging override for the root branch (the schema's
    /// own `limit`/`offset` are compile-time defaults; these come from
    /// the caller's `page`/`per_page` filters).
    pub root_limit: Option<i64>,
    pub root_offset: Option<i64>,
}

impl Plan {
    pub fn new(schema: Arc<Schema>) -> Self {
        let params = ParamSink::new();
        let branches = schema
            .branches
            .values()
            .map(|b| (b.id, PlanBranch::from_compiled(b, params.clone())))
            .collect();
        Plan {
            schema,
            params,
            branches,
            ctes: HashMap::new(),
            cte_links: Vec::new(),
            root_guards: HashSet::new(),
            root_limit: None,
            root_offset: None,
        }
    }

    pub fn branch(&self, id: BranchId) -> &PlanBranch {
        self.branches.get(&id).expect("BranchId must resolve within its own Plan")
    }

    pub fn branch_mut(&mut self, id: BranchId) -> &mut PlanBranch {
        self.branches.get_mut(&id).expect("BranchId must resolve within its own Plan")
    }

    /// Record that a user filter touched `id`: promotes `id` and every
    /// ancestor up to the root to INNER, and guards the root against
    /// the branch's possible LEFT-JOIN null rows (spec §4.7).
    pub fn mark_searched(&mut self, id: BranchId) {
        let root = self.schema.root;
        let mut current = Some(id);
        let mut first = true;
        while let Some(branch_id) = current {
            let compiled = self.schema.branch(branch_id);
            let parent = compiled.parent;
            let alias = compiled.alias.clone();
            let plan_branch = self.branch_mut(branch_id);
            plan_branch.is_searched = true;
            plan_branch.join.promote();
            if first && branch_id != root {
                self.root_guards.insert(alias);
            }
            first = false;
            current = parent;
        }
    }

    pub fn reference_field(&mut self, id: BranchId, field: impl Into<CompactString>) {
        self.branch_mut(id).referenced.insert(field.into());
    }

    pub fn select_field(&mut self, id: BranchId, field: impl Into<CompactString>) {
        self.branch_mut(id).selected.insert(field.into());
    }

    pub fn add_subquery(&mut self, id: BranchId, field: impl Into<CompactString>, sub: SubQuery) {
        let field = field.into();
        let pb = self.branch_mut(id);
        pb.subqueries.insert(field.clone(), sub);
        pb.selected.insert(field);
    }

    /// Register a CTE, re-pointing its condition builder at this plan's
    /// shared parameter sink so its `$k` indices interleave correctly.
    pub fn register_cte(&mut self, mut cte: CteDef) {
        cte.bind_params(self.params.clone());
        self.ctes.insert(cte.alias.clone(), cte);
    }

    pub fn link_cte(&mut self, link: CteLink) {
        self.cte_links.push(link);
    }

    /// Mark a registered CTE as touched by a user filter, so its
    /// `Trigger::Search` links fire at emission time.
    pub fn touch_cte(&mut self, alias: &str) {
        if let Some(cte) = self.ctes.get_mut(alias) {
            cte.touched = true;
        }
    }

    /// CTE links due to fire: `Always` links, plus `Search` links whose
    /// CTE was actually touched by a user filter.
    pub fn active_cte_links(&self) -> Vec<&CteLink> {
        self.cte_links
            .iter()
            .filter(|link| match link.trigger {
                Trigger::Always => true,
                Trigger::Search => self
                    .ctes
                    .get(&link.cte_alias)
                    .map(|c| c.touched)
                    .unwrap_or(false),
            })
            .collect()
    }
}
