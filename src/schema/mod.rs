//! The scanned, immutable request shape (spec §4.4 "Shape scanner").
//!
//! A typed reflection-based scan (as the source system does over Go
//! struct tags) has no equivalent in Rust, so per the Design Notes this
//! crate makes the schema an explicit value built once by
//! [`builder::BranchBuilder`] — tag parsing becomes a one-shot builder
//! call rather than per-compile reflection.

pub mod builder;

use std::collections::HashMap;

use compact_str::CompactString;

use crate::condition::Operator;
use crate::order::Direction;

/// A domain entity bound to a physical table (spec §3 "Source").
pub trait Source: Send + Sync {
    fn table_name(&self) -> &'static str;
    /// Primary key field names, in the shape's own naming.
    fn primary_keys(&self) -> &'static [&'static str];
}

/// How a branch is joined to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDirection {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinDirection::Inner => "INNER",
            JoinDirection::Left => "LEFT",
            JoinDirection::Right => "RIGHT",
            JoinDirection::Full => "FULL",
        }
    }

    /// Search-induced promotion always goes to INNER (spec §4.7).
    pub fn promote(&mut self) {
        *self = JoinDirection::Inner;
    }
}

/// Stable branch identity (Design Notes §9: ids instead of pointers, so
/// relations into ancestors don't need back-pointers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub u32);

/// A resolved `(localField, operator, externalBranchAlias, externalField,
/// isParent)` relation (spec §3 "Relation").
#[derive(Debug, Clone)]
pub struct RelationSpec {
    pub local_field: CompactString,
    pub operator: Operator,
    pub external_alias: CompactString,
    pub external_field: CompactString,
    pub is_parent: bool,
}

/// The scanned, read-only shape of one branch.
#[derive(Debug, Clone)]
pub struct CompiledBranch {
    pub id: BranchId,
    pub alias: CompactString,
    pub name: CompactString,
    pub table: &'static str,
    pub parent: Option<BranchId>,
    pub children: Vec<BranchId>,
    pub primary_keys: Vec<CompactString>,
    pub field_database: HashMap<CompactString, CompactString>,
    /// field-name→SQL-type tag (spec §3 registry entry's `fieldTypes`);
    /// not consulted by the emitter itself, which stays type-agnostic,
    /// but tracked so the registry matches the documented shape.
    pub field_types: HashMap<CompactString, CompactString>,
    pub relations: Vec<RelationSpec>,
    pub join: JoinDirection,
    pub slice: bool,
    pub anonymous: bool,
    pub is_cte: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub initial_select: Vec<CompactString>,
    pub initial_distinct: Vec<CompactString>,
    pub initial_order_by: Vec<(CompactString, Direction)>,
    pub initial_group_by: Vec<CompactString>,
}

/// Flat alias→branch index (spec §3 "Registry entry"). Read-only after
/// the scan phase; a bijection between alias and branch.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub field_database: HashMap<CompactString, CompactString>,
    pub field_types: HashMap<CompactString, CompactString>,
    pub table: &'static str,
    pub branch_id: BranchId,
}

/// The fully scanned request shape: tree + registry.
#[derive(Debug, Clone)]
pub struct Schema {
    pub root: BranchId,
    pub branches: HashMap<BranchId, CompiledBranch>,
    pub registry: HashMap<CompactString, RegistryEntry>,
}

impl Schema {
    pub fn branch(&self, id: BranchId) -> &CompiledBranch {
        self.branches
            .get(&id)
            .expect("BranchId must resolve within its own Schema")
    }

    pub fn alias_to_id(&self, alias: &str) -> Option<BranchId> {
        self.registry.get(alias).map(|e| e.branch_id)
    }
}
