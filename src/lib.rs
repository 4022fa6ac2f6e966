//! Compiles a shape-annotated, nested record type into one parameterized
//! PostgreSQL query producing JSON via `LATERAL` joins and
//! `jsonb_agg`/`jsonb_build_object`.
//!
//! ```text
//! let schema = BranchBuilder::new("Project", Project)
//!     .field("Name")
//!     .child(BranchBuilder::new("Tags", ProjectTag).slice().related_str("Tags.ProjectID=Project.ID")?)
//!     .build_schema()?;
//! let request = Request::new(Arc::new(schema)).with_defaults(defaults);
//! let (sql, params) = request.sql(&filters)?;
//! ```

pub mod condition;
pub mod cte;
pub mod defaults;
pub mod emit;
pub mod error;
pub mod filter;
pub mod filters;
pub mod order;
pub mod plan;
pub mod request;
pub mod schema;
pub mod sql;
pub mod subquery;
pub mod value;

pub use condition::{ConditionBuilder, Operator, ParamSink};
pub use cte::{CteDef, CteLink, Trigger};
pub use defaults::{AggregateFn, Defaults};
pub use error::{Result, ShapeQlError};
pub use filter::grammar::{parse_order_by, parse_select, parse_where};
pub use filters::{parse_url_values_to_filters, Filters};
pub use order::{Direction, GroupByBuilder, OrderByBuilder};
pub use plan::Plan;
pub use request::Request;
pub use schema::builder::BranchBuilder;
pub use schema::{BranchId, JoinDirection, Schema, Source};
pub use subquery::SubQuery;
pub use value::SqlValue;

/// A comprehensive prelude bringing the commonly used items into scope
/// with a single `use shapeql::prelude::*;`.
pub mod prelude {
    pub use crate::condition::{ConditionBuilder, Operator, ParamSink};
    pub use crate::cte::{CteDef, CteLink, Trigger};
    pub use crate::defaults::{AggregateFn, Defaults};
    pub use crate::error::{Result, ShapeQlError};
    pub use crate::filter::grammar::{parse_order_by, parse_select, parse_where};
    pub use crate::filters::{parse_url_values_to_filters, Filters};
    pub use crate::order::{Direction, GroupByBuilder, OrderByBuilder};
    pub use crate::plan::Plan;
    pub use crate::request::Request;
    pub use crate::schema::builder::BranchBuilder;
    pub use crate::schema::{BranchId, JoinDirection, Schema, Source};
    pub use crate::subquery::SubQuery;
    pub use crate::value::SqlValue;
}
