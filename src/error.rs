//! Error types for the shape-to-SQL compiler.

use compact_str::CompactString;
use thiserror::Error;

/// Errors that can occur while building a [`crate::Request`].
///
/// All of these are construction-time errors: nothing is ever surfaced
/// from the emission phase itself, and no partial SQL is produced on
/// failure (see spec §7).
#[derive(Debug, Error)]
pub enum ShapeQlError {
    /// The root of a shape is not a record, is an empty record, or the
    /// first field of an anonymous shape is not a `Source`.
    #[error("invalid shape: {0}")]
    InvalidShape(CompactString),

    /// A filter, order, group-by, or select clause referenced a model or
    /// field that isn't in the registry.
    #[error("unknown field: {0}")]
    UnknownField(CompactString),

    /// A `related` atom didn't involve the branch it was declared on, or
    /// named an external alias that isn't in the registry.
    #[error("invalid relation: {0}")]
    InvalidRelation(CompactString),

    /// Unbalanced parentheses, a missing direction, or a non-numeric
    /// page/per_page value in a filter string.
    #[error("malformed filter at position {position}: {message}")]
    MalformedFilter {
        message: CompactString,
        position: usize,
    },

    /// An `order_by` direction outside of `{ASC, DESC}`.
    #[error("invalid order direction: {0}")]
    InvalidOrder(CompactString),

    /// A subquery was attached to a field that doesn't exist on its branch.
    #[error("invalid subquery: {0}")]
    InvalidSubquery(CompactString),

    /// A `--` CTE reference was used against a model that isn't a CTE.
    #[error("invalid CTE reference: {0}")]
    InvalidCTEReference(CompactString),

    /// A parameter value couldn't be represented safely (e.g. a
    /// heterogeneous array passed to `ANY`/`NOT ANY`, see Open Question 3).
    #[error("invalid parameter: {0}")]
    InvalidParameter(CompactString),
}

/// Result type for shape-to-SQL compilation.
pub type Result<T> = core::result::Result<T, ShapeQlError>;
