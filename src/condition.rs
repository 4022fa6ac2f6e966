//! Condition expression builder (spec §4.1).
//!
//! Accumulates composable WHERE/ON predicates while threading a shared,
//! request-wide bind-parameter counter through nested builders, so
//! `$1..$N` stays globally contiguous no matter how many branches,
//! subqueries, or CTEs contributed a clause.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::error::{Result, ShapeQlError};
use crate::value::SqlValue;

/// Comparison operators recognised by the condition builder (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    ILike,
    NotLike,
    NotILike,
    In,
    NotIn,
    Any,
    NotAny,
    Between,
    NotBetween,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// The literal PostgreSQL operator token (spec §4.1's "Operator semantics").
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "<>",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Like => "~~",
            Operator::ILike => "~~*",
            Operator::NotLike => "!~~",
            Operator::NotILike => "!~~*",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Any => "ANY",
            Operator::NotAny => "NOT ANY",
            Operator::Between => "BETWEEN",
            Operator::NotBetween => "NOT BETWEEN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "=" => Operator::Eq,
            "<>" | "!=" => Operator::NotEq,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "~~" => Operator::Like,
            "~~*" => Operator::ILike,
            "!~~" => Operator::NotLike,
            "!~~*" => Operator::NotILike,
            "in" | "IN" => Operator::In,
            "notin" | "NOTIN" | "NOT IN" => Operator::NotIn,
            "any" | "ANY" => Operator::Any,
            "notany" | "NOTANY" | "NOT ANY" => Operator::NotAny,
            "between" | "BETWEEN" => Operator::Between,
            "notbetween" | "NOTBETWEEN" | "NOT BETWEEN" => Operator::NotBetween,
            "isnull" | "IS NULL" => Operator::IsNull,
            "isnotnull" | "IS NOT NULL" => Operator::IsNotNull,
            _ => return None,
        })
    }
}

/// Logical combinator placed between successive clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

impl Combinator {
    fn as_sql(&self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
        }
    }
}

/// The request-wide, shared `$k` parameter counter.
///
/// When a [`ConditionBuilder`] is "liqu-bound" (spec's term) it shares
/// one of these with every other builder in the same compile, so
/// parameter indices stay globally contiguous across branches. A
/// detached builder (used for ad hoc fragment construction/tests) gets
/// its own private sink.
#[derive(Debug, Clone)]
pub struct ParamSink(Rc<RefCell<Vec<SqlValue>>>);

impl ParamSink {
    pub fn new() -> Self {
        ParamSink(Rc::new(RefCell::new(Vec::new())))
    }

    /// Push a value, returning its 1-based `$k` index.
    pub fn push(&self, value: SqlValue) -> usize {
        let mut params = self.0.borrow_mut();
        params.push(value);
        params.len()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<SqlValue> {
        self.0.borrow().clone()
    }
}

impl Default for ParamSink {
    fn default() -> Self {
        Self::new()
    }
}

/// A single accumulated clause, paired with the combinator that precedes
/// it (ignored for the very first clause in a builder).
#[derive(Debug, Clone)]
struct Clause {
    combinator: Combinator,
    text: CompactString,
}

/// Accumulates a WHERE (or ON) fragment.
///
/// Columns can be [`ConditionBuilder::protect`]ed: once protected, any
/// later `and`/`or` call targeting that same column is silently dropped,
/// which is how a branch's own defaults survive a user's attempt to
/// override them via the filter string (spec §4.5).
#[derive(Debug, Clone)]
pub struct ConditionBuilder {
    params: ParamSink,
    protected: Rc<RefCell<HashSet<CompactString>>>,
    clauses: SmallVec<[Clause; 8]>,
}

impl ConditionBuilder {
    pub fn new(params: ParamSink) -> Self {
        ConditionBuilder {
            params,
            protected: Rc::new(RefCell::new(HashSet::new())),
            clauses: SmallVec::new(),
        }
    }

    /// A nested builder nested via `and_nested`/`or_nested` shares the
    /// same parameter sink and protection set as its parent.
    fn child(&self) -> Self {
        ConditionBuilder {
            params: self.params.clone(),
            protected: self.protected.clone(),
            clauses: SmallVec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Mark `column` as protected: subsequent `and`/`or` calls against it
    /// are silently ignored.
    pub fn protect(self, column: impl AsRef<str>) -> Self {
        self.protected
            .borrow_mut()
            .insert(CompactString::from(column.as_ref()));
        self
    }

    pub(crate) fn is_protected(&self, column: &str) -> bool {
        self.protected.borrow().contains(column)
    }

    fn push_clause(mut self, combinator: Combinator, text: Option<CompactString>) -> Self {
        if let Some(text) = text {
            self.clauses.push(Clause { combinator, text });
        }
        self
    }

    fn format_condition(&self, column: &str, op: Operator, value: SqlValue) -> Option<CompactString> {
        if self.is_protected(column) {
            tracing::trace!(column, "protected column: ignoring user-supplied condition");
            return None;
        }
        let idx = self.params.push(value);
        let op_sql = op.as_sql();
        Some(CompactString::from(format!("{column} {op_sql} ${idx}")))
    }

    /// `column <op> $k`
    pub fn and(self, column: &str, op: Operator, value: impl Into<SqlValue>) -> Self {
        let text = self.format_condition(column, op, value.into());
        self.push_clause(Combinator::And, text)
    }

    pub fn or(self, column: &str, op: Operator, value: impl Into<SqlValue>) -> Self {
        let text = self.format_condition(column, op, value.into());
        self.push_clause(Combinator::Or, text)
    }

    /// Appended verbatim: trusted, parameter-free SQL (used for relation
    /// join predicates and CTE-link predicates, which reference other
    /// tables by identifier rather than by bind value).
    pub fn and_raw(self, sql: impl Into<CompactString>) -> Self {
        let text = Some(sql.into());
        self.push_clause(Combinator::And, text)
    }

    pub fn or_raw(self, sql: impl Into<CompactString>) -> Self {
        let text = Some(sql.into());
        self.push_clause(Combinator::Or, text)
    }

    /// `column IS NULL` / `column IS NOT NULL`
    pub fn and_null(self, column: &str, is_null: bool) -> Self {
        if self.is_protected(column) {
            return self;
        }
        let op = if is_null { "IS NULL" } else { "IS NOT NULL" };
        let text = Some(CompactString::from(format!("{column} {op}")));
        self.push_clause(Combinator::And, text)
    }

    /// `column BETWEEN $a AND $b`, wrapped in parens.
    pub fn and_between(self, column: &str, low: impl Into<SqlValue>, high: impl Into<SqlValue>) -> Self {
        if self.is_protected(column) {
            return self;
        }
        let lo = self.params.push(low.into());
        let hi = self.params.push(high.into());
        let text = Some(CompactString::from(format!(
            "({column} BETWEEN ${lo} AND ${hi})"
        )));
        self.push_clause(Combinator::And, text)
    }

    fn in_list(
        self,
        column: &str,
        values: impl IntoIterator<Item = SqlValue>,
        not: bool,
        combinator: Combinator,
    ) -> Self {
        if self.is_protected(column) {
            return self;
        }
        let placeholders: Vec<String> = values
            .into_iter()
            .map(|v| format!("${}", self.params.push(v)))
            .collect();
        let keyword = if not { "NOT IN" } else { "IN" };
        let text = if placeholders.is_empty() {
            Some(CompactString::from(format!("{column} {keyword} (NULL)")))
        } else {
            Some(CompactString::from(format!(
                "{column} {keyword} ({})",
                placeholders.join(",")
            )))
        };
        self.push_clause(combinator, text)
    }

    pub fn and_in(self, column: &str, values: impl IntoIterator<Item = SqlValue>) -> Self {
        self.in_list(column, values, false, Combinator::And)
    }

    pub fn and_not_in(self, column: &str, values: impl IntoIterator<Item = SqlValue>) -> Self {
        self.in_list(column, values, true, Combinator::And)
    }

    /// `column && $k` / `NOT(column && $k)` with a single array-literal
    /// parameter (spec: `Any`/`NotAny`). Rejects heterogeneous arrays
    /// per Open Question 3.
    pub fn and_any(self, column: &str, values: Vec<SqlValue>, negate: bool) -> Result<Self> {
        if self.is_protected(column) {
            return Ok(self);
        }
        let array = SqlValue::Array(values);
        if !array.is_homogeneous_text_array() {
            return Err(ShapeQlError::InvalidParameter(CompactString::from(
                format!("ANY/NOT ANY on {column} requires a homogeneous text array"),
            )));
        }
        let idx = self.params.push(array);
        let text = if negate {
            format!("NOT({column} && ${idx})")
        } else {
            format!("{column} && ${idx}")
        };
        Ok(self.push_clause(Combinator::And, Some(CompactString::from(text))))
    }

    /// Nest a sub-clause built by `f`, wrapped in parentheses, combined
    /// with `AND`.
    pub fn and_nested(self, f: impl FnOnce(ConditionBuilder) -> ConditionBuilder) -> Self {
        let nested = f(self.child());
        let text = if nested.is_empty() {
            None
        } else {
            Some(CompactString::from(format!("({})", nested.build())))
        };
        self.push_clause(Combinator::And, text)
    }

    pub fn or_nested(self, f: impl FnOnce(ConditionBuilder) -> ConditionBuilder) -> Self {
        let nested = f(self.child());
        let text = if nested.is_empty() {
            None
        } else {
            Some(CompactString::from(format!("({})", nested.build())))
        };
        self.push_clause(Combinator::Or, text)
    }

    /// Render the accumulated clauses, e.g. `a = $1 AND b IN ($2,$3)`.
    pub fn build(&self) -> String {
        let mut out = String::new();
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                out.push(' ');
                out.push_str(clause.combinator.as_sql());
                out.push(' ');
            }
            out.push_str(&clause.text);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_and_or_chain() {
        let params = ParamSink::new();
        let cb = ConditionBuilder::new(params.clone())
            .and("company_id", Operator::Eq, "AAA")
            .and("name", Operator::Eq, "Foo");
        assert_eq!(cb.build(), "company_id = $1 AND name = $2");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn protected_column_ignores_user_condition() {
        let params = ParamSink::new();
        let cb = ConditionBuilder::new(params.clone())
            .and("company_id", Operator::Eq, "AAA")
            .protect("company_id")
            .and("company_id", Operator::Eq, "override")
            .and("name", Operator::Eq, "Foo");
        assert_eq!(cb.build(), "company_id = $1 AND name = $2");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn nested_or_wraps_in_parens() {
        let params = ParamSink::new();
        let cb = ConditionBuilder::new(params.clone()).and_nested(|b| {
            b.and("a", Operator::Eq, 1i64).or("b", Operator::Eq, 2i64)
        });
        assert_eq!(cb.build(), "(a = $1 OR b = $2)");
    }

    #[test]
    fn in_list_expands_placeholders() {
        let params = ParamSink::new();
        let cb = ConditionBuilder::new(params.clone())
            .and_in("tag_id", vec![SqlValue::Int(1), SqlValue::Int(2)]);
        assert_eq!(cb.build(), "tag_id IN ($1,$2)");
    }

    #[test]
    fn any_rejects_heterogeneous_array() {
        let params = ParamSink::new();
        let cb = ConditionBuilder::new(params);
        let err = cb
            .and_any(
                "tags",
                vec![SqlValue::Text("a".into()), SqlValue::Int(1)],
                false,
            )
            .unwrap_err();
        assert!(matches!(err, ShapeQlError::InvalidParameter(_)));
    }
}
