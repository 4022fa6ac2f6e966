//! Order/GroupBy builders (spec §4.2).
//!
//! Ordered, duplicate-free lists with append-or-keep-first semantics.
//! Both builders work on fully-qualified column strings
//! (`"table"."column"` or a branch-qualified alias form) as opaque
//! identity — de-duplication is a plain string comparison, no parsing.

use compact_str::CompactString;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Some(Direction::Asc),
            "DESC" => Some(Direction::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderByBuilder {
    entries: Vec<(CompactString, Direction)>,
}

impl OrderByBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column, keeping the first direction seen for it (a
    /// second `add` for the same column is a no-op).
    pub fn add(&mut self, column: impl Into<CompactString>, direction: Direction) -> &mut Self {
        let column = column.into();
        if !self.has(&column) {
            self.entries.push((column, direction));
        }
        self
    }

    /// Remove a column, then re-append it at the end — used when a user
    /// filter re-orders a column that defaults already placed (spec
    /// §4.5: "Unset then set on the same column moves it to the end").
    pub fn set(&mut self, column: impl Into<CompactString>, direction: Direction) -> &mut Self {
        let column = column.into();
        self.unset(&column);
        self.entries.push((column, direction));
        self
    }

    pub fn unset(&mut self, column: &str) -> &mut Self {
        self.entries.retain(|(c, _)| c != column);
        self
    }

    pub fn has(&self, column: &str) -> bool {
        self.entries.iter().any(|(c, _)| c == column)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    pub fn build(&self) -> String {
        self.entries
            .iter()
            .map(|(c, d)| format!("{c} {}", d.as_sql()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupByBuilder {
    columns: Vec<CompactString>,
}

impl GroupByBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, column: impl Into<CompactString>) -> &mut Self {
        let column = column.into();
        if !self.has(&column) {
            self.columns.push(column);
        }
        self
    }

    pub fn unset(&mut self, column: &str) -> &mut Self {
        self.columns.retain(|c| c != column);
        self
    }

    pub fn has(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn build(&self) -> String {
        self.columns.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_by_keeps_first_direction() {
        let mut ob = OrderByBuilder::new();
        ob.add("a", Direction::Asc);
        ob.add("a", Direction::Desc);
        assert_eq!(ob.build(), "a ASC");
    }

    #[test]
    fn set_moves_column_to_end() {
        let mut ob = OrderByBuilder::new();
        ob.add("a", Direction::Asc);
        ob.add("b", Direction::Desc);
        ob.set("a", Direction::Desc);
        assert_eq!(ob.build(), "b DESC, a DESC");
    }

    #[test]
    fn group_by_dedups() {
        let mut gb = GroupByBuilder::new();
        gb.add("a");
        gb.add("b");
        gb.add("a");
        assert_eq!(gb.build(), "a, b");
    }
}
