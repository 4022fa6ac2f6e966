//! A small SQL fragment type.
//!
//! Per the Design Notes, this replaces the source system's
//! `:placeholder:`-substitution templates with a typed fragment that is
//! rendered once at the end — appending an empty fragment is a no-op, so
//! there's never a stray token to scrub out. Whitespace is normalized a
//! single time in [`Sql::into_string`].

/// An accumulating, whitespace-normalizing SQL fragment.
///
/// `emit`'s own functions build their SQL directly as `String`s via
/// `format!`, since each one already knows exactly how its pieces join
/// together; this type is for callers assembling a fragment a piece at a
/// time without tracking separator whitespace themselves (e.g. a
/// `ConditionBuilder::and_raw` caller building up a raw clause). Keeping
/// this a thin wrapper (rather than the teacher's lifetime-and-generic-
/// parameterized `SQLChunk` tree) is deliberate: this crate doesn't need
/// zero-copy borrowed fragments because SQL text is only ever built once
/// per compile, never re-rendered.
#[derive(Debug, Clone, Default)]
pub struct Sql(String);

impl Sql {
    pub fn empty() -> Self {
        Sql(String::new())
    }

    pub fn raw(text: impl AsRef<str>) -> Self {
        let text = text.as_ref().trim();
        Sql(text.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append another fragment, inserting a single space if both sides
    /// are non-empty.
    pub fn append(mut self, other: impl AsRef<str>) -> Self {
        let other = other.as_ref().trim();
        if other.is_empty() {
            return self;
        }
        if !self.0.is_empty() {
            self.0.push(' ');
        }
        self.0.push_str(other);
        self
    }

    pub fn append_sql(self, other: Sql) -> Self {
        self.append(other.0)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for Sql {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Sql {
    fn from(s: String) -> Self {
        Sql::raw(s)
    }
}

impl From<&str> for Sql {
    fn from(s: &str) -> Self {
        Sql::raw(s)
    }
}

/// Double-quote an identifier: `name` -> `"name"`. Every identifier in
/// the emitted SQL goes through this (spec's "literal contract").
pub fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

/// `table.column` both double-quoted and dot-joined: `"table"."column"`.
pub fn quote_qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(table), quote_ident(column))
}

/// snake_case conversion used as the default physical-column name when a
/// branch field has no explicit `db` override (spec §4.4).
pub fn snake_case(name: &str) -> String {
    use heck::ToSnakeCase;
    name.to_snake_case()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_converts_pascal_case() {
        assert_eq!(snake_case("ProjectID"), "project_id");
        assert_eq!(snake_case("id"), "id");
        assert_eq!(snake_case("CompanyID"), "company_id");
    }

    #[test]
    fn append_inserts_single_space() {
        let s = Sql::raw("SELECT 1").append("FROM x").into_string();
        assert_eq!(s, "SELECT 1 FROM x");
    }

    #[test]
    fn append_skips_empty() {
        let s = Sql::raw("SELECT 1").append("").append("FROM x").into_string();
        assert_eq!(s, "SELECT 1 FROM x");
    }
}
