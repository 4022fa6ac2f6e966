//! Request-level paging/filter envelope, parsed from raw query-string
//! values (spec §4.5's outer request shape).

use compact_str::CompactString;

use crate::error::{Result, ShapeQlError};
use crate::filter::grammar::{parse_order_by, parse_select, parse_where, OrderSpec, SelectSpec, WhereNode};

const DEFAULT_PER_PAGE: i64 = 25;

/// The parsed `where`/`order_by`/`select`/paging parameters from one
/// incoming request, ready to apply to a [`crate::plan::Plan`].
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub page: i64,
    pub per_page: i64,
    pub disable_paging: bool,
    pub where_clause: Option<WhereNode>,
    pub order_by: Vec<OrderSpec>,
    pub select: Vec<SelectSpec>,
    /// Populated after the count query runs (spec's paging envelope);
    /// `0` until then.
    pub total_results: i64,
    pub total_pages: i64,
    /// The `push_url` query key, carried through opaquely for the
    /// pagination-link-building collaborator (out of scope here, spec §1).
    pub push_url: Option<CompactString>,
}

impl Filters {
    pub fn new() -> Self {
        Filters {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            disable_paging: false,
            where_clause: None,
            order_by: Vec::new(),
            select: Vec::new(),
            total_results: 0,
            total_pages: 0,
            push_url: None,
        }
    }

    /// Offset implied by the current page/per_page (1-based pages).
    pub fn offset(&self) -> i64 {
        if self.disable_paging {
            0
        } else {
            (self.page.max(1) - 1) * self.per_page.max(1)
        }
    }

    pub fn limit(&self) -> Option<i64> {
        if self.disable_paging {
            None
        } else {
            Some(self.per_page.max(1))
        }
    }

    /// Record a count and derive `total_pages` (spec's paging envelope).
    pub fn set_total_results(&mut self, total: i64) {
        self.total_results = total;
        self.total_pages = if self.disable_paging || self.per_page <= 0 {
            1
        } else {
            (total + self.per_page - 1) / self.per_page
        };
    }
}

/// Parse a flat set of URL query values into [`Filters`] (spec's
/// `ParseUrlValuesToFilters`). `lookup` resolves a query parameter name
/// to its raw string value, matching how an HTTP framework's query map
/// is typically consulted.
pub fn parse_url_values_to_filters<'a>(lookup: impl Fn(&str) -> Option<&'a str>) -> Result<Filters> {
    let mut filters = Filters::new();

    if let Some(page) = lookup("page") {
        filters.page = page
            .parse()
            .map_err(|_| invalid_param("page", page))?;
    }
    if let Some(per_page) = lookup("per_page") {
        filters.per_page = per_page
            .parse()
            .map_err(|_| invalid_param("per_page", per_page))?;
    }
    if let Some(disable) = lookup("disable_paging") {
        filters.disable_paging = disable == "true" || disable == "1";
    }
    if let Some(where_str) = lookup("where") {
        filters.where_clause = Some(parse_where(&url_decode(where_str))?);
    }
    if let Some(order_str) = lookup("order_by") {
        filters.order_by = parse_order_by(&url_decode(order_str))?;
    }
    if let Some(select_str) = lookup("select") {
        filters.select = parse_select(&url_decode(select_str))?;
    }
    if let Some(push_url) = lookup("push_url") {
        filters.push_url = Some(CompactString::from(push_url));
    }

    Ok(filters)
}

fn invalid_param(name: &str, value: &str) -> ShapeQlError {
    ShapeQlError::MalformedFilter {
        message: CompactString::from(format!("invalid {name}: {value}")),
        position: 0,
    }
}

/// Minimal `application/x-www-form-urlencoded`-style decode: `%XX` escapes
/// and `+` as space (spec §6: "All three fields are URL-decoded before
/// parsing"). No web-framework dependency is pulled in just for this.
fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_paging_and_where_from_query_map() {
        let mut params = HashMap::new();
        params.insert("page", "2");
        params.insert("per_page", "10");
        params.insert("where", "Project.Name|=|Acme");
        let filters = parse_url_values_to_filters(|k| params.get(k).copied()).unwrap();
        assert_eq!(filters.page, 2);
        assert_eq!(filters.per_page, 10);
        assert_eq!(filters.offset(), 10);
        assert!(filters.where_clause.is_some());
    }

    #[test]
    fn disable_paging_drops_limit_and_offset() {
        let mut params = HashMap::new();
        params.insert("disable_paging", "true");
        let filters = parse_url_values_to_filters(|k| params.get(k).copied()).unwrap();
        assert_eq!(filters.offset(), 0);
        assert_eq!(filters.limit(), None);
    }

    #[test]
    fn url_decodes_where_before_parsing() {
        let mut params = HashMap::new();
        params.insert("where", "Project.Name|~~*|%25needle%25");
        let filters = parse_url_values_to_filters(|k| params.get(k).copied()).unwrap();
        match filters.where_clause.unwrap() {
            crate::filter::grammar::WhereNode::Atom(a) => assert_eq!(a.raw_value, "%needle%"),
            _ => panic!("expected atom"),
        }
    }

    #[test]
    fn parses_push_url_key_opaquely() {
        let mut params = HashMap::new();
        params.insert("push_url", "/projects?page=2");
        let filters = parse_url_values_to_filters(|k| params.get(k).copied()).unwrap();
        assert_eq!(filters.push_url.as_deref(), Some("/projects?page=2"));
    }

    #[test]
    fn total_pages_rounds_up() {
        let mut filters = Filters::new();
        filters.per_page = 10;
        filters.set_total_results(25);
        assert_eq!(filters.total_pages, 3);
    }
}
