//! URL-style filter grammar (spec §4.5): `where`, `order_by`, `select`.

use compact_str::CompactString;

use crate::condition::Operator;
use crate::error::{Result, ShapeQlError};
use crate::order::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

/// One leaf of a `where` expression tree: `Model.field|operator|value`,
/// or `CteAlias--Model.field|operator|value` when it targets a CTE's
/// own query instead of a branch in the main tree. `model` is `None`
/// when the clause omits it (spec §4.5: the root alias is then used).
#[derive(Debug, Clone)]
pub struct WhereAtom {
    pub model: Option<CompactString>,
    pub cte_alias: Option<CompactString>,
    pub field: CompactString,
    pub operator: Operator,
    pub raw_value: CompactString,
}

impl WhereAtom {
    /// Split the raw value on `--` for list-shaped operators
    /// (`IN`/`NOT IN`/`ANY`/`NOT ANY`/`BETWEEN`).
    pub fn value_list(&self) -> Vec<&str> {
        if self.raw_value.is_empty() {
            Vec::new()
        } else {
            self.raw_value.split("--").collect()
        }
    }
}

#[derive(Debug, Clone)]
pub enum WhereNode {
    Atom(WhereAtom),
    Nested {
        combinator: Combinator,
        children: Vec<WhereNode>,
    },
}

fn malformed(message: impl Into<CompactString>, position: usize) -> ShapeQlError {
    ShapeQlError::MalformedFilter {
        message: message.into(),
        position,
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.input.as_bytes().get(self.pos) == Some(&b' ') {
            self.pos += 1;
        }
    }

    fn peek_word(&self) -> &'a str {
        let rest = &self.input[self.pos..];
        let end = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        &rest[..end]
    }

    fn expect_byte(&mut self, b: u8) -> Result<()> {
        if self.input.as_bytes().get(self.pos) == Some(&b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(malformed(
                format!("expected '{}' at position {}", b as char, self.pos),
                self.pos,
            ))
        }
    }

    fn parse_node(&mut self) -> Result<WhereNode> {
        self.skip_ws();
        let word = self.peek_word();
        let combinator = match word {
            "AND" => Some(Combinator::And),
            "OR" => Some(Combinator::Or),
            _ => None,
        };
        if let Some(combinator) = combinator {
            self.pos += word.len();
            self.skip_ws();
            self.expect_byte(b'(')?;
            let mut children = Vec::new();
            loop {
                children.push(self.parse_node()?);
                self.skip_ws();
                match self.input.as_bytes().get(self.pos) {
                    Some(b',') => {
                        self.pos += 1;
                    }
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(malformed("expected ',' or ')'", self.pos)),
                }
            }
            Ok(WhereNode::Nested { combinator, children })
        } else {
            self.parse_atom()
        }
    }

    fn parse_atom(&mut self) -> Result<WhereNode> {
        let rest = &self.input[self.pos..];
        let end = rest
            .find(|c: char| c == ',' || c == ')')
            .unwrap_or(rest.len());
        let atom_str = &rest[..end];
        let start = self.pos;
        self.pos += end;
        parse_atom_str(atom_str, start).map(WhereNode::Atom)
    }
}

fn parse_atom_str(atom: &str, position: usize) -> Result<WhereAtom> {
    let mut parts = atom.splitn(3, '|');
    let head = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| malformed(format!("missing field in atom: {atom}"), position))?;
    let op_str = parts
        .next()
        .ok_or_else(|| malformed(format!("missing operator in atom: {atom}"), position))?;
    let value = parts.next().unwrap_or("");
    let operator = Operator::from_str(op_str)
        .ok_or_else(|| malformed(format!("unknown operator: {op_str}"), position))?;

    // `head` is `field` or `model.field` (optionally `cte--model.field`).
    let (model_part, field) = match head.rsplit_once('.') {
        Some((model_part, field)) => (Some(model_part), field),
        None => (None, head),
    };
    if field.is_empty() {
        return Err(malformed(format!("missing field in atom: {atom}"), position));
    }

    let (cte_alias, model) = match model_part {
        Some(model_part) => match model_part.split_once("--") {
            Some((cte, model)) => (Some(CompactString::from(cte)), Some(CompactString::from(model))),
            None => (None, Some(CompactString::from(model_part))),
        },
        None => (None, None),
    };

    Ok(WhereAtom {
        model,
        cte_alias,
        field: CompactString::from(field),
        operator,
        raw_value: CompactString::from(value),
    })
}

/// Parse a full `where` filter string into its AND/OR tree.
pub fn parse_where(input: &str) -> Result<WhereNode> {
    if input.trim().is_empty() {
        return Err(malformed("empty where expression", 0));
    }
    let mut parser = Parser { input, pos: 0 };
    let node = parser.parse_node()?;
    parser.skip_ws();
    if parser.pos != parser.input.len() {
        return Err(malformed("trailing input after where expression", parser.pos));
    }
    Ok(node)
}

/// One `order_by` entry: `Model.Field|DIRECTION`.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub model: CompactString,
    pub field: CompactString,
    pub direction: Direction,
}

/// Parse a comma-separated `order_by` filter string.
pub fn parse_order_by(input: &str) -> Result<Vec<OrderSpec>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (column, dir_str) = entry
                .split_once('|')
                .ok_or_else(|| malformed(format!("expected 'col|direction' in: {entry}"), 0))?;
            let (model, field) = column.split_once('.').ok_or_else(|| {
                malformed(format!("expected 'Model.Field' in: {column}"), 0)
            })?;
            let direction = Direction::from_str(dir_str)
                .ok_or_else(|| ShapeQlError::InvalidOrder(CompactString::from(dir_str)))?;
            Ok(OrderSpec {
                model: CompactString::from(model),
                field: CompactString::from(field),
                direction,
            })
        })
        .collect()
}

/// One `select` entry: `Model.Field` or `Model.*` (all fields).
#[derive(Debug, Clone)]
pub struct SelectSpec {
    pub model: CompactString,
    pub field: CompactString,
}

impl SelectSpec {
    pub fn is_wildcard(&self) -> bool {
        self.field == "*"
    }
}

/// Parse a comma-separated `select` filter string.
pub fn parse_select(input: &str) -> Result<Vec<SelectSpec>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (model, field) = entry
                .split_once('.')
                .ok_or_else(|| malformed(format!("expected 'Model.Field' in: {entry}"), 0))?;
            Ok(SelectSpec {
                model: CompactString::from(model),
                field: CompactString::from(field),
            })
        })
        .collect()
}
