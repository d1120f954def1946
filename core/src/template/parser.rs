//! PEST-based parser for template expressions
//!
//! Turns the interior of a `{{ ... }}` expression into a typed [`Expr`], with
//! line/column information for error reporting.

use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::path::FieldPath;

/// Identifier that marks an expression as context-relative
pub const DATA_TOKEN: &str = "$data";

/// Row selector meaning "every row of the context"
pub const ALL_ROWS_MARKER: &str = "[n]";

pub const EXPR_START: &str = "{{";
pub const EXPR_END: &str = "}}";

/* ===================== AST ===================== */

/// Which rows of the context an access expression reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum Rows {
    /// `$data[n]`
    All,
    /// `$data[<index>]`
    Index { index: usize },
}

/// One `key: $data[n].path` pair of an object-mapping expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub key: String,
    pub path: FieldPath,
}

/// A parsed template expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum Expr {
    /// `$data[n].path` or `$data[0].path`
    Access { rows: Rows, path: FieldPath },
    /// `a: $data[n].x, b: $data[n].y`
    Mapping { entries: Vec<MappingEntry> },
}

impl Expr {
    /// Parse an expression interior (delimiters already stripped).
    ///
    /// An interior containing `:` is an object mapping, anything else is a
    /// field access.
    pub fn parse(interior: &str) -> ParseResult<Expr> {
        let interior = interior.trim();
        if interior.contains(':') {
            parse_mapping(interior)
        } else {
            parse_access(interior)
        }
    }
}

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "template/expr.pest"]
pub(crate) struct ExprParser;

/* ===================== Error Types ===================== */

/// Line/column location of a parse failure (0-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("{0}")]
    Syntax(String, Option<Span>),

    #[error("{0}")]
    Build(String),
}

impl ParseError {
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::Syntax(_, span) => *span,
            ParseError::Build(_) => None,
        }
    }
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let (line, col) = match err.line_col {
            pest::error::LineColLocation::Pos(pos) => pos,
            pest::error::LineColLocation::Span(start, _) => start,
        };
        let span = Span {
            line: line.saturating_sub(1),
            col: col.saturating_sub(1),
        };
        ParseError::Syntax(err.to_string(), Some(span))
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/* ===================== Delimiters ===================== */

/// Return the trimmed interior of a `{{ ... }}` string, or `None` when the
/// trimmed string is not wrapped in the expression delimiters.
pub fn split_delimiters(source: &str) -> Option<&str> {
    let trimmed = source.trim();
    if trimmed.len() < EXPR_START.len() + EXPR_END.len()
        || !trimmed.starts_with(EXPR_START)
        || !trimmed.ends_with(EXPR_END)
    {
        return None;
    }
    Some(trimmed[EXPR_START.len()..trimmed.len() - EXPR_END.len()].trim())
}

/* ===================== AST Builder ===================== */

type Pair<'i> = pest::iterators::Pair<'i, Rule>;

fn parse_access(interior: &str) -> ParseResult<Expr> {
    let expression = ExprParser::parse(Rule::access_expression, interior)?
        .next()
        .ok_or_else(|| ParseError::Build("empty access expression".to_string()))?;
    let access = expression
        .into_inner()
        .find(|pair| pair.as_rule() == Rule::access)
        .ok_or_else(|| ParseError::Build("missing data access".to_string()))?;
    build_access(access)
}

fn parse_mapping(interior: &str) -> ParseResult<Expr> {
    let expression = ExprParser::parse(Rule::mapping_expression, interior)?
        .next()
        .ok_or_else(|| ParseError::Build("empty mapping expression".to_string()))?;
    let mapping = expression
        .into_inner()
        .find(|pair| pair.as_rule() == Rule::mapping)
        .ok_or_else(|| ParseError::Build("missing mapping".to_string()))?;

    let entries = mapping
        .into_inner()
        .map(build_entry)
        .collect::<ParseResult<Vec<_>>>()?;
    Ok(Expr::Mapping { entries })
}

fn build_access(pair: Pair) -> ParseResult<Expr> {
    let mut rows = None;
    let mut path = FieldPath::default();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::all_rows => rows = Some(Rows::All),
            Rule::row_index => {
                let index = inner
                    .into_inner()
                    .next()
                    .ok_or_else(|| ParseError::Build("row index without digits".to_string()))?;
                rows = Some(Rows::Index {
                    index: build_index(&index)?,
                });
            }
            Rule::path => path = build_path(inner)?,
            other => {
                return Err(ParseError::Build(format!(
                    "Unexpected access content: {:?}",
                    other
                )))
            }
        }
    }

    let rows = rows.ok_or_else(|| ParseError::Build("missing row selector".to_string()))?;
    Ok(Expr::Access { rows, path })
}

fn build_entry(pair: Pair) -> ParseResult<MappingEntry> {
    let mut inner = pair.into_inner();

    let key = inner
        .next()
        .map(|key| key.as_str().trim().to_string())
        .ok_or_else(|| ParseError::Build("mapping entry without key".to_string()))?;
    if key.is_empty() {
        return Err(ParseError::Build("mapping entry with empty key".to_string()));
    }

    let access = inner
        .next()
        .ok_or_else(|| ParseError::Build(format!("mapping entry '{}' without value", key)))?;
    let path = access
        .into_inner()
        .find(|p| p.as_rule() == Rule::path)
        .map(build_path)
        .transpose()?
        .unwrap_or_default();

    Ok(MappingEntry { key, path })
}

fn build_path(pair: Pair) -> ParseResult<FieldPath> {
    let segments = pair
        .into_inner()
        .map(|segment| match segment.as_rule() {
            Rule::field | Rule::dq_field | Rule::sq_field => Ok(segment.as_str().to_string()),
            Rule::index => build_index(&segment).map(|i| i.to_string()),
            other => Err(ParseError::Build(format!(
                "Unexpected path segment: {:?}",
                other
            ))),
        })
        .collect::<ParseResult<Vec<_>>>()?;
    Ok(FieldPath::new(segments))
}

fn build_index(pair: &Pair) -> ParseResult<usize> {
    pair.as_str()
        .parse::<usize>()
        .map_err(|e| ParseError::Build(format!("Invalid row index '{}': {}", pair.as_str(), e)))
}
