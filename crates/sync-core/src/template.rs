//! Rendering of configured columns into a single embedding input.
//!
//! Supported placeholders:
//! - `{columns}` - every non-empty configured column, in configured order, joined by `\n`
//! - `{<column>}` - the value of one configured column
//! - `{{` / `}}` - literal braces
//!
//! Anything else is rejected when the template is parsed, so a bad template
//! fails before the first row is read.

use crate::{SyncError, WatchedRow};

const ALL_COLUMNS: &str = "columns";

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    AllColumns,
    Column(String),
}

/// Parsed column template.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnTemplate {
    segments: Vec<Segment>,
    columns: Vec<String>,
}

impl ColumnTemplate {
    /// Parse `template` against the configured embedding `columns`.
    pub fn parse(template: &str, columns: &[String]) -> Result<Self, SyncError> {
        if columns.is_empty() {
            return Err(SyncError::Configuration(
                "at least one embedding column is required".to_string(),
            ));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(SyncError::Configuration(format!(
                            "unclosed placeholder in template: '{template}'"
                        )));
                    }
                    let name = name.trim();
                    let segment = if name == ALL_COLUMNS {
                        Segment::AllColumns
                    } else if columns.iter().any(|c| c == name) {
                        Segment::Column(name.to_string())
                    } else {
                        return Err(SyncError::Configuration(format!(
                            "template placeholder '{{{name}}}' is not a configured column (expected one of: {ALL_COLUMNS}, {})",
                            columns.join(", ")
                        )));
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
                '}' => {
                    return Err(SyncError::Configuration(format!(
                        "unmatched '}}' in template: '{template}'"
                    )));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            segments,
            columns: columns.to_vec(),
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Render one row. NULL values render as the empty string.
    ///
    /// A row that lacks a configured column is a source/config mismatch and is
    /// reported as a configuration error.
    pub fn render(&self, row: &WatchedRow) -> Result<String, SyncError> {
        for column in &self.columns {
            if !row.columns.contains_key(column) {
                return Err(SyncError::Configuration(format!(
                    "row {} is missing configured column '{column}'",
                    row.key
                )));
            }
        }

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Column(name) => out.push_str(column_value(row, name)),
                Segment::AllColumns => {
                    let joined = self
                        .columns
                        .iter()
                        .map(|c| column_value(row, c))
                        .filter(|v| !v.is_empty())
                        .collect::<Vec<_>>()
                        .join("\n");
                    out.push_str(&joined);
                }
            }
        }
        Ok(out.trim().to_string())
    }
}

fn column_value<'a>(row: &'a WatchedRow, column: &str) -> &'a str {
    row.columns
        .get(column)
        .and_then(|v| v.as_deref())
        .unwrap_or("")
}
