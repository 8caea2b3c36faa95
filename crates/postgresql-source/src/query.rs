//! SQL construction for change detection.
//!
//! The generated statement selects `key, timestamp, columns...` in that
//! column order and binds its parameters positionally:
//!
//! - with a watermark key: `$1` timestamp, `$2` key, `$3` limit
//! - without one: `$1` timestamp, `$2` limit

use sync_core::ChangeQuery;

/// How the primary key is compared and bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// smallint / integer / bigint, compared as `int8`
    Integer,
    /// Everything else, compared as `text` under the "C" collation so that
    /// database order matches byte order
    Text,
}

impl KeyKind {
    /// Classify an `information_schema.columns.data_type` value.
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type {
            "smallint" | "integer" | "bigint" => Self::Integer,
            _ => Self::Text,
        }
    }

    fn key_expr(self, column: &str) -> String {
        match self {
            Self::Integer => format!("{}::int8", quote_ident(column)),
            Self::Text => format!("{}::text COLLATE \"C\"", quote_ident(column)),
        }
    }
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Build the keyset-paginated change query for `query` against `schema`.
pub fn build_change_query(schema: &str, query: &ChangeQuery, key_kind: KeyKind) -> String {
    let key = key_kind.key_expr(&query.key_column);
    let ts = format!("{}::timestamptz", quote_ident(&query.timestamp_column));

    let mut select = vec![key.clone(), ts.clone()];
    for column in &query.columns {
        let quoted = quote_ident(column);
        select.push(format!("{quoted}::text AS {quoted}"));
    }

    let (predicate, limit_param) = if query.since.last_key.is_some() {
        (format!("{ts} > $1 OR ({ts} = $1 AND {key} > $2)"), "$3")
    } else {
        (format!("{ts} >= $1"), "$2")
    };

    format!(
        "SELECT {} FROM {}.{} WHERE {predicate} ORDER BY {ts} ASC, {key} ASC LIMIT {limit_param}",
        select.join(", "),
        quote_ident(schema),
        quote_ident(&query.table),
    )
}
