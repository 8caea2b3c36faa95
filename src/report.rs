//! Plain-text rendering of search results and cycle outcomes.

use serde_json::Value;
use sync_core::{ScoredPoint, SyncOutcome};

/// Longest cell printed in a results table.
pub const MAX_CELL_CHARS: usize = 50;

/// Shorten `text` to at most `max` characters on one line.
pub fn truncate(text: &str, max: usize) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if flat.chars().count() <= max {
        return flat;
    }
    let keep = max.saturating_sub(3);
    let mut short: String = flat.chars().take(keep).collect();
    short.push_str("...");
    short
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => truncate(s, MAX_CELL_CHARS),
        Some(other) => truncate(&other.to_string(), MAX_CELL_CHARS),
    }
}

/// Render search hits as an aligned table: id, score, then one column per configured column.
pub fn results_table(results: &[ScoredPoint], columns: &[String]) -> String {
    if results.is_empty() {
        return "No results".to_string();
    }

    let mut header = vec!["id".to_string(), "score".to_string()];
    header.extend(columns.iter().cloned());

    let rows: Vec<Vec<String>> = results
        .iter()
        .map(|hit| {
            let mut row = vec![hit.id.to_string(), format!("{:.4}", hit.score)];
            row.extend(columns.iter().map(|c| cell(hit.payload.get(c))));
            row
        })
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (width, value) in widths.iter_mut().zip(row) {
            *width = (*width).max(value.chars().count());
        }
    }

    let format_row = |row: &[String]| {
        row.iter()
            .zip(&widths)
            .map(|(value, &width)| format!("{value:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![format_row(&header)];
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
    );
    lines.extend(rows.iter().map(|row| format_row(row)));
    lines.join("\n")
}

/// Multi-line summary of a sync cycle, listing failed batches.
pub fn outcome_summary(outcome: &SyncOutcome) -> String {
    let mut lines = vec![
        format!("Fetched:   {}", outcome.fetched),
        format!("Embedded:  {}", outcome.embedded),
        format!("Upserted:  {}", outcome.upserted),
        format!("Failed:    {}", outcome.failed),
        format!("Watermark: {}", outcome.watermark),
    ];
    if outcome.skipped > 0 {
        lines.insert(4, format!("Skipped:   {} (empty text)", outcome.skipped));
    }
    if outcome.interrupted {
        lines.push("Interrupted before all changes were processed".to_string());
    }
    for failure in &outcome.failures {
        let keys: Vec<String> = failure.keys.iter().map(ToString::to_string).collect();
        lines.push(format!(
            "  batch {} [{}]: {}",
            failure.batch,
            truncate(&keys.join(", "), MAX_CELL_CHARS),
            failure.reason
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use sync_core::{BatchFailure, RowKey, Watermark};

    fn hit(id: i64, score: f32, payload: Value) -> ScoredPoint {
        let payload: Map<String, Value> = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ScoredPoint {
            id: RowKey::Int(id),
            score,
            payload,
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 50), "short");
        assert_eq!(truncate("line\nbreak", 50), "line break");
        let long = "x".repeat(60);
        let short = truncate(&long, 50);
        assert_eq!(short.chars().count(), 50);
        assert!(short.ends_with("..."));
        // Multi-byte characters are counted, not bytes
        assert_eq!(truncate(&"é".repeat(50), 50), "é".repeat(50));
    }

    #[test]
    fn test_results_table() {
        let columns = vec!["title".to_string(), "content".to_string()];
        let results = vec![
            hit(3, 0.91234, json!({"title": "Rust", "content": "y".repeat(80)})),
            hit(12, 0.5, json!({"title": "Go", "content": null})),
        ];
        let table = results_table(&results, &columns);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("id  score   title  content"));
        assert!(lines[2].starts_with("3   0.9123  Rust"));
        assert!(lines[2].ends_with("..."));
        assert_eq!(lines[3], "12  0.5000  Go");
    }

    #[test]
    fn test_empty_results() {
        assert_eq!(results_table(&[], &["title".to_string()]), "No results");
    }

    #[test]
    fn test_outcome_summary_lists_failures() {
        let mut outcome = SyncOutcome::no_changes(Watermark::default());
        outcome.fetched = 2;
        outcome.failed = 2;
        outcome.failures.push(BatchFailure {
            batch: 0,
            keys: vec![RowKey::Int(1), RowKey::Int(2)],
            reason: "rate limited".to_string(),
        });
        let summary = outcome_summary(&outcome);
        assert!(summary.contains("Failed:    2"));
        assert!(!summary.contains("Skipped"));
        assert!(summary.contains("batch 0 [1, 2]: rate limited"));

        outcome.skipped = 1;
        assert!(outcome_summary(&outcome).contains("Skipped:   1 (empty text)"));
    }
}
