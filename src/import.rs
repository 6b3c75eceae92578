use rusqlite::Connection;
use serde::Serialize;

use crate::ledger::{self, LedgerError};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub success_count: usize,
    pub error_count: usize,
}

struct ColumnMap {
    email: usize,
    name: usize,
    score: usize,
}

/// Replays `(email, name, score)` rows from CSV text through the ledger.
/// The header row must name the `email`, `name` and `score` columns
/// (case-sensitive); blank lines are skipped. Malformed rows are counted
/// and logged, never written. Rows apply sequentially so the counts are
/// deterministic.
pub fn import_scores_csv(
    conn: &mut Connection,
    csv_text: &str,
) -> Result<ImportSummary, LedgerError> {
    let mut lines = csv_text.lines().filter(|l| !l.trim().is_empty());

    let Some(header_line) = lines.next() else {
        return Err(LedgerError::new("bad_params", "csv input is empty"));
    };
    let columns = parse_header(header_line)?;

    let mut success_count = 0usize;
    let mut error_count = 0usize;

    for (index, line) in lines.enumerate() {
        let fields = parse_csv_record(line);
        let email = field_at(&fields, columns.email);
        let name = field_at(&fields, columns.name);
        let score_raw = field_at(&fields, columns.score);

        let (Some(email), Some(name), Some(score_raw)) = (email, name, score_raw) else {
            tracing::warn!(row = index, "skipping csv row with missing fields");
            error_count += 1;
            continue;
        };

        let Ok(score) = score_raw.parse::<f64>() else {
            tracing::warn!(row = index, value = %score_raw, "skipping csv row with non-numeric score");
            error_count += 1;
            continue;
        };

        match ledger::add_partial_score(conn, &email, &name, score, None) {
            Ok(_) => success_count += 1,
            Err(e) => {
                tracing::warn!(row = index, code = %e.code, "csv row rejected by ledger");
                error_count += 1;
            }
        }
    }

    Ok(ImportSummary {
        success_count,
        error_count,
    })
}

fn parse_header(line: &str) -> Result<ColumnMap, LedgerError> {
    let headers = parse_csv_record(line);
    let position = |wanted: &str| {
        headers
            .iter()
            .position(|h| h.trim() == wanted)
            .ok_or_else(|| {
                LedgerError::new(
                    "bad_params",
                    format!("csv header must include a '{}' column", wanted),
                )
            })
    };
    Ok(ColumnMap {
        email: position("email")?,
        name: position("name")?,
        score: position("score")?,
    })
}

fn field_at(fields: &[String], index: usize) -> Option<String> {
    let raw = fields.get(index)?.trim();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}
