use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 2-decimal half-up rounding used for ledger totals:
/// `Int(100*x + 0.5) / 100`
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Scores are clamped at the boundary rather than rejected, to tolerate
/// upstream float noise; range errors are caught by callers before this.
pub fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// Total for a record: capped, rounded mean of its partial scores.
/// An empty list totals exactly 0.
pub fn total_from_scores(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let mean = scores.iter().sum::<f64>() / (scores.len() as f64);
    round_off_2_decimals(mean.min(100.0))
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerError {
    pub code: String,
    pub message: String,
}

impl LedgerError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    pub strengths: String,
    pub weaknesses: String,
    pub resources: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialScore {
    pub id: String,
    pub name: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRecord {
    pub student_id: String,
    pub total_score: f64,
    pub partial_scores: Vec<PartialScore>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedScore {
    pub partial_score_id: String,
    pub stored_score: f64,
    pub total_score: f64,
}

pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

fn db_err(e: rusqlite::Error) -> LedgerError {
    LedgerError::new("db_query_failed", e.to_string())
}

/// Appends one partial score and recomputes the stored total, atomically.
/// The record row is created lazily on the first score for a student.
pub fn add_partial_score(
    conn: &mut Connection,
    student_id: &str,
    name: &str,
    score: f64,
    feedback: Option<&Feedback>,
) -> Result<AddedScore, LedgerError> {
    let student_id = student_id.trim();
    if student_id.is_empty() {
        return Err(LedgerError::new("bad_params", "missing studentId"));
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::new("bad_params", "score name must not be empty"));
    }
    if !score.is_finite() {
        return Err(LedgerError::new("bad_params", "score must be a finite number"));
    }
    let stored_score = clamp_score(score);

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(db_err)?;

    let now = today();
    tx.execute(
        "INSERT INTO evaluation_records(student_id, total_score, updated_at)
         VALUES(?, 0, ?)
         ON CONFLICT(student_id) DO NOTHING",
        (student_id, &now),
    )
    .map_err(|e| LedgerError::new("db_insert_failed", e.to_string()))?;

    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO partial_scores(id, student_id, name, score, strengths, weaknesses, resources, date)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            student_id,
            name,
            stored_score,
            feedback.map(|f| f.strengths.as_str()),
            feedback.map(|f| f.weaknesses.as_str()),
            feedback.map(|f| f.resources.as_str()),
            &now,
        ),
    )
    .map_err(|e| LedgerError::new("db_insert_failed", e.to_string()))?;

    let total_score = recompute_total(&tx, student_id)?;
    tx.commit().map_err(db_err)?;

    Ok(AddedScore {
        partial_score_id: id,
        stored_score,
        total_score,
    })
}

/// Removes exactly one partial score and recomputes the total, atomically.
/// Missing record, empty list, and unknown id all report `not_found`.
pub fn delete_partial_score(
    conn: &mut Connection,
    student_id: &str,
    partial_score_id: &str,
) -> Result<f64, LedgerError> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(db_err)?;

    let record_exists: Option<String> = tx
        .query_row(
            "SELECT student_id FROM evaluation_records WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if record_exists.is_none() {
        return Err(LedgerError::new("not_found", "no evaluation record for student"));
    }

    let removed = tx
        .execute(
            "DELETE FROM partial_scores WHERE student_id = ? AND id = ?",
            (student_id, partial_score_id),
        )
        .map_err(db_err)?;
    if removed == 0 {
        return Err(LedgerError::new("not_found", "partial score not found"));
    }

    let total_score = recompute_total(&tx, student_id)?;
    tx.commit().map_err(db_err)?;
    Ok(total_score)
}

/// Removes every partial score with the given name across all records,
/// recomputing each affected total. The whole sweep commits as one
/// transaction; records without a match are not written at all.
///
/// Known limitation: the sweep snapshots matches up front, so a
/// single-student write racing the batch can be overwritten. Accepted for
/// this rare administrative cleanup.
pub fn delete_partial_score_by_name_from_all(
    conn: &mut Connection,
    score_name: &str,
) -> Result<usize, LedgerError> {
    let score_name = score_name.trim();
    if score_name.is_empty() {
        return Err(LedgerError::new("bad_params", "score name must not be empty"));
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(db_err)?;

    let affected: Vec<String> = {
        let mut stmt = tx
            .prepare("SELECT DISTINCT student_id FROM partial_scores WHERE name = ?")
            .map_err(db_err)?;
        stmt.query_map([score_name], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?
    };

    for student_id in &affected {
        tx.execute(
            "DELETE FROM partial_scores WHERE student_id = ? AND name = ?",
            (student_id, score_name),
        )
        .map_err(db_err)?;
        recompute_total(&tx, student_id)?;
    }

    tx.commit().map_err(db_err)?;
    Ok(affected.len())
}

pub fn get_record(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<EvaluationRecord>, LedgerError> {
    let total: Option<f64> = conn
        .query_row(
            "SELECT total_score FROM evaluation_records WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(total_score) = total else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, name, score, strengths, weaknesses, resources, date
             FROM partial_scores
             WHERE student_id = ?
             ORDER BY date, id",
        )
        .map_err(db_err)?;
    let partial_scores = stmt
        .query_map([student_id], row_to_partial_score)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(Some(EvaluationRecord {
        student_id: student_id.to_string(),
        total_score,
        partial_scores,
    }))
}

pub fn list_records(conn: &Connection) -> Result<Vec<EvaluationRecord>, LedgerError> {
    let student_ids: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT student_id FROM evaluation_records ORDER BY student_id")
            .map_err(db_err)?;
        stmt.query_map([], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?
    };

    let mut out = Vec::with_capacity(student_ids.len());
    for sid in student_ids {
        if let Some(rec) = get_record(conn, &sid)? {
            out.push(rec);
        }
    }
    Ok(out)
}

/// Used by the legacy-shape migration only: inserts a pre-existing score
/// without a transaction of its own (the caller owns the write scope).
pub fn insert_migrated_score(
    conn: &Connection,
    student_id: &str,
    name: &str,
    score: f64,
    strengths: Option<&str>,
    weaknesses: Option<&str>,
    resources: Option<&str>,
) -> anyhow::Result<()> {
    let stored = clamp_score(score);
    conn.execute(
        "INSERT INTO partial_scores(id, student_id, name, score, strengths, weaknesses, resources, date)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            student_id,
            name,
            stored,
            strengths,
            weaknesses,
            resources,
            today(),
        ),
    )?;
    recompute_total(conn, student_id).map_err(|e| anyhow::anyhow!(e.message))?;
    Ok(())
}

fn recompute_total(conn: &Connection, student_id: &str) -> Result<f64, LedgerError> {
    let scores: Vec<f64> = {
        let mut stmt = conn
            .prepare("SELECT score FROM partial_scores WHERE student_id = ?")
            .map_err(db_err)?;
        stmt.query_map([student_id], |r| r.get::<_, f64>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?
    };
    let total = total_from_scores(&scores);
    conn.execute(
        "UPDATE evaluation_records SET total_score = ?, updated_at = ? WHERE student_id = ?",
        (total, today(), student_id),
    )
    .map_err(db_err)?;
    Ok(total)
}

fn row_to_partial_score(r: &rusqlite::Row<'_>) -> rusqlite::Result<PartialScore> {
    let strengths: Option<String> = r.get(3)?;
    let weaknesses: Option<String> = r.get(4)?;
    let resources: Option<String> = r.get(5)?;
    let feedback = match (strengths, weaknesses, resources) {
        (None, None, None) => None,
        (s, w, rs) => Some(Feedback {
            strengths: s.unwrap_or_default(),
            weaknesses: w.unwrap_or_default(),
            resources: rs.unwrap_or_default(),
        }),
    };
    Ok(PartialScore {
        id: r.get(0)?,
        name: r.get(1)?,
        score: r.get(2)?,
        feedback,
        date: r.get(6)?,
    })
}
