use rusqlite::Connection;
use std::path::Path;

pub const DB_FILENAME: &str = "portal.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILENAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    init_schema(&conn)?;

    // Older workspaces stored one evaluation per student directly on the
    // record row. Normalize those into partial scores before serving reads.
    let migrated = migrate_legacy_evaluations(&conn)?;
    if migrated > 0 {
        tracing::info!(migrated, "normalized legacy single-score evaluations");
    }

    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS authorized_students(
            email TEXT PRIMARY KEY,
            display_name TEXT,
            added_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            email TEXT PRIMARY KEY,
            pass_salt TEXT NOT NULL,
            pass_hash TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            is_admin INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluation_records(
            student_id TEXT PRIMARY KEY,
            total_score REAL NOT NULL DEFAULT 0,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS partial_scores(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            name TEXT NOT NULL,
            score REAL NOT NULL,
            strengths TEXT,
            weaknesses TEXT,
            resources TEXT,
            date TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES evaluation_records(student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_partial_scores_student ON partial_scores(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_partial_scores_name ON partial_scores(name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            title TEXT NOT NULL,
            file_url TEXT NOT NULL,
            submitted_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_student ON submissions(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS contents(
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            url TEXT,
            body TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_contents_kind ON contents(kind)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lecture_feedback(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            content_id TEXT,
            rating INTEGER,
            comments TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lecture_feedback_student ON lecture_feedback(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

/// v0 -> v1 evaluation shape: older workspaces carried `score`/`feedback`
/// columns on `evaluation_records` holding a single evaluation per student.
/// Each such row becomes one "Imported Evaluation" partial score, with the
/// free-text feedback blob re-sectioned into structured fields. Runs only
/// when the legacy columns exist; NULLs them out so a rerun is a no-op.
fn migrate_legacy_evaluations(conn: &Connection) -> anyhow::Result<usize> {
    if !table_has_column(conn, "evaluation_records", "score")? {
        return Ok(0);
    }

    let has_feedback = table_has_column(conn, "evaluation_records", "feedback")?;
    let sql = if has_feedback {
        "SELECT student_id, score, feedback FROM evaluation_records WHERE score IS NOT NULL"
    } else {
        "SELECT student_id, score, NULL FROM evaluation_records WHERE score IS NOT NULL"
    };

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    let mut migrated = 0usize;
    for (student_id, legacy_score, legacy_feedback) in rows {
        let existing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM partial_scores WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )?;
        if existing == 0 {
            let feedback = legacy_feedback
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .map(crate::sections::section_feedback);
            let (strengths, weaknesses, resources) = match &feedback {
                Some(s) => {
                    let (st, we, re) = s.to_feedback_fields();
                    (Some(st), Some(we), Some(re))
                }
                None => (None, None, None),
            };
            crate::ledger::insert_migrated_score(
                conn,
                &student_id,
                "Imported Evaluation",
                legacy_score,
                strengths.as_deref(),
                weaknesses.as_deref(),
                resources.as_deref(),
            )?;
            migrated += 1;
        }
        conn.execute(
            if has_feedback {
                "UPDATE evaluation_records SET score = NULL, feedback = NULL WHERE student_id = ?"
            } else {
                "UPDATE evaluation_records SET score = NULL WHERE student_id = ?"
            },
            [&student_id],
        )?;
    }

    Ok(migrated)
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let mut stmt = conn.prepare("SELECT value_json FROM settings WHERE key = ?")?;
    let mut rows = stmt.query([key])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let raw: String = row.get(0)?;
    Ok(serde_json::from_str(&raw).ok())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
