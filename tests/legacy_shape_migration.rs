use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_portald");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn portald");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn admin_token(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "bootstrap",
        "auth.setAdminPassword",
        json!({ "email": "admin@portal.test", "password": "correct horse" }),
    );
    let login = request_ok(
        stdin,
        reader,
        "login",
        "auth.login",
        json!({ "email": "admin@portal.test", "password": "correct horse" }),
    );
    login
        .get("session")
        .and_then(|s| s.get("token"))
        .and_then(|v| v.as_str())
        .expect("session token")
        .to_string()
}

/// Builds a pre-normalization workspace: the record row carries the single
/// legacy score/feedback columns and no partial scores exist.
fn write_legacy_workspace(workspace: &PathBuf) {
    let conn = Connection::open(workspace.join("portal.sqlite3")).expect("open legacy db");
    conn.execute(
        "CREATE TABLE evaluation_records(
            student_id TEXT PRIMARY KEY,
            total_score REAL NOT NULL DEFAULT 0,
            updated_at TEXT,
            score REAL,
            feedback TEXT
        )",
        [],
    )
    .expect("create legacy table");
    conn.execute(
        "INSERT INTO evaluation_records(student_id, total_score, updated_at, score, feedback)
         VALUES(?, ?, ?, ?, ?)",
        (
            "legacy@x.com",
            72.0,
            "2023-05-01",
            72.0,
            "Good structure. Error handling is missing. See chapter 2 of the course docs.",
        ),
    )
    .expect("insert legacy row");
}

#[test]
fn legacy_single_score_rows_become_partial_scores() {
    let workspace = temp_dir("portal-legacy-migration");
    write_legacy_workspace(&workspace);

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let token = admin_token(&mut stdin, &mut reader);

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "evaluations.get",
        json!({ "sessionToken": token, "studentId": "legacy@x.com" }),
    );
    let record = got.get("record").expect("record");
    assert_eq!(record.get("totalScore").and_then(|v| v.as_f64()), Some(72.0));

    let partials = record
        .get("partialScores")
        .and_then(|v| v.as_array())
        .expect("partialScores");
    assert_eq!(partials.len(), 1);
    assert_eq!(
        partials[0].get("name").and_then(|v| v.as_str()),
        Some("Imported Evaluation")
    );
    assert_eq!(partials[0].get("score").and_then(|v| v.as_f64()), Some(72.0));

    // The feedback blob was re-sectioned into structured fields.
    let feedback = partials[0].get("feedback").expect("feedback");
    assert_eq!(
        feedback.get("strengths").and_then(|v| v.as_str()),
        Some("Good structure.")
    );
    assert_eq!(
        feedback.get("weaknesses").and_then(|v| v.as_str()),
        Some("Error handling is missing.")
    );
    assert_eq!(
        feedback.get("resources").and_then(|v| v.as_str()),
        Some("See chapter 2 of the course docs.")
    );

    // Reopening the workspace does not duplicate the migrated score.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "evaluations.get",
        json!({ "sessionToken": token, "studentId": "legacy@x.com" }),
    );
    let partials = got
        .get("record")
        .and_then(|r| r.get("partialScores"))
        .and_then(|v| v.as_array())
        .expect("partialScores");
    assert_eq!(partials.len(), 1);
}

#[test]
fn migrated_records_accept_new_scores_normally() {
    let workspace = temp_dir("portal-legacy-migration-add");
    write_legacy_workspace(&workspace);

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let token = admin_token(&mut stdin, &mut reader);

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "evaluations.addScore",
        json!({
            "sessionToken": token,
            "studentId": "legacy@x.com",
            "name": "Quiz1",
            "score": 88
        }),
    );
    // mean(72, 88) = 80
    assert_eq!(
        added
            .get("added")
            .and_then(|a| a.get("totalScore"))
            .and_then(|v| v.as_f64()),
        Some(80.0)
    );
}
