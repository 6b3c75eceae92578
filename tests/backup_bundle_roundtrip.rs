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

#[test]
fn exported_bundle_restores_ledger_state_in_a_fresh_workspace() {
    let workspace_a = temp_dir("portal-backup-src");
    let workspace_b = temp_dir("portal-backup-dst");
    let bundle_path = temp_dir("portal-backup-out").join("portal-backup.zip");

    let (_child, mut stdin, mut reader) = spawn_sidecar();

    // Source workspace with some ledger state.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace_a.to_string_lossy() }),
    );
    let token_a = admin_token(&mut stdin, &mut reader);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "evaluations.addScore",
        json!({
            "sessionToken": token_a,
            "studentId": "a@x.com",
            "name": "Quiz1",
            "score": 80
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "evaluations.addScore",
        json!({
            "sessionToken": token_a,
            "studentId": "a@x.com",
            "name": "Quiz2",
            "score": 90
        }),
    );

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.export",
        json!({ "sessionToken": token_a, "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        export.get("bundleFormat").and_then(|v| v.as_str()),
        Some("portal-workspace-v1")
    );
    assert!(bundle_path.is_file());

    // Fresh workspace; its own bootstrap admin authorizes the import.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.select",
        json!({ "path": workspace_b.to_string_lossy() }),
    );
    let token_b = admin_token(&mut stdin, &mut reader);
    let import = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.import",
        json!({ "sessionToken": token_b, "inPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        import.get("bundleFormatDetected").and_then(|v| v.as_str()),
        Some("portal-workspace-v1")
    );

    // The imported database is the source snapshot, sessions included.
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "evaluations.get",
        json!({ "sessionToken": token_a, "studentId": "a@x.com" }),
    );
    let record = got.get("record").expect("record");
    assert_eq!(record.get("totalScore").and_then(|v| v.as_f64()), Some(85.0));
    assert_eq!(
        record
            .get("partialScores")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );
}

#[test]
fn import_rejects_a_non_bundle_file() {
    let workspace = temp_dir("portal-backup-badfile");
    let bogus = temp_dir("portal-backup-bogus").join("not-a-bundle.zip");
    std::fs::write(&bogus, b"plainly not a zip archive").expect("write bogus file");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let token = admin_token(&mut stdin, &mut reader);

    let raw = request(
        &mut stdin,
        &mut reader,
        "2",
        "backup.import",
        json!({ "sessionToken": token, "inPath": bogus.to_string_lossy() }),
    );
    assert_eq!(raw.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        raw.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("io_failed")
    );

    // The daemon stays usable on the original workspace afterwards.
    let raw = request(
        &mut stdin,
        &mut reader,
        "3",
        "health",
        json!({}),
    );
    assert_eq!(raw.get("ok").and_then(|v| v.as_bool()), Some(true));
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.session",
        json!({ "sessionToken": token }),
    );
    assert_eq!(
        got.get("session")
            .and_then(|s| s.get("isAdmin"))
            .and_then(|v| v.as_bool()),
        Some(true)
    );
}
