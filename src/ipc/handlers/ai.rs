use crate::ai_eval::{self, GatewayConfig};
use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, require_session, resolve_student_scope};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn gateway_config(conn: &Connection) -> GatewayConfig {
    let mut config = GatewayConfig::from_env();
    if let Ok(Some(section)) = db::settings_get_json(conn, "setup.ai") {
        config.apply_overrides(&section);
    }
    config
}

fn resolve_file_url(
    conn: &Connection,
    params: &serde_json::Value,
    student_id: &str,
) -> Result<String, HandlerErr> {
    if let Some(url) = get_optional_str(params, "fileUrl") {
        return Ok(url);
    }
    let Some(submission_id) = get_optional_str(params, "submissionId") else {
        return Err(HandlerErr::new(
            "bad_params",
            "provide fileUrl or submissionId",
        ));
    };

    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT student_id, file_url FROM submissions WHERE id = ?",
            [&submission_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((owner, file_url)) = row else {
        return Err(HandlerErr::new("not_found", "submission not found")
            .with_details(json!({ "submissionId": submission_id })));
    };
    if owner != student_id {
        return Err(HandlerErr::new(
            "bad_params",
            "submission does not belong to the targeted student",
        ));
    }
    Ok(file_url)
}

fn handle_evaluate_submission(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let session = match require_session(conn, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let student_id = match resolve_student_scope(&session, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let file_url = match resolve_file_url(conn, &req.params, &student_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let config = gateway_config(conn);
    match ai_eval::evaluate_and_commit(conn, &config, &student_id, &file_url) {
        Ok(committed) => ok(&req.id, json!({ "evaluation": committed })),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "ai.evaluateSubmission" => Some(handle_evaluate_submission(state, req)),
        _ => None,
    }
}
