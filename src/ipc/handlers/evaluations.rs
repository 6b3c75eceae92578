use crate::import;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_required_str, require_admin, require_session, resolve_student_scope};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, Feedback};
use serde_json::json;

fn parse_feedback(params: &serde_json::Value) -> Result<Option<Feedback>, HandlerErr> {
    let Some(raw) = params.get("feedback") else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(obj) = raw.as_object() else {
        return Err(HandlerErr::new("bad_params", "feedback must be an object"));
    };
    let field = |key: &str| -> String {
        obj.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    Ok(Some(Feedback {
        strengths: field("strengths"),
        weaknesses: field("weaknesses"),
        resources: field("resources"),
    }))
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
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

    match ledger::get_record(conn, &student_id) {
        Ok(Some(record)) => ok(&req.id, json!({ "record": record })),
        // Lazy creation: no scores yet reads as an empty ledger, not an error.
        Ok(None) => ok(
            &req.id,
            json!({
                "record": {
                    "studentId": student_id,
                    "totalScore": 0.0,
                    "partialScores": []
                }
            }),
        ),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }

    match ledger::list_records(conn) {
        Ok(records) => ok(&req.id, json!({ "records": records })),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_add_score(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }

    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let name = match get_required_str(&req.params, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(score) = req.params.get("score").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing/invalid score", None);
    };
    if !(0.0..=100.0).contains(&score) {
        return err(
            &req.id,
            "bad_params",
            "score must be between 0 and 100",
            Some(json!({ "score": score })),
        );
    }
    let feedback = match parse_feedback(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match ledger::add_partial_score(conn, &student_id, &name, score, feedback.as_ref()) {
        Ok(added) => ok(&req.id, json!({ "added": added })),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_delete_score(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }

    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let partial_score_id = match get_required_str(&req.params, "partialScoreId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match ledger::delete_partial_score(conn, &student_id, &partial_score_id) {
        Ok(total_score) => ok(&req.id, json!({ "totalScore": total_score })),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_delete_score_by_name(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }

    let name = match get_required_str(&req.params, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match ledger::delete_partial_score_by_name_from_all(conn, &name) {
        Ok(updated_count) => ok(&req.id, json!({ "updatedCount": updated_count })),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }

    let Some(csv_text) = req.params.get("csv").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.csv", None);
    };

    match import::import_scores_csv(conn, csv_text) {
        Ok(summary) => ok(&req.id, json!(summary)),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evaluations.get" => Some(handle_get(state, req)),
        "evaluations.list" => Some(handle_list(state, req)),
        "evaluations.addScore" => Some(handle_add_score(state, req)),
        "evaluations.deleteScore" => Some(handle_delete_score(state, req)),
        "evaluations.deleteScoreByName" => Some(handle_delete_score_by_name(state, req)),
        "evaluations.importCsv" => Some(handle_import_csv(state, req)),
        _ => None,
    }
}
