use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, require_admin, require_session};
use crate::ipc::types::{AppState, Request};
use crate::sections;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session = match require_session(conn, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let rating = match req.params.get("rating").and_then(|v| v.as_i64()) {
        Some(v) if (1..=5).contains(&v) => v,
        Some(v) => {
            return err(
                &req.id,
                "bad_params",
                "rating must be between 1 and 5",
                Some(json!({ "rating": v })),
            );
        }
        None => return err(&req.id, "bad_params", "missing/invalid rating", None),
    };
    let comments = get_optional_str(&req.params, "comments");

    let content_id = get_optional_str(&req.params, "contentId");
    if let Some(cid) = &content_id {
        let exists: Option<String> = match conn
            .query_row("SELECT id FROM contents WHERE id = ?", [cid], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return HandlerErr::from(e).response(&req.id),
        };
        if exists.is_none() {
            return err(
                &req.id,
                "not_found",
                "content not found",
                Some(json!({ "contentId": cid })),
            );
        }
    }

    let id = Uuid::new_v4().to_string();
    let result = conn.execute(
        "INSERT INTO lecture_feedback(id, student_id, content_id, rating, comments, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            &session.email,
            &content_id,
            rating,
            &comments,
            crate::ledger::today(),
        ),
    );
    match result {
        Ok(_) => ok(&req.id, json!({ "feedbackId": id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }

    let content_filter = get_optional_str(&req.params, "contentId");
    let entries = (|| -> Result<Vec<serde_json::Value>, HandlerErr> {
        let (sql, bind) = match &content_filter {
            Some(cid) => (
                "SELECT id, student_id, content_id, rating, comments, created_at
                 FROM lecture_feedback WHERE content_id = ? ORDER BY created_at, id",
                Some(cid.clone()),
            ),
            None => (
                "SELECT id, student_id, content_id, rating, comments, created_at
                 FROM lecture_feedback ORDER BY created_at, id",
                None,
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let map_row = |r: &rusqlite::Row<'_>| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "contentId": r.get::<_, Option<String>>(2)?,
                "rating": r.get::<_, i64>(3)?,
                "comments": r.get::<_, Option<String>>(4)?,
                "createdAt": r.get::<_, String>(5)?,
            }))
        };
        let rows = match &bind {
            Some(cid) => stmt.query_map([cid], map_row)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    })();

    match entries {
        Ok(entries) => ok(&req.id, json!({ "feedback": entries })),
        Err(e) => e.response(&req.id),
    }
}

/// Splits a free-text feedback blob into display sections. Heuristic only;
/// the display layer decides what to do with the buckets.
fn handle_section(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_session(conn, &req.params) {
        return e.response(&req.id);
    }

    let text = match get_required_str(&req.params, "text") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let sectioned = sections::section_feedback(&text);
    ok(&req.id, json!({ "sections": sectioned }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "feedback.submit" => Some(handle_submit(state, req)),
        "feedback.list" => Some(handle_list(state, req)),
        "feedback.section" => Some(handle_section(state, req)),
        _ => None,
    }
}
