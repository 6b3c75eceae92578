use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_required_str, require_admin, require_session, resolve_student_scope};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let title = match get_required_str(&req.params, "title") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let file_url = match get_required_str(&req.params, "fileUrl") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let id = Uuid::new_v4().to_string();
    let result = conn.execute(
        "INSERT INTO submissions(id, student_id, title, file_url, submitted_at)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &student_id, &title, &file_url, crate::ledger::today()),
    );
    match result {
        Ok(_) => ok(&req.id, json!({ "submissionId": id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session = match require_session(conn, &req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Admins see every submission; students only their own.
    let (sql, bind) = if session.is_admin {
        (
            "SELECT id, student_id, title, file_url, submitted_at
             FROM submissions ORDER BY submitted_at, id",
            None,
        )
    } else {
        (
            "SELECT id, student_id, title, file_url, submitted_at
             FROM submissions WHERE student_id = ? ORDER BY submitted_at, id",
            Some(session.email.clone()),
        )
    };

    let submissions = (|| -> Result<Vec<serde_json::Value>, HandlerErr> {
        let mut stmt = conn.prepare(sql)?;
        let map_row = |r: &rusqlite::Row<'_>| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "fileUrl": r.get::<_, String>(3)?,
                "submittedAt": r.get::<_, String>(4)?,
            }))
        };
        let rows = match &bind {
            Some(email) => stmt.query_map([email], map_row)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    })();

    match submissions {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }

    let submission_id = match get_required_str(&req.params, "submissionId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match conn.execute("DELETE FROM submissions WHERE id = ?", [&submission_id]) {
        Ok(0) => err(
            &req.id,
            "not_found",
            "submission not found",
            Some(json!({ "submissionId": submission_id })),
        ),
        Ok(_) => ok(&req.id, json!({ "submissionId": submission_id })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.create" => Some(handle_create(state, req)),
        "submissions.list" => Some(handle_list(state, req)),
        "submissions.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
