use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, require_admin};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_roster_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }

    let email = match get_required_str(&req.params, "email") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if !email.contains('@') {
        return err(
            &req.id,
            "bad_params",
            "email must be a valid address",
            Some(json!({ "email": email })),
        );
    }
    let display_name = get_optional_str(&req.params, "displayName");

    let result = conn.execute(
        "INSERT INTO authorized_students(email, display_name, added_at)
         VALUES(?, ?, ?)
         ON CONFLICT(email) DO UPDATE SET display_name = excluded.display_name",
        (&email, &display_name, crate::ledger::today()),
    );
    match result {
        Ok(_) => ok(&req.id, json!({ "email": email })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_roster_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }

    let email = match get_required_str(&req.params, "email") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match conn.execute("DELETE FROM authorized_students WHERE email = ?", [&email]) {
        Ok(0) => err(
            &req.id,
            "not_found",
            "email is not on the roster",
            Some(json!({ "email": email })),
        ),
        Ok(_) => ok(&req.id, json!({ "email": email })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_roster_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }

    let students = (|| -> Result<Vec<serde_json::Value>, HandlerErr> {
        let mut stmt = conn.prepare(
            "SELECT email, display_name, added_at FROM authorized_students ORDER BY email",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(json!({
                    "email": r.get::<_, String>(0)?,
                    "displayName": r.get::<_, Option<String>>(1)?,
                    "addedAt": r.get::<_, String>(2)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })();

    match students {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.add" => Some(handle_roster_add(state, req)),
        "roster.remove" => Some(handle_roster_remove(state, req)),
        "roster.list" => Some(handle_roster_list(state, req)),
        _ => None,
    }
}
