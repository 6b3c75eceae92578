use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, require_admin, require_session};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

const CONTENT_KINDS: [&str; 3] = ["lecture", "material", "note"];

fn validate_kind(kind: &str) -> Result<(), HandlerErr> {
    if CONTENT_KINDS.contains(&kind) {
        Ok(())
    } else {
        Err(
            HandlerErr::new("bad_params", "kind must be one of: lecture, material, note")
                .with_details(json!({ "kind": kind })),
        )
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }

    let kind = match get_required_str(&req.params, "kind") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = validate_kind(&kind) {
        return e.response(&req.id);
    }
    let title = match get_required_str(&req.params, "title") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let url = get_optional_str(&req.params, "url");
    let body = get_optional_str(&req.params, "body");

    let id = Uuid::new_v4().to_string();
    let result = conn.execute(
        "INSERT INTO contents(id, kind, title, url, body, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &kind, &title, &url, &body, crate::ledger::today()),
    );
    match result {
        Ok(_) => ok(&req.id, json!({ "contentId": id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }

    let content_id = match get_required_str(&req.params, "contentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let title = get_optional_str(&req.params, "title");
    let url = get_optional_str(&req.params, "url");
    let body = get_optional_str(&req.params, "body");
    if title.is_none() && url.is_none() && body.is_none() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    let result = conn.execute(
        "UPDATE contents SET
           title = COALESCE(?, title),
           url = COALESCE(?, url),
           body = COALESCE(?, body)
         WHERE id = ?",
        (&title, &url, &body, &content_id),
    );
    match result {
        Ok(0) => err(
            &req.id,
            "not_found",
            "content not found",
            Some(json!({ "contentId": content_id })),
        ),
        Ok(_) => ok(&req.id, json!({ "contentId": content_id })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = require_admin(conn, &req.params) {
        return e.response(&req.id);
    }

    let content_id = match get_required_str(&req.params, "contentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match conn.execute("DELETE FROM contents WHERE id = ?", [&content_id]) {
        Ok(0) => err(
            &req.id,
            "not_found",
            "content not found",
            Some(json!({ "contentId": content_id })),
        ),
        Ok(_) => ok(&req.id, json!({ "contentId": content_id })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    // Any signed-in caller may browse the content library.
    if let Err(e) = require_session(conn, &req.params) {
        return e.response(&req.id);
    }

    let kind_filter = get_optional_str(&req.params, "kind");
    if let Some(kind) = &kind_filter {
        if let Err(e) = validate_kind(kind) {
            return e.response(&req.id);
        }
    }

    let items = (|| -> Result<Vec<serde_json::Value>, HandlerErr> {
        let (sql, bind) = match &kind_filter {
            Some(kind) => (
                "SELECT id, kind, title, url, body, created_at
                 FROM contents WHERE kind = ? ORDER BY created_at, id",
                Some(kind.clone()),
            ),
            None => (
                "SELECT id, kind, title, url, body, created_at
                 FROM contents ORDER BY created_at, id",
                None,
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let map_row = |r: &rusqlite::Row<'_>| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "kind": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "url": r.get::<_, Option<String>>(3)?,
                "body": r.get::<_, Option<String>>(4)?,
                "createdAt": r.get::<_, String>(5)?,
            }))
        };
        let rows = match &bind {
            Some(kind) => stmt.query_map([kind], map_row)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    })();

    match items {
        Ok(items) => ok(&req.id, json!({ "contents": items })),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "content.create" => Some(handle_create(state, req)),
        "content.update" => Some(handle_update(state, req)),
        "content.delete" => Some(handle_delete(state, req)),
        "content.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
