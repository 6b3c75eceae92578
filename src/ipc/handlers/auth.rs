use crate::auth;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_required_str, require_admin, require_session};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Sets or rotates an admin credential. The first admin of a fresh
/// workspace bootstraps without a session; afterwards an admin session is
/// required so students cannot self-promote.
fn handle_set_admin_password(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let email = match get_required_str(&req.params, "email") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let password = match get_required_str(&req.params, "password") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let existing = match auth::admin_count(conn) {
        Ok(v) => v,
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };
    if existing > 0 {
        if let Err(e) = require_admin(conn, &req.params) {
            return e.response(&req.id);
        }
    }

    match auth::set_admin_password(conn, &email, &password) {
        Ok(()) => ok(&req.id, json!({ "email": email })),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let email = match get_required_str(&req.params, "email") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Admin login carries a password; student login is a roster check.
    let result = if let Some(password) = req.params.get("password").and_then(|v| v.as_str()) {
        match auth::verify_admin(conn, &email, password) {
            Ok(true) => auth::create_session(conn, &email, true),
            Ok(false) => {
                return err(&req.id, "unauthorized", "invalid admin credentials", None);
            }
            Err(e) => return HandlerErr::from(e).response(&req.id),
        }
    } else {
        match auth::is_authorized_student(conn, &email) {
            Ok(true) => auth::create_session(conn, &email, false),
            Ok(false) => {
                return err(
                    &req.id,
                    "unauthorized",
                    "email is not on the authorized student roster",
                    None,
                );
            }
            Err(e) => return HandlerErr::from(e).response(&req.id),
        }
    };

    match result {
        Ok(session) => ok(&req.id, json!({ "session": session })),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let token = match get_required_str(&req.params, "sessionToken") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match auth::clear_session(conn, &token) {
        Ok(cleared) => ok(&req.id, json!({ "cleared": cleared > 0 })),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match require_session(conn, &req.params) {
        Ok(session) => ok(&req.id, json!({ "session": session })),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.setAdminPassword" => Some(handle_set_admin_password(state, req)),
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.session" => Some(handle_session(state, req)),
        _ => None,
    }
}
