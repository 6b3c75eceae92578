use rusqlite::Connection;
use serde_json::Value;

use crate::auth::{self, Session};
use crate::ipc::error::HandlerErr;

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolves `params.sessionToken` to a live session.
pub fn require_session(conn: &Connection, params: &Value) -> Result<Session, HandlerErr> {
    let token = get_required_str(params, "sessionToken")
        .map_err(|_| HandlerErr::new("unauthorized", "missing sessionToken"))?;
    auth::load_session(conn, &token)?
        .ok_or_else(|| HandlerErr::new("unauthorized", "session not found or expired"))
}

pub fn require_admin(conn: &Connection, params: &Value) -> Result<Session, HandlerErr> {
    let session = require_session(conn, params)?;
    if !session.is_admin {
        return Err(HandlerErr::new("unauthorized", "admin session required"));
    }
    Ok(session)
}

/// Students act on their own record; admins may name any student.
pub fn resolve_student_scope(
    session: &Session,
    params: &Value,
) -> Result<String, HandlerErr> {
    match get_optional_str(params, "studentId") {
        None => Ok(session.email.clone()),
        Some(requested) => {
            if session.is_admin || requested == session.email {
                Ok(requested)
            } else {
                Err(HandlerErr::new(
                    "unauthorized",
                    "students may only access their own record",
                ))
            }
        }
    }
}
