use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// An authenticated caller. Handlers receive this as an explicit value
/// rather than reading ambient client-side state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub email: String,
    pub is_admin: bool,
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn admin_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM admins", [], |r| r.get(0))
}

/// Upserts the admin credential with a fresh salt. Plaintext is never
/// stored; only `sha256(salt || password)` is.
pub fn set_admin_password(conn: &Connection, email: &str, password: &str) -> rusqlite::Result<()> {
    let salt = Uuid::new_v4().to_string();
    let hash = hash_password(&salt, password);
    conn.execute(
        "INSERT INTO admins(email, pass_salt, pass_hash) VALUES(?, ?, ?)
         ON CONFLICT(email) DO UPDATE SET
           pass_salt = excluded.pass_salt,
           pass_hash = excluded.pass_hash",
        (email, &salt, &hash),
    )?;
    Ok(())
}

pub fn verify_admin(conn: &Connection, email: &str, password: &str) -> rusqlite::Result<bool> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT pass_salt, pass_hash FROM admins WHERE email = ?",
            [email],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((salt, stored_hash)) = row else {
        return Ok(false);
    };
    Ok(hash_password(&salt, password) == stored_hash)
}

pub fn is_authorized_student(conn: &Connection, email: &str) -> rusqlite::Result<bool> {
    let row: Option<String> = conn
        .query_row(
            "SELECT email FROM authorized_students WHERE email = ?",
            [email],
            |r| r.get(0),
        )
        .optional()?;
    Ok(row.is_some())
}

pub fn create_session(conn: &Connection, email: &str, is_admin: bool) -> rusqlite::Result<Session> {
    let token = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions(token, email, is_admin, created_at) VALUES(?, ?, ?, ?)",
        (
            &token,
            email,
            is_admin as i64,
            chrono::Local::now().to_rfc3339(),
        ),
    )?;
    Ok(Session {
        token,
        email: email.to_string(),
        is_admin,
    })
}

pub fn load_session(conn: &Connection, token: &str) -> rusqlite::Result<Option<Session>> {
    conn.query_row(
        "SELECT token, email, is_admin FROM sessions WHERE token = ?",
        [token],
        |r| {
            Ok(Session {
                token: r.get(0)?,
                email: r.get(1)?,
                is_admin: r.get::<_, i64>(2)? != 0,
            })
        },
    )
    .optional()
}

pub fn clear_session(conn: &Connection, token: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM sessions WHERE token = ?", [token])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        crate::db::init_schema(&conn).expect("init schema");
        conn
    }

    #[test]
    fn password_hashes_are_salted() {
        let a = hash_password("salt-a", "hunter2");
        let b = hash_password("salt-b", "hunter2");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn verify_rejects_wrong_password_and_unknown_admin() {
        let conn = test_conn();
        set_admin_password(&conn, "admin@x.com", "secret").expect("set password");

        assert!(verify_admin(&conn, "admin@x.com", "secret").expect("verify"));
        assert!(!verify_admin(&conn, "admin@x.com", "wrong").expect("verify"));
        assert!(!verify_admin(&conn, "other@x.com", "secret").expect("verify"));
    }

    #[test]
    fn password_reset_rotates_the_salt() {
        let conn = test_conn();
        set_admin_password(&conn, "admin@x.com", "first").expect("set");
        let first: String = conn
            .query_row("SELECT pass_salt FROM admins WHERE email = ?", ["admin@x.com"], |r| r.get(0))
            .expect("salt");

        set_admin_password(&conn, "admin@x.com", "second").expect("reset");
        let second: String = conn
            .query_row("SELECT pass_salt FROM admins WHERE email = ?", ["admin@x.com"], |r| r.get(0))
            .expect("salt");

        assert_ne!(first, second);
        assert!(!verify_admin(&conn, "admin@x.com", "first").expect("verify"));
        assert!(verify_admin(&conn, "admin@x.com", "second").expect("verify"));
    }

    #[test]
    fn sessions_round_trip_and_clear() {
        let conn = test_conn();
        let session = create_session(&conn, "a@x.com", false).expect("create");

        let loaded = load_session(&conn, &session.token)
            .expect("load")
            .expect("session");
        assert_eq!(loaded.email, "a@x.com");
        assert!(!loaded.is_admin);

        assert_eq!(clear_session(&conn, &session.token).expect("clear"), 1);
        assert!(load_session(&conn, &session.token).expect("load").is_none());
    }
}
