use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const ROLES: &[&str] = &[
    "admin",
    "teacher",
    "parent",
    "student",
    "accounts",
    "library",
    "hostel",
    "transport",
];

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    fn query(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let v = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if v.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(v)
}

fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn validate_role(role: &str) -> Result<(), HandlerErr> {
    if ROLES.contains(&role) {
        return Ok(());
    }
    Err(HandlerErr {
        code: "bad_params",
        message: format!("unknown role: {}", role),
        details: Some(json!({ "roles": ROLES })),
    })
}

/// A student record may carry the parent's email; store the parent user's id
/// instead, failing the write when no such parent exists.
fn resolve_parent_id(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<Option<String>, HandlerErr> {
    let Some(parent_email) = get_opt_str(params, "parentEmail") else {
        return Ok(None);
    };
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM users WHERE email = ? AND role = 'parent'",
            [&parent_email],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    match found {
        Some(id) => Ok(Some(id)),
        None => Err(HandlerErr {
            code: "not_found",
            message: format!("parent with email {} not found", parent_email),
            details: None,
        }),
    }
}

fn user_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "email": r.get::<_, String>(2)?,
        "role": r.get::<_, String>(3)?,
        "phone": r.get::<_, Option<String>>(4)?,
        "address": r.get::<_, Option<String>>(5)?,
        "classId": r.get::<_, Option<String>>(6)?,
        "parentId": r.get::<_, Option<String>>(7)?,
        "rollNumber": r.get::<_, Option<String>>(8)?,
        "gender": r.get::<_, Option<String>>(9)?,
        "createdAt": r.get::<_, Option<String>>(10)?,
    }))
}

const USER_COLUMNS: &str =
    "id, name, email, role, phone, address, class_id, parent_id, roll_number, gender, created_at";

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };

    let role_filter = get_opt_str(&req.params, "role");
    let sql = match role_filter {
        Some(_) => format!(
            "SELECT {} FROM users WHERE role = ? ORDER BY name",
            USER_COLUMNS
        ),
        None => format!("SELECT {} FROM users ORDER BY role, name", USER_COLUMNS),
    };

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match role_filter {
        Some(role) => stmt
            .query_map([&role], |r| user_row_json(r))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], |r| user_row_json(r))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn users_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let email = get_required_str(params, "email")?;
    let role = get_required_str(params, "role")?;
    validate_role(&role)?;

    let parent_id = if role == "student" {
        resolve_parent_id(conn, params)?
    } else {
        None
    };

    let user_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users(id, name, email, role, phone, address, class_id, parent_id, roll_number, gender, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            user_id,
            name,
            email,
            role,
            get_opt_str(params, "phone"),
            get_opt_str(params, "address"),
            get_opt_str(params, "classId"),
            parent_id,
            get_opt_str(params, "rollNumber"),
            get_opt_str(params, "gender"),
            created_at,
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "users" })),
    })?;

    Ok(json!({ "userId": user_id, "name": name, "role": role }))
}

fn users_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;

    let role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [&user_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(current_role) = role else {
        return Err(HandlerErr {
            code: "not_found",
            message: "user not found".to_string(),
            details: None,
        });
    };

    if let Some(new_role) = get_opt_str(params, "role") {
        validate_role(&new_role)?;
    }
    let effective_role = get_opt_str(params, "role").unwrap_or(current_role);
    let parent_id = if effective_role == "student" {
        resolve_parent_id(conn, params)?
    } else {
        None
    };

    // Only fields present in params change; absent keys keep current values.
    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    for (key, column) in [
        ("name", "name"),
        ("email", "email"),
        ("role", "role"),
        ("phone", "phone"),
        ("address", "address"),
        ("classId", "class_id"),
        ("rollNumber", "roll_number"),
        ("gender", "gender"),
    ] {
        if params.get(key).is_some() {
            sets.push(format!("{} = ?", column));
            values.push(Box::new(get_opt_str(params, key)));
        }
    }
    if let Some(pid) = parent_id {
        sets.push("parent_id = ?".to_string());
        values.push(Box::new(pid));
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("no fields to update"));
    }

    values.push(Box::new(user_id.clone()));
    let sql = format!("UPDATE users SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "users" })),
        })?;

    Ok(json!({ "userId": user_id }))
}

fn users_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let changed = conn
        .execute("DELETE FROM users WHERE id = ?", [&user_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: None,
        })?;
    if changed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "user not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "userId": user_id }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(handle_users_list(state, req)),
        "users.create" => Some(with_conn(state, req, users_create)),
        "users.update" => Some(with_conn(state, req, users_update)),
        "users.delete" => Some(with_conn(state, req, users_delete)),
        _ => None,
    }
}
