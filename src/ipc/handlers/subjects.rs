use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
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
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn subject_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "classId": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "teacherId": r.get::<_, Option<String>>(3)?,
        "sortOrder": r.get::<_, i64>(4)?,
    }))
}

fn subjects_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_filter = params
        .get("classId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let rows = match class_filter {
        Some(class_id) => {
            let mut stmt = conn
                .prepare(
                    "SELECT id, class_id, name, teacher_id, sort_order
                     FROM subjects WHERE class_id = ?
                     ORDER BY sort_order, rowid",
                )
                .map_err(HandlerErr::query)?;
            stmt.query_map([&class_id], |r| subject_json(r))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::query)?
        }
        None => {
            let mut stmt = conn
                .prepare(
                    "SELECT id, class_id, name, teacher_id, sort_order
                     FROM subjects
                     ORDER BY class_id, sort_order, rowid",
                )
                .map_err(HandlerErr::query)?;
            stmt.query_map([], |r| subject_json(r))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::query)?
        }
    };

    Ok(json!({ "subjects": rows }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let name = get_required_str(params, "name")?;
    let teacher_id = params
        .get("teacherId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    // New subjects rotate last within their class.
    let next_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM subjects WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, class_id, name, teacher_id, sort_order) VALUES(?, ?, ?, ?, ?)",
        (&subject_id, &class_id, &name, &teacher_id, next_order),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "subjects" })),
    })?;

    Ok(json!({ "subjectId": subject_id, "classId": class_id, "name": name }))
}

fn subjects_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(name) = params.get("name").and_then(|v| v.as_str()) {
        sets.push("name = ?");
        values.push(Box::new(name.trim().to_string()));
    }
    if params.get("teacherId").is_some() {
        sets.push("teacher_id = ?");
        values.push(Box::new(
            params
                .get("teacherId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        ));
    }
    if let Some(order) = params.get("sortOrder").and_then(|v| v.as_i64()) {
        sets.push("sort_order = ?");
        values.push(Box::new(order));
    }
    if sets.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "no fields to update".to_string(),
            details: None,
        });
    }

    values.push(Box::new(subject_id.clone()));
    let sql = format!("UPDATE subjects SET {} WHERE id = ?", sets.join(", "));
    let changed = conn
        .execute(
            &sql,
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "subjects" })),
        })?;
    if changed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }

    Ok(json!({ "subjectId": subject_id }))
}

fn subjects_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let changed = conn
        .execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: None,
        })?;
    if changed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "subjectId": subject_id }))
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
        "subjects.list" => Some(with_conn(state, req, subjects_list)),
        "subjects.create" => Some(with_conn(state, req, subjects_create)),
        "subjects.update" => Some(with_conn(state, req, subjects_update)),
        "subjects.delete" => Some(with_conn(state, req, subjects_delete)),
        _ => None,
    }
}
