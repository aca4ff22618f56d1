use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const STATUSES: &[&str] = &["present", "absent", "leave"];

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
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn parse_date(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let date = get_required_str(params, "date")?;
    NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))?;
    Ok(date)
}

fn parse_clock_time(raw: &str) -> Result<String, HandlerErr> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|_| HandlerErr::bad_params("time must be HH:MM"))?;
    Ok(raw.to_string())
}

fn teacher_name(conn: &Connection, teacher_id: &str) -> Result<String, HandlerErr> {
    let name: Option<String> = conn
        .query_row(
            "SELECT name FROM users WHERE id = ? AND role = 'teacher'",
            [teacher_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    name.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "teacher not found".to_string(),
        details: None,
    })
}

fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let date = parse_date(params)?;
    let status = get_required_str(params, "status")?;
    if !STATUSES.contains(&status.as_str()) {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("unknown status: {}", status),
            details: Some(json!({ "statuses": STATUSES })),
        });
    }
    let marked_by = params
        .get("markedBy")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let name = teacher_name(conn, &teacher_id)?;
    let marked_at = chrono::Utc::now().to_rfc3339();

    // An absent teacher has no arrival or departure to keep.
    let clear_times = status == "absent";
    conn.execute(
        "INSERT INTO teacher_attendance(id, teacher_id, teacher_name, date, status, marked_by, marked_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(teacher_id, date) DO UPDATE SET
           status = excluded.status,
           marked_by = excluded.marked_by,
           marked_at = excluded.marked_at,
           arrival_time = CASE WHEN ?8 THEN NULL ELSE arrival_time END,
           departure_time = CASE WHEN ?8 THEN NULL ELSE departure_time END",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            teacher_id,
            name,
            date,
            status,
            marked_by,
            marked_at,
            clear_times,
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "teacher_attendance" })),
    })?;

    Ok(json!({ "teacherId": teacher_id, "date": date, "status": status }))
}

fn attendance_set_time(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let date = parse_date(params)?;
    let kind = get_required_str(params, "kind")?;
    let column = match kind.as_str() {
        "arrival" => "arrival_time",
        "departure" => "departure_time",
        _ => return Err(HandlerErr::bad_params("kind must be arrival or departure")),
    };
    let time = parse_clock_time(&get_required_str(params, "time")?)?;
    let marked_by = params
        .get("markedBy")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let name = teacher_name(conn, &teacher_id)?;
    let marked_at = chrono::Utc::now().to_rfc3339();

    // Stamping a time implies the teacher was there that day.
    let sql = format!(
        "INSERT INTO teacher_attendance(id, teacher_id, teacher_name, date, status, {col}, marked_by, marked_at)
         VALUES(?, ?, ?, ?, 'present', ?, ?, ?)
         ON CONFLICT(teacher_id, date) DO UPDATE SET
           status = 'present',
           {col} = excluded.{col},
           marked_by = excluded.marked_by,
           marked_at = excluded.marked_at",
        col = column
    );
    conn.execute(
        &sql,
        rusqlite::params![
            Uuid::new_v4().to_string(),
            teacher_id,
            name,
            date,
            time,
            marked_by,
            marked_at,
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "teacher_attendance" })),
    })?;

    Ok(json!({ "teacherId": teacher_id, "date": date, "kind": kind, "time": time }))
}

fn attendance_for_date(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = parse_date(params)?;

    // Earliest arrivals first; unstamped records trail the list.
    let mut stmt = conn
        .prepare(
            "SELECT id, teacher_id, teacher_name, status, arrival_time, departure_time, marked_by, marked_at
             FROM teacher_attendance
             WHERE date = ?
             ORDER BY arrival_time IS NULL, arrival_time, teacher_name",
        )
        .map_err(HandlerErr::query)?;
    let records = stmt
        .query_map([&date], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "teacherId": r.get::<_, String>(1)?,
                "teacherName": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "arrivalTime": r.get::<_, Option<String>>(4)?,
                "departureTime": r.get::<_, Option<String>>(5)?,
                "markedBy": r.get::<_, Option<String>>(6)?,
                "markedAt": r.get::<_, Option<String>>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "date": date, "records": records }))
}

fn attendance_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = parse_date(params)?;

    let count_status = |status: &str| -> Result<i64, HandlerErr> {
        conn.query_row(
            "SELECT COUNT(*) FROM teacher_attendance WHERE date = ? AND status = ?",
            [&date, &status.to_string()],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)
    };
    let present = count_status("present")?;
    let absent = count_status("absent")?;
    let leave = count_status("leave")?;

    let teachers: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM users WHERE role = 'teacher'",
            [],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    Ok(json!({
        "date": date,
        "present": present,
        "absent": absent,
        "leave": leave,
        "unmarked": (teachers - present - absent - leave).max(0),
    }))
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
        "teacherAttendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "teacherAttendance.setTime" => Some(with_conn(state, req, attendance_set_time)),
        "teacherAttendance.forDate" => Some(with_conn(state, req, attendance_for_date)),
        "teacherAttendance.summary" => Some(with_conn(state, req, attendance_summary)),
        _ => None,
    }
}
