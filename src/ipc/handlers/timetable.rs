use crate::ipc::error::{err, ok};
use crate::ipc::handlers::config::{effective_days, effective_slots};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, ClassRecord, SubjectRecord};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn query(message: impl std::fmt::Display) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: message.to_string(),
            details: None,
        }
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

/// Directory reads for one generation run. Class order is the processing
/// order and therefore decides who wins contested teachers; `name, section`
/// keeps it stable across runs.
fn load_classes(conn: &Connection) -> Result<Vec<ClassRecord>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, section, teacher_id
             FROM classes
             ORDER BY name, section",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([], |r| {
        Ok(ClassRecord {
            id: r.get(0)?,
            name: r.get(1)?,
            section: r.get(2)?,
            teacher_id: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn load_subjects_by_class(
    conn: &Connection,
) -> Result<HashMap<String, Vec<SubjectRecord>>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, class_id, name, teacher_id
             FROM subjects
             ORDER BY class_id, sort_order, rowid",
        )
        .map_err(HandlerErr::query)?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(SubjectRecord {
                id: r.get(0)?,
                class_id: r.get(1)?,
                name: r.get(2)?,
                teacher_id: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut by_class: HashMap<String, Vec<SubjectRecord>> = HashMap::new();
    for s in subjects {
        by_class.entry(s.class_id.clone()).or_default().push(s);
    }
    Ok(by_class)
}

fn generate_all(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    // Any directory/config read failure aborts here, before anything is
    // computed or written.
    let (days, _) = effective_days(conn).map_err(HandlerErr::query)?;
    let (slots, _) = effective_slots(conn).map_err(HandlerErr::query)?;
    let classes = load_classes(conn)?;
    let subjects_by_class = load_subjects_by_class(conn)?;

    let schedules = schedule::generate_all(&classes, &subjects_by_class, &days, &slots);

    let updated_at = chrono::Utc::now().to_rfc3339();
    let days_json = json!(days).to_string();
    let slots_json = json!(slots).to_string();

    // One independent write per scheduled class. A failed write neither
    // halts the rest nor rolls back what already landed.
    let mut saved: Vec<String> = Vec::new();
    let mut skipped: Vec<String> = Vec::new();
    let mut failed: Vec<String> = Vec::new();
    for cls in &classes {
        let Some(class_schedule) = schedules.get(&cls.id) else {
            skipped.push(cls.id.clone());
            continue;
        };
        let write = conn.execute(
            "INSERT INTO timetables(class_id, class_name, schedule, days, slots, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(class_id) DO UPDATE SET
               class_name = excluded.class_name,
               schedule = excluded.schedule,
               days = excluded.days,
               slots = excluded.slots,
               updated_at = excluded.updated_at",
            rusqlite::params![
                cls.id,
                format!("{} - {}", cls.name, cls.section),
                json!(class_schedule).to_string(),
                days_json,
                slots_json,
                updated_at,
            ],
        );
        match write {
            Ok(_) => saved.push(cls.id.clone()),
            Err(_) => failed.push(cls.id.clone()),
        }
    }

    if !failed.is_empty() {
        return Err(HandlerErr {
            code: "save_failed",
            message: format!(
                "generation partially failed: {} of {} timetables not saved",
                failed.len(),
                saved.len() + failed.len()
            ),
            details: Some(json!({ "failedClassIds": failed, "savedClassIds": saved })),
        });
    }

    Ok(json!({
        "classesScheduled": saved.len(),
        "classesSkipped": skipped.len(),
        "savedClassIds": saved,
        "updatedAt": updated_at,
    }))
}

fn timetable_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let class_id: String = r.get(0)?;
    let class_name: String = r.get(1)?;
    let schedule_raw: String = r.get(2)?;
    let days_raw: String = r.get(3)?;
    let slots_raw: String = r.get(4)?;
    let updated_at: String = r.get(5)?;
    Ok(json!({
        "classId": class_id,
        "className": class_name,
        "schedule": serde_json::from_str::<serde_json::Value>(&schedule_raw)
            .unwrap_or(serde_json::Value::Null),
        "days": serde_json::from_str::<serde_json::Value>(&days_raw)
            .unwrap_or(serde_json::Value::Null),
        "slots": serde_json::from_str::<serde_json::Value>(&slots_raw)
            .unwrap_or(serde_json::Value::Null),
        "updatedAt": updated_at,
    }))
}

const TIMETABLE_COLUMNS: &str = "class_id, class_name, schedule, days, slots, updated_at";

fn timetable_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM timetables WHERE class_id = ?",
                TIMETABLE_COLUMNS
            ),
            [&class_id],
            |r| timetable_row_json(r),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    match row {
        Some(t) => Ok(json!({ "timetable": t })),
        None => Err(HandlerErr {
            code: "not_found",
            message: "timetable not available for this class".to_string(),
            details: None,
        }),
    }
}

/// Classes the teacher is attached to, either as class teacher or through a
/// subject, each with its stored timetable when one exists.
fn timetable_for_teacher(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;

    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT c.id, c.name, c.section
             FROM classes c
             LEFT JOIN subjects s ON s.class_id = c.id
             WHERE c.teacher_id = ? OR s.teacher_id = ?
             ORDER BY c.name, c.section",
        )
        .map_err(HandlerErr::query)?;
    let classes = stmt
        .query_map([&teacher_id, &teacher_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut out = Vec::new();
    for (id, name, section) in classes {
        let timetable = conn
            .query_row(
                &format!(
                    "SELECT {} FROM timetables WHERE class_id = ?",
                    TIMETABLE_COLUMNS
                ),
                [&id],
                |r| timetable_row_json(r),
            )
            .optional()
            .map_err(HandlerErr::query)?;
        out.push(json!({
            "classId": id,
            "name": name,
            "section": section,
            "timetable": timetable,
        }));
    }

    Ok(json!({ "classes": out }))
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
        "timetable.generateAll" => Some(with_conn(state, req, generate_all)),
        "timetable.get" => Some(with_conn(state, req, timetable_get)),
        "timetable.forTeacher" => Some(with_conn(state, req, timetable_for_teacher)),
        _ => None,
    }
}
