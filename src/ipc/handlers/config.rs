use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{default_days, default_slots, SlotDef};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;

pub const DAYS_KEY: &str = "schedule.days";
pub const SLOTS_KEY: &str = "schedule.slots";

/// Configured day list, or the built-in Monday..Friday default.
pub fn effective_days(conn: &Connection) -> anyhow::Result<(Vec<String>, bool)> {
    match db::settings_get_json(conn, DAYS_KEY)? {
        Some(v) => Ok((serde_json::from_value(v)?, false)),
        None => Ok((default_days(), true)),
    }
}

/// Configured slot list, or the built-in six-period default.
pub fn effective_slots(conn: &Connection) -> anyhow::Result<(Vec<SlotDef>, bool)> {
    match db::settings_get_json(conn, SLOTS_KEY)? {
        Some(v) => Ok((serde_json::from_value(v)?, false)),
        None => Ok((default_slots(), true)),
    }
}

fn handle_schedule_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (days, days_default) = match effective_days(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let (slots, slots_default) = match effective_slots(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "days": days,
            "slots": slots,
            "defaults": { "days": days_default, "slots": slots_default }
        }),
    )
}

fn parse_days(value: &serde_json::Value) -> Result<Vec<String>, String> {
    let days: Vec<String> =
        serde_json::from_value(value.clone()).map_err(|_| "days must be an array of strings")?;
    if days.is_empty() {
        return Err("days must not be empty".to_string());
    }
    let mut seen = HashSet::new();
    for d in &days {
        if d.trim().is_empty() {
            return Err("day names must not be empty".to_string());
        }
        if !seen.insert(d.as_str()) {
            return Err(format!("duplicate day: {}", d));
        }
    }
    Ok(days)
}

fn parse_slots(value: &serde_json::Value) -> Result<Vec<SlotDef>, String> {
    let slots: Vec<SlotDef> = serde_json::from_value(value.clone())
        .map_err(|_| "slots must be an array of {id, start, end}")?;
    if slots.is_empty() {
        return Err("slots must not be empty".to_string());
    }
    let mut seen = HashSet::new();
    for s in &slots {
        if s.id.trim().is_empty() {
            return Err("slot ids must not be empty".to_string());
        }
        if !seen.insert(s.id.as_str()) {
            return Err(format!("duplicate slot id: {}", s.id));
        }
    }
    Ok(slots)
}

fn handle_schedule_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let days = match req.params.get("days") {
        Some(v) => match parse_days(v) {
            Ok(d) => Some(d),
            Err(m) => return err(&req.id, "bad_params", m, None),
        },
        None => None,
    };
    let slots = match req.params.get("slots") {
        Some(v) => match parse_slots(v) {
            Ok(s) => Some(s),
            Err(m) => return err(&req.id, "bad_params", m, None),
        },
        None => None,
    };
    if days.is_none() && slots.is_none() {
        return err(&req.id, "bad_params", "provide days and/or slots", None);
    }

    if let Some(days) = &days {
        if let Err(e) = db::settings_set_json(conn, DAYS_KEY, &json!(days)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(slots) = &slots {
        if let Err(e) = db::settings_set_json(conn, SLOTS_KEY, &json!(slots)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(
        &req.id,
        json!({
            "daysUpdated": days.is_some(),
            "slotsUpdated": slots.is_some()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "config.scheduleGet" => Some(handle_schedule_get(state, req)),
        "config.scheduleSet" => Some(handle_schedule_set(state, req)),
        _ => None,
    }
}
