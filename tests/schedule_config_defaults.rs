use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "request failed: {}",
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn schedule_config_falls_back_to_defaults() {
    let workspace = temp_dir("campusd-config-defaults");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let cfg = request_ok(&mut stdin, &mut reader, "2", "config.scheduleGet", json!({}));
    assert_eq!(
        cfg["days"],
        json!(["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"])
    );
    let slots = cfg["slots"].as_array().expect("slots");
    assert_eq!(slots.len(), 6);
    assert_eq!(slots[0], json!({ "id": "1", "start": "08:00", "end": "08:40" }));
    assert_eq!(slots[5], json!({ "id": "6", "start": "11:50", "end": "12:30" }));
    assert_eq!(cfg["defaults"]["days"].as_bool(), Some(true));
    assert_eq!(cfg["defaults"]["slots"].as_bool(), Some(true));

    // Customizing days leaves the slot default untouched.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "config.scheduleSet",
        json!({ "days": ["Saturday", "Sunday"] }),
    );
    let cfg = request_ok(&mut stdin, &mut reader, "4", "config.scheduleGet", json!({}));
    assert_eq!(cfg["days"], json!(["Saturday", "Sunday"]));
    assert_eq!(cfg["defaults"]["days"].as_bool(), Some(false));
    assert_eq!(cfg["defaults"]["slots"].as_bool(), Some(true));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn schedule_config_rejects_bad_inputs() {
    let workspace = temp_dir("campusd-config-invalid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "config.scheduleSet",
        json!({ "days": [] }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "config.scheduleSet",
        json!({
            "slots": [
                { "id": "1", "start": "08:00", "end": "08:40" },
                { "id": "1", "start": "08:45", "end": "09:25" }
            ]
        }),
    );
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    let resp = request(&mut stdin, &mut reader, "4", "config.scheduleSet", json!({}));
    assert_eq!(resp["error"]["code"].as_str(), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn generation_uses_configured_days() {
    let workspace = temp_dir("campusd-config-generation");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Grade 1", "section": "A" }),
    )["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "classId": class_id, "name": "Urdu" }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "config.scheduleSet",
        json!({
            "days": ["Monday", "Wednesday"],
            "slots": [
                { "id": "1", "start": "09:00", "end": "09:45" },
                { "id": "2", "start": "10:00", "end": "10:45" }
            ]
        }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "5", "timetable.generateAll", json!({}));

    let tt = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "timetable.get",
        json!({ "classId": class_id }),
    )["timetable"]
        .clone();
    assert_eq!(tt["days"], json!(["Monday", "Wednesday"]));
    let schedule = tt["schedule"].as_object().expect("schedule");
    assert_eq!(schedule.len(), 2);
    assert!(schedule.contains_key("Monday"));
    assert!(schedule.contains_key("Wednesday"));
    for day in schedule.values() {
        assert_eq!(day.as_object().map(|d| d.len()), Some(2));
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
