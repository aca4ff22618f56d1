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

fn request_ok(
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn generate_round_robin_wraps_and_is_idempotent() {
    let workspace = temp_dir("campusd-generate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let tx = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "name": "Teacher X", "email": "tx@school.pk", "role": "teacher" }),
    )["userId"]
        .as_str()
        .expect("userId")
        .to_string();
    let ty = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({ "name": "Teacher Y", "email": "ty@school.pk", "role": "teacher" }),
    )["userId"]
        .as_str()
        .expect("userId")
        .to_string();

    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "name": "Grade 5", "section": "A" }),
    )["classId"]
        .as_str()
        .expect("classId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.create",
        json!({ "classId": class_id, "name": "Math", "teacherId": tx }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "subjects.create",
        json!({ "classId": class_id, "name": "Science", "teacherId": ty }),
    );

    // One day, three slots: with two subjects the third slot wraps back to
    // the first one.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "config.scheduleSet",
        json!({
            "days": ["Monday"],
            "slots": [
                { "id": "1", "start": "08:00", "end": "08:40" },
                { "id": "2", "start": "08:45", "end": "09:25" },
                { "id": "3", "start": "09:30", "end": "10:10" }
            ]
        }),
    );

    let gen = request_ok(&mut stdin, &mut reader, "8", "timetable.generateAll", json!({}));
    assert_eq!(gen["classesScheduled"].as_i64(), Some(1));
    assert_eq!(gen["classesSkipped"].as_i64(), Some(0));

    let tt = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "timetable.get",
        json!({ "classId": class_id }),
    )["timetable"]
        .clone();

    assert_eq!(tt["className"].as_str(), Some("Grade 5 - A"));
    assert_eq!(tt["days"], json!(["Monday"]));
    assert_eq!(tt["slots"].as_array().map(|a| a.len()), Some(3));

    let monday = &tt["schedule"]["Monday"];
    assert_eq!(monday["1"]["subjectName"].as_str(), Some("Math"));
    assert_eq!(monday["1"]["teacherId"].as_str(), Some(tx.as_str()));
    assert_eq!(monday["2"]["subjectName"].as_str(), Some("Science"));
    assert_eq!(monday["2"]["teacherId"].as_str(), Some(ty.as_str()));
    assert_eq!(monday["3"]["subjectName"].as_str(), Some("Math"));
    assert_eq!(monday["3"]["teacherId"].as_str(), Some(tx.as_str()));

    // Regeneration with untouched inputs reproduces the same grid.
    let _ = request_ok(&mut stdin, &mut reader, "10", "timetable.generateAll", json!({}));
    let tt2 = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "timetable.get",
        json!({ "classId": class_id }),
    )["timetable"]
        .clone();
    assert_eq!(tt["schedule"], tt2["schedule"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_without_subjects_gets_no_timetable() {
    let workspace = temp_dir("campusd-generate-empty");
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
        json!({ "name": "Nursery", "section": "A" }),
    )["classId"]
        .as_str()
        .expect("classId")
        .to_string();

    let gen = request_ok(&mut stdin, &mut reader, "3", "timetable.generateAll", json!({}));
    assert_eq!(gen["classesScheduled"].as_i64(), Some(0));
    assert_eq!(gen["classesSkipped"].as_i64(), Some(1));

    let payload = json!({ "id": "4", "method": "timetable.get", "params": { "classId": class_id } });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["ok"].as_bool(), Some(false));
    assert_eq!(value["error"]["code"].as_str(), Some("not_found"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
