use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_madrasahd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn madrasahd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn actor(role: &str) -> Value {
    json!({ "id": "teacher-1", "role": role })
}

fn setup_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> tempfile::TempDir {
    let ws = tempfile::tempdir().expect("tempdir");
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": ws.path().to_string_lossy() }),
    );
    request_ok(
        stdin,
        reader,
        "ctx",
        "roster.addContext",
        json!({ "id": "ctx-att", "classId": "class-1", "kind": "attendance", "label": "Fajr halaqah" }),
    );
    request_ok(
        stdin,
        reader,
        "s1",
        "roster.addSubject",
        json!({ "id": "s1", "classId": "class-1", "displayName": "s1" }),
    );
    ws
}

fn mark(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    date: &str,
    status: &str,
) {
    request_ok(
        stdin,
        reader,
        id,
        "attendance.mark",
        json!({
            "subjectId": "s1",
            "contextId": "ctx-att",
            "date": date,
            "status": status,
            "actor": actor("STANDARD"),
        }),
    );
}

#[test]
fn empty_history_reads_as_a_perfect_rate() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ws = setup_workspace(&mut stdin, &mut reader);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "r",
        "attendance.rate",
        json!({ "subjectId": "s1", "status": "PRESENT", "window": 30 }),
    );
    assert_eq!(res.get("ratePercent").and_then(|v| v.as_u64()), Some(100));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn rate_counts_matching_share_of_the_window() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ws = setup_workspace(&mut stdin, &mut reader);

    mark(&mut stdin, &mut reader, "m1", "2024-03-01", "PRESENT");
    mark(&mut stdin, &mut reader, "m2", "2024-03-02", "PRESENT");
    mark(&mut stdin, &mut reader, "m3", "2024-03-03", "ABSENT");
    mark(&mut stdin, &mut reader, "m4", "2024-03-04", "LATE");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "r",
        "attendance.rate",
        json!({ "subjectId": "s1", "status": "PRESENT", "window": 4 }),
    );
    assert_eq!(res.get("ratePercent").and_then(|v| v.as_u64()), Some(50));

    // A smaller window only sees the newest records (LATE, ABSENT).
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "attendance.rate",
        json!({ "subjectId": "s1", "status": "PRESENT", "window": 2 }),
    );
    assert_eq!(res.get("ratePercent").and_then(|v| v.as_u64()), Some(0));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn history_is_newest_first_and_restartable_via_offset() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ws = setup_workspace(&mut stdin, &mut reader);

    mark(&mut stdin, &mut reader, "m1", "2024-03-01", "PRESENT");
    mark(&mut stdin, &mut reader, "m2", "2024-03-02", "PRESENT");
    mark(&mut stdin, &mut reader, "m3", "2024-03-03", "ABSENT");
    mark(&mut stdin, &mut reader, "m4", "2024-03-04", "LATE");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "h1",
        "attendance.history",
        json!({ "subjectId": "s1", "limit": 2 }),
    );
    let page1 = res["records"].as_array().expect("records array").clone();
    assert_eq!(page1.len(), 2);
    assert_eq!(page1[0]["occurrence"].as_str(), Some("2024-03-04"));
    assert_eq!(page1[1]["occurrence"].as_str(), Some("2024-03-03"));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "h2",
        "attendance.history",
        json!({ "subjectId": "s1", "limit": 2, "offset": 2 }),
    );
    let page2 = res["records"].as_array().expect("records array").clone();
    assert_eq!(page2.len(), 2);
    assert_eq!(page2[0]["occurrence"].as_str(), Some("2024-03-02"));
    assert_eq!(page2[1]["occurrence"].as_str(), Some("2024-03-01"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn hifz_mastery_is_one_shot_and_feeds_progress() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ws = setup_workspace(&mut stdin, &mut reader);

    for (i, label) in ["Al-Fatihah", "Al-Ikhlas"].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "roster.addContext",
            json!({
                "id": format!("surah-{}", i + 1),
                "classId": "class-1",
                "kind": "hifz",
                "label": label,
            }),
        );
    }

    // Toggle surah-1 through in-progress to mastered; the row is replaced.
    request_ok(
        &mut stdin,
        &mut reader,
        "h1",
        "hifz.setMastery",
        json!({
            "subjectId": "s1",
            "contextId": "surah-1",
            "status": "IN_PROGRESS",
            "actor": actor("STANDARD"),
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "h2",
        "hifz.setMastery",
        json!({
            "subjectId": "s1",
            "contextId": "surah-1",
            "status": "MASTERED",
            "actor": actor("STANDARD"),
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "h3",
        "hifz.setMastery",
        json!({
            "subjectId": "s1",
            "contextId": "surah-2",
            "status": "IN_PROGRESS",
            "actor": actor("STANDARD"),
        }),
    );

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "hist",
        "hifz.history",
        json!({ "subjectId": "s1", "contextId": "surah-1" }),
    );
    let records = res["records"].as_array().expect("records array");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"].as_str(), Some("MASTERED"));
    assert!(records[0]["occurrence"].is_null());

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "p",
        "hifz.progress",
        json!({ "subjectId": "s1", "window": 10 }),
    );
    assert_eq!(res.get("masteredPercent").and_then(|v| v.as_u64()), Some(50));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn grading_pass_rate_ignores_other_ledgers() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ws = setup_workspace(&mut stdin, &mut reader);

    for i in 0..2 {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "roster.addContext",
            json!({
                "id": format!("assignment-{}", i + 1),
                "classId": "class-1",
                "kind": "grading",
                "label": format!("Tajwid quiz {}", i + 1),
            }),
        );
    }
    // Attendance noise that must not dilute the grading window.
    mark(&mut stdin, &mut reader, "m1", "2024-03-01", "ABSENT");

    request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grading.record",
        json!({
            "subjectId": "s1",
            "contextId": "assignment-1",
            "status": "PASS",
            "actor": actor("STANDARD"),
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "grading.record",
        json!({
            "subjectId": "s1",
            "contextId": "assignment-2",
            "status": "FAIL",
            "actor": actor("STANDARD"),
        }),
    );

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "p",
        "grading.passRate",
        json!({ "subjectId": "s1", "window": 10 }),
    );
    assert_eq!(res.get("passPercent").and_then(|v| v.as_u64()), Some(50));

    drop(stdin);
    let _ = child.wait();
}
