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
    let exe = env!("CARGO_BIN_EXE_transcriptd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn transcriptd");
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
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn error_code(resp: &serde_json::Value) -> Option<&str> {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn ticket_of(resp: &serde_json::Value) -> String {
    resp.get("result")
        .and_then(|v| v.get("ticket"))
        .and_then(|v| v.as_str())
        .expect("ticket")
        .to_string()
}

fn course_count(resp: &serde_json::Value) -> usize {
    resp.get("result")
        .and_then(|v| v.get("courses"))
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0)
}

#[test]
fn ticket_protocol_serializes_and_discards_stale_results() {
    let workspace = temp_dir("transcript-ingest-ticket");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // One outstanding acquisition per account.
    let begun = request(
        &mut stdin,
        &mut reader,
        "2",
        "ingest.begin",
        json!({ "account": "a" }),
    );
    let ticket = ticket_of(&begun);
    let second = request(
        &mut stdin,
        &mut reader,
        "3",
        "ingest.begin",
        json!({ "account": "a" }),
    );
    assert_eq!(error_code(&second), Some("ingest_in_flight"));

    // Another account is unaffected.
    let other = request(
        &mut stdin,
        &mut reader,
        "4",
        "ingest.begin",
        json!({ "account": "b" }),
    );
    assert!(other.get("ok").and_then(|v| v.as_bool()).unwrap_or(false));

    // A result carrying a ticket that was never issued is discarded.
    let stale = request(
        &mut stdin,
        &mut reader,
        "5",
        "ingest.complete",
        json!({
            "account": "a",
            "ticket": "not-the-ticket",
            "status": "ok",
            "scoreRecords": [{ "name": "Ghost", "credits": 1.0, "scoreText": "60" }],
        }),
    );
    assert_eq!(error_code(&stale), Some("stale_ingest"));

    // A classified failure consumes the ticket and leaves the set untouched.
    let failed = request(
        &mut stdin,
        &mut reader,
        "6",
        "ingest.complete",
        json!({
            "account": "a",
            "ticket": ticket,
            "status": "timeout",
            "message": "portal did not answer",
            "elapsedSeconds": 31.5,
        }),
    );
    let result = failed.get("result").expect("failure result");
    assert_eq!(result.get("applied").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        result.get("status").and_then(|v| v.as_str()),
        Some("timeout")
    );
    let listed = request(
        &mut stdin,
        &mut reader,
        "7",
        "courses.list",
        json!({ "account": "a" }),
    );
    assert_eq!(course_count(&listed), 0);

    // Replaying the consumed ticket is stale.
    let replay = request(
        &mut stdin,
        &mut reader,
        "8",
        "ingest.complete",
        json!({ "account": "a", "ticket": ticket, "status": "timeout" }),
    );
    assert_eq!(error_code(&replay), Some("stale_ingest"));

    // A fresh cycle can now run to a successful apply.
    let begun = request(
        &mut stdin,
        &mut reader,
        "9",
        "ingest.begin",
        json!({ "account": "a" }),
    );
    let ticket = ticket_of(&begun);
    let applied = request(
        &mut stdin,
        &mut reader,
        "10",
        "ingest.complete",
        json!({
            "account": "a",
            "ticket": ticket,
            "status": "ok",
            "scoreRecords": [
                { "name": "Calculus", "credits": 5.0, "scoreText": "92",
                  "semesterRaw": "(2023-2024-1)-MATH1102-01" },
            ],
        }),
    );
    let result = applied.get("result").expect("apply result");
    assert_eq!(result.get("applied").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        result.get("courseCount").and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        result
            .get("newKeys")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );
    let status = request(
        &mut stdin,
        &mut reader,
        "11",
        "ingest.status",
        json!({ "account": "a" }),
    );
    assert_eq!(
        status
            .get("result")
            .and_then(|v| v.get("inFlight"))
            .and_then(|v| v.as_bool()),
        Some(false)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
