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

fn goal<'a>(resp: &'a serde_json::Value, metric: &str) -> &'a serde_json::Value {
    resp.get("result")
        .and_then(|v| v.get("goals"))
        .and_then(|v| v.as_array())
        .and_then(|goals| {
            goals
                .iter()
                .find(|g| g.get("metric").and_then(|m| m.as_str()) == Some(metric))
        })
        .expect("goal entry")
}

#[test]
fn goal_solver_reports_needed_and_unreachable_targets() {
    let workspace = temp_dir("transcript-goal-flow");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let begun = request(
        &mut stdin,
        &mut reader,
        "2",
        "ingest.begin",
        json!({ "account": "goal" }),
    );
    let ticket = begun
        .get("result")
        .and_then(|v| v.get("ticket"))
        .and_then(|v| v.as_str())
        .expect("ticket")
        .to_string();
    // A 75 maps to GPA 3.0, so 10 credits give num = 30, den = 10.
    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "ingest.complete",
        json!({
            "account": "goal",
            "ticket": ticket,
            "status": "ok",
            "scoreRecords": [
                { "name": "Statistics", "credits": 10.0, "scoreText": "75",
                  "semesterRaw": "(2023-2024-1)-STAT2001-01" },
            ],
        }),
    );

    // No targets yet: every goal reports noTarget.
    let empty = request(
        &mut stdin,
        &mut reader,
        "4",
        "metrics.goalProgress",
        json!({ "account": "goal" }),
    );
    assert_eq!(
        goal(&empty, "unweighted")
            .get("outcome")
            .and_then(|o| o.get("status"))
            .and_then(|v| v.as_str()),
        Some("noTarget")
    );

    // Target 4.0 over only 5 future credits: need = (4.0*15 - 30)/5 = 6.0,
    // past the 5.0 scale top.
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "targets.set",
        json!({
            "account": "goal",
            "targets": { "avgTarget": 4.0, "expectedCredits": 5.0 }
        }),
    );
    let tight = request(
        &mut stdin,
        &mut reader,
        "6",
        "metrics.goalProgress",
        json!({ "account": "goal" }),
    );
    let outcome = goal(&tight, "unweighted").get("outcome").expect("outcome");
    assert_eq!(
        outcome.get("status").and_then(|v| v.as_str()),
        Some("unreachable")
    );
    assert_eq!(outcome.get("need").and_then(|v| v.as_f64()), Some(6.0));
    assert_eq!(outcome.get("max").and_then(|v| v.as_f64()), Some(5.0));
    assert_eq!(
        goal(&tight, "unweighted")
            .get("current")
            .and_then(|v| v.as_f64()),
        Some(3.0)
    );

    // Same target over 30 future credits is attainable:
    // need = (4.0*40 - 30)/30 = 4.3333.
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "targets.set",
        json!({
            "account": "goal",
            "targets": { "avgTarget": 4.0, "expectedCredits": 30.0 }
        }),
    );
    let wide = request(
        &mut stdin,
        &mut reader,
        "8",
        "metrics.goalProgress",
        json!({ "account": "goal" }),
    );
    let outcome = goal(&wide, "unweighted").get("outcome").expect("outcome");
    assert_eq!(
        outcome.get("status").and_then(|v| v.as_str()),
        Some("needed")
    );
    assert_eq!(outcome.get("need").and_then(|v| v.as_f64()), Some(4.3333));

    // Weighted goal without a major-credit split assumes all non-major and
    // says so.
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "targets.set",
        json!({
            "account": "goal",
            "targets": { "weightedTarget": 3.5, "expectedCredits": 30.0 }
        }),
    );
    let weighted = request(
        &mut stdin,
        &mut reader,
        "10",
        "metrics.goalProgress",
        json!({ "account": "goal" }),
    );
    assert_eq!(
        goal(&weighted, "weighted")
            .get("note")
            .and_then(|v| v.as_str()),
        Some("assumedAllNonMajor")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
