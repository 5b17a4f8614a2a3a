use crate::ingest::{canonicalize, IngestFailure, RawCourseRecord};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{course_json, required_str};
use crate::ipc::types::{AppState, Request};
use crate::{db, engine};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "ingest.begin" => Some(begin(state, req)),
        "ingest.status" => Some(status(state, req)),
        "ingest.complete" => Some(complete(state, req)),
        _ => None,
    }
}

fn begin(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if state.db.is_none() {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    }
    if state.pending_ingests.contains_key(&account) {
        return err(
            &req.id,
            "ingest_in_flight",
            "an acquisition is already outstanding for this account",
            None,
        );
    }
    let ticket = Uuid::new_v4().to_string();
    state.pending_ingests.insert(account, ticket.clone());
    ok(&req.id, json!({ "ticket": ticket }))
}

fn status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!({ "inFlight": state.pending_ingests.contains_key(&account) }),
    )
}

/// Terminal report of an acquisition. A failure classification leaves the
/// authoritative set untouched; a success replaces it atomically. Either
/// way the ticket is consumed. Results carrying a superseded ticket are
/// discarded rather than applied out of order.
fn complete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ticket = match required_str(req, "ticket") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match required_str(req, "status") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match state.pending_ingests.get(&account) {
        Some(outstanding) if *outstanding == ticket => {}
        _ => {
            return err(
                &req.id,
                "stale_ingest",
                "result does not match the outstanding acquisition; discarded",
                None,
            );
        }
    }
    state.pending_ingests.remove(&account);

    let elapsed = req.params.get("elapsedSeconds").and_then(|v| v.as_f64());

    if status != "ok" {
        let Some(classification) = IngestFailure::parse(&status) else {
            return err(
                &req.id,
                "bad_params",
                "status must be ok, timeout, authentication or interfaceChanged",
                None,
            );
        };
        let message = req
            .params
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        return ok(
            &req.id,
            json!({
                "applied": false,
                "status": classification.as_str(),
                "message": message,
                "elapsedSeconds": elapsed,
            }),
        );
    }

    let major_records = match parse_records(req, "majorRecords") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let score_records = match parse_records(req, "scoreRecords") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let overrides = match db::load_overrides(conn, &account) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:?}"), None),
    };
    let previous = match db::load_courses(conn, &account) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:?}"), None),
    };

    let courses = canonicalize(&major_records, &score_records, &overrides);

    // Keys new relative to the previous set, so presentation can flag
    // freshly published grades.
    let known: HashSet<String> = previous.iter().map(engine::Course::override_key).collect();
    let new_keys: Vec<String> = courses
        .iter()
        .map(engine::Course::override_key)
        .filter(|k| !known.contains(k))
        .collect();

    if let Err(e) = db::replace_courses(conn, &account, &courses) {
        return err(&req.id, "db_query_failed", format!("{e:?}"), None);
    }

    ok(
        &req.id,
        json!({
            "applied": true,
            "status": "ok",
            "courseCount": courses.len(),
            "newKeys": new_keys,
            "elapsedSeconds": elapsed,
            "courses": courses.iter().map(course_json).collect::<Vec<_>>(),
        }),
    )
}

fn parse_records(req: &Request, key: &str) -> Result<Vec<RawCourseRecord>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be an array of raw course records: {}", key, e),
                None,
            )
        }),
    }
}
