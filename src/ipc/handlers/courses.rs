use crate::db;
use crate::engine::CourseType;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{course_json, db_conn, db_err, optional_str, required_str, resolve_dataset};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(list(state, req)),
        "courses.setType" => Some(set_type(state, req)),
        "overrides.clear" => Some(clear_overrides(state, req)),
        _ => None,
    }
}

fn list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (courses, _weights) = match resolve_dataset(state, req, &account) {
        Ok(v) => v,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!({ "courses": courses.iter().map(course_json).collect::<Vec<_>>() }),
    )
}

/// Persist a classification override for one course identity. The override
/// survives re-ingest: canonicalization re-applies it by key.
fn set_type(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let key = match required_str(req, "key") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let raw_type = match required_str(req, "courseType") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(course_type) = CourseType::parse(&raw_type) else {
        return err(
            &req.id,
            "bad_params",
            "courseType must be core, major, nonMajor or hidden",
            None,
        );
    };
    let global = req
        .params
        .get("global")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let scope = if global { db::GLOBAL_ACCOUNT } else { account.as_str() };

    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = db::set_override(conn, scope, &key, course_type) {
        return db_err(req, e);
    }
    ok(&req.id, json!({ "key": key, "courseType": course_type.as_str() }))
}

fn clear_overrides(state: &mut AppState, req: &Request) -> serde_json::Value {
    let scope = optional_str(req, "account").unwrap_or_else(|| db::GLOBAL_ACCOUNT.to_string());
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = db::clear_overrides(conn, &scope) {
        return db_err(req, e);
    }
    ok(&req.id, json!({}))
}
