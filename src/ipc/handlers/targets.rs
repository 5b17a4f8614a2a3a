use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, db_err, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "targets.get" => Some(get(state, req)),
        "targets.set" => Some(set(state, req)),
        _ => None,
    }
}

fn get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::load_targets(conn, &account) {
        Ok(t) => ok(&req.id, json!({ "targets": t })),
        Err(e) => db_err(req, e),
    }
}

fn set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("targets") else {
        return err(&req.id, "bad_params", "missing params.targets", None);
    };
    let targets: db::GoalTargets = match serde_json::from_value(raw.clone()) {
        Ok(t) => t,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("malformed targets: {e}"),
                None,
            )
        }
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = db::save_targets(conn, &account, &targets) {
        return db_err(req, e);
    }
    ok(&req.id, json!({ "targets": targets }))
}
