use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, db_err, parse_weights, required_str, weights_json};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "weights.get" => Some(get(state, req)),
        "weights.set" => Some(set(state, req)),
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
    match db::load_weights(conn, &account) {
        Ok(w) => ok(&req.id, json!({ "weights": weights_json(&w) })),
        Err(e) => db_err(req, e),
    }
}

fn set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let weights = match parse_weights(req.params.get("weights")) {
        Ok(w) => w,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
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
    if let Err(e) = db::save_weights(conn, scope, &weights) {
        return db_err(req, e);
    }
    // Echo the sanitized values so presentation shows what was stored.
    ok(&req.id, json!({ "weights": weights_json(&weights) }))
}
