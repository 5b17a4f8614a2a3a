use crate::db;
use crate::engine::{is_excluded, CoreMode, Course, RetakePolicy, WeightsConfig};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn db_err(req: &Request, e: anyhow::Error) -> serde_json::Value {
    err(&req.id, "db_query_failed", format!("{e:?}"), None)
}

/// The course set and weights a computation request addresses: an explicit
/// `profileId` picks a simulation clone; otherwise the authoritative set
/// and the account weights. The engine never has an ambient "current"
/// dataset — this is the only place the choice is made.
pub fn resolve_dataset(
    state: &AppState,
    req: &Request,
    account: &str,
) -> Result<(Vec<Course>, WeightsConfig), serde_json::Value> {
    let conn = db_conn(state, req)?;
    match req.params.get("profileId").and_then(|v| v.as_str()) {
        Some(profile_id) => {
            let profile = db::load_profile(conn, account, profile_id)
                .map_err(|e| db_err(req, e))?
                .ok_or_else(|| {
                    err(&req.id, "not_found", "simulation profile not found", None)
                })?;
            Ok((profile.courses, profile.weights))
        }
        None => {
            let courses = db::load_courses(conn, account).map_err(|e| db_err(req, e))?;
            let weights = db::load_weights(conn, account).map_err(|e| db_err(req, e))?;
            Ok((courses, weights))
        }
    }
}

/// Wire shape of a course: the model plus the derived exclusion flag and
/// the override key presentation uses to address it.
pub fn course_json(c: &Course) -> serde_json::Value {
    let mut v = serde_json::to_value(c).unwrap_or_else(|_| json!({}));
    v["excluded"] = json!(is_excluded(c));
    v["key"] = json!(c.override_key());
    v
}

pub fn weights_json(w: &WeightsConfig) -> serde_json::Value {
    serde_json::to_value(w).unwrap_or_else(|_| json!({}))
}

/// Lenient weights parse: missing fields keep defaults, unknown mode and
/// policy strings fall back to their documented defaults, ranges clamp.
pub fn parse_weights(raw: Option<&serde_json::Value>) -> Result<WeightsConfig, String> {
    let Some(obj) = raw.and_then(|v| v.as_object()) else {
        return Err("weights must be an object".to_string());
    };
    let d = WeightsConfig::default();
    Ok(WeightsConfig {
        nonmajor_weight: obj
            .get("nonmajorWeight")
            .and_then(|v| v.as_f64())
            .unwrap_or(d.nonmajor_weight),
        core_multiplier: obj
            .get("coreMultiplier")
            .and_then(|v| v.as_f64())
            .unwrap_or(d.core_multiplier),
        core_mode: CoreMode::parse_or_default(
            obj.get("coreMode").and_then(|v| v.as_str()).unwrap_or(""),
        ),
        retake_policy: RetakePolicy::parse_or_default(
            obj.get("retakePolicy").and_then(|v| v.as_str()).unwrap_or(""),
        ),
    }
    .sanitized())
}
