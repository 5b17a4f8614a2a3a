use crate::db::{self, SimulationProfile};
use crate::engine::{Course, CourseType, UNKNOWN_SEMESTER};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{course_json, db_conn, db_err, optional_str, parse_weights, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sim.list" => Some(list(state, req)),
        "sim.create" => Some(create(state, req)),
        "sim.duplicate" => Some(duplicate(state, req)),
        "sim.delete" => Some(delete(state, req)),
        "sim.activate" => Some(activate(state, req)),
        "sim.deactivate" => Some(deactivate(state, req)),
        "sim.setScore" => Some(set_score(state, req)),
        "sim.setType" => Some(set_type(state, req)),
        "sim.addCourse" => Some(add_course(state, req)),
        "sim.removeCourse" => Some(remove_course(state, req)),
        "sim.setWeights" => Some(set_weights(state, req)),
        _ => None,
    }
}

fn list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let profiles = match db::list_profiles(conn, &account) {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };
    let active = match db::active_profile_id(conn, &account) {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };
    let rows: Vec<serde_json::Value> = profiles
        .into_iter()
        .map(|(id, name)| json!({ "id": id, "name": name }))
        .collect();
    ok(&req.id, json!({ "profiles": rows, "activeId": active }))
}

/// A new profile starts as a full clone of the authoritative course set and
/// the account weights; from then on it evolves independently.
fn create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = optional_str(req, "name").unwrap_or_else(|| "What-if".to_string());
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let courses = match db::load_courses(conn, &account) {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };
    let weights = match db::load_weights(conn, &account) {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };
    let profile = SimulationProfile {
        id: Uuid::new_v4().to_string(),
        name,
        courses,
        weights,
    };
    if let Err(e) = db::save_profile(conn, &account, &profile) {
        return db_err(req, e);
    }
    ok(&req.id, json!({ "id": profile.id, "name": profile.name }))
}

fn duplicate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let source_id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let source = match db::load_profile(conn, &account, &source_id) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "simulation profile not found", None),
        Err(e) => return db_err(req, e),
    };
    let copy = SimulationProfile {
        id: Uuid::new_v4().to_string(),
        name: optional_str(req, "name").unwrap_or_else(|| format!("{} (copy)", source.name)),
        courses: source.courses,
        weights: source.weights,
    };
    if let Err(e) = db::save_profile(conn, &account, &copy) {
        return db_err(req, e);
    }
    ok(&req.id, json!({ "id": copy.id, "name": copy.name }))
}

fn delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::delete_profile(conn, &account, &id) {
        Ok(()) => ok(&req.id, json!({})),
        Err(e) => db_err(req, e),
    }
}

/// Marks a profile as the one presentation should default to. Computation
/// requests still name their dataset explicitly; this is stored preference,
/// not ambient state.
fn activate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::load_profile(conn, &account, &id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "simulation profile not found", None),
        Err(e) => return db_err(req, e),
    }
    match db::set_active_profile(conn, &account, Some(&id)) {
        Ok(()) => ok(&req.id, json!({ "activeId": id })),
        Err(e) => db_err(req, e),
    }
}

fn deactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match db::set_active_profile(conn, &account, None) {
        Ok(()) => ok(&req.id, json!({ "activeId": serde_json::Value::Null })),
        Err(e) => db_err(req, e),
    }
}

/// Loads the profile a mutation addresses, or the not_found reply.
fn load_for_edit(
    state: &AppState,
    req: &Request,
    account: &str,
) -> Result<SimulationProfile, serde_json::Value> {
    let id = required_str(req, "id")?;
    let conn = db_conn(state, req)?;
    match db::load_profile(conn, account, &id) {
        Ok(Some(p)) => Ok(p),
        Ok(None) => Err(err(&req.id, "not_found", "simulation profile not found", None)),
        Err(e) => Err(db_err(req, e)),
    }
}

fn store_and_reply(
    state: &AppState,
    req: &Request,
    account: &str,
    profile: &SimulationProfile,
) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = db::save_profile(conn, account, profile) {
        return db_err(req, e);
    }
    ok(
        &req.id,
        json!({
            "id": profile.id,
            "courses": profile.courses.iter().map(course_json).collect::<Vec<_>>(),
        }),
    )
}

fn set_score(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let key = match required_str(req, "key") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let score_text = match required_str(req, "scoreText") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut profile = match load_for_edit(state, req, &account) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let Some(course) = profile.courses.iter_mut().find(|c| c.override_key() == key) else {
        return err(&req.id, "not_found", "no course with that key", None);
    };
    course.score_text = score_text;
    store_and_reply(state, req, &account, &profile)
}

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
    let mut profile = match load_for_edit(state, req, &account) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let Some(course) = profile.courses.iter_mut().find(|c| c.override_key() == key) else {
        return err(&req.id, "not_found", "no course with that key", None);
    };
    course.course_type = course_type;
    store_and_reply(state, req, &account, &profile)
}

/// Hypothetical course added to a profile. A semester label already present
/// in the profile adopts its ordinal; an unknown or missing label leaves
/// the course outside period grouping.
fn add_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(spec) = req.params.get("course").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing params.course", None);
    };
    let Some(name) = spec.get("name").and_then(|v| v.as_str()).map(str::trim) else {
        return err(&req.id, "bad_params", "course.name is required", None);
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "course.name is required", None);
    }
    let Some(credits) = spec.get("credits").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "course.credits is required", None);
    };
    if !credits.is_finite() || credits < 0.0 {
        return err(&req.id, "bad_params", "course.credits must be non-negative", None);
    }
    let Some(score_text) = spec.get("scoreText").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "course.scoreText is required", None);
    };
    let course_type = match spec.get("courseType").and_then(|v| v.as_str()) {
        None => CourseType::NonMajor,
        Some(raw) => match CourseType::parse(raw) {
            Some(t) => t,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "courseType must be core, major, nonMajor or hidden",
                    None,
                )
            }
        },
    };
    let semester = spec
        .get("semester")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_SEMESTER)
        .to_string();
    let course_code = spec
        .get("courseCode")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut profile = match load_for_edit(state, req, &account) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let semester_index = profile
        .courses
        .iter()
        .find(|c| c.semester == semester)
        .map(|c| c.semester_index)
        .unwrap_or(0);

    profile.courses.push(Course {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        course_code,
        credits,
        score_text: score_text.to_string(),
        semester,
        semester_index,
        course_type,
        source_major_flag: course_type != CourseType::NonMajor,
    });
    profile
        .courses
        .sort_by(|a, b| (a.semester_index, &a.name).cmp(&(b.semester_index, &b.name)));
    store_and_reply(state, req, &account, &profile)
}

fn remove_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let key = match required_str(req, "key") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut profile = match load_for_edit(state, req, &account) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let before = profile.courses.len();
    profile.courses.retain(|c| c.override_key() != key);
    if profile.courses.len() == before {
        return err(&req.id, "not_found", "no course with that key", None);
    }
    store_and_reply(state, req, &account, &profile)
}

fn set_weights(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let weights = match parse_weights(req.params.get("weights")) {
        Ok(w) => w,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let mut profile = match load_for_edit(state, req, &account) {
        Ok(p) => p,
        Err(e) => return e,
    };
    profile.weights = weights;
    store_and_reply(state, req, &account, &profile)
}
