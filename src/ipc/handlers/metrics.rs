use crate::db;
use crate::engine::{
    self, ContributionRanking, Course, MetricKind, WeightsConfig,
};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{course_json, db_conn, db_err, required_str, resolve_dataset};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::collections::BTreeMap;

const DEFAULT_TOP_N: usize = 3;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "metrics.overview" => Some(overview(state, req)),
        "metrics.periods" => Some(periods(state, req)),
        "metrics.contributors" => Some(contributors(state, req)),
        "metrics.goalProgress" => Some(goal_progress(state, req)),
        _ => None,
    }
}

fn pair_json(pair: (f64, f64)) -> serde_json::Value {
    json!({ "score": pair.0, "gpa": pair.1 })
}

fn overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (courses, weights) = match resolve_dataset(state, req, &account) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let bins: Vec<serde_json::Value> = engine::score_bins(&courses, &weights)
        .into_iter()
        .map(|(range, count)| json!({ "range": range, "count": count }))
        .collect();

    ok(
        &req.id,
        json!({
            "unweighted": pair_json(engine::compute_metrics(&courses, &weights, false)),
            "weighted": pair_json(engine::compute_metrics(&courses, &weights, true)),
            "gpa43": engine::compute_gpa_43(&courses, &weights),
            "creditsTotal": engine::credits_sum(&courses),
            "creditsCounted": engine::credits_sum_unique(&courses, &weights),
            "scoreBins": bins,
        }),
    )
}

/// Per-semester or per-academic-year breakdown. Every row runs through the
/// same aggregation contract as the overview, so the two can never disagree.
fn periods(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_by = req
        .params
        .get("groupBy")
        .and_then(|v| v.as_str())
        .unwrap_or("semester");
    let (courses, weights) = match resolve_dataset(state, req, &account) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let groups: BTreeMap<i32, Vec<Course>> = match group_by {
        "semester" => engine::group_by_semester(&courses),
        "year" => engine::group_by_academic_year(&courses),
        _ => {
            return err(
                &req.id,
                "bad_params",
                "groupBy must be semester or year",
                None,
            )
        }
    };

    let rows: Vec<serde_json::Value> = groups
        .iter()
        .map(|(index, group)| {
            let mut row = json!({
                "index": index,
                "unweighted": pair_json(engine::compute_metrics(group, &weights, false)),
                "weighted": pair_json(engine::compute_metrics(group, &weights, true)),
                "gpa43": engine::compute_gpa_43(group, &weights),
                "credits": engine::credits_sum(group),
                "courseCount": group.len(),
            });
            if group_by == "semester" {
                row["semester"] = json!(group[0].semester);
            }
            row
        })
        .collect();

    ok(&req.id, json!({ "groupBy": group_by, "periods": rows }))
}

fn ranking_json(ranking: &ContributionRanking) -> serde_json::Value {
    let entry = |c: &engine::Contribution| {
        json!({
            "course": course_json(&c.course),
            "delta": engine::round4(c.delta),
        })
    };
    json!({
        "lowering": ranking.lowering.iter().map(entry).collect::<Vec<_>>(),
        "raising": ranking.raising.iter().map(entry).collect::<Vec<_>>(),
    })
}

/// Three parallel leave-one-out rankings, never conflated.
fn contributors(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let top_n = req
        .params
        .get("topN")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_TOP_N);
    let (courses, weights) = match resolve_dataset(state, req, &account) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut result = serde_json::Map::new();
    for kind in [MetricKind::Unweighted, MetricKind::Weighted, MetricKind::Gpa43] {
        let ranking = engine::top_contributors(&courses, &weights, kind, top_n);
        result.insert(kind.as_str().to_string(), ranking_json(&ranking));
    }
    ok(&req.id, serde_json::Value::Object(result))
}

fn goal_entry(
    kind: MetricKind,
    courses: &[Course],
    weights: &WeightsConfig,
    target: Option<f64>,
    future_weight: Option<f64>,
    note: Option<engine::FutureWeightNote>,
) -> serde_json::Value {
    let components = engine::metric_components(courses, weights, kind);
    let outcome = engine::required_future_average(
        target,
        components.num,
        components.den,
        future_weight,
        kind.goal_max(),
    );
    let mut entry = json!({
        "metric": kind.as_str(),
        "current": components.current,
        "target": target,
        "outcome": serde_json::to_value(outcome).unwrap_or_else(|_| json!({})),
    });
    if let Some(note) = note {
        entry["note"] = serde_json::to_value(note).unwrap_or(serde_json::Value::Null);
    }
    entry
}

fn goal_progress(state: &mut AppState, req: &Request) -> serde_json::Value {
    let account = match required_str(req, "account") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (courses, weights) = match resolve_dataset(state, req, &account) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let targets = match db::load_targets(conn, &account) {
        Ok(v) => v,
        Err(e) => return db_err(req, e),
    };

    let (future_weighted, weighted_note) = engine::future_weighted_weight(
        targets.expected_credits,
        targets.expected_major_credits,
        &weights,
    );

    ok(
        &req.id,
        json!({
            "expectedCredits": targets.expected_credits,
            "expectedMajorCredits": targets.expected_major_credits,
            "goals": [
                goal_entry(
                    MetricKind::Unweighted,
                    &courses,
                    &weights,
                    targets.avg_target,
                    targets.expected_credits,
                    None,
                ),
                goal_entry(
                    MetricKind::Weighted,
                    &courses,
                    &weights,
                    targets.weighted_target,
                    future_weighted,
                    weighted_note,
                ),
                goal_entry(
                    MetricKind::Gpa43,
                    &courses,
                    &weights,
                    targets.gpa43_target,
                    targets.expected_credits,
                    None,
                ),
            ],
        }),
    )
}
