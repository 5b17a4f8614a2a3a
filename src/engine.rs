use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const MAX_SEMESTER_INDEX: i32 = 12;
pub const UNKNOWN_SEMESTER: &str = "unknown";

/// Marker texts for binary pass/fail courses. These never enter any
/// aggregate; the 5-scale point values exist for display only.
pub const BINARY_PASS: &str = "P";
pub const BINARY_FAIL: &str = "F";

const EPS: f64 = 1e-9;

/// Ceiling for the "required future average" readouts. The weighted ceiling
/// sits above 5.0 because a core boost in gpa mode can push per-course grade
/// points past the scale top.
pub const GOAL_MAX_AVG: f64 = 5.0;
pub const GOAL_MAX_WEIGHTED: f64 = 5.5;
pub const GOAL_MAX_43: f64 = 4.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CourseType {
    Core,
    Major,
    NonMajor,
    Hidden,
}

impl CourseType {
    pub fn as_str(self) -> &'static str {
        match self {
            CourseType::Core => "core",
            CourseType::Major => "major",
            CourseType::NonMajor => "nonMajor",
            CourseType::Hidden => "hidden",
        }
    }

    pub fn parse(s: &str) -> Option<CourseType> {
        match s {
            "core" => Some(CourseType::Core),
            "major" => Some(CourseType::Major),
            "nonMajor" => Some(CourseType::NonMajor),
            "hidden" => Some(CourseType::Hidden),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetakePolicy {
    Best,
    First,
}

impl RetakePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            RetakePolicy::Best => "best",
            RetakePolicy::First => "first",
        }
    }

    /// Unknown policy strings fall back to Best rather than erroring; one bad
    /// config value must not take the whole calculation down.
    pub fn parse_or_default(s: &str) -> RetakePolicy {
        match s {
            "first" => RetakePolicy::First,
            _ => RetakePolicy::Best,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoreMode {
    Gpa,
    Credits,
}

impl CoreMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CoreMode::Gpa => "gpa",
            CoreMode::Credits => "credits",
        }
    }

    pub fn parse_or_default(s: &str) -> CoreMode {
        match s {
            "credits" => CoreMode::Credits,
            _ => CoreMode::Gpa,
        }
    }
}

/// One counted-or-countable attempt at a course.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub course_code: Option<String>,
    pub credits: f64,
    pub score_text: String,
    pub semester: String,
    /// 1..12 chronological ordinal; 0 means "could not be ordered" and the
    /// course is skipped by period grouping.
    pub semester_index: i32,
    pub course_type: CourseType,
    pub source_major_flag: bool,
}

impl Course {
    /// Identity for merge, retake grouping and overrides: course code when
    /// present, else name.
    pub fn identity(&self) -> &str {
        match self.course_code.as_deref() {
            Some(code) if !code.trim().is_empty() => code.trim(),
            _ => self.name.trim(),
        }
    }

    /// Stable key used by the override store and by simulation edits.
    pub fn override_key(&self) -> String {
        course_key(&self.name, self.credits, &self.semester, self.course_code.as_deref())
    }
}

pub fn course_key(name: &str, credits: f64, semester: &str, course_code: Option<&str>) -> String {
    let ident = match course_code {
        Some(code) if !code.trim().is_empty() => code.trim(),
        _ => name.trim(),
    };
    format!("{}|{:.2}|{}", ident, credits, semester)
}

/// Policy knobs for the weighted aggregates. Always valid after
/// `sanitized()`; load/store paths run every config through it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightsConfig {
    pub nonmajor_weight: f64,
    pub core_multiplier: f64,
    pub core_mode: CoreMode,
    pub retake_policy: RetakePolicy,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        WeightsConfig {
            nonmajor_weight: 0.3,
            core_multiplier: 1.2,
            core_mode: CoreMode::Gpa,
            retake_policy: RetakePolicy::Best,
        }
    }
}

impl WeightsConfig {
    pub fn sanitized(self) -> WeightsConfig {
        WeightsConfig {
            nonmajor_weight: if self.nonmajor_weight.is_finite() {
                self.nonmajor_weight.clamp(0.0, 1.0)
            } else {
                0.3
            },
            core_multiplier: if self.core_multiplier.is_finite() {
                self.core_multiplier.clamp(1.0, 2.0)
            } else {
                1.2
            },
            core_mode: self.core_mode,
            retake_policy: self.retake_policy,
        }
    }
}

/// 4-decimal rounding applied to every reported aggregate.
pub fn round4(x: f64) -> f64 {
    (x * 10000.0).round() / 10000.0
}

// Closed inclusive score bands. Scores between integer bands (e.g. 61.5)
// deliberately fall through to grade point 0.0 with the raw score kept;
// aggregate totals depend on that behavior.
const BANDS_5: &[(f64, f64, f64)] = &[
    (95.0, 100.0, 5.0),
    (92.0, 94.0, 4.8),
    (89.0, 91.0, 4.5),
    (86.0, 88.0, 4.2),
    (83.0, 85.0, 3.9),
    (80.0, 82.0, 3.6),
    (77.0, 79.0, 3.3),
    (74.0, 76.0, 3.0),
    (71.0, 73.0, 2.7),
    (68.0, 70.0, 2.4),
    (65.0, 67.0, 2.1),
    (62.0, 64.0, 1.8),
    (60.0, 61.0, 1.5),
    (0.0, 59.0, 0.0),
];

const BANDS_43: &[(f64, f64, f64)] = &[
    (95.0, 100.0, 4.3),
    (92.0, 94.0, 4.2),
    (89.0, 91.0, 4.1),
    (86.0, 88.0, 4.0),
    (83.0, 85.0, 3.9),
    (80.0, 82.0, 3.6),
    (77.0, 79.0, 3.3),
    (74.0, 76.0, 3.0),
    (71.0, 73.0, 2.7),
    (68.0, 70.0, 2.4),
    (65.0, 67.0, 2.1),
    (62.0, 64.0, 1.8),
    (60.0, 61.0, 1.5),
    (0.0, 59.0, 0.0),
];

fn lookup_band(bands: &[(f64, f64, f64)], score: f64) -> f64 {
    for &(low, high, gpa) in bands {
        if score >= low && score <= high {
            return gpa;
        }
    }
    0.0
}

pub fn is_binary_score(score_text: &str) -> bool {
    let t = score_text.trim();
    t == BINARY_PASS || t == BINARY_FAIL
}

/// `(numeric score, grade point)` on the 5-point scale.
pub fn convert_grade(score_text: &str) -> (f64, f64) {
    let t = score_text.trim();
    match t {
        BINARY_PASS => return (0.0, 3.0),
        BINARY_FAIL => return (0.0, 0.0),
        "excellent" => return (90.0, 4.5),
        "good" => return (80.0, 3.5),
        "fair" => return (70.0, 2.5),
        "pass" => return (60.0, 1.5),
        "fail" => return (0.0, 0.0),
        _ => {}
    }
    match t.parse::<f64>() {
        Ok(score) => (score, lookup_band(BANDS_5, score)),
        Err(_) => (0.0, 0.0),
    }
}

/// `(numeric score, grade point)` on the alternate 4.3 scale. Binary markers
/// collapse to (0, 0); such courses are excluded upstream anyway.
pub fn convert_grade_43(score_text: &str) -> (f64, f64) {
    let t = score_text.trim();
    match t {
        BINARY_PASS | BINARY_FAIL => return (0.0, 0.0),
        "excellent" => return (90.0, 4.1),
        "good" => return (80.0, 3.5),
        "fair" => return (70.0, 2.5),
        "pass" => return (60.0, 1.5),
        "fail" => return (0.0, 0.0),
        _ => {}
    }
    match t.parse::<f64>() {
        Ok(score) => (score, lookup_band(BANDS_43, score)),
        Err(_) => (0.0, 0.0),
    }
}

/// Scale-independent exclusion rule applied by every aggregate and
/// contribution computation.
pub fn is_excluded(c: &Course) -> bool {
    is_binary_score(&c.score_text) || c.course_type == CourseType::Hidden
}

/// One counted attempt per distinct identity.
pub fn select_counted_attempts(courses: &[Course], policy: RetakePolicy) -> Vec<Course> {
    let mut by_ident: Vec<(String, Vec<&Course>)> = Vec::new();
    for c in courses {
        let ident = c.identity().to_string();
        match by_ident.iter_mut().find(|(k, _)| *k == ident) {
            Some((_, group)) => group.push(c),
            None => by_ident.push((ident, vec![c])),
        }
    }

    let mut chosen: Vec<Course> = Vec::new();
    for (_, group) in by_ident {
        if group.len() == 1 {
            chosen.push(group[0].clone());
            continue;
        }
        let pick = match policy {
            RetakePolicy::First => group
                .iter()
                .min_by_key(|c| {
                    if c.semester_index > 0 {
                        c.semester_index
                    } else {
                        9999
                    }
                })
                .copied(),
            RetakePolicy::Best => {
                // Highest grade point, then highest score, then the tuple's
                // negated ordinal (non-positive treated as 0).
                let mut best: Option<(&Course, (f64, f64, i32))> = None;
                for c in group {
                    let (s, g) = convert_grade(&c.score_text);
                    let key = (g, s, -c.semester_index.max(0));
                    let better = match &best {
                        None => true,
                        Some((_, bk)) => {
                            cmp_f64(key.0, bk.0)
                                .then(cmp_f64(key.1, bk.1))
                                .then(key.2.cmp(&bk.2))
                                == Ordering::Greater
                        }
                    };
                    if better {
                        best = Some((c, key));
                    }
                }
                best.map(|(c, _)| c)
            }
        };
        if let Some(c) = pick {
            chosen.push(c.clone());
        }
    }

    chosen.sort_by(|a, b| {
        a.semester_index
            .cmp(&b.semester_index)
            .then_with(|| a.name.cmp(&b.name))
    });
    chosen
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// `(average score, average gpa)` on the 5-point scale, 4-decimal rounded.
/// `weighted` switches on the non-major discount and the core boost.
pub fn compute_metrics(courses: &[Course], weights: &WeightsConfig, weighted: bool) -> (f64, f64) {
    let stat = select_counted_attempts(courses, weights.retake_policy);

    let mut total_w = 0.0_f64;
    let mut sum_score = 0.0_f64;
    let mut sum_gpa = 0.0_f64;

    for c in &stat {
        if is_excluded(c) {
            continue;
        }
        let (mut score, mut gpa) = convert_grade(&c.score_text);
        let credits = c.credits;

        let w = if !weighted {
            credits
        } else {
            let nonmajor_x = if c.course_type == CourseType::NonMajor {
                weights.nonmajor_weight
            } else {
                1.0
            };
            if c.course_type == CourseType::Core {
                match weights.core_mode {
                    CoreMode::Gpa => {
                        score *= weights.core_multiplier;
                        gpa *= weights.core_multiplier;
                        credits * nonmajor_x
                    }
                    CoreMode::Credits => credits * nonmajor_x * weights.core_multiplier,
                }
            } else {
                credits * nonmajor_x
            }
        };

        sum_score += score * w;
        sum_gpa += gpa * w;
        total_w += w;
    }

    if total_w <= EPS {
        return (0.0, 0.0);
    }
    (round4(sum_score / total_w), round4(sum_gpa / total_w))
}

/// Credit-weighted 4.3-scale GPA. The alternate scale has no weighted
/// variant: only plain credits enter the denominator.
pub fn compute_gpa_43(courses: &[Course], weights: &WeightsConfig) -> f64 {
    let stat = select_counted_attempts(courses, weights.retake_policy);
    gpa_43_of(stat.iter().filter(|c| !is_excluded(c)))
}

fn gpa_43_of<'a, I: Iterator<Item = &'a Course>>(courses: I) -> f64 {
    let mut total = 0.0_f64;
    let mut sum = 0.0_f64;
    for c in courses {
        let (_s, g43) = convert_grade_43(&c.score_text);
        sum += g43 * c.credits;
        total += c.credits;
    }
    if total <= EPS {
        return 0.0;
    }
    round4(sum / total)
}

pub fn credits_sum(courses: &[Course]) -> f64 {
    round4(courses.iter().map(|c| c.credits).sum())
}

/// Credit total counting each course identity once (post retake selection).
pub fn credits_sum_unique(courses: &[Course], weights: &WeightsConfig) -> f64 {
    credits_sum(&select_counted_attempts(courses, weights.retake_policy))
}

/// Canonical (pre-retake) list partitioned by semester ordinal. Ordinal 0
/// courses cannot be placed and are dropped from the grouping.
pub fn group_by_semester(courses: &[Course]) -> BTreeMap<i32, Vec<Course>> {
    let mut groups: BTreeMap<i32, Vec<Course>> = BTreeMap::new();
    for c in courses {
        if c.semester_index <= 0 {
            continue;
        }
        groups.entry(c.semester_index).or_default().push(c.clone());
    }
    groups
}

pub fn group_by_academic_year(courses: &[Course]) -> BTreeMap<i32, Vec<Course>> {
    let mut groups: BTreeMap<i32, Vec<Course>> = BTreeMap::new();
    for c in courses {
        if c.semester_index <= 0 {
            continue;
        }
        groups.entry((c.semester_index + 1) / 2).or_default().push(c.clone());
    }
    groups
}

/// Post-retake, post-exclusion candidate set shared by the goal solver and
/// the contribution analysis.
pub fn analysis_courses(courses: &[Course], weights: &WeightsConfig) -> Vec<Course> {
    select_counted_attempts(courses, weights.retake_policy)
        .into_iter()
        .filter(|c| !is_excluded(c))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    Unweighted,
    Weighted,
    Gpa43,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Unweighted => "unweighted",
            MetricKind::Weighted => "weighted",
            MetricKind::Gpa43 => "gpa43",
        }
    }

    pub fn goal_max(self) -> f64 {
        match self {
            MetricKind::Unweighted => GOAL_MAX_AVG,
            MetricKind::Weighted => GOAL_MAX_WEIGHTED,
            MetricKind::Gpa43 => GOAL_MAX_43,
        }
    }
}

/// Current value of one GPA metric together with the unrounded weighted sum
/// and weight total the goal solver inverts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricComponents {
    pub current: f64,
    pub num: f64,
    pub den: f64,
}

pub fn metric_components(
    courses: &[Course],
    weights: &WeightsConfig,
    kind: MetricKind,
) -> MetricComponents {
    let stat = analysis_courses(courses, weights);
    let mut num = 0.0_f64;
    let mut den = 0.0_f64;

    for c in &stat {
        let credits = c.credits;
        match kind {
            MetricKind::Unweighted => {
                let (_s, g) = convert_grade(&c.score_text);
                num += g * credits;
                den += credits;
            }
            MetricKind::Gpa43 => {
                let (_s, g43) = convert_grade_43(&c.score_text);
                num += g43 * credits;
                den += credits;
            }
            MetricKind::Weighted => {
                let (_s, mut g) = convert_grade(&c.score_text);
                let nonmajor_x = if c.course_type == CourseType::NonMajor {
                    weights.nonmajor_weight
                } else {
                    1.0
                };
                let w = if c.course_type == CourseType::Core {
                    match weights.core_mode {
                        CoreMode::Gpa => {
                            g *= weights.core_multiplier;
                            credits * nonmajor_x
                        }
                        CoreMode::Credits => credits * nonmajor_x * weights.core_multiplier,
                    }
                } else {
                    credits * nonmajor_x
                };
                num += g * w;
                den += w;
            }
        }
    }

    let current = if den <= EPS { 0.0 } else { round4(num / den) };
    MetricComponents { current, num, den }
}

/// Outcome of inverting the blended-average formula for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum GoalOutcome {
    NoTarget,
    NoFutureCredits,
    AlreadyMet,
    Unreachable { need: f64, max: f64 },
    Needed { need: f64 },
}

/// Average needed over `future_weight` more weight for the blended average
/// to land on `target`. Degrades to descriptive outcomes, never errors.
pub fn required_future_average(
    target: Option<f64>,
    num: f64,
    den: f64,
    future_weight: Option<f64>,
    scale_max: f64,
) -> GoalOutcome {
    let Some(target) = target else {
        return GoalOutcome::NoTarget;
    };
    let Some(future) = future_weight else {
        return GoalOutcome::NoFutureCredits;
    };
    if future <= EPS {
        return GoalOutcome::NoFutureCredits;
    }

    // (num + need*future) / (den + future) = target
    let need = (target * (den + future) - num) / future;
    if need < 0.0 {
        GoalOutcome::AlreadyMet
    } else if need > scale_max {
        GoalOutcome::Unreachable {
            need: round4(need),
            max: scale_max,
        }
    } else {
        GoalOutcome::Needed { need: round4(need) }
    }
}

/// How the expected future credit total splits into weighted-average weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FutureWeightNote {
    AssumedAllNonMajor,
    MajorCreditsClamped,
}

/// Weighted-average weight carried by `expected_credits` future credits of
/// which `expected_major` are major-required, split with `nonmajor_weight`
/// exactly as the aggregation does.
pub fn future_weighted_weight(
    expected_credits: Option<f64>,
    expected_major: Option<f64>,
    weights: &WeightsConfig,
) -> (Option<f64>, Option<FutureWeightNote>) {
    let Some(e) = expected_credits else {
        return (None, None);
    };
    let x = weights.nonmajor_weight;
    match expected_major {
        None => (Some(e * x), Some(FutureWeightNote::AssumedAllNonMajor)),
        Some(m) if m > e => (Some(e), Some(FutureWeightNote::MajorCreditsClamped)),
        Some(m) => (Some(m + (e - m) * x), None),
    }
}

/// One course's marginal (leave-one-out) effect on an aggregate.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub course: Course,
    pub delta: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ContributionRanking {
    /// Removing these raises the average; sorted most negative first.
    pub lowering: Vec<Contribution>,
    /// Removing these lowers the average; sorted most positive first.
    pub raising: Vec<Contribution>,
}

/// Leave-one-out contribution ranking for one metric. O(n^2) in course
/// count: one full aggregation per candidate. Fine at transcript scale;
/// incremental shortcuts would drift from the aggregation formula.
pub fn top_contributors(
    courses: &[Course],
    weights: &WeightsConfig,
    kind: MetricKind,
    top_n: usize,
) -> ContributionRanking {
    let stat = analysis_courses(courses, weights);
    let baseline = metric_of_candidates(&stat, weights, kind);

    let mut deltas: Vec<Contribution> = Vec::with_capacity(stat.len());
    for i in 0..stat.len() {
        let mut rest: Vec<Course> = Vec::with_capacity(stat.len() - 1);
        rest.extend_from_slice(&stat[..i]);
        rest.extend_from_slice(&stat[i + 1..]);
        let without = metric_of_candidates(&rest, weights, kind);
        deltas.push(Contribution {
            course: stat[i].clone(),
            delta: baseline - without,
        });
    }

    let mut lowering: Vec<Contribution> =
        deltas.iter().filter(|d| d.delta < -EPS).cloned().collect();
    lowering.sort_by(|a, b| cmp_f64(a.delta, b.delta));
    lowering.truncate(top_n);

    let mut raising: Vec<Contribution> =
        deltas.iter().filter(|d| d.delta > EPS).cloned().collect();
    raising.sort_by(|a, b| cmp_f64(b.delta, a.delta));
    raising.truncate(top_n);

    ContributionRanking { lowering, raising }
}

fn metric_of_candidates(candidates: &[Course], weights: &WeightsConfig, kind: MetricKind) -> f64 {
    match kind {
        MetricKind::Unweighted => compute_metrics(candidates, weights, false).1,
        MetricKind::Weighted => compute_metrics(candidates, weights, true).1,
        MetricKind::Gpa43 => gpa_43_of(candidates.iter()),
    }
}

/// Distribution of included 5-scale numeric scores over coarse bins, for
/// the overview payload.
pub fn score_bins(courses: &[Course], weights: &WeightsConfig) -> Vec<(&'static str, usize)> {
    let mut bins: Vec<(&'static str, usize)> = vec![
        ("0-59", 0),
        ("60-69", 0),
        ("70-79", 0),
        ("80-89", 0),
        ("90-100", 0),
    ];
    for c in analysis_courses(courses, weights) {
        let (s, _g) = convert_grade(&c.score_text);
        let slot = if s < 60.0 {
            0
        } else if s < 70.0 {
            1
        } else if s < 80.0 {
            2
        } else if s < 90.0 {
            3
        } else {
            4
        };
        bins[slot].1 += 1;
    }
    bins
}
