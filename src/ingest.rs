use crate::engine::{
    course_key, Course, CourseType, MAX_SEMESTER_INDEX, UNKNOWN_SEMESTER,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// One raw record as delivered by the acquisition collaborator. Two feeds
/// exist: the "completed major-required courses" feed (source A) and the
/// full score feed (source B).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCourseRecord {
    pub name: String,
    #[serde(default)]
    pub course_code: Option<String>,
    #[serde(default)]
    pub credits: f64,
    pub score_text: String,
    /// Institution semester code, e.g. "(2023-2024-1)-MATH1102-...".
    #[serde(default)]
    pub semester_raw: String,
}

/// Failure classification for an acquisition attempt. Surfaced verbatim to
/// presentation; the authoritative course set is never touched on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IngestFailure {
    Timeout,
    Authentication,
    InterfaceChanged,
}

impl IngestFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestFailure::Timeout => "timeout",
            IngestFailure::Authentication => "authentication",
            IngestFailure::InterfaceChanged => "interfaceChanged",
        }
    }

    pub fn parse(s: &str) -> Option<IngestFailure> {
        match s {
            "timeout" => Some(IngestFailure::Timeout),
            "authentication" => Some(IngestFailure::Authentication),
            "interfaceChanged" => Some(IngestFailure::InterfaceChanged),
            _ => None,
        }
    }
}

/// Human-readable semester label from an institution semester code of the
/// form "(<startYear>-<endYear>-<term>)...". Anything that does not parse
/// maps to the "unknown" label, which is valid but unorderable.
pub fn map_semester(semester_code: &str) -> String {
    let code = semester_code.trim();
    if code.len() < 12 || !code.starts_with('(') {
        return UNKNOWN_SEMESTER.to_string();
    }
    let inner = match code[1..].split(')').next() {
        Some(v) => v,
        None => return UNKNOWN_SEMESTER.to_string(),
    };
    let mut parts = inner.split('-');
    let (Some(start), Some(end), Some(term)) = (parts.next(), parts.next(), parts.next()) else {
        return UNKNOWN_SEMESTER.to_string();
    };
    let (Ok(start), Ok(end)) = (start.parse::<i32>(), end.parse::<i32>()) else {
        return UNKNOWN_SEMESTER.to_string();
    };
    let season = match term {
        "1" => "Fall",
        "2" => "Spring",
        _ => return UNKNOWN_SEMESTER.to_string(),
    };
    format!("{:02}-{:02} {}", start.rem_euclid(100), end.rem_euclid(100), season)
}

/// Chronological sort key for a semester label: (start year, term).
/// Unparseable labels (including "unknown") sort last.
pub fn semester_sort_key(label: &str) -> (i32, i32) {
    if label.len() < 2 || label == UNKNOWN_SEMESTER {
        return (9999, 9);
    }
    let Ok(yy) = label[0..2].parse::<i32>() else {
        return (9999, 9);
    };
    let term = if label.contains("Fall") { 1 } else { 2 };
    (2000 + yy, term)
}

fn credits2(credits: f64) -> String {
    format!("{:.2}", credits)
}

fn clean_code(code: &Option<String>) -> Option<String> {
    code.as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

struct Admitted {
    name: String,
    course_code: Option<String>,
    credits: f64,
    score_text: String,
    semester: String,
    is_major: bool,
}

/// Canonicalize the two raw feeds into the unique course set.
///
/// Source A records are authoritative for the major flag and are admitted
/// first; a source B record is dropped when a record already exists under
/// either the code-or-name identity or the bare name, at the same rounded
/// credits and semester. Remaining duplicates (A-internal) consolidate by
/// (name, credits, semester): the major flag ORs and a missing course code
/// is backfilled. `overrides` maps override keys to a persisted
/// classification that replaces the provenance-derived default.
pub fn canonicalize(
    major_records: &[RawCourseRecord],
    score_records: &[RawCourseRecord],
    overrides: &HashMap<String, CourseType>,
) -> Vec<Course> {
    let mut admitted: Vec<Admitted> = Vec::new();
    let mut seen_primary: HashSet<(String, String, String)> = HashSet::new();
    let mut seen_by_name: HashSet<(String, String, String)> = HashSet::new();

    for rec in major_records {
        let name = rec.name.trim().to_string();
        let score = rec.score_text.trim().to_string();
        if name.is_empty() || score.is_empty() {
            continue;
        }
        let semester = map_semester(&rec.semester_raw);
        let code = clean_code(&rec.course_code);
        let ident = code.clone().unwrap_or_else(|| name.clone());

        seen_primary.insert((ident, credits2(rec.credits), semester.clone()));
        seen_by_name.insert((name.clone(), credits2(rec.credits), semester.clone()));
        admitted.push(Admitted {
            name,
            course_code: code,
            credits: rec.credits,
            score_text: score,
            semester,
            is_major: true,
        });
    }

    for rec in score_records {
        let name = rec.name.trim().to_string();
        let score = rec.score_text.trim().to_string();
        if name.is_empty() || score.is_empty() {
            continue;
        }
        let semester = map_semester(&rec.semester_raw);
        let code = clean_code(&rec.course_code);
        let ident = code.clone().unwrap_or_else(|| name.clone());

        let k_primary = (ident, credits2(rec.credits), semester.clone());
        let k_name = (name.clone(), credits2(rec.credits), semester.clone());
        // The name-only check catches a course code present in one feed but
        // missing in the other.
        if seen_primary.contains(&k_primary) || seen_by_name.contains(&k_name) {
            continue;
        }
        seen_primary.insert(k_primary);
        seen_by_name.insert(k_name);
        admitted.push(Admitted {
            name,
            course_code: code,
            credits: rec.credits,
            score_text: score,
            semester,
            is_major: false,
        });
    }

    // Consolidate duplicates that slipped through within one feed.
    let mut merged: Vec<Admitted> = Vec::new();
    let mut index_of: HashMap<(String, String, String), usize> = HashMap::new();
    for rec in admitted {
        let key = (rec.name.clone(), credits2(rec.credits), rec.semester.clone());
        match index_of.get(&key) {
            None => {
                index_of.insert(key, merged.len());
                merged.push(rec);
            }
            Some(&i) => {
                let cur = &mut merged[i];
                cur.is_major = cur.is_major || rec.is_major;
                if cur.course_code.is_none() {
                    cur.course_code = rec.course_code;
                }
            }
        }
    }

    // Ordinals 1..N over the distinct semester labels in chronological
    // order, capped at MAX_SEMESTER_INDEX. Labels beyond the cap (and
    // "unknown" when it falls outside the first N) resolve to 0.
    let mut labels: Vec<String> = merged
        .iter()
        .map(|r| r.semester.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    labels.sort_by_key(|l| semester_sort_key(l));
    let mut sem_to_idx: HashMap<String, i32> = HashMap::new();
    let mut idx = 1;
    for label in labels {
        sem_to_idx.insert(label, idx);
        idx += 1;
        if idx > MAX_SEMESTER_INDEX {
            break;
        }
    }

    let mut courses: Vec<Course> = Vec::with_capacity(merged.len());
    for rec in merged {
        let key = course_key(
            &rec.name,
            rec.credits,
            &rec.semester,
            rec.course_code.as_deref(),
        );
        let default_type = if rec.is_major {
            CourseType::Major
        } else {
            CourseType::NonMajor
        };
        let course_type = overrides.get(&key).copied().unwrap_or(default_type);
        let semester_index = sem_to_idx.get(&rec.semester).copied().unwrap_or(0);

        courses.push(Course {
            id: Uuid::new_v4().to_string(),
            name: rec.name,
            course_code: rec.course_code,
            credits: rec.credits,
            score_text: rec.score_text,
            semester: rec.semester,
            semester_index,
            course_type,
            source_major_flag: rec.is_major,
        });
    }

    courses.sort_by(|a, b| {
        a.semester_index
            .cmp(&b.semester_index)
            .then_with(|| a.name.cmp(&b.name))
    });
    courses
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, credits: f64, score: &str, sem: &str) -> RawCourseRecord {
        RawCourseRecord {
            name: name.to_string(),
            course_code: None,
            credits,
            score_text: score.to_string(),
            semester_raw: sem.to_string(),
        }
    }

    const SEM_23F: &str = "(2023-2024-1)-X";
    const SEM_24S: &str = "(2023-2024-2)-X";
    const SEM_24F: &str = "(2024-2025-1)-X";

    #[test]
    fn semester_mapping() {
        assert_eq!(map_semester(SEM_23F), "23-24 Fall");
        assert_eq!(map_semester(SEM_24S), "23-24 Spring");
        assert_eq!(map_semester("(2024-2025-1)-MATH1102-1"), "24-25 Fall");
        assert_eq!(map_semester(""), UNKNOWN_SEMESTER);
        assert_eq!(map_semester("garbage"), UNKNOWN_SEMESTER);
        assert_eq!(map_semester("(2024-2025-7)-X"), UNKNOWN_SEMESTER);
    }

    #[test]
    fn semester_sort_key_orders_chronologically() {
        let mut labels = vec![
            "24-25 Fall".to_string(),
            UNKNOWN_SEMESTER.to_string(),
            "23-24 Spring".to_string(),
            "23-24 Fall".to_string(),
        ];
        labels.sort_by_key(|l| semester_sort_key(l));
        assert_eq!(
            labels,
            vec!["23-24 Fall", "23-24 Spring", "24-25 Fall", UNKNOWN_SEMESTER]
        );
    }

    #[test]
    fn cross_source_duplicate_collapses_with_major_flag() {
        let a = vec![raw("Algorithms", 4.0, "92", SEM_23F)];
        let b = vec![raw("Algorithms", 4.0, "92", SEM_23F)];
        let courses = canonicalize(&a, &b, &HashMap::new());
        assert_eq!(courses.len(), 1);
        assert!(courses[0].source_major_flag);
        assert_eq!(courses[0].course_type, CourseType::Major);
    }

    #[test]
    fn name_match_blocks_b_record_with_differing_code() {
        let a = vec![raw("Algorithms", 4.0, "92", SEM_23F)];
        let mut b_rec = raw("Algorithms", 4.0, "92", SEM_23F);
        b_rec.course_code = Some("CS2040".to_string());
        let courses = canonicalize(&a, &[b_rec], &HashMap::new());
        assert_eq!(courses.len(), 1, "name+credits+semester match must dedup");
        assert!(courses[0].source_major_flag);
    }

    #[test]
    fn differing_credits_or_semester_admit_both() {
        let a = vec![raw("Algorithms", 4.0, "92", SEM_23F)];
        let b = vec![
            raw("Algorithms", 2.0, "92", SEM_23F),
            raw("Algorithms", 4.0, "88", SEM_24S),
        ];
        let courses = canonicalize(&a, &b, &HashMap::new());
        assert_eq!(courses.len(), 3);
    }

    #[test]
    fn source_a_internal_merge_backfills_code() {
        let mut with_code = raw("Seminar", 1.0, "P", SEM_23F);
        with_code.course_code = Some("GEN101".to_string());
        // Same (name, credits, semester) appears twice in feed A; the
        // code-less one arrives first.
        let a = vec![raw("Seminar", 1.0, "P", SEM_23F), with_code];
        let courses = canonicalize(&a, &[], &HashMap::new());
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].course_code.as_deref(), Some("GEN101"));
        assert!(courses[0].source_major_flag);
    }

    #[test]
    fn blank_name_or_score_dropped_silently() {
        let a = vec![
            raw("", 2.0, "92", SEM_23F),
            raw("OK", 2.0, "", SEM_23F),
            raw("  ", 2.0, "92", SEM_23F),
            raw("Kept", 2.0, "92", SEM_23F),
        ];
        let courses = canonicalize(&a, &[], &HashMap::new());
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].name, "Kept");
    }

    #[test]
    fn ordinals_assigned_chronologically_and_capped() {
        let mut b: Vec<RawCourseRecord> = Vec::new();
        // 14 distinct semesters: 7 academic years, two terms each.
        for year in 0..7 {
            for term in 1..=2 {
                b.push(raw(
                    &format!("C-{}-{}", year, term),
                    2.0,
                    "80",
                    &format!("(20{}-20{}-{})-X", 18 + year, 19 + year, term),
                ));
            }
        }
        let courses = canonicalize(&[], &b, &HashMap::new());
        let max_idx = courses.iter().map(|c| c.semester_index).max().unwrap();
        assert_eq!(max_idx, MAX_SEMESTER_INDEX);
        let unplaced: Vec<_> = courses.iter().filter(|c| c.semester_index == 0).collect();
        assert_eq!(unplaced.len(), 2, "semesters past the cap stay unordered");
    }

    #[test]
    fn unknown_semester_sorts_last_and_orders_rest() {
        let b = vec![
            raw("New", 2.0, "80", SEM_24F),
            raw("Old", 2.0, "80", SEM_23F),
            raw("Lost", 2.0, "80", ""),
        ];
        let courses = canonicalize(&[], &b, &HashMap::new());
        let by_name: HashMap<&str, i32> = courses
            .iter()
            .map(|c| (c.name.as_str(), c.semester_index))
            .collect();
        assert_eq!(by_name["Old"], 1);
        assert_eq!(by_name["New"], 2);
        assert_eq!(by_name["Lost"], 3, "unknown still gets an ordinal under the cap");
    }

    #[test]
    fn overrides_replace_default_classification() {
        let mut overrides = HashMap::new();
        overrides.insert("Algorithms|4.00|23-24 Fall".to_string(), CourseType::Core);
        let a = vec![raw("Algorithms", 4.0, "92", SEM_23F)];
        let b = vec![raw("Elective", 2.0, "80", SEM_23F)];
        let courses = canonicalize(&a, &b, &overrides);
        let algo = courses.iter().find(|c| c.name == "Algorithms").unwrap();
        let elec = courses.iter().find(|c| c.name == "Elective").unwrap();
        assert_eq!(algo.course_type, CourseType::Core);
        assert_eq!(elec.course_type, CourseType::NonMajor);
    }

    #[test]
    fn canonicalize_is_idempotent_up_to_ids() {
        let a = vec![raw("Algorithms", 4.0, "92", SEM_23F)];
        let b = vec![
            raw("Elective", 2.0, "80", SEM_24S),
            raw("Algorithms", 4.0, "92", SEM_23F),
        ];
        let first = canonicalize(&a, &b, &HashMap::new());
        let second = canonicalize(&a, &b, &HashMap::new());
        assert_eq!(first.len(), second.len());
        for (x, y) in first.iter().zip(second.iter()) {
            assert_eq!(x.name, y.name);
            assert_eq!(x.semester_index, y.semester_index);
            assert_eq!(x.score_text, y.score_text);
            assert_eq!(x.course_type, y.course_type);
            assert_eq!(x.source_major_flag, y.source_major_flag);
        }
    }

    #[test]
    fn result_sorted_by_ordinal_then_name() {
        let b = vec![
            raw("Zeta", 2.0, "80", SEM_23F),
            raw("Alpha", 2.0, "80", SEM_24S),
            raw("Beta", 2.0, "80", SEM_23F),
        ];
        let courses = canonicalize(&[], &b, &HashMap::new());
        let names: Vec<&str> = courses.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Beta", "Zeta", "Alpha"]);
    }
}
