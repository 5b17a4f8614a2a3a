use crate::engine::{CoreMode, Course, CourseType, RetakePolicy, WeightsConfig};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Account id under which the account-independent fallback rows (weights,
/// overrides) are stored.
pub const GLOBAL_ACCOUNT: &str = "";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("transcript.sqlite3");
    let conn = Connection::open(db_path)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            account TEXT NOT NULL,
            name TEXT NOT NULL,
            course_code TEXT,
            credits REAL NOT NULL,
            score_text TEXT NOT NULL,
            semester TEXT NOT NULL,
            semester_index INTEGER NOT NULL,
            course_type TEXT NOT NULL,
            source_major_flag INTEGER NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_account ON courses(account)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS weights(
            account TEXT PRIMARY KEY,
            nonmajor_weight REAL NOT NULL,
            core_multiplier REAL NOT NULL,
            core_mode TEXT NOT NULL,
            retake_policy TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_overrides(
            account TEXT NOT NULL,
            key TEXT NOT NULL,
            course_type TEXT NOT NULL,
            PRIMARY KEY(account, key)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sim_profiles(
            id TEXT PRIMARY KEY,
            account TEXT NOT NULL,
            name TEXT NOT NULL,
            courses_json TEXT NOT NULL,
            nonmajor_weight REAL NOT NULL,
            core_multiplier REAL NOT NULL,
            core_mode TEXT NOT NULL,
            retake_policy TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sim_profiles_account ON sim_profiles(account)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sim_state(
            account TEXT PRIMARY KEY,
            active_id TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS targets(
            account TEXT PRIMARY KEY,
            avg_target REAL,
            weighted_target REAL,
            gpa43_target REAL,
            expected_credits REAL
        )",
        [],
    )?;
    // Older workspaces predate the major-credit subset on goal targets.
    ensure_targets_major_credits(&conn)?;

    Ok(conn)
}

fn ensure_targets_major_credits(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "targets", "expected_major_credits")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE targets ADD COLUMN expected_major_credits REAL",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn load_courses(conn: &Connection, account: &str) -> anyhow::Result<Vec<Course>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, course_code, credits, score_text, semester,
                semester_index, course_type, source_major_flag
         FROM courses
         WHERE account = ?
         ORDER BY semester_index, name",
    )?;
    let courses = stmt
        .query_map([account], |r| {
            let course_type: String = r.get(7)?;
            Ok(Course {
                id: r.get(0)?,
                name: r.get(1)?,
                course_code: r.get(2)?,
                credits: r.get(3)?,
                score_text: r.get(4)?,
                semester: r.get(5)?,
                semester_index: r.get(6)?,
                course_type: CourseType::parse(&course_type).unwrap_or(CourseType::NonMajor),
                source_major_flag: r.get::<_, i64>(8)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(courses)
}

/// Atomically replace the account's authoritative course set. Consumers see
/// either the old complete set or the new one, never a partial merge.
pub fn replace_courses(
    conn: &mut Connection,
    account: &str,
    courses: &[Course],
) -> anyhow::Result<()> {
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM courses WHERE account = ?", [account])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO courses(
                id, account, name, course_code, credits, score_text,
                semester, semester_index, course_type, source_major_flag, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for c in courses {
            stmt.execute((
                &c.id,
                account,
                &c.name,
                &c.course_code,
                c.credits,
                &c.score_text,
                &c.semester,
                c.semester_index,
                c.course_type.as_str(),
                c.source_major_flag as i64,
                &now,
            ))?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Account weights, falling back to the global row, then defaults.
/// Every path out of here is sanitized.
pub fn load_weights(conn: &Connection, account: &str) -> anyhow::Result<WeightsConfig> {
    for acct in [account, GLOBAL_ACCOUNT] {
        let row: Option<(f64, f64, String, String)> = conn
            .query_row(
                "SELECT nonmajor_weight, core_multiplier, core_mode, retake_policy
                 FROM weights WHERE account = ?",
                [acct],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        if let Some((nonmajor_weight, core_multiplier, core_mode, retake_policy)) = row {
            return Ok(WeightsConfig {
                nonmajor_weight,
                core_multiplier,
                core_mode: CoreMode::parse_or_default(&core_mode),
                retake_policy: RetakePolicy::parse_or_default(&retake_policy),
            }
            .sanitized());
        }
    }
    Ok(WeightsConfig::default())
}

pub fn save_weights(conn: &Connection, account: &str, w: &WeightsConfig) -> anyhow::Result<()> {
    let w = w.sanitized();
    conn.execute(
        "INSERT INTO weights(account, nonmajor_weight, core_multiplier, core_mode, retake_policy)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(account) DO UPDATE SET
            nonmajor_weight = excluded.nonmajor_weight,
            core_multiplier = excluded.core_multiplier,
            core_mode = excluded.core_mode,
            retake_policy = excluded.retake_policy",
        (
            account,
            w.nonmajor_weight,
            w.core_multiplier,
            w.core_mode.as_str(),
            w.retake_policy.as_str(),
        ),
    )?;
    Ok(())
}

/// Classification overrides visible to an account: global rows first,
/// account rows on top.
pub fn load_overrides(
    conn: &Connection,
    account: &str,
) -> anyhow::Result<HashMap<String, CourseType>> {
    let mut map: HashMap<String, CourseType> = HashMap::new();
    for acct in [GLOBAL_ACCOUNT, account] {
        let mut stmt =
            conn.prepare("SELECT key, course_type FROM course_overrides WHERE account = ?")?;
        let rows = stmt.query_map([acct], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, t) = row?;
            if let Some(ct) = CourseType::parse(&t) {
                map.insert(key, ct);
            }
        }
    }
    Ok(map)
}

pub fn set_override(
    conn: &Connection,
    account: &str,
    key: &str,
    course_type: CourseType,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO course_overrides(account, key, course_type) VALUES (?, ?, ?)
         ON CONFLICT(account, key) DO UPDATE SET course_type = excluded.course_type",
        (account, key, course_type.as_str()),
    )?;
    Ok(())
}

pub fn clear_overrides(conn: &Connection, account: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM course_overrides WHERE account = ?", [account])?;
    Ok(())
}

/// A named, independently persisted hypothetical clone of the course set
/// and weighting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationProfile {
    pub id: String,
    pub name: String,
    pub courses: Vec<Course>,
    pub weights: WeightsConfig,
}

pub fn list_profiles(conn: &Connection, account: &str) -> anyhow::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, name FROM sim_profiles WHERE account = ? ORDER BY created_at, id",
    )?;
    let rows = stmt
        .query_map([account], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_profile(
    conn: &Connection,
    account: &str,
    id: &str,
) -> anyhow::Result<Option<SimulationProfile>> {
    let row: Option<(String, String, f64, f64, String, String)> = conn
        .query_row(
            "SELECT name, courses_json, nonmajor_weight, core_multiplier, core_mode, retake_policy
             FROM sim_profiles WHERE account = ? AND id = ?",
            [account, id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .optional()?;
    let Some((name, courses_json, nonmajor_weight, core_multiplier, core_mode, retake_policy)) =
        row
    else {
        return Ok(None);
    };
    let courses: Vec<Course> = serde_json::from_str(&courses_json)?;
    Ok(Some(SimulationProfile {
        id: id.to_string(),
        name,
        courses,
        weights: WeightsConfig {
            nonmajor_weight,
            core_multiplier,
            core_mode: CoreMode::parse_or_default(&core_mode),
            retake_policy: RetakePolicy::parse_or_default(&retake_policy),
        }
        .sanitized(),
    }))
}

pub fn save_profile(
    conn: &Connection,
    account: &str,
    profile: &SimulationProfile,
) -> anyhow::Result<()> {
    let courses_json = serde_json::to_string(&profile.courses)?;
    let w = profile.weights.sanitized();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO sim_profiles(
            id, account, name, courses_json,
            nonmajor_weight, core_multiplier, core_mode, retake_policy, created_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            courses_json = excluded.courses_json,
            nonmajor_weight = excluded.nonmajor_weight,
            core_multiplier = excluded.core_multiplier,
            core_mode = excluded.core_mode,
            retake_policy = excluded.retake_policy",
        (
            &profile.id,
            account,
            &profile.name,
            &courses_json,
            w.nonmajor_weight,
            w.core_multiplier,
            w.core_mode.as_str(),
            w.retake_policy.as_str(),
            &now,
        ),
    )?;
    Ok(())
}

pub fn delete_profile(conn: &Connection, account: &str, id: &str) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM sim_profiles WHERE account = ? AND id = ?",
        [account, id],
    )?;
    // Deleting the active profile reverts computations to the authoritative set.
    if active_profile_id(conn, account)?.as_deref() == Some(id) {
        set_active_profile(conn, account, None)?;
    }
    Ok(())
}

pub fn active_profile_id(conn: &Connection, account: &str) -> anyhow::Result<Option<String>> {
    let row: Option<Option<String>> = conn
        .query_row(
            "SELECT active_id FROM sim_state WHERE account = ?",
            [account],
            |r| r.get(0),
        )
        .optional()?;
    Ok(row.flatten())
}

pub fn set_active_profile(
    conn: &Connection,
    account: &str,
    id: Option<&str>,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO sim_state(account, active_id) VALUES (?, ?)
         ON CONFLICT(account) DO UPDATE SET active_id = excluded.active_id",
        (account, id),
    )?;
    Ok(())
}

/// Per-account goal targets; every field is optional.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalTargets {
    pub avg_target: Option<f64>,
    pub weighted_target: Option<f64>,
    pub gpa43_target: Option<f64>,
    pub expected_credits: Option<f64>,
    pub expected_major_credits: Option<f64>,
}

pub fn load_targets(conn: &Connection, account: &str) -> anyhow::Result<GoalTargets> {
    let row: Option<GoalTargets> = conn
        .query_row(
            "SELECT avg_target, weighted_target, gpa43_target,
                    expected_credits, expected_major_credits
             FROM targets WHERE account = ?",
            [account],
            |r| {
                Ok(GoalTargets {
                    avg_target: r.get(0)?,
                    weighted_target: r.get(1)?,
                    gpa43_target: r.get(2)?,
                    expected_credits: r.get(3)?,
                    expected_major_credits: r.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(row.unwrap_or_default())
}

pub fn save_targets(conn: &Connection, account: &str, t: &GoalTargets) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO targets(
            account, avg_target, weighted_target, gpa43_target,
            expected_credits, expected_major_credits
         ) VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(account) DO UPDATE SET
            avg_target = excluded.avg_target,
            weighted_target = excluded.weighted_target,
            gpa43_target = excluded.gpa43_target,
            expected_credits = excluded.expected_credits,
            expected_major_credits = excluded.expected_major_credits",
        (
            account,
            t.avg_target,
            t.weighted_target,
            t.gpa43_target,
            t.expected_credits,
            t.expected_major_credits,
        ),
    )?;
    Ok(())
}
