use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Seeded catalog contract: course id, template, seats per modality and the
/// target rule kind stored in `target_json`.
const SEED_COURSES: &[SeedCourseContract] = &[
    SeedCourseContract {
        course_id: "C-SAFETY-101",
        tab_id: "T-OPEN",
        available_seats: 30,
        available_online_seats: 50,
        target_kind: "all",
        description: "Open to every user, single final approval",
    },
    SeedCourseContract {
        course_id: "C-LEAD-201",
        tab_id: "T-LEAD",
        available_seats: 2,
        available_online_seats: 1,
        target_kind: "specific_departments",
        description: "Department heads of D-ENG and anyone in D-OPS, three-step chain",
    },
    SeedCourseContract {
        course_id: "C-DATA-301",
        tab_id: "T-LEAD",
        available_seats: 10,
        available_online_seats: 0,
        target_kind: "specific_segments",
        description: "Analytics segment only, onsite seats only",
    },
    SeedCourseContract {
        course_id: "C-ORG-110",
        tab_id: "T-OPEN",
        available_seats: 20,
        available_online_seats: 20,
        target_kind: "for_our_organization",
        description: "Members of org-acme",
    },
];

const SEED_TABS: &[(&str, i64)] = &[("T-LEAD", 3), ("T-OPEN", 1)];

const SEED_USER_IDS: &[&str] = &["U-ALICE", "U-BOB", "U-CARA", "U-DAN"];

/// Demo catalog for local runs and CLI smoke checks.
///
/// Loads two approval templates (a three-step leadership chain and a single
/// final approval), four courses covering the main target rules, and four
/// users with differing organization, department and segment attributes.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let courses_seeded = SEED_COURSES
            .iter()
            .map(|course| CourseSeedInfo {
                course_id: course.course_id,
                tab_id: course.tab_id,
                description: course.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { courses_seeded, users_seeded: SEED_USER_IDS.len() })
    }

    /// Checks that every seeded row is present with its contracted values.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for (tab_id, expected_steps) in SEED_TABS {
            let steps: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM approval_step_definition WHERE course_tab_id = ?1",
            )
            .bind(*tab_id)
            .fetch_one(pool)
            .await?;
            checks.push((*tab_id, steps == *expected_steps));

            let finals: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM approval_step_definition
                 WHERE course_tab_id = ?1 AND is_final_approval = 1",
            )
            .bind(*tab_id)
            .fetch_one(pool)
            .await?;
            checks.push(("single-final-step", finals == 1));
        }

        for course in SEED_COURSES {
            let course_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM course
                    WHERE id = ?1
                      AND course_tab_id = ?2
                      AND available_seats = ?3
                      AND available_online_seats = ?4
                      AND json_extract(target_json, '$.kind') = ?5
                 )",
            )
            .bind(course.course_id)
            .bind(course.tab_id)
            .bind(course.available_seats)
            .bind(course.available_online_seats)
            .bind(course.target_kind)
            .fetch_one(pool)
            .await?;
            checks.push((course.course_id, course_ok == 1));
        }

        let quoted_users = sql_array_from_ids(SEED_USER_IDS);
        let users: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM user_profile WHERE id IN {quoted_users}"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("user-profiles", users == SEED_USER_IDS.len() as i64));

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the seeded catalog together with any enrollments made against it.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_courses =
            sql_array_from_ids(&SEED_COURSES.iter().map(|course| course.course_id).collect::<Vec<_>>());
        let quoted_tabs =
            sql_array_from_ids(&SEED_TABS.iter().map(|(tab_id, _)| *tab_id).collect::<Vec<_>>());
        let quoted_users = sql_array_from_ids(SEED_USER_IDS);

        sqlx::query(&format!("DELETE FROM enrollment WHERE course_id IN {quoted_courses}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM course WHERE id IN {quoted_courses}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM course_tab WHERE id IN {quoted_tabs}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM user_profile WHERE id IN {quoted_users}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedCourseContract {
    course_id: &'static str,
    tab_id: &'static str,
    available_seats: i64,
    available_online_seats: i64,
    target_kind: &'static str,
    description: &'static str,
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub courses_seeded: Vec<CourseSeedInfo>,
    pub users_seeded: usize,
}

#[derive(Debug)]
pub struct CourseSeedInfo {
    pub course_id: &'static str,
    pub tab_id: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
