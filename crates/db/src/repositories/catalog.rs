use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use academy_core::catalog::{CourseCatalog, UserDirectory};
use academy_core::domain::course::{
    ApprovalStepDefinition, Course, CourseId, CourseTab, CourseTabId, DepartmentId,
    OrganizationId, SegmentId, StepDefinitionId, TargetConfig,
};
use academy_core::domain::user::{UserId, UserProfile};
use academy_core::ledger::StoreError;

use super::{parse_i32, parse_optional_timestamp, parse_u32, RepositoryError};
use crate::DbPool;

const COURSE_COLUMNS: &str = "id, course_tab_id, organization_id, title, available_seats, available_online_seats, start_date_time, end_date_time, target_json";

pub struct SqlCourseCatalog {
    pool: DbPool,
}

impl SqlCourseCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Upserts a tab and replaces its step definitions. Chains already
    /// snapshotted onto enrollments are unaffected.
    pub async fn save_tab(&self, tab: &CourseTab) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO course_tab (id, name, excuse_time_hours) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                excuse_time_hours = excluded.excuse_time_hours",
        )
        .bind(&tab.id.0)
        .bind(&tab.name)
        .bind(tab.excuse_time_hours.map(i64::from))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM approval_step_definition WHERE course_tab_id = ?")
            .bind(&tab.id.0)
            .execute(&mut *tx)
            .await?;

        for step in &tab.steps {
            sqlx::query(
                "INSERT INTO approval_step_definition (
                    id,
                    course_tab_id,
                    step_order,
                    is_head_approval,
                    is_final_approval,
                    required_role_id
                 ) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&step.id.0)
            .bind(&tab.id.0)
            .bind(i64::from(step.order))
            .bind(step.is_head_approval)
            .bind(step.is_final_approval)
            .bind(step.required_role_id.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn save_course(&self, course: &Course) -> Result<(), RepositoryError> {
        let target_json = course
            .target
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| RepositoryError::Decode(format!("encode target: {error}")))?;

        sqlx::query(
            "INSERT INTO course (
                id,
                course_tab_id,
                organization_id,
                title,
                available_seats,
                available_online_seats,
                start_date_time,
                end_date_time,
                target_json
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                course_tab_id = excluded.course_tab_id,
                organization_id = excluded.organization_id,
                title = excluded.title,
                available_seats = excluded.available_seats,
                available_online_seats = excluded.available_online_seats,
                start_date_time = excluded.start_date_time,
                end_date_time = excluded.end_date_time,
                target_json = excluded.target_json",
        )
        .bind(&course.id.0)
        .bind(&course.course_tab_id.0)
        .bind(&course.organization_id.0)
        .bind(&course.title)
        .bind(i64::from(course.available_seats))
        .bind(i64::from(course.available_online_seats))
        .bind(course.start_date_time.map(|value| value.to_rfc3339()))
        .bind(course.end_date_time.map(|value| value.to_rfc3339()))
        .bind(target_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_tab(&self, id: &CourseTabId) -> Result<Option<CourseTab>, RepositoryError> {
        let Some(row) =
            sqlx::query("SELECT id, name, excuse_time_hours FROM course_tab WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let steps = sqlx::query(
            "SELECT id, course_tab_id, step_order, is_head_approval, is_final_approval, required_role_id
             FROM approval_step_definition
             WHERE course_tab_id = ?
             ORDER BY step_order ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(step_definition_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(CourseTab {
            id: CourseTabId(row.try_get("id")?),
            name: row.try_get("name")?,
            excuse_time_hours: row
                .try_get::<Option<i64>, _>("excuse_time_hours")?
                .map(|hours| parse_u32("excuse_time_hours", hours))
                .transpose()?,
            steps,
        }))
    }
}

#[async_trait]
impl CourseCatalog for SqlCourseCatalog {
    async fn find_course(&self, id: &CourseId) -> Result<Option<Course>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COURSE_COLUMNS} FROM course WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(row.map(course_from_row).transpose()?)
    }

    async fn find_tab(&self, id: &CourseTabId) -> Result<Option<CourseTab>, StoreError> {
        Ok(self.load_tab(id).await?)
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {COURSE_COLUMNS} FROM course ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(course_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

pub struct SqlUserDirectory {
    pool: DbPool,
}

impl SqlUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, user: &UserProfile) -> Result<(), RepositoryError> {
        let segments = user.segment_ids.iter().map(|segment| segment.0.as_str()).collect::<Vec<_>>();
        let segment_ids_json = serde_json::to_string(&segments)
            .map_err(|error| RepositoryError::Decode(format!("encode segments: {error}")))?;

        sqlx::query(
            "INSERT INTO user_profile (
                id,
                organization_id,
                department_id,
                department_role,
                segment_ids_json
             ) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                organization_id = excluded.organization_id,
                department_id = excluded.department_id,
                department_role = excluded.department_role,
                segment_ids_json = excluded.segment_ids_json",
        )
        .bind(&user.id.0)
        .bind(user.organization_id.as_ref().map(|id| id.0.as_str()))
        .bind(user.department_id.as_ref().map(|id| id.0.as_str()))
        .bind(user.department_role.as_deref())
        .bind(segment_ids_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query(
            "SELECT id, organization_id, department_id, department_role, segment_ids_json
             FROM user_profile
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(user_from_row).transpose()?)
    }
}

fn course_from_row(row: SqliteRow) -> Result<Course, RepositoryError> {
    let target = row
        .try_get::<Option<String>, _>("target_json")?
        .map(|raw| {
            serde_json::from_str::<TargetConfig>(&raw)
                .map_err(|error| RepositoryError::Decode(format!("invalid target_json: {error}")))
        })
        .transpose()?;

    Ok(Course {
        id: CourseId(row.try_get("id")?),
        course_tab_id: CourseTabId(row.try_get("course_tab_id")?),
        organization_id: OrganizationId(row.try_get("organization_id")?),
        title: row.try_get("title")?,
        available_seats: parse_u32("available_seats", row.try_get("available_seats")?)?,
        available_online_seats: parse_u32(
            "available_online_seats",
            row.try_get("available_online_seats")?,
        )?,
        start_date_time: parse_optional_timestamp(
            "start_date_time",
            row.try_get("start_date_time")?,
        )?,
        end_date_time: parse_optional_timestamp("end_date_time", row.try_get("end_date_time")?)?,
        target,
    })
}

fn step_definition_from_row(row: SqliteRow) -> Result<ApprovalStepDefinition, RepositoryError> {
    Ok(ApprovalStepDefinition {
        id: StepDefinitionId(row.try_get("id")?),
        course_tab_id: CourseTabId(row.try_get("course_tab_id")?),
        order: parse_i32("step_order", row.try_get("step_order")?)?,
        is_head_approval: row.try_get("is_head_approval")?,
        is_final_approval: row.try_get("is_final_approval")?,
        required_role_id: row.try_get("required_role_id")?,
    })
}

fn user_from_row(row: SqliteRow) -> Result<UserProfile, RepositoryError> {
    let raw_segments = row.try_get::<String, _>("segment_ids_json")?;
    let segment_ids = serde_json::from_str::<Vec<String>>(&raw_segments)
        .map_err(|error| RepositoryError::Decode(format!("invalid segment_ids_json: {error}")))?
        .into_iter()
        .map(SegmentId)
        .collect();

    Ok(UserProfile {
        id: UserId(row.try_get("id")?),
        organization_id: row.try_get::<Option<String>, _>("organization_id")?.map(OrganizationId),
        department_id: row.try_get::<Option<String>, _>("department_id")?.map(DepartmentId),
        department_role: row.try_get("department_role")?,
        segment_ids,
    })
}
