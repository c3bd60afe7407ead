use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::warn;

use academy_core::domain::course::{CourseId, EnrollmentType, StepDefinitionId};
use academy_core::domain::enrollment::{
    ApprovalStepInstance, Enrollment, EnrollmentId, EnrollmentStatus, StepInstanceId, StepState,
};
use academy_core::domain::user::UserId;
use academy_core::ledger::{
    EnrollmentStore, FinalApproval, GuardOutcome, InsertOutcome, StatusChange, StepDecision,
    StoreError,
};

use super::{parse_i32, parse_optional_timestamp, parse_timestamp, parse_u32, RepositoryError};
use crate::DbPool;

const ENROLLMENT_COLUMNS: &str = "id, course_id, user_id, status, final_approval, enrollment_type, created_at, updated_at";

const STEP_COLUMNS: &str = "id, enrollment_id, step_definition_id, step_order, is_head_approval, is_final_approval, required_role_id, state, approved_by, approved_at, comments";

/// SQLite-backed enrollment ledger.
///
/// Guarded writes run inside `BEGIN IMMEDIATE`, so the write lock is taken
/// before any precondition is read. Two final approvals racing for the last
/// seat of a course therefore serialize at the database, across processes.
///
/// A guarded write whose future is dropped mid-transaction does not leak the
/// write lock: its connection is closed instead of going back to the pool.
pub struct SqlEnrollmentStore {
    pool: DbPool,
}

impl SqlEnrollmentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn insert(
        &self,
        enrollment: &Enrollment,
        steps: &[ApprovalStepInstance],
    ) -> Result<InsertOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        match insert_rows(&mut tx, enrollment, steps).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(InsertOutcome::Inserted)
            }
            Err(RepositoryError::Database(sqlx::Error::Database(error)))
                if error.is_unique_violation() =>
            {
                tx.rollback().await?;
                Ok(InsertOutcome::Duplicate)
            }
            Err(error) => Err(error),
        }
    }

    async fn run_guarded(&self, write: GuardedWrite<'_>) -> Result<GuardOutcome, RepositoryError> {
        let mut tx = ImmediateWrite::begin(&self.pool).await?;
        let applied = apply_guarded(tx.connection()?, &write).await;
        let commit = matches!(applied, Ok(GuardOutcome::Applied));
        tx.finish(commit).await?;
        applied
    }
}

/// A pooled connection holding an open `BEGIN IMMEDIATE` transaction.
///
/// If the owning future is dropped before `finish` completes, the connection
/// is detached from the pool rather than returned with the transaction still
/// open. SQLite rolls the transaction back when the detached connection
/// closes.
struct ImmediateWrite {
    conn: Option<PoolConnection<Sqlite>>,
}

impl ImmediateWrite {
    async fn begin(pool: &DbPool) -> Result<Self, RepositoryError> {
        let mut tx = Self { conn: Some(pool.acquire().await?) };
        let began = sqlx::query("BEGIN IMMEDIATE").execute(tx.connection()?).await;
        if let Err(error) = began {
            // No transaction was opened, so the connection can go back as is.
            tx.conn.take();
            return Err(error.into());
        }
        Ok(tx)
    }

    fn connection(&mut self) -> Result<&mut SqliteConnection, RepositoryError> {
        self.conn.as_deref_mut().ok_or(RepositoryError::TransactionClosed)
    }

    async fn finish(mut self, commit: bool) -> Result<(), RepositoryError> {
        let statement = if commit { "COMMIT" } else { "ROLLBACK" };
        let finished = sqlx::query(statement).execute(self.connection()?).await;
        match finished {
            Ok(_) => {
                self.conn.take();
                Ok(())
            }
            Err(error) if commit => {
                let rolled_back = sqlx::query("ROLLBACK").execute(self.connection()?).await;
                match rolled_back {
                    Ok(_) => {
                        self.conn.take();
                    }
                    Err(rollback) => {
                        warn!(error = %rollback, "rollback after failed commit also failed");
                    }
                }
                Err(error.into())
            }
            Err(error) => {
                warn!(error = %error, "rollback of guarded enrollment write failed");
                Ok(())
            }
        }
    }
}

impl Drop for ImmediateWrite {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("guarded enrollment write ended inside its transaction, discarding connection");
            drop(conn.detach());
        }
    }
}

async fn insert_rows(
    conn: &mut SqliteConnection,
    enrollment: &Enrollment,
    steps: &[ApprovalStepInstance],
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO enrollment (
            id,
            course_id,
            user_id,
            status,
            final_approval,
            enrollment_type,
            created_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&enrollment.id.0)
    .bind(&enrollment.course_id.0)
    .bind(&enrollment.user_id.0)
    .bind(enrollment.status.as_str())
    .bind(enrollment.final_approval)
    .bind(enrollment.enrollment_type.map(|value| value.as_str()))
    .bind(enrollment.created_at.to_rfc3339())
    .bind(enrollment.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    for step in steps {
        sqlx::query(
            "INSERT INTO approval_step (
                id,
                enrollment_id,
                step_definition_id,
                step_order,
                is_head_approval,
                is_final_approval,
                required_role_id,
                state,
                approved_by,
                approved_at,
                comments
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&step.id.0)
        .bind(&step.enrollment_id.0)
        .bind(&step.step_definition_id.0)
        .bind(i64::from(step.step_order))
        .bind(step.is_head_approval)
        .bind(step.is_final_approval)
        .bind(step.required_role_id.as_deref())
        .bind(step.state.as_str())
        .bind(step.approved_by.as_ref().map(|user| user.0.as_str()))
        .bind(step.approved_at.map(|value| value.to_rfc3339()))
        .bind(step.comments.as_deref())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

enum GuardedWrite<'a> {
    Approve(&'a StepDecision),
    Finalize(&'a FinalApproval),
    Reject(&'a StepDecision),
    Status(&'a StatusChange),
}

async fn apply_guarded(
    conn: &mut SqliteConnection,
    write: &GuardedWrite<'_>,
) -> Result<GuardOutcome, RepositoryError> {
    match write {
        GuardedWrite::Approve(decision) => {
            if let Some(blocked) = check_step(conn, decision, true).await? {
                return Ok(blocked);
            }
            record_approval(conn, decision).await?;
            sqlx::query("UPDATE enrollment SET updated_at = ? WHERE id = ?")
                .bind(decision.decided_at.to_rfc3339())
                .bind(&decision.enrollment_id.0)
                .execute(&mut *conn)
                .await?;
        }
        GuardedWrite::Finalize(approval) => {
            let decision = &approval.decision;
            if let Some(blocked) = check_step(conn, decision, true).await? {
                return Ok(blocked);
            }

            let approved =
                approved_seats(conn, &approval.course_id, approval.enrollment_type).await?;
            if approved >= approval.capacity {
                return Ok(GuardOutcome::CapacityExhausted { approved });
            }

            record_approval(conn, decision).await?;
            sqlx::query(
                "UPDATE enrollment
                 SET status = 'approve', final_approval = 1, enrollment_type = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(approval.enrollment_type.as_str())
            .bind(decision.decided_at.to_rfc3339())
            .bind(&decision.enrollment_id.0)
            .execute(&mut *conn)
            .await?;
        }
        GuardedWrite::Reject(decision) => {
            if let Some(blocked) = check_step(conn, decision, false).await? {
                return Ok(blocked);
            }
            sqlx::query(
                "UPDATE approval_step
                 SET state = 'rejected', approved_by = ?, approved_at = ?, comments = ?
                 WHERE enrollment_id = ? AND step_definition_id = ?",
            )
            .bind(&decision.decided_by.0)
            .bind(decision.decided_at.to_rfc3339())
            .bind(decision.comments.as_deref())
            .bind(&decision.enrollment_id.0)
            .bind(&decision.step_definition_id.0)
            .execute(&mut *conn)
            .await?;
            sqlx::query("UPDATE enrollment SET status = 'reject', updated_at = ? WHERE id = ?")
                .bind(decision.decided_at.to_rfc3339())
                .bind(&decision.enrollment_id.0)
                .execute(&mut *conn)
                .await?;
        }
        GuardedWrite::Status(change) => {
            let Some(status) = enrollment_status(conn, &change.enrollment_id).await? else {
                return Ok(GuardOutcome::EnrollmentMissing);
            };
            if !change.allowed_from.contains(&status) {
                return Ok(GuardOutcome::StatusMismatch(status));
            }
            sqlx::query(
                "UPDATE enrollment
                 SET status = ?,
                     final_approval = CASE WHEN ? = 'approve' THEN final_approval ELSE 0 END,
                     updated_at = ?
                 WHERE id = ?",
            )
            .bind(change.to.as_str())
            .bind(change.to.as_str())
            .bind(change.changed_at.to_rfc3339())
            .bind(&change.enrollment_id.0)
            .execute(&mut *conn)
            .await?;
        }
    }

    Ok(GuardOutcome::Applied)
}

/// Everything a step write checks except capacity, in guard order.
async fn check_step(
    conn: &mut SqliteConnection,
    decision: &StepDecision,
    ordered: bool,
) -> Result<Option<GuardOutcome>, RepositoryError> {
    let Some(status) = enrollment_status(conn, &decision.enrollment_id).await? else {
        return Ok(Some(GuardOutcome::EnrollmentMissing));
    };

    let step_order = sqlx::query_scalar::<_, i64>(
        "SELECT step_order FROM approval_step WHERE enrollment_id = ? AND step_definition_id = ?",
    )
    .bind(&decision.enrollment_id.0)
    .bind(&decision.step_definition_id.0)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(step_order) = step_order else {
        return Ok(Some(GuardOutcome::StepMissing));
    };

    if ordered {
        let waiting = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM approval_step
             WHERE enrollment_id = ? AND step_order < ? AND state <> 'approved'",
        )
        .bind(&decision.enrollment_id.0)
        .bind(step_order)
        .fetch_one(&mut *conn)
        .await?;
        if waiting > 0 {
            return Ok(Some(GuardOutcome::OutOfOrder));
        }
    }

    if status != EnrollmentStatus::Pending {
        return Ok(Some(GuardOutcome::NotPending(status)));
    }
    Ok(None)
}

/// Re-approving an approved step leaves the first approver in place.
async fn record_approval(
    conn: &mut SqliteConnection,
    decision: &StepDecision,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE approval_step
         SET state = 'approved', approved_by = ?, approved_at = ?, comments = ?
         WHERE enrollment_id = ? AND step_definition_id = ? AND state <> 'approved'",
    )
    .bind(&decision.decided_by.0)
    .bind(decision.decided_at.to_rfc3339())
    .bind(decision.comments.as_deref())
    .bind(&decision.enrollment_id.0)
    .bind(&decision.step_definition_id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn enrollment_status(
    conn: &mut SqliteConnection,
    id: &EnrollmentId,
) -> Result<Option<EnrollmentStatus>, RepositoryError> {
    sqlx::query_scalar::<_, String>("SELECT status FROM enrollment WHERE id = ?")
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?
        .map(|raw| parse_status(&raw))
        .transpose()
}

async fn approved_seats(
    conn: &mut SqliteConnection,
    course_id: &CourseId,
    enrollment_type: EnrollmentType,
) -> Result<u32, RepositoryError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM enrollment
         WHERE course_id = ? AND status = 'approve' AND enrollment_type = ?",
    )
    .bind(&course_id.0)
    .bind(enrollment_type.as_str())
    .fetch_one(&mut *conn)
    .await?;
    parse_u32("approved_count", count)
}

#[async_trait]
impl EnrollmentStore for SqlEnrollmentStore {
    async fn insert_enrollment(
        &self,
        enrollment: &Enrollment,
        steps: &[ApprovalStepInstance],
    ) -> Result<InsertOutcome, StoreError> {
        Ok(self.insert(enrollment, steps).await?)
    }

    async fn find_enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollment WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(row.map(enrollment_from_row).transpose()?)
    }

    async fn find_by_course_and_user(
        &self,
        course_id: &CourseId,
        user_id: &UserId,
    ) -> Result<Option<Enrollment>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollment WHERE course_id = ? AND user_id = ?"
        ))
        .bind(&course_id.0)
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(enrollment_from_row).transpose()?)
    }

    async fn list_for_course(&self, course_id: &CourseId) -> Result<Vec<Enrollment>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollment
             WHERE course_id = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&course_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(enrollment_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_steps(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<ApprovalStepInstance>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM approval_step
             WHERE enrollment_id = ?
             ORDER BY step_order ASC"
        ))
        .bind(&enrollment_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(step_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn count_approved(
        &self,
        course_id: &CourseId,
        enrollment_type: EnrollmentType,
    ) -> Result<u32, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(approved_seats(&mut conn, course_id, enrollment_type).await?)
    }

    async fn approve_step(&self, decision: &StepDecision) -> Result<GuardOutcome, StoreError> {
        Ok(self.run_guarded(GuardedWrite::Approve(decision)).await?)
    }

    async fn finalize_approval(
        &self,
        approval: &FinalApproval,
    ) -> Result<GuardOutcome, StoreError> {
        Ok(self.run_guarded(GuardedWrite::Finalize(approval)).await?)
    }

    async fn reject_step(&self, decision: &StepDecision) -> Result<GuardOutcome, StoreError> {
        Ok(self.run_guarded(GuardedWrite::Reject(decision)).await?)
    }

    async fn change_status(&self, change: &StatusChange) -> Result<GuardOutcome, StoreError> {
        Ok(self.run_guarded(GuardedWrite::Status(change)).await?)
    }
}

fn parse_status(raw: &str) -> Result<EnrollmentStatus, RepositoryError> {
    EnrollmentStatus::parse(raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown enrollment status `{raw}`")))
}

fn enrollment_from_row(row: SqliteRow) -> Result<Enrollment, RepositoryError> {
    let status = parse_status(&row.try_get::<String, _>("status")?)?;
    let enrollment_type = row
        .try_get::<Option<String>, _>("enrollment_type")?
        .map(|value| {
            EnrollmentType::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown enrollment type `{value}`")))
        })
        .transpose()?;

    Ok(Enrollment {
        id: EnrollmentId(row.try_get("id")?),
        course_id: CourseId(row.try_get("course_id")?),
        user_id: UserId(row.try_get("user_id")?),
        status,
        final_approval: row.try_get("final_approval")?,
        enrollment_type,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn step_from_row(row: SqliteRow) -> Result<ApprovalStepInstance, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = StepState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown step state `{state_raw}`")))?;

    Ok(ApprovalStepInstance {
        id: StepInstanceId(row.try_get("id")?),
        enrollment_id: EnrollmentId(row.try_get("enrollment_id")?),
        step_definition_id: StepDefinitionId(row.try_get("step_definition_id")?),
        step_order: parse_i32("step_order", row.try_get("step_order")?)?,
        is_head_approval: row.try_get("is_head_approval")?,
        is_final_approval: row.try_get("is_final_approval")?,
        required_role_id: row.try_get("required_role_id")?,
        state,
        approved_by: row.try_get::<Option<String>, _>("approved_by")?.map(UserId),
        approved_at: parse_optional_timestamp("approved_at", row.try_get("approved_at")?)?,
        comments: row.try_get("comments")?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Utc};

    use academy_core::domain::course::{CourseId, EnrollmentType, StepDefinitionId};
    use academy_core::domain::enrollment::{
        ApprovalStepInstance, Enrollment, EnrollmentId, EnrollmentStatus, StepInstanceId,
        StepState,
    };
    use academy_core::domain::user::UserId;
    use academy_core::ledger::{
        EnrollmentStore, FinalApproval, GuardOutcome, InsertOutcome, StatusChange, StepDecision,
    };

    use super::{ImmediateWrite, SqlEnrollmentStore};
    use crate::migrations;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn insert_and_read_back_enrollment_with_chain() {
        let pool = setup_pool().await;
        let store = SqlEnrollmentStore::new(pool.clone());
        let (enrollment, steps) = sample("E-1", "U-1", 2);

        let outcome = store.insert_enrollment(&enrollment, &steps).await.expect("insert");
        assert_eq!(outcome, InsertOutcome::Inserted);

        let found = store.find_enrollment(&enrollment.id).await.expect("find");
        assert_eq!(found, Some(enrollment.clone()));
        let by_pair = store
            .find_by_course_and_user(&enrollment.course_id, &enrollment.user_id)
            .await
            .expect("find by pair");
        assert_eq!(by_pair, Some(enrollment.clone()));
        assert_eq!(store.list_steps(&enrollment.id).await.expect("steps"), steps);
        assert_eq!(
            store.list_for_course(&enrollment.course_id).await.expect("list"),
            vec![enrollment]
        );

        pool.close().await;
    }

    #[tokio::test]
    async fn duplicate_pair_reports_duplicate_and_keeps_no_partial_rows() {
        let pool = setup_pool().await;
        let store = SqlEnrollmentStore::new(pool.clone());
        let (first, first_steps) = sample("E-1", "U-1", 2);
        store.insert_enrollment(&first, &first_steps).await.expect("first");

        let (second, second_steps) = sample("E-2", "U-1", 2);
        let outcome = store.insert_enrollment(&second, &second_steps).await.expect("second");
        assert_eq!(outcome, InsertOutcome::Duplicate);
        assert_eq!(store.find_enrollment(&second.id).await.expect("find"), None);
        assert!(store.list_steps(&second.id).await.expect("steps").is_empty());

        pool.close().await;
    }

    #[tokio::test]
    async fn approve_enforces_order_and_keeps_first_decision() {
        let pool = setup_pool().await;
        let store = SqlEnrollmentStore::new(pool.clone());
        let (enrollment, steps) = sample("E-1", "U-1", 3);
        store.insert_enrollment(&enrollment, &steps).await.expect("insert");

        let early = store.approve_step(&decision("E-1", "S-2", "approver-a")).await.expect("early");
        assert_eq!(early, GuardOutcome::OutOfOrder);

        let first = store.approve_step(&decision("E-1", "S-1", "approver-a")).await.expect("s1");
        assert_eq!(first, GuardOutcome::Applied);
        let again = store.approve_step(&decision("E-1", "S-1", "approver-b")).await.expect("again");
        assert_eq!(again, GuardOutcome::Applied);

        let chain = store.list_steps(&enrollment.id).await.expect("steps");
        assert_eq!(chain[0].state, StepState::Approved);
        assert_eq!(chain[0].approved_by, Some(UserId("approver-a".to_owned())));
        assert_eq!(chain[1].state, StepState::Unapproved);

        let missing = store.approve_step(&decision("E-1", "S-9", "approver-a")).await.expect("s9");
        assert_eq!(missing, GuardOutcome::StepMissing);
        let unknown = store.approve_step(&decision("E-9", "S-1", "approver-a")).await.expect("e9");
        assert_eq!(unknown, GuardOutcome::EnrollmentMissing);

        pool.close().await;
    }

    #[tokio::test]
    async fn finalize_counts_seats_per_modality() {
        let pool = setup_pool().await;
        let store = SqlEnrollmentStore::new(pool.clone());
        for (id, user) in [("E-1", "U-1"), ("E-2", "U-2"), ("E-3", "U-3")] {
            let (enrollment, steps) = sample(id, user, 1);
            store.insert_enrollment(&enrollment, &steps).await.expect("insert");
        }

        let first = store
            .finalize_approval(&final_approval("E-1", EnrollmentType::Onsite, 1))
            .await
            .expect("first");
        assert_eq!(first, GuardOutcome::Applied);

        let full = store
            .finalize_approval(&final_approval("E-2", EnrollmentType::Onsite, 1))
            .await
            .expect("second");
        assert_eq!(full, GuardOutcome::CapacityExhausted { approved: 1 });

        let online = store
            .finalize_approval(&final_approval("E-3", EnrollmentType::Online, 1))
            .await
            .expect("online");
        assert_eq!(online, GuardOutcome::Applied);

        let course = CourseId("C-1".to_owned());
        assert_eq!(store.count_approved(&course, EnrollmentType::Onsite).await.expect("count"), 1);
        assert_eq!(store.count_approved(&course, EnrollmentType::Online).await.expect("count"), 1);

        let refused = store.find_enrollment(&EnrollmentId("E-2".into())).await.expect("find");
        let refused = refused.expect("E-2 exists");
        assert_eq!(refused.status, EnrollmentStatus::Pending);
        assert!(!refused.final_approval);
        let chain = store.list_steps(&refused.id).await.expect("steps");
        assert_eq!(chain[0].state, StepState::Unapproved, "refused finalize must roll back");

        pool.close().await;
    }

    #[tokio::test]
    async fn reject_closes_enrollment_and_blocks_later_approval() {
        let pool = setup_pool().await;
        let store = SqlEnrollmentStore::new(pool.clone());
        let (enrollment, steps) = sample("E-1", "U-1", 2);
        store.insert_enrollment(&enrollment, &steps).await.expect("insert");

        let rejected = store.reject_step(&decision("E-1", "S-2", "approver-a")).await.expect("reject");
        assert_eq!(rejected, GuardOutcome::Applied);

        let after = store.approve_step(&decision("E-1", "S-1", "approver-a")).await.expect("approve");
        assert_eq!(after, GuardOutcome::NotPending(EnrollmentStatus::Reject));

        let chain = store.list_steps(&enrollment.id).await.expect("steps");
        assert_eq!(chain[1].state, StepState::Rejected);
        assert_eq!(chain[1].comments.as_deref(), Some("noted"));

        pool.close().await;
    }

    #[tokio::test]
    async fn leaving_approve_clears_final_flag_and_frees_the_seat() {
        let pool = setup_pool().await;
        let store = SqlEnrollmentStore::new(pool.clone());
        let (enrollment, steps) = sample("E-1", "U-1", 1);
        store.insert_enrollment(&enrollment, &steps).await.expect("insert");
        store
            .finalize_approval(&final_approval("E-1", EnrollmentType::Onsite, 1))
            .await
            .expect("finalize");

        let mismatch = store
            .change_status(&status_change("E-1", vec![EnrollmentStatus::Pending], EnrollmentStatus::Reject))
            .await
            .expect("mismatch");
        assert_eq!(mismatch, GuardOutcome::StatusMismatch(EnrollmentStatus::Approve));

        let excused = store
            .change_status(&status_change("E-1", vec![EnrollmentStatus::Approve], EnrollmentStatus::Excuse))
            .await
            .expect("excuse");
        assert_eq!(excused, GuardOutcome::Applied);

        let stored = store.find_enrollment(&enrollment.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, EnrollmentStatus::Excuse);
        assert!(!stored.final_approval);
        assert_eq!(stored.enrollment_type, Some(EnrollmentType::Onsite));
        assert_eq!(
            store
                .count_approved(&CourseId("C-1".to_owned()), EnrollmentType::Onsite)
                .await
                .expect("count"),
            0
        );

        pool.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_final_approvals_never_overbook_across_connections() {
        let dir = tempfile::tempdir().expect("temp dir");
        let pool = file_pool(&dir, 8).await;

        let store = Arc::new(SqlEnrollmentStore::new(pool.clone()));
        for index in 0..12 {
            let (enrollment, steps) = sample(&format!("E-{index}"), &format!("U-{index}"), 1);
            store.insert_enrollment(&enrollment, &steps).await.expect("insert");
        }

        let mut handles = Vec::new();
        for index in 0..12 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .finalize_approval(&final_approval(
                        &format!("E-{index}"),
                        EnrollmentType::Onsite,
                        3,
                    ))
                    .await
                    .expect("finalize")
            }));
        }

        let mut applied = 0;
        for handle in handles {
            match handle.await.expect("join") {
                GuardOutcome::Applied => applied += 1,
                GuardOutcome::CapacityExhausted { approved } => assert_eq!(approved, 3),
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(applied, 3);
        assert_eq!(
            store
                .count_approved(&CourseId("C-1".to_owned()), EnrollmentType::Onsite)
                .await
                .expect("count"),
            3
        );

        pool.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_enrollments_keep_a_single_row() {
        let dir = tempfile::tempdir().expect("temp dir");
        let pool = file_pool(&dir, 8).await;
        let store = Arc::new(SqlEnrollmentStore::new(pool.clone()));

        let mut handles = Vec::new();
        for index in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let (enrollment, steps) = sample(&format!("E-{index}"), "U-1", 2);
                let outcome = store.insert_enrollment(&enrollment, &steps).await.expect("insert");
                (enrollment.id, outcome)
            }));
        }

        let mut inserted = Vec::new();
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.expect("join") {
                (id, InsertOutcome::Inserted) => inserted.push(id),
                (id, InsertOutcome::Duplicate) => {
                    duplicates += 1;
                    assert!(store.list_steps(&id).await.expect("steps").is_empty());
                }
            }
        }

        assert_eq!(inserted.len(), 1);
        assert_eq!(duplicates, 7);
        let rows = store.list_for_course(&CourseId("C-1".to_owned())).await.expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, inserted[0]);
        assert_eq!(store.list_steps(&inserted[0]).await.expect("steps").len(), 2);

        pool.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_approvers_on_one_enrollment_never_skip_a_step() {
        let dir = tempfile::tempdir().expect("temp dir");
        let pool = file_pool(&dir, 8).await;
        let store = Arc::new(SqlEnrollmentStore::new(pool.clone()));
        for index in 0..10 {
            let (enrollment, steps) = sample(&format!("E-{index}"), &format!("U-{index}"), 3);
            store.insert_enrollment(&enrollment, &steps).await.expect("insert");
        }

        let mut handles = Vec::new();
        for index in 0..10 {
            // Spawn the later step first so it has a real chance to win the lock.
            for (step, actor) in [("S-2", "approver-b"), ("S-1", "approver-a")] {
                let store = Arc::clone(&store);
                handles.push(tokio::spawn(async move {
                    let outcome = store
                        .approve_step(&decision(&format!("E-{index}"), step, actor))
                        .await
                        .expect("approve");
                    (step, outcome)
                }));
            }
        }

        for handle in handles {
            match handle.await.expect("join") {
                ("S-1", outcome) => assert_eq!(outcome, GuardOutcome::Applied),
                (_, outcome) => assert!(
                    matches!(outcome, GuardOutcome::Applied | GuardOutcome::OutOfOrder),
                    "unexpected outcome {outcome:?}"
                ),
            }
        }

        for index in 0..10 {
            let chain = store
                .list_steps(&EnrollmentId(format!("E-{index}")))
                .await
                .expect("steps");
            assert_eq!(chain[0].state, StepState::Approved);
            assert_eq!(chain[2].state, StepState::Unapproved);
            if chain[1].state == StepState::Approved {
                assert_eq!(chain[1].approved_by, Some(UserId("approver-b".to_owned())));
            }
        }

        pool.close().await;
    }

    #[tokio::test]
    async fn abandoned_guarded_write_does_not_hold_the_write_lock() {
        let dir = tempfile::tempdir().expect("temp dir");
        let pool = file_pool(&dir, 1).await;
        let store = SqlEnrollmentStore::new(pool.clone());
        let (enrollment, steps) = sample("E-1", "U-1", 1);
        store.insert_enrollment(&enrollment, &steps).await.expect("insert");

        let abandoned = ImmediateWrite::begin(&pool).await.expect("begin immediate");
        drop(abandoned);

        let outcome = store
            .finalize_approval(&final_approval("E-1", EnrollmentType::Onsite, 1))
            .await
            .expect("finalize after abandoned write");
        assert_eq!(outcome, GuardOutcome::Applied);

        let stored = store.find_enrollment(&enrollment.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, EnrollmentStatus::Approve);

        pool.close().await;
    }

    async fn file_pool(dir: &tempfile::TempDir, max_connections: u32) -> DbPool {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("ledger.db").display());
        let pool = connect_with_settings(&url, max_connections, 30).await.expect("connect file pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        seed_course(&pool).await;
        pool
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        seed_course(&pool).await;
        pool
    }

    async fn seed_course(pool: &DbPool) {
        sqlx::query("INSERT INTO course_tab (id, name, excuse_time_hours) VALUES ('T-1', 'Compliance', 24)")
            .execute(pool)
            .await
            .expect("insert tab");
        sqlx::query(
            "INSERT INTO course (id, course_tab_id, organization_id, title, available_seats, available_online_seats)
             VALUES ('C-1', 'T-1', 'org-1', 'Compliance 101', 3, 1)",
        )
        .execute(pool)
        .await
        .expect("insert course");
    }

    fn sample(id: &str, user: &str, steps: i32) -> (Enrollment, Vec<ApprovalStepInstance>) {
        let enrollment = Enrollment::pending(
            EnrollmentId(id.to_owned()),
            CourseId("C-1".to_owned()),
            UserId(user.to_owned()),
            parse_ts("2026-03-02T09:00:00Z"),
        );
        let chain = (1..=steps)
            .map(|order| ApprovalStepInstance {
                id: StepInstanceId(format!("{id}-STP-{order}")),
                enrollment_id: enrollment.id.clone(),
                step_definition_id: StepDefinitionId(format!("S-{order}")),
                step_order: order,
                is_head_approval: order == 1,
                is_final_approval: order == steps,
                required_role_id: Some(format!("role-{order}")),
                state: StepState::Unapproved,
                approved_by: None,
                approved_at: None,
                comments: None,
            })
            .collect();
        (enrollment, chain)
    }

    fn decision(enrollment: &str, step: &str, actor: &str) -> StepDecision {
        StepDecision {
            enrollment_id: EnrollmentId(enrollment.to_owned()),
            step_definition_id: StepDefinitionId(step.to_owned()),
            decided_by: UserId(actor.to_owned()),
            decided_at: parse_ts("2026-03-03T10:00:00Z"),
            comments: Some("noted".to_owned()),
        }
    }

    fn final_approval(enrollment: &str, enrollment_type: EnrollmentType, capacity: u32) -> FinalApproval {
        FinalApproval {
            decision: decision(enrollment, "S-1", "director"),
            course_id: CourseId("C-1".to_owned()),
            enrollment_type,
            capacity,
        }
    }

    fn status_change(
        enrollment: &str,
        allowed_from: Vec<EnrollmentStatus>,
        to: EnrollmentStatus,
    ) -> StatusChange {
        StatusChange {
            enrollment_id: EnrollmentId(enrollment.to_owned()),
            allowed_from,
            to,
            changed_at: parse_ts("2026-03-04T08:00:00Z"),
        }
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
