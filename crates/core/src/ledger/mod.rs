//! Enrollment ledger: owns enrollments and their approval step instances.
//!
//! All writes go through [`EnrollmentStore`], whose mutators are guarded:
//! each one re-checks its precondition inside the store's serialized write
//! section and reports a [`GuardOutcome`] instead of applying a stale change.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::course::{Course, CourseId, CourseTab, EnrollmentType, StepDefinitionId};
use crate::domain::enrollment::{
    ApprovalStepInstance, Enrollment, EnrollmentId, EnrollmentStatus, StepInstanceId, StepState,
};
use crate::domain::user::UserId;
use crate::errors::EnrollmentError;

pub use memory::InMemoryEnrollmentStore;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("enrollment store failure: {0}")]
pub struct StoreError(pub String);

impl From<StoreError> for EnrollmentError {
    fn from(value: StoreError) -> Self {
        Self::Infrastructure(value.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Result of a guarded store write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardOutcome {
    Applied,
    EnrollmentMissing,
    StepMissing,
    /// A lower-order step of the same enrollment is not approved.
    OutOfOrder,
    /// The enrollment already left `Pending`.
    NotPending(EnrollmentStatus),
    /// The enrollment is not in any of the statuses the change allows.
    StatusMismatch(EnrollmentStatus),
    CapacityExhausted { approved: u32 },
}

/// An approver's decision on one step of one enrollment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepDecision {
    pub enrollment_id: EnrollmentId,
    pub step_definition_id: StepDefinitionId,
    pub decided_by: UserId,
    pub decided_at: DateTime<Utc>,
    pub comments: Option<String>,
}

/// Approval of the final step, which also claims a seat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalApproval {
    pub decision: StepDecision,
    pub course_id: CourseId,
    pub enrollment_type: EnrollmentType,
    pub capacity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusChange {
    pub enrollment_id: EnrollmentId,
    pub allowed_from: Vec<EnrollmentStatus>,
    pub to: EnrollmentStatus,
    pub changed_at: DateTime<Utc>,
}

/// Persistence port for enrollments.
///
/// Guard order for step writes: enrollment exists, step exists, every
/// lower-order step approved, enrollment still pending, then (final step
/// only) approved seats for the modality below capacity. Moving an
/// enrollment out of `Approve` clears `final_approval`.
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Inserts the enrollment and all of its step instances atomically.
    async fn insert_enrollment(
        &self,
        enrollment: &Enrollment,
        steps: &[ApprovalStepInstance],
    ) -> Result<InsertOutcome, StoreError>;

    async fn find_enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, StoreError>;

    async fn find_by_course_and_user(
        &self,
        course_id: &CourseId,
        user_id: &UserId,
    ) -> Result<Option<Enrollment>, StoreError>;

    async fn list_for_course(&self, course_id: &CourseId) -> Result<Vec<Enrollment>, StoreError>;

    /// Step instances ordered by step order.
    async fn list_steps(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<ApprovalStepInstance>, StoreError>;

    async fn count_approved(
        &self,
        course_id: &CourseId,
        enrollment_type: EnrollmentType,
    ) -> Result<u32, StoreError>;

    /// Approves a non-final step. Re-approving keeps the first decision.
    async fn approve_step(&self, decision: &StepDecision) -> Result<GuardOutcome, StoreError>;

    /// Approves the final step and reserves a seat in one serialized write.
    async fn finalize_approval(&self, approval: &FinalApproval)
        -> Result<GuardOutcome, StoreError>;

    /// Rejects a step at any order and moves the enrollment to `Reject`.
    async fn reject_step(&self, decision: &StepDecision) -> Result<GuardOutcome, StoreError>;

    async fn change_status(&self, change: &StatusChange) -> Result<GuardOutcome, StoreError>;
}

#[derive(Clone)]
pub struct EnrollmentLedger {
    store: Arc<dyn EnrollmentStore>,
}

impl EnrollmentLedger {
    pub fn new(store: Arc<dyn EnrollmentStore>) -> Self {
        Self { store }
    }

    /// Creates a pending enrollment with one unapproved step per template step.
    pub async fn create_enrollment(
        &self,
        user_id: &UserId,
        course: &Course,
        tab: &CourseTab,
        now: DateTime<Utc>,
    ) -> Result<(Enrollment, Vec<ApprovalStepInstance>), EnrollmentError> {
        let duplicate = || EnrollmentError::DuplicateEnrollment {
            course_id: course.id.clone(),
            user_id: user_id.clone(),
        };

        if self.store.find_by_course_and_user(&course.id, user_id).await?.is_some() {
            return Err(duplicate());
        }

        let enrollment = Enrollment::pending(
            EnrollmentId(format!("ENR-{}", Uuid::new_v4())),
            course.id.clone(),
            user_id.clone(),
            now,
        );
        let steps = snapshot_chain(&enrollment.id, tab);

        match self.store.insert_enrollment(&enrollment, &steps).await? {
            InsertOutcome::Inserted => Ok((enrollment, steps)),
            InsertOutcome::Duplicate => Err(duplicate()),
        }
    }

    pub async fn get_enrollment(&self, id: &EnrollmentId) -> Result<Enrollment, EnrollmentError> {
        self.store
            .find_enrollment(id)
            .await?
            .ok_or_else(|| EnrollmentError::EnrollmentNotFound(id.clone()))
    }

    pub async fn get_approval_chain(
        &self,
        id: &EnrollmentId,
    ) -> Result<Vec<ApprovalStepInstance>, EnrollmentError> {
        self.get_enrollment(id).await?;
        let mut steps = self.store.list_steps(id).await?;
        steps.sort_by_key(|step| step.step_order);
        Ok(steps)
    }

    pub async fn list_for_course(
        &self,
        course_id: &CourseId,
    ) -> Result<Vec<Enrollment>, EnrollmentError> {
        Ok(self.store.list_for_course(course_id).await?)
    }

    pub(crate) async fn count_approved(
        &self,
        course_id: &CourseId,
        enrollment_type: EnrollmentType,
    ) -> Result<u32, EnrollmentError> {
        Ok(self.store.count_approved(course_id, enrollment_type).await?)
    }

    pub(crate) async fn mark_step_approved(
        &self,
        decision: &StepDecision,
    ) -> Result<GuardOutcome, EnrollmentError> {
        Ok(self.store.approve_step(decision).await?)
    }

    pub(crate) async fn mark_step_rejected(
        &self,
        decision: &StepDecision,
    ) -> Result<GuardOutcome, EnrollmentError> {
        Ok(self.store.reject_step(decision).await?)
    }

    pub(crate) async fn finalize(
        &self,
        approval: &FinalApproval,
    ) -> Result<GuardOutcome, EnrollmentError> {
        Ok(self.store.finalize_approval(approval).await?)
    }

    pub(crate) async fn set_excused(
        &self,
        id: &EnrollmentId,
        at: DateTime<Utc>,
    ) -> Result<GuardOutcome, EnrollmentError> {
        let change = StatusChange {
            enrollment_id: id.clone(),
            allowed_from: vec![EnrollmentStatus::Approve],
            to: EnrollmentStatus::Excuse,
            changed_at: at,
        };
        Ok(self.store.change_status(&change).await?)
    }

    pub(crate) async fn set_cancelled(
        &self,
        id: &EnrollmentId,
        at: DateTime<Utc>,
    ) -> Result<GuardOutcome, EnrollmentError> {
        let change = StatusChange {
            enrollment_id: id.clone(),
            allowed_from: vec![
                EnrollmentStatus::Pending,
                EnrollmentStatus::Approve,
                EnrollmentStatus::Excuse,
            ],
            to: EnrollmentStatus::Reject,
            changed_at: at,
        };
        Ok(self.store.change_status(&change).await?)
    }
}

fn snapshot_chain(enrollment_id: &EnrollmentId, tab: &CourseTab) -> Vec<ApprovalStepInstance> {
    tab.ordered_steps()
        .into_iter()
        .map(|definition| ApprovalStepInstance {
            id: StepInstanceId(format!("STP-{}", Uuid::new_v4())),
            enrollment_id: enrollment_id.clone(),
            step_definition_id: definition.id.clone(),
            step_order: definition.order,
            is_head_approval: definition.is_head_approval,
            is_final_approval: definition.is_final_approval,
            required_role_id: definition.required_role_id.clone(),
            state: StepState::Unapproved,
            approved_by: None,
            approved_at: None,
            comments: None,
        })
        .collect()
}
