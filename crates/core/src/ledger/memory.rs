use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::course::{CourseId, EnrollmentType};
use crate::domain::enrollment::{
    ApprovalStepInstance, Enrollment, EnrollmentId, EnrollmentStatus, StepState,
};
use crate::domain::user::UserId;
use crate::workflow::gate::{self, GateDecision};

use super::{
    EnrollmentStore, FinalApproval, GuardOutcome, InsertOutcome, StatusChange, StepDecision,
    StoreError,
};

#[derive(Default)]
struct LedgerState {
    enrollments: HashMap<EnrollmentId, Enrollment>,
    steps: HashMap<EnrollmentId, Vec<ApprovalStepInstance>>,
}

impl LedgerState {
    fn approved_count(&self, course_id: &CourseId, enrollment_type: EnrollmentType) -> u32 {
        let count = self
            .enrollments
            .values()
            .filter(|enrollment| {
                &enrollment.course_id == course_id
                    && enrollment.reserved_seat() == Some(enrollment_type)
            })
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Shared guard for step writes; everything except the capacity check.
    fn check_step(&self, decision: &StepDecision, ordered: bool) -> Option<GuardOutcome> {
        let Some(enrollment) = self.enrollments.get(&decision.enrollment_id) else {
            return Some(GuardOutcome::EnrollmentMissing);
        };
        let chain = self.steps.get(&decision.enrollment_id).map(Vec::as_slice).unwrap_or(&[]);

        match gate::evaluate(chain, &decision.step_definition_id) {
            GateDecision::UnknownStep => return Some(GuardOutcome::StepMissing),
            GateDecision::Blocked { .. } if ordered => return Some(GuardOutcome::OutOfOrder),
            _ => {}
        }

        if enrollment.status != EnrollmentStatus::Pending {
            return Some(GuardOutcome::NotPending(enrollment.status));
        }
        None
    }

    fn step_mut(&mut self, decision: &StepDecision) -> Option<&mut ApprovalStepInstance> {
        self.steps
            .get_mut(&decision.enrollment_id)?
            .iter_mut()
            .find(|step| step.step_definition_id == decision.step_definition_id)
    }

    fn record_decision(&mut self, decision: &StepDecision, state: StepState) {
        if let Some(step) = self.step_mut(decision) {
            if step.state == StepState::Approved && state == StepState::Approved {
                return;
            }
            step.state = state;
            step.approved_by = Some(decision.decided_by.clone());
            step.approved_at = Some(decision.decided_at);
            step.comments = decision.comments.clone();
        }
    }
}

/// Process-local store for tests and single-process tooling.
///
/// One write lock covers every mutation, which serializes capacity checks for
/// all courses at once.
#[derive(Default)]
pub struct InMemoryEnrollmentStore {
    state: RwLock<LedgerState>,
}

#[async_trait]
impl EnrollmentStore for InMemoryEnrollmentStore {
    async fn insert_enrollment(
        &self,
        enrollment: &Enrollment,
        steps: &[ApprovalStepInstance],
    ) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.write().await;
        let duplicate = state.enrollments.values().any(|existing| {
            existing.course_id == enrollment.course_id && existing.user_id == enrollment.user_id
        });
        if duplicate || state.enrollments.contains_key(&enrollment.id) {
            return Ok(InsertOutcome::Duplicate);
        }

        state.enrollments.insert(enrollment.id.clone(), enrollment.clone());
        state.steps.insert(enrollment.id.clone(), steps.to_vec());
        Ok(InsertOutcome::Inserted)
    }

    async fn find_enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, StoreError> {
        let state = self.state.read().await;
        Ok(state.enrollments.get(id).cloned())
    }

    async fn find_by_course_and_user(
        &self,
        course_id: &CourseId,
        user_id: &UserId,
    ) -> Result<Option<Enrollment>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .enrollments
            .values()
            .find(|enrollment| &enrollment.course_id == course_id && &enrollment.user_id == user_id)
            .cloned())
    }

    async fn list_for_course(&self, course_id: &CourseId) -> Result<Vec<Enrollment>, StoreError> {
        let state = self.state.read().await;
        let mut enrollments = state
            .enrollments
            .values()
            .filter(|enrollment| &enrollment.course_id == course_id)
            .cloned()
            .collect::<Vec<_>>();
        enrollments.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then(left.id.cmp(&right.id))
        });
        Ok(enrollments)
    }

    async fn list_steps(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<ApprovalStepInstance>, StoreError> {
        let state = self.state.read().await;
        let mut steps = state.steps.get(enrollment_id).cloned().unwrap_or_default();
        steps.sort_by_key(|step| step.step_order);
        Ok(steps)
    }

    async fn count_approved(
        &self,
        course_id: &CourseId,
        enrollment_type: EnrollmentType,
    ) -> Result<u32, StoreError> {
        let state = self.state.read().await;
        Ok(state.approved_count(course_id, enrollment_type))
    }

    async fn approve_step(&self, decision: &StepDecision) -> Result<GuardOutcome, StoreError> {
        let mut state = self.state.write().await;
        if let Some(blocked) = state.check_step(decision, true) {
            return Ok(blocked);
        }

        state.record_decision(decision, StepState::Approved);
        if let Some(enrollment) = state.enrollments.get_mut(&decision.enrollment_id) {
            enrollment.updated_at = decision.decided_at;
        }
        Ok(GuardOutcome::Applied)
    }

    async fn finalize_approval(
        &self,
        approval: &FinalApproval,
    ) -> Result<GuardOutcome, StoreError> {
        let mut state = self.state.write().await;
        if let Some(blocked) = state.check_step(&approval.decision, true) {
            return Ok(blocked);
        }

        let approved = state.approved_count(&approval.course_id, approval.enrollment_type);
        if approved >= approval.capacity {
            return Ok(GuardOutcome::CapacityExhausted { approved });
        }

        state.record_decision(&approval.decision, StepState::Approved);
        if let Some(enrollment) = state.enrollments.get_mut(&approval.decision.enrollment_id) {
            enrollment.status = EnrollmentStatus::Approve;
            enrollment.final_approval = true;
            enrollment.enrollment_type = Some(approval.enrollment_type);
            enrollment.updated_at = approval.decision.decided_at;
        }
        Ok(GuardOutcome::Applied)
    }

    async fn reject_step(&self, decision: &StepDecision) -> Result<GuardOutcome, StoreError> {
        let mut state = self.state.write().await;
        if let Some(blocked) = state.check_step(decision, false) {
            return Ok(blocked);
        }

        state.record_decision(decision, StepState::Rejected);
        if let Some(enrollment) = state.enrollments.get_mut(&decision.enrollment_id) {
            enrollment.status = EnrollmentStatus::Reject;
            enrollment.updated_at = decision.decided_at;
        }
        Ok(GuardOutcome::Applied)
    }

    async fn change_status(&self, change: &StatusChange) -> Result<GuardOutcome, StoreError> {
        let mut state = self.state.write().await;
        let Some(enrollment) = state.enrollments.get_mut(&change.enrollment_id) else {
            return Ok(GuardOutcome::EnrollmentMissing);
        };
        if !change.allowed_from.contains(&enrollment.status) {
            return Ok(GuardOutcome::StatusMismatch(enrollment.status));
        }

        enrollment.status = change.to;
        if change.to != EnrollmentStatus::Approve {
            enrollment.final_approval = false;
        }
        enrollment.updated_at = change.changed_at;
        Ok(GuardOutcome::Applied)
    }
}
