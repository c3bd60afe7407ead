//! Approval workflow: step ordering, rejection, excuse window and
//! administrative cancel.
//!
//! The engine pre-checks every rule against a fresh read so callers get the
//! most specific error, then performs a guarded store write that re-checks the
//! same preconditions atomically. A guard that trips on the write means a
//! concurrent request won the race; it maps to the same error the pre-check
//! would have produced.

pub mod gate;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::capacity::CapacityAllocator;
use crate::catalog::CourseCatalog;
use crate::clock::Clock;
use crate::domain::course::{Course, CourseId, CourseTab, EnrollmentType, StepDefinitionId};
use crate::domain::enrollment::{
    ApprovalStepInstance, Enrollment, EnrollmentId, EnrollmentStatus,
};
use crate::domain::user::UserId;
use crate::errors::EnrollmentError;
use crate::ledger::{EnrollmentLedger, GuardOutcome, StepDecision};

/// An approver's request to act on one step of one enrollment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepCommand {
    pub enrollment_id: EnrollmentId,
    pub step_definition_id: StepDefinitionId,
    pub actor: UserId,
    pub comments: Option<String>,
    /// Required when the step is the final approval; ignored otherwise.
    pub enrollment_type: Option<EnrollmentType>,
}

/// State after an applied step decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepTransition {
    pub enrollment: Enrollment,
    pub step: ApprovalStepInstance,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    pub enrollment: Enrollment,
    pub previous_status: EnrollmentStatus,
}

impl CancelOutcome {
    pub fn changed(&self) -> bool {
        self.previous_status != EnrollmentStatus::Reject
    }
}

/// `start - hours`, or `None` when the course carries no excuse policy.
pub fn excuse_deadline(
    start: Option<DateTime<Utc>>,
    excuse_time_hours: Option<u32>,
) -> Option<DateTime<Utc>> {
    Some(start? - Duration::hours(i64::from(excuse_time_hours?)))
}

#[derive(Clone)]
pub struct ApprovalWorkflowEngine {
    ledger: EnrollmentLedger,
    allocator: CapacityAllocator,
    catalog: Arc<dyn CourseCatalog>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl ApprovalWorkflowEngine {
    pub fn new(
        ledger: EnrollmentLedger,
        allocator: CapacityAllocator,
        catalog: Arc<dyn CourseCatalog>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { ledger, allocator, catalog, clock, audit }
    }

    pub async fn can_approve(
        &self,
        enrollment_id: &EnrollmentId,
        step_definition_id: &StepDefinitionId,
    ) -> Result<bool, EnrollmentError> {
        let chain = self.ledger.get_approval_chain(enrollment_id).await?;
        Ok(gate::can_approve(&chain, step_definition_id))
    }

    pub async fn approve_step(
        &self,
        command: &StepCommand,
        correlation_id: &str,
    ) -> Result<StepTransition, EnrollmentError> {
        let result = self.try_approve(command).await;
        let context = self.step_context(command, correlation_id, &result);
        match &result {
            Ok(transition) => {
                let event_type = if transition.step.is_final_approval {
                    "approval.final_approved"
                } else {
                    "approval.step_approved"
                };
                tracing::info!(
                    event_name = event_type,
                    correlation_id,
                    enrollment_id = %command.enrollment_id,
                    step_definition_id = %command.step_definition_id,
                    step_order = transition.step.step_order,
                    status = %transition.enrollment.status,
                    "approval step applied"
                );
                let mut event = context
                    .event(event_type, AuditCategory::Approval, AuditOutcome::Success)
                    .with_metadata("step_definition_id", command.step_definition_id.0.clone())
                    .with_metadata("step_order", transition.step.step_order.to_string())
                    .with_metadata("status", transition.enrollment.status.as_str());
                if let Some(enrollment_type) = transition.enrollment.enrollment_type {
                    event = event.with_metadata("enrollment_type", enrollment_type.as_str());
                }
                self.audit.emit(event);
            }
            Err(error) => self.audit_refusal(&context, "approval.step_refused", error),
        }
        result
    }

    async fn try_approve(&self, command: &StepCommand) -> Result<StepTransition, EnrollmentError> {
        let enrollment = self.ledger.get_enrollment(&command.enrollment_id).await?;
        let chain = self.ledger.get_approval_chain(&command.enrollment_id).await?;
        let step = find_step(&chain, command)?;

        if !gate::can_approve(&chain, &command.step_definition_id) {
            return Err(out_of_order(command));
        }
        if enrollment.status.is_terminal() {
            return Err(EnrollmentError::AlreadyFinalized {
                enrollment_id: enrollment.id,
                status: enrollment.status,
            });
        }

        let decision = StepDecision {
            enrollment_id: command.enrollment_id.clone(),
            step_definition_id: command.step_definition_id.clone(),
            decided_by: command.actor.clone(),
            decided_at: self.clock.now(),
            comments: command.comments.clone(),
        };

        let outcome = if step.is_final_approval {
            let enrollment_type = command.enrollment_type.ok_or_else(|| {
                EnrollmentError::MissingEnrollmentType { enrollment_id: enrollment.id.clone() }
            })?;
            let course = self.course(&enrollment.course_id).await?;
            self.allocator.reserve(&course, enrollment_type, decision).await?
        } else {
            self.ledger.mark_step_approved(&decision).await?
        };
        guard_result(outcome, command)?;

        self.transition(command).await
    }

    pub async fn reject_step(
        &self,
        command: &StepCommand,
        correlation_id: &str,
    ) -> Result<StepTransition, EnrollmentError> {
        let result = self.try_reject(command).await;
        let context = self.step_context(command, correlation_id, &result);
        match &result {
            Ok(transition) => {
                tracing::info!(
                    event_name = "approval.step_rejected",
                    correlation_id,
                    enrollment_id = %command.enrollment_id,
                    step_definition_id = %command.step_definition_id,
                    step_order = transition.step.step_order,
                    "enrollment rejected at step"
                );
                self.audit.emit(
                    context
                        .event("approval.step_rejected", AuditCategory::Approval, AuditOutcome::Success)
                        .with_metadata("step_definition_id", command.step_definition_id.0.clone())
                        .with_metadata("step_order", transition.step.step_order.to_string()),
                );
            }
            Err(error) => self.audit_refusal(&context, "approval.reject_refused", error),
        }
        result
    }

    async fn try_reject(&self, command: &StepCommand) -> Result<StepTransition, EnrollmentError> {
        let enrollment = self.ledger.get_enrollment(&command.enrollment_id).await?;
        let chain = self.ledger.get_approval_chain(&command.enrollment_id).await?;
        find_step(&chain, command)?;

        if enrollment.status.is_terminal() {
            return Err(EnrollmentError::AlreadyFinalized {
                enrollment_id: enrollment.id,
                status: enrollment.status,
            });
        }

        let decision = StepDecision {
            enrollment_id: command.enrollment_id.clone(),
            step_definition_id: command.step_definition_id.clone(),
            decided_by: command.actor.clone(),
            decided_at: self.clock.now(),
            comments: command.comments.clone(),
        };
        let outcome = self.ledger.mark_step_rejected(&decision).await?;
        guard_result(outcome, command)?;

        self.transition(command).await
    }

    /// Withdraws an approved enrollment before the course's excuse cutoff.
    pub async fn excuse(
        &self,
        enrollment_id: &EnrollmentId,
        requested_by: &UserId,
        correlation_id: &str,
    ) -> Result<Enrollment, EnrollmentError> {
        let result = self.try_excuse(enrollment_id).await;
        let context = AuditContext::new(
            Some(enrollment_id.clone()),
            result.as_ref().ok().map(|enrollment| enrollment.course_id.clone()),
            correlation_id,
            requested_by.0.clone(),
        );
        match &result {
            Ok(enrollment) => {
                tracing::info!(
                    event_name = "enrollment.excused",
                    correlation_id,
                    enrollment_id = %enrollment_id,
                    course_id = %enrollment.course_id,
                    "enrollment excused"
                );
                self.audit.emit(context.event(
                    "enrollment.excused",
                    AuditCategory::Enrollment,
                    AuditOutcome::Success,
                ));
            }
            Err(error) => self.audit_refusal(&context, "enrollment.excuse_refused", error),
        }
        result
    }

    async fn try_excuse(&self, enrollment_id: &EnrollmentId) -> Result<Enrollment, EnrollmentError> {
        let enrollment = self.ledger.get_enrollment(enrollment_id).await?;
        if let Some(error) = not_approved_error(&enrollment) {
            return Err(error);
        }

        let course = self.course(&enrollment.course_id).await?;
        let tab = self.tab(&course).await?;
        let deadline = excuse_deadline(course.start_date_time, tab.excuse_time_hours)
            .ok_or_else(|| EnrollmentError::MissingExcusePolicy { course_id: course.id.clone() })?;

        if self.clock.now() >= deadline {
            return Err(EnrollmentError::ExcuseWindowClosed {
                enrollment_id: enrollment.id,
                deadline,
            });
        }

        match self.ledger.set_excused(enrollment_id, self.clock.now()).await? {
            GuardOutcome::Applied => {}
            GuardOutcome::StatusMismatch(status) => {
                let raced = Enrollment { status, ..enrollment };
                return Err(not_approved_error(&raced).unwrap_or_else(|| {
                    EnrollmentError::Infrastructure("excuse guard disagreed with status".to_owned())
                }));
            }
            GuardOutcome::EnrollmentMissing => {
                return Err(EnrollmentError::EnrollmentNotFound(enrollment_id.clone()))
            }
            other => {
                return Err(EnrollmentError::Infrastructure(format!(
                    "unexpected excuse guard outcome {other:?}"
                )))
            }
        }

        if let Some(enrollment_type) = enrollment.reserved_seat() {
            self.allocator.release(&course.id, enrollment_type, enrollment_id);
        }
        self.ledger.get_enrollment(enrollment_id).await
    }

    /// Administrative override: moves any enrollment to `Reject`, releasing a
    /// held seat. Cancelling a rejected enrollment changes nothing.
    pub async fn cancel(
        &self,
        enrollment_id: &EnrollmentId,
        requested_by: &UserId,
        correlation_id: &str,
    ) -> Result<CancelOutcome, EnrollmentError> {
        let result = self.try_cancel(enrollment_id).await;
        let context = AuditContext::new(
            Some(enrollment_id.clone()),
            result.as_ref().ok().map(|outcome| outcome.enrollment.course_id.clone()),
            correlation_id,
            requested_by.0.clone(),
        );
        match &result {
            Ok(outcome) => {
                tracing::info!(
                    event_name = "enrollment.cancelled",
                    correlation_id,
                    enrollment_id = %enrollment_id,
                    previous_status = %outcome.previous_status,
                    changed = outcome.changed(),
                    "enrollment cancelled"
                );
                self.audit.emit(
                    context
                        .event("enrollment.cancelled", AuditCategory::Enrollment, AuditOutcome::Success)
                        .with_metadata("previous_status", outcome.previous_status.as_str())
                        .with_metadata("changed", outcome.changed().to_string()),
                );
            }
            Err(error) => self.audit_refusal(&context, "enrollment.cancel_refused", error),
        }
        result
    }

    async fn try_cancel(&self, enrollment_id: &EnrollmentId) -> Result<CancelOutcome, EnrollmentError> {
        let enrollment = self.ledger.get_enrollment(enrollment_id).await?;
        if enrollment.status == EnrollmentStatus::Reject {
            return Ok(CancelOutcome { previous_status: enrollment.status, enrollment });
        }

        match self.ledger.set_cancelled(enrollment_id, self.clock.now()).await? {
            GuardOutcome::Applied => {}
            GuardOutcome::StatusMismatch(EnrollmentStatus::Reject) => {
                let current = self.ledger.get_enrollment(enrollment_id).await?;
                return Ok(CancelOutcome { previous_status: current.status, enrollment: current });
            }
            GuardOutcome::EnrollmentMissing => {
                return Err(EnrollmentError::EnrollmentNotFound(enrollment_id.clone()))
            }
            other => {
                return Err(EnrollmentError::Infrastructure(format!(
                    "unexpected cancel guard outcome {other:?}"
                )))
            }
        }

        if let Some(enrollment_type) = enrollment.reserved_seat() {
            self.allocator.release(&enrollment.course_id, enrollment_type, enrollment_id);
        }
        Ok(CancelOutcome {
            previous_status: enrollment.status,
            enrollment: self.ledger.get_enrollment(enrollment_id).await?,
        })
    }

    async fn course(&self, id: &CourseId) -> Result<Course, EnrollmentError> {
        self.catalog
            .find_course(id)
            .await?
            .ok_or_else(|| EnrollmentError::CourseNotFound(id.clone()))
    }

    async fn tab(&self, course: &Course) -> Result<CourseTab, EnrollmentError> {
        self.catalog
            .find_tab(&course.course_tab_id)
            .await?
            .ok_or_else(|| EnrollmentError::CourseTabNotFound(course.course_tab_id.clone()))
    }

    async fn transition(&self, command: &StepCommand) -> Result<StepTransition, EnrollmentError> {
        let enrollment = self.ledger.get_enrollment(&command.enrollment_id).await?;
        let chain = self.ledger.get_approval_chain(&command.enrollment_id).await?;
        let step = find_step(&chain, command)?.clone();
        Ok(StepTransition { enrollment, step })
    }

    fn step_context(
        &self,
        command: &StepCommand,
        correlation_id: &str,
        result: &Result<StepTransition, EnrollmentError>,
    ) -> AuditContext {
        AuditContext::new(
            Some(command.enrollment_id.clone()),
            result.as_ref().ok().map(|transition| transition.enrollment.course_id.clone()),
            correlation_id,
            command.actor.0.clone(),
        )
    }

    fn audit_refusal(&self, context: &AuditContext, event_type: &str, error: &EnrollmentError) {
        let outcome =
            if error.is_business_rule() { AuditOutcome::Rejected } else { AuditOutcome::Failed };
        tracing::warn!(
            event_name = event_type,
            correlation_id = %context.correlation_id,
            enrollment_id = context.enrollment_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown"),
            error_kind = error.kind(),
            error = %error,
            "workflow transition refused"
        );
        self.audit.emit(
            context
                .event(event_type, AuditCategory::Approval, outcome)
                .with_metadata("error_kind", error.kind())
                .with_metadata("error", error.to_string()),
        );
    }
}

fn find_step<'a>(
    chain: &'a [ApprovalStepInstance],
    command: &StepCommand,
) -> Result<&'a ApprovalStepInstance, EnrollmentError> {
    chain
        .iter()
        .find(|step| step.step_definition_id == command.step_definition_id)
        .ok_or_else(|| EnrollmentError::StepNotFound {
            enrollment_id: command.enrollment_id.clone(),
            step_definition_id: command.step_definition_id.clone(),
        })
}

fn out_of_order(command: &StepCommand) -> EnrollmentError {
    EnrollmentError::StepOutOfOrder {
        enrollment_id: command.enrollment_id.clone(),
        step_definition_id: command.step_definition_id.clone(),
    }
}

/// The error for excusing an enrollment in the wrong status, if any.
fn not_approved_error(enrollment: &Enrollment) -> Option<EnrollmentError> {
    match enrollment.status {
        EnrollmentStatus::Approve => None,
        EnrollmentStatus::Pending => Some(EnrollmentError::NotApproved {
            enrollment_id: enrollment.id.clone(),
            status: enrollment.status,
        }),
        EnrollmentStatus::Reject | EnrollmentStatus::Excuse => {
            Some(EnrollmentError::AlreadyFinalized {
                enrollment_id: enrollment.id.clone(),
                status: enrollment.status,
            })
        }
    }
}

fn guard_result(outcome: GuardOutcome, command: &StepCommand) -> Result<(), EnrollmentError> {
    match outcome {
        GuardOutcome::Applied => Ok(()),
        GuardOutcome::EnrollmentMissing => {
            Err(EnrollmentError::EnrollmentNotFound(command.enrollment_id.clone()))
        }
        GuardOutcome::StepMissing => Err(EnrollmentError::StepNotFound {
            enrollment_id: command.enrollment_id.clone(),
            step_definition_id: command.step_definition_id.clone(),
        }),
        GuardOutcome::OutOfOrder => Err(out_of_order(command)),
        GuardOutcome::NotPending(status) | GuardOutcome::StatusMismatch(status) => {
            Err(EnrollmentError::AlreadyFinalized {
                enrollment_id: command.enrollment_id.clone(),
                status,
            })
        }
        GuardOutcome::CapacityExhausted { approved } => Err(EnrollmentError::Infrastructure(
            format!("capacity guard tripped outside final approval ({approved} approved)"),
        )),
    }
}
