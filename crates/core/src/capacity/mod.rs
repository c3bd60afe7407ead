//! Seat arbitration per course and modality.
//!
//! Seat consumption is never stored. It is the number of enrollments of the
//! course in `Approve` with the matching enrollment type, counted inside the
//! same serialized store write that claims the seat.

use serde::Serialize;

use crate::domain::course::{Course, CourseId, EnrollmentType};
use crate::domain::enrollment::EnrollmentId;
use crate::errors::EnrollmentError;
use crate::ledger::{EnrollmentLedger, FinalApproval, GuardOutcome, StepDecision};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SeatUsage {
    pub course_id: CourseId,
    pub onsite_used: u32,
    pub onsite_capacity: u32,
    pub online_used: u32,
    pub online_capacity: u32,
}

impl SeatUsage {
    pub fn remaining(&self, enrollment_type: EnrollmentType) -> u32 {
        match enrollment_type {
            EnrollmentType::Onsite => self.onsite_capacity.saturating_sub(self.onsite_used),
            EnrollmentType::Online => self.online_capacity.saturating_sub(self.online_used),
        }
    }
}

#[derive(Clone)]
pub struct CapacityAllocator {
    ledger: EnrollmentLedger,
}

impl CapacityAllocator {
    pub fn new(ledger: EnrollmentLedger) -> Self {
        Self { ledger }
    }

    pub fn capacity_for(&self, course: &Course, enrollment_type: EnrollmentType) -> u32 {
        course.capacity_for(enrollment_type)
    }

    /// Claims a seat while approving the final step.
    ///
    /// A full course yields `CapacityExceeded`; any other guard outcome is
    /// handed back for the caller to interpret.
    pub async fn reserve(
        &self,
        course: &Course,
        enrollment_type: EnrollmentType,
        decision: StepDecision,
    ) -> Result<GuardOutcome, EnrollmentError> {
        let capacity = self.capacity_for(course, enrollment_type);
        let approval = FinalApproval {
            decision,
            course_id: course.id.clone(),
            enrollment_type,
            capacity,
        };

        match self.ledger.finalize(&approval).await? {
            GuardOutcome::CapacityExhausted { approved } => {
                tracing::warn!(
                    event_name = "capacity.exhausted",
                    course_id = %course.id,
                    enrollment_id = %approval.decision.enrollment_id,
                    enrollment_type = %enrollment_type,
                    approved,
                    capacity,
                    "no seat left for final approval"
                );
                Err(EnrollmentError::CapacityExceeded {
                    course_id: course.id.clone(),
                    enrollment_type,
                    capacity,
                })
            }
            GuardOutcome::Applied => {
                tracing::info!(
                    event_name = "capacity.reserved",
                    course_id = %course.id,
                    enrollment_id = %approval.decision.enrollment_id,
                    enrollment_type = %enrollment_type,
                    capacity,
                    "seat reserved"
                );
                Ok(GuardOutcome::Applied)
            }
            other => Ok(other),
        }
    }

    /// The seat frees itself once the enrollment leaves `Approve`; this only
    /// records that it happened.
    pub fn release(
        &self,
        course_id: &CourseId,
        enrollment_type: EnrollmentType,
        enrollment_id: &EnrollmentId,
    ) {
        tracing::info!(
            event_name = "capacity.released",
            course_id = %course_id,
            enrollment_id = %enrollment_id,
            enrollment_type = %enrollment_type,
            "seat released"
        );
    }

    pub async fn seat_usage(&self, course: &Course) -> Result<SeatUsage, EnrollmentError> {
        let onsite_used = self.ledger.count_approved(&course.id, EnrollmentType::Onsite).await?;
        let online_used = self.ledger.count_approved(&course.id, EnrollmentType::Online).await?;
        Ok(SeatUsage {
            course_id: course.id.clone(),
            onsite_used,
            onsite_capacity: course.available_seats,
            online_used,
            online_capacity: course.available_online_seats,
        })
    }
}
