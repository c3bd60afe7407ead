use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::course::{CourseId, CourseTabId, EnrollmentType, StepDefinitionId};
use crate::domain::enrollment::{EnrollmentId, EnrollmentStatus};
use crate::domain::user::UserId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EnrollmentError {
    #[error("user {user_id} is not eligible for course {course_id}")]
    NotEligible { course_id: CourseId, user_id: UserId },
    #[error("user {user_id} is already enrolled in course {course_id}")]
    DuplicateEnrollment { course_id: CourseId, user_id: UserId },
    #[error("step {step_definition_id} of enrollment {enrollment_id} has unapproved predecessors")]
    StepOutOfOrder { enrollment_id: EnrollmentId, step_definition_id: StepDefinitionId },
    #[error("enrollment {enrollment_id} is already finalized with status {status}")]
    AlreadyFinalized { enrollment_id: EnrollmentId, status: EnrollmentStatus },
    #[error("final approval of enrollment {enrollment_id} requires an enrollment type")]
    MissingEnrollmentType { enrollment_id: EnrollmentId },
    #[error("no {enrollment_type} seats left for course {course_id} (capacity {capacity})")]
    CapacityExceeded { course_id: CourseId, enrollment_type: EnrollmentType, capacity: u32 },
    #[error("excuse window for enrollment {enrollment_id} closed at {deadline}")]
    ExcuseWindowClosed { enrollment_id: EnrollmentId, deadline: DateTime<Utc> },
    #[error("course {course_id} has no excuse policy (start time or excuse hours missing)")]
    MissingExcusePolicy { course_id: CourseId },
    #[error("enrollment {enrollment_id} is {status}, only approved enrollments can be excused")]
    NotApproved { enrollment_id: EnrollmentId, status: EnrollmentStatus },
    #[error("enrollment {0} not found")]
    EnrollmentNotFound(EnrollmentId),
    #[error("step {step_definition_id} is not part of enrollment {enrollment_id}")]
    StepNotFound { enrollment_id: EnrollmentId, step_definition_id: StepDefinitionId },
    #[error("course {0} not found")]
    CourseNotFound(CourseId),
    #[error("course tab {0} not found")]
    CourseTabNotFound(CourseTabId),
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl EnrollmentError {
    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotEligible { .. } => "not_eligible",
            Self::DuplicateEnrollment { .. } => "duplicate_enrollment",
            Self::StepOutOfOrder { .. } => "step_out_of_order",
            Self::AlreadyFinalized { .. } => "already_finalized",
            Self::MissingEnrollmentType { .. } => "missing_enrollment_type",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::ExcuseWindowClosed { .. } => "excuse_window_closed",
            Self::MissingExcusePolicy { .. } => "missing_excuse_policy",
            Self::NotApproved { .. } => "not_approved",
            Self::EnrollmentNotFound(_) => "enrollment_not_found",
            Self::StepNotFound { .. } => "step_not_found",
            Self::CourseNotFound(_) => "course_not_found",
            Self::CourseTabNotFound(_) => "course_tab_not_found",
            Self::UserNotFound(_) => "user_not_found",
            Self::Infrastructure(_) => "infrastructure",
        }
    }

    pub fn is_business_rule(&self) -> bool {
        !matches!(self, Self::Infrastructure(_))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The enrollment is not in a state that allows this action."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Enrollment(error) => {
                let message = error.to_string();
                match error {
                    EnrollmentError::NotEligible { .. }
                    | EnrollmentError::MissingEnrollmentType { .. }
                    | EnrollmentError::MissingExcusePolicy { .. } => {
                        Self::BadRequest { message, correlation_id }
                    }
                    EnrollmentError::EnrollmentNotFound(_)
                    | EnrollmentError::StepNotFound { .. }
                    | EnrollmentError::CourseNotFound(_)
                    | EnrollmentError::CourseTabNotFound(_)
                    | EnrollmentError::UserNotFound(_) => Self::NotFound { message, correlation_id },
                    EnrollmentError::DuplicateEnrollment { .. }
                    | EnrollmentError::StepOutOfOrder { .. }
                    | EnrollmentError::AlreadyFinalized { .. }
                    | EnrollmentError::CapacityExceeded { .. }
                    | EnrollmentError::ExcuseWindowClosed { .. }
                    | EnrollmentError::NotApproved { .. } => Self::Conflict { message, correlation_id },
                    EnrollmentError::Infrastructure(_) => {
                        Self::ServiceUnavailable { message, correlation_id }
                    }
                }
            }
        }
    }
}
