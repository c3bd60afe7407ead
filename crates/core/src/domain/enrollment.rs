use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::course::{CourseId, EnrollmentType, StepDefinitionId};
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnrollmentId(pub String);

impl fmt::Display for EnrollmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepInstanceId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Pending,
    Approve,
    Reject,
    Excuse,
}

impl EnrollmentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Excuse => "excuse",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "excuse" => Some(Self::Excuse),
            _ => None,
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub course_id: CourseId,
    pub user_id: UserId,
    pub status: EnrollmentStatus,
    pub final_approval: bool,
    pub enrollment_type: Option<EnrollmentType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn pending(
        id: EnrollmentId,
        course_id: CourseId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            course_id,
            user_id,
            status: EnrollmentStatus::Pending,
            final_approval: false,
            enrollment_type: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The seat this enrollment currently holds, if any.
    pub fn reserved_seat(&self) -> Option<EnrollmentType> {
        match self.status {
            EnrollmentStatus::Approve => self.enrollment_type,
            _ => None,
        }
    }
}

/// Per-step approval state. Approved and Rejected are sticky.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Unapproved,
    Approved,
    Rejected,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unapproved => "unapproved",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unapproved" => Some(Self::Unapproved),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Per-enrollment record of one step of the approval chain.
///
/// The definition's order and flags are copied in at creation so that later
/// template edits cannot reshape an in-flight chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStepInstance {
    pub id: StepInstanceId,
    pub enrollment_id: EnrollmentId,
    pub step_definition_id: StepDefinitionId,
    pub step_order: i32,
    pub is_head_approval: bool,
    pub is_final_approval: bool,
    pub required_role_id: Option<String>,
    pub state: StepState,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
}

impl ApprovalStepInstance {
    pub fn is_approved(&self) -> bool {
        self.state == StepState::Approved
    }

    pub fn is_rejected(&self) -> bool {
        self.state == StepState::Rejected
    }
}
