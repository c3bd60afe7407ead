use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CourseId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CourseTabId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepDefinitionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrganizationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DepartmentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(pub String);

macro_rules! display_as_inner {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )+
    };
}

display_as_inner!(CourseId, CourseTabId, StepDefinitionId, OrganizationId, DepartmentId, SegmentId);

/// Seat modality fixed on an enrollment when its final step is approved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentType {
    Onsite,
    Online,
}

impl EnrollmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onsite => "onsite",
            Self::Online => "online",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "onsite" => Some(Self::Onsite),
            "online" => Some(Self::Online),
            _ => None,
        }
    }
}

impl fmt::Display for EnrollmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ordered link in a course tab's sign-off chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStepDefinition {
    pub id: StepDefinitionId,
    pub course_tab_id: CourseTabId,
    pub order: i32,
    pub is_head_approval: bool,
    pub is_final_approval: bool,
    pub required_role_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseTab {
    pub id: CourseTabId,
    pub name: String,
    pub excuse_time_hours: Option<u32>,
    pub steps: Vec<ApprovalStepDefinition>,
}

impl CourseTab {
    /// Step definitions sorted ascending by `order`.
    pub fn ordered_steps(&self) -> Vec<&ApprovalStepDefinition> {
        let mut steps = self.steps.iter().collect::<Vec<_>>();
        steps.sort_by(|left, right| left.order.cmp(&right.order).then(left.id.cmp(&right.id)));
        steps
    }
}

/// Department role value meaning "no role restriction for this department".
pub const ANY_DEPARTMENT_ROLE: &str = "Both";

/// Target-audience configuration of a course.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetConfig {
    ForOurOrganization,
    All,
    SpecificDepartments {
        department_ids: Vec<DepartmentId>,
        #[serde(default)]
        roles: BTreeMap<DepartmentId, Option<String>>,
    },
    SpecificOrganizations {
        organization_ids: Vec<OrganizationId>,
    },
    SpecificSegments {
        segment_ids: Vec<SegmentId>,
    },
    AllUsersOfOrganization,
    SpecificOrganizationSegment {
        segment_ids: Vec<SegmentId>,
    },
}

impl TargetConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ForOurOrganization => "for_our_organization",
            Self::All => "all",
            Self::SpecificDepartments { .. } => "specific_departments",
            Self::SpecificOrganizations { .. } => "specific_organizations",
            Self::SpecificSegments { .. } => "specific_segments",
            Self::AllUsersOfOrganization => "all_users_of_organization",
            Self::SpecificOrganizationSegment { .. } => "specific_organization_segment",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub course_tab_id: CourseTabId,
    pub organization_id: OrganizationId,
    pub title: String,
    pub available_seats: u32,
    pub available_online_seats: u32,
    pub start_date_time: Option<DateTime<Utc>>,
    pub end_date_time: Option<DateTime<Utc>>,
    pub target: Option<TargetConfig>,
}

impl Course {
    pub fn capacity_for(&self, enrollment_type: EnrollmentType) -> u32 {
        match enrollment_type {
            EnrollmentType::Onsite => self.available_seats,
            EnrollmentType::Online => self.available_online_seats,
        }
    }
}
