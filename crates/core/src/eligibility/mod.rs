//! Audience eligibility: decides whether a user may see or enroll in a course.
//!
//! Pure and total. Every `(user, course)` pair yields a decision; missing
//! profile attributes never raise, they only fail the attribute comparison.

use serde::Serialize;

use crate::domain::course::{Course, TargetConfig, ANY_DEPARTMENT_ROLE};
use crate::domain::user::UserProfile;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EligibilityDecision {
    pub eligible: bool,
    pub rule: &'static str,
    pub reason: String,
}

impl EligibilityDecision {
    fn allow(rule: &'static str, reason: impl Into<String>) -> Self {
        Self { eligible: true, rule, reason: reason.into() }
    }

    fn deny(rule: &'static str, reason: impl Into<String>) -> Self {
        Self { eligible: false, rule, reason: reason.into() }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EligibilityResolver;

impl EligibilityResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn is_eligible(&self, user: &UserProfile, course: &Course) -> bool {
        self.explain(user, course).eligible
    }

    pub fn explain(&self, user: &UserProfile, course: &Course) -> EligibilityDecision {
        let Some(target) = &course.target else {
            // Courses without a target configuration are visible to everyone.
            return EligibilityDecision::allow("unset", "course has no target audience");
        };
        let rule = target.kind();

        match target {
            TargetConfig::All => EligibilityDecision::allow(rule, "course targets all users"),
            TargetConfig::ForOurOrganization | TargetConfig::AllUsersOfOrganization => {
                if user.organization_id.as_ref() == Some(&course.organization_id) {
                    EligibilityDecision::allow(
                        rule,
                        format!("user belongs to organization {}", course.organization_id),
                    )
                } else {
                    EligibilityDecision::deny(
                        rule,
                        format!("user is outside organization {}", course.organization_id),
                    )
                }
            }
            TargetConfig::SpecificDepartments { department_ids, roles } => {
                let Some(department_id) = &user.department_id else {
                    return EligibilityDecision::deny(rule, "user has no department");
                };
                if !department_ids.contains(department_id) {
                    return EligibilityDecision::deny(
                        rule,
                        format!("department {department_id} is not targeted"),
                    );
                }

                match roles.get(department_id).and_then(|role| role.as_deref()) {
                    None => EligibilityDecision::allow(
                        rule,
                        format!("department {department_id} has no role restriction"),
                    ),
                    Some(ANY_DEPARTMENT_ROLE) => EligibilityDecision::allow(
                        rule,
                        format!("department {department_id} accepts any role"),
                    ),
                    Some(required) if user.department_role.as_deref() == Some(required) => {
                        EligibilityDecision::allow(
                            rule,
                            format!("user holds role `{required}` in department {department_id}"),
                        )
                    }
                    Some(required) => EligibilityDecision::deny(
                        rule,
                        format!("department {department_id} requires role `{required}`"),
                    ),
                }
            }
            TargetConfig::SpecificOrganizations { organization_ids } => {
                match &user.organization_id {
                    Some(organization_id) if organization_ids.contains(organization_id) => {
                        EligibilityDecision::allow(
                            rule,
                            format!("organization {organization_id} is targeted"),
                        )
                    }
                    _ => EligibilityDecision::deny(rule, "user organization is not targeted"),
                }
            }
            TargetConfig::SpecificSegments { segment_ids }
            | TargetConfig::SpecificOrganizationSegment { segment_ids } => {
                match user.segment_ids.iter().find(|segment| segment_ids.contains(segment)) {
                    Some(segment) => {
                        EligibilityDecision::allow(rule, format!("segment {segment} is targeted"))
                    }
                    None => EligibilityDecision::deny(rule, "no user segment is targeted"),
                }
            }
        }
    }
}
