use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::course::{DepartmentId, OrganizationId, SegmentId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Audience attributes resolved from the user directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub organization_id: Option<OrganizationId>,
    pub department_id: Option<DepartmentId>,
    pub department_role: Option<String>,
    #[serde(default)]
    pub segment_ids: Vec<SegmentId>,
}
