//! Read-only collaborators: the course catalog and the user directory.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::course::{Course, CourseId, CourseTab, CourseTabId};
use crate::domain::user::{UserId, UserProfile};
use crate::ledger::StoreError;

/// Course and approval-template lookup. Templates are treated as immutable
/// while enrollments against them are in flight.
#[async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn find_course(&self, id: &CourseId) -> Result<Option<Course>, StoreError>;
    async fn find_tab(&self, id: &CourseTabId) -> Result<Option<CourseTab>, StoreError>;
    async fn list_courses(&self) -> Result<Vec<Course>, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryCourseCatalog {
    courses: RwLock<HashMap<CourseId, Course>>,
    tabs: RwLock<HashMap<CourseTabId, CourseTab>>,
}

impl InMemoryCourseCatalog {
    pub async fn insert_tab(&self, tab: CourseTab) {
        self.tabs.write().await.insert(tab.id.clone(), tab);
    }

    pub async fn insert_course(&self, course: Course) {
        self.courses.write().await.insert(course.id.clone(), course);
    }
}

#[async_trait]
impl CourseCatalog for InMemoryCourseCatalog {
    async fn find_course(&self, id: &CourseId) -> Result<Option<Course>, StoreError> {
        Ok(self.courses.read().await.get(id).cloned())
    }

    async fn find_tab(&self, id: &CourseTabId) -> Result<Option<CourseTab>, StoreError> {
        Ok(self.tabs.read().await.get(id).cloned())
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        let mut courses = self.courses.read().await.values().cloned().collect::<Vec<_>>();
        courses.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(courses)
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub async fn insert(&self, user: UserProfile) {
        self.users.write().await.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.users.read().await.get(id).cloned())
    }
}
