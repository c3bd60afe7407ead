//! Best-effort notification port.
//!
//! Dispatch happens after the state change is committed; a failed delivery is
//! logged by the caller and never rolls anything back.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::course::{CourseId, EnrollmentType};
use crate::domain::enrollment::EnrollmentId;
use crate::domain::user::UserId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification rejected by receiver with status {0}")]
    Rejected(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EnrollmentNotice {
    pub kind: NotificationKind,
    pub enrollment_id: EnrollmentId,
    pub course_id: CourseId,
    pub user_id: UserId,
    pub enrollment_type: Option<EnrollmentType>,
    pub correlation_id: String,
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify_approved(&self, notice: &EnrollmentNotice) -> Result<(), NotificationError>;
    async fn notify_rejected(&self, notice: &EnrollmentNotice) -> Result<(), NotificationError>;
}

/// Writes notices to the structured log instead of delivering them.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingNotificationDispatcher {
    async fn notify_approved(&self, notice: &EnrollmentNotice) -> Result<(), NotificationError> {
        tracing::info!(
            event_name = "notification.approved",
            correlation_id = %notice.correlation_id,
            enrollment_id = %notice.enrollment_id,
            course_id = %notice.course_id,
            user_id = %notice.user_id,
            "enrollment approved"
        );
        Ok(())
    }

    async fn notify_rejected(&self, notice: &EnrollmentNotice) -> Result<(), NotificationError> {
        tracing::info!(
            event_name = "notification.rejected",
            correlation_id = %notice.correlation_id,
            enrollment_id = %notice.enrollment_id,
            course_id = %notice.course_id,
            user_id = %notice.user_id,
            "enrollment rejected"
        );
        Ok(())
    }
}

/// Records every notice; optionally fails each delivery after recording it.
#[derive(Clone, Default)]
pub struct InMemoryNotificationDispatcher {
    sent: Arc<Mutex<Vec<EnrollmentNotice>>>,
    fail_with: Option<NotificationError>,
}

impl InMemoryNotificationDispatcher {
    pub fn failing(error: NotificationError) -> Self {
        Self { sent: Arc::default(), fail_with: Some(error) }
    }

    pub fn sent(&self) -> Vec<EnrollmentNotice> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, notice: &EnrollmentNotice) -> Result<(), NotificationError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notice.clone()),
            Err(poisoned) => poisoned.into_inner().push(notice.clone()),
        }
        match &self.fail_with {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for InMemoryNotificationDispatcher {
    async fn notify_approved(&self, notice: &EnrollmentNotice) -> Result<(), NotificationError> {
        self.record(notice)
    }

    async fn notify_rejected(&self, notice: &EnrollmentNotice) -> Result<(), NotificationError> {
        self.record(notice)
    }
}
