pub mod audit;
pub mod capacity;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod domain;
pub mod eligibility;
pub mod errors;
pub mod ledger;
pub mod notify;
pub mod service;
pub mod workflow;

pub use audit::{AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use capacity::{CapacityAllocator, SeatUsage};
pub use catalog::{CourseCatalog, InMemoryCourseCatalog, InMemoryUserDirectory, UserDirectory};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::course::{
    ApprovalStepDefinition, Course, CourseId, CourseTab, CourseTabId, EnrollmentType,
    StepDefinitionId, TargetConfig,
};
pub use domain::enrollment::{
    ApprovalStepInstance, Enrollment, EnrollmentId, EnrollmentStatus, StepState,
};
pub use domain::user::{UserId, UserProfile};
pub use eligibility::{EligibilityDecision, EligibilityResolver};
pub use errors::{ApplicationError, EnrollmentError, InterfaceError};
pub use ledger::{EnrollmentLedger, EnrollmentStore, InMemoryEnrollmentStore, StoreError};
pub use notify::{
    EnrollmentNotice, InMemoryNotificationDispatcher, LoggingNotificationDispatcher,
    NotificationDispatcher, NotificationError, NotificationKind,
};
pub use service::{
    ChainAudience, EnrollmentLifecycleService, PendingApproval, RequestContext, StepView,
};
pub use workflow::{ApprovalWorkflowEngine, CancelOutcome, StepCommand, StepTransition};
