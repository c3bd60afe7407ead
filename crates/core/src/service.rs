//! Enrollment lifecycle façade.
//!
//! Stateless over its injected collaborators. Every call re-reads what it
//! needs from the store, so any number of service instances may share one
//! database.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::capacity::{CapacityAllocator, SeatUsage};
use crate::catalog::{CourseCatalog, UserDirectory};
use crate::clock::Clock;
use crate::domain::course::{Course, CourseId, CourseTab, EnrollmentType, StepDefinitionId};
use crate::domain::enrollment::{
    ApprovalStepInstance, Enrollment, EnrollmentId, EnrollmentStatus, StepState,
};
use crate::domain::user::{UserId, UserProfile};
use crate::eligibility::{EligibilityDecision, EligibilityResolver};
use crate::errors::EnrollmentError;
use crate::ledger::{EnrollmentLedger, EnrollmentStore};
use crate::notify::{EnrollmentNotice, NotificationDispatcher, NotificationKind};
use crate::workflow::{gate, ApprovalWorkflowEngine, CancelOutcome, StepCommand, StepTransition};

/// Caller identity plus the id threaded through logs and audit events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: UserId,
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(user_id: UserId, correlation_id: impl Into<String>) -> Self {
        Self { user_id, correlation_id: correlation_id.into() }
    }

    /// Context with a fresh `req-<uuid>` correlation id.
    pub fn for_user(user_id: UserId) -> Self {
        Self::new(user_id, format!("req-{}", Uuid::new_v4()))
    }
}

/// Who is looking at a chain. Requesters never see head-approval steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainAudience {
    Approver,
    Requester,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepView {
    pub step_definition_id: StepDefinitionId,
    pub order: i32,
    pub state: StepState,
    pub is_head_approval: bool,
    pub is_final_approval: bool,
    pub required_role_id: Option<String>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
    /// The next step an approver may act on.
    pub actionable: bool,
}

impl StepView {
    fn project(step: &ApprovalStepInstance, next: Option<&StepDefinitionId>) -> Self {
        Self {
            step_definition_id: step.step_definition_id.clone(),
            order: step.step_order,
            state: step.state,
            is_head_approval: step.is_head_approval,
            is_final_approval: step.is_final_approval,
            required_role_id: step.required_role_id.clone(),
            approved_by: step.approved_by.clone(),
            approved_at: step.approved_at,
            comments: step.comments.clone(),
            actionable: next == Some(&step.step_definition_id),
        }
    }
}

/// One entry of an approver inbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PendingApproval {
    pub enrollment: Enrollment,
    pub step: StepView,
}

pub struct EnrollmentLifecycleService {
    catalog: Arc<dyn CourseCatalog>,
    users: Arc<dyn UserDirectory>,
    ledger: EnrollmentLedger,
    allocator: CapacityAllocator,
    engine: ApprovalWorkflowEngine,
    resolver: EligibilityResolver,
    notifier: Arc<dyn NotificationDispatcher>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl EnrollmentLifecycleService {
    pub fn new(
        store: Arc<dyn EnrollmentStore>,
        catalog: Arc<dyn CourseCatalog>,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let ledger = EnrollmentLedger::new(store);
        let allocator = CapacityAllocator::new(ledger.clone());
        let engine = ApprovalWorkflowEngine::new(
            ledger.clone(),
            allocator.clone(),
            catalog.clone(),
            clock.clone(),
            audit.clone(),
        );
        Self {
            catalog,
            users,
            ledger,
            allocator,
            engine,
            resolver: EligibilityResolver::new(),
            notifier,
            audit,
            clock,
        }
    }

    /// Enrolls the caller in a course. Capacity is not checked here; seats
    /// are only claimed at final approval.
    pub async fn create_enrollment(
        &self,
        ctx: &RequestContext,
        course_id: &CourseId,
    ) -> Result<Enrollment, EnrollmentError> {
        let audit = AuditContext::new(
            None,
            Some(course_id.clone()),
            ctx.correlation_id.clone(),
            ctx.user_id.0.clone(),
        );
        let result = self.try_create(ctx, course_id).await;

        match &result {
            Ok(enrollment) => {
                tracing::info!(
                    event_name = "enrollment.created",
                    correlation_id = %ctx.correlation_id,
                    enrollment_id = %enrollment.id,
                    course_id = %course_id,
                    user_id = %ctx.user_id,
                    "enrollment created"
                );
                let mut event =
                    audit.event("enrollment.created", AuditCategory::Enrollment, AuditOutcome::Success);
                event.enrollment_id = Some(enrollment.id.clone());
                self.audit.emit(event);
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "enrollment.create_refused",
                    correlation_id = %ctx.correlation_id,
                    course_id = %course_id,
                    user_id = %ctx.user_id,
                    error_kind = error.kind(),
                    error = %error,
                    "enrollment refused"
                );
                let category = match error {
                    EnrollmentError::NotEligible { .. } => AuditCategory::Eligibility,
                    _ => AuditCategory::Enrollment,
                };
                let outcome = if error.is_business_rule() {
                    AuditOutcome::Rejected
                } else {
                    AuditOutcome::Failed
                };
                self.audit.emit(
                    audit
                        .event("enrollment.create_refused", category, outcome)
                        .with_metadata("error_kind", error.kind()),
                );
            }
        }
        result
    }

    async fn try_create(
        &self,
        ctx: &RequestContext,
        course_id: &CourseId,
    ) -> Result<Enrollment, EnrollmentError> {
        let course = self.course(course_id).await?;
        let tab = self.tab(&course).await?;
        let user = self.user(&ctx.user_id).await?;

        let decision = self.resolver.explain(&user, &course);
        if !decision.eligible {
            tracing::debug!(
                correlation_id = %ctx.correlation_id,
                rule = decision.rule,
                reason = %decision.reason,
                "eligibility gate closed"
            );
            return Err(EnrollmentError::NotEligible {
                course_id: course.id,
                user_id: user.id,
            });
        }

        let (enrollment, _) =
            self.ledger.create_enrollment(&user.id, &course, &tab, self.clock.now()).await?;
        Ok(enrollment)
    }

    pub async fn approve_step(
        &self,
        ctx: &RequestContext,
        enrollment_id: &EnrollmentId,
        step_definition_id: &StepDefinitionId,
        comments: Option<String>,
        enrollment_type: Option<EnrollmentType>,
    ) -> Result<StepTransition, EnrollmentError> {
        let command = StepCommand {
            enrollment_id: enrollment_id.clone(),
            step_definition_id: step_definition_id.clone(),
            actor: ctx.user_id.clone(),
            comments,
            enrollment_type,
        };
        let transition = self.engine.approve_step(&command, &ctx.correlation_id).await?;
        if transition.enrollment.final_approval && transition.step.is_final_approval {
            self.dispatch(NotificationKind::Approved, &transition.enrollment, ctx);
        }
        Ok(transition)
    }

    pub async fn reject_step(
        &self,
        ctx: &RequestContext,
        enrollment_id: &EnrollmentId,
        step_definition_id: &StepDefinitionId,
        comments: Option<String>,
    ) -> Result<StepTransition, EnrollmentError> {
        let command = StepCommand {
            enrollment_id: enrollment_id.clone(),
            step_definition_id: step_definition_id.clone(),
            actor: ctx.user_id.clone(),
            comments,
            enrollment_type: None,
        };
        let transition = self.engine.reject_step(&command, &ctx.correlation_id).await?;
        self.dispatch(NotificationKind::Rejected, &transition.enrollment, ctx);
        Ok(transition)
    }

    pub async fn excuse(
        &self,
        ctx: &RequestContext,
        enrollment_id: &EnrollmentId,
    ) -> Result<Enrollment, EnrollmentError> {
        self.engine.excuse(enrollment_id, &ctx.user_id, &ctx.correlation_id).await
    }

    pub async fn cancel(
        &self,
        ctx: &RequestContext,
        enrollment_id: &EnrollmentId,
    ) -> Result<CancelOutcome, EnrollmentError> {
        let outcome = self.engine.cancel(enrollment_id, &ctx.user_id, &ctx.correlation_id).await?;
        if outcome.changed() {
            self.dispatch(NotificationKind::Rejected, &outcome.enrollment, ctx);
        }
        Ok(outcome)
    }

    pub async fn get_enrollment(&self, id: &EnrollmentId) -> Result<Enrollment, EnrollmentError> {
        self.ledger.get_enrollment(id).await
    }

    pub async fn get_approval_chain(
        &self,
        enrollment_id: &EnrollmentId,
    ) -> Result<Vec<ApprovalStepInstance>, EnrollmentError> {
        self.ledger.get_approval_chain(enrollment_id).await
    }

    /// Chain projection. `actionable` is computed over the full chain, so a
    /// hidden head step still blocks the visible steps after it.
    pub async fn list_approval_chain(
        &self,
        enrollment_id: &EnrollmentId,
        audience: ChainAudience,
    ) -> Result<Vec<StepView>, EnrollmentError> {
        let enrollment = self.ledger.get_enrollment(enrollment_id).await?;
        let chain = self.ledger.get_approval_chain(enrollment_id).await?;
        let next = actionable_step(&enrollment, &chain);

        Ok(chain
            .iter()
            .filter(|step| audience == ChainAudience::Approver || !step.is_head_approval)
            .map(|step| StepView::project(step, next.as_ref()))
            .collect())
    }

    pub async fn check_eligibility(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<bool, EnrollmentError> {
        Ok(self.explain_eligibility(user_id, course_id).await?.eligible)
    }

    pub async fn explain_eligibility(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<EligibilityDecision, EnrollmentError> {
        let course = self.course(course_id).await?;
        let user = self.user(user_id).await?;
        Ok(self.resolver.explain(&user, &course))
    }

    /// Catalog filtered through the eligibility resolver.
    pub async fn list_visible_courses(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Course>, EnrollmentError> {
        let user = self.user(user_id).await?;
        let courses = self.catalog.list_courses().await?;
        Ok(courses.into_iter().filter(|course| self.resolver.is_eligible(&user, course)).collect())
    }

    pub async fn seat_usage(&self, course_id: &CourseId) -> Result<SeatUsage, EnrollmentError> {
        let course = self.course(course_id).await?;
        self.allocator.seat_usage(&course).await
    }

    /// Pending enrollments of a course whose next actionable step needs `role_id`.
    pub async fn pending_for_role(
        &self,
        course_id: &CourseId,
        role_id: &str,
    ) -> Result<Vec<PendingApproval>, EnrollmentError> {
        self.course(course_id).await?;
        let mut inbox = Vec::new();
        for enrollment in self.ledger.list_for_course(course_id).await? {
            if enrollment.status != EnrollmentStatus::Pending {
                continue;
            }
            let chain = self.ledger.get_approval_chain(&enrollment.id).await?;
            let Some(step) = gate::next_actionable(&chain) else {
                continue;
            };
            if step.required_role_id.as_deref() != Some(role_id) {
                continue;
            }
            let view = StepView::project(step, Some(&step.step_definition_id));
            inbox.push(PendingApproval { enrollment, step: view });
        }
        Ok(inbox)
    }

    fn dispatch(&self, kind: NotificationKind, enrollment: &Enrollment, ctx: &RequestContext) {
        let notice = EnrollmentNotice {
            kind,
            enrollment_id: enrollment.id.clone(),
            course_id: enrollment.course_id.clone(),
            user_id: enrollment.user_id.clone(),
            enrollment_type: enrollment.enrollment_type,
            correlation_id: ctx.correlation_id.clone(),
        };
        let notifier = self.notifier.clone();
        let audit = self.audit.clone();

        tokio::spawn(async move {
            let delivered = match notice.kind {
                NotificationKind::Approved => notifier.notify_approved(&notice).await,
                NotificationKind::Rejected => notifier.notify_rejected(&notice).await,
            };
            if let Err(error) = delivered {
                tracing::warn!(
                    event_name = "notification.failed",
                    correlation_id = %notice.correlation_id,
                    enrollment_id = %notice.enrollment_id,
                    course_id = %notice.course_id,
                    error = %error,
                    "notification delivery failed"
                );
                let context = AuditContext::new(
                    Some(notice.enrollment_id.clone()),
                    Some(notice.course_id.clone()),
                    notice.correlation_id.clone(),
                    "notifier",
                );
                audit.emit(
                    context
                        .event("notification.failed", AuditCategory::Notification, AuditOutcome::Failed)
                        .with_metadata("error", error.to_string()),
                );
            }
        });
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

    async fn user(&self, id: &UserId) -> Result<UserProfile, EnrollmentError> {
        self.users.find_user(id).await?.ok_or_else(|| EnrollmentError::UserNotFound(id.clone()))
    }
}

fn actionable_step(
    enrollment: &Enrollment,
    chain: &[ApprovalStepInstance],
) -> Option<StepDefinitionId> {
    if enrollment.status != EnrollmentStatus::Pending {
        return None;
    }
    gate::next_actionable(chain).map(|step| step.step_definition_id.clone())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::{Duration, TimeZone, Utc};

    use super::{ChainAudience, EnrollmentLifecycleService, RequestContext};
    use crate::audit::InMemoryAuditSink;
    use crate::catalog::{InMemoryCourseCatalog, InMemoryUserDirectory};
    use crate::clock::FixedClock;
    use crate::domain::course::{
        ApprovalStepDefinition, Course, CourseId, CourseTab, CourseTabId, DepartmentId,
        EnrollmentType, OrganizationId, StepDefinitionId, TargetConfig,
    };
    use crate::domain::enrollment::{EnrollmentStatus, StepState};
    use crate::domain::user::{UserId, UserProfile};
    use crate::errors::EnrollmentError;
    use crate::ledger::InMemoryEnrollmentStore;
    use crate::notify::{
        InMemoryNotificationDispatcher, NotificationError, NotificationKind,
    };

    struct Fixture {
        service: EnrollmentLifecycleService,
        notifier: InMemoryNotificationDispatcher,
        audit: InMemoryAuditSink,
    }

    fn step(order: i32, role: &str) -> ApprovalStepDefinition {
        ApprovalStepDefinition {
            id: StepDefinitionId(format!("S-{order}")),
            course_tab_id: CourseTabId("T-1".to_owned()),
            order,
            is_head_approval: order == 1,
            is_final_approval: order == 3,
            required_role_id: Some(role.to_owned()),
        }
    }

    fn profile(id: &str, department: &str, role: &str) -> UserProfile {
        UserProfile {
            id: UserId(id.to_owned()),
            organization_id: Some(OrganizationId("org-1".to_owned())),
            department_id: Some(DepartmentId(department.to_owned())),
            department_role: Some(role.to_owned()),
            segment_ids: Vec::new(),
        }
    }

    async fn fixture(notifier: InMemoryNotificationDispatcher) -> Fixture {
        let start = Utc.with_ymd_and_hms(2026, 12, 1, 9, 0, 0).single().expect("date");
        let catalog = Arc::new(InMemoryCourseCatalog::default());
        catalog
            .insert_tab(CourseTab {
                id: CourseTabId("T-1".to_owned()),
                name: "Management track".to_owned(),
                excuse_time_hours: Some(24),
                steps: vec![step(1, "dept-head"), step(2, "hr"), step(3, "director")],
            })
            .await;

        let mut roles = BTreeMap::new();
        roles.insert(DepartmentId("5".to_owned()), Some("Head".to_owned()));
        catalog
            .insert_course(Course {
                id: CourseId("C-HEADS".to_owned()),
                course_tab_id: CourseTabId("T-1".to_owned()),
                organization_id: OrganizationId("org-1".to_owned()),
                title: "Heads Only".to_owned(),
                available_seats: 1,
                available_online_seats: 1,
                start_date_time: Some(start),
                end_date_time: None,
                target: Some(TargetConfig::SpecificDepartments {
                    department_ids: vec![DepartmentId("5".to_owned())],
                    roles,
                }),
            })
            .await;
        catalog
            .insert_course(Course {
                id: CourseId("C-OPEN".to_owned()),
                course_tab_id: CourseTabId("T-1".to_owned()),
                organization_id: OrganizationId("org-1".to_owned()),
                title: "Open Course".to_owned(),
                available_seats: 1,
                available_online_seats: 0,
                start_date_time: Some(start),
                end_date_time: None,
                target: Some(TargetConfig::ForOurOrganization),
            })
            .await;

        let users = Arc::new(InMemoryUserDirectory::default());
        users.insert(profile("U-MEMBER", "5", "Member")).await;
        users.insert(profile("U-HEAD", "5", "Head")).await;
        users.insert(profile("U-OTHER", "5", "Member")).await;

        let audit = InMemoryAuditSink::default();
        let service = EnrollmentLifecycleService::new(
            Arc::new(InMemoryEnrollmentStore::default()),
            catalog,
            users,
            Arc::new(notifier.clone()),
            Arc::new(FixedClock(start - Duration::days(3))),
            Arc::new(audit.clone()),
        );
        Fixture { service, notifier, audit }
    }

    fn ctx(user: &str) -> RequestContext {
        RequestContext::new(UserId(user.to_owned()), format!("req-{user}"))
    }

    fn sid(order: i32) -> StepDefinitionId {
        StepDefinitionId(format!("S-{order}"))
    }

    async fn wait_for_notices(notifier: &InMemoryNotificationDispatcher, count: usize) {
        for _ in 0..50 {
            if notifier.sent().len() >= count {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn role_restricted_course_refuses_members() {
        let fixture = fixture(InMemoryNotificationDispatcher::default()).await;
        let course = CourseId("C-HEADS".to_owned());

        let refused = fixture.service.create_enrollment(&ctx("U-MEMBER"), &course).await;
        assert!(matches!(refused, Err(EnrollmentError::NotEligible { .. })));
        assert!(!fixture
            .service
            .check_eligibility(&UserId("U-MEMBER".to_owned()), &course)
            .await
            .expect("check"));
        assert_eq!(fixture.audit.events_of_type("enrollment.create_refused").len(), 1);

        let created =
            fixture.service.create_enrollment(&ctx("U-HEAD"), &course).await.expect("head enrolls");
        assert_eq!(created.status, EnrollmentStatus::Pending);
        assert!(fixture
            .service
            .check_eligibility(&UserId("U-HEAD".to_owned()), &course)
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn creation_reports_unknown_course_user_and_duplicates() {
        let fixture = fixture(InMemoryNotificationDispatcher::default()).await;
        let open = CourseId("C-OPEN".to_owned());

        let missing_course =
            fixture.service.create_enrollment(&ctx("U-MEMBER"), &CourseId("C-404".into())).await;
        assert!(matches!(missing_course, Err(EnrollmentError::CourseNotFound(_))));

        let missing_user = fixture.service.create_enrollment(&ctx("U-GHOST"), &open).await;
        assert!(matches!(missing_user, Err(EnrollmentError::UserNotFound(_))));

        fixture.service.create_enrollment(&ctx("U-MEMBER"), &open).await.expect("first");
        let duplicate = fixture.service.create_enrollment(&ctx("U-MEMBER"), &open).await;
        assert!(matches!(duplicate, Err(EnrollmentError::DuplicateEnrollment { .. })));
    }

    #[tokio::test]
    async fn full_chain_notifies_on_final_approval() {
        let fixture = fixture(InMemoryNotificationDispatcher::default()).await;
        let open = CourseId("C-OPEN".to_owned());
        let enrollment =
            fixture.service.create_enrollment(&ctx("U-MEMBER"), &open).await.expect("enroll");

        for order in 1..=2 {
            fixture
                .service
                .approve_step(&ctx("approver"), &enrollment.id, &sid(order), None, None)
                .await
                .expect("approve");
        }
        assert!(fixture.notifier.sent().is_empty(), "intermediate steps do not notify");

        let done = fixture
            .service
            .approve_step(
                &ctx("director"),
                &enrollment.id,
                &sid(3),
                Some("welcome".to_owned()),
                Some(EnrollmentType::Onsite),
            )
            .await
            .expect("final");
        assert_eq!(done.enrollment.status, EnrollmentStatus::Approve);

        wait_for_notices(&fixture.notifier, 1).await;
        let sent = fixture.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Approved);
        assert_eq!(sent[0].correlation_id, "req-director");

        let usage = fixture.service.seat_usage(&open).await.expect("usage");
        assert_eq!(usage.onsite_used, 1);
        assert_eq!(usage.onsite_capacity, 1);
    }

    #[tokio::test]
    async fn notification_failure_never_reaches_the_caller() {
        let notifier =
            InMemoryNotificationDispatcher::failing(NotificationError::Transport("down".into()));
        let fixture = fixture(notifier).await;
        let enrollment = fixture
            .service
            .create_enrollment(&ctx("U-MEMBER"), &CourseId("C-OPEN".to_owned()))
            .await
            .expect("enroll");

        let rejected = fixture
            .service
            .reject_step(&ctx("hr"), &enrollment.id, &sid(2), Some("no budget".to_owned()))
            .await
            .expect("reject succeeds even though delivery fails");
        assert_eq!(rejected.enrollment.status, EnrollmentStatus::Reject);

        wait_for_notices(&fixture.notifier, 1).await;
        assert_eq!(fixture.notifier.sent()[0].kind, NotificationKind::Rejected);
        for _ in 0..50 {
            if !fixture.audit.events_of_type("notification.failed").is_empty() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        assert_eq!(fixture.audit.events_of_type("notification.failed").len(), 1);
    }

    #[tokio::test]
    async fn requester_view_hides_head_steps_but_gate_still_applies() {
        let fixture = fixture(InMemoryNotificationDispatcher::default()).await;
        let enrollment = fixture
            .service
            .create_enrollment(&ctx("U-MEMBER"), &CourseId("C-OPEN".to_owned()))
            .await
            .expect("enroll");

        let approver_view = fixture
            .service
            .list_approval_chain(&enrollment.id, ChainAudience::Approver)
            .await
            .expect("chain");
        assert_eq!(approver_view.len(), 3);
        assert!(approver_view[0].actionable);

        let requester_view = fixture
            .service
            .list_approval_chain(&enrollment.id, ChainAudience::Requester)
            .await
            .expect("chain");
        assert_eq!(requester_view.iter().map(|step| step.order).collect::<Vec<_>>(), vec![2, 3]);
        assert!(requester_view.iter().all(|step| !step.actionable));
        assert!(requester_view.iter().all(|step| step.state == StepState::Unapproved));

        let blocked = fixture
            .service
            .approve_step(&ctx("hr"), &enrollment.id, &sid(2), None, None)
            .await;
        assert!(matches!(blocked, Err(EnrollmentError::StepOutOfOrder { .. })));
    }

    #[tokio::test]
    async fn inbox_lists_enrollments_waiting_on_a_role() {
        let fixture = fixture(InMemoryNotificationDispatcher::default()).await;
        let open = CourseId("C-OPEN".to_owned());
        let first = fixture.service.create_enrollment(&ctx("U-MEMBER"), &open).await.expect("1");
        let second = fixture.service.create_enrollment(&ctx("U-OTHER"), &open).await.expect("2");

        fixture
            .service
            .approve_step(&ctx("head"), &first.id, &sid(1), None, None)
            .await
            .expect("approve");

        let hr = fixture.service.pending_for_role(&open, "hr").await.expect("inbox");
        assert_eq!(hr.len(), 1);
        assert_eq!(hr[0].enrollment.id, first.id);
        assert_eq!(hr[0].step.order, 2);

        let heads = fixture.service.pending_for_role(&open, "dept-head").await.expect("inbox");
        assert_eq!(heads.iter().map(|item| item.enrollment.id.clone()).collect::<Vec<_>>(), vec![
            second.id.clone()
        ]);

        fixture.service.cancel(&ctx("admin"), &second.id).await.expect("cancel");
        assert!(fixture.service.pending_for_role(&open, "dept-head").await.expect("inbox").is_empty());
    }

    #[tokio::test]
    async fn visible_courses_follow_eligibility() {
        let fixture = fixture(InMemoryNotificationDispatcher::default()).await;

        let member = fixture
            .service
            .list_visible_courses(&UserId("U-MEMBER".to_owned()))
            .await
            .expect("courses");
        assert_eq!(member.iter().map(|course| course.id.0.as_str()).collect::<Vec<_>>(), vec![
            "C-OPEN"
        ]);

        let head = fixture
            .service
            .list_visible_courses(&UserId("U-HEAD".to_owned()))
            .await
            .expect("courses");
        assert_eq!(head.len(), 2);
    }

    #[tokio::test]
    async fn excuse_and_cancel_through_the_facade() {
        let fixture = fixture(InMemoryNotificationDispatcher::default()).await;
        let open = CourseId("C-OPEN".to_owned());
        let enrollment =
            fixture.service.create_enrollment(&ctx("U-MEMBER"), &open).await.expect("enroll");
        for order in 1..=3 {
            let enrollment_type = (order == 3).then_some(EnrollmentType::Onsite);
            fixture
                .service
                .approve_step(&ctx("approver"), &enrollment.id, &sid(order), None, enrollment_type)
                .await
                .expect("approve");
        }

        let excused = fixture.service.excuse(&ctx("U-MEMBER"), &enrollment.id).await.expect("excuse");
        assert_eq!(excused.status, EnrollmentStatus::Excuse);
        assert_eq!(fixture.service.seat_usage(&open).await.expect("usage").onsite_used, 0);

        let cancelled = fixture.service.cancel(&ctx("admin"), &enrollment.id).await.expect("cancel");
        assert_eq!(cancelled.enrollment.status, EnrollmentStatus::Reject);
        assert_eq!(cancelled.previous_status, EnrollmentStatus::Excuse);
    }
}
