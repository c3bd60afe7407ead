use std::sync::Arc;

use chrono::{DateTime, Utc};

use academy_core::domain::course::{CourseId, DepartmentId, EnrollmentType, OrganizationId, StepDefinitionId};
use academy_core::domain::enrollment::{EnrollmentId, EnrollmentStatus, StepState};
use academy_core::domain::user::{UserId, UserProfile};
use academy_core::{
    EnrollmentError, EnrollmentLifecycleService, FixedClock, InMemoryAuditSink,
    InMemoryNotificationDispatcher, RequestContext,
};
use academy_db::{
    connect_with_settings, migrations, DbPool, DemoSeedDataset, SqlCourseCatalog,
    SqlEnrollmentStore, SqlUserDirectory,
};

const LEAD_COURSE: &str = "C-LEAD-201";

struct Harness {
    pool: DbPool,
    service: EnrollmentLifecycleService,
    audit: InMemoryAuditSink,
}

async fn harness() -> Harness {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("run migrations");
    DemoSeedDataset::load(&pool).await.expect("load demo seed");

    let users = SqlUserDirectory::new(pool.clone());
    users
        .save(&UserProfile {
            id: UserId("U-ERIN".to_owned()),
            organization_id: Some(OrganizationId("org-acme".to_owned())),
            department_id: Some(DepartmentId("D-OPS".to_owned())),
            department_role: Some("Lead".to_owned()),
            segment_ids: Vec::new(),
        })
        .await
        .expect("save extra user");

    let audit = InMemoryAuditSink::default();
    let service = EnrollmentLifecycleService::new(
        Arc::new(SqlEnrollmentStore::new(pool.clone())),
        Arc::new(SqlCourseCatalog::new(pool.clone())),
        Arc::new(users),
        Arc::new(InMemoryNotificationDispatcher::default()),
        Arc::new(FixedClock(parse_ts("2026-10-19T12:00:00Z"))),
        Arc::new(audit.clone()),
    );
    Harness { pool, service, audit }
}

fn ctx(user: &str) -> RequestContext {
    RequestContext::new(UserId(user.to_owned()), format!("req-{user}"))
}

fn step(id: &str) -> StepDefinitionId {
    StepDefinitionId(id.to_owned())
}

async fn enroll_and_approve(
    harness: &Harness,
    user: &str,
    enrollment_type: EnrollmentType,
) -> Result<EnrollmentId, EnrollmentError> {
    let course = CourseId(LEAD_COURSE.to_owned());
    let enrollment = harness.service.create_enrollment(&ctx(user), &course).await?;
    for step_id in ["STEP-LEAD-1", "STEP-LEAD-2"] {
        harness
            .service
            .approve_step(&ctx("approver"), &enrollment.id, &step(step_id), None, None)
            .await?;
    }
    harness
        .service
        .approve_step(
            &ctx("director"),
            &enrollment.id,
            &step("STEP-LEAD-3"),
            Some("welcome aboard".to_owned()),
            Some(enrollment_type),
        )
        .await?;
    Ok(enrollment.id)
}

#[tokio::test]
async fn ineligible_user_cannot_enroll_through_sql_catalog() {
    let harness = harness().await;
    let error = harness
        .service
        .create_enrollment(&ctx("U-BOB"), &CourseId(LEAD_COURSE.to_owned()))
        .await
        .expect_err("Bob lacks the Head role in D-ENG");
    assert!(matches!(error, EnrollmentError::NotEligible { .. }));
    assert_eq!(harness.audit.events_of_type("enrollment.create_refused").len(), 1);
    harness.pool.close().await;
}

#[tokio::test]
async fn chain_is_ordered_and_final_step_claims_a_seat() {
    let harness = harness().await;
    let course = CourseId(LEAD_COURSE.to_owned());
    let enrollment =
        harness.service.create_enrollment(&ctx("U-ALICE"), &course).await.expect("enroll");

    let early = harness
        .service
        .approve_step(&ctx("approver"), &enrollment.id, &step("STEP-LEAD-2"), None, None)
        .await
        .expect_err("head approval comes first");
    assert!(matches!(early, EnrollmentError::StepOutOfOrder { .. }));

    for step_id in ["STEP-LEAD-1", "STEP-LEAD-2"] {
        harness
            .service
            .approve_step(&ctx("approver"), &enrollment.id, &step(step_id), None, None)
            .await
            .expect("approve intermediate step");
    }

    let missing_type = harness
        .service
        .approve_step(&ctx("director"), &enrollment.id, &step("STEP-LEAD-3"), None, None)
        .await
        .expect_err("final step needs a modality");
    assert!(matches!(missing_type, EnrollmentError::MissingEnrollmentType { .. }));

    let transition = harness
        .service
        .approve_step(
            &ctx("director"),
            &enrollment.id,
            &step("STEP-LEAD-3"),
            None,
            Some(EnrollmentType::Onsite),
        )
        .await
        .expect("final approval");
    assert_eq!(transition.enrollment.status, EnrollmentStatus::Approve);
    assert!(transition.enrollment.final_approval);
    assert_eq!(transition.step.state, StepState::Approved);

    let usage = harness.service.seat_usage(&course).await.expect("seat usage");
    assert_eq!(usage.onsite_used, 1);
    assert_eq!(usage.remaining(EnrollmentType::Onsite), 1);
    harness.pool.close().await;
}

#[tokio::test]
async fn full_modality_refuses_then_frees_after_cancel_and_excuse() {
    let harness = harness().await;
    let course = CourseId(LEAD_COURSE.to_owned());

    let alice = enroll_and_approve(&harness, "U-ALICE", EnrollmentType::Onsite)
        .await
        .expect("alice approved onsite");
    let cara = enroll_and_approve(&harness, "U-CARA", EnrollmentType::Online)
        .await
        .expect("cara takes the only online seat");

    let refused = enroll_and_approve(&harness, "U-ERIN", EnrollmentType::Online)
        .await
        .expect_err("online is full");
    assert!(matches!(
        refused,
        EnrollmentError::CapacityExceeded { enrollment_type: EnrollmentType::Online, capacity: 1, .. }
    ));

    let inbox = harness
        .service
        .pending_for_role(&course, "learning-director")
        .await
        .expect("director inbox");
    assert_eq!(inbox.len(), 1, "refused enrollment stays pending on its final step");
    let erin = inbox[0].enrollment.id.clone();
    assert_eq!(inbox[0].enrollment.user_id, UserId("U-ERIN".to_owned()));
    assert_eq!(inbox[0].step.step_definition_id, step("STEP-LEAD-3"));

    let cancelled = harness.service.cancel(&ctx("U-CARA"), &cara).await.expect("cancel");
    assert!(cancelled.changed());
    assert_eq!(cancelled.enrollment.status, EnrollmentStatus::Reject);

    let excused = harness.service.excuse(&ctx("U-ALICE"), &alice).await.expect("excuse in window");
    assert_eq!(excused.status, EnrollmentStatus::Excuse);
    assert!(!excused.final_approval);

    let usage = harness.service.seat_usage(&course).await.expect("seat usage");
    assert_eq!(usage.onsite_used, 0);
    assert_eq!(usage.online_used, 0);

    let retried = harness
        .service
        .approve_step(
            &ctx("director"),
            &erin,
            &step("STEP-LEAD-3"),
            None,
            Some(EnrollmentType::Online),
        )
        .await
        .expect("freed seat can be claimed");
    assert_eq!(retried.enrollment.status, EnrollmentStatus::Approve);
    harness.pool.close().await;
}

fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
}
