use academy_core::domain::course::{CourseId, EnrollmentType, StepDefinitionId};
use academy_core::domain::enrollment::EnrollmentId;
use academy_core::domain::user::UserId;
use academy_core::RequestContext;

use crate::commands::runtime::execute;
use crate::commands::CommandResult;

fn context(user: &str, correlation_id: String) -> RequestContext {
    RequestContext::new(UserId(user.to_owned()), correlation_id)
}

pub fn enroll(user: &str, course: &str) -> CommandResult {
    let course_id = CourseId(course.to_owned());
    execute("enroll", |service, correlation_id| async move {
        let enrollment =
            service.create_enrollment(&context(user, correlation_id), &course_id).await?;
        let message = format!("enrollment {} created for {} in {}", enrollment.id, user, course_id);
        Ok((message, enrollment))
    })
}

pub fn approve(
    actor: &str,
    enrollment: &str,
    step: &str,
    comments: Option<String>,
    enrollment_type: Option<EnrollmentType>,
) -> CommandResult {
    let enrollment_id = EnrollmentId(enrollment.to_owned());
    let step_id = StepDefinitionId(step.to_owned());
    execute("approve", |service, correlation_id| async move {
        let transition = service
            .approve_step(
                &context(actor, correlation_id),
                &enrollment_id,
                &step_id,
                comments,
                enrollment_type,
            )
            .await?;
        let message = format!(
            "step {} approved; enrollment {} is {}",
            step_id, enrollment_id, transition.enrollment.status
        );
        Ok((message, transition))
    })
}

pub fn reject(actor: &str, enrollment: &str, step: &str, comments: Option<String>) -> CommandResult {
    let enrollment_id = EnrollmentId(enrollment.to_owned());
    let step_id = StepDefinitionId(step.to_owned());
    execute("reject", |service, correlation_id| async move {
        let transition = service
            .reject_step(&context(actor, correlation_id), &enrollment_id, &step_id, comments)
            .await?;
        let message = format!("step {} rejected; enrollment {} is rejected", step_id, enrollment_id);
        Ok((message, transition))
    })
}

pub fn excuse(user: &str, enrollment: &str) -> CommandResult {
    let enrollment_id = EnrollmentId(enrollment.to_owned());
    execute("excuse", |service, correlation_id| async move {
        let excused = service.excuse(&context(user, correlation_id), &enrollment_id).await?;
        let message = format!("enrollment {} excused and its seat released", excused.id);
        Ok((message, excused))
    })
}

pub fn cancel(actor: &str, enrollment: &str) -> CommandResult {
    let enrollment_id = EnrollmentId(enrollment.to_owned());
    execute("cancel", |service, correlation_id| async move {
        let outcome = service.cancel(&context(actor, correlation_id), &enrollment_id).await?;
        let message = if outcome.changed() {
            format!("enrollment {} cancelled (was {})", enrollment_id, outcome.previous_status)
        } else {
            format!("enrollment {} was already rejected", enrollment_id)
        };
        Ok((message, outcome))
    })
}
