use serde::Serialize;

use academy_core::domain::course::{CourseId, EnrollmentType};
use academy_core::domain::enrollment::{Enrollment, EnrollmentId};
use academy_core::domain::user::UserId;
use academy_core::{ChainAudience, StepView};

use crate::commands::runtime::execute;
use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct ChainReport {
    enrollment: Enrollment,
    steps: Vec<StepView>,
}

#[derive(Debug, Serialize)]
struct VisibleCourse {
    course_id: CourseId,
    title: String,
    onsite_seats: u32,
    online_seats: u32,
}

/// With a course, explains the decision for that course. Without one, lists
/// every course the user may see.
pub fn eligibility(user: &str, course: Option<&str>) -> CommandResult {
    let user_id = UserId(user.to_owned());
    match course {
        Some(course) => {
            let course_id = CourseId(course.to_owned());
            execute("eligibility", |service, _| async move {
                let decision = service.explain_eligibility(&user_id, &course_id).await?;
                let verdict = if decision.eligible { "eligible" } else { "not eligible" };
                let message = format!("{user_id} is {verdict} for {course_id} ({})", decision.rule);
                Ok((message, decision))
            })
        }
        None => execute("eligibility", |service, _| async move {
            let courses = service
                .list_visible_courses(&user_id)
                .await?
                .into_iter()
                .map(|course| VisibleCourse {
                    course_id: course.id,
                    title: course.title,
                    onsite_seats: course.available_seats,
                    online_seats: course.available_online_seats,
                })
                .collect::<Vec<_>>();
            let message = format!("{} course(s) visible to {user_id}", courses.len());
            Ok((message, courses))
        }),
    }
}

pub fn chain(enrollment: &str, audience: ChainAudience) -> CommandResult {
    let enrollment_id = EnrollmentId(enrollment.to_owned());
    execute("chain", |service, _| async move {
        let enrollment = service.get_enrollment(&enrollment_id).await?;
        let steps = service.list_approval_chain(&enrollment_id, audience).await?;
        let message = format!(
            "enrollment {} is {} with {} visible step(s)",
            enrollment.id,
            enrollment.status,
            steps.len()
        );
        Ok((message, ChainReport { enrollment, steps }))
    })
}

pub fn seats(course: &str) -> CommandResult {
    let course_id = CourseId(course.to_owned());
    execute("seats", |service, _| async move {
        let usage = service.seat_usage(&course_id).await?;
        let message = format!(
            "{course_id}: {} onsite and {} online seat(s) remaining",
            usage.remaining(EnrollmentType::Onsite),
            usage.remaining(EnrollmentType::Online)
        );
        Ok((message, usage))
    })
}

pub fn inbox(course: &str, role: &str) -> CommandResult {
    let course_id = CourseId(course.to_owned());
    execute("inbox", |service, _| async move {
        let pending = service.pending_for_role(&course_id, role).await?;
        let message = format!("{} enrollment(s) in {course_id} await {role}", pending.len());
        Ok((message, pending))
    })
}
