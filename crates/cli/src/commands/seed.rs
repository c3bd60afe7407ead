use academy_db::{CourseSeedInfo, DemoSeedDataset};

use crate::commands::runtime::{build_runtime, load_config, open_database};
use crate::commands::CommandResult;

/// Loads the demo catalog. With `reset`, seeded rows and their enrollments
/// are removed first.
pub fn run(reset: bool) -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database("seed", &config).await.map_err(SeedFailure::Prepared)?;

        let run_result = load_and_verify(&pool, reset).await;
        pool.close().await;
        run_result
    });

    match result {
        Ok(courses) => CommandResult::success("seed", seed_summary(&courses)),
        Err(SeedFailure::Prepared(failure)) => failure,
        Err(SeedFailure::Step(error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

enum SeedFailure {
    Prepared(CommandResult),
    Step(&'static str, String, u8),
}

async fn load_and_verify(
    pool: &academy_db::DbPool,
    reset: bool,
) -> Result<Vec<CourseSeedInfo>, SeedFailure> {
    if reset {
        DemoSeedDataset::clean(pool)
            .await
            .map_err(|error| SeedFailure::Step("seed_reset", error.to_string(), 5))?;
    }

    let seed_result = DemoSeedDataset::load(pool)
        .await
        .map_err(|error| SeedFailure::Step("seed_execution", error.to_string(), 5))?;

    let verification = DemoSeedDataset::verify(pool)
        .await
        .map_err(|error| SeedFailure::Step("seed_verification", error.to_string(), 6))?;

    if !verification.all_present {
        let failed_checks = verification
            .checks
            .iter()
            .filter_map(|(check, passed)| (!passed).then_some(*check))
            .collect::<Vec<_>>();
        return Err(SeedFailure::Step("seed_verification", verification_message(&failed_checks), 6));
    }

    tracing::info!(
        event_name = "seed.loaded",
        courses = seed_result.courses_seeded.len(),
        users = seed_result.users_seeded,
        "demo catalog loaded"
    );
    Ok(seed_result.courses_seeded)
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

fn seed_summary(courses: &[CourseSeedInfo]) -> String {
    let lines = courses
        .iter()
        .map(|course| format!("  - {}: {} ({})", course.course_id, course.tab_id, course.description))
        .collect::<Vec<_>>();
    format!("Demo catalog loaded with {} courses:\n{}", courses.len(), lines.join("\n"))
}
