use crate::commands::runtime::{build_runtime, load_config, open_database};
use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime("migrate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        match open_database("migrate", &config).await {
            Ok(pool) => {
                pool.close().await;
                tracing::info!(event_name = "migrate.completed", "migrations are up to date");
                CommandResult::success("migrate", "applied pending migrations")
            }
            Err(failure) => failure,
        }
    })
}
