//! Shared bootstrap for commands that talk to the enrollment service.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use academy_core::config::{AppConfig, LoadOptions};
use academy_core::{
    ApplicationError, EnrollmentError, EnrollmentLifecycleService, InterfaceError, SystemClock,
    TracingAuditSink,
};
use academy_db::{
    connect_with_settings, migrations, DbPool, SqlCourseCatalog, SqlEnrollmentStore,
    SqlUserDirectory,
};

use crate::commands::CommandResult;
use crate::notify::{dispatcher_from_config, TrackedDispatcher};

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

pub(crate) fn build_runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

pub(crate) async fn open_database(
    command: &str,
    config: &AppConfig,
) -> Result<DbPool, CommandResult> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| CommandResult::failure(command, "db_connectivity", error.to_string(), 4))?;

    if let Err(error) = migrations::run_pending(&pool).await {
        pool.close().await;
        return Err(CommandResult::failure(command, "migration", error.to_string(), 5));
    }
    Ok(pool)
}

/// Runs one service operation against the configured database.
///
/// `operation` receives the service and the request's correlation id and
/// returns a message plus the body to report. Notifications triggered by the
/// operation are drained before the pool closes.
pub fn execute<T, F, Fut>(command: &str, operation: F) -> CommandResult
where
    T: Serialize,
    F: FnOnce(EnrollmentLifecycleService, String) -> Fut,
    Fut: Future<Output = Result<(String, T), EnrollmentError>>,
{
    let config = match load_config(command) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match build_runtime(command) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let correlation_id = format!("req-{}", Uuid::new_v4());

    runtime.block_on(async {
        let pool = match open_database(command, &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };

        let dispatcher = match dispatcher_from_config(&config.notifications) {
            Ok(dispatcher) => TrackedDispatcher::new(dispatcher),
            Err(error) => {
                pool.close().await;
                return CommandResult::failure(command, "notifier_init", error.to_string(), 7);
            }
        };

        let service = EnrollmentLifecycleService::new(
            Arc::new(SqlEnrollmentStore::new(pool.clone())),
            Arc::new(SqlCourseCatalog::new(pool.clone())),
            Arc::new(SqlUserDirectory::new(pool.clone())),
            Arc::new(dispatcher.clone()),
            Arc::new(SystemClock),
            Arc::new(TracingAuditSink),
        );

        let outcome = operation(service, correlation_id.clone()).await;

        let limit = Duration::from_secs(config.notifications.timeout_secs);
        if !dispatcher.drain(limit).await {
            tracing::warn!(
                event_name = "notification.drain_timeout",
                correlation_id = %correlation_id,
                pending = dispatcher.in_flight(),
                "exiting with notifications still in flight"
            );
        }
        pool.close().await;

        match outcome {
            Ok((message, data)) => {
                CommandResult::success_with_data(command, message, &correlation_id, data)
            }
            Err(error) => rejection(command, &correlation_id, error),
        }
    })
}

/// Maps a service error onto the operator-facing error envelope.
pub fn rejection(command: &str, correlation_id: &str, error: EnrollmentError) -> CommandResult {
    let error_class = error.kind();
    let interface = ApplicationError::from(error).into_interface(correlation_id);
    let exit_code = exit_code_for(&interface);

    tracing::warn!(
        event_name = "command.rejected",
        command,
        correlation_id,
        error_class,
        error = %interface,
        "command was not applied"
    );
    CommandResult::rejected(command, error_class, interface.to_string(), correlation_id, exit_code)
}

pub fn exit_code_for(error: &InterfaceError) -> u8 {
    match error {
        InterfaceError::BadRequest { .. } => 10,
        InterfaceError::NotFound { .. } => 11,
        InterfaceError::Conflict { .. } => 12,
        InterfaceError::ServiceUnavailable { .. } => 13,
    }
}
