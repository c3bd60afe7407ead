use chrono::{DateTime, Utc};
use thiserror::Error;

use academy_core::ledger::StoreError;

pub mod catalog;
pub mod enrollment;

pub use catalog::{SqlCourseCatalog, SqlUserDirectory};
pub use enrollment::SqlEnrollmentStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("guarded write used after its transaction finished")]
    TransactionClosed,
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        StoreError(value.to_string())
    }
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_i32(column: &str, value: i64) -> Result<i32, RepositoryError> {
    i32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("invalid value for `{column}` (expected i32): {value}"))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use academy_core::ledger::StoreError;

    use super::{parse_timestamp, parse_u32, RepositoryError};

    #[test]
    fn decode_failures_surface_as_store_errors() {
        let error = parse_timestamp("created_at", "yesterday".to_owned()).expect_err("bad ts");
        let store: StoreError = error.into();
        assert!(store.0.contains("created_at"));
        assert!(store.0.starts_with("decode error"));
    }

    #[test]
    fn negative_counts_are_rejected() {
        assert!(matches!(parse_u32("available_seats", -1), Err(RepositoryError::Decode(_))));
        assert_eq!(parse_u32("available_seats", 12).expect("valid"), 12);
    }
}
