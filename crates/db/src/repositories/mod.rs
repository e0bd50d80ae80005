use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod booking;
pub mod catalog;
pub mod conversation;
pub mod customer;
pub mod order;
pub mod task_log;

pub use booking::SqlBookingRepository;
pub use catalog::SqlCatalogRepository;
pub use conversation::SqlConversationRepository;
pub use customer::SqlCustomerRepository;
pub use order::SqlOrderRepository;
pub use task_log::SqlTaskLogRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}` (`{value}`): {error}"))
        })
}

pub(crate) fn parse_date(
    column: &str,
    value: String,
) -> Result<chrono::NaiveDate, RepositoryError> {
    value.parse().map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `{column}` (`{value}`): {error}"))
    })
}

pub(crate) fn parse_json_list<T: serde::de::DeserializeOwned>(
    column: &str,
    value: String,
) -> Result<Vec<T>, RepositoryError> {
    serde_json::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid JSON in `{column}` (`{value}`): {error}"))
    })
}
