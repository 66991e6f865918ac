//! crates/declarant_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;

use crate::domain::{
    ClassificationItem, ClassificationResult, NewClassificationRecord, OverallStatistics,
    PersistedResult, Session, SessionUpdate, UserStatus, UserStatusCounts,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Determines the tariff code for a single item.
///
/// One attempt per call. Timeouts, malformed responses and transport errors
/// all surface as `PortError`; retries, if ever wanted, belong to the caller.
#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn classify(&self, item: &ClassificationItem) -> PortResult<ClassificationResult>;
}

/// Receives chunk-granular progress during a batch run.
///
/// An `Err` from `on_progress` is logged by the orchestrator and otherwise
/// ignored; progress reporting can never fail a batch.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, processed: usize, total: usize) -> PortResult<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    // --- Session Management ---

    /// Creates a session in `processing` state and returns its identifier.
    async fn create_session(&self, filename: &str, total_items: u32) -> PortResult<i64>;

    /// Applies a partial update; fields left `None` keep their stored value.
    async fn update_session(&self, session_id: i64, update: SessionUpdate) -> PortResult<()>;

    async fn get_session(&self, session_id: i64) -> PortResult<Session>;

    /// Most recent sessions first.
    async fn recent_sessions(&self, limit: u32) -> PortResult<Vec<Session>>;

    /// Deletes a session together with all its result rows.
    async fn delete_session(&self, session_id: i64) -> PortResult<()>;

    // --- Result Management ---

    /// Bulk-inserts result rows for a session. Rows are independent; no dedup.
    async fn save_results(
        &self,
        session_id: i64,
        records: &[NewClassificationRecord],
    ) -> PortResult<()>;

    /// All rows for a session, ordered by `row_index`.
    async fn results_for_session(&self, session_id: i64) -> PortResult<Vec<PersistedResult>>;

    async fn get_result(&self, result_id: i64) -> PortResult<PersistedResult>;

    /// Stores a broker's review verdict and notes for one result.
    async fn update_user_review(
        &self,
        result_id: i64,
        user_status: UserStatus,
        user_notes: Option<&str>,
    ) -> PortResult<()>;

    // --- Aggregates ---

    async fn overall_statistics(&self) -> PortResult<OverallStatistics>;

    /// Review-status counts, scoped to one session when `session_id` is set.
    async fn user_status_counts(&self, session_id: Option<i64>) -> PortResult<UserStatusCounts>;
}
