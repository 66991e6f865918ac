//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `SessionStore` port from the `core` crate. It handles all interactions
//! with the SQLite database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use declarant_core::domain::{
    NewClassificationRecord, OverallStatistics, PersistedResult, Session, SessionStatus,
    SessionUpdate, UserStatus, UserStatusCounts,
};
use declarant_core::ports::{PortError, PortResult, SessionStore};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `SessionStore` port.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Creates a new `SqliteStore`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SessionRecord {
    id: i64,
    filename: String,
    upload_timestamp: DateTime<Utc>,
    total_items: i64,
    processed_items: i64,
    high_confidence_items: i64,
    medium_confidence_items: i64,
    low_confidence_items: i64,
    status: String,
    processing_time_seconds: f64,
}

impl SessionRecord {
    fn to_domain(self) -> PortResult<Session> {
        let status: SessionStatus = self
            .status
            .parse()
            .map_err(|e: declarant_core::domain::InvalidSessionStatus| {
                PortError::Unexpected(e.to_string())
            })?;
        Ok(Session {
            id: self.id,
            filename: self.filename,
            upload_timestamp: self.upload_timestamp,
            total_items: self.total_items as u32,
            processed_items: self.processed_items as u32,
            high_confidence_items: self.high_confidence_items as u32,
            medium_confidence_items: self.medium_confidence_items as u32,
            low_confidence_items: self.low_confidence_items as u32,
            status,
            processing_time_seconds: self.processing_time_seconds,
        })
    }
}

#[derive(FromRow)]
struct ResultRecord {
    id: i64,
    session_id: i64,
    row_index: i64,
    product_name: String,
    original_description: String,
    category: String,
    brand: String,
    additional_info: String,
    hs_code: String,
    confidence_percentage: i64,
    tnved_description: String,
    ai_reasoning: String,
    alternative_codes: String,
    user_status: String,
    user_notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResultRecord {
    fn to_domain(self) -> PortResult<PersistedResult> {
        let user_status: UserStatus = self
            .user_status
            .parse()
            .map_err(|e: declarant_core::domain::InvalidUserStatus| {
                PortError::Unexpected(e.to_string())
            })?;
        let alternative_codes: Vec<String> = if self.alternative_codes.is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&self.alternative_codes)
                .map_err(|e| PortError::Unexpected(format!("bad alternative_codes column: {e}")))?
        };
        Ok(PersistedResult {
            id: self.id,
            session_id: self.session_id,
            row_index: self.row_index as u32,
            product_name: self.product_name,
            original_description: self.original_description,
            category: self.category,
            brand: self.brand,
            additional_info: self.additional_info,
            hs_code: self.hs_code,
            confidence: self.confidence_percentage.clamp(0, 100) as u8,
            tnved_description: self.tnved_description,
            ai_reasoning: self.ai_reasoning,
            alternative_codes,
            user_status,
            user_notes: self.user_notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct OverallStatsRecord {
    total_sessions: i64,
    total_items_processed: Option<i64>,
    total_high_confidence: Option<i64>,
    total_medium_confidence: Option<i64>,
    total_low_confidence: Option<i64>,
    avg_processing_time_seconds: Option<f64>,
}

//=========================================================================================
// `SessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(&self, filename: &str, total_items: u32) -> PortResult<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO processing_sessions \
             (filename, total_items, status, upload_timestamp, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(filename)
        .bind(total_items)
        .bind(SessionStatus::Processing.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.last_insert_rowid())
    }

    async fn update_session(&self, session_id: i64, update: SessionUpdate) -> PortResult<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE processing_sessions SET ");
        let mut fields = builder.separated(", ");
        if let Some(processed) = update.processed_items {
            fields.push("processed_items = ");
            fields.push_bind_unseparated(processed);
        }
        if let Some(high) = update.high_confidence_items {
            fields.push("high_confidence_items = ");
            fields.push_bind_unseparated(high);
        }
        if let Some(medium) = update.medium_confidence_items {
            fields.push("medium_confidence_items = ");
            fields.push_bind_unseparated(medium);
        }
        if let Some(low) = update.low_confidence_items {
            fields.push("low_confidence_items = ");
            fields.push_bind_unseparated(low);
        }
        if let Some(elapsed) = update.processing_time_seconds {
            fields.push("processing_time_seconds = ");
            fields.push_bind_unseparated(elapsed);
        }
        if let Some(status) = update.status {
            fields.push("status = ");
            fields.push_bind_unseparated(status.as_str());
        }
        builder.push(" WHERE id = ");
        builder.push_bind(session_id);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Session {} not found",
                session_id
            )));
        }
        Ok(())
    }

    async fn get_session(&self, session_id: i64) -> PortResult<Session> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "SELECT id, filename, upload_timestamp, total_items, processed_items, \
             high_confidence_items, medium_confidence_items, low_confidence_items, \
             status, processing_time_seconds \
             FROM processing_sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Session {} not found", session_id))
            }
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn recent_sessions(&self, limit: u32) -> PortResult<Vec<Session>> {
        let records = sqlx::query_as::<_, SessionRecord>(
            "SELECT id, filename, upload_timestamp, total_items, processed_items, \
             high_confidence_items, medium_confidence_items, low_confidence_items, \
             status, processing_time_seconds \
             FROM processing_sessions ORDER BY upload_timestamp DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(SessionRecord::to_domain).collect()
    }

    async fn delete_session(&self, session_id: i64) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // Children first so no dangling result rows survive.
        sqlx::query("DELETE FROM classification_results WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        let result = sqlx::query("DELETE FROM processing_sessions WHERE id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Session {} not found",
                session_id
            )));
        }
        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn save_results(
        &self,
        session_id: i64,
        records: &[NewClassificationRecord],
    ) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let now = Utc::now();

        for record in records {
            let alternative_codes = serde_json::to_string(&record.alternative_codes)
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
            sqlx::query(
                "INSERT INTO classification_results \
                 (session_id, row_index, product_name, original_description, category, brand, \
                  additional_info, hs_code, confidence_percentage, tnved_description, \
                  ai_reasoning, alternative_codes, user_status, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(session_id)
            .bind(record.row_index)
            .bind(&record.product_name)
            .bind(&record.original_description)
            .bind(&record.category)
            .bind(&record.brand)
            .bind(&record.additional_info)
            .bind(&record.hs_code)
            .bind(i64::from(record.confidence))
            .bind(&record.tnved_description)
            .bind(&record.ai_reasoning)
            .bind(alternative_codes)
            .bind(UserStatus::Pending.as_str())
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn results_for_session(&self, session_id: i64) -> PortResult<Vec<PersistedResult>> {
        let records = sqlx::query_as::<_, ResultRecord>(
            "SELECT id, session_id, row_index, product_name, original_description, category, \
             brand, additional_info, hs_code, confidence_percentage, tnved_description, \
             ai_reasoning, alternative_codes, user_status, user_notes, created_at, updated_at \
             FROM classification_results WHERE session_id = ? ORDER BY row_index ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(ResultRecord::to_domain).collect()
    }

    async fn get_result(&self, result_id: i64) -> PortResult<PersistedResult> {
        let record = sqlx::query_as::<_, ResultRecord>(
            "SELECT id, session_id, row_index, product_name, original_description, category, \
             brand, additional_info, hs_code, confidence_percentage, tnved_description, \
             ai_reasoning, alternative_codes, user_status, user_notes, created_at, updated_at \
             FROM classification_results WHERE id = ?",
        )
        .bind(result_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Result {} not found", result_id))
            }
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn update_user_review(
        &self,
        result_id: i64,
        user_status: UserStatus,
        user_notes: Option<&str>,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE classification_results \
             SET user_status = ?, user_notes = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(user_status.as_str())
        .bind(user_notes)
        .bind(Utc::now())
        .bind(result_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Result {} not found",
                result_id
            )));
        }
        Ok(())
    }

    async fn overall_statistics(&self) -> PortResult<OverallStatistics> {
        let record = sqlx::query_as::<_, OverallStatsRecord>(
            "SELECT \
             COUNT(*) AS total_sessions, \
             SUM(total_items) AS total_items_processed, \
             SUM(high_confidence_items) AS total_high_confidence, \
             SUM(medium_confidence_items) AS total_medium_confidence, \
             SUM(low_confidence_items) AS total_low_confidence, \
             AVG(processing_time_seconds) AS avg_processing_time_seconds \
             FROM processing_sessions WHERE status = 'completed'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(OverallStatistics {
            total_sessions: record.total_sessions as u32,
            total_items_processed: record.total_items_processed.unwrap_or(0) as u64,
            total_high_confidence: record.total_high_confidence.unwrap_or(0) as u64,
            total_medium_confidence: record.total_medium_confidence.unwrap_or(0) as u64,
            total_low_confidence: record.total_low_confidence.unwrap_or(0) as u64,
            avg_processing_time_seconds: record.avg_processing_time_seconds.unwrap_or(0.0),
        })
    }

    async fn user_status_counts(&self, session_id: Option<i64>) -> PortResult<UserStatusCounts> {
        let rows: Vec<(String, i64)> = match session_id {
            Some(id) => {
                sqlx::query_as(
                    "SELECT user_status, COUNT(*) FROM classification_results \
                     WHERE session_id = ? GROUP BY user_status",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as(
                    "SELECT user_status, COUNT(*) FROM classification_results \
                     GROUP BY user_status",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(unexpected)?;

        let mut counts = UserStatusCounts::default();
        for (status, count) in rows {
            let count = count as u32;
            match status.parse::<UserStatus>() {
                Ok(UserStatus::Pending) => counts.pending = count,
                Ok(UserStatus::Confirmed) => counts.confirmed = count,
                Ok(UserStatus::NeedsReview) => counts.needs_review = count,
                Ok(UserStatus::Rejected) => counts.rejected = count,
                // Unknown values in the column are ignored rather than fatal.
                Err(_) => {}
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use declarant_core::domain::ClassificationItem;
    use declarant_core::domain::ClassificationResult;
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn test_store() -> SqliteStore {
        // A single connection keeps every query on the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let store = SqliteStore::new(pool);
        store.run_migrations().await.expect("migrations");
        store
    }

    fn sample_records() -> Vec<NewClassificationRecord> {
        let make = |row_index: u32, confidence: u8| {
            let mut item = ClassificationItem::new(row_index as usize, format!("Товар {row_index}"));
            item.fields
                .insert("category".to_string(), "Электроника".to_string());
            let result = ClassificationResult {
                hs_code: "8517.12.000".to_string(),
                confidence,
                description: "Телефоны сотовой связи".to_string(),
                reasoning: "Сопоставлено по описанию".to_string(),
                alternative_codes: vec!["8517.18.000".to_string()],
            };
            NewClassificationRecord::from_outcome(&item, &result)
        };
        // Deliberately out of row order; fetch must sort.
        vec![make(2, 95), make(0, 30), make(1, 60)]
    }

    #[tokio::test]
    async fn session_lifecycle_with_partial_updates() {
        let store = test_store().await;
        let id = store.create_session("products.csv", 3).await.unwrap();

        let session = store.get_session(id).await.unwrap();
        assert_eq!(session.filename, "products.csv");
        assert_eq!(session.total_items, 3);
        assert_eq!(session.status, SessionStatus::Processing);
        assert_eq!(session.processed_items, 0);

        store
            .update_session(
                id,
                SessionUpdate {
                    processed_items: Some(3),
                    high_confidence_items: Some(1),
                    medium_confidence_items: Some(1),
                    low_confidence_items: Some(1),
                    processing_time_seconds: Some(12.5),
                    status: Some(SessionStatus::Completed),
                },
            )
            .await
            .unwrap();

        // A later partial update must leave every unlisted column alone.
        store
            .update_session(id, SessionUpdate::status(SessionStatus::Failed))
            .await
            .unwrap();

        let session = store.get_session(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.processed_items, 3);
        assert_eq!(session.high_confidence_items, 1);
        assert!((session.processing_time_seconds - 12.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn results_come_back_in_row_order() {
        let store = test_store().await;
        let id = store.create_session("products.csv", 3).await.unwrap();
        store.save_results(id, &sample_records()).await.unwrap();

        let results = store.results_for_session(id).await.unwrap();
        assert_eq!(results.len(), 3);
        let row_indexes: Vec<u32> = results.iter().map(|r| r.row_index).collect();
        assert_eq!(row_indexes, vec![0, 1, 2]);
        assert_eq!(results[0].user_status, UserStatus::Pending);
        assert_eq!(
            results[0].alternative_codes,
            vec!["8517.18.000".to_string()]
        );
        assert_eq!(results[0].category, "Электроника");
    }

    #[tokio::test]
    async fn review_update_persists_status_and_notes() {
        let store = test_store().await;
        let id = store.create_session("products.csv", 3).await.unwrap();
        store.save_results(id, &sample_records()).await.unwrap();
        let results = store.results_for_session(id).await.unwrap();
        let result_id = results[0].id;

        store
            .update_user_review(result_id, UserStatus::Confirmed, Some("код проверен"))
            .await
            .unwrap();

        let updated = store.get_result(result_id).await.unwrap();
        assert_eq!(updated.user_status, UserStatus::Confirmed);
        assert_eq!(updated.user_notes.as_deref(), Some("код проверен"));
        assert!(updated.updated_at >= updated.created_at);

        let missing = store
            .update_user_review(999_999, UserStatus::Rejected, None)
            .await;
        assert!(matches!(missing, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn rejected_status_string_leaves_row_unchanged() {
        let store = test_store().await;
        let id = store.create_session("products.csv", 3).await.unwrap();
        store.save_results(id, &sample_records()).await.unwrap();
        let result_id = store.results_for_session(id).await.unwrap()[0].id;

        // Validation happens before the store is touched: an unknown status
        // never parses into `UserStatus`, so no update can be issued.
        assert!("approved".parse::<UserStatus>().is_err());

        let row = store.get_result(result_id).await.unwrap();
        assert_eq!(row.user_status, UserStatus::Pending);
        assert_eq!(row.user_notes, None);
    }

    #[tokio::test]
    async fn delete_session_removes_children_too() {
        let store = test_store().await;
        let id = store.create_session("products.csv", 3).await.unwrap();
        store.save_results(id, &sample_records()).await.unwrap();

        store.delete_session(id).await.unwrap();

        assert!(matches!(
            store.get_session(id).await,
            Err(PortError::NotFound(_))
        ));
        let orphans = store.results_for_session(id).await.unwrap();
        assert!(orphans.is_empty());

        assert!(matches!(
            store.delete_session(id).await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn recent_sessions_newest_first() {
        let store = test_store().await;
        let first = store.create_session("first.csv", 1).await.unwrap();
        let second = store.create_session("second.csv", 1).await.unwrap();

        let sessions = store.recent_sessions(5).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, second);
        assert_eq!(sessions[1].id, first);

        let limited = store.recent_sessions(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, second);
    }

    #[tokio::test]
    async fn statistics_cover_completed_sessions_only() {
        let store = test_store().await;
        let completed = store.create_session("done.csv", 4).await.unwrap();
        store
            .update_session(
                completed,
                SessionUpdate {
                    processed_items: Some(4),
                    high_confidence_items: Some(2),
                    medium_confidence_items: Some(1),
                    low_confidence_items: Some(1),
                    processing_time_seconds: Some(8.0),
                    status: Some(SessionStatus::Completed),
                },
            )
            .await
            .unwrap();
        // Still processing; must not count.
        store.create_session("pending.csv", 9).await.unwrap();

        let stats = store.overall_statistics().await.unwrap();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_items_processed, 4);
        assert_eq!(stats.total_high_confidence, 2);
        assert_eq!(stats.total_medium_confidence, 1);
        assert_eq!(stats.total_low_confidence, 1);
        assert!((stats.avg_processing_time_seconds - 8.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn user_status_counts_can_be_scoped() {
        let store = test_store().await;
        let first = store.create_session("first.csv", 3).await.unwrap();
        let second = store.create_session("second.csv", 3).await.unwrap();
        store.save_results(first, &sample_records()).await.unwrap();
        store.save_results(second, &sample_records()).await.unwrap();

        let first_ids: Vec<i64> = store
            .results_for_session(first)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        store
            .update_user_review(first_ids[0], UserStatus::Confirmed, None)
            .await
            .unwrap();
        store
            .update_user_review(first_ids[1], UserStatus::NeedsReview, None)
            .await
            .unwrap();

        let scoped = store.user_status_counts(Some(first)).await.unwrap();
        assert_eq!(scoped.confirmed, 1);
        assert_eq!(scoped.needs_review, 1);
        assert_eq!(scoped.pending, 1);
        assert_eq!(scoped.rejected, 0);

        let global = store.user_status_counts(None).await.unwrap();
        assert_eq!(global.pending, 4);
        assert_eq!(global.confirmed, 1);
    }
}
