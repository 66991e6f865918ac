//! services/api/src/processing.rs
//!
//! Drives one upload end-to-end: session bookkeeping around a batch run and
//! projection of the run into persisted result rows.

use std::time::Instant;

use declarant_core::batch::BatchOrchestrator;
use declarant_core::domain::{
    BatchRun, ConfidenceThresholds, NewClassificationRecord, SessionStatus, SessionUpdate,
    TierCounts,
};
use declarant_core::ports::{PortResult, ProgressObserver, SessionStore};
use tracing::{error, info};

use crate::error::ApiError;
use crate::ingestion::{prepare_items, ColumnMapping, TableData};

/// Progress observer that reports through the service log.
pub struct TracingProgress;

impl ProgressObserver for TracingProgress {
    fn on_progress(&self, processed: usize, total: usize) -> PortResult<()> {
        info!(processed, total, "classification progress");
        Ok(())
    }
}

/// Everything a caller needs to answer for one processed upload.
#[derive(Debug)]
pub struct ProcessingOutcome {
    pub session_id: i64,
    pub run: BatchRun,
    pub tier_counts: TierCounts,
    pub processing_time_seconds: f64,
}

/// Processes one uploaded table: creates the session, classifies every
/// prepared item, and persists the aligned results.
///
/// The session always leaves the `processing` state: `completed` on success,
/// `failed` when no rows were classifiable or persistence broke down.
pub async fn process_upload(
    store: &dyn SessionStore,
    orchestrator: &BatchOrchestrator,
    table: &TableData,
    mapping: &ColumnMapping,
    filename: &str,
    chunk_size: usize,
    thresholds: ConfidenceThresholds,
) -> Result<ProcessingOutcome, ApiError> {
    let started = Instant::now();
    let session_id = store
        .create_session(filename, table.row_count() as u32)
        .await?;
    info!(session_id, filename, rows = table.row_count(), "processing upload");

    let items = match prepare_items(table, mapping) {
        Ok(items) => items,
        Err(e) => {
            mark_failed(store, session_id).await;
            return Err(e);
        }
    };
    if items.is_empty() {
        mark_failed(store, session_id).await;
        return Err(ApiError::EmptyInput(
            "every row had a blank product name".into(),
        ));
    }

    let run = orchestrator
        .run_batch(&items, chunk_size, Some(&TracingProgress))
        .await;
    let tier_counts = TierCounts::tally(&run.results, thresholds);
    let processing_time_seconds = started.elapsed().as_secs_f64();

    let persisted = async {
        store
            .update_session(
                session_id,
                SessionUpdate {
                    processed_items: Some(run.results.len() as u32),
                    high_confidence_items: Some(tier_counts.high),
                    medium_confidence_items: Some(tier_counts.medium),
                    low_confidence_items: Some(tier_counts.low),
                    processing_time_seconds: Some(processing_time_seconds),
                    status: Some(SessionStatus::Completed),
                },
            )
            .await?;

        let records: Vec<NewClassificationRecord> = items
            .iter()
            .zip(run.results.iter())
            .map(|(item, result)| NewClassificationRecord::from_outcome(item, result))
            .collect();
        store.save_results(session_id, &records).await
    }
    .await;

    if let Err(e) = persisted {
        mark_failed(store, session_id).await;
        return Err(e.into());
    }

    info!(
        session_id,
        processed = run.results.len(),
        errors = run.errors.len(),
        elapsed_seconds = processing_time_seconds,
        "upload processed"
    );
    Ok(ProcessingOutcome {
        session_id,
        run,
        tier_counts,
        processing_time_seconds,
    })
}

/// Best-effort transition to `failed`; a session must never be left looking
/// like it is still running after its run died.
async fn mark_failed(store: &dyn SessionStore, session_id: i64) {
    if let Err(e) = store
        .update_session(session_id, SessionUpdate::status(SessionStatus::Failed))
        .await
    {
        error!(session_id, error = %e, "could not mark session as failed");
    }
}
