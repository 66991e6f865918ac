//! crates/declarant_core/src/batch.rs
//!
//! The batch orchestrator: splits prepared items into fixed-size chunks,
//! classifies every item of a chunk concurrently, and joins the chunk before
//! the next one starts. A failed item becomes a zero-confidence placeholder
//! in its slot; nothing an individual item does can abort the batch.

use std::sync::Arc;

use futures::future;
use tracing::{debug, warn};

use crate::domain::{BatchRun, BatchStats, ClassificationItem, ClassificationResult};
use crate::ports::{ClassificationService, ProgressObserver};

/// Runs classification batches against a [`ClassificationService`].
///
/// The orchestrator owns no shared state across invocations; each call to
/// [`run_batch`](Self::run_batch) manages its own chunk-local fan-out, so
/// outstanding requests to the external service are capped by the chunk size.
pub struct BatchOrchestrator {
    classifier: Arc<dyn ClassificationService>,
    high_confidence_threshold: u8,
}

impl BatchOrchestrator {
    pub fn new(classifier: Arc<dyn ClassificationService>) -> Self {
        Self {
            classifier,
            high_confidence_threshold: 80,
        }
    }

    pub fn with_high_confidence_threshold(mut self, threshold: u8) -> Self {
        self.high_confidence_threshold = threshold;
        self
    }

    /// Classifies `items` in order, `chunk_size` at a time.
    ///
    /// The returned run holds exactly one result per input item, index-aligned
    /// regardless of which call in a chunk finishes first. After every chunk
    /// the observer, if any, is told how many items have resolved so far; an
    /// observer error is logged and swallowed.
    ///
    /// # Panics
    ///
    /// Panics if `items` is non-empty and `chunk_size` is zero. An empty input
    /// returns an empty run without touching `chunk_size`.
    pub async fn run_batch(
        &self,
        items: &[ClassificationItem],
        chunk_size: usize,
        observer: Option<&dyn ProgressObserver>,
    ) -> BatchRun {
        if items.is_empty() {
            return BatchRun::empty();
        }
        assert!(chunk_size > 0, "chunk_size must be at least 1");

        let total = items.len();
        let mut results: Vec<ClassificationResult> = Vec::with_capacity(total);
        let mut errors: Vec<String> = Vec::new();

        debug!(total, chunk_size, "starting classification batch");

        for (chunk_index, chunk) in items.chunks(chunk_size).enumerate() {
            let calls = chunk.iter().map(|item| self.classifier.classify(item));
            let outcomes = future::join_all(calls).await;

            for (offset, outcome) in outcomes.into_iter().enumerate() {
                // 1-based position in the whole batch, for error messages.
                let position = chunk_index * chunk_size + offset + 1;
                match outcome {
                    Ok(result) => results.push(result),
                    Err(err) => {
                        warn!(position, error = %err, "item classification failed");
                        errors.push(format!("Ошибка обработки элемента {position}: {err}"));
                        results.push(ClassificationResult::failure(format!("Исключение: {err}")));
                    }
                }
            }

            let processed = results.len().min(total);
            debug!(
                chunk = chunk_index + 1,
                processed, total, "chunk resolved"
            );
            if let Some(observer) = observer {
                if let Err(err) = observer.on_progress(processed, total) {
                    warn!(error = %err, "progress observer failed, continuing batch");
                }
            }
        }

        let stats = BatchStats::from_results(&results, self.high_confidence_threshold);
        BatchRun {
            results,
            errors,
            stats,
        }
    }
}
