//! crates/declarant_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or transport format.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Code substituted when an item could not be classified.
pub const FALLBACK_HS_CODE: &str = "0000.00.000";

//=========================================================================================
// Classification Input / Output
//=========================================================================================

/// One row of uploaded data, prepared for classification.
///
/// `row_index` is the position of the row in the source table and stays stable
/// through the whole pipeline. `fields` carries every auxiliary text value the
/// user mapped or that passed through from unmapped columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationItem {
    pub row_index: usize,
    pub product_name: String,
    pub fields: BTreeMap<String, String>,
}

impl ClassificationItem {
    pub fn new(row_index: usize, product_name: impl Into<String>) -> Self {
        Self {
            row_index,
            product_name: product_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// The structured outcome of classifying a single item.
///
/// The classification adapter deserializes model output directly into this
/// struct, so the field names are part of the model-facing contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Tariff code, e.g. "8517.12.000". Format is not validated at this layer.
    pub hs_code: String,
    /// Confidence in percent, 0..=100.
    pub confidence: u8,
    /// Official tariff description of the matched code.
    pub description: String,
    /// The model's justification for the chosen code.
    pub reasoning: String,
    /// Alternative codes, ordered by preference. May be empty.
    #[serde(default)]
    pub alternative_codes: Vec<String>,
}

impl ClassificationResult {
    /// Builds the zero-confidence placeholder substituted for a failed item.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            hs_code: FALLBACK_HS_CODE.to_string(),
            confidence: 0,
            description: "Ошибка обработки".to_string(),
            reasoning: reason.into(),
            alternative_codes: Vec::new(),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.confidence > 0
    }
}

//=========================================================================================
// Confidence Tiers
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

/// Tier boundaries. `high` is inclusive; `medium` is the inclusive floor of
/// the medium band. Everything below `medium` (including zero-confidence
/// failures) counts as low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfidenceThresholds {
    pub high: u8,
    pub medium: u8,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self { high: 80, medium: 40 }
    }
}

impl ConfidenceThresholds {
    pub fn tier(&self, confidence: u8) -> ConfidenceTier {
        if confidence >= self.high {
            ConfidenceTier::High
        } else if confidence >= self.medium {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

/// Per-tier totals for one batch of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierCounts {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl TierCounts {
    pub fn tally<'a>(
        results: impl IntoIterator<Item = &'a ClassificationResult>,
        thresholds: ConfidenceThresholds,
    ) -> Self {
        let mut counts = Self::default();
        for result in results {
            match thresholds.tier(result.confidence) {
                ConfidenceTier::High => counts.high += 1,
                ConfidenceTier::Medium => counts.medium += 1,
                ConfidenceTier::Low => counts.low += 1,
            }
        }
        counts
    }
}

//=========================================================================================
// Batch Aggregates
//=========================================================================================

/// Summary statistics over one batch invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStats {
    pub total_items: usize,
    /// Results with confidence > 0.
    pub successful: usize,
    /// Results at or above the high-confidence threshold.
    pub high_confidence: usize,
    /// Mean confidence over successful results, 0.0 if there are none.
    pub average_confidence: f64,
}

impl BatchStats {
    pub fn from_results(results: &[ClassificationResult], high_threshold: u8) -> Self {
        let successful: Vec<u8> = results
            .iter()
            .filter(|r| r.is_successful())
            .map(|r| r.confidence)
            .collect();
        let high_confidence = successful.iter().filter(|&&c| c >= high_threshold).count();
        let average_confidence = if successful.is_empty() {
            0.0
        } else {
            successful.iter().map(|&c| f64::from(c)).sum::<f64>() / successful.len() as f64
        };
        Self {
            total_items: results.len(),
            successful: successful.len(),
            high_confidence,
            average_confidence,
        }
    }
}

/// The outcome of one orchestrator invocation.
///
/// `results` is always index-aligned with the submitted item list; a failed
/// item is represented by its placeholder result, never dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRun {
    pub results: Vec<ClassificationResult>,
    pub errors: Vec<String>,
    pub stats: BatchStats,
}

impl BatchRun {
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            errors: Vec::new(),
            stats: BatchStats {
                total_items: 0,
                successful: 0,
                high_confidence: 0,
                average_confidence: 0.0,
            },
        }
    }
}

//=========================================================================================
// Persisted State
//=========================================================================================

/// Lifecycle of one processing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid session status '{0}'")]
pub struct InvalidSessionStatus(pub String);

impl FromStr for SessionStatus {
    type Err = InvalidSessionStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(SessionStatus::Processing),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(InvalidSessionStatus(other.to_string())),
        }
    }
}

/// One upload/processing event, as stored in `processing_sessions`.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: i64,
    pub filename: String,
    pub upload_timestamp: DateTime<Utc>,
    pub total_items: u32,
    pub processed_items: u32,
    pub high_confidence_items: u32,
    pub medium_confidence_items: u32,
    pub low_confidence_items: u32,
    pub status: SessionStatus,
    pub processing_time_seconds: f64,
}

/// Partial update of a session row. Only the supplied fields change.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub processed_items: Option<u32>,
    pub high_confidence_items: Option<u32>,
    pub medium_confidence_items: Option<u32>,
    pub low_confidence_items: Option<u32>,
    pub processing_time_seconds: Option<f64>,
    pub status: Option<SessionStatus>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.processed_items.is_none()
            && self.high_confidence_items.is_none()
            && self.medium_confidence_items.is_none()
            && self.low_confidence_items.is_none()
            && self.processing_time_seconds.is_none()
            && self.status.is_none()
    }
}

/// Review verdict a broker assigns to one stored result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Pending,
    Confirmed,
    NeedsReview,
    Rejected,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Pending => "pending",
            UserStatus::Confirmed => "confirmed",
            UserStatus::NeedsReview => "needs_review",
            UserStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid user status '{0}', expected one of: pending, confirmed, needs_review, rejected")]
pub struct InvalidUserStatus(pub String);

impl FromStr for UserStatus {
    type Err = InvalidUserStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UserStatus::Pending),
            "confirmed" => Ok(UserStatus::Confirmed),
            "needs_review" => Ok(UserStatus::NeedsReview),
            "rejected" => Ok(UserStatus::Rejected),
            other => Err(InvalidUserStatus(other.to_string())),
        }
    }
}

/// One classified row, as stored in `classification_results`.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedResult {
    pub id: i64,
    pub session_id: i64,
    pub row_index: u32,
    pub product_name: String,
    pub original_description: String,
    pub category: String,
    pub brand: String,
    pub additional_info: String,
    pub hs_code: String,
    pub confidence: u8,
    pub tnved_description: String,
    pub ai_reasoning: String,
    pub alternative_codes: Vec<String>,
    pub user_status: UserStatus,
    pub user_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for one classified row, projected from an
/// (item, result) pair at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct NewClassificationRecord {
    pub row_index: u32,
    pub product_name: String,
    pub original_description: String,
    pub category: String,
    pub brand: String,
    pub additional_info: String,
    pub hs_code: String,
    pub confidence: u8,
    pub tnved_description: String,
    pub ai_reasoning: String,
    pub alternative_codes: Vec<String>,
}

impl NewClassificationRecord {
    /// Projects one item and its classification outcome into an insertable row.
    pub fn from_outcome(item: &ClassificationItem, result: &ClassificationResult) -> Self {
        let text_field = |name: &str| item.field(name).unwrap_or_default().to_string();
        Self {
            row_index: item.row_index as u32,
            product_name: item.product_name.clone(),
            original_description: text_field("description"),
            category: text_field("category"),
            brand: text_field("brand"),
            additional_info: text_field("additional_info"),
            hs_code: result.hs_code.clone(),
            confidence: result.confidence,
            tnved_description: result.description.clone(),
            ai_reasoning: result.reasoning.clone(),
            alternative_codes: result.alternative_codes.clone(),
        }
    }
}

//=========================================================================================
// Cross-session Aggregates
//=========================================================================================

/// Totals over all completed sessions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverallStatistics {
    pub total_sessions: u32,
    pub total_items_processed: u64,
    pub total_high_confidence: u64,
    pub total_medium_confidence: u64,
    pub total_low_confidence: u64,
    pub avg_processing_time_seconds: f64,
}

/// Review-status totals, either global or scoped to one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserStatusCounts {
    pub pending: u32,
    pub confirmed: u32,
    pub needs_review: u32,
    pub rejected: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_result_is_zero_confidence_placeholder() {
        let result = ClassificationResult::failure("Исключение: timeout");
        assert_eq!(result.hs_code, FALLBACK_HS_CODE);
        assert_eq!(result.confidence, 0);
        assert!(!result.is_successful());
        assert!(result.reasoning.contains("Исключение"));
        assert!(result.alternative_codes.is_empty());
    }

    #[test]
    fn tiers_follow_canonical_boundaries() {
        let thresholds = ConfidenceThresholds::default();
        assert_eq!(thresholds.tier(100), ConfidenceTier::High);
        assert_eq!(thresholds.tier(80), ConfidenceTier::High);
        assert_eq!(thresholds.tier(79), ConfidenceTier::Medium);
        assert_eq!(thresholds.tier(40), ConfidenceTier::Medium);
        assert_eq!(thresholds.tier(39), ConfidenceTier::Low);
        assert_eq!(thresholds.tier(0), ConfidenceTier::Low);
    }

    #[test]
    fn tier_counts_tally_each_band() {
        let results: Vec<ClassificationResult> = [90, 80, 55, 40, 39, 0]
            .iter()
            .map(|&confidence| ClassificationResult {
                hs_code: "8517.12.000".to_string(),
                confidence,
                description: String::new(),
                reasoning: String::new(),
                alternative_codes: Vec::new(),
            })
            .collect();
        let counts = TierCounts::tally(&results, ConfidenceThresholds::default());
        assert_eq!(counts, TierCounts { high: 2, medium: 2, low: 2 });
    }

    #[test]
    fn stats_over_mixed_confidences() {
        let results: Vec<ClassificationResult> = [90, 50, 0, 80]
            .iter()
            .map(|&confidence| ClassificationResult {
                hs_code: "0901.11.000".to_string(),
                confidence,
                description: String::new(),
                reasoning: String::new(),
                alternative_codes: Vec::new(),
            })
            .collect();
        let stats = BatchStats::from_results(&results, 80);
        assert_eq!(stats.total_items, 4);
        assert_eq!(stats.successful, 3);
        assert_eq!(stats.high_confidence, 2);
        assert!((stats.average_confidence - (90.0 + 50.0 + 80.0) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn user_status_parses_only_known_values() {
        assert_eq!("pending".parse::<UserStatus>().unwrap(), UserStatus::Pending);
        assert_eq!(
            "needs_review".parse::<UserStatus>().unwrap(),
            UserStatus::NeedsReview
        );
        assert!("approved".parse::<UserStatus>().is_err());
        assert!("Confirmed".parse::<UserStatus>().is_err());
        assert!("".parse::<UserStatus>().is_err());
    }

    #[test]
    fn session_status_round_trips() {
        for status in [
            SessionStatus::Processing,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("done".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn record_projection_picks_up_auxiliary_fields() {
        let mut item = ClassificationItem::new(7, "Кофе в зернах арабика");
        item.fields
            .insert("category".to_string(), "Продукты".to_string());
        item.fields
            .insert("brand".to_string(), "Lavazza".to_string());
        item.fields
            .insert("вес_нетто".to_string(), "1 кг".to_string());
        let result = ClassificationResult {
            hs_code: "0901.11.000".to_string(),
            confidence: 90,
            description: "Кофе нежареный с кофеином".to_string(),
            reasoning: "Зерновой кофе без обжарки".to_string(),
            alternative_codes: vec!["0901.21.000".to_string()],
        };

        let record = NewClassificationRecord::from_outcome(&item, &result);
        assert_eq!(record.row_index, 7);
        assert_eq!(record.category, "Продукты");
        assert_eq!(record.brand, "Lavazza");
        assert_eq!(record.original_description, "");
        assert_eq!(record.tnved_description, "Кофе нежареный с кофеином");
        assert_eq!(record.alternative_codes, vec!["0901.21.000".to_string()]);
    }
}
