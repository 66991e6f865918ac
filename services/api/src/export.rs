//! services/api/src/export.rs
//!
//! Serializes a session's stored results to CSV for download. The output is
//! UTF-8 with a byte-order mark so spreadsheet tools pick the right encoding.

use declarant_core::domain::{ConfidenceThresholds, ConfidenceTier, PersistedResult, UserStatus};

use crate::error::ApiError;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub const EXPORT_FILENAME_PREFIX: &str = "tnved_results";

const EXPORT_HEADERS: [&str; 14] = [
    "№ строки",
    "Наименование товара",
    "Описание",
    "Категория",
    "Бренд",
    "Дополнительная информация",
    "Код ТН ВЭД",
    "Уровень доверия",
    "Описание ТН ВЭД",
    "Обоснование",
    "Альтернативные коды",
    "Статус доверия",
    "Пользовательский статус",
    "Заметки",
];

fn tier_label(tier: ConfidenceTier) -> &'static str {
    match tier {
        ConfidenceTier::High => "Высокий",
        ConfidenceTier::Medium => "Средний",
        ConfidenceTier::Low => "Низкий",
    }
}

fn user_status_label(status: UserStatus) -> &'static str {
    match status {
        UserStatus::Pending => "Ожидает",
        UserStatus::Confirmed => "Подтверждено",
        UserStatus::NeedsReview => "Требует проверки",
        UserStatus::Rejected => "Отклонено",
    }
}

/// Renders result rows into a downloadable CSV body.
pub fn results_to_csv(
    results: &[PersistedResult],
    thresholds: ConfidenceThresholds,
) -> Result<Vec<u8>, ApiError> {
    let mut writer = csv::Writer::from_writer(Vec::from(UTF8_BOM));

    writer
        .write_record(EXPORT_HEADERS)
        .map_err(|e| ApiError::Internal(format!("CSV export failed: {e}")))?;

    for result in results {
        let record = [
            (result.row_index + 1).to_string(),
            result.product_name.clone(),
            result.original_description.clone(),
            result.category.clone(),
            result.brand.clone(),
            result.additional_info.clone(),
            result.hs_code.clone(),
            result.confidence.to_string(),
            result.tnved_description.clone(),
            result.ai_reasoning.clone(),
            result.alternative_codes.join(", "),
            tier_label(thresholds.tier(result.confidence)).to_string(),
            user_status_label(result.user_status).to_string(),
            result.user_notes.clone().unwrap_or_default(),
        ];
        writer
            .write_record(&record)
            .map_err(|e| ApiError::Internal(format!("CSV export failed: {e}")))?;
    }

    writer
        .into_inner()
        .map_err(|e| ApiError::Internal(format!("CSV export failed: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn sample(confidence: u8, user_status: UserStatus) -> PersistedResult {
        let now = Utc::now();
        PersistedResult {
            id: 1,
            session_id: 1,
            row_index: 0,
            product_name: "Смартфон Apple iPhone".to_string(),
            original_description: "флагманский смартфон".to_string(),
            category: "Электроника".to_string(),
            brand: "Apple".to_string(),
            additional_info: String::new(),
            hs_code: "8517.12.000".to_string(),
            confidence,
            tnved_description: "Телефоны сотовой связи".to_string(),
            ai_reasoning: "Смартфон относится к аппаратам сотовой связи".to_string(),
            alternative_codes: vec!["8517.13.000".to_string(), "8517.18.000".to_string()],
            user_status,
            user_notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn output_starts_with_utf8_bom_and_header_row() {
        let bytes = results_to_csv(&[], ConfidenceThresholds::default()).unwrap();
        assert!(bytes.starts_with(&[0xEF, 0xBB, 0xBF]));

        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        let header = text.lines().next().unwrap();
        assert!(header.starts_with("№ строки,Наименование товара"));
        assert!(header.contains("Код ТН ВЭД"));
        assert!(header.contains("Статус доверия"));
    }

    #[test]
    fn rows_carry_joined_alternatives_and_tier_labels() {
        let results = vec![
            sample(95, UserStatus::Confirmed),
            sample(55, UserStatus::Pending),
            sample(10, UserStatus::NeedsReview),
        ];
        let bytes = results_to_csv(&results, ConfidenceThresholds::default()).unwrap();
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains("8517.13.000, 8517.18.000"));
        assert!(lines[1].contains("Высокий"));
        assert!(lines[1].contains("Подтверждено"));
        assert!(lines[2].contains("Средний"));
        assert!(lines[3].contains("Низкий"));
        assert!(lines[3].contains("Требует проверки"));
    }

    #[test]
    fn row_numbers_are_one_based() {
        let mut second = sample(80, UserStatus::Pending);
        second.row_index = 1;
        let bytes =
            results_to_csv(&[sample(80, UserStatus::Pending), second], Default::default()).unwrap();
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[1].starts_with("1,"));
        assert!(lines[2].starts_with("2,"));
    }
}
