//! services/api/src/adapters/hs_llm.rs
//!
//! This module contains the adapter for the tariff-code classification LLM.
//! It implements the `ClassificationService` port from the `core` crate.

const SYSTEM_INSTRUCTIONS: &str = r#"Ты - эксперт по Товарной номенклатуре внешнеэкономической деятельности (ТН ВЭД) Туркменистана.

ТВОЯ ЗАДАЧА:
1. Анализировать описания товаров
2. Определять точный код ТН ВЭД
3. Обосновывать выбор кода
4. Указывать уровень доверия (confidence)

ТРЕБОВАНИЯ К АНАЛИЗУ:
- Используй поиск по векторной базе кодов ТН ВЭД (file search)
- Если в базе нет подходящего кода, ищи в интернете (web search)
- Анализируй материал, назначение, конструкцию товара
- Учитывай особенности классификации Туркменистана
- При низком confidence предложи альтернативные коды

ФОРМАТ ВЫВОДА - СТРОГО один JSON-объект без пояснений вокруг:
{
  "hs_code": "точный 9-значный код, например 8517.12.000",
  "confidence": 0-100,
  "description": "официальное описание согласно ТН ВЭД",
  "reasoning": "подробное обоснование выбора",
  "alternative_codes": ["альтернативные коды при неуверенности"]
}

ПРИМЕРЫ ХОРОШЕГО АНАЛИЗА:
"Смартфон Apple iPhone" -> "8517.12.000" (телефоны сотовой связи, confidence: 95)
"Кофе в зернах арабика" -> "0901.11.000" (кофе необжаренный, confidence: 90)
"Автомобильные шины R16" -> "4011.10.000" (шины новые для легковых авто, confidence: 85)

Будь точным, последовательным и обоснованным в каждом решении!"#;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::responses::{CreateResponseArgs, FileSearchTool, Tool, WebSearchTool},
    Client,
};
use async_trait::async_trait;
use declarant_core::domain::{ClassificationItem, ClassificationResult};
use declarant_core::ports::{ClassificationService, PortError, PortResult};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ClassificationService` using an OpenAI-compatible LLM
/// with retrieval over the ТН ВЭД nomenclature vector store.
#[derive(Clone)]
pub struct OpenAiHsCodeAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    vector_store_id: Option<String>,
}

impl OpenAiHsCodeAdapter {
    /// Creates a new `OpenAiHsCodeAdapter`.
    pub fn new(
        client: Client<OpenAIConfig>,
        model: String,
        vector_store_id: Option<String>,
    ) -> Self {
        Self {
            client,
            model,
            vector_store_id,
        }
    }

    /// Joins the product name with any auxiliary fields the row carried,
    /// e.g. `Смартфон Apple iPhone (brand: Apple, category: Электроника)`.
    fn full_description(item: &ClassificationItem) -> String {
        let extras: Vec<String> = item
            .fields
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(key, value)| format!("{}: {}", key, value.trim()))
            .collect();
        if extras.is_empty() {
            item.product_name.clone()
        } else {
            format!("{} ({})", item.product_name, extras.join(", "))
        }
    }

    fn tools(&self) -> Vec<Tool> {
        let mut tools = Vec::new();
        if let Some(vector_store_id) = &self.vector_store_id {
            tools.push(Tool::FileSearch(FileSearchTool {
                vector_store_ids: vec![vector_store_id.clone()],
                max_num_results: Some(5),
                ..Default::default()
            }));
        }
        tools.push(Tool::WebSearch(WebSearchTool::default()));
        tools
    }

    /// Pulls the JSON object out of the raw model text, tolerating prose or
    /// code fences around it.
    fn parse_response(raw: &str) -> PortResult<ClassificationResult> {
        let start = raw.find('{');
        let end = raw.rfind('}');
        let json = match (start, end) {
            (Some(start), Some(end)) if start < end => &raw[start..=end],
            _ => {
                return Err(PortError::Unexpected(format!(
                    "classifier returned no JSON object: {raw:.200}"
                )))
            }
        };

        let result: ClassificationResult = serde_json::from_str(json)
            .map_err(|e| PortError::Unexpected(format!("malformed classifier output: {e}")))?;
        if result.confidence > 100 {
            return Err(PortError::Unexpected(format!(
                "confidence {} outside 0..=100",
                result.confidence
            )));
        }
        Ok(result)
    }
}

//=========================================================================================
// `ClassificationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ClassificationService for OpenAiHsCodeAdapter {
    /// Classifies a single prepared item. One attempt, no retries; every
    /// failure mode surfaces as a `PortError` for the orchestrator to absorb.
    async fn classify(&self, item: &ClassificationItem) -> PortResult<ClassificationResult> {
        let description = Self::full_description(item);

        let request = CreateResponseArgs::default()
            .model(&self.model)
            .instructions(SYSTEM_INSTRUCTIONS)
            .input(format!("Определи код ТН ВЭД для товара: {description}"))
            .tools(self.tools())
            .temperature(0.1)
            .max_output_tokens(1500u32)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .responses()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let raw = response.output_text().unwrap_or_default();
        Self::parse_response(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_includes_auxiliary_fields() {
        let mut item = ClassificationItem::new(0, "Смартфон Apple iPhone");
        item.fields
            .insert("brand".to_string(), "Apple".to_string());
        item.fields
            .insert("category".to_string(), "Электроника".to_string());
        item.fields.insert("цвет".to_string(), "  ".to_string());

        let description = OpenAiHsCodeAdapter::full_description(&item);
        assert_eq!(
            description,
            "Смартфон Apple iPhone (brand: Apple, category: Электроника)"
        );
    }

    #[test]
    fn bare_product_name_stays_unwrapped() {
        let item = ClassificationItem::new(0, "Кофе в зернах арабика");
        assert_eq!(
            OpenAiHsCodeAdapter::full_description(&item),
            "Кофе в зернах арабика"
        );
    }

    #[test]
    fn parses_json_inside_code_fence() {
        let raw = "Вот результат:\n```json\n{\"hs_code\": \"8517.12.000\", \"confidence\": 95, \
                   \"description\": \"Телефоны сотовой связи\", \"reasoning\": \"Смартфон\"}\n```";
        let result = OpenAiHsCodeAdapter::parse_response(raw).unwrap();
        assert_eq!(result.hs_code, "8517.12.000");
        assert_eq!(result.confidence, 95);
        assert!(result.alternative_codes.is_empty());
    }

    #[test]
    fn rejects_output_without_json() {
        let err = OpenAiHsCodeAdapter::parse_response("не могу определить код").unwrap_err();
        assert!(matches!(err, PortError::Unexpected(_)));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let raw = "{\"hs_code\": \"8517.12.000\", \"confidence\": 101, \
                   \"description\": \"\", \"reasoning\": \"\"}";
        assert!(OpenAiHsCodeAdapter::parse_response(raw).is_err());
    }
}
