//! services/api/src/ingestion.rs
//!
//! Turns an uploaded CSV file into classification items: parsing, cleaning,
//! user column mapping, and per-row item preparation.

use std::collections::BTreeMap;

use declarant_core::domain::ClassificationItem;
use serde::Deserialize;

use crate::error::ApiError;

/// Cell values treated as absent when they pass through from unmapped columns.
const PLACEHOLDER_VALUES: [&str; 3] = ["nan", "none", "null"];

//=========================================================================================
// Parsed Table
//=========================================================================================

/// An uploaded table after parsing and cleaning: a header row plus data rows,
/// every row padded or truncated to the header width, cells trimmed,
/// fully-empty rows dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Parses CSV bytes into a [`TableData`].
///
/// The input must be UTF-8; a leading byte-order mark is tolerated. Fails on
/// an empty table or when the row count exceeds `max_rows`.
pub fn parse_csv(bytes: &[u8], max_rows: usize) -> Result<TableData, ApiError> {
    let bytes = bytes
        .strip_prefix(&[0xEF, 0xBB, 0xBF][..])
        .unwrap_or(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ApiError::InvalidUpload(format!("failed to read CSV header: {e}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        return Err(ApiError::InvalidUpload("the file has no header row".into()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| ApiError::InvalidUpload(format!("failed to read CSV row: {e}")))?;
        let mut row: Vec<String> = record.iter().map(|c| c.trim().to_string()).collect();
        row.resize(headers.len(), String::new());
        if row.iter().all(String::is_empty) {
            continue;
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(ApiError::InvalidUpload("the file contains no data".into()));
    }
    if rows.len() > max_rows {
        return Err(ApiError::InvalidUpload(format!(
            "too many rows ({}), the limit is {max_rows}",
            rows.len()
        )));
    }

    Ok(TableData { headers, rows })
}

//=========================================================================================
// Column Mapping and Item Preparation
//=========================================================================================

/// The user's assignment of source columns to semantic roles. Only
/// `product_name` is required; unmapped columns still pass through as
/// auxiliary text.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMapping {
    pub product_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub additional_info: Option<String>,
}

impl ColumnMapping {
    fn roles(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("description", self.description.as_deref()),
            ("category", self.category.as_deref()),
            ("brand", self.brand.as_deref()),
            ("additional_info", self.additional_info.as_deref()),
        ]
    }
}

/// Lowercases a source column name and flattens separators so it can serve
/// as an auxiliary field key.
fn normalize_key(column: &str) -> String {
    column
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// Builds one [`ClassificationItem`] per row with a non-blank product name.
///
/// Rows whose product name is empty after trimming are skipped; `row_index`
/// is the row's position in the cleaned table, so it stays aligned with what
/// the user saw in the preview. Optional roles that name a missing column are
/// ignored; a missing product-name column is an error.
pub fn prepare_items(
    table: &TableData,
    mapping: &ColumnMapping,
) -> Result<Vec<ClassificationItem>, ApiError> {
    let product_column = table.column_index(&mapping.product_name).ok_or_else(|| {
        ApiError::InvalidUpload(format!(
            "product name column '{}' not found in the file",
            mapping.product_name
        ))
    })?;

    let role_columns: Vec<(&'static str, usize)> = mapping
        .roles()
        .into_iter()
        .filter_map(|(role, source)| {
            let source = source?;
            let index = table.column_index(source)?;
            (index != product_column).then_some((role, index))
        })
        .collect();

    let mapped_indexes: Vec<usize> = std::iter::once(product_column)
        .chain(role_columns.iter().map(|&(_, index)| index))
        .collect();

    let mut items = Vec::new();
    for (row_index, row) in table.rows.iter().enumerate() {
        let product_name = row[product_column].trim();
        if product_name.is_empty() {
            continue;
        }

        let mut fields = BTreeMap::new();
        for &(role, index) in &role_columns {
            let value = row[index].trim();
            if !value.is_empty() {
                fields.insert(role.to_string(), value.to_string());
            }
        }

        // Unmapped columns pass through under their normalized names.
        for (index, header) in table.headers.iter().enumerate() {
            if mapped_indexes.contains(&index) {
                continue;
            }
            let value = row[index].trim();
            if value.is_empty() || PLACEHOLDER_VALUES.contains(&value.to_lowercase().as_str()) {
                continue;
            }
            fields.insert(normalize_key(header), value.to_string());
        }

        let mut item = ClassificationItem::new(row_index, product_name);
        item.fields = fields;
        items.push(item);
    }

    Ok(items)
}
