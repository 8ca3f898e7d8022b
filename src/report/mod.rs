//! Tabular reports and their export formats.
//!
//! Every report is built as a [`ReportTable`] first; the renderers in
//! [`csv_export`] and [`pdf_export`] only ever see that table.

pub mod csv_export;
pub mod pdf_export;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::error::AppError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReportKind {
    Sales,
    Inventory,
    Payroll,
    Deliveries,
    Attendance,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
    Pdf,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReportTable {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    pub fn new<H: Into<String>>(title: impl Into<String>, headers: impl IntoIterator<Item = H>) -> Self {
        Self {
            title: title.into(),
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a row. Short rows are padded so every row matches the header width.
    pub fn push_row(&mut self, cells: Vec<String>) {
        let mut cells = cells;
        cells.resize(self.headers.len(), String::new());
        self.rows.push(cells);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("pdf export failed: {0}")]
    Pdf(String),
}

impl From<ReportError> for AppError {
    fn from(e: ReportError) -> Self {
        AppError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_header_width() {
        let mut table = ReportTable::new("Stock", ["SKU", "Name", "Qty"]);
        table.push_row(vec!["CEM-40".into(), "Cement 40kg".into()]);
        assert_eq!(table.rows[0], vec!["CEM-40", "Cement 40kg", ""]);
    }

    #[test]
    fn kind_and_format_parse_from_path_and_query() {
        assert_eq!("deliveries".parse::<ReportKind>().unwrap(), ReportKind::Deliveries);
        assert!("profit".parse::<ReportKind>().is_err());

        let format: ReportFormat = serde_json::from_str(r#""pdf""#).unwrap();
        assert_eq!(format, ReportFormat::Pdf);
    }
}
