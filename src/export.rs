use crate::cell::CellValue;
use crate::error::{DashboardError, Result};
use crate::table::Table;
use csv::WriterBuilder;
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use serde::Deserialize;

/// Sheet name used for every exported workbook.
pub const SHEET_NAME: &str = "Sheet1";

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Convert a table to XLSX format
///
/// Writes a single worksheet named `Sheet1`: the column names in bold on the
/// first row, then one row per table row. Numbers, text and booleans keep
/// their cell types; empty values are left blank.
///
/// # Arguments
/// * `table` - The table to export
///
/// # Returns
/// * `Result<Vec<u8>>` - XLSX file content, or an `Export` error
///
/// # Examples
/// ```
/// use sheet_dashboard::export::to_xlsx;
/// use sheet_dashboard::table::Table;
///
/// let table = Table::from_rows(vec!["ID".into()], vec![vec![1.0.into()]]);
/// let bytes = to_xlsx(&table).unwrap();
/// assert!(bytes.starts_with(b"PK"));
/// ```
pub fn to_xlsx(table: &Table) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(SHEET_NAME)?;
    let header = Format::new().set_bold();

    for (c, column) in table.columns().iter().enumerate() {
        let col = u16::try_from(c).map_err(|_| {
            DashboardError::Export(format!(
                "{} columns do not fit in a worksheet",
                table.column_count()
            ))
        })?;
        worksheet.write_string_with_format(0, col, &column.name, &header)?;
        for (r, value) in column.values.iter().enumerate() {
            let row = u32::try_from(r + 1).map_err(|_| {
                DashboardError::Export(format!("{} rows do not fit in a worksheet", table.row_count()))
            })?;
            match value {
                CellValue::Number(n) => {
                    worksheet.write_number(row, col, *n)?;
                }
                CellValue::Text(s) => {
                    worksheet.write_string(row, col, s)?;
                }
                CellValue::Bool(b) => {
                    worksheet.write_boolean(row, col, *b)?;
                }
                CellValue::Empty => {}
            }
        }
    }

    workbook.push_worksheet(worksheet);
    Ok(workbook.save_to_buffer()?)
}

pub const CSV_MIME: &str = "text/csv; charset=utf-8";

/// File formats a table can be downloaded in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ExportFormat {
    /// Picks the format from a file name's extension, defaulting to xlsx.
    pub fn from_path(path: &str) -> Self {
        if path.to_lowercase().ends_with(".csv") {
            ExportFormat::Csv
        } else {
            ExportFormat::Xlsx
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ExportFormat::Xlsx => XLSX_MIME,
            ExportFormat::Csv => CSV_MIME,
        }
    }

    pub fn write(self, table: &Table) -> Result<Vec<u8>> {
        match self {
            ExportFormat::Xlsx => to_xlsx(table),
            ExportFormat::Csv => to_csv(table).map(String::into_bytes),
        }
    }
}

/// Convert a table to CSV text with a header row of column names.
pub fn to_csv(table: &Table) -> Result<String> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(table.column_names())?;
    for r in 0..table.row_count() {
        writer.write_record(table.columns().iter().map(|c| c.values[r].to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| DashboardError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| DashboardError::Export(e.to_string()))
}

/// Download name for an export: the format's extension is appended unless
/// already present, and path separators are replaced.
pub fn download_name(requested: Option<&str>, fallback: &str, format: ExportFormat) -> String {
    let base = requested
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(fallback);
    let cleaned: String = base
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '"') { '_' } else { c })
        .collect();
    let extension = format!(".{}", format.extension());
    if cleaned.to_lowercase().ends_with(&extension) {
        cleaned
    } else {
        format!("{}{}", cleaned, extension)
    }
}
