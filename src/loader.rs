use crate::cell::CellValue;
use crate::error::{DashboardError, Result};
use crate::table::{Table, unique_names};
use calamine::{Data, Reader, open_workbook_auto_from_rs};
use csv::ReaderBuilder;
use std::io::Cursor;
use std::path::Path;

/// Raw row index that holds the column names of an uploaded sheet. The two
/// rows above it are title/banner rows and are discarded.
pub const HEADER_ROW: usize = 2;

/// Load an uploaded spreadsheet into a table
///
/// The sheet is read without headers, row index 2 supplies the column names
/// and every row after it is data, so the table has `total_rows - 3` rows.
/// Blank header entries become `Unnamed: {i}` and repeated names are made
/// distinct with a numeric suffix.
///
/// # Arguments
/// * `file_name` - Name the file was uploaded under; its extension selects the reader
/// * `bytes` - Raw file content
///
/// # Returns
/// * `Result<Table>` - The loaded table, or a `Load` error
///
/// # Examples
/// ```
/// use sheet_dashboard::loader::load_table;
///
/// let csv = "Report\nQ1\nID,Score\n1,10\n2,20\n";
/// let table = load_table("scores.csv", csv.as_bytes()).unwrap();
/// assert_eq!(table.column_names(), vec!["ID", "Score"]);
/// assert_eq!(table.row_count(), 2);
/// ```
pub fn load_table(file_name: &str, bytes: &[u8]) -> Result<Table> {
    load_table_with_header(file_name, bytes, HEADER_ROW)
}

/// Load a table whose column names sit on raw row `header_row`
///
/// `load_table` is this function with the upload convention of header row 2.
/// Exported files put their header on row 0.
pub fn load_table_with_header(file_name: &str, bytes: &[u8], header_row: usize) -> Result<Table> {
    let grid = read_rows(file_name, bytes)?;

    if grid.len() <= header_row {
        return Err(DashboardError::load(
            file_name,
            format!(
                "expected the header on row {} but the sheet has only {} row(s)",
                header_row + 1,
                grid.len()
            ),
        ));
    }

    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    let mut header: Vec<String> = grid[header_row].iter().map(|v| v.to_string()).collect();
    header.resize(width, String::new());

    if header.iter().all(|h| h.trim().is_empty()) {
        return Err(DashboardError::load(
            file_name,
            format!("header row {} is blank", header_row + 1),
        ));
    }

    let names = unique_names(header);
    let rows = grid.into_iter().skip(header_row + 1).collect();
    let table = Table::from_rows(names, rows);

    log::debug!(
        "loaded '{}': {} rows x {} columns",
        file_name,
        table.row_count(),
        table.column_count()
    );
    Ok(table)
}

/// Read the first sheet of a file as a headerless grid of values
///
/// Row and column positions are absolute: empty leading rows and columns are
/// kept, so index 2 is always the sheet's third row.
pub fn read_rows(file_name: &str, bytes: &[u8]) -> Result<Vec<Vec<CellValue>>> {
    match extension(file_name).as_deref() {
        Some("csv") => read_csv_rows(file_name, bytes),
        _ => read_workbook_rows(file_name, bytes),
    }
}

fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

fn read_workbook_rows(file_name: &str, bytes: &[u8]) -> Result<Vec<Vec<CellValue>>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| DashboardError::load(file_name, format!("not a valid spreadsheet: {}", e)))?;

    // Get the first worksheet
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| DashboardError::load(file_name, "no sheets found"))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| DashboardError::load(file_name, e.to_string()))?;

    let (first_row, first_col) = match range.start() {
        Some((r, c)) => (r as usize, c as usize),
        None => return Ok(Vec::new()),
    };

    let mut grid: Vec<Vec<CellValue>> = vec![Vec::new(); first_row];
    for row in range.rows() {
        let mut values = vec![CellValue::Empty; first_col];
        values.extend(row.iter().map(cell_from_data));
        grid.push(values);
    }
    Ok(grid)
}

fn cell_from_data(cell: &Data) -> CellValue {
    match cell {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::number(*f),
        Data::String(s) if s.trim().is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::Error(_) | Data::Empty => CellValue::Empty,
        // Dates and durations keep their textual form
        other => CellValue::Text(other.to_string()),
    }
}

fn read_csv_rows(file_name: &str, bytes: &[u8]) -> Result<Vec<Vec<CellValue>>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| DashboardError::load(file_name, format!("not valid UTF-8 text: {}", e)))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    // The reader skips blank lines; put them back so row indexes stay absolute
    let mut rows: Vec<Vec<CellValue>> = Vec::new();
    let mut next_line: u64 = 1;
    for result in reader.records() {
        let record = result.map_err(|e| DashboardError::load(file_name, e.to_string()))?;
        let line = record.position().map_or(next_line, |p| p.line());
        while next_line < line {
            rows.push(Vec::new());
            next_line += 1;
        }
        let embedded: usize = record.iter().map(|field| field.matches('\n').count()).sum();
        next_line = line + 1 + embedded as u64;
        rows.push(record.iter().map(CellValue::from_text).collect());
    }

    // Trailing blank lines are not rows
    while rows
        .last()
        .is_some_and(|row| row.iter().all(CellValue::is_empty))
    {
        rows.pop();
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    fn report_xlsx() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Quarterly report").unwrap();
        sheet.write_string(1, 0, "Generated 2024-01-01").unwrap();
        sheet.write_string(2, 0, "ID").unwrap();
        sheet.write_string(2, 1, "Name").unwrap();
        sheet.write_string(2, 2, "Score").unwrap();
        let data = [(1.0, "ann", 10.0), (2.0, "bob", 20.0), (3.0, "cy", 30.0), (4.0, "di", 40.0)];
        for (i, (id, name, score)) in data.iter().enumerate() {
            let row = 3 + i as u32;
            sheet.write_number(row, 0, *id).unwrap();
            sheet.write_string(row, 1, *name).unwrap();
            sheet.write_number(row, 2, *score).unwrap();
        }
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn xlsx_header_comes_from_third_row() {
        let bytes = report_xlsx();
        let raw = read_rows("report.xlsx", &bytes).unwrap();
        let table = load_table("report.xlsx", &bytes).unwrap();

        let expected: Vec<String> = raw[2].iter().map(|v| v.to_string()).collect();
        assert_eq!(table.column_names(), expected);
        assert_eq!(table.row_count(), raw.len() - 3);
        assert_eq!(table.value(0, 0), &CellValue::Number(1.0));
        assert_eq!(table.value(3, 1), &CellValue::text("di"));
    }

    #[test]
    fn leading_empty_rows_keep_their_position() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        // nothing on rows 0 and 1
        sheet.write_string(2, 1, "Key").unwrap();
        sheet.write_number(3, 1, 7.0).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let table = load_table("sparse.xlsx", &bytes).unwrap();
        assert_eq!(table.column_names(), vec!["Unnamed: 0", "Key"]);
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.value(0, 1), &CellValue::Number(7.0));
    }

    #[test]
    fn csv_uses_the_same_header_convention() {
        let csv = "Title\n\nID,\"Full, Name\",ID\n1,\"say \"\"hi\"\"\",9\n2,bo,8\n\n";
        let table = load_table("people.csv", csv.as_bytes()).unwrap();
        assert_eq!(table.column_names(), vec!["ID", "Full, Name", "ID.1"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.value(0, 1), &CellValue::text("say \"hi\""));
    }

    #[test]
    fn csv_quoted_newlines_stay_in_one_field() {
        let csv = "Title\nSub\nID,Note\n1,\"two\nlines\"\n2,plain\n";
        let table = load_table("notes.csv", csv.as_bytes()).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.value(0, 1), &CellValue::text("two\nlines"));
        assert_eq!(table.value(1, 0), &CellValue::Number(2.0));

        // A blank line after a multi-line record still counts as a row
        let csv = "Title\n\"a\nb\"\n\nID\n5\n";
        let raw = read_rows("gap.csv", csv.as_bytes()).unwrap();
        assert_eq!(raw.len(), 5);
        assert_eq!(raw[3], vec![CellValue::text("ID")]);
        let table = load_table_with_header("gap.csv", csv.as_bytes(), 3).unwrap();
        assert_eq!(table.value(0, 0), &CellValue::Number(5.0));
    }

    #[test]
    fn short_files_are_rejected() {
        let err = load_table("short.csv", b"a\nb\n").unwrap_err();
        assert!(matches!(err, DashboardError::Load { .. }));
        assert!(err.to_string().contains("only 2 row(s)"));
    }

    #[test]
    fn blank_header_row_is_rejected() {
        let err = load_table("blank.csv", b"t\nu\n,,\n1,2,3\n").unwrap_err();
        assert!(err.to_string().contains("blank"));
    }

    #[test]
    fn garbage_is_not_a_spreadsheet() {
        let err = load_table("junk.xlsx", b"definitely not a zip archive").unwrap_err();
        assert!(matches!(err, DashboardError::Load { .. }));
    }

    #[test]
    fn exported_files_reload_with_header_on_first_row() {
        let csv = "ID,Score\n1,10\n";
        let table = load_table_with_header("plain.csv", csv.as_bytes(), 0).unwrap();
        assert_eq!(table.column_names(), vec!["ID", "Score"]);
        assert_eq!(table.row_count(), 1);
    }
}
