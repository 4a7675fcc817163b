use crate::cell::CellValue;
use crate::error::{DashboardError, Result};
use serde::Serialize;
use std::collections::HashSet;

/// Rows shown in previews and prompt samples.
pub const PREVIEW_ROWS: usize = 5;

#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<CellValue>,
}

/// An in-memory dataset: ordered named columns of equal length.
#[derive(Clone, Serialize, Debug, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
    rows: usize,
}

/// Serializable snapshot of the first rows of a table.
#[derive(Serialize, Debug, Clone)]
pub struct TablePreview {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub row_count: usize,
    pub column_count: usize,
}

impl Table {
    /// Creates an empty table with the given column names.
    pub fn new(names: Vec<String>) -> Self {
        Table {
            columns: names
                .into_iter()
                .map(|name| Column {
                    name,
                    values: Vec::new(),
                })
                .collect(),
            rows: 0,
        }
    }

    /// Builds a table from row-major data. Short rows are padded with empty
    /// values and extra trailing values are dropped.
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let mut table = Table::new(names);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Builds a table from whole columns. All columns must have the same
    /// length.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map_or(0, |c| c.values.len());
        if let Some(bad) = columns.iter().find(|c| c.values.len() != rows) {
            return Err(DashboardError::InvalidRequest(format!(
                "column '{}' has {} values, expected {}",
                bad.name,
                bad.values.len(),
                rows
            )));
        }
        Ok(Table { columns, rows })
    }

    pub fn push_row(&mut self, mut row: Vec<CellValue>) {
        row.resize(self.columns.len(), CellValue::Empty);
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.values.push(value);
        }
        self.rows += 1;
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Looks up a column by name; `table_label` names the table in the error.
    pub fn column(&self, name: &str, table_label: &str) -> Result<&Column> {
        self.column_index(name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| self.missing_column(name, table_label))
    }

    pub fn missing_column(&self, name: &str, table_label: &str) -> DashboardError {
        DashboardError::ColumnNotFound {
            table: table_label.to_string(),
            column: name.to_string(),
            available: self.column_names().join(", "),
        }
    }

    pub fn value(&self, row: usize, col: usize) -> &CellValue {
        &self.columns[col].values[row]
    }

    pub fn row(&self, row: usize) -> Vec<CellValue> {
        self.columns.iter().map(|c| c.values[row].clone()).collect()
    }

    /// Replaces the values of `name`, or appends it as a new column.
    pub fn set_column(&mut self, name: &str, values: Vec<CellValue>) -> Result<()> {
        if values.len() != self.rows && !(self.columns.is_empty() && self.rows == 0) {
            return Err(DashboardError::InvalidRequest(format!(
                "column '{}' has {} values but the table has {} rows",
                name,
                values.len(),
                self.rows
            )));
        }
        if self.columns.is_empty() {
            self.rows = values.len();
        }
        match self.column_index(name) {
            Some(i) => self.columns[i].values = values,
            None => self.columns.push(Column {
                name: name.to_string(),
                values,
            }),
        }
        Ok(())
    }

    pub fn column_values_mut(&mut self, name: &str) -> Option<&mut Vec<CellValue>> {
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .map(|c| &mut c.values)
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        match self.columns.iter_mut().find(|c| c.name == from) {
            Some(column) => {
                column.name = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Keeps only the named columns, in the given order.
    pub fn select(&self, names: &[String]) -> Table {
        let columns = names
            .iter()
            .filter_map(|n| self.column_index(n))
            .map(|i| self.columns[i].clone())
            .collect();
        Table {
            columns,
            rows: self.rows,
        }
    }

    /// New table made of the rows at `indices`, in that order.
    pub fn take_rows(&self, indices: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                values: indices.iter().map(|&i| c.values[i].clone()).collect(),
            })
            .collect();
        Table {
            columns,
            rows: indices.len(),
        }
    }

    pub fn head(&self, n: usize) -> Table {
        let indices: Vec<usize> = (0..self.rows.min(n)).collect();
        self.take_rows(&indices)
    }

    pub fn preview(&self, n: usize) -> TablePreview {
        let shown = self.rows.min(n);
        TablePreview {
            columns: self.column_names(),
            rows: (0..shown).map(|r| self.row(r)).collect(),
            row_count: self.rows,
            column_count: self.columns.len(),
        }
    }

    /// Renders the first `max_rows` rows as a right-aligned text grid.
    pub fn render(&self, max_rows: usize) -> String {
        if self.columns.is_empty() {
            return "Empty table: no columns".to_string();
        }
        let shown = self.rows.min(max_rows);
        let cells: Vec<Vec<String>> = (0..shown)
            .map(|r| self.columns.iter().map(|c| c.values[r].to_string()).collect())
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                cells
                    .iter()
                    .map(|row| row[i].chars().count())
                    .chain(std::iter::once(c.name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:>w$}", c.name, w = *w))
            .collect();
        out.push_str(header.join(" ").trim_end());
        for row in &cells {
            out.push('\n');
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:>w$}", v, w = *w))
                .collect();
            out.push_str(line.join(" ").trim_end());
        }
        if self.rows > shown {
            out.push_str(&format!("\n... ({} more rows)", self.rows - shown));
        }
        out
    }
}

/// Makes raw header names usable as column names: blank names become
/// `Unnamed: {index}` and repeats get `.1`, `.2`, ... suffixes.
pub fn unique_names(raw: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut names = Vec::with_capacity(raw.len());
    for (i, name) in raw.into_iter().enumerate() {
        let base = match name.trim() {
            "" => format!("Unnamed: {}", i),
            trimmed => trimmed.to_string(),
        };
        let mut candidate = base.clone();
        let mut n = 1;
        while seen.contains(&candidate) {
            candidate = format!("{}.{}", base, n);
            n += 1;
        }
        seen.insert(candidate.clone());
        names.push(candidate);
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores() -> Table {
        Table::from_rows(
            vec!["ID".into(), "Score".into()],
            vec![
                vec![1.0.into(), 10.0.into()],
                vec![2.0.into(), 20.0.into()],
                vec![3.0.into()],
            ],
        )
    }

    #[test]
    fn short_rows_are_padded() {
        let table = scores();
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.value(2, 1), &CellValue::Empty);
    }

    #[test]
    fn missing_column_lists_available_names() {
        let table = scores();
        let err = table.column("Total", "a.xlsx").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Column 'Total' not found in a.xlsx (available: ID, Score)"
        );
    }

    #[test]
    fn set_column_replaces_or_appends() {
        let mut table = scores();
        table
            .set_column("Score", vec![1.0.into(), 2.0.into(), 3.0.into()])
            .unwrap();
        table
            .set_column("Flag", vec![true.into(), false.into(), true.into()])
            .unwrap();
        assert_eq!(table.column_names(), vec!["ID", "Score", "Flag"]);
        assert_eq!(table.value(2, 1), &CellValue::Number(3.0));
        assert!(table.set_column("Bad", vec![1.0.into()]).is_err());
    }

    #[test]
    fn head_and_take_rows() {
        let table = scores();
        assert_eq!(table.head(2).row_count(), 2);
        assert_eq!(table.head(10).row_count(), 3);
        let picked = table.take_rows(&[2, 0]);
        assert_eq!(picked.value(0, 0), &CellValue::Number(3.0));
        assert_eq!(picked.value(1, 0), &CellValue::Number(1.0));
    }

    #[test]
    fn render_aligns_columns() {
        let rendered = scores().render(2);
        assert_eq!(rendered, "ID Score\n 1    10\n 2    20\n... (1 more rows)");
    }

    #[test]
    fn unique_names_handles_blanks_and_duplicates() {
        let names = unique_names(vec![
            "ID".into(),
            "".into(),
            "ID".into(),
            "ID".into(),
            " Name ".into(),
        ]);
        assert_eq!(names, vec!["ID", "Unnamed: 1", "ID.1", "ID.2", "Name"]);
    }
}
