use crate::cell::CellValue;
use crate::error::Result;
use crate::table::Table;
use serde::{Deserialize, Serialize};

/// Text clean-ups offered for a single column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatOption {
    Uppercase,
    Lowercase,
    Titlecase,
    #[serde(rename = "Strip Spaces", alias = "StripSpaces")]
    StripSpaces,
}

impl FormatOption {
    pub fn from_strng(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "uppercase" | "upper" => Some(FormatOption::Uppercase),
            "lowercase" | "lower" => Some(FormatOption::Lowercase),
            "titlecase" | "title" => Some(FormatOption::Titlecase),
            "strip spaces" | "stripspaces" | "strip" => Some(FormatOption::StripSpaces),
            _ => None,
        }
    }

    pub fn apply(&self, text: &str) -> String {
        match self {
            FormatOption::Uppercase => text.to_uppercase(),
            FormatOption::Lowercase => text.to_lowercase(),
            FormatOption::Titlecase => title_case(text),
            FormatOption::StripSpaces => text.trim().to_string(),
        }
    }
}

/// Uppercases the first letter of every run of letters and lowercases the
/// rest, so "o'neil mcdonald-smith" becomes "O'Neil Mcdonald-Smith".
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// Format one value. Anything non-empty is converted to text first; empty
/// cells stay empty.
pub fn format_value(value: &CellValue, option: FormatOption) -> CellValue {
    match value {
        CellValue::Empty => CellValue::Empty,
        other => CellValue::Text(option.apply(&other.to_string())),
    }
}

/// Format a column of `table` in place.
pub fn format_column(table: &mut Table, column: &str, option: FormatOption) -> Result<()> {
    if !table.has_column(column) {
        return Err(table.missing_column(column, "the selected table"));
    }
    if let Some(values) = table.column_values_mut(column) {
        for value in values.iter_mut() {
            *value = format_value(value, option);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Table {
        Table::from_rows(
            vec!["Name".into()],
            vec![
                vec!["  alice SMITH ".into()],
                vec![42.0.into()],
                vec![CellValue::Empty],
            ],
        )
    }

    #[test]
    fn each_option_transforms_text() {
        let cases = [
            (FormatOption::Uppercase, "  ALICE SMITH "),
            (FormatOption::Lowercase, "  alice smith "),
            (FormatOption::Titlecase, "  Alice Smith "),
            (FormatOption::StripSpaces, "alice SMITH"),
        ];
        for (option, expected) in cases {
            let mut table = names();
            format_column(&mut table, "Name", option).unwrap();
            assert_eq!(table.value(0, 0), &CellValue::text(expected), "{:?}", option);
            assert_eq!(table.value(1, 0), &CellValue::text("42"));
            assert_eq!(table.value(2, 0), &CellValue::Empty);
        }
    }

    #[test]
    fn uppercase_is_idempotent() {
        let mut once = names();
        format_column(&mut once, "Name", FormatOption::Uppercase).unwrap();
        let mut twice = once.clone();
        format_column(&mut twice, "Name", FormatOption::Uppercase).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn title_case_restarts_after_punctuation() {
        assert_eq!(title_case("o'neil mcdonald-smith"), "O'Neil Mcdonald-Smith");
        assert_eq!(title_case("HELLO wORLD"), "Hello World");
    }

    #[test]
    fn options_parse_from_labels() {
        assert_eq!(FormatOption::from_strng("Strip Spaces"), Some(FormatOption::StripSpaces));
        assert_eq!(FormatOption::from_strng("Titlecase"), Some(FormatOption::Titlecase));
        assert_eq!(FormatOption::from_strng("bold"), None);
    }

    #[test]
    fn unknown_column_is_an_error() {
        let mut table = names();
        assert!(format_column(&mut table, "Nope", FormatOption::Lowercase).is_err());
    }
}
