//! Row alignment between two tables.
//!
//! A comparison joins two tables on a reference column with a full outer join
//! and flags, for every joined row, whether the two compare columns hold the
//! same value. Neither input table is modified.

use crate::cell::CellValue;
use crate::error::Result;
use crate::table::{Column, Table};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MATCH_COLUMN: &str = "Match";
pub const LEFT_SUFFIX: &str = "_file1";
pub const RIGHT_SUFFIX: &str = "_file2";

/// Which columns of the two tables take part in a comparison.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CompareSpec {
    pub left_reference: String,
    pub right_reference: String,
    pub left_compare: String,
    pub right_compare: String,
}

/// Where a joined row found its reference value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinSide {
    Both,
    LeftOnly,
    RightOnly,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub reference: CellValue,
    pub left: CellValue,
    pub right: CellValue,
    pub matched: bool,
    pub side: JoinSide,
}

/// Outcome of one comparison. Built once, never mutated.
#[derive(Clone, Debug, Serialize)]
pub struct ComparisonResult {
    reference_name: String,
    left_name: String,
    right_name: String,
    rows: Vec<ComparisonRow>,
}

/// Hashable form of a reference value. Empty values have no key and never
/// join with anything.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub(crate) enum JoinKey {
    Number(u64),
    Text(String),
    Bool(bool),
}

impl JoinKey {
    pub(crate) fn of(value: &CellValue) -> Option<JoinKey> {
        match value {
            // -0.0 and 0.0 must land on the same key
            CellValue::Number(n) if *n == 0.0 => Some(JoinKey::Number(0f64.to_bits())),
            CellValue::Number(n) => Some(JoinKey::Number(n.to_bits())),
            CellValue::Text(s) => Some(JoinKey::Text(s.clone())),
            CellValue::Bool(b) => Some(JoinKey::Bool(*b)),
            CellValue::Empty => None,
        }
    }
}

/// Compare two tables
///
/// Performs a full outer join of `left` and `right` on the reference columns
/// named in `spec`. Left rows come first, in their original order, each
/// followed by all right rows sharing its reference value; right rows with no
/// counterpart are appended afterwards in their original order. A row whose
/// reference exists on one side only carries an empty compare value for the
/// other side and is never a match.
///
/// # Arguments
/// * `left`, `right` - The two tables with their display labels
/// * `spec` - Reference and compare column per table
///
/// # Returns
/// * `Result<ComparisonResult>` - The joined rows, or `ColumnNotFound`
pub fn compare(
    (left_label, left): (&str, &Table),
    (right_label, right): (&str, &Table),
    spec: &CompareSpec,
) -> Result<ComparisonResult> {
    let left_ref = &left.column(&spec.left_reference, left_label)?.values;
    let left_cmp = &left.column(&spec.left_compare, left_label)?.values;
    let right_ref = &right.column(&spec.right_reference, right_label)?.values;
    let right_cmp = &right.column(&spec.right_compare, right_label)?.values;

    let mut right_index: HashMap<JoinKey, Vec<usize>> = HashMap::new();
    for (i, value) in right_ref.iter().enumerate() {
        if let Some(key) = JoinKey::of(value) {
            right_index.entry(key).or_default().push(i);
        }
    }

    let mut right_used = vec![false; right.row_count()];
    let mut rows = Vec::with_capacity(left.row_count().max(right.row_count()));

    for (i, reference) in left_ref.iter().enumerate() {
        let partners = JoinKey::of(reference).and_then(|k| right_index.get(&k));
        match partners {
            Some(partners) => {
                for &j in partners {
                    right_used[j] = true;
                    rows.push(ComparisonRow {
                        reference: reference.clone(),
                        left: left_cmp[i].clone(),
                        right: right_cmp[j].clone(),
                        matched: left_cmp[i].matches(&right_cmp[j]),
                        side: JoinSide::Both,
                    });
                }
            }
            None => rows.push(ComparisonRow {
                reference: reference.clone(),
                left: left_cmp[i].clone(),
                right: CellValue::Empty,
                matched: false,
                side: JoinSide::LeftOnly,
            }),
        }
    }

    for (j, used) in right_used.iter().enumerate() {
        if !used {
            rows.push(ComparisonRow {
                reference: right_ref[j].clone(),
                left: CellValue::Empty,
                right: right_cmp[j].clone(),
                matched: false,
                side: JoinSide::RightOnly,
            });
        }
    }

    let result = ComparisonResult {
        reference_name: spec.left_reference.clone(),
        left_name: format!("{}{}", spec.left_compare, LEFT_SUFFIX),
        right_name: format!("{}{}", spec.right_compare, RIGHT_SUFFIX),
        rows,
    };
    log::info!(
        "compared '{}' with '{}': {} rows, {} mismatches",
        left_label,
        right_label,
        result.len(),
        result.mismatch_count()
    );
    Ok(result)
}

impl ComparisonResult {
    pub fn rows(&self) -> &[ComparisonRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn mismatch_count(&self) -> usize {
        self.rows.iter().filter(|r| !r.matched).count()
    }

    /// Every joined row as a four-column table: reference, both compare
    /// values and the match flag.
    pub fn to_table(&self) -> Table {
        self.build_table(|_| true)
    }

    /// Only the rows whose compare values differ or whose reference value
    /// has no counterpart.
    pub fn mismatches(&self) -> Table {
        self.build_table(|r| !r.matched)
    }

    /// Only the rows whose reference value exists in one table.
    pub fn discrepancies(&self) -> Table {
        self.build_table(|r| r.side != JoinSide::Both)
    }

    fn build_table(&self, keep: impl Fn(&ComparisonRow) -> bool) -> Table {
        let kept: Vec<&ComparisonRow> = self.rows.iter().filter(|r| keep(r)).collect();
        let column = |name: &str, pick: &dyn Fn(&ComparisonRow) -> CellValue| Column {
            name: name.to_string(),
            values: kept.iter().map(|&r| pick(r)).collect(),
        };
        let names = crate::table::unique_names(vec![
            self.reference_name.clone(),
            self.left_name.clone(),
            self.right_name.clone(),
            MATCH_COLUMN.to_string(),
        ]);
        let columns = vec![
            column(&names[0], &|r| r.reference.clone()),
            column(&names[1], &|r| r.left.clone()),
            column(&names[2], &|r| r.right.clone()),
            column(&names[3], &|r| CellValue::Bool(r.matched)),
        ];
        // all four columns have one value per kept row
        Table::from_columns(columns).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(ids: &[f64], scores: &[f64]) -> Table {
        Table::from_rows(
            vec!["ID".into(), "Score".into()],
            ids.iter()
                .zip(scores)
                .map(|(id, s)| vec![CellValue::Number(*id), CellValue::Number(*s)])
                .collect(),
        )
    }

    fn spec() -> CompareSpec {
        CompareSpec {
            left_reference: "ID".into(),
            right_reference: "ID".into(),
            left_compare: "Score".into(),
            right_compare: "Score".into(),
        }
    }

    #[test]
    fn scores_scenario() {
        let a = table(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0]);
        let b = table(&[1.0, 2.0, 4.0], &[10.0, 25.0, 40.0]);
        let result = compare(("a.xlsx", &a), ("b.xlsx", &b), &spec()).unwrap();

        let summary: Vec<(CellValue, bool)> = result
            .rows()
            .iter()
            .map(|r| (r.reference.clone(), r.matched))
            .collect();
        assert_eq!(
            summary,
            vec![
                (CellValue::Number(1.0), true),
                (CellValue::Number(2.0), false),
                (CellValue::Number(3.0), false),
                (CellValue::Number(4.0), false),
            ]
        );
        assert_eq!(result.mismatch_count(), 3);
        assert_eq!(result.rows()[2].right, CellValue::Empty);
        assert_eq!(result.rows()[3].left, CellValue::Empty);
        assert_eq!(result.rows()[3].reference, CellValue::Number(4.0));

        let full = result.to_table();
        assert_eq!(
            full.column_names(),
            vec!["ID", "Score_file1", "Score_file2", "Match"]
        );
        assert_eq!(full.row_count(), 4);
        assert_eq!(result.mismatches().row_count(), 3);
        assert_eq!(result.discrepancies().row_count(), 2);
    }

    #[test]
    fn duplicate_keys_join_many_to_many() {
        let a = table(&[1.0, 1.0], &[5.0, 6.0]);
        let b = table(&[1.0, 1.0], &[5.0, 7.0]);
        let result = compare(("a", &a), ("b", &b), &spec()).unwrap();
        assert_eq!(result.len(), 4);
        assert_eq!(result.mismatch_count(), 3);
    }

    #[test]
    fn text_and_number_never_match() {
        let a = Table::from_rows(
            vec!["K".into(), "V".into()],
            vec![vec!["x".into(), 1.0.into()]],
        );
        let b = Table::from_rows(
            vec!["K".into(), "V".into()],
            vec![vec!["x".into(), "1".into()]],
        );
        let spec = CompareSpec {
            left_reference: "K".into(),
            right_reference: "K".into(),
            left_compare: "V".into(),
            right_compare: "V".into(),
        };
        let result = compare(("a", &a), ("b", &b), &spec).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.rows()[0].side, JoinSide::Both);
        assert!(!result.rows()[0].matched);
    }

    #[test]
    fn empty_references_stay_unmatched() {
        let a = Table::from_rows(
            vec!["ID".into(), "Score".into()],
            vec![vec![CellValue::Empty, 1.0.into()]],
        );
        let b = a.clone();
        let result = compare(("a", &a), ("b", &b), &spec()).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.rows()[0].side, JoinSide::LeftOnly);
        assert_eq!(result.rows()[1].side, JoinSide::RightOnly);
    }

    #[test]
    fn unknown_column_is_reported() {
        let a = table(&[1.0], &[1.0]);
        let mut bad = spec();
        bad.right_compare = "Points".into();
        let err = compare(("a", &a), ("b", &a), &bad).unwrap_err();
        assert!(err.to_string().contains("Points"));
    }

    #[test]
    fn inputs_are_untouched() {
        let a = table(&[1.0, 2.0], &[1.0, 2.0]);
        let b = table(&[2.0], &[3.0]);
        let (a0, b0) = (a.clone(), b.clone());
        compare(("a", &a), ("b", &b), &spec()).unwrap();
        assert_eq!(a, a0);
        assert_eq!(b, b0);
    }
}
