//! Snippet executor.
//!
//! Snippets are written in a small pipeline language rather than a general
//! purpose one:
//!
//! ```text
//! # tables are addressed by the file name they were uploaded under
//! joined = table("orders.xlsx")
//!   | join table("customers.xlsx") on CustomerID left
//!   | filter [Order Total] > 100
//! result = joined | aggregate sum([Order Total]) as Total by Country
//! print result
//! ```
//!
//! A snippet is parsed completely before anything runs, and it runs on a
//! copy of the registry that replaces the live one only when every statement
//! succeeded.

pub mod eval;
pub mod lexer;
pub mod parser;

use crate::error::Result;
use crate::registry::TableRegistry;
use crate::table::Table;
use serde::Serialize;

pub use eval::{PRINT_ROWS, RESULT_VAR, SELECTED_VAR};

/// Reported when a snippet printed nothing.
pub const NO_OUTPUT: &str = "Code executed successfully. No output to show.";

/// What a successful run produced.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionOutcome {
    /// Everything the snippet printed, one entry per `print`.
    pub output: Vec<String>,
    /// The table left in `result`, if any.
    pub result: Option<Table>,
    /// Registry keys that were written.
    pub updated: Vec<String>,
}

impl ExecutionOutcome {
    /// Text shown to the user for this run.
    pub fn message(&self) -> String {
        if self.output.is_empty() {
            NO_OUTPUT.to_string()
        } else {
            self.output.join("\n")
        }
    }
}

/// Parse and run a snippet
///
/// # Arguments
/// * `snippet` - Source text of the snippet
/// * `registry` - Live registry; only replaced when the run succeeds
/// * `selected` - Registry key bound to `df`, for single-table flows
///
/// # Returns
/// * `Result<ExecutionOutcome>` - Printed output and result, or a
///   `SnippetSyntax`/`SnippetRuntime` error with the registry untouched
pub fn execute(
    snippet: &str,
    registry: &mut TableRegistry,
    selected: Option<&str>,
) -> Result<ExecutionOutcome> {
    let statements = parser::parse(snippet)?;
    let mut interpreter = eval::Interpreter::new(registry.clone(), selected)?;
    if let Err(err) = interpreter.run(&statements) {
        log::warn!("snippet failed: {}", err);
        return Err(err);
    }
    let finished = interpreter.finish();
    *registry = finished.registry;

    log::info!(
        "snippet ran {} statement(s), updated {:?}",
        statements.len(),
        finished.updated
    );
    Ok(ExecutionOutcome {
        output: finished.output,
        result: finished.result,
        updated: finished.updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValue;
    use crate::error::DashboardError;

    fn registry() -> TableRegistry {
        let mut registry = TableRegistry::new();
        let scores = |rows: &[(f64, f64)]| {
            Table::from_rows(
                vec!["ID".into(), "Score".into()],
                rows.iter()
                    .map(|(id, s)| vec![CellValue::Number(*id), CellValue::Number(*s)])
                    .collect(),
            )
        };
        registry.insert("a.xlsx", scores(&[(1.0, 10.0), (2.0, 20.0), (3.0, 30.0)]));
        registry.insert("b.xlsx", scores(&[(1.0, 10.0), (2.0, 25.0), (4.0, 40.0)]));
        registry
    }

    fn snapshot(registry: &TableRegistry) -> Vec<(String, Table)> {
        registry.iter().map(|(k, t)| (k.clone(), t.clone())).collect()
    }

    #[test]
    fn syntax_error_runs_nothing() {
        let mut registry = registry();
        let before = snapshot(&registry);
        let err = execute(
            "save \"a.xlsx\" = table(\"b.xlsx\")\nprint (table(\"a.xlsx\")",
            &mut registry,
            None,
        )
        .unwrap_err();
        match err {
            DashboardError::SnippetSyntax { line, ref text, .. } => {
                assert_eq!(line, 2);
                assert_eq!(text, "print (table(\"a.xlsx\")");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(snapshot(&registry), before);
    }

    #[test]
    fn runtime_error_leaves_registry_unchanged() {
        let mut registry = registry();
        let before = snapshot(&registry);
        let err = execute(
            "save \"a.xlsx\" = table(\"b.xlsx\")\nsave \"c.xlsx\" = table(\"missing.xlsx\")",
            &mut registry,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DashboardError::SnippetRuntime(_)));
        assert!(err.to_string().contains("line 2"));
        assert_eq!(snapshot(&registry), before);
    }

    #[test]
    fn nothing_printed_reports_success() {
        let mut registry = registry();
        let outcome = execute("x = table(\"a.xlsx\") | head 1", &mut registry, None).unwrap();
        assert_eq!(outcome.message(), NO_OUTPUT);
        assert!(outcome.result.is_none());
        assert!(outcome.updated.is_empty());
    }

    #[test]
    fn formula_on_selected_table_is_committed() {
        let mut registry = registry();
        let outcome = execute("df[Double] = [Score] * 2", &mut registry, Some("a.xlsx")).unwrap();
        assert_eq!(outcome.updated, vec!["a.xlsx"]);
        let table = registry.get("a.xlsx").unwrap();
        assert_eq!(table.column_names(), vec!["ID", "Score", "Double"]);
        assert_eq!(table.value(2, 2), &CellValue::Number(60.0));
    }

    #[test]
    fn comparison_snippet_prints_mismatches() {
        let mut registry = registry();
        let outcome = execute(
            "result = table(\"a.xlsx\")\n  | compare table(\"b.xlsx\") on ID = ID values Score = Score\n  | filter Match == false\nprint result | count",
            &mut registry,
            None,
        )
        .unwrap();
        assert_eq!(outcome.message(), "3");
        assert_eq!(outcome.result.unwrap().row_count(), 3);
    }

    #[test]
    fn unknown_selected_table_is_reported() {
        let mut registry = registry();
        let err = execute("print df", &mut registry, Some("zzz.xlsx")).unwrap_err();
        assert!(matches!(err, DashboardError::TableNotFound(_)));
    }

    #[test]
    fn deeply_nested_snippet_is_rejected_not_fatal() {
        let mut registry = registry();
        let before = snapshot(&registry);
        let depth = 20_000;
        let snippets = [
            format!("print {}1{}", "(".repeat(depth), ")".repeat(depth)),
            format!("x = table(\"a.xlsx\") | filter {}1 > 0", "-".repeat(depth)),
        ];
        for snippet in &snippets {
            let err = execute(snippet, &mut registry, Some("a.xlsx")).unwrap_err();
            assert!(matches!(err, DashboardError::SnippetSyntax { .. }), "{:?}", err);
        }
        assert_eq!(snapshot(&registry), before);

        // Depth just under the limit still evaluates
        let nested = format!("df[N] = {}[Score]{}", "-(".repeat(40), ")".repeat(40));
        execute(&nested, &mut registry, Some("a.xlsx")).unwrap();
        assert_eq!(registry.get("a.xlsx").unwrap().value(0, 2), &CellValue::Number(10.0));
    }
}
