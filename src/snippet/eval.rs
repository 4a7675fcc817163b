use super::parser::{
    AggFunc, Aggregation, BinOp, Expr, Func, JoinHow, Pipeline, Source, Statement, StatementKind,
    UnOp, Verb,
};
use crate::cell::CellValue;
use crate::compare::{self, CompareSpec, JoinKey};
use crate::error::{DashboardError, Result};
use crate::format::{FormatOption, format_column, format_value};
use crate::registry::TableRegistry;
use crate::table::{Column, Table, unique_names};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Rows shown when a table is printed.
pub const PRINT_ROWS: usize = 50;

/// Name bound to the selected table in single-table flows.
pub const SELECTED_VAR: &str = "df";

/// Variable whose table becomes the outcome of a run.
pub const RESULT_VAR: &str = "result";

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Table(Table),
    Scalar(CellValue),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Table(_) => "table",
            Value::Scalar(v) => v.type_name(),
        }
    }
}

/// Runs parsed statements against a private copy of the registry.
pub struct Interpreter {
    registry: TableRegistry,
    selected: Option<String>,
    vars: HashMap<String, Value>,
    output: Vec<String>,
    saved: Vec<String>,
}

/// What a finished run hands back for committing.
pub struct Finished {
    pub registry: TableRegistry,
    pub output: Vec<String>,
    pub result: Option<Table>,
    pub updated: Vec<String>,
}

fn at_line(line: usize, err: DashboardError) -> DashboardError {
    match err {
        DashboardError::SnippetRuntime(message) => {
            DashboardError::runtime(format!("line {}: {}", line, message))
        }
        other => DashboardError::runtime(format!("line {}: {}", line, other)),
    }
}

impl Interpreter {
    pub fn new(registry: TableRegistry, selected: Option<&str>) -> Result<Self> {
        let mut vars = HashMap::new();
        if let Some(key) = selected {
            vars.insert(
                SELECTED_VAR.to_string(),
                Value::Table(registry.get(key)?.clone()),
            );
        }
        Ok(Interpreter {
            registry,
            selected: selected.map(str::to_string),
            vars,
            output: Vec::new(),
            saved: Vec::new(),
        })
    }

    pub fn run(&mut self, statements: &[Statement]) -> Result<()> {
        for statement in statements {
            self.statement(statement)?;
        }
        Ok(())
    }

    /// Writes `df` back to the selected key and hands over the working copy.
    pub fn finish(mut self) -> Finished {
        if let (Some(key), Some(Value::Table(table))) =
            (self.selected.as_ref(), self.vars.remove(SELECTED_VAR))
        {
            self.registry.insert(key.clone(), table);
            if !self.saved.contains(key) {
                self.saved.push(key.clone());
            }
        }
        let result = match self.vars.remove(RESULT_VAR) {
            Some(Value::Table(table)) => Some(table),
            _ => None,
        };
        Finished {
            registry: self.registry,
            output: self.output,
            result,
            updated: self.saved,
        }
    }

    fn statement(&mut self, statement: &Statement) -> Result<()> {
        let line = statement.line;
        match &statement.kind {
            StatementKind::Assign { name, value } => {
                let value = self.pipeline(value, line)?;
                self.vars.insert(name.clone(), value);
            }
            StatementKind::Print(pipeline) => {
                let text = match self.pipeline(pipeline, line)? {
                    Value::Table(table) => table.render(PRINT_ROWS),
                    Value::Scalar(CellValue::Empty) => "null".to_string(),
                    Value::Scalar(value) => value.to_string(),
                };
                self.output.push(text);
            }
            StatementKind::Save { key, value } => match self.pipeline(value, line)? {
                Value::Table(table) => {
                    log::debug!("snippet saved table '{}'", key);
                    self.registry.insert(key.clone(), table.clone());
                    if self.selected.as_deref() == Some(key.as_str()) {
                        self.vars.insert(SELECTED_VAR.to_string(), Value::Table(table));
                    }
                    if !self.saved.contains(key) {
                        self.saved.push(key.clone());
                    }
                }
                other => {
                    return Err(at_line(
                        line,
                        DashboardError::runtime(format!(
                            "only tables can be saved, got a {}",
                            other.kind()
                        )),
                    ));
                }
            },
            StatementKind::AssignColumn {
                target,
                column,
                expr,
            } => {
                let mut table = match self.vars.get(target) {
                    Some(Value::Table(table)) => table.clone(),
                    Some(other) => {
                        return Err(at_line(
                            line,
                            DashboardError::runtime(format!(
                                "'{}' is a {}, not a table",
                                target,
                                other.kind()
                            )),
                        ));
                    }
                    None => return Err(at_line(line, self.undefined(target))),
                };
                let values = eval_column(expr, &table, target).map_err(|e| at_line(line, e))?;
                table
                    .set_column(column, values)
                    .map_err(|e| at_line(line, e))?;
                self.vars.insert(target.clone(), Value::Table(table));
            }
        }
        Ok(())
    }

    fn undefined(&self, name: &str) -> DashboardError {
        if name == SELECTED_VAR && self.selected.is_none() {
            DashboardError::runtime(
                "'df' is only bound when a table is selected; use table(\"name\") instead",
            )
        } else {
            DashboardError::runtime(format!("name '{}' is not defined", name))
        }
    }

    fn source(&self, source: &Source) -> Result<(Value, String)> {
        match source {
            Source::Registry(key) => Ok((Value::Table(self.registry.get(key)?.clone()), key.clone())),
            Source::Variable(name) => self
                .vars
                .get(name)
                .map(|v| (v.clone(), name.clone()))
                .ok_or_else(|| self.undefined(name)),
            Source::Literal(value) => Ok((Value::Scalar(value.clone()), "literal".to_string())),
        }
    }

    fn source_table(&self, source: &Source) -> Result<(Table, String)> {
        match self.source(source)? {
            (Value::Table(table), label) => Ok((table, label)),
            (other, label) => Err(DashboardError::runtime(format!(
                "'{}' is a {}, not a table",
                label,
                other.kind()
            ))),
        }
    }

    fn pipeline(&self, pipeline: &Pipeline, line: usize) -> Result<Value> {
        let (mut value, label) = self.source(&pipeline.source).map_err(|e| at_line(line, e))?;
        for step in &pipeline.verbs {
            let table = match value {
                Value::Table(table) => table,
                other => {
                    return Err(at_line(
                        step.line,
                        DashboardError::runtime(format!(
                            "'{}' needs a table, got a {}",
                            step.verb.name(),
                            other.kind()
                        )),
                    ));
                }
            };
            value = self
                .apply(&step.verb, table, &label)
                .map_err(|e| at_line(step.line, e))?;
        }
        Ok(value)
    }

    fn apply(&self, verb: &Verb, table: Table, label: &str) -> Result<Value> {
        let out = match verb {
            Verb::Filter(expr) => {
                check_columns(&table, expr, label)?;
                let mut keep = Vec::new();
                for row in 0..table.row_count() {
                    if truthy(&eval(expr, &table, row)?)? {
                        keep.push(row);
                    }
                }
                table.take_rows(&keep)
            }
            Verb::Map { column, expr } => {
                let values = eval_column(expr, &table, label)?;
                let mut table = table;
                table.set_column(column, values)?;
                table
            }
            Verb::Select(names) => {
                for name in names {
                    table.column(name, label)?;
                }
                table.select(names)
            }
            Verb::Drop(names) => {
                for name in names {
                    table.column(name, label)?;
                }
                let kept: Vec<String> = table
                    .column_names()
                    .into_iter()
                    .filter(|n| !names.contains(n))
                    .collect();
                table.select(&kept)
            }
            Verb::Rename(pairs) => {
                let mut table = table;
                for (from, to) in pairs {
                    table.column(from, label)?;
                    if from != to && table.has_column(to) {
                        return Err(DashboardError::runtime(format!(
                            "cannot rename '{}' to '{}': that column already exists",
                            from, to
                        )));
                    }
                    table.rename_column(from, to);
                }
                table
            }
            Verb::Sort { column, descending } => {
                let values = &table.column(column, label)?.values;
                let mut order: Vec<usize> = (0..table.row_count()).collect();
                order.sort_by(|&a, &b| sort_order(&values[a], &values[b], *descending));
                table.take_rows(&order)
            }
            Verb::Head(n) => table.head(*n),
            Verb::Join {
                other,
                left_on,
                right_on,
                how,
            } => {
                let (right, right_label) = self.source_table(other)?;
                join(&table, label, &right, &right_label, left_on, right_on, *how)?
            }
            Verb::Aggregate { aggregations, by } => aggregate(&table, label, aggregations, by)?,
            Verb::Compare {
                other,
                left_reference,
                right_reference,
                left_compare,
                right_compare,
            } => {
                let (right, right_label) = self.source_table(other)?;
                let spec = CompareSpec {
                    left_reference: left_reference.clone(),
                    right_reference: right_reference.clone(),
                    left_compare: left_compare.clone(),
                    right_compare: right_compare.clone(),
                };
                compare::compare((label, &table), (&right_label, &right), &spec)?.to_table()
            }
            Verb::Format { column, option } => {
                table.column(column, label)?;
                let mut table = table;
                format_column(&mut table, column, *option)?;
                table
            }
            Verb::Count => return Ok(Value::Scalar(CellValue::Number(table.row_count() as f64))),
        };
        Ok(Value::Table(out))
    }
}

fn check_columns(table: &Table, expr: &Expr, label: &str) -> Result<()> {
    for name in expr.columns() {
        table.column(name, label)?;
    }
    Ok(())
}

/// Evaluate `expr` once per row of `table`.
fn eval_column(expr: &Expr, table: &Table, label: &str) -> Result<Vec<CellValue>> {
    check_columns(table, expr, label)?;
    (0..table.row_count())
        .map(|row| eval(expr, table, row))
        .collect()
}

// Ascending puts empty values last; descending keeps them last too.
fn sort_order(a: &CellValue, b: &CellValue, descending: bool) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ if descending => b.sort_cmp(a),
        _ => a.sort_cmp(b),
    }
}

fn truthy(value: &CellValue) -> Result<bool> {
    match value {
        CellValue::Bool(b) => Ok(*b),
        CellValue::Empty => Ok(false),
        other => Err(DashboardError::runtime(format!(
            "expected a true/false condition, got {} '{}'",
            other.type_name(),
            other
        ))),
    }
}

fn number_arg(value: &CellValue, what: &str) -> Result<Option<f64>> {
    match value {
        CellValue::Number(n) => Ok(Some(*n)),
        CellValue::Empty => Ok(None),
        other => Err(DashboardError::runtime(format!(
            "{} needs a number, got {} '{}'",
            what,
            other.type_name(),
            other
        ))),
    }
}

pub(crate) fn eval(expr: &Expr, table: &Table, row: usize) -> Result<CellValue> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Column(name) => match table.column_index(name) {
            Some(col) => Ok(table.value(row, col).clone()),
            None => Err(table.missing_column(name, "the table")),
        },
        Expr::Unary(UnOp::Neg, inner) => {
            let value = eval(inner, table, row)?;
            Ok(number_arg(&value, "'-'")?.map_or(CellValue::Empty, |n| CellValue::number(-n)))
        }
        Expr::Unary(UnOp::Not, inner) => Ok(CellValue::Bool(!truthy(&eval(inner, table, row)?)?)),
        Expr::Binary(BinOp::And, lhs, rhs) => {
            if !truthy(&eval(lhs, table, row)?)? {
                return Ok(CellValue::Bool(false));
            }
            Ok(CellValue::Bool(truthy(&eval(rhs, table, row)?)?))
        }
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            if truthy(&eval(lhs, table, row)?)? {
                return Ok(CellValue::Bool(true));
            }
            Ok(CellValue::Bool(truthy(&eval(rhs, table, row)?)?))
        }
        Expr::Binary(op, lhs, rhs) => {
            let a = eval(lhs, table, row)?;
            let b = eval(rhs, table, row)?;
            binary(*op, &a, &b)
        }
        Expr::Call(func, args) => {
            let values = args
                .iter()
                .map(|arg| eval(arg, table, row))
                .collect::<Result<Vec<_>>>()?;
            call(*func, &values)
        }
    }
}

fn binary(op: BinOp, a: &CellValue, b: &CellValue) -> Result<CellValue> {
    use CellValue::{Empty, Number, Text};
    match op {
        BinOp::Concat => Ok(Text(format!("{}{}", a, b))),
        BinOp::Eq => Ok(CellValue::Bool(a == b)),
        BinOp::Ne => Ok(CellValue::Bool(a != b)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (a, b) {
                (Empty, _) | (_, Empty) => return Ok(CellValue::Bool(false)),
                (Number(x), Number(y)) => x.partial_cmp(y),
                (Text(x), Text(y)) => Some(x.cmp(y)),
                (CellValue::Bool(x), CellValue::Bool(y)) => Some(x.cmp(y)),
                _ => {
                    return Err(DashboardError::runtime(format!(
                        "cannot compare {} '{}' with {} '{}'",
                        a.type_name(),
                        a,
                        b.type_name(),
                        b
                    )));
                }
            };
            let holds = ordering.is_some_and(|o| match op {
                BinOp::Lt => o == Ordering::Less,
                BinOp::Le => o != Ordering::Greater,
                BinOp::Gt => o == Ordering::Greater,
                _ => o != Ordering::Less,
            });
            Ok(CellValue::Bool(holds))
        }
        BinOp::Add => match (a, b) {
            (Empty, _) | (_, Empty) => Ok(Empty),
            (Number(x), Number(y)) => Ok(CellValue::number(x + y)),
            (Text(x), Text(y)) => Ok(Text(format!("{}{}", x, y))),
            _ => Err(DashboardError::runtime(format!(
                "cannot add {} '{}' and {} '{}' (use & to join as text)",
                a.type_name(),
                a,
                b.type_name(),
                b
            ))),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div => {
            let symbol = match op {
                BinOp::Sub => "'-'",
                BinOp::Mul => "'*'",
                _ => "'/'",
            };
            let (x, y) = match (number_arg(a, symbol)?, number_arg(b, symbol)?) {
                (Some(x), Some(y)) => (x, y),
                _ => return Ok(Empty),
            };
            Ok(match op {
                BinOp::Sub => CellValue::number(x - y),
                BinOp::Mul => CellValue::number(x * y),
                _ if y == 0.0 => Empty,
                _ => CellValue::number(x / y),
            })
        }
        BinOp::And => Ok(CellValue::Bool(truthy(a)? && truthy(b)?)),
        BinOp::Or => Ok(CellValue::Bool(truthy(a)? || truthy(b)?)),
    }
}

fn call(func: Func, args: &[CellValue]) -> Result<CellValue> {
    let text_fn = |option: FormatOption| format_value(&args[0], option);
    Ok(match func {
        Func::Upper => text_fn(FormatOption::Uppercase),
        Func::Lower => text_fn(FormatOption::Lowercase),
        Func::Title => text_fn(FormatOption::Titlecase),
        Func::Strip => text_fn(FormatOption::StripSpaces),
        Func::Len => match &args[0] {
            CellValue::Empty => CellValue::Empty,
            other => CellValue::Number(other.to_string().chars().count() as f64),
        },
        Func::Abs => number_arg(&args[0], "abs()")?.map_or(CellValue::Empty, |n| CellValue::number(n.abs())),
        Func::Round => {
            let digits = match args.get(1) {
                Some(d) => number_arg(d, "round() digits")?.unwrap_or(0.0),
                None => 0.0,
            };
            match number_arg(&args[0], "round()")? {
                Some(n) => {
                    let scale = 10f64.powi(digits as i32);
                    CellValue::number((n * scale).round() / scale)
                }
                None => CellValue::Empty,
            }
        }
        Func::Concat => CellValue::Text(args.iter().map(|a| a.to_string()).collect()),
        Func::Coalesce => args
            .iter()
            .find(|a| !a.is_empty())
            .cloned()
            .unwrap_or_default(),
        Func::IsEmpty => CellValue::Bool(args[0].is_empty()),
        Func::Contains => match (&args[0], &args[1]) {
            (CellValue::Empty, _) => CellValue::Bool(false),
            (haystack, needle) => {
                CellValue::Bool(haystack.to_string().contains(&needle.to_string()))
            }
        },
    })
}

/// Relational join of two tables on one key column each.
///
/// A key column shared by name is kept once; any other column present on
/// both sides gets an `_x` (left) or `_y` (right) suffix. Empty keys never
/// join. Left, inner and outer joins keep the left table's row order, with
/// unmatched right rows appended for outer; a right join follows the right
/// table's order.
fn join(
    left: &Table,
    left_label: &str,
    right: &Table,
    right_label: &str,
    left_on: &str,
    right_on: &str,
    how: JoinHow,
) -> Result<Table> {
    let left_keys = &left.column(left_on, left_label)?.values;
    let right_keys = &right.column(right_on, right_label)?.values;
    let shared_key = left_on == right_on;

    let index = |keys: &[CellValue]| {
        let mut map: HashMap<JoinKey, Vec<usize>> = HashMap::new();
        for (i, value) in keys.iter().enumerate() {
            if let Some(key) = JoinKey::of(value) {
                map.entry(key).or_default().push(i);
            }
        }
        map
    };

    let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
    if how == JoinHow::Right {
        let left_index = index(left_keys);
        for (j, key) in right_keys.iter().enumerate() {
            match JoinKey::of(key).and_then(|k| left_index.get(&k)) {
                Some(partners) => pairs.extend(partners.iter().map(|&i| (Some(i), Some(j)))),
                None => pairs.push((None, Some(j))),
            }
        }
    } else {
        let right_index = index(right_keys);
        let mut right_used = vec![false; right.row_count()];
        for (i, key) in left_keys.iter().enumerate() {
            match JoinKey::of(key).and_then(|k| right_index.get(&k)) {
                Some(partners) => {
                    for &j in partners {
                        right_used[j] = true;
                        pairs.push((Some(i), Some(j)));
                    }
                }
                None if how != JoinHow::Inner => pairs.push((Some(i), None)),
                None => {}
            }
        }
        if how == JoinHow::Outer {
            pairs.extend(
                right_used
                    .iter()
                    .enumerate()
                    .filter(|(_, used)| !**used)
                    .map(|(j, _)| (None, Some(j))),
            );
        }
    }

    let left_names = left.column_names();
    let right_columns: Vec<&Column> = right
        .columns()
        .iter()
        .filter(|c| !(shared_key && c.name == right_on))
        .collect();
    let clashes = |name: &str| {
        left_names.iter().any(|n| n == name) && right_columns.iter().any(|c| c.name == name)
    };

    let mut names = Vec::new();
    let mut columns = Vec::new();
    for column in left.columns() {
        let is_key = shared_key && column.name == left_on;
        names.push(if !is_key && clashes(&column.name) {
            format!("{}_x", column.name)
        } else {
            column.name.clone()
        });
        let values = pairs
            .iter()
            .map(|&(i, j)| match (i, j) {
                (Some(i), _) => column.values[i].clone(),
                (None, Some(j)) if is_key => right_keys[j].clone(),
                _ => CellValue::Empty,
            })
            .collect();
        columns.push(values);
    }
    for column in &right_columns {
        names.push(if clashes(&column.name) {
            format!("{}_y", column.name)
        } else {
            column.name.clone()
        });
        columns.push(
            pairs
                .iter()
                .map(|&(_, j)| j.map_or(CellValue::Empty, |j| column.values[j].clone()))
                .collect(),
        );
    }

    let columns = unique_names(names)
        .into_iter()
        .zip(columns)
        .map(|(name, values)| Column { name, values })
        .collect();
    Table::from_columns(columns)
}

/// Group rows and reduce columns.
///
/// Groups appear in the order their first row appears. Rows with an empty
/// grouping value are left out. Without `by` the whole table is one group.
fn aggregate(
    table: &Table,
    label: &str,
    aggregations: &[Aggregation],
    by: &[String],
) -> Result<Table> {
    let by_columns = by
        .iter()
        .map(|name| table.column(name, label))
        .collect::<Result<Vec<_>>>()?;
    let agg_columns = aggregations
        .iter()
        .map(|agg| match &agg.column {
            Some(name) => table.column(name, label).map(Some),
            None => Ok(None),
        })
        .collect::<Result<Vec<_>>>()?;

    let mut groups: Vec<Vec<usize>> = Vec::new();
    if by.is_empty() {
        groups.push((0..table.row_count()).collect());
    } else {
        let mut positions: HashMap<Vec<JoinKey>, usize> = HashMap::new();
        for row in 0..table.row_count() {
            let key: Option<Vec<JoinKey>> = by_columns
                .iter()
                .map(|c| JoinKey::of(&c.values[row]))
                .collect();
            let Some(key) = key else { continue };
            let next = groups.len();
            let slot = *positions.entry(key).or_insert(next);
            if slot == next {
                groups.push(Vec::new());
            }
            groups[slot].push(row);
        }
    }

    let mut names: Vec<String> = by.to_vec();
    names.extend(aggregations.iter().map(|a| a.alias.clone()));

    let mut rows = Vec::with_capacity(groups.len());
    for members in &groups {
        let mut row: Vec<CellValue> = by_columns
            .iter()
            .map(|c| members.first().map_or(CellValue::Empty, |&r| c.values[r].clone()))
            .collect();
        for (agg, column) in aggregations.iter().zip(&agg_columns) {
            let values: Vec<&CellValue> = match column {
                Some(column) => members.iter().map(|&r| &column.values[r]).collect(),
                None => Vec::new(),
            };
            row.push(reduce(agg, column.is_some(), members.len(), &values)?);
        }
        rows.push(row);
    }
    Ok(Table::from_rows(unique_names(names), rows))
}

fn reduce(
    agg: &Aggregation,
    has_column: bool,
    group_size: usize,
    values: &[&CellValue],
) -> Result<CellValue> {
    let present: Vec<&CellValue> = values.iter().copied().filter(|v| !v.is_empty()).collect();
    let numbers = || -> Result<Vec<f64>> {
        present
            .iter()
            .map(|v| {
                v.as_number().ok_or_else(|| {
                    DashboardError::runtime(format!(
                        "{}({}) needs numbers, found {} '{}'",
                        agg.func.name(),
                        agg.column.as_deref().unwrap_or(""),
                        v.type_name(),
                        v
                    ))
                })
            })
            .collect()
    };
    Ok(match agg.func {
        AggFunc::Count if has_column => CellValue::Number(present.len() as f64),
        AggFunc::Count => CellValue::Number(group_size as f64),
        AggFunc::Sum => CellValue::number(numbers()?.iter().sum()),
        AggFunc::Mean => {
            let numbers = numbers()?;
            if numbers.is_empty() {
                CellValue::Empty
            } else {
                CellValue::number(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AggFunc::Min => present
            .iter()
            .min_by(|a, b| a.sort_cmp(b))
            .map(|v| (*v).clone())
            .unwrap_or_default(),
        AggFunc::Max => present
            .iter()
            .max_by(|a, b| a.sort_cmp(b))
            .map(|v| (*v).clone())
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippet::parser::parse;

    fn registry() -> TableRegistry {
        let mut registry = TableRegistry::new();
        registry.insert(
            "sales.xlsx",
            Table::from_rows(
                vec!["Region".into(), "Rep".into(), "Amount".into()],
                vec![
                    vec!["north".into(), "ann".into(), 10.0.into()],
                    vec!["south".into(), "bob".into(), 5.0.into()],
                    vec!["north".into(), "cy".into(), 7.0.into()],
                    vec![CellValue::Empty, "di".into(), 1.0.into()],
                ],
            ),
        );
        registry.insert(
            "reps.xlsx",
            Table::from_rows(
                vec!["Rep".into(), "Amount".into()],
                vec![
                    vec!["ann".into(), 100.0.into()],
                    vec!["zed".into(), 1.0.into()],
                ],
            ),
        );
        registry
    }

    fn run(source: &str) -> Result<Finished> {
        let mut interpreter = Interpreter::new(registry(), None)?;
        interpreter.run(&parse(source)?)?;
        Ok(interpreter.finish())
    }

    fn result(source: &str) -> Table {
        run(source).unwrap().result.expect("result table")
    }

    #[test]
    fn aggregate_groups_in_first_seen_order() {
        let table = result(
            "result = table(\"sales.xlsx\") | aggregate sum(Amount) as Total, count() by Region",
        );
        assert_eq!(table.column_names(), vec!["Region", "Total", "count"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.row(0), vec!["north".into(), 17.0.into(), 2.0.into()]);
        assert_eq!(table.row(1), vec!["south".into(), 5.0.into(), 1.0.into()]);
    }

    #[test]
    fn join_suffixes_clashing_columns() {
        let table = result("result = dfs[\"sales.xlsx\"] | join table(\"reps.xlsx\") on Rep outer");
        assert_eq!(
            table.column_names(),
            vec!["Region", "Rep", "Amount_x", "Amount_y"]
        );
        assert_eq!(table.row_count(), 5);
        assert_eq!(table.row(0), vec!["north".into(), "ann".into(), 10.0.into(), 100.0.into()]);
        // the right-only row keeps its key in the shared column
        assert_eq!(table.row(4)[1], CellValue::text("zed"));
        assert_eq!(table.row(4)[0], CellValue::Empty);

        let inner = result("result = table(\"sales.xlsx\") | join table(\"reps.xlsx\") on Rep");
        assert_eq!(inner.row_count(), 1);
        let right = result("result = table(\"sales.xlsx\") | join table(\"reps.xlsx\") on Rep right");
        assert_eq!(right.row_count(), 2);
        assert_eq!(right.row(1)[1], CellValue::text("zed"));
    }

    #[test]
    fn filter_map_sort_and_print() {
        let finished = run(
            "result = table(\"sales.xlsx\")\n  | filter Amount >= 5 and not is_empty(Region)\n  | map Label = upper(Rep) & \"-\" & Amount\n  | sort Amount desc\n  | select Label\nprint result | count",
        )
        .unwrap();
        assert_eq!(finished.output, vec!["3"]);
        let table = finished.result.unwrap();
        let labels: Vec<String> = table.columns()[0].values.iter().map(|v| v.to_string()).collect();
        assert_eq!(labels, vec!["ANN-10", "CY-7", "BOB-5"]);
    }

    #[test]
    fn column_assignment_and_division_by_zero() {
        let table = result(
            "result = table(\"sales.xlsx\")\nresult[Share] = Amount / (Amount - Amount)\nresult[Double] = round(Amount * 2.25, 1)",
        );
        assert!(table.columns()[3].values.iter().all(CellValue::is_empty));
        assert_eq!(table.value(0, 4), &CellValue::Number(22.5));
    }

    #[test]
    fn runtime_errors_carry_the_line() {
        let err = run("x = table(\"sales.xlsx\")\ny = x\n  | select Missing").err().unwrap();
        let message = err.to_string();
        assert!(message.starts_with("Runtime Error: line 3:"), "{}", message);
        assert!(message.contains("Missing"), "{}", message);

        let err = run("y = table(\"nope.xlsx\")").err().unwrap();
        assert!(err.to_string().contains("line 1"), "{}", err);

        let err = run("x = table(\"sales.xlsx\") | filter Rep + 1 > 2").err().unwrap();
        assert!(err.to_string().contains("cannot add"), "{}", err);
    }

    #[test]
    fn saves_and_df_are_committed_on_finish() {
        let mut interpreter = Interpreter::new(registry(), Some("reps.xlsx")).unwrap();
        interpreter
            .run(&parse("df[Rep] = upper(Rep)\nsave \"copy.xlsx\" = df | head 1").unwrap())
            .unwrap();
        let finished = interpreter.finish();
        assert_eq!(finished.updated, vec!["copy.xlsx", "reps.xlsx"]);
        assert_eq!(
            finished.registry.get("reps.xlsx").unwrap().value(0, 0),
            &CellValue::text("ANN")
        );
        assert_eq!(finished.registry.get("copy.xlsx").unwrap().row_count(), 1);
    }

    #[test]
    fn df_without_selection_is_explained() {
        let err = run("print df").err().unwrap();
        assert!(err.to_string().contains("table(\"name\")"), "{}", err);
    }

    #[test]
    fn compare_verb_produces_match_column() {
        let table = result(
            "result = table(\"sales.xlsx\") | compare table(\"reps.xlsx\") on Rep = Rep values Amount = Amount",
        );
        assert_eq!(
            table.column_names(),
            vec!["Rep", "Amount_file1", "Amount_file2", "Match"]
        );
        assert_eq!(table.row_count(), 5);
    }
}
