use super::lexer::{Tok, Token, syntax_error, tokenize};
use crate::cell::CellValue;
use crate::error::{DashboardError, Result};
use crate::format::FormatOption;

#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub line: usize,
    pub kind: StatementKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatementKind {
    /// `let name = ...` or `name = ...`
    Assign { name: String, value: Pipeline },
    /// `name[Col] = <scalar expression>`
    AssignColumn {
        target: String,
        column: String,
        expr: Expr,
    },
    Print(Pipeline),
    /// `save "key" = ...` or `dfs["key"] = ...`
    Save { key: String, value: Pipeline },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pipeline {
    pub source: Source,
    pub verbs: Vec<Step>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub line: usize,
    pub verb: Verb,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    /// A table from the registry, by file name
    Registry(String),
    Variable(String),
    Literal(CellValue),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinHow {
    Inner,
    Left,
    Right,
    Outer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl AggFunc {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "sum" => Some(AggFunc::Sum),
            "mean" | "avg" | "average" => Some(AggFunc::Mean),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            "count" => Some(AggFunc::Count),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Mean => "mean",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Count => "count",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Aggregation {
    pub func: AggFunc,
    pub column: Option<String>,
    pub alias: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Verb {
    Filter(Expr),
    Map { column: String, expr: Expr },
    Select(Vec<String>),
    Drop(Vec<String>),
    Rename(Vec<(String, String)>),
    Sort { column: String, descending: bool },
    Head(usize),
    Join {
        other: Source,
        left_on: String,
        right_on: String,
        how: JoinHow,
    },
    Aggregate {
        aggregations: Vec<Aggregation>,
        by: Vec<String>,
    },
    Compare {
        other: Source,
        left_reference: String,
        right_reference: String,
        left_compare: String,
        right_compare: String,
    },
    Format { column: String, option: FormatOption },
    Count,
}

impl Verb {
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Filter(_) => "filter",
            Verb::Map { .. } => "map",
            Verb::Select(_) => "select",
            Verb::Drop(_) => "drop",
            Verb::Rename(_) => "rename",
            Verb::Sort { .. } => "sort",
            Verb::Head(_) => "head",
            Verb::Join { .. } => "join",
            Verb::Aggregate { .. } => "aggregate",
            Verb::Compare { .. } => "compare",
            Verb::Format { .. } => "format",
            Verb::Count => "count",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Func {
    Upper,
    Lower,
    Title,
    Strip,
    Len,
    Abs,
    Round,
    Concat,
    Coalesce,
    IsEmpty,
    Contains,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "upper" => Some(Func::Upper),
            "lower" => Some(Func::Lower),
            "title" => Some(Func::Title),
            "strip" | "trim" => Some(Func::Strip),
            "len" | "length" => Some(Func::Len),
            "abs" => Some(Func::Abs),
            "round" => Some(Func::Round),
            "concat" => Some(Func::Concat),
            "coalesce" => Some(Func::Coalesce),
            "is_empty" | "isnull" | "is_null" => Some(Func::IsEmpty),
            "contains" => Some(Func::Contains),
            _ => None,
        }
    }

    /// Accepted argument counts, inclusive.
    fn arity(&self) -> (usize, usize) {
        match self {
            Func::Round => (1, 2),
            Func::Contains => (2, 2),
            Func::Concat | Func::Coalesce => (1, usize::MAX),
            _ => (1, 1),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(CellValue),
    Column(String),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

impl Expr {
    /// Every column name the expression reads.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Column(name) => out.push(name),
            Expr::Unary(_, inner) => inner.collect_columns(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_columns(out);
                rhs.collect_columns(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_columns(out)),
        }
    }
}

/// Names that select a registry table when called with a file name.
const LOADERS: [&str; 3] = ["table", "read_excel", "load"];

/// Deepest expression tree the parser will build. Operator chains count one
/// level per operator, so evaluating a parsed tree stays within this bound.
pub const MAX_DEPTH: usize = 128;

/// Parse a whole snippet. Nothing is executed if any line fails to parse.
pub fn parse(source: &str) -> Result<Vec<Statement>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        depth: 0,
    };
    parser.statements()
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let i = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[i].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) -> Tok {
        let tok = self.tokens[self.pos].tok.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> DashboardError {
        syntax_error(self.source, self.line(), message)
    }

    // One level deeper; fails once the tree would exceed MAX_DEPTH
    fn deepen(&mut self) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.deepen()?;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn unexpected(&self, wanted: &str) -> DashboardError {
        self.error(format!("expected {}, found {}", wanted, self.peek().describe()))
    }

    fn expect(&mut self, tok: Tok, wanted: &str) -> Result<()> {
        if *self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(wanted))
        }
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(s) if s.eq_ignore_ascii_case(word))
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.at_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<()> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", word)))
        }
    }

    fn statements(&mut self) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.advance();
                }
                _ => {
                    statements.push(self.statement()?);
                    match self.peek() {
                        Tok::Newline | Tok::Eof => {}
                        _ => return Err(self.unexpected("end of line")),
                    }
                }
            }
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Statement> {
        let line = self.line();
        let kind = if self.eat_keyword("let") {
            let name = self.identifier()?;
            self.expect(Tok::Assign, "'='")?;
            StatementKind::Assign {
                name,
                value: self.pipeline()?,
            }
        } else if self.eat_keyword("print") {
            StatementKind::Print(self.pipeline()?)
        } else if self.eat_keyword("save") {
            let key = self.string()?;
            self.expect(Tok::Assign, "'='")?;
            StatementKind::Save {
                key,
                value: self.pipeline()?,
            }
        } else if self.at_keyword("dfs") && *self.peek_at(1) == Tok::LBracket {
            self.advance();
            let key = self.index_key()?;
            self.expect(Tok::Assign, "'='")?;
            StatementKind::Save {
                key,
                value: self.pipeline()?,
            }
        } else if let Tok::Ident(name) = self.peek().clone() {
            self.advance();
            match self.peek().clone() {
                Tok::Assign => {
                    self.advance();
                    StatementKind::Assign {
                        name,
                        value: self.pipeline()?,
                    }
                }
                Tok::Column(column) => {
                    self.advance();
                    self.expect(Tok::Assign, "'='")?;
                    StatementKind::AssignColumn {
                        target: name,
                        column,
                        expr: self.expr()?,
                    }
                }
                Tok::LBracket => {
                    let column = self.index_key()?;
                    self.expect(Tok::Assign, "'='")?;
                    StatementKind::AssignColumn {
                        target: name,
                        column,
                        expr: self.expr()?,
                    }
                }
                _ => return Err(self.unexpected("'=' after a name")),
            }
        } else {
            return Err(self.unexpected("a statement"));
        };
        Ok(Statement { line, kind })
    }

    fn identifier(&mut self) -> Result<String> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("a name")),
        }
    }

    fn string(&mut self) -> Result<String> {
        match self.peek().clone() {
            Tok::Str(s) => {
                self.advance();
                Ok(s)
            }
            _ => Err(self.unexpected("a quoted name")),
        }
    }

    // ["key"]
    fn index_key(&mut self) -> Result<String> {
        self.expect(Tok::LBracket, "'['")?;
        let key = self.string()?;
        self.expect(Tok::RBracket, "']'")?;
        Ok(key)
    }

    /// A column name: `[Any Name]`, a bare identifier or a quoted string.
    fn column_name(&mut self) -> Result<String> {
        match self.peek().clone() {
            Tok::Column(name) | Tok::Ident(name) | Tok::Str(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("a column name")),
        }
    }

    fn column_list(&mut self) -> Result<Vec<String>> {
        let mut names = vec![self.column_name()?];
        while *self.peek() == Tok::Comma {
            self.advance();
            names.push(self.column_name()?);
        }
        Ok(names)
    }

    fn pipeline(&mut self) -> Result<Pipeline> {
        let source = self.source_ref()?;
        let mut verbs = Vec::new();
        while *self.peek() == Tok::Pipe {
            self.advance();
            let line = self.line();
            verbs.push(Step {
                line,
                verb: self.verb()?,
            });
        }
        Ok(Pipeline { source, verbs })
    }

    fn source_ref(&mut self) -> Result<Source> {
        match self.peek().clone() {
            Tok::Str(s) => {
                self.advance();
                Ok(Source::Literal(CellValue::Text(s)))
            }
            Tok::Num(n) => {
                self.advance();
                Ok(Source::Literal(CellValue::Number(n)))
            }
            Tok::Minus => {
                self.advance();
                match self.advance() {
                    Tok::Num(n) => Ok(Source::Literal(CellValue::Number(-n))),
                    _ => Err(self.unexpected("a number")),
                }
            }
            Tok::LParen => {
                self.advance();
                let source = self.nested(|p| p.source_ref())?;
                self.expect(Tok::RParen, "')'")?;
                Ok(source)
            }
            Tok::Ident(name) => {
                self.advance();
                let lower = name.to_lowercase();
                if LOADERS.contains(&lower.as_str()) && *self.peek() == Tok::LParen {
                    self.advance();
                    let key = self.string()?;
                    self.expect(Tok::RParen, "')'")?;
                    return Ok(Source::Registry(key));
                }
                if lower == "dfs" && *self.peek() == Tok::LBracket {
                    return Ok(Source::Registry(self.index_key()?));
                }
                Ok(match lower.as_str() {
                    "true" => Source::Literal(CellValue::Bool(true)),
                    "false" => Source::Literal(CellValue::Bool(false)),
                    "null" | "none" => Source::Literal(CellValue::Empty),
                    _ => Source::Variable(name),
                })
            }
            _ => Err(self.unexpected("a table or value")),
        }
    }

    fn verb(&mut self) -> Result<Verb> {
        let name = match self.peek().clone() {
            Tok::Ident(name) => name.to_lowercase(),
            _ => return Err(self.unexpected("a verb")),
        };
        self.advance();
        match name.as_str() {
            "filter" | "where" => Ok(Verb::Filter(self.expr()?)),
            "map" | "with" => {
                let column = self.column_name()?;
                self.expect(Tok::Assign, "'='")?;
                Ok(Verb::Map {
                    column,
                    expr: self.expr()?,
                })
            }
            "select" => Ok(Verb::Select(self.column_list()?)),
            "drop" => Ok(Verb::Drop(self.column_list()?)),
            "rename" => {
                let mut pairs = Vec::new();
                loop {
                    let from = self.column_name()?;
                    self.expect_keyword("as")?;
                    let to = self.column_name()?;
                    pairs.push((from, to));
                    if *self.peek() != Tok::Comma {
                        break;
                    }
                    self.advance();
                }
                Ok(Verb::Rename(pairs))
            }
            "sort" => {
                let column = self.column_name()?;
                let descending = if self.eat_keyword("desc") {
                    true
                } else {
                    self.eat_keyword("asc");
                    false
                };
                Ok(Verb::Sort { column, descending })
            }
            "head" | "limit" => match self.advance() {
                Tok::Num(n) if n >= 0.0 && n.fract() == 0.0 => Ok(Verb::Head(n as usize)),
                _ => Err(self.error("head needs a whole number of rows")),
            },
            "join" => {
                let other = self.source_ref()?;
                self.expect_keyword("on")?;
                let left_on = self.column_name()?;
                let right_on = if *self.peek() == Tok::Assign || *self.peek() == Tok::EqEq {
                    self.advance();
                    self.column_name()?
                } else {
                    left_on.clone()
                };
                let how = if self.eat_keyword("inner") {
                    JoinHow::Inner
                } else if self.eat_keyword("left") {
                    JoinHow::Left
                } else if self.eat_keyword("right") {
                    JoinHow::Right
                } else if self.eat_keyword("outer") {
                    JoinHow::Outer
                } else {
                    JoinHow::Inner
                };
                Ok(Verb::Join {
                    other,
                    left_on,
                    right_on,
                    how,
                })
            }
            "aggregate" | "summarize" => {
                let mut aggregations = vec![self.aggregation()?];
                while *self.peek() == Tok::Comma {
                    self.advance();
                    aggregations.push(self.aggregation()?);
                }
                let by = if self.eat_keyword("by") {
                    self.column_list()?
                } else {
                    Vec::new()
                };
                Ok(Verb::Aggregate { aggregations, by })
            }
            "compare" => {
                let other = self.source_ref()?;
                self.expect_keyword("on")?;
                let left_reference = self.column_name()?;
                self.expect(Tok::Assign, "'='")?;
                let right_reference = self.column_name()?;
                self.expect_keyword("values")?;
                let left_compare = self.column_name()?;
                self.expect(Tok::Assign, "'='")?;
                let right_compare = self.column_name()?;
                Ok(Verb::Compare {
                    other,
                    left_reference,
                    right_reference,
                    left_compare,
                    right_compare,
                })
            }
            "format" => {
                let column = self.column_name()?;
                let option_name = self.identifier()?;
                let option = FormatOption::from_strng(&option_name).ok_or_else(|| {
                    self.error(format!(
                        "unknown format '{}', use upper, lower, title or strip",
                        option_name
                    ))
                })?;
                Ok(Verb::Format { column, option })
            }
            "count" => Ok(Verb::Count),
            other => Err(self.error(format!("unknown verb '{}'", other))),
        }
    }

    fn aggregation(&mut self) -> Result<Aggregation> {
        let name = self.identifier()?;
        let func = AggFunc::from_name(&name)
            .ok_or_else(|| self.error(format!("unknown aggregate '{}'", name)))?;
        self.expect(Tok::LParen, "'('")?;
        let column = if *self.peek() == Tok::RParen {
            None
        } else {
            Some(self.column_name()?)
        };
        self.expect(Tok::RParen, "')'")?;
        if column.is_none() && func != AggFunc::Count {
            return Err(self.error(format!("{}() needs a column", func.name())));
        }
        let alias = if self.eat_keyword("as") {
            self.column_name()?
        } else {
            match &column {
                Some(c) => format!("{}_{}", func.name(), c),
                None => func.name().to_string(),
            }
        };
        Ok(Aggregation {
            func,
            column,
            alias,
        })
    }

    pub fn expr(&mut self) -> Result<Expr> {
        self.nested(|p| p.or_expr())
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.and_expr()?;
        while self.eat_keyword("or") {
            self.deepen()?;
            let rhs = self.and_expr()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.not_expr()?;
        while self.eat_keyword("and") {
            self.deepen()?;
            let rhs = self.not_expr()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat_keyword("not") {
            let inner = self.nested(|p| p.not_expr())?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(inner)));
        }
        self.cmp_expr()
    }

    fn cmp_expr(&mut self) -> Result<Expr> {
        let lhs = self.add_expr()?;
        let op = match self.peek() {
            Tok::EqEq | Tok::Assign => BinOp::Eq,
            Tok::NotEq => BinOp::Ne,
            Tok::Lt => BinOp::Lt,
            Tok::Le => BinOp::Le,
            Tok::Gt => BinOp::Gt,
            Tok::Ge => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.add_expr()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn add_expr(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.mul_expr()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                Tok::Amp => BinOp::Concat,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let rhs = self.mul_expr()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn mul_expr(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if *self.peek() == Tok::Minus {
            self.advance();
            let inner = self.nested(|p| p.unary())?;
            return Ok(Expr::Unary(UnOp::Neg, Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            Tok::Num(n) => {
                self.advance();
                Ok(Expr::Literal(CellValue::Number(n)))
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Expr::Literal(CellValue::Text(s)))
            }
            Tok::Column(name) => {
                self.advance();
                Ok(Expr::Column(name))
            }
            Tok::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::Ident(name) => {
                self.advance();
                if *self.peek() == Tok::LParen {
                    return self.call(&name);
                }
                Ok(match name.to_lowercase().as_str() {
                    "true" => Expr::Literal(CellValue::Bool(true)),
                    "false" => Expr::Literal(CellValue::Bool(false)),
                    "null" | "none" => Expr::Literal(CellValue::Empty),
                    _ => Expr::Column(name),
                })
            }
            _ => Err(self.unexpected("a value")),
        }
    }

    fn call(&mut self, name: &str) -> Result<Expr> {
        let func =
            Func::from_name(name).ok_or_else(|| self.error(format!("unknown function '{}'", name)))?;
        self.expect(Tok::LParen, "'('")?;
        let mut args = Vec::new();
        if *self.peek() != Tok::RParen {
            args.push(self.expr()?);
            while *self.peek() == Tok::Comma {
                self.advance();
                args.push(self.expr()?);
            }
        }
        self.expect(Tok::RParen, "')'")?;
        let (min, max) = func.arity();
        if args.len() < min || args.len() > max {
            return Err(self.error(format!(
                "{}() takes {} argument(s), got {}",
                name.to_lowercase(),
                if min == max {
                    min.to_string()
                } else if max == usize::MAX {
                    format!("at least {}", min)
                } else {
                    format!("{} to {}", min, max)
                },
                args.len()
            )));
        }
        Ok(Expr::Call(func, args))
    }
}
