use crate::error::{DashboardError, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Ident(String),
    /// `[Column Name]`
    Column(String),
    Str(String),
    Num(f64),
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Amp,
    LParen,
    RParen,
    /// `[` directly followed by a quoted key, as in `dfs["a.xlsx"]`
    LBracket,
    RBracket,
    Comma,
    Pipe,
    Newline,
    Eof,
}

impl Tok {
    pub fn describe(&self) -> String {
        match self {
            Tok::Ident(s) => format!("'{}'", s),
            Tok::Column(s) => format!("[{}]", s),
            Tok::Str(s) => format!("\"{}\"", s),
            Tok::Num(n) => format!("{}", n),
            Tok::Assign => "'='".into(),
            Tok::EqEq => "'=='".into(),
            Tok::NotEq => "'!='".into(),
            Tok::Lt => "'<'".into(),
            Tok::Le => "'<='".into(),
            Tok::Gt => "'>'".into(),
            Tok::Ge => "'>='".into(),
            Tok::Plus => "'+'".into(),
            Tok::Minus => "'-'".into(),
            Tok::Star => "'*'".into(),
            Tok::Slash => "'/'".into(),
            Tok::Amp => "'&'".into(),
            Tok::LParen => "'('".into(),
            Tok::RParen => "')'".into(),
            Tok::LBracket => "'['".into(),
            Tok::RBracket => "']'".into(),
            Tok::Comma => "','".into(),
            Tok::Pipe => "'|'".into(),
            Tok::Newline => "end of line".into(),
            Tok::Eof => "end of snippet".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub tok: Tok,
    /// 1-based source line
    pub line: usize,
}

pub fn syntax_error(source: &str, line: usize, message: impl Into<String>) -> DashboardError {
    let text = source
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or("")
        .trim()
        .to_string();
    DashboardError::SnippetSyntax {
        line,
        text,
        message: message.into(),
    }
}

/// Split a snippet into tokens.
///
/// Line breaks end statements, except inside parentheses, after a trailing
/// `|`, and before a line that starts with `|`; those are dropped so a
/// pipeline can span several lines.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut raw = Vec::new();
    for (index, line) in source.lines().enumerate() {
        lex_line(source, line, index + 1, &mut raw)?;
        raw.push(Token {
            tok: Tok::Newline,
            line: index + 1,
        });
    }

    let mut tokens: Vec<Token> = Vec::with_capacity(raw.len());
    let mut open_parens: Vec<usize> = Vec::new();
    for (i, token) in raw.iter().enumerate() {
        match token.tok {
            Tok::LParen => open_parens.push(token.line),
            Tok::RParen => {
                if open_parens.pop().is_none() {
                    return Err(syntax_error(source, token.line, "unmatched ')'"));
                }
            }
            Tok::Newline => {
                let after_pipe = tokens.last().is_some_and(|t| t.tok == Tok::Pipe);
                let before_pipe = raw[i + 1..]
                    .iter()
                    .find(|t| t.tok != Tok::Newline)
                    .is_some_and(|t| t.tok == Tok::Pipe);
                let repeated = tokens.last().is_none_or(|t| t.tok == Tok::Newline);
                if !open_parens.is_empty() || after_pipe || before_pipe || repeated {
                    continue;
                }
            }
            _ => {}
        }
        tokens.push(token.clone());
    }

    if let Some(&line) = open_parens.last() {
        return Err(syntax_error(source, line, "'(' was never closed"));
    }

    let last_line = source.lines().count().max(1);
    tokens.push(Token {
        tok: Tok::Eof,
        line: last_line,
    });
    Ok(tokens)
}

fn lex_line(source: &str, line: &str, line_no: usize, out: &mut Vec<Token>) -> Result<()> {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    let push = |out: &mut Vec<Token>, tok: Tok| out.push(Token { tok, line: line_no });

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' => i += 1,
            '#' => break,
            ';' => {
                push(out, Tok::Newline);
                i += 1;
            }
            '"' | '\'' => {
                let (text, next) = lex_string(&chars, i)
                    .ok_or_else(|| syntax_error(source, line_no, "unterminated string"))?;
                push(out, Tok::Str(text));
                i = next;
            }
            '[' => {
                let next_solid = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if matches!(next_solid, Some('"') | Some('\'')) {
                    push(out, Tok::LBracket);
                    i += 1;
                } else {
                    let close = chars[i + 1..]
                        .iter()
                        .position(|&c| c == ']')
                        .ok_or_else(|| syntax_error(source, line_no, "unclosed '['"))?;
                    let name: String = chars[i + 1..i + 1 + close].iter().collect();
                    let name = name.trim().to_string();
                    if name.is_empty() {
                        return Err(syntax_error(source, line_no, "empty column name '[]'"));
                    }
                    push(out, Tok::Column(name));
                    i += close + 2;
                }
            }
            ']' => {
                push(out, Tok::RBracket);
                i += 1;
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| syntax_error(source, line_no, format!("bad number '{}'", text)))?;
                push(out, Tok::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                push(out, Tok::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let next = chars.get(i + 1).copied();
                let (tok, width) = match (c, next) {
                    ('=', Some('=')) => (Tok::EqEq, 2),
                    ('!', Some('=')) => (Tok::NotEq, 2),
                    ('<', Some('=')) => (Tok::Le, 2),
                    ('>', Some('=')) => (Tok::Ge, 2),
                    ('<', Some('>')) => (Tok::NotEq, 2),
                    ('=', _) => (Tok::Assign, 1),
                    ('<', _) => (Tok::Lt, 1),
                    ('>', _) => (Tok::Gt, 1),
                    ('+', _) => (Tok::Plus, 1),
                    ('-', _) => (Tok::Minus, 1),
                    ('*', _) => (Tok::Star, 1),
                    ('/', _) => (Tok::Slash, 1),
                    ('&', _) => (Tok::Amp, 1),
                    ('(', _) => (Tok::LParen, 1),
                    (')', _) => (Tok::RParen, 1),
                    (',', _) => (Tok::Comma, 1),
                    ('|', _) => (Tok::Pipe, 1),
                    _ => {
                        return Err(syntax_error(
                            source,
                            line_no,
                            format!("unexpected character '{}'", c),
                        ));
                    }
                };
                push(out, tok);
                i += width;
            }
        }
    }
    Ok(())
}

// Returns the unescaped string and the index just past the closing quote.
fn lex_string(chars: &[char], start: usize) -> Option<(String, usize)> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = *chars.get(i + 1)?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Some((text, i + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn columns_strings_and_operators() {
        assert_eq!(
            toks("x = [Unit Price] * 2 >= 'a\\'b'"),
            vec![
                Tok::Ident("x".into()),
                Tok::Assign,
                Tok::Column("Unit Price".into()),
                Tok::Star,
                Tok::Num(2.0),
                Tok::Ge,
                Tok::Str("a'b".into()),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn bracket_before_quote_is_an_index() {
        assert_eq!(
            toks("dfs[\"a.xlsx\"]"),
            vec![
                Tok::Ident("dfs".into()),
                Tok::LBracket,
                Tok::Str("a.xlsx".into()),
                Tok::RBracket,
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn pipelines_continue_across_lines() {
        let source = "result = t\n  | head 2   # first rows\n\n  | count\nprint result";
        let lines: Vec<(Tok, usize)> = tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| (t.tok, t.line))
            .collect();
        let newlines: Vec<usize> = lines
            .iter()
            .filter(|(t, _)| *t == Tok::Newline)
            .map(|(_, l)| *l)
            .collect();
        assert_eq!(newlines, vec![4, 5]);
        assert!(lines.contains(&(Tok::Ident("count".into()), 4)));
    }

    #[test]
    fn newlines_inside_parentheses_are_ignored() {
        let tokens = toks("x = concat(\n  [A],\n  [B]\n)");
        assert_eq!(tokens.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn unclosed_parenthesis_reports_the_opening_line() {
        let source = "x = table(\"a.csv\")\nprint (x\nprint x";
        match tokenize(source) {
            Err(DashboardError::SnippetSyntax { line, message, .. }) => {
                assert_eq!(line, 2);
                assert!(message.contains("never closed"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn unterminated_string_reports_its_line() {
        match tokenize("a = 1\nb = \"oops") {
            Err(DashboardError::SnippetSyntax { line, text, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(text, "b = \"oops");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
