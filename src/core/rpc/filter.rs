// src/core/rpc/filter.rs

//! Server-side list filtering: boolean expressions over entity fields,
//! evaluated against the JSON form of each row before pagination.
//!
//! Grammar:
//! ```text
//! expr     := and ('or' and)*
//! and      := unary ('and' unary)*
//! unary    := 'not' unary | primary
//! primary  := '(' expr ')' | selector op value
//! selector := Ident ('.' Ident)*
//! op       := '==' | '!=' | 'matches' | 'contains'
//! value    := '"' chars '"'
//! ```

use crate::core::FlotillaError;
use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Eq,
    Ne,
    And,
    Or,
    Not,
    Matches,
    Contains,
    LParen,
    RParen,
}

#[derive(Debug, Clone)]
enum Expr {
    Cmp {
        selector: Vec<String>,
        op: CmpOp,
        value: String,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum CmpOp {
    Eq,
    Ne,
    Matches,
    Contains,
}

/// A compiled filter expression.
#[derive(Debug, Clone)]
pub struct Filter {
    expr: Expr,
}

impl Filter {
    /// Compiles a filter source string. An empty source matches everything.
    pub fn parse(source: &str) -> Result<Option<Self>, FlotillaError> {
        let source = source.trim();
        if source.is_empty() {
            return Ok(None);
        }
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(FlotillaError::InvalidRequest(
                "trailing tokens in filter expression".to_string(),
            ));
        }
        Ok(Some(Self { expr }))
    }

    /// Evaluates the filter against one row's JSON form.
    pub fn matches(&self, row: &Value) -> bool {
        eval(&self.expr, row)
    }
}

/// Filters rows by an optional expression source, serializing each row once.
pub fn apply_filter<T: serde::Serialize>(
    source: &str,
    rows: Vec<T>,
) -> Result<Vec<T>, FlotillaError> {
    let Some(filter) = Filter::parse(source)? else {
        return Ok(rows);
    };
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        let value = serde_json::to_value(&row)?;
        if filter.matches(&value) {
            kept.push(row);
        }
    }
    Ok(kept)
}

fn tokenize(source: &str) -> Result<Vec<Token>, FlotillaError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(FlotillaError::InvalidRequest(
                        "expected '==' in filter".to_string(),
                    ));
                }
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(FlotillaError::InvalidRequest(
                        "expected '!=' in filter".to_string(),
                    ));
                }
                tokens.push(Token::Ne);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                s.push(escaped);
                            }
                        }
                        Some(other) => s.push(other),
                        None => {
                            return Err(FlotillaError::InvalidRequest(
                                "unterminated string in filter".to_string(),
                            ));
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "matches" => Token::Matches,
                    "contains" => Token::Contains,
                    _ => Token::Ident(ident),
                });
            }
            other => {
                return Err(FlotillaError::InvalidRequest(format!(
                    "unexpected character {other:?} in filter"
                )));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> Result<Expr, FlotillaError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, FlotillaError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, FlotillaError> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, FlotillaError> {
        match self.next() {
            Some(Token::LParen) => {
                let expr = self.expr()?;
                if self.next() != Some(Token::RParen) {
                    return Err(FlotillaError::InvalidRequest(
                        "expected ')' in filter".to_string(),
                    ));
                }
                Ok(expr)
            }
            Some(Token::Ident(selector)) => {
                let op = match self.next() {
                    Some(Token::Eq) => CmpOp::Eq,
                    Some(Token::Ne) => CmpOp::Ne,
                    Some(Token::Matches) => CmpOp::Matches,
                    Some(Token::Contains) => CmpOp::Contains,
                    _ => {
                        return Err(FlotillaError::InvalidRequest(
                            "expected comparison operator in filter".to_string(),
                        ));
                    }
                };
                let value = match self.next() {
                    Some(Token::Str(s)) => s,
                    Some(Token::Ident(s)) => s,
                    _ => {
                        return Err(FlotillaError::InvalidRequest(
                            "expected value in filter".to_string(),
                        ));
                    }
                };
                // `matches` patterns are validated at parse time.
                if matches!(op, CmpOp::Matches) {
                    Regex::new(&value).map_err(|e| {
                        FlotillaError::InvalidRequest(format!("invalid filter regex: {e}"))
                    })?;
                }
                Ok(Expr::Cmp {
                    selector: selector.split('.').map(str::to_string).collect(),
                    op,
                    value,
                })
            }
            _ => Err(FlotillaError::InvalidRequest(
                "expected expression in filter".to_string(),
            )),
        }
    }
}

fn lookup<'a>(row: &'a Value, selector: &[String]) -> Option<&'a Value> {
    let mut current = row;
    for segment in selector {
        current = current.get(segment)?;
    }
    Some(current)
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn eval(expr: &Expr, row: &Value) -> bool {
    match expr {
        Expr::And(a, b) => eval(a, row) && eval(b, row),
        Expr::Or(a, b) => eval(a, row) || eval(b, row),
        Expr::Not(inner) => !eval(inner, row),
        Expr::Cmp {
            selector,
            op,
            value,
        } => {
            let field = lookup(row, selector).map(value_as_string);
            match op {
                CmpOp::Eq => field.as_deref() == Some(value.as_str()),
                CmpOp::Ne => field.as_deref() != Some(value.as_str()),
                CmpOp::Matches => field
                    .as_deref()
                    .and_then(|f| Regex::new(value).ok().map(|re| re.is_match(f)))
                    .unwrap_or(false),
                CmpOp::Contains => field
                    .as_deref()
                    .map(|f| f.contains(value.as_str()))
                    .unwrap_or(false),
            }
        }
    }
}
