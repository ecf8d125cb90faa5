//! Condition evaluation for `Condition` action nodes.
//!
//! An expression is tokenized and parsed into a small AST before any value is
//! looked up. Only a fixed grammar is accepted: literals, node references,
//! comparison and logical operators, parentheses, `.length`, and a whitelist
//! of string methods. Anything else is rejected at parse time.
//!
//! Each `{{@NODEID:LABEL.path}}` reference becomes a positional binding
//! (rendered as `__ref0`, `__ref1`, ...) whose value is looked up typed from
//! node outputs, so a number stays a number and a string is never spliced
//! into expression text.
//!
//! Evaluation fails closed: any tokenizer, parser, binding, or runtime error
//! yields `false`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use courier_types::workflow::{ConditionInput, NodeOutput};
use serde_json::{json, Map, Value};

use super::template::{lookup_reference, node_reference_at, Reference};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("identifier '{0}' is not allowed")]
    DisallowedIdentifier(String),

    #[error("unterminated string literal starting at position {0}")]
    UnterminatedString(usize),

    #[error("unexpected token '{found}' at position {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("{method}() expects {expected} argument(s), got {got}")]
    Arity {
        method: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("reference __ref{0} has no bound value")]
    UnboundReference(usize),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Value),
    Ref(usize),
    Ident(&'static str),
    LParen,
    RParen,
    Dot,
    Comma,
    Not,
    Minus,
    And,
    Or,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Literal(v) => write!(f, "{v}"),
            Token::Ref(i) => write!(f, "__ref{i}"),
            Token::Ident(name) => write!(f, "{name}"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::Not => write!(f, "!"),
            Token::Minus => write!(f, "-"),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Equal => write!(f, "=="),
            Token::NotEqual => write!(f, "!="),
            Token::StrictEqual => write!(f, "==="),
            Token::StrictNotEqual => write!(f, "!=="),
            Token::Greater => write!(f, ">"),
            Token::GreaterEqual => write!(f, ">="),
            Token::Less => write!(f, "<"),
            Token::LessEqual => write!(f, "<="),
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    pos: usize,
}

/// Identifiers allowed after a `.`.
const MEMBER_WHITELIST: &[&str] = &[
    "length",
    "includes",
    "startsWith",
    "endsWith",
    "toLowerCase",
    "toUpperCase",
    "trim",
];

/// Match an operator or punctuation token at the start of `rest`.
///
/// Longest operators are tried first so `===` wins over `==`.
fn operator(rest: &str) -> Option<(Token, usize)> {
    const OPERATORS: &[&str] = &[
        "===", "!==", "==", "!=", ">=", "<=", "&&", "||", ">", "<", "!", "(", ")", ".", ",", "-",
    ];
    let text = OPERATORS.iter().find(|op| rest.starts_with(**op))?;
    let token = match *text {
        "===" => Token::StrictEqual,
        "!==" => Token::StrictNotEqual,
        "==" => Token::Equal,
        "!=" => Token::NotEqual,
        ">=" => Token::GreaterEqual,
        "<=" => Token::LessEqual,
        "&&" => Token::And,
        "||" => Token::Or,
        ">" => Token::Greater,
        "<" => Token::Less,
        "!" => Token::Not,
        "(" => Token::LParen,
        ")" => Token::RParen,
        "." => Token::Dot,
        "," => Token::Comma,
        _ => Token::Minus,
    };
    Some((token, text.len()))
}

fn tokenize(src: &str) -> Result<(Vec<Spanned>, Vec<Reference>), ConditionError> {
    let mut tokens = Vec::new();
    let mut references = Vec::new();
    let mut pos = 0;

    while let Some(ch) = src[pos..].chars().next() {
        let rest = &src[pos..];

        if ch.is_whitespace() {
            pos += ch.len_utf8();
            continue;
        }

        if rest.starts_with("{{") {
            let Some((end, reference)) = node_reference_at(src, pos) else {
                return Err(ConditionError::UnexpectedChar { ch, pos });
            };
            tokens.push(Spanned {
                token: Token::Ref(references.len()),
                pos,
            });
            references.push(reference);
            pos = end;
            continue;
        }

        if ch == '\'' || ch == '"' {
            let (value, len) = scan_string(rest, ch).ok_or(ConditionError::UnterminatedString(pos))?;
            tokens.push(Spanned {
                token: Token::Literal(Value::String(value)),
                pos,
            });
            pos += len;
            continue;
        }

        if ch.is_ascii_digit() {
            let len = scan_number(rest);
            let text = &rest[..len];
            let number: f64 = text.parse().map_err(|_| ConditionError::UnexpectedToken {
                found: text.to_string(),
                pos,
            })?;
            tokens.push(Spanned {
                token: Token::Literal(number_value(number)),
                pos,
            });
            pos += len;
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == '_' || ch == '$' {
            let len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
                .unwrap_or(rest.len());
            let word = &rest[..len];
            let token = match word {
                "true" => Token::Literal(Value::Bool(true)),
                "false" => Token::Literal(Value::Bool(false)),
                "null" | "undefined" => Token::Literal(Value::Null),
                other => match MEMBER_WHITELIST.iter().find(|m| **m == other) {
                    Some(name) => Token::Ident(*name),
                    None => return Err(ConditionError::DisallowedIdentifier(other.to_string())),
                },
            };
            tokens.push(Spanned { token, pos });
            pos += len;
            continue;
        }

        let Some((token, len)) = operator(rest) else {
            return Err(ConditionError::UnexpectedChar { ch, pos });
        };
        tokens.push(Spanned { token, pos });
        pos += len;
    }

    Ok((tokens, references))
}

/// Scan a quoted string starting at `rest[0]`; returns the unescaped value
/// and the byte length consumed including both quotes.
fn scan_string(rest: &str, quote: char) -> Option<(String, usize)> {
    let mut value = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, escaped) = chars.next()?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            }
            c if c == quote => return Some((value, i + c.len_utf8())),
            c => value.push(c),
        }
    }
    None
}

fn scan_number(rest: &str) -> usize {
    let bytes = rest.as_bytes();
    let mut len = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    if bytes.get(len) == Some(&b'.') && bytes.get(len + 1).is_some_and(u8::is_ascii_digit) {
        len += 1;
        len += bytes[len..].iter().take_while(|b| b.is_ascii_digit()).count();
    }
    len
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Includes,
    StartsWith,
    EndsWith,
    ToLowerCase,
    ToUpperCase,
    Trim,
}

impl Method {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "includes" => Method::Includes,
            "startsWith" => Method::StartsWith,
            "endsWith" => Method::EndsWith,
            "toLowerCase" => Method::ToLowerCase,
            "toUpperCase" => Method::ToUpperCase,
            "trim" => Method::Trim,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::Includes => "includes",
            Method::StartsWith => "startsWith",
            Method::EndsWith => "endsWith",
            Method::ToLowerCase => "toLowerCase",
            Method::ToUpperCase => "toUpperCase",
            Method::Trim => "trim",
        }
    }

    fn arity(self) -> usize {
        match self {
            Method::Includes | Method::StartsWith | Method::EndsWith => 1,
            Method::ToLowerCase | Method::ToUpperCase | Method::Trim => 0,
        }
    }
}

/// Parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Positional binding for the n-th node reference.
    Ref(usize),

    Not(Box<Expr>),
    Negate(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),

    Equal(Box<Expr>, Box<Expr>),
    NotEqual(Box<Expr>, Box<Expr>),
    StrictEqual(Box<Expr>, Box<Expr>),
    StrictNotEqual(Box<Expr>, Box<Expr>),
    GreaterThan(Box<Expr>, Box<Expr>),
    GreaterThanOrEqual(Box<Expr>, Box<Expr>),
    LessThan(Box<Expr>, Box<Expr>),
    LessThanOrEqual(Box<Expr>, Box<Expr>),

    Length(Box<Expr>),
    Call {
        target: Box<Expr>,
        method: Method,
        args: Vec<Expr>,
    },
}

impl Expr {
    fn max_ref(&self) -> Option<usize> {
        match self {
            Expr::Literal(_) => None,
            Expr::Ref(i) => Some(*i),
            Expr::Not(e) | Expr::Negate(e) | Expr::Length(e) => e.max_ref(),
            Expr::And(l, r)
            | Expr::Or(l, r)
            | Expr::Equal(l, r)
            | Expr::NotEqual(l, r)
            | Expr::StrictEqual(l, r)
            | Expr::StrictNotEqual(l, r)
            | Expr::GreaterThan(l, r)
            | Expr::GreaterThanOrEqual(l, r)
            | Expr::LessThan(l, r)
            | Expr::LessThanOrEqual(l, r) => l.max_ref().max(r.max_ref()),
            Expr::Call { target, args, .. } => args
                .iter()
                .map(Expr::max_ref)
                .fold(target.max_ref(), Option::max),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binary = |f: &mut fmt::Formatter<'_>, l: &Expr, op: &str, r: &Expr| {
            write!(f, "({l} {op} {r})")
        };
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Ref(i) => write!(f, "__ref{i}"),
            Expr::Not(e) => write!(f, "!{e}"),
            Expr::Negate(e) => write!(f, "-{e}"),
            Expr::And(l, r) => binary(f, l, "&&", r),
            Expr::Or(l, r) => binary(f, l, "||", r),
            Expr::Equal(l, r) => binary(f, l, "==", r),
            Expr::NotEqual(l, r) => binary(f, l, "!=", r),
            Expr::StrictEqual(l, r) => binary(f, l, "===", r),
            Expr::StrictNotEqual(l, r) => binary(f, l, "!==", r),
            Expr::GreaterThan(l, r) => binary(f, l, ">", r),
            Expr::GreaterThanOrEqual(l, r) => binary(f, l, ">=", r),
            Expr::LessThan(l, r) => binary(f, l, "<", r),
            Expr::LessThanOrEqual(l, r) => binary(f, l, "<=", r),
            Expr::Length(e) => write!(f, "{e}.length"),
            Expr::Call {
                target,
                method,
                args,
            } => {
                write!(f, "{target}.{}(", method.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Nesting budget shared by parentheses, unary operators, method arguments,
/// and operator chains. Bounds the depth of the parsed tree, and with it the
/// recursion in both the parser and `eval`.
const MAX_DEPTH: usize = 128;

struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            cursor: 0,
            depth: 0,
        }
    }

    fn descend(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ConditionError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let next = self.tokens.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor += 1;
        }
        next
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), ConditionError> {
        match self.advance() {
            Some(s) if &s.token == token => Ok(()),
            Some(s) => Err(unexpected(&s)),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }

    fn parse(mut self) -> Result<Expr, ConditionError> {
        let expr = self.parse_or()?;
        match self.advance() {
            None => Ok(expr),
            Some(s) => Err(unexpected(&s)),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let base = self.depth;
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            self.descend()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let base = self.depth;
        let mut left = self.parse_equality()?;
        while self.eat(&Token::And) {
            self.descend()?;
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ConditionError> {
        let base = self.depth;
        let mut left = self.parse_relational()?;
        loop {
            let build: fn(Box<Expr>, Box<Expr>) -> Expr = match self.peek() {
                Some(Token::Equal) => Expr::Equal,
                Some(Token::NotEqual) => Expr::NotEqual,
                Some(Token::StrictEqual) => Expr::StrictEqual,
                Some(Token::StrictNotEqual) => Expr::StrictNotEqual,
                _ => {
                    self.depth = base;
                    return Ok(left);
                }
            };
            self.cursor += 1;
            self.descend()?;
            let right = self.parse_relational()?;
            left = build(Box::new(left), Box::new(right));
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, ConditionError> {
        let base = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            let build: fn(Box<Expr>, Box<Expr>) -> Expr = match self.peek() {
                Some(Token::Greater) => Expr::GreaterThan,
                Some(Token::GreaterEqual) => Expr::GreaterThanOrEqual,
                Some(Token::Less) => Expr::LessThan,
                Some(Token::LessEqual) => Expr::LessThanOrEqual,
                _ => {
                    self.depth = base;
                    return Ok(left);
                }
            };
            self.cursor += 1;
            self.descend()?;
            let right = self.parse_unary()?;
            left = build(Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        let build: fn(Box<Expr>) -> Expr = if self.eat(&Token::Not) {
            Expr::Not
        } else if self.eat(&Token::Minus) {
            Expr::Negate
        } else {
            return self.parse_postfix();
        };
        self.descend()?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(build(Box::new(operand)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ConditionError> {
        let base = self.depth;
        let mut expr = self.parse_primary()?;
        while self.eat(&Token::Dot) {
            self.descend()?;
            let member = self.advance().ok_or(ConditionError::UnexpectedEnd)?;
            let Token::Ident(name) = member.token else {
                return Err(unexpected(&member));
            };

            if name == "length" {
                expr = Expr::Length(Box::new(expr));
                continue;
            }

            let method = Method::from_name(name)
                .ok_or_else(|| ConditionError::DisallowedIdentifier(name.to_string()))?;
            self.expect(&Token::LParen)?;
            let mut args = Vec::new();
            if !self.eat(&Token::RParen) {
                loop {
                    args.push(self.parse_or()?);
                    if self.eat(&Token::RParen) {
                        break;
                    }
                    self.expect(&Token::Comma)?;
                }
            }
            if args.len() != method.arity() {
                return Err(ConditionError::Arity {
                    method: method.name(),
                    expected: method.arity(),
                    got: args.len(),
                });
            }
            expr = Expr::Call {
                target: Box::new(expr),
                method,
                args,
            };
        }
        self.depth = base;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let next = self.advance().ok_or(ConditionError::UnexpectedEnd)?;
        match next.token {
            Token::Literal(value) => Ok(Expr::Literal(value)),
            Token::Ref(i) => Ok(Expr::Ref(i)),
            Token::LParen => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            _ => Err(unexpected(&next)),
        }
    }
}

fn unexpected(spanned: &Spanned) -> ConditionError {
    ConditionError::UnexpectedToken {
        found: spanned.token.to_string(),
        pos: spanned.pos,
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(expr: &Expr, bindings: &[Value]) -> Result<Value, ConditionError> {
    let both = |l: &Expr, r: &Expr| -> Result<(Value, Value), ConditionError> {
        Ok((eval(l, bindings)?, eval(r, bindings)?))
    };

    Ok(match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Ref(i) => bindings
            .get(*i)
            .cloned()
            .ok_or(ConditionError::UnboundReference(*i))?,
        Expr::Not(e) => Value::Bool(!truthy(&eval(e, bindings)?)),
        Expr::Negate(e) => number_value(-to_number(&eval(e, bindings)?)),
        Expr::And(l, r) => {
            let left = eval(l, bindings)?;
            if truthy(&left) { eval(r, bindings)? } else { left }
        }
        Expr::Or(l, r) => {
            let left = eval(l, bindings)?;
            if truthy(&left) { left } else { eval(r, bindings)? }
        }
        Expr::Equal(l, r) => {
            let (a, b) = both(l, r)?;
            Value::Bool(loose_equal(&a, &b))
        }
        Expr::NotEqual(l, r) => {
            let (a, b) = both(l, r)?;
            Value::Bool(!loose_equal(&a, &b))
        }
        Expr::StrictEqual(l, r) => {
            let (a, b) = both(l, r)?;
            Value::Bool(strict_equal(&a, &b))
        }
        Expr::StrictNotEqual(l, r) => {
            let (a, b) = both(l, r)?;
            Value::Bool(!strict_equal(&a, &b))
        }
        Expr::GreaterThan(l, r) => {
            let (a, b) = both(l, r)?;
            Value::Bool(compare(&a, &b) == Some(Ordering::Greater))
        }
        Expr::GreaterThanOrEqual(l, r) => {
            let (a, b) = both(l, r)?;
            Value::Bool(matches!(compare(&a, &b), Some(Ordering::Greater | Ordering::Equal)))
        }
        Expr::LessThan(l, r) => {
            let (a, b) = both(l, r)?;
            Value::Bool(compare(&a, &b) == Some(Ordering::Less))
        }
        Expr::LessThanOrEqual(l, r) => {
            let (a, b) = both(l, r)?;
            Value::Bool(matches!(compare(&a, &b), Some(Ordering::Less | Ordering::Equal)))
        }
        Expr::Length(e) => match eval(e, bindings)? {
            Value::String(s) => Value::from(s.chars().count() as u64),
            Value::Array(items) => Value::from(items.len() as u64),
            Value::Null => {
                return Err(ConditionError::Evaluation(
                    "cannot read 'length' of null".to_string(),
                ));
            }
            _ => Value::Null,
        },
        Expr::Call {
            target,
            method,
            args,
        } => {
            let target = eval(target, bindings)?;
            let args = args
                .iter()
                .map(|a| eval(a, bindings))
                .collect::<Result<Vec<_>, _>>()?;
            call_method(&target, *method, &args)?
        }
    })
}

fn call_method(target: &Value, method: Method, args: &[Value]) -> Result<Value, ConditionError> {
    if let (Method::Includes, Value::Array(items)) = (method, target) {
        let needle = args.first();
        return Ok(Value::Bool(
            items.iter().any(|item| needle.is_some_and(|n| strict_equal(item, n))),
        ));
    }

    let Value::String(s) = target else {
        return Err(ConditionError::Evaluation(format!(
            "{}() is not supported on {}",
            method.name(),
            type_name(target)
        )));
    };
    let arg = || args.first().map(js_string).unwrap_or_default();

    Ok(match method {
        Method::Includes => Value::Bool(s.contains(&arg())),
        Method::StartsWith => Value::Bool(s.starts_with(&arg())),
        Method::EndsWith => Value::Bool(s.ends_with(&arg())),
        Method::ToLowerCase => Value::String(s.to_lowercase()),
        Method::ToUpperCase => Value::String(s.to_uppercase()),
        Method::Trim => Value::String(s.trim().to_string()),
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// String conversion for method arguments and loose comparisons.
fn js_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(js_string).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn strict_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn loose_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(x), other) => loose_equal(&Value::from(u8::from(*x)), other),
        (other, Value::Bool(y)) => loose_equal(other, &Value::from(u8::from(*y))),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            to_number(a) == to_number(b)
        }
        (Value::Array(_) | Value::Object(_), Value::String(_) | Value::Number(_)) => {
            loose_equal(&Value::String(js_string(a)), b)
        }
        (Value::String(_) | Value::Number(_), Value::Array(_) | Value::Object(_)) => {
            loose_equal(a, &Value::String(js_string(b)))
        }
        _ => strict_equal(a, b),
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    to_number(a).partial_cmp(&to_number(b))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// A condition that passed pre-validation and is ready to be bound.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCondition {
    expr: Expr,
    references: Vec<Reference>,
}

impl ParsedCondition {
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// References in order of appearance; index `i` binds `__ref{i}`.
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Evaluate against positional bindings and coerce to a boolean.
    pub fn evaluate(&self, bindings: &[Value]) -> Result<bool, ConditionError> {
        eval(&self.expr, bindings).map(|v| truthy(&v))
    }
}

/// Result of evaluating one condition, with audit data for the node output.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionOutcome {
    pub value: bool,
    pub expression: String,
    /// Resolved reference values keyed by `NODEID:LABEL.path`.
    pub resolved_values: Map<String, Value>,
    pub error: Option<String>,
}

impl ConditionOutcome {
    fn literal(value: bool, expression: String) -> Self {
        Self {
            value,
            expression,
            resolved_values: Map::new(),
            error: None,
        }
    }

    fn failed(expression: String, resolved_values: Map<String, Value>, err: &ConditionError) -> Self {
        tracing::warn!(expression = %expression, error = %err, "condition evaluation failed, treating as false");
        Self {
            value: false,
            expression,
            resolved_values,
            error: Some(err.to_string()),
        }
    }

    /// Output data recorded for the condition node.
    pub fn to_output(&self) -> Value {
        let mut output = json!({
            "condition": self.value,
            "expression": self.expression,
            "resolvedValues": Value::Object(self.resolved_values.clone()),
        });
        if let (Some(error), Value::Object(map)) = (&self.error, &mut output) {
            map.insert("error".to_string(), Value::String(error.clone()));
        }
        output
    }
}

/// Stateless evaluator for condition nodes.
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Tokenize and parse the raw expression. Rejects any token outside the
    /// accepted grammar before values are looked up.
    pub fn pre_validate(expression: &str) -> Result<ParsedCondition, ConditionError> {
        let (tokens, references) = tokenize(expression)?;
        if tokens.is_empty() {
            return Err(ConditionError::UnexpectedEnd);
        }
        let expr = Parser::new(tokens).parse()?;
        Ok(ParsedCondition { expr, references })
    }

    /// Confirm every reference in the expression has a bound value.
    pub fn validate(parsed: &ParsedCondition, bindings: &[Value]) -> Result<(), ConditionError> {
        match parsed.expr.max_ref() {
            Some(i) if i >= bindings.len() => Err(ConditionError::UnboundReference(i)),
            _ => Ok(()),
        }
    }

    /// Evaluate a node's condition against accumulated outputs.
    ///
    /// Never fails: a missing condition, an empty string, or any error
    /// yields `false`.
    pub fn evaluate(
        input: Option<&ConditionInput>,
        outputs: &HashMap<String, NodeOutput>,
    ) -> ConditionOutcome {
        let raw = match input {
            None => return ConditionOutcome::literal(false, String::new()),
            Some(ConditionInput::Bool(b)) => return ConditionOutcome::literal(*b, b.to_string()),
            Some(ConditionInput::Expression(raw)) => raw.trim(),
        };
        if raw.is_empty() {
            return ConditionOutcome::literal(false, String::new());
        }

        let parsed = match Self::pre_validate(raw) {
            Ok(parsed) => parsed,
            Err(err) => return ConditionOutcome::failed(raw.to_string(), Map::new(), &err),
        };

        let bindings: Vec<Value> = parsed
            .references
            .iter()
            .map(|r| lookup_reference(outputs, r))
            .collect();
        let resolved_values: Map<String, Value> = parsed
            .references
            .iter()
            .zip(&bindings)
            .map(|(r, v)| (r.display_key(), v.clone()))
            .collect();

        if let Err(err) = Self::validate(&parsed, &bindings) {
            return ConditionOutcome::failed(raw.to_string(), resolved_values, &err);
        }

        match parsed.evaluate(&bindings) {
            Ok(value) => {
                tracing::debug!(expression = raw, bound = %parsed.expr, value, "condition evaluated");
                ConditionOutcome {
                    value,
                    expression: raw.to_string(),
                    resolved_values,
                    error: None,
                }
            }
            Err(err) => ConditionOutcome::failed(raw.to_string(), resolved_values, &err),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
