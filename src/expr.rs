//! The expression subset templates may use: identifiers, member access,
//! literals, arithmetic and string concatenation, comparisons, logical
//! operators and the ternary. Evaluation never fails; missing names and
//! members evaluate to `null`.

use std::borrow::Cow;
use std::collections::HashMap;

use indexmap::IndexMap;
use thiserror::Error;

use crate::brackets::scan_balanced;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at offset {offset})")]
pub struct ExprError {
    pub message: String,
    pub offset: usize,
}

impl ExprError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

type ExprResult<T> = Result<T, ExprError>;

/// Name resolution for expression evaluation.
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

impl Scope for Value {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl Scope for HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl Scope for IndexMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
}

/// An unbuffered statement (`- var x = 1`, `- x += 2`, `- i++`).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Declare { name: String, value: Expr },
    Assign { name: String, op: AssignOp, value: Expr },
}

impl AssignOp {
    /// The value a binding holds after the assignment.
    pub fn apply(self, current: &Value, value: Value) -> Value {
        match self {
            Self::Set => value,
            Self::Add => eval_binary(BinaryOp::Add, current, &value),
            Self::Sub => eval_binary(BinaryOp::Sub, current, &value),
        }
    }
}

impl Statement {
    pub fn name(&self) -> &str {
        match self {
            Self::Declare { name, .. } | Self::Assign { name, .. } => name,
        }
    }

    /// Parses one or more `;`-separated statements.
    pub fn parse_all(src: &str) -> ExprResult<Vec<Self>> {
        let tokens = tokenize(src)?;
        let mut parser = ExprParser::new(src, tokens);
        let mut statements = Vec::new();
        loop {
            while parser.eat_punct(";") {}
            if parser.at_end() {
                break;
            }
            statements.push(parser.parse_statement()?);
            if !parser.at_end() && !parser.eat_punct(";") {
                return Err(parser.error_here("expected `;` or end of statement"));
            }
        }
        if statements.is_empty() {
            return Err(ExprError::new("expected a statement", 0));
        }
        Ok(statements)
    }
}

impl Expr {
    pub fn parse(src: &str) -> ExprResult<Self> {
        let tokens = tokenize(src)?;
        let mut parser = ExprParser::new(src, tokens);
        if parser.at_end() {
            return Err(ExprError::new("expected an expression", 0));
        }
        let expr = parser.parse_ternary()?;
        if !parser.at_end() {
            return Err(parser.error_here("unexpected trailing input"));
        }
        Ok(expr)
    }

    /// Parses a comma-separated list, as used by mixin call arguments.
    pub fn parse_list(src: &str) -> ExprResult<Vec<Self>> {
        let tokens = tokenize(src)?;
        let mut parser = ExprParser::new(src, tokens);
        let mut items = Vec::new();
        while !parser.at_end() {
            items.push(parser.parse_ternary()?);
            if !parser.eat_punct(",") {
                break;
            }
        }
        if !parser.at_end() {
            return Err(parser.error_here("expected `,` between arguments"));
        }
        Ok(items)
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// The constant value of a literal expression, if it is one.
    pub const fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(value) => Some(value),
            Self::Ident(_)
            | Self::Array(_)
            | Self::Object(_)
            | Self::Member { .. }
            | Self::Index { .. }
            | Self::Unary { .. }
            | Self::Binary { .. }
            | Self::Conditional { .. } => None,
        }
    }

    pub fn eval(&self, scope: &dyn Scope) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Ident(_) | Self::Member { .. } | Self::Index { .. } => {
                self.eval_path(scope).into_owned()
            }
            Self::Array(items) => Value::Array(items.iter().map(|item| item.eval(scope)).collect()),
            Self::Object(props) => Value::Map(
                props
                    .iter()
                    .map(|(key, value)| (key.clone(), value.eval(scope)))
                    .collect(),
            ),
            Self::Unary { op, operand } => eval_unary(*op, &operand.eval(scope)),
            Self::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let left = left.eval(scope);
                if left.is_truthy() {
                    right.eval(scope)
                } else {
                    left
                }
            }
            Self::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                let left = left.eval(scope);
                if left.is_truthy() {
                    left
                } else {
                    right.eval(scope)
                }
            }
            Self::Binary { op, left, right } => {
                eval_binary(*op, &left.eval(scope), &right.eval(scope))
            }
            Self::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if test.eval(scope).is_truthy() {
                    consequent.eval(scope)
                } else {
                    alternate.eval(scope)
                }
            }
        }
    }

    /// Evaluates identifier and member chains without cloning intermediate
    /// objects.
    fn eval_path<'s>(&self, scope: &'s dyn Scope) -> Cow<'s, Value> {
        match self {
            Self::Ident(name) => scope
                .lookup(name)
                .map_or(Cow::Owned(Value::Null), Cow::Borrowed),
            Self::Member { object, property } => member(object.eval_path(scope), property),
            Self::Index { object, index } => {
                let key = index.eval(scope);
                match &key {
                    Value::String(property) => member(object.eval_path(scope), property),
                    Value::Int(_) | Value::Float(_) => {
                        index_value(object.eval_path(scope), key.to_number())
                    }
                    Value::Null
                    | Value::Bool(_)
                    | Value::Array(_)
                    | Value::Map(_) => member(object.eval_path(scope), &key.to_output()),
                }
            }
            Self::Literal(_)
            | Self::Array(_)
            | Self::Object(_)
            | Self::Unary { .. }
            | Self::Binary { .. }
            | Self::Conditional { .. } => Cow::Owned(self.eval(scope)),
        }
    }

    /// Root identifiers this expression reads.
    pub fn collect_identifiers<'e>(&'e self, out: &mut Vec<&'e str>) {
        match self {
            Self::Literal(_) => {}
            Self::Ident(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Self::Array(items) => {
                for item in items {
                    item.collect_identifiers(out);
                }
            }
            Self::Object(props) => {
                for (_, value) in props {
                    value.collect_identifiers(out);
                }
            }
            Self::Member { object, .. } => object.collect_identifiers(out),
            Self::Index { object, index } => {
                object.collect_identifiers(out);
                index.collect_identifiers(out);
            }
            Self::Unary { operand, .. } => operand.collect_identifiers(out),
            Self::Binary { left, right, .. } => {
                left.collect_identifiers(out);
                right.collect_identifiers(out);
            }
            Self::Conditional {
                test,
                consequent,
                alternate,
            } => {
                test.collect_identifiers(out);
                consequent.collect_identifiers(out);
                alternate.collect_identifiers(out);
            }
        }
    }
}

fn property_of(value: &Value, property: &str) -> Value {
    if property == "length" {
        value.length().map_or(Value::Null, Value::from)
    } else {
        Value::Null
    }
}

fn member<'s>(object: Cow<'s, Value>, property: &str) -> Cow<'s, Value> {
    match object {
        Cow::Borrowed(value) => match value {
            Value::Map(map) => map.get(property).map_or_else(
                || Cow::Owned(property_of(value, property)),
                Cow::Borrowed,
            ),
            other => Cow::Owned(property_of(other, property)),
        },
        Cow::Owned(Value::Map(mut map)) => match map.swap_remove(property) {
            Some(found) => Cow::Owned(found),
            None => Cow::Owned(property_of(&Value::Map(map), property)),
        },
        Cow::Owned(other) => Cow::Owned(property_of(&other, property)),
    }
}

fn index_value(object: Cow<'_, Value>, index: f64) -> Cow<'_, Value> {
    if index < 0.0 || index.fract() != 0.0 || !index.is_finite() {
        return Cow::Owned(Value::Null);
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "checked above")]
    let position = index as usize;
    match object {
        Cow::Borrowed(Value::Array(items)) => items
            .get(position)
            .map_or(Cow::Owned(Value::Null), Cow::Borrowed),
        Cow::Owned(Value::Array(mut items)) if position < items.len() => {
            Cow::Owned(items.swap_remove(position))
        }
        Cow::Borrowed(Value::String(s)) => Cow::Owned(
            s.chars()
                .nth(position)
                .map_or(Value::Null, |c| Value::String(c.to_string())),
        ),
        Cow::Owned(Value::String(s)) => Cow::Owned(
            s.chars()
                .nth(position)
                .map_or(Value::Null, |c| Value::String(c.to_string())),
        ),
        other => member(other, &position.to_string()),
    }
}

fn eval_unary(op: UnaryOp, value: &Value) -> Value {
    match op {
        UnaryOp::Not => Value::Bool(!value.is_truthy()),
        UnaryOp::Neg => match value {
            Value::Int(i) => i.checked_neg().map_or(Value::Float(-value.to_number()), Value::Int),
            other => Value::Float(-other.to_number()),
        },
        UnaryOp::Plus => match value {
            Value::Int(i) => Value::Int(*i),
            other => Value::Float(other.to_number()),
        },
    }
}

/// Integer operands stay integers as long as the result fits.
fn integer_operand(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Null => Some(0),
        Value::Float(_) | Value::String(_) | Value::Array(_) | Value::Map(_) => None,
    }
}

fn arithmetic(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    if let (Some(a), Some(b)) = (integer_operand(left), integer_operand(right)) {
        if let Some(result) = int_op(a, b) {
            return Value::Int(result);
        }
    }
    Value::Float(float_op(left.to_number(), right.to_number()))
}

fn is_stringish(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Array(_) | Value::Map(_))
}

fn eval_binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add if is_stringish(left) || is_stringish(right) => {
            let mut out = left.to_output();
            out.push_str(&right.to_output());
            Value::String(out)
        }
        BinaryOp::Add => arithmetic(left, right, i64::checked_add, |a, b| a + b),
        BinaryOp::Sub => arithmetic(left, right, i64::checked_sub, |a, b| a - b),
        BinaryOp::Mul => arithmetic(left, right, i64::checked_mul, |a, b| a * b),
        BinaryOp::Div => arithmetic(
            left,
            right,
            |a, b| {
                if b != 0 && a.checked_rem(b) == Some(0) {
                    a.checked_div(b)
                } else {
                    None
                }
            },
            |a, b| a / b,
        ),
        BinaryOp::Rem => arithmetic(
            left,
            right,
            |a, b| if b == 0 { None } else { a.checked_rem(b) },
            |a, b| a % b,
        ),
        BinaryOp::Eq => Value::Bool(left.loose_eq(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_eq(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_eq(right)),
        BinaryOp::Lt => Value::Bool(left.compare(right).is_some_and(|o| o.is_lt())),
        BinaryOp::LtEq => Value::Bool(left.compare(right).is_some_and(|o| o.is_le())),
        BinaryOp::Gt => Value::Bool(left.compare(right).is_some_and(|o| o.is_gt())),
        BinaryOp::GtEq => Value::Bool(left.compare(right).is_some_and(|o| o.is_ge())),
        // Short-circuiting forms are handled in `Expr::eval`.
        BinaryOp::And => {
            if left.is_truthy() {
                right.clone()
            } else {
                left.clone()
            }
        }
        BinaryOp::Or => {
            if left.is_truthy() {
                left.clone()
            } else {
                right.clone()
            }
        }
    }
}

// --- Tokenizer ---

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(Value),
    Str(String),
    /// Template literal parts, already parsed.
    Template(Vec<Expr>),
    Ident(String),
    Punct(&'static str),
}

const PUNCTUATION: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=", "-=", "+", "-", "*", "/",
    "%", "<", ">", "!", "?", ":", ".", ",", "(", ")", "[", "]", "{", "}", "=", ";",
];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn tokenize(src: &str) -> ExprResult<Vec<(Tok, usize)>> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(c) = src[pos..].chars().next() {
        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }
        let start = pos;

        if c.is_ascii_digit()
            || (c == '.' && src[pos + 1..].starts_with(|n: char| n.is_ascii_digit()))
        {
            let (value, len) = scan_number(&src[pos..], start)?;
            tokens.push((Tok::Number(value), start));
            pos += len;
        } else if c == '\'' || c == '"' {
            let (value, len) = scan_string(&src[pos..], start)?;
            tokens.push((Tok::Str(value), start));
            pos += len;
        } else if c == '`' {
            let (parts, len) = scan_template(&src[pos..], start)?;
            tokens.push((Tok::Template(parts), start));
            pos += len;
        } else if is_ident_start(c) {
            let len = src[pos..]
                .find(|ch: char| !is_ident_char(ch))
                .unwrap_or(src.len() - pos);
            tokens.push((Tok::Ident(src[pos..pos + len].to_string()), start));
            pos += len;
        } else if let Some(punct) = PUNCTUATION.iter().find(|p| src[pos..].starts_with(**p)) {
            tokens.push((Tok::Punct(punct), start));
            pos += punct.len();
        } else {
            return Err(ExprError::new(format!("unexpected character `{c}`"), start));
        }
    }

    Ok(tokens)
}

fn scan_number(src: &str, base: usize) -> ExprResult<(Value, usize)> {
    let bytes = src.as_bytes();
    let mut len = 0;
    let mut is_float = false;
    while len < bytes.len() && bytes[len].is_ascii_digit() {
        len += 1;
    }
    if len < bytes.len() && bytes[len] == b'.' && bytes.get(len + 1).is_some_and(u8::is_ascii_digit)
    {
        is_float = true;
        len += 1;
        while len < bytes.len() && bytes[len].is_ascii_digit() {
            len += 1;
        }
    }
    if len < bytes.len() && (bytes[len] == b'e' || bytes[len] == b'E') {
        let mut exp = len + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            is_float = true;
            len = exp;
            while len < bytes.len() && bytes[len].is_ascii_digit() {
                len += 1;
            }
        }
    }
    let text = &src[..len];
    if !is_float {
        if let Ok(i) = text.parse::<i64>() {
            return Ok((Value::Int(i), len));
        }
    }
    text.parse::<f64>()
        .map(|f| (Value::Float(f), len))
        .map_err(|_| ExprError::new(format!("invalid number `{text}`"), base))
}

/// Reads the escape after a backslash; returns the produced char and bytes consumed.
fn scan_escape(rest: &str, offset: usize) -> ExprResult<(Option<char>, usize)> {
    let Some(c) = rest.chars().next() else {
        return Err(ExprError::new("unterminated escape sequence", offset));
    };
    let simple = match c {
        'n' => Some('\n'),
        't' => Some('\t'),
        'r' => Some('\r'),
        '0' => Some('\0'),
        'b' => Some('\u{8}'),
        'f' => Some('\u{c}'),
        'v' => Some('\u{b}'),
        '\n' => return Ok((None, 1)),
        'u' | 'x' => None,
        other => Some(other),
    };
    if let Some(ch) = simple {
        return Ok((Some(ch), c.len_utf8()));
    }
    let digits = if c == 'u' { 4 } else { 2 };
    let hex = rest.get(1..=digits).unwrap_or_default();
    let code = u32::from_str_radix(hex, 16)
        .ok()
        .filter(|_| hex.len() == digits)
        .and_then(char::from_u32)
        .ok_or_else(|| ExprError::new("invalid escape sequence", offset))?;
    Ok((Some(code), 1 + digits))
}

fn scan_string(src: &str, base: usize) -> ExprResult<(String, usize)> {
    let Some(quote) = src.chars().next() else {
        return Err(ExprError::new("expected a string", base));
    };
    let mut out = String::new();
    let mut pos = quote.len_utf8();
    while let Some(c) = src[pos..].chars().next() {
        match c {
            c if c == quote => return Ok((out, pos + 1)),
            '\\' => {
                let (ch, len) = scan_escape(&src[pos + 1..], base + pos)?;
                out.extend(ch);
                pos += 1 + len;
            }
            '\n' => return Err(ExprError::new("unterminated string", base)),
            c => {
                out.push(c);
                pos += c.len_utf8();
            }
        }
    }
    Err(ExprError::new("unterminated string", base))
}

/// A template literal becomes a concatenation chain seeded with `""`.
fn scan_template(src: &str, base: usize) -> ExprResult<(Vec<Expr>, usize)> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut pos = 1;
    while let Some(c) = src[pos..].chars().next() {
        match c {
            '`' => {
                if !literal.is_empty() {
                    parts.push(Expr::Literal(Value::String(literal)));
                }
                return Ok((parts, pos + 1));
            }
            '\\' => {
                let (ch, len) = scan_escape(&src[pos + 1..], base + pos)?;
                literal.extend(ch);
                pos += 1 + len;
            }
            '$' if src[pos + 1..].starts_with('{') => {
                let inner_start = pos + 2;
                let close = scan_balanced(&src[inner_start..], '{')
                    .map_err(|e| ExprError::new("unbalanced `${` in template literal", base + inner_start + e.offset))?;
                if !literal.is_empty() {
                    parts.push(Expr::Literal(Value::String(std::mem::take(&mut literal))));
                }
                let inner = &src[inner_start..inner_start + close];
                let expr = Expr::parse(inner)
                    .map_err(|e| ExprError::new(e.message, base + inner_start + e.offset))?;
                parts.push(expr);
                pos = inner_start + close + 1;
            }
            c => {
                literal.push(c);
                pos += c.len_utf8();
            }
        }
    }
    Err(ExprError::new("unterminated template literal", base))
}

// --- Parser ---

struct ExprParser<'a> {
    src: &'a str,
    tokens: Vec<(Tok, usize)>,
    pos: usize,
}

impl<'a> ExprParser<'a> {
    const fn new(src: &'a str, tokens: Vec<(Tok, usize)>) -> Self {
        Self {
            src,
            tokens,
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.src.len(), |(_, offset)| *offset)
    }

    fn error_here(&self, message: &str) -> ExprError {
        ExprError::new(message, self.offset())
    }

    fn peek_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(Tok::Punct(p)) if *p == punct)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.peek_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> ExprResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error_here(&format!("expected `{punct}`")))
        }
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|(tok, _)| tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect_ident(&mut self) -> ExprResult<String> {
        if let Some(Tok::Ident(name)) = self.peek() {
            let name = name.clone();
            self.pos += 1;
            Ok(name)
        } else {
            Err(self.error_here("expected an identifier"))
        }
    }

    fn parse_statement(&mut self) -> ExprResult<Statement> {
        let declare = matches!(self.peek(), Some(Tok::Ident(kw)) if matches!(kw.as_str(), "var" | "let" | "const"));
        if declare {
            self.pos += 1;
            let name = self.expect_ident()?;
            let value = if self.eat_punct("=") {
                self.parse_ternary()?
            } else {
                Expr::Literal(Value::Null)
            };
            return Ok(Statement::Declare { name, value });
        }

        let name = self.expect_ident()?;
        let (op, value) = if self.eat_punct("=") {
            (AssignOp::Set, self.parse_ternary()?)
        } else if self.eat_punct("+=") {
            (AssignOp::Add, self.parse_ternary()?)
        } else if self.eat_punct("-=") {
            (AssignOp::Sub, self.parse_ternary()?)
        } else if self.eat_punct("++") {
            (AssignOp::Add, Expr::literal(1))
        } else if self.eat_punct("--") {
            (AssignOp::Sub, Expr::literal(1))
        } else {
            return Err(self.error_here("only declarations and assignments are supported"));
        };
        Ok(Statement::Assign { name, op, value })
    }

    fn parse_ternary(&mut self) -> ExprResult<Expr> {
        let test = self.parse_or()?;
        if self.eat_punct("?") {
            let consequent = self.parse_ternary()?;
            self.expect_punct(":")?;
            let alternate = self.parse_ternary()?;
            return Ok(Expr::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            });
        }
        Ok(test)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> ExprResult<Expr>,
    ) -> ExprResult<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat_punct(punct) {
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn parse_or(&mut self) -> ExprResult<Expr> {
        self.parse_binary_level(&[("||", BinaryOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> ExprResult<Expr> {
        self.parse_binary_level(&[("&&", BinaryOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> ExprResult<Expr> {
        self.parse_binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNotEq),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::NotEq),
            ],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> ExprResult<Expr> {
        self.parse_binary_level(
            &[
                ("<=", BinaryOp::LtEq),
                (">=", BinaryOp::GtEq),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> ExprResult<Expr> {
        self.parse_binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> ExprResult<Expr> {
        self.parse_binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> ExprResult<Expr> {
        let op = if self.eat_punct("!") {
            UnaryOp::Not
        } else if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("+") {
            UnaryOp::Plus
        } else {
            return self.parse_postfix();
        };
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> ExprResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                let property = self.expect_ident()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat_punct("[") {
                let index = self.parse_ternary()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.peek_punct("(") {
                return Err(self.error_here("function calls are not supported"));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> ExprResult<Expr> {
        let offset = self.offset();
        match self.next() {
            Some(Tok::Number(value)) => Ok(Expr::Literal(value)),
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Tok::Template(parts)) => Ok(parts.into_iter().fold(
                Expr::literal(""),
                |left, right| Expr::Binary {
                    op: BinaryOp::Add,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            )),
            Some(Tok::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::literal(true),
                "false" => Expr::literal(false),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Ident(name),
            }),
            Some(Tok::Punct("(")) => {
                let inner = self.parse_ternary()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Some(Tok::Punct("[")) => {
                let mut items = Vec::new();
                while !self.peek_punct("]") {
                    items.push(self.parse_ternary()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
                Ok(Expr::Array(items))
            }
            Some(Tok::Punct("{")) => self.parse_object(),
            Some(_) => Err(ExprError::new("unexpected token", offset)),
            None => Err(ExprError::new("unexpected end of expression", offset)),
        }
    }

    fn parse_object(&mut self) -> ExprResult<Expr> {
        let mut props = Vec::new();
        while !self.peek_punct("}") {
            let offset = self.offset();
            let (key, shorthand) = match self.next() {
                Some(Tok::Ident(name)) => (name, true),
                Some(Tok::Str(s)) => (s, false),
                Some(Tok::Number(n)) => (n.to_output(), false),
                _ => return Err(ExprError::new("expected a property name", offset)),
            };
            let value = if self.eat_punct(":") {
                self.parse_ternary()?
            } else if shorthand {
                Expr::Ident(key.clone())
            } else {
                return Err(self.error_here("expected `:`"));
            };
            props.push((key, value));
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(Expr::Object(props))
    }
}
