// SPDX-License-Identifier: MIT OR Apache-2.0
//! The integer-first `cel` expression dialect: lexer, recursive-descent
//! parser, and evaluator over a [`CelValue`] domain.
//!
//! Numeric literals are `i128` only — a literal containing a decimal point
//! is a lex error, not a silently-truncated float. Doubles exist solely as
//! the result of the `double()` coercion function.

use ais_core::runtime::RuntimeRoot;
use serde_json::Value as Json;
use std::fmt;

/// A runtime value produced while evaluating a `cel` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum CelValue {
    /// An arbitrary-precision (within `i128`) integer.
    Int(i128),
    /// A floating-point value, only ever produced by `double()`.
    Double(f64),
    /// A UTF-8 string.
    Str(String),
    /// A boolean.
    Bool(bool),
    /// An ordered list, for `in`/`size`/`exists`/`all`.
    List(Vec<CelValue>),
    /// JSON null.
    Null,
}

impl CelValue {
    /// Coerce to `bool` for conditionals (`&&`, `||`, `!`, ternary guard).
    pub fn truthy(&self) -> Result<bool, CelError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(CelError::TypeError(format!("expected bool, got {}", other.type_name()))),
        }
    }

    fn as_int(&self) -> Result<i128, CelError> {
        match self {
            Self::Int(n) => Ok(*n),
            other => Err(CelError::TypeError(format!("expected int, got {}", other.type_name()))),
        }
    }

    fn as_str(&self) -> Result<&str, CelError> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(CelError::TypeError(format!("expected string, got {}", other.type_name()))),
        }
    }

    /// The `type()` function's string name for this value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Str(_) => "string",
            Self::Bool(_) => "bool",
            Self::List(_) => "list",
            Self::Null => "null",
        }
    }

    /// Convert a [`serde_json::Value`] (as resolved from the Runtime Root)
    /// into a [`CelValue`] for use as an identifier's value.
    #[must_use]
    pub fn from_json(value: &Json) -> Self {
        match value {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i128() {
                    Self::Int(i)
                } else {
                    Self::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => Self::Str(s.clone()),
            Json::Array(arr) => Self::List(arr.iter().map(Self::from_json).collect()),
            Json::Object(_) => Self::Null,
        }
    }

    /// Convert back to [`serde_json::Value`] for use as a resolved binding.
    #[must_use]
    pub fn into_json(self) -> Json {
        match self {
            Self::Int(n) => i64::try_from(n).map(Json::from).unwrap_or_else(|_| {
                serde_json::Number::from_f64(n as f64).map(Json::Number).unwrap_or(Json::Null)
            }),
            Self::Double(d) => serde_json::Number::from_f64(d).map(Json::Number).unwrap_or(Json::Null),
            Self::Str(s) => Json::String(s),
            Self::Bool(b) => Json::Bool(b),
            Self::List(items) => Json::Array(items.into_iter().map(Self::into_json).collect()),
            Self::Null => Json::Null,
        }
    }
}

impl fmt::Display for CelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Null => write!(f, "null"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A `cel` expression evaluation failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CelError {
    /// The expression text could not be tokenized.
    #[error("lex error: {0}")]
    Lex(String),
    /// The token stream did not parse as a valid expression.
    #[error("parse error: {0}")]
    Parse(String),
    /// A value of the wrong type was used where another type was required.
    #[error("type error: {0}")]
    TypeError(String),
    /// An identifier path did not resolve against the Runtime Root.
    #[error("unresolved identifier: {0}")]
    UnresolvedIdentifier(String),
    /// A called function does not exist, or was called with the wrong arity.
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// A glob pattern passed to `matches` failed to compile.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i128),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    In,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    Question,
    Colon,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

fn lex(src: &str) -> Result<Vec<Tok>, CelError> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut toks = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '+' => { toks.push(Tok::Plus); i += 1; }
            '-' => { toks.push(Tok::Minus); i += 1; }
            '*' => { toks.push(Tok::Star); i += 1; }
            '/' => { toks.push(Tok::Slash); i += 1; }
            '%' => { toks.push(Tok::Percent); i += 1; }
            '?' => { toks.push(Tok::Question); i += 1; }
            ':' => { toks.push(Tok::Colon); i += 1; }
            ',' => { toks.push(Tok::Comma); i += 1; }
            '(' => { toks.push(Tok::LParen); i += 1; }
            ')' => { toks.push(Tok::RParen); i += 1; }
            '[' => { toks.push(Tok::LBracket); i += 1; }
            ']' => { toks.push(Tok::RBracket); i += 1; }
            '=' if chars.get(i + 1) == Some(&'=') => { toks.push(Tok::EqEq); i += 2; }
            '!' if chars.get(i + 1) == Some(&'=') => { toks.push(Tok::NotEq); i += 2; }
            '!' => { toks.push(Tok::Bang); i += 1; }
            '<' if chars.get(i + 1) == Some(&'=') => { toks.push(Tok::LtEq); i += 2; }
            '<' => { toks.push(Tok::Lt); i += 1; }
            '>' if chars.get(i + 1) == Some(&'=') => { toks.push(Tok::GtEq); i += 2; }
            '>' => { toks.push(Tok::Gt); i += 1; }
            '&' if chars.get(i + 1) == Some(&'&') => { toks.push(Tok::AndAnd); i += 2; }
            '|' if chars.get(i + 1) == Some(&'|') => { toks.push(Tok::OrOr); i += 2; }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(CelError::Lex("unterminated string literal".to_string())),
                        Some(&q) if q == quote => { i += 1; break; }
                        Some(&'\\') => {
                            i += 1;
                            match chars.get(i) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some(&other) => s.push(other),
                                None => return Err(CelError::Lex("unterminated escape".to_string())),
                            }
                            i += 1;
                        }
                        Some(&other) => { s.push(other); i += 1; }
                    }
                }
                toks.push(Tok::Str(s));
            }
            d if d.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if chars.get(i) == Some(&'.') {
                    return Err(CelError::Lex(
                        "non-integer numeric literals are not supported".to_string(),
                    ));
                }
                let digits: String = chars[start..i].iter().collect();
                let n: i128 = digits
                    .parse()
                    .map_err(|_| CelError::Lex(format!("integer literal out of range: {digits}")))?;
                toks.push(Tok::Int(n));
            }
            a if a.is_alphabetic() || a == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                toks.push(match word.as_str() {
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "null" => Tok::Null,
                    "in" => Tok::In,
                    _ => Tok::Ident(word),
                });
            }
            other => return Err(CelError::Lex(format!("unexpected character: {other}"))),
        }
    }
    Ok(toks)
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(CelValue),
    Ident(String),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    List(Vec<Expr>),
    /// `exists(list, var, predicate)` / `all(list, var, predicate)` — the
    /// two quantifier macros are parsed specially since `var` binds a loop
    /// variable for `predicate`, unlike a plain function call's eagerly
    /// evaluated arguments.
    Quantifier(QuantKind, Box<Expr>, String, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum QuantKind {
    Exists,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

// ---------------------------------------------------------------------------
// Parser (recursive descent, precedence climbing)
// ---------------------------------------------------------------------------

struct Parser<'a> {
    toks: &'a [Tok],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(toks: &'a [Tok]) -> Self {
        Self { toks, pos: 0 }
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Tok> {
        let t = self.toks.get(self.pos);
        self.pos += 1;
        t
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), CelError> {
        if self.peek() == Some(tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(CelError::Parse(format!("expected {tok:?}, found {:?}", self.peek())))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, CelError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, CelError> {
        let cond = self.parse_or()?;
        if self.peek() == Some(&Tok::Question) {
            self.pos += 1;
            let then_branch = self.parse_expr()?;
            self.expect(&Tok::Colon)?;
            let else_branch = self.parse_expr()?;
            Ok(Expr::Ternary(Box::new(cond), Box::new(then_branch), Box::new(else_branch)))
        } else {
            Ok(cond)
        }
    }

    fn parse_or(&mut self) -> Result<Expr, CelError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Tok::OrOr) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, CelError> {
        let mut lhs = self.parse_equality()?;
        while self.peek() == Some(&Tok::AndAnd) {
            self.pos += 1;
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, CelError> {
        let mut lhs = self.parse_membership()?;
        loop {
            let op = match self.peek() {
                Some(&Tok::EqEq) => BinOp::Eq,
                Some(&Tok::NotEq) => BinOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_membership()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_membership(&mut self) -> Result<Expr, CelError> {
        let lhs = self.parse_relational()?;
        if self.peek() == Some(&Tok::In) {
            self.pos += 1;
            let rhs = self.parse_relational()?;
            return Ok(Expr::In(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, CelError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(&Tok::Lt) => BinOp::Lt,
                Some(&Tok::LtEq) => BinOp::Le,
                Some(&Tok::Gt) => BinOp::Gt,
                Some(&Tok::GtEq) => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, CelError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(&Tok::Plus) => BinOp::Add,
                Some(&Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CelError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(&Tok::Star) => BinOp::Mul,
                Some(&Tok::Slash) => BinOp::Div,
                Some(&Tok::Percent) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CelError> {
        match self.peek() {
            Some(&Tok::Minus) => {
                self.pos += 1;
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)))
            }
            Some(&Tok::Bang) => {
                self.pos += 1;
                Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, CelError> {
        match self.advance().cloned() {
            Some(Tok::Int(n)) => Ok(Expr::Lit(CelValue::Int(n))),
            Some(Tok::Str(s)) => Ok(Expr::Lit(CelValue::Str(s))),
            Some(Tok::True) => Ok(Expr::Lit(CelValue::Bool(true))),
            Some(Tok::False) => Ok(Expr::Lit(CelValue::Bool(false))),
            Some(Tok::Null) => Ok(Expr::Lit(CelValue::Null)),
            Some(Tok::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Tok::RBracket) {
                    items.push(self.parse_expr()?);
                    while self.peek() == Some(&Tok::Comma) {
                        self.pos += 1;
                        items.push(self.parse_expr()?);
                    }
                }
                self.expect(&Tok::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Tok::Ident(name)) => {
                if self.peek() == Some(&Tok::LParen) && (name == "exists" || name == "all") {
                    self.pos += 1;
                    let list_expr = self.parse_expr()?;
                    self.expect(&Tok::Comma)?;
                    let var = match self.advance().cloned() {
                        Some(Tok::Ident(v)) => v,
                        other => {
                            return Err(CelError::Parse(format!("expected loop variable, found {other:?}")));
                        }
                    };
                    self.expect(&Tok::Comma)?;
                    let predicate = self.parse_expr()?;
                    self.expect(&Tok::RParen)?;
                    let kind = if name == "exists" { QuantKind::Exists } else { QuantKind::All };
                    return Ok(Expr::Quantifier(kind, Box::new(list_expr), var, Box::new(predicate)));
                }
                if self.peek() == Some(&Tok::LParen) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Tok::RParen) {
                        args.push(self.parse_expr()?);
                        while self.peek() == Some(&Tok::Comma) {
                            self.pos += 1;
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(&Tok::RParen)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            other => Err(CelError::Parse(format!("unexpected token: {other:?}"))),
        }
    }
}

fn parse(src: &str) -> Result<Expr, CelError> {
    let toks = lex(src)?;
    let mut parser = Parser::new(&toks);
    let expr = parser.parse_expr()?;
    if parser.pos != parser.toks.len() {
        return Err(CelError::Parse(format!(
            "unexpected trailing tokens starting at {:?}",
            parser.toks.get(parser.pos)
        )));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate a `cel` expression against the Runtime Root.
///
/// # Errors
///
/// Returns [`CelError`] on lex/parse failure, an unresolved identifier, a
/// type mismatch, or an arithmetic fault (division/modulo by zero).
pub fn eval_cel(src: &str, root: &RuntimeRoot) -> Result<CelValue, CelError> {
    eval_cel_with(src, &|path| root.get(path))
}

/// Evaluate a `cel` expression via a caller-supplied identifier resolver,
/// letting the readiness analyzer overlay `root_overrides` (e.g. `params`)
/// ahead of the Runtime Root proper.
///
/// # Errors
///
/// Returns [`CelError`] on lex/parse failure, an unresolved identifier, a
/// type mismatch, or an arithmetic fault (division/modulo by zero).
pub fn eval_cel_with(src: &str, resolve: &dyn Fn(&str) -> Option<Json>) -> Result<CelValue, CelError> {
    let ast = parse(src)?;
    eval_expr(&ast, resolve)
}

fn eval_expr(expr: &Expr, resolve: &dyn Fn(&str) -> Option<Json>) -> Result<CelValue, CelError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Ident(path) => resolve(path)
            .map(|j| CelValue::from_json(&j))
            .ok_or_else(|| CelError::UnresolvedIdentifier(path.clone())),
        Expr::Unary(UnOp::Neg, inner) => Ok(CelValue::Int(-eval_expr(inner, resolve)?.as_int()?)),
        Expr::Unary(UnOp::Not, inner) => Ok(CelValue::Bool(!eval_expr(inner, resolve)?.truthy()?)),
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, resolve),
        Expr::In(lhs, rhs) => {
            let needle = eval_expr(lhs, resolve)?;
            let haystack = eval_expr(rhs, resolve)?;
            match haystack {
                CelValue::List(items) => Ok(CelValue::Bool(items.contains(&needle))),
                CelValue::Str(s) => {
                    let needle = needle.as_str()?;
                    Ok(CelValue::Bool(s.contains(needle)))
                }
                other => Err(CelError::TypeError(format!(
                    "`in` requires a list or string, got {}",
                    other.type_name()
                ))),
            }
        }
        Expr::Ternary(cond, then_branch, else_branch) => {
            if eval_expr(cond, resolve)?.truthy()? {
                eval_expr(then_branch, resolve)
            } else {
                eval_expr(else_branch, resolve)
            }
        }
        Expr::Call(name, args) => eval_call(name, args, resolve),
        Expr::List(items) => {
            let values = items.iter().map(|e| eval_expr(e, resolve)).collect::<Result<Vec<_>, _>>()?;
            Ok(CelValue::List(values))
        }
        Expr::Quantifier(kind, list_expr, var, predicate) => {
            let CelValue::List(items) = eval_expr(list_expr, resolve)? else {
                return Err(CelError::TypeError(format!("{kind:?} requires a list")));
            };
            let mut any = false;
            for item in &items {
                let item_json = item.clone().into_json();
                let bound = |path: &str| {
                    if path == var { Some(item_json.clone()) } else { resolve(path) }
                };
                let ok = eval_expr(predicate, &bound)?.truthy()?;
                match kind {
                    QuantKind::Exists => {
                        if ok {
                            any = true;
                            break;
                        }
                    }
                    QuantKind::All => {
                        if !ok {
                            return Ok(CelValue::Bool(false));
                        }
                    }
                }
            }
            Ok(CelValue::Bool(match kind {
                QuantKind::Exists => any,
                QuantKind::All => true,
            }))
        }
    }
}

fn eval_binary(
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    resolve: &dyn Fn(&str) -> Option<Json>,
) -> Result<CelValue, CelError> {
    // Short-circuit boolean operators before evaluating the right side.
    if op == BinOp::And {
        return Ok(CelValue::Bool(eval_expr(lhs, resolve)?.truthy()? && eval_expr(rhs, resolve)?.truthy()?));
    }
    if op == BinOp::Or {
        return Ok(CelValue::Bool(eval_expr(lhs, resolve)?.truthy()? || eval_expr(rhs, resolve)?.truthy()?));
    }
    let l = eval_expr(lhs, resolve)?;
    let r = eval_expr(rhs, resolve)?;
    match op {
        BinOp::Add => match (&l, &r) {
            (CelValue::Str(a), CelValue::Str(b)) => Ok(CelValue::Str(format!("{a}{b}"))),
            _ => Ok(CelValue::Int(l.as_int()? + r.as_int()?)),
        },
        BinOp::Sub => Ok(CelValue::Int(l.as_int()? - r.as_int()?)),
        BinOp::Mul => Ok(CelValue::Int(l.as_int()? * r.as_int()?)),
        BinOp::Div => {
            let d = r.as_int()?;
            if d == 0 {
                return Err(CelError::DivisionByZero);
            }
            Ok(CelValue::Int(l.as_int()? / d))
        }
        BinOp::Rem => {
            let d = r.as_int()?;
            if d == 0 {
                return Err(CelError::DivisionByZero);
            }
            Ok(CelValue::Int(l.as_int()? % d))
        }
        BinOp::Eq => Ok(CelValue::Bool(l == r)),
        BinOp::Ne => Ok(CelValue::Bool(l != r)),
        BinOp::Lt => Ok(CelValue::Bool(l.as_int()? < r.as_int()?)),
        BinOp::Le => Ok(CelValue::Bool(l.as_int()? <= r.as_int()?)),
        BinOp::Gt => Ok(CelValue::Bool(l.as_int()? > r.as_int()?)),
        BinOp::Ge => Ok(CelValue::Bool(l.as_int()? >= r.as_int()?)),
        BinOp::And | BinOp::Or => unreachable!("short-circuited above"),
    }
}

fn eval_call(name: &str, args: &[Expr], resolve: &dyn Fn(&str) -> Option<Json>) -> Result<CelValue, CelError> {
    let values = args.iter().map(|e| eval_expr(e, resolve)).collect::<Result<Vec<_>, _>>()?;
    match (name, values.as_slice()) {
        ("size", [CelValue::Str(s)]) => Ok(CelValue::Int(s.chars().count() as i128)),
        ("size", [CelValue::List(items)]) => Ok(CelValue::Int(items.len() as i128)),
        ("contains", [CelValue::Str(s), needle]) => Ok(CelValue::Bool(s.contains(needle.as_str()?))),
        ("starts_with", [CelValue::Str(s), prefix]) => Ok(CelValue::Bool(s.starts_with(prefix.as_str()?))),
        ("ends_with", [CelValue::Str(s), suffix]) => Ok(CelValue::Bool(s.ends_with(suffix.as_str()?))),
        ("matches", [CelValue::Str(s), pattern]) => {
            let pattern = pattern.as_str()?;
            let globset = ais_glob::build_globset(std::slice::from_ref(&pattern.to_string()))
                .map_err(|e| CelError::InvalidPattern(e.to_string()))?;
            Ok(CelValue::Bool(globset.is_some_and(|set| set.is_match(s))))
        }
        ("lower", [CelValue::Str(s)]) => Ok(CelValue::Str(s.to_lowercase())),
        ("upper", [CelValue::Str(s)]) => Ok(CelValue::Str(s.to_uppercase())),
        ("trim", [CelValue::Str(s)]) => Ok(CelValue::Str(s.trim().to_string())),
        ("abs", [v]) => Ok(CelValue::Int(v.as_int()?.abs())),
        ("min", [a, b]) => Ok(CelValue::Int(a.as_int()?.min(b.as_int()?))),
        ("max", [a, b]) => Ok(CelValue::Int(a.as_int()?.max(b.as_int()?))),
        ("ceil", [CelValue::Double(d)]) => Ok(CelValue::Int(d.ceil() as i128)),
        ("ceil", [CelValue::Int(n)]) => Ok(CelValue::Int(*n)),
        ("floor", [CelValue::Double(d)]) => Ok(CelValue::Int(d.floor() as i128)),
        ("floor", [CelValue::Int(n)]) => Ok(CelValue::Int(*n)),
        ("round", [CelValue::Double(d)]) => Ok(CelValue::Int(d.round() as i128)),
        ("round", [CelValue::Int(n)]) => Ok(CelValue::Int(*n)),
        ("mul_div", [a, b, c]) => {
            let (a, b, c) = (a.as_int()?, b.as_int()?, c.as_int()?);
            if c == 0 {
                return Err(CelError::DivisionByZero);
            }
            Ok(CelValue::Int(a * b / c))
        }
        ("int", [CelValue::Str(s)]) => s
            .parse::<i128>()
            .map(CelValue::Int)
            .map_err(|_| CelError::TypeError(format!("cannot parse '{s}' as int"))),
        ("int", [CelValue::Double(d)]) => Ok(CelValue::Int(*d as i128)),
        ("int", [CelValue::Int(n)]) => Ok(CelValue::Int(*n)),
        ("int", [CelValue::Bool(b)]) => Ok(CelValue::Int(i128::from(*b))),
        ("uint", [v]) => {
            let n = v.as_int()?;
            if n < 0 {
                return Err(CelError::TypeError("uint() of a negative value".to_string()));
            }
            Ok(CelValue::Int(n))
        }
        ("double", [CelValue::Int(n)]) => Ok(CelValue::Double(*n as f64)),
        ("double", [CelValue::Double(d)]) => Ok(CelValue::Double(*d)),
        ("double", [CelValue::Str(s)]) => s
            .parse::<f64>()
            .map(CelValue::Double)
            .map_err(|_| CelError::TypeError(format!("cannot parse '{s}' as double"))),
        ("string", [v]) => Ok(CelValue::Str(v.to_string())),
        ("bool", [CelValue::Bool(b)]) => Ok(CelValue::Bool(*b)),
        ("bool", [CelValue::Str(s)]) => match s.as_str() {
            "true" => Ok(CelValue::Bool(true)),
            "false" => Ok(CelValue::Bool(false)),
            other => Err(CelError::TypeError(format!("cannot parse '{other}' as bool"))),
        },
        ("type", [v]) => Ok(CelValue::Str(v.type_name().to_string())),
        ("to_atomic", [value, decimals]) => to_atomic(value, decimals.as_int()?),
        ("to_human", [value, decimals]) => to_human(value, decimals.as_int()?),
        (_, _) => Err(CelError::UnknownFunction(format!("{name}/{}", args.len()))),
    }
}

/// Scale a human-readable decimal amount up to its atomic (base-unit)
/// integer representation, e.g. `to_atomic("1.5", 6) == 1_500_000`.
fn to_atomic(value: &CelValue, decimals: i128) -> Result<CelValue, CelError> {
    let decimals = u32::try_from(decimals)
        .map_err(|_| CelError::TypeError("decimals must be a non-negative int".to_string()))?;
    let text = match value {
        CelValue::Str(s) => s.clone(),
        CelValue::Int(n) => n.to_string(),
        other => return Err(CelError::TypeError(format!("to_atomic expects string or int, got {}", other.type_name()))),
    };
    let (whole, frac) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let whole: i128 = whole
        .parse()
        .map_err(|_| CelError::TypeError(format!("cannot parse '{text}' as a decimal amount")))?;
    let scale = 10i128.pow(decimals);
    let mut frac_digits: String = frac.chars().take(decimals as usize).collect();
    while frac_digits.len() < decimals as usize {
        frac_digits.push('0');
    }
    let frac_value: i128 = if frac_digits.is_empty() {
        0
    } else {
        frac_digits
            .parse()
            .map_err(|_| CelError::TypeError(format!("cannot parse fractional part of '{text}'")))?
    };
    Ok(CelValue::Int(whole * scale + frac_value))
}

/// Scale an atomic integer amount down to its human-readable decimal string,
/// e.g. `to_human(1_500_000, 6) == "1.5"`.
fn to_human(value: &CelValue, decimals: i128) -> Result<CelValue, CelError> {
    let decimals = u32::try_from(decimals)
        .map_err(|_| CelError::TypeError("decimals must be a non-negative int".to_string()))?;
    let amount = value.as_int()?;
    let scale = 10i128.pow(decimals);
    let whole = amount / scale;
    let frac = (amount % scale).abs();
    if decimals == 0 {
        return Ok(CelValue::Str(whole.to_string()));
    }
    let frac_str = format!("{:0width$}", frac, width = decimals as usize);
    let trimmed = frac_str.trim_end_matches('0');
    if trimmed.is_empty() {
        Ok(CelValue::Str(whole.to_string()))
    } else {
        Ok(CelValue::Str(format!("{whole}.{trimmed}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn root_with_inputs(pairs: &[(&str, Json)]) -> RuntimeRoot {
        let mut root = RuntimeRoot::new();
        root.set_inputs(Map::from_iter(pairs.iter().map(|(k, v)| (k.to_string(), v.clone()))));
        root
    }

    #[test]
    fn arithmetic_precedence() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("2 + 3 * 4", &root).unwrap(), CelValue::Int(14));
        assert_eq!(eval_cel("(2 + 3) * 4", &root).unwrap(), CelValue::Int(20));
    }

    #[test]
    fn comparison_and_logic() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("1 < 2 && 3 > 2", &root).unwrap(), CelValue::Bool(true));
        assert_eq!(eval_cel("1 == 1 || false", &root).unwrap(), CelValue::Bool(true));
    }

    #[test]
    fn ternary_selects_branch() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("1 < 2 ? 10 : 20", &root).unwrap(), CelValue::Int(10));
    }

    #[test]
    fn unary_negation_and_not() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("-5 + 2", &root).unwrap(), CelValue::Int(-3));
        assert_eq!(eval_cel("!(1 == 2)", &root).unwrap(), CelValue::Bool(true));
    }

    #[test]
    fn ident_resolves_dotted_path() {
        let root = root_with_inputs(&[("amount", serde_json::json!(42))]);
        assert_eq!(eval_cel("inputs.amount", &root).unwrap(), CelValue::Int(42));
    }

    #[test]
    fn ident_missing_errors() {
        let root = RuntimeRoot::new();
        assert_eq!(
            eval_cel("inputs.missing", &root).unwrap_err(),
            CelError::UnresolvedIdentifier("inputs.missing".to_string())
        );
    }

    #[test]
    fn in_checks_list_membership() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("2 in [1, 2, 3]", &root).unwrap(), CelValue::Bool(true));
        assert_eq!(eval_cel("5 in [1, 2, 3]", &root).unwrap(), CelValue::Bool(false));
    }

    #[test]
    fn in_checks_substring() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("\"ab\" in \"xabz\"", &root).unwrap(), CelValue::Bool(true));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("1 / 0", &root).unwrap_err(), CelError::DivisionByZero);
    }

    #[test]
    fn string_functions() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("size(\"hello\")", &root).unwrap(), CelValue::Int(5));
        assert_eq!(eval_cel("contains(\"hello\", \"ell\")", &root).unwrap(), CelValue::Bool(true));
        assert_eq!(eval_cel("starts_with(\"hello\", \"he\")", &root).unwrap(), CelValue::Bool(true));
        assert_eq!(eval_cel("ends_with(\"hello\", \"lo\")", &root).unwrap(), CelValue::Bool(true));
        assert_eq!(eval_cel("upper(\"hi\")", &root).unwrap(), CelValue::Str("HI".to_string()));
        assert_eq!(eval_cel("lower(\"HI\")", &root).unwrap(), CelValue::Str("hi".to_string()));
        assert_eq!(eval_cel("trim(\"  hi  \")", &root).unwrap(), CelValue::Str("hi".to_string()));
    }

    #[test]
    fn matches_uses_glob_semantics() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("matches(\"eip155:1\", \"eip155:*\")", &root).unwrap(), CelValue::Bool(true));
        assert_eq!(eval_cel("matches(\"solana:x\", \"eip155:*\")", &root).unwrap(), CelValue::Bool(false));
    }

    #[test]
    fn math_functions() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("abs(-5)", &root).unwrap(), CelValue::Int(5));
        assert_eq!(eval_cel("min(3, 7)", &root).unwrap(), CelValue::Int(3));
        assert_eq!(eval_cel("max(3, 7)", &root).unwrap(), CelValue::Int(7));
        assert_eq!(eval_cel("mul_div(3, 10, 2)", &root).unwrap(), CelValue::Int(15));
    }

    #[test]
    fn type_coercion_functions() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("int(\"42\")", &root).unwrap(), CelValue::Int(42));
        assert_eq!(eval_cel("string(42)", &root).unwrap(), CelValue::Str("42".to_string()));
        assert_eq!(eval_cel("bool(\"true\")", &root).unwrap(), CelValue::Bool(true));
        assert_eq!(eval_cel("type(42)", &root).unwrap(), CelValue::Str("int".to_string()));
    }

    #[test]
    fn collection_size() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("size([1, 2, 3])", &root).unwrap(), CelValue::Int(3));
    }

    #[test]
    fn to_atomic_and_to_human_round_trip() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("to_atomic(\"1.5\", 6)", &root).unwrap(), CelValue::Int(1_500_000));
        assert_eq!(
            eval_cel("to_human(1500000, 6)", &root).unwrap(),
            CelValue::Str("1.5".to_string())
        );
    }

    #[test]
    fn to_atomic_handles_whole_numbers() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("to_atomic(\"2\", 9)", &root).unwrap(), CelValue::Int(2_000_000_000));
    }

    #[test]
    fn non_integer_literal_is_a_lex_error() {
        let root = RuntimeRoot::new();
        assert!(matches!(eval_cel("1.5 + 1", &root), Err(CelError::Lex(_))));
    }

    #[test]
    fn unknown_function_errors() {
        let root = RuntimeRoot::new();
        assert!(matches!(eval_cel("nope(1)", &root), Err(CelError::UnknownFunction(_))));
    }

    #[test]
    fn exists_quantifier_true_when_any_element_matches() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("exists([1, 2, 3], x, x > 2)", &root).unwrap(), CelValue::Bool(true));
        assert_eq!(eval_cel("exists([1, 2, 3], x, x > 5)", &root).unwrap(), CelValue::Bool(false));
    }

    #[test]
    fn all_quantifier_true_only_when_every_element_matches() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("all([1, 2, 3], x, x > 0)", &root).unwrap(), CelValue::Bool(true));
        assert_eq!(eval_cel("all([1, 2, 3], x, x > 1)", &root).unwrap(), CelValue::Bool(false));
    }

    #[test]
    fn string_concatenation_with_plus() {
        let root = RuntimeRoot::new();
        assert_eq!(eval_cel("\"a\" + \"b\"", &root).unwrap(), CelValue::Str("ab".to_string()));
    }
}
