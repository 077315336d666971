//! Jinja-flavoured text templates for prompts and report bodies.
//!
//! Supported syntax: `{{ expr | filter(args) }}` output, `{% if %}` with
//! `elif`/`else`, `{% for x in xs %}` and `{% for k, v in map %}` with a
//! `loop` object, `{# comments #}`, and `-` on any delimiter to trim the
//! neighbouring whitespace. Missing values render as empty text.

mod filters;

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use dproc_core::{format_number, number_value};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{ReportError, Result};

pub use filters::{format_grouped, FILTER_NAMES};

static FOR_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_]\w*)(?:\s*,\s*([A-Za-z_]\w*))?\s+in\s+(.+?)\s*$")
        .expect("valid regex")
});

/// Renders template text against a JSON context.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, context: &Value) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn render_file(&self, path: &Path, context: &Value) -> Result<String> {
        if !path.exists() {
            return Err(ReportError::TemplateNotFound(path.to_path_buf()));
        }
        let source = fs::read_to_string(path)?;
        self.render(&source, context)
    }
}

impl TemplateRenderer for TemplateEngine {
    fn render(&self, template: &str, context: &Value) -> Result<String> {
        let segments = split_segments(template)?;
        let mut parser = BlockParser {
            segments,
            pos: 0,
        };
        let (nodes, _) = parser.parse_nodes(&[])?;
        let mut scope = Scope {
            root: context,
            frames: Vec::new(),
        };
        let mut out = String::with_capacity(template.len());
        render_nodes(&nodes, &mut scope, &mut out)?;
        Ok(out)
    }
}

fn template_error(message: impl Into<String>) -> ReportError {
    ReportError::Template(message.into())
}

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Output(String),
    Tag(String),
}

fn find_open(text: &str) -> Option<(usize, u8)> {
    let bytes = text.as_bytes();
    text.match_indices('{').find_map(|(idx, _)| match bytes.get(idx + 1) {
        Some(kind @ (b'{' | b'%' | b'#')) => Some((idx, *kind)),
        _ => None,
    })
}

fn split_segments(source: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut trim_next = false;
    loop {
        let Some((start, kind)) = find_open(rest) else {
            let text = if trim_next { rest.trim_start() } else { rest };
            if !text.is_empty() {
                segments.push(Segment::Text(text.to_string()));
            }
            return Ok(segments);
        };
        let after = &rest[start + 2..];
        let trim_prev = after.starts_with('-');
        let mut text = &rest[..start];
        if trim_next {
            text = text.trim_start();
        }
        if trim_prev {
            text = text.trim_end();
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text.to_string()));
        }

        let close = match kind {
            b'{' => "}}",
            b'%' => "%}",
            _ => "#}",
        };
        let end = after
            .find(close)
            .ok_or_else(|| template_error(format!("unclosed delimiter, expected {close}")))?;
        let mut inner = &after[..end];
        if trim_prev {
            inner = &inner[1..];
        }
        trim_next = inner.ends_with('-');
        if trim_next {
            inner = &inner[..inner.len() - 1];
        }
        match kind {
            b'{' => segments.push(Segment::Output(inner.trim().to_string())),
            b'%' => segments.push(Segment::Tag(inner.trim().to_string())),
            _ => {}
        }
        rest = &after[end + close.len()..];
    }
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Output(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    For {
        key: Option<String>,
        item: String,
        iterable: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

struct BlockParser {
    segments: Vec<Segment>,
    pos: usize,
}

fn keyword(tag: &str) -> (&str, &str) {
    let tag = tag.trim();
    match tag.find(char::is_whitespace) {
        Some(idx) => (&tag[..idx], tag[idx..].trim()),
        None => (tag, ""),
    }
}

impl BlockParser {
    /// Parses until one of `until` opens a tag; returns that tag's text.
    fn parse_nodes(&mut self, until: &[&str]) -> Result<(Vec<Node>, Option<String>)> {
        let mut nodes = Vec::new();
        while let Some(segment) = self.segments.get(self.pos).cloned() {
            self.pos += 1;
            match segment {
                Segment::Text(text) => nodes.push(Node::Text(text)),
                Segment::Output(source) => nodes.push(Node::Output(parse_expr(&source)?)),
                Segment::Tag(tag) => {
                    let (name, rest) = keyword(&tag);
                    if until.contains(&name) {
                        return Ok((nodes, Some(tag)));
                    }
                    match name {
                        "if" => nodes.push(self.parse_if(rest)?),
                        "for" => nodes.push(self.parse_for(rest)?),
                        other => return Err(template_error(format!("unexpected tag: {other}"))),
                    }
                }
            }
        }
        if until.is_empty() {
            Ok((nodes, None))
        } else {
            Err(template_error(format!(
                "unclosed block, expected one of: {}",
                until.join(", ")
            )))
        }
    }

    fn parse_if(&mut self, condition: &str) -> Result<Node> {
        let mut branches = Vec::new();
        let mut condition = parse_expr(condition)?;
        loop {
            let (body, end) = self.parse_nodes(&["elif", "else", "endif"])?;
            branches.push((condition, body));
            let end = end.unwrap_or_default();
            match keyword(&end) {
                ("elif", rest) => condition = parse_expr(rest)?,
                ("else", _) => {
                    let (otherwise, _) = self.parse_nodes(&["endif"])?;
                    return Ok(Node::If {
                        branches,
                        otherwise,
                    });
                }
                _ => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    })
                }
            }
        }
    }

    fn parse_for(&mut self, header: &str) -> Result<Node> {
        let caps = FOR_HEADER
            .captures(header)
            .ok_or_else(|| template_error(format!("malformed for loop: {header}")))?;
        let (key, item) = match caps.get(2) {
            Some(value) => (Some(caps[1].to_string()), value.as_str().to_string()),
            None => (None, caps[1].to_string()),
        };
        let iterable = parse_expr(&caps[3])?;
        let (body, end) = self.parse_nodes(&["else", "endfor"])?;
        let otherwise = match end.as_deref().map(keyword) {
            Some(("else", _)) => self.parse_nodes(&["endfor"])?.0,
            _ => Vec::new(),
        };
        Ok(Node::For {
            key,
            item,
            iterable,
            body,
            otherwise,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Pipe,
}

fn lex(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '"' | '\'' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i).copied() {
                        None => return Err(template_error("unterminated string literal")),
                        Some('\\') if chars.get(i + 1).is_some() => {
                            text.push(match chars[i + 1] {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                            i += 2;
                        }
                        Some(quote) if quote == c => {
                            i += 1;
                            break;
                        }
                        Some(other) => {
                            text.push(other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()) {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal
                    .parse()
                    .map_err(|_| template_error(format!("bad number: {literal}")))?;
                tokens.push(Token::Num(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op("=="));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op("!="));
                i += 2;
            }
            '<' | '>' => {
                let op = match (c, next) {
                    ('<', Some('=')) => "<=",
                    ('>', Some('=')) => ">=",
                    ('<', _) => "<",
                    _ => ">",
                };
                i += op.len();
                tokens.push(Token::Op(op));
            }
            '-' => {
                tokens.push(Token::Op("-"));
                i += 1;
            }
            other => return Err(template_error(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Var(String),
    Attr(Box<Expr>, String),
    Item(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Filter {
        input: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
}

fn parse_expr(source: &str) -> Result<Expr> {
    let tokens = lex(source)?;
    if tokens.is_empty() {
        return Err(template_error("empty expression"));
    }
    let mut parser = ExprParser { tokens, pos: 0 };
    let expr = parser.or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(template_error(format!(
            "unexpected {token:?} in expression: {source}"
        ))),
    }
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(ident)) if ident == word)
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            other => Err(template_error(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn or(&mut self) -> Result<Expr> {
        let mut left = self.and()?;
        while self.peek_ident("or") {
            self.pos += 1;
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut left = self.not()?;
        while self.peek_ident("and") {
            self.pos += 1;
            left = Expr::And(Box::new(left), Box::new(self.not()?));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr> {
        if self.peek_ident("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr> {
        let left = self.filtered()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => CompareOp::Eq,
            Some(Token::Op("!=")) => CompareOp::Ne,
            Some(Token::Op("<")) => CompareOp::Lt,
            Some(Token::Op("<=")) => CompareOp::Le,
            Some(Token::Op(">")) => CompareOp::Gt,
            Some(Token::Op(">=")) => CompareOp::Ge,
            Some(Token::Ident(word)) if word == "in" => CompareOp::In,
            Some(Token::Ident(word))
                if word == "not"
                    && matches!(self.tokens.get(self.pos + 1), Some(Token::Ident(next)) if next == "in") =>
            {
                self.pos += 1;
                CompareOp::NotIn
            }
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.filtered()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn filtered(&mut self) -> Result<Expr> {
        let mut expr = self.postfix()?;
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            let name = match self.advance() {
                Some(Token::Ident(name)) => name,
                other => return Err(template_error(format!("expected filter name, found {other:?}"))),
            };
            if !FILTER_NAMES.contains(&name.as_str()) {
                return Err(ReportError::UnknownFilter(name));
            }
            let mut args = Vec::new();
            if self.peek() == Some(&Token::LParen) {
                self.pos += 1;
                args = self.arguments(Token::RParen)?;
            }
            expr = Expr::Filter {
                input: Box::new(expr),
                name,
                args,
            };
        }
        Ok(expr)
    }

    fn arguments(&mut self, close: Token) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() == Some(&close) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.or()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(token) if token == close => return Ok(args),
                other => return Err(template_error(format!("expected , or {close:?}, found {other:?}"))),
            }
        }
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    expr = match self.advance() {
                        Some(Token::Ident(name)) => Expr::Attr(Box::new(expr), name),
                        Some(Token::Num(idx)) => {
                            Expr::Item(Box::new(expr), Box::new(Expr::Literal(number_value(idx))))
                        }
                        other => {
                            return Err(template_error(format!(
                                "expected attribute name, found {other:?}"
                            )))
                        }
                    };
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.or()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Item(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Str(text)) => Ok(Expr::Literal(Value::String(text))),
            Some(Token::Num(num)) => Ok(Expr::Literal(number_value(num))),
            Some(Token::Op("-")) => match self.advance() {
                Some(Token::Num(num)) => Ok(Expr::Literal(number_value(-num))),
                other => Err(template_error(format!("expected number after '-', found {other:?}"))),
            },
            Some(Token::Ident(ident)) => Ok(match ident.as_str() {
                "true" | "True" => Expr::Literal(Value::Bool(true)),
                "false" | "False" => Expr::Literal(Value::Bool(false)),
                "none" | "None" | "null" => Expr::Literal(Value::Null),
                _ => Expr::Var(ident),
            }),
            Some(Token::LParen) => {
                let inner = self.or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => Ok(Expr::List(self.arguments(Token::RBracket)?)),
            other => Err(template_error(format!("unexpected {other:?} in expression"))),
        }
    }
}

struct Scope<'a> {
    root: &'a Value,
    frames: Vec<Map<String, Value>>,
}

fn member<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    }
}

fn index<'v>(value: &'v Value, idx: &Value) -> Option<&'v Value> {
    match (value, idx) {
        (Value::Array(items), Value::Number(num)) => {
            let num = num.as_i64()?;
            let pos = if num < 0 { items.len() as i64 + num } else { num };
            usize::try_from(pos).ok().and_then(|pos| items.get(pos))
        }
        (_, Value::String(key)) => member(value, key),
        (Value::Object(map), Value::Number(num)) => map.get(&num.to_string()),
        _ => None,
    }
}

fn is_path(expr: &Expr) -> bool {
    matches!(expr, Expr::Var(_) | Expr::Attr(..) | Expr::Item(..))
}

impl Scope<'_> {
    fn var(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .or_else(|| self.root.get(name))
    }

    /// Borrowing lookup for plain paths so large context sections are not cloned.
    fn lookup(&self, expr: &Expr) -> Result<Option<&Value>> {
        Ok(match expr {
            Expr::Var(name) => self.var(name),
            Expr::Attr(base, key) => self.lookup(base)?.and_then(|value| member(value, key)),
            Expr::Item(base, idx) => {
                let idx = self.eval(idx)?;
                self.lookup(base)?.and_then(|value| index(value, &idx))
            }
            _ => None,
        })
    }

    fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::List(items) => Ok(Value::Array(
                items.iter().map(|item| self.eval(item)).collect::<Result<_>>()?,
            )),
            Expr::Var(_) => Ok(self.lookup(expr)?.cloned().unwrap_or(Value::Null)),
            Expr::Attr(base, key) if !is_path(base) => {
                let base = self.eval(base)?;
                Ok(member(&base, key).cloned().unwrap_or(Value::Null))
            }
            Expr::Item(base, idx) if !is_path(base) => {
                let base = self.eval(base)?;
                let idx = self.eval(idx)?;
                Ok(index(&base, &idx).cloned().unwrap_or(Value::Null))
            }
            Expr::Attr(..) | Expr::Item(..) => {
                Ok(self.lookup(expr)?.cloned().unwrap_or(Value::Null))
            }
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&self.eval(inner)?))),
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if truthy(&left) {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if truthy(&left) {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Compare(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(Value::Bool(compare(*op, &left, &right)))
            }
            Expr::Filter { input, name, args } => {
                let input = self.eval(input)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>>>()?;
                filters::apply(name, input, &args)
            }
        }
    }
}

/// Empty strings, empty collections, zero, false and null are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(num) => num.as_f64().is_some_and(|v| v != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) if left.is_number() && right.is_number() => a == b,
        _ => left == right,
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    let ordered = || match (left, right) {
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
            Some(filters::compare_values(left, right))
        }
        _ => None,
    };
    match op {
        CompareOp::Eq => loose_eq(left, right),
        CompareOp::Ne => !loose_eq(left, right),
        CompareOp::Lt => ordered() == Some(Ordering::Less),
        CompareOp::Le => matches!(ordered(), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => ordered() == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordered(), Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::In => contains(right, left),
        CompareOp::NotIn => !contains(right, left),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Array(items), _) => items.iter().any(|item| loose_eq(item, needle)),
        (Value::String(text), Value::String(part)) => text.contains(part.as_str()),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Number(num) => match num.as_f64() {
            Some(float) => out.push_str(&format_number(float)),
            None => out.push_str(&num.to_string()),
        },
        Value::String(text) => out.push_str(text),
        Value::Array(_) | Value::Object(_) => out.push_str(&value.to_string()),
    }
}

fn render_nodes(nodes: &[Node], scope: &mut Scope<'_>, out: &mut String) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(expr) if is_path(expr) => {
                if let Some(value) = scope.lookup(expr)? {
                    write_value(value, out);
                }
            }
            Node::Output(expr) => write_value(&scope.eval(expr)?, out),
            Node::If {
                branches,
                otherwise,
            } => {
                let mut taken = false;
                for (condition, body) in branches {
                    if truthy(&scope.eval(condition)?) {
                        render_nodes(body, scope, out)?;
                        taken = true;
                        break;
                    }
                }
                if !taken {
                    render_nodes(otherwise, scope, out)?;
                }
            }
            Node::For {
                key,
                item,
                iterable,
                body,
                otherwise,
            } => {
                let entries: Vec<(Option<Value>, Value)> = match scope.eval(iterable)? {
                    Value::Array(items) => items.into_iter().map(|v| (None, v)).collect(),
                    Value::Object(map) => map
                        .into_iter()
                        .map(|(k, v)| match key {
                            Some(_) => (Some(Value::String(k)), v),
                            None => (None, Value::String(k)),
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                if entries.is_empty() {
                    render_nodes(otherwise, scope, out)?;
                    continue;
                }
                let length = entries.len();
                for (idx, (entry_key, value)) in entries.into_iter().enumerate() {
                    let mut frame = Map::new();
                    if let (Some(name), Some(entry_key)) = (key, entry_key) {
                        frame.insert(name.clone(), entry_key);
                    }
                    frame.insert(item.clone(), value);
                    frame.insert(
                        "loop".to_string(),
                        serde_json::json!({
                            "index": idx + 1,
                            "index0": idx,
                            "first": idx == 0,
                            "last": idx + 1 == length,
                            "length": length,
                            "revindex": length - idx,
                        }),
                    );
                    scope.frames.push(frame);
                    let rendered = render_nodes(body, scope, out);
                    scope.frames.pop();
                    rendered?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(template: &str, context: Value) -> String {
        TemplateEngine::new().render(template, &context).unwrap()
    }

    #[test]
    fn substitutes_paths_and_blanks_missing_values() {
        let ctx = json!({"reportName": "Sales", "stats": {"record_count": 2, "mean": 1900.0}});
        assert_eq!(
            render("# {{ reportName }} ({{ stats.record_count }} rows, mean {{stats.mean}}){{ nope.deeper }}", ctx),
            "# Sales (2 rows, mean 1900)"
        );
    }

    #[test]
    fn collections_render_as_json() {
        let ctx = json!({"tags": ["a", "b"], "meta": {"k": 1}});
        assert_eq!(render("{{ tags }} {{ meta }} {{ tags[1] }} {{ tags.0 }}", ctx), r#"["a","b"] {"k":1} b a"#);
    }

    #[test]
    fn filters_chain_left_to_right() {
        let ctx = json!({"total": 1234567.891, "names": ["x", "y"], "title": "quarterly REVIEW"});
        assert_eq!(
            render("{{ total | format_number }} / {{ names | join(' & ') | upper }} / {{ title | capitalize }}", ctx),
            "1,234,567.89 / X & Y / Quarterly review"
        );
        assert_eq!(render("{{ missing | default('n/a') }}", json!({})), "n/a");
    }

    #[test]
    fn conditionals_use_jinja_truthiness() {
        let template = "{% if items %}has{% elif fallback %}fb{% else %}none{% endif %}";
        assert_eq!(render(template, json!({"items": [1]})), "has");
        assert_eq!(render(template, json!({"items": [], "fallback": "x"})), "fb");
        assert_eq!(render(template, json!({"items": "", "fallback": 0})), "none");
        assert_eq!(
            render("{% if n > 2 and not flag %}big{% endif %}", json!({"n": 3, "flag": false})),
            "big"
        );
        assert_eq!(
            render("{% if 'b' in list %}yes{% endif %}{% if 'z' not in list %}!{% endif %}", json!({"list": ["a", "b"]})),
            "yes!"
        );
        assert_eq!(render("{% if count == 2 %}two{% endif %}", json!({"count": 2.0})), "two");
    }

    #[test]
    fn loops_expose_loop_state() {
        let ctx = json!({"risks": ["late", "costly"]});
        assert_eq!(
            render("{% for r in risks %}{{ loop.index }}. {{ r }}{% if not loop.last %}\n{% endif %}{% endfor %}", ctx),
            "1. late\n2. costly"
        );
        let ctx = json!({"fields": {"total": 3800, "best": "Gadget B"}});
        assert_eq!(
            render("{% for k, v in fields %}{{ k }}={{ v }};{% endfor %}", ctx),
            "total=3800;best=Gadget B;"
        );
        assert_eq!(render("{% for x in nothing %}x{% else %}empty{% endfor %}", json!({})), "empty");
    }

    #[test]
    fn loop_variables_shadow_and_then_restore() {
        let ctx = json!({"x": "outer", "xs": ["inner"]});
        assert_eq!(render("{% for x in xs %}{{ x }}{% endfor %}-{{ x }}", ctx), "inner-outer");
    }

    #[test]
    fn comments_and_whitespace_control() {
        let template = "a {#- note -#}  b\n{%- if true %}\n  c\n{%- endif %}";
        assert_eq!(render(template, json!({})), "ab\n  c");
        assert_eq!(render("{{- ' x ' -}}", json!({})), " x ");
    }

    #[test]
    fn malformed_templates_are_errors() {
        let engine = TemplateEngine::new();
        assert!(matches!(
            engine.render("{% if x %}open", &json!({})),
            Err(ReportError::Template(_))
        ));
        assert!(matches!(
            engine.render("{{ x | shout }}", &json!({})),
            Err(ReportError::UnknownFilter(name)) if name == "shout"
        ));
        assert!(engine.render("{{ x ", &json!({})).is_err());
        assert!(engine.render("{% while x %}{% endwhile %}", &json!({})).is_err());
    }

    #[test]
    fn render_file_reports_missing_template() {
        let err = TemplateEngine::new()
            .render_file(Path::new("/definitely/not/here.njk"), &json!({}))
            .unwrap_err();
        assert!(matches!(err, ReportError::TemplateNotFound(_)));
    }
}
