// Conditional expression language: a hand-written recursive-descent
// parser/evaluator over the closed grammar in spec §4.7. Deliberately NOT
// the Python original's `eval()` (`original_source/recipe_executor/steps/
// conditional.py`) — the spec's REDESIGN FLAGS call that out directly: "do
// not use host-language eval under any circumstance".
//
// Grounded in shape (not grammar) on the teacher's `expressions/mod.rs`
// (GitHub Actions' `${{ }}` expression evaluator): a small, dedicated,
// side-effect-free, string-driven module living next to the step that uses
// it. The grammar itself is spec §4.7's own closed set, which has nothing
// to do with Actions' `success()`/`failure()`/`always()` status functions.

use std::path::Path;

use serde_json::Value;

use crate::context::Context;
use crate::error::ConditionError;

/// Evaluates a rendered condition string against `ctx`'s artifacts and
/// returns its truthiness (spec §4.7: "Evaluate the rendered expression...
/// to a boolean").
pub fn evaluate(rendered: &str, ctx: &Context) -> Result<bool, ConditionError> {
    let tokens = tokenize(rendered)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source_len: rendered.len(),
    };
    let expr = parser.parse_expr()?;
    parser.expect_end()?;
    let value = expr.eval(ctx)?;
    Ok(truthy(&value))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    True,
    False,
    Null,
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
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
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                i += 1;
                let mut s = String::new();
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        s.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    if chars[i] == quote {
                        closed = true;
                        i += 1;
                        break;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err(ConditionError::Syntax {
                        offset: start,
                        message: "unterminated string literal".to_string(),
                    });
                }
                tokens.push(Token::Str(s));
            }
            _ if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number: f64 = text.parse().map_err(|_| ConditionError::Syntax {
                    offset: start,
                    message: format!("invalid number literal '{text}'"),
                })?;
                tokens.push(Token::Number(number));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(match text.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(text),
                });
            }
            other => {
                return Err(ConditionError::Syntax {
                    offset: i,
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Key {
    Str(String),
    Int(i64),
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    ContextRef(Vec<Key>),
    List(Vec<Expr>),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    source_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn error(&self, message: impl Into<String>) -> ConditionError {
        ConditionError::Syntax {
            offset: self.source_len,
            message: message.into(),
        }
    }

    fn expect_end(&self) -> Result<(), ConditionError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing tokens"))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ConditionError> {
        let left = self.parse_primary()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(CompareOp::Eq),
            Some(Token::Ne) => Some(CompareOp::Ne),
            Some(Token::Lt) => Some(CompareOp::Lt),
            Some(Token::Le) => Some(CompareOp::Le),
            Some(Token::Gt) => Some(CompareOp::Gt),
            Some(Token::Ge) => Some(CompareOp::Ge),
            _ => None,
        };
        match op {
            None => Ok(left),
            Some(op) => {
                self.advance();
                let right = self.parse_primary()?;
                Ok(Expr::Compare(Box::new(left), op, Box::new(right)))
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        match self.advance() {
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Number(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LBracket) => self.parse_list(),
            Some(Token::Ident(name)) if name == "context" => self.parse_context_ref(),
            Some(Token::Ident(name)) => self.parse_call(name),
            Some(other) => Err(self.error(format!("unexpected token {other:?}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn parse_list(&mut self) -> Result<Expr, ConditionError> {
        let mut items = Vec::new();
        if matches!(self.peek(), Some(Token::RBracket)) {
            self.advance();
            return Ok(Expr::List(items));
        }
        loop {
            items.push(self.parse_expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RBracket) => break,
                _ => return Err(self.error("expected ',' or ']' in list literal")),
            }
        }
        Ok(Expr::List(items))
    }

    fn parse_context_ref(&mut self) -> Result<Expr, ConditionError> {
        let mut keys = Vec::new();
        while matches!(self.peek(), Some(Token::LBracket)) {
            self.advance();
            let key = match self.advance() {
                Some(Token::Str(s)) => Key::Str(s),
                Some(Token::Number(n)) => Key::Int(n as i64),
                _ => return Err(self.error("expected string or integer subscript")),
            };
            match self.advance() {
                Some(Token::RBracket) => {}
                _ => return Err(self.error("expected ']' after subscript")),
            }
            keys.push(key);
        }
        if keys.is_empty() {
            return Err(self.error("'context' must be followed by at least one subscript"));
        }
        Ok(Expr::ContextRef(keys))
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, ConditionError> {
        const KNOWN: &[&str] = &[
            "and",
            "or",
            "not",
            "contains",
            "startswith",
            "file_exists",
            "all_exist",
            "is_newer",
        ];
        if !KNOWN.contains(&name.as_str()) {
            return Err(self.error(format!("unknown function '{name}'")));
        }
        match self.advance() {
            Some(Token::LParen) => {}
            _ => return Err(self.error(format!("expected '(' after '{name}'"))),
        }
        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Token::RParen)) {
            loop {
                args.push(self.parse_expr()?);
                match self.advance() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    _ => return Err(self.error("expected ',' or ')' in argument list")),
                }
            }
        } else {
            self.advance();
        }
        Ok(Expr::Call(name, args))
    }
}

impl Expr {
    fn eval(&self, ctx: &Context) -> Result<Value, ConditionError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::ContextRef(keys) => Ok(eval_context_ref(keys, ctx)),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(item.eval(ctx)?);
                }
                Ok(Value::Array(values))
            }
            Expr::Compare(left, op, right) => {
                let l = left.eval(ctx)?;
                let r = right.eval(ctx)?;
                Ok(Value::Bool(compare(&l, *op, &r)?))
            }
            Expr::Call(name, args) => eval_call(name, args, ctx),
        }
    }
}

fn eval_context_ref(keys: &[Key], ctx: &Context) -> Value {
    let mut current = match keys.first() {
        Some(Key::Str(key)) => ctx.get(key).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    };
    for key in &keys[1..] {
        current = match (&current, key) {
            (Value::Object(map), Key::Str(k)) => map.get(k).cloned().unwrap_or(Value::Null),
            (Value::Array(arr), Key::Int(i)) if *i >= 0 => {
                arr.get(*i as usize).cloned().unwrap_or(Value::Null)
            }
            _ => Value::Null,
        };
    }
    current
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> Result<bool, ConditionError> {
    match op {
        CompareOp::Eq => Ok(left == right),
        CompareOp::Ne => Ok(left != right),
        _ => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => {
                    let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                    a.partial_cmp(&b)
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let ordering = ordering.ok_or_else(|| {
                ConditionError::Evaluation(format!(
                    "cannot order-compare {left:?} and {right:?}"
                ))
            })?;
            Ok(match op {
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
                CompareOp::Eq | CompareOp::Ne => unreachable!(),
            })
        }
    }
}

fn eval_call(name: &str, args: &[Expr], ctx: &Context) -> Result<Value, ConditionError> {
    match name {
        "and" => {
            for arg in args {
                if !truthy(&arg.eval(ctx)?) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "or" => {
            for arg in args {
                if truthy(&arg.eval(ctx)?) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "not" => {
            let [arg] = require_args(args, 1, "not")?;
            Ok(Value::Bool(!truthy(&arg.eval(ctx)?)))
        }
        "contains" => {
            let [collection, item] = require_args(args, 2, "contains")?;
            let collection = collection.eval(ctx)?;
            let item = item.eval(ctx)?;
            Ok(Value::Bool(contains(&collection, &item)))
        }
        "startswith" => {
            let [string, prefix] = require_args(args, 2, "startswith")?;
            let string = as_str(&string.eval(ctx)?)?;
            let prefix = as_str(&prefix.eval(ctx)?)?;
            Ok(Value::Bool(string.starts_with(&prefix)))
        }
        "file_exists" => {
            let [path] = require_args(args, 1, "file_exists")?;
            let path = as_str(&path.eval(ctx)?)?;
            Ok(Value::Bool(Path::new(&path).exists()))
        }
        "all_exist" => {
            let [paths] = require_args(args, 1, "all_exist")?;
            let paths = match paths.eval(ctx)? {
                Value::Array(items) => items,
                other => {
                    return Err(ConditionError::Evaluation(format!(
                        "all_exist expects an array, got {other:?}"
                    )))
                }
            };
            for path in &paths {
                let path = as_str(path)?;
                if !Path::new(&path).exists() {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "is_newer" => {
            let [source, target] = require_args(args, 2, "is_newer")?;
            let source = as_str(&source.eval(ctx)?)?;
            let target = as_str(&target.eval(ctx)?)?;
            Ok(Value::Bool(is_newer(&source, &target)))
        }
        other => Err(ConditionError::Evaluation(format!(
            "unknown function '{other}'"
        ))),
    }
}

fn require_args<'a, const N: usize>(
    args: &'a [Expr],
    n: usize,
    name: &str,
) -> Result<[&'a Expr; N], ConditionError> {
    if args.len() != n {
        return Err(ConditionError::Evaluation(format!(
            "'{name}' expects {n} argument(s), got {}",
            args.len()
        )));
    }
    Ok(std::array::from_fn(|i| &args[i]))
}

fn contains(collection: &Value, item: &Value) -> bool {
    match collection {
        Value::Array(items) => items.contains(item),
        Value::String(s) => match item {
            Value::String(needle) => s.contains(needle.as_str()),
            _ => false,
        },
        Value::Object(map) => match item {
            Value::String(key) => map.contains_key(key),
            _ => false,
        },
        _ => false,
    }
}

fn as_str(value: &Value) -> Result<String, ConditionError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(ConditionError::Evaluation(format!(
            "expected a string, got {other:?}"
        ))),
    }
}

fn is_newer(source: &str, target: &str) -> bool {
    let (source, target) = (Path::new(source), Path::new(target));
    if !source.exists() || !target.exists() {
        return false;
    }
    let (source_time, target_time) = (
        std::fs::metadata(source).and_then(|m| m.modified()),
        std::fs::metadata(target).and_then(|m| m.modified()),
    );
    match (source_time, target_time) {
        (Ok(s), Ok(t)) => s > t,
        _ => false,
    }
}

/// `null` and empty collections/strings are false; anything else is true
/// (spec §4.7, "Truthiness of a bare value").
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_with_mode(mode: &str) -> Context {
        let mut ctx = Context::empty();
        ctx.set("mode", json!(mode));
        ctx
    }

    #[test]
    fn equality_against_context_value() {
        let ctx = ctx_with_mode("fast");
        assert!(evaluate(r#"context["mode"] == "fast""#, &ctx).unwrap());
        assert!(!evaluate(r#"context["mode"] == "slow""#, &ctx).unwrap());
    }

    #[test]
    fn nested_subscripts_resolve_mappings() {
        let mut ctx = Context::empty();
        ctx.set("config", json!({"nested": {"value": 42}}));
        assert!(evaluate(r#"context["config"]["nested"]["value"] == 42"#, &ctx).unwrap());
    }

    #[test]
    fn and_or_not_combinators() {
        let ctx = ctx_with_mode("fast");
        assert!(evaluate(r#"and(context["mode"] == "fast", true)"#, &ctx).unwrap());
        assert!(evaluate(r#"or(context["mode"] == "slow", true)"#, &ctx).unwrap());
        assert!(evaluate(r#"not(context["mode"] == "slow")"#, &ctx).unwrap());
    }

    #[test]
    fn contains_and_startswith() {
        let mut ctx = Context::empty();
        ctx.set("tags", json!(["alpha", "beta"]));
        assert!(evaluate(r#"contains(context["tags"], "beta")"#, &ctx).unwrap());
        assert!(evaluate(r#"startswith("hello world", "hello")"#, &ctx).unwrap());
    }

    #[test]
    fn bare_value_truthiness() {
        let mut ctx = Context::empty();
        ctx.set("empty_list", json!([]));
        ctx.set("present", json!("x"));
        assert!(!evaluate(r#"context["empty_list"]"#, &ctx).unwrap());
        assert!(evaluate(r#"context["present"]"#, &ctx).unwrap());
        assert!(!evaluate(r#"context["missing"]"#, &ctx).unwrap());
    }

    #[test]
    fn unsupported_syntax_is_a_syntax_error() {
        let ctx = Context::empty();
        let err = evaluate("context['mode'] ?? 1", &ctx).unwrap_err();
        assert!(matches!(err, ConditionError::Syntax { .. }));
    }

    #[test]
    fn file_predicates_use_real_filesystem_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hi").unwrap();
        let mut ctx = Context::empty();
        ctx.set("path", json!(path.to_string_lossy().to_string()));
        let expr = format!(r#"file_exists(context["path"])"#);
        assert!(evaluate(&expr, &ctx).unwrap());
    }
}
