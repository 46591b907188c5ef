//! A tiny sandboxed expression interpreter for the `custom` policy kind
//! (§4.4, §9 "Expression sandbox").
//!
//! Accepts a fixed grammar only: attribute access (`model.name`), `.get(x)`
//! lookups, string/number/`None` literals, comparisons, `in`, and boolean
//! connectives `and`/`or`/`not`. No function calls beyond `.get`, no
//! imports, no attribute writes. Evaluation never reaches host state beyond
//! the read-only [`ModelView`] passed in.

use std::fmt;

use serde_json::Value;

/// Read-only view of a model exposed to a `custom` condition.
#[derive(Debug, Clone)]
pub struct ModelView<'a> {
    pub name: &'a str,
    pub tags: &'a [String],
    pub meta: &'a serde_json::Map<String, Value>,
    pub columns: &'a serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    Parse(String),
    UnknownAttribute(String),
    TypeMismatch(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Parse(s) => write!(f, "parse error: {s}"),
            EvalError::UnknownAttribute(s) => write!(f, "unknown attribute: {s}"),
            EvalError::TypeMismatch(s) => write!(f, "type mismatch: {s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Dot,
    LParen,
    RParen,
    Comma,
    Eq,
    NotEq,
    And,
    Or,
    Not,
    In,
    None,
}

fn tokenize(src: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
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
                tokens.push(Token::NotEq);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(EvalError::Parse("unterminated string literal".into()));
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num: String = chars[start..i].iter().collect();
                let n = num.parse().map_err(|_| EvalError::Parse(format!("bad number literal: {num}")))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "None" => Token::None,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(EvalError::Parse(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Val {
    Str(String),
    Num(f64),
    Bool(bool),
    None,
    List(Vec<Val>),
}

impl Val {
    fn truthy(&self) -> bool {
        match self {
            Val::Str(s) => !s.is_empty(),
            Val::Num(n) => *n != 0.0,
            Val::Bool(b) => *b,
            Val::None => false,
            Val::List(l) => !l.is_empty(),
        }
    }

    fn from_json(v: &Value) -> Val {
        match v {
            Value::String(s) => Val::Str(s.clone()),
            Value::Number(n) => Val::Num(n.as_f64().unwrap_or(0.0)),
            Value::Bool(b) => Val::Bool(*b),
            Value::Null => Val::None,
            Value::Array(a) => Val::List(a.iter().map(Val::from_json).collect()),
            Value::Object(_) => Val::None,
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    model: &'a ModelView<'a>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn expect(&mut self, tok: &Token) -> Result<(), EvalError> {
        if self.peek() == Some(tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(EvalError::Parse(format!("expected {tok:?}, found {:?}", self.peek())))
        }
    }

    // or_expr := and_expr ("or" and_expr)*
    fn or_expr(&mut self) -> Result<Val, EvalError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.and_expr()?;
            left = Val::Bool(left.truthy() || right.truthy());
        }
        Ok(left)
    }

    // and_expr := not_expr ("and" not_expr)*
    fn and_expr(&mut self) -> Result<Val, EvalError> {
        let mut left = self.not_expr()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.not_expr()?;
            left = Val::Bool(left.truthy() && right.truthy());
        }
        Ok(left)
    }

    // not_expr := "not" not_expr | comparison
    fn not_expr(&mut self) -> Result<Val, EvalError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let v = self.not_expr()?;
            return Ok(Val::Bool(!v.truthy()));
        }
        self.comparison()
    }

    // comparison := primary (("==" | "!=" | "in") primary)?
    fn comparison(&mut self) -> Result<Val, EvalError> {
        let left = self.primary()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.advance();
                let right = self.primary()?;
                Ok(Val::Bool(left == right))
            }
            Some(Token::NotEq) => {
                self.advance();
                let right = self.primary()?;
                Ok(Val::Bool(left != right))
            }
            Some(Token::In) => {
                self.advance();
                let right = self.primary()?;
                match right {
                    Val::List(items) => Ok(Val::Bool(items.contains(&left))),
                    Val::Str(s) => match left {
                        Val::Str(needle) => Ok(Val::Bool(s.contains(&needle))),
                        _ => Err(EvalError::TypeMismatch("`in` on string requires a string operand".into())),
                    },
                    _ => Err(EvalError::TypeMismatch("`in` requires a list or string on the right".into())),
                }
            }
            _ => Ok(left),
        }
    }

    // primary := literal | attribute_chain | "(" or_expr ")"
    fn primary(&mut self) -> Result<Val, EvalError> {
        match self.advance().cloned() {
            Some(Token::Str(s)) => Ok(Val::Str(s)),
            Some(Token::Num(n)) => Ok(Val::Num(n)),
            Some(Token::None) => Ok(Val::None),
            Some(Token::LParen) => {
                let v = self.or_expr()?;
                self.expect(&Token::RParen)?;
                Ok(v)
            }
            Some(Token::Ident(name)) => self.attribute_chain(name),
            other => Err(EvalError::Parse(format!("unexpected token {other:?}"))),
        }
    }

    fn attribute_chain(&mut self, root: String) -> Result<Val, EvalError> {
        if root != "model" {
            return Err(EvalError::UnknownAttribute(root));
        }
        self.expect(&Token::Dot)?;
        let Some(Token::Ident(attr)) = self.advance().cloned() else {
            return Err(EvalError::Parse("expected attribute name after '.'".into()));
        };

        let base = match attr.as_str() {
            "name" => Val::Str(self.model.name.to_string()),
            "tags" => Val::List(self.model.tags.iter().cloned().map(Val::Str).collect()),
            "meta" => {
                if self.peek() == Some(&Token::Dot) {
                    self.advance();
                    self.expect_get(self.model.meta)?
                } else {
                    Val::None
                }
            }
            "columns" => {
                if self.peek() == Some(&Token::Dot) {
                    self.advance();
                    self.expect_get(self.model.columns)?
                } else {
                    Val::None
                }
            }
            other => return Err(EvalError::UnknownAttribute(format!("model.{other}"))),
        };
        Ok(base)
    }

    fn expect_get(&mut self, map: &serde_json::Map<String, Value>) -> Result<Val, EvalError> {
        let Some(Token::Ident(method)) = self.advance().cloned() else {
            return Err(EvalError::Parse("expected method after '.'".into()));
        };
        if method != "get" {
            return Err(EvalError::UnknownAttribute(format!("method '{method}' is not permitted")));
        }
        self.expect(&Token::LParen)?;
        let Some(Token::Str(key)) = self.advance().cloned() else {
            return Err(EvalError::Parse("get() requires a string literal argument".into()));
        };
        if self.peek() == Some(&Token::Comma) {
            self.advance();
            // default value; consume and ignore position, keep it simple
            self.primary()?;
        }
        self.expect(&Token::RParen)?;
        Ok(map.get(&key).map(Val::from_json).unwrap_or(Val::None))
    }
}

/// Evaluate `condition` against `model`. Any parse or evaluation error is
/// returned as `Err` so callers convert it to a warning violation rather
/// than panicking (§9).
pub fn evaluate(condition: &str, model: &ModelView<'_>) -> Result<bool, EvalError> {
    let tokens = tokenize(condition)?;
    let mut parser = Parser { tokens: &tokens, pos: 0, model };
    let result = parser.or_expr()?;
    if parser.pos != tokens.len() {
        return Err(EvalError::Parse("trailing tokens after expression".into()));
    }
    Ok(result.truthy())
}
