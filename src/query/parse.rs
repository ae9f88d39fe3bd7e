//! Recursive-descent parser for the backend query language

use regex::Regex;

use crate::attribute::{Aggregation, AttributeType};
use crate::filter::Operator;
use crate::{Error, Result};

/// Attribute reference as written in a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrRef {
    /// Attribute path
    pub name: String,
    /// Type annotation, if any
    pub attribute_type: Option<AttributeType>,
    /// Aggregation wrapper, if any
    pub aggregation: Option<Aggregation>,
}

/// Literal operand.
#[derive(Debug, Clone)]
pub enum Literal {
    /// `true` / `false`
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// Unescaped string
    String(String),
    /// Compiled `MATCHES` operand
    Regex(Regex),
}

/// Parsed query expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// `attr OP literal`
    Compare {
        /// Left-hand side
        attribute: AttrRef,
        /// Operator
        operator: Operator,
        /// Right-hand side
        value: Literal,
    },
    /// `attr EXISTS`
    Exists(AttrRef),
    /// Conjunction
    And(Vec<Expr>),
    /// Disjunction
    Or(Vec<Expr>),
    /// Negation
    Not(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Colon,
    Quoted(String),
    Backticked(String),
    Word(String),
    Number(String),
    Symbol(&'static str),
}

fn parse_error(pos: usize, msg: impl std::fmt::Display) -> Error {
    Error::InvalidInput(format!("query parse error at token {pos}: {msg}"))
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '`' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&c| c == '`')
                    .ok_or_else(|| parse_error(tokens.len(), "unterminated attribute name"))?;
                tokens.push(Token::Backticked(chars[start..start + end].iter().collect()));
                i = start + end + 1;
            }
            '"' => {
                let mut raw = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(parse_error(tokens.len(), "unterminated string")),
                        Some('"') => break,
                        Some('\\') => {
                            raw.push('\\');
                            if let Some(&next) = chars.get(i + 1) {
                                raw.push(next);
                            }
                            i += 2;
                        }
                        Some(&ch) => {
                            raw.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Quoted(raw));
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let sym = match two.as_str() {
                    "==" => "==",
                    "!=" => "!=",
                    ">=" => ">=",
                    "<=" => "<=",
                    _ if c == '>' => ">",
                    _ if c == '<' => "<",
                    _ => return Err(parse_error(tokens.len(), format!("unexpected `{c}`"))),
                };
                i += sym.len();
                tokens.push(Token::Symbol(sym));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric()
                        || chars[i] == '.'
                        || ((chars[i] == '-' || chars[i] == '+')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => return Err(parse_error(tokens.len(), format!("unexpected `{other}`"))),
        }
    }
    Ok(tokens)
}

/// Decode a quoted literal: `\\` and `\"` collapse, other escapes stay.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&n @ ('\\' | '"')) => {
                    out.push(n);
                    chars.next();
                }
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Decode a regex literal: only `\"` collapses.
fn unescape_regex(raw: &str) -> String {
    raw.replace("\\\"", "\"")
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == word)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            other => Err(parse_error(self.pos - 1, format!("expected {expected:?}, found {other:?}"))),
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut parts = vec![self.and_expr()?];
        while self.peek_word("OR") {
            self.pos += 1;
            parts.push(self.and_expr()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Expr::Or(parts) })
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut parts = vec![self.unary()?];
        while self.peek_word("AND") {
            self.pos += 1;
            parts.push(self.unary()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Expr::And(parts) })
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.peek_word("NOT") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.or_expr()?;
            self.expect(&Token::RParen)?;
            return Ok(inner);
        }
        self.predicate()
    }

    fn attribute(&mut self) -> Result<AttrRef> {
        let aggregation = match self.peek() {
            Some(Token::Word(w)) => {
                let agg: Aggregation = w.parse().map_err(|_| parse_error(self.pos, format!("unknown function `{w}`")))?;
                self.pos += 1;
                self.expect(&Token::LParen)?;
                Some(agg)
            }
            _ => None,
        };
        let name = match self.next() {
            Some(Token::Backticked(name)) => name,
            other => return Err(parse_error(self.pos - 1, format!("expected attribute, found {other:?}"))),
        };
        let attribute_type = if self.peek() == Some(&Token::Colon) {
            self.pos += 1;
            match self.next() {
                Some(Token::Word(t)) => Some(
                    AttributeType::from_backend_name(&t)
                        .ok_or_else(|| parse_error(self.pos - 1, format!("unknown type `{t}`")))?,
                ),
                other => return Err(parse_error(self.pos - 1, format!("expected type, found {other:?}"))),
            }
        } else {
            None
        };
        if aggregation.is_some() {
            self.expect(&Token::RParen)?;
        }
        Ok(AttrRef {
            name,
            attribute_type,
            aggregation,
        })
    }

    fn operator(&mut self) -> Result<Option<Operator>> {
        let op = match self.next() {
            Some(Token::Symbol(s)) => match s {
                "==" => Operator::Eq,
                "!=" => Operator::Ne,
                ">" => Operator::Gt,
                ">=" => Operator::Ge,
                "<" => Operator::Lt,
                _ => Operator::Le,
            },
            Some(Token::Word(w)) => match w.as_str() {
                "EXISTS" => return Ok(None),
                "MATCHES" => Operator::Matches,
                "CONTAINS" => Operator::Contains,
                "NOT" => match self.next() {
                    Some(Token::Word(w)) if w == "MATCHES" => Operator::NotMatches,
                    Some(Token::Word(w)) if w == "CONTAINS" => Operator::NotContains,
                    other => return Err(parse_error(self.pos - 1, format!("expected MATCHES or CONTAINS, found {other:?}"))),
                },
                _ => return Err(parse_error(self.pos - 1, format!("unknown operator `{w}`"))),
            },
            other => return Err(parse_error(self.pos - 1, format!("expected operator, found {other:?}"))),
        };
        Ok(Some(op))
    }

    fn literal(&mut self, operator: Operator) -> Result<Literal> {
        let pos = self.pos;
        match self.next() {
            Some(Token::Quoted(raw)) => {
                if matches!(operator, Operator::Matches | Operator::NotMatches) {
                    Ok(Literal::Regex(Regex::new(&unescape_regex(&raw))?))
                } else {
                    Ok(Literal::String(unescape(&raw)))
                }
            }
            Some(Token::Number(n)) => {
                if let Ok(v) = n.parse::<i64>() {
                    Ok(Literal::Int(v))
                } else {
                    n.parse::<f64>()
                        .map(Literal::Float)
                        .map_err(|_| parse_error(pos, format!("bad number `{n}`")))
                }
            }
            Some(Token::Word(w)) if w == "true" => Ok(Literal::Bool(true)),
            Some(Token::Word(w)) if w == "false" => Ok(Literal::Bool(false)),
            other => Err(parse_error(pos, format!("expected literal, found {other:?}"))),
        }
    }

    fn predicate(&mut self) -> Result<Expr> {
        let attribute = self.attribute()?;
        match self.operator()? {
            None => Ok(Expr::Exists(attribute)),
            Some(operator) => {
                let value = self.literal(operator)?;
                Ok(Expr::Compare {
                    attribute,
                    operator,
                    value,
                })
            }
        }
    }
}

/// Parse a query string.
///
/// # Errors
///
/// Returns `InvalidInput` naming the token position on malformed input,
/// `Error::Regex` for an invalid `MATCHES` operand.
pub fn parse(query: &str) -> Result<Expr> {
    let mut parser = Parser {
        tokens: tokenize(query)?,
        pos: 0,
    };
    let expr = parser.or_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(parse_error(parser.pos, "trailing input"));
    }
    Ok(expr)
}
