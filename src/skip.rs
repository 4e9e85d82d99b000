//! Skip predicates.
//!
//! A `skip:` value is either a literal boolean or a small boolean expression
//! evaluated against [`SkipFacts`]. Nothing here executes arbitrary code.
//!
//! Grammar of the default evaluator:
//!
//! ```text
//! expr    := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | primary
//! primary := "(" expr ")" | "True" | "False"
//!          | "platform" ("==" | "!=") STRING
//!          | "env." NAME | "flag." NAME
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{HarnessError, Result};
use crate::scenario::SkipCondition;

/// Everything a skip expression may look at.
#[derive(Debug, Clone, Default)]
pub struct SkipFacts {
    /// Platform name as reported by Python's `sys.platform` (`linux`, `darwin`, `win32`).
    pub platform: String,
    pub env: BTreeMap<String, String>,
    pub flags: BTreeSet<String>,
}

impl SkipFacts {
    /// Facts for the current process.
    pub fn current() -> Self {
        Self {
            platform: current_platform().to_string(),
            env: std::env::vars().collect(),
            flags: BTreeSet::new(),
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }
}

fn current_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

/// Decides whether a skip condition holds.
pub trait SkipEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, facts: &SkipFacts) -> Result<bool>;

    fn should_skip(&self, condition: &SkipCondition, facts: &SkipFacts) -> Result<bool> {
        match condition {
            SkipCondition::Flag(flag) => Ok(*flag),
            SkipCondition::Expression(expr) => self.evaluate(expr, facts),
        }
    }
}

/// The stock expression evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSkipEvaluator;

impl SkipEvaluator for DefaultSkipEvaluator {
    fn evaluate(&self, expression: &str, facts: &SkipFacts) -> Result<bool> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            facts,
            expression,
        };
        let value = parser.expr()?;
        if parser.pos != tokens.len() {
            return Err(parser.error(format!("unexpected token {:?}", tokens[parser.pos])));
        }
        Ok(value)
    }
}

// =============================================================================
// TOKENIZER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Eq,
    NotEq,
    LParen,
    RParen,
}

fn tokenize(expression: &str) -> Result<Vec<Token>> {
    let err = |message: String| HarnessError::Skip {
        expression: expression.to_string(),
        message,
    };
    let mut tokens = Vec::new();
    let mut chars = expression.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
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
            '=' | '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(err(format!("expected '=' after '{}'", c)));
                }
                tokens.push(if c == '=' { Token::Eq } else { Token::NotEq });
            }
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(q) if q == c => break,
                        Some(other) => text.push(other),
                        None => return Err(err("unterminated string".to_string())),
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '.' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(err(format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

// =============================================================================
// PARSER
// =============================================================================

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    facts: &'a SkipFacts,
    expression: &'a str,
}

impl Parser<'_> {
    fn error(&self, message: String) -> HarnessError {
        HarnessError::Skip {
            expression: self.expression.to_string(),
            message,
        }
    }

    fn peek_ident(&self, word: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Ident(w)) if w == word)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<bool> {
        let mut value = self.and()?;
        while self.peek_ident("or") {
            self.pos += 1;
            // Both sides are parsed so malformed input is always reported.
            let rhs = self.and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<bool> {
        let mut value = self.unary()?;
        while self.peek_ident("and") {
            self.pos += 1;
            let rhs = self.unary()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<bool> {
        if self.peek_ident("not") {
            self.pos += 1;
            return Ok(!self.unary()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<bool> {
        let facts = self.facts;
        match self.next().cloned() {
            Some(Token::LParen) => {
                let value = self.expr()?;
                if matches!(self.next(), Some(Token::RParen)) {
                    Ok(value)
                } else {
                    Err(self.error("missing ')'".to_string()))
                }
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "True" | "true" => Ok(true),
                "False" | "false" => Ok(false),
                "platform" | "sys.platform" => {
                    let negate = match self.next().cloned() {
                        Some(Token::Eq) => false,
                        Some(Token::NotEq) => true,
                        _ => return Err(self.error("expected '==' or '!=' after platform".to_string())),
                    };
                    match self.next().cloned() {
                        Some(Token::Str(name)) => Ok((facts.platform == name) != negate),
                        _ => Err(self.error("expected a quoted platform name".to_string())),
                    }
                }
                other => {
                    if let Some(name) = other.strip_prefix("env.") {
                        Ok(facts.env.get(name).is_some_and(|v| !v.is_empty()))
                    } else if let Some(name) = other.strip_prefix("flag.") {
                        Ok(facts.flags.contains(name))
                    } else {
                        Err(self.error(format!("unknown name '{}'", other)))
                    }
                }
            },
            Some(token) => Err(self.error(format!("unexpected token {:?}", token))),
            None => Err(self.error("unexpected end of expression".to_string())),
        }
    }
}
