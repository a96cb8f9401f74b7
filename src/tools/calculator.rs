//! Arithmetic evaluator tool.
//!
//! Input is restricted to digits, `+ - * / ( ) .` and whitespace. Evaluation
//! follows Python numeric rules: integers stay integers, `/` is true division,
//! `//` floors and `**` binds tighter than unary minus on its left.

use std::fmt;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use super::Tool;

const ALLOWED_SYMBOLS: &str = "+-*/().";

/// Result of evaluating an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            Number::Float(x) => f.write_str(&format_float(*x)),
        }
    }
}

/// Render a float the way Python's `repr` does for common values.
pub(crate) fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = x.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let formatted = format!("{:e}", x);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(d) => ('-', d),
                    None => ('+', exp),
                };
                format!("{}e{}{:0>2}", mantissa, sign, digits)
            }
            None => formatted,
        };
    }
    if x.fract() == 0.0 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CalcError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,

    #[error("(34, 'Numerical result out of range')")]
    OutOfRange,

    #[error("invalid syntax: {0}")]
    Syntax(String),

    #[error("{0}")]
    Domain(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(Number),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, CalcError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                let mut seen_dot = false;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    if chars[i] == '.' {
                        if seen_dot {
                            return Err(CalcError::Syntax("malformed number".to_string()));
                        }
                        seen_dot = true;
                    }
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                if literal == "." {
                    return Err(CalcError::Syntax("unexpected '.'".to_string()));
                }
                let number = if seen_dot {
                    Number::Float(
                        literal
                            .parse()
                            .map_err(|_| CalcError::Syntax(format!("bad number '{}'", literal)))?,
                    )
                } else {
                    Number::Int(literal.parse().map_err(|_| CalcError::Overflow)?)
                };
                tokens.push(Token::Num(number));
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::DoubleStar);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
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
            other => return Err(CalcError::Syntax(format!("unexpected '{}'", other))),
        }
    }

    Ok(tokens)
}

const MAX_DEPTH: usize = 200;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.peek();
        self.pos += 1;
        tok
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Number, CalcError> {
        let mut lhs = self.term()?;
        while let Some(tok @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = if tok == Token::Plus {
                add(lhs, rhs)?
            } else {
                sub(lhs, rhs)?
            };
        }
        Ok(lhs)
    }

    // term := factor (('*' | '/' | '//') factor)*
    fn term(&mut self) -> Result<Number, CalcError> {
        let mut lhs = self.factor()?;
        while let Some(tok @ (Token::Star | Token::Slash | Token::DoubleSlash)) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = match tok {
                Token::Star => mul(lhs, rhs)?,
                Token::Slash => div(lhs, rhs)?,
                _ => floor_div(lhs, rhs)?,
            };
        }
        Ok(lhs)
    }

    // factor := ('+' | '-') factor | power
    fn factor(&mut self) -> Result<Number, CalcError> {
        match self.peek() {
            Some(Token::Plus) => {
                self.pos += 1;
                self.nested(|p| p.factor())
            }
            Some(Token::Minus) => {
                self.pos += 1;
                let value = self.nested(|p| p.factor())?;
                negate(value)
            }
            _ => self.power(),
        }
    }

    // power := atom ['**' factor]
    fn power(&mut self) -> Result<Number, CalcError> {
        let base = self.atom()?;
        if self.peek() == Some(Token::DoubleStar) {
            self.pos += 1;
            let exponent = self.nested(|p| p.factor())?;
            return pow(base, exponent);
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Number, CalcError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.nested(|p| p.expr())?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(CalcError::Syntax("'(' was never closed".to_string())),
                }
            }
            Some(Token::RParen) => Err(CalcError::Syntax("unmatched ')'".to_string())),
            Some(_) => Err(CalcError::Syntax("operator without operand".to_string())),
            None => Err(CalcError::Syntax("unexpected end of expression".to_string())),
        }
    }

    fn nested<F>(&mut self, f: F) -> Result<Number, CalcError>
    where
        F: FnOnce(&mut Self) -> Result<Number, CalcError>,
    {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::Syntax("expression nested too deeply".to_string()));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }
}

fn add(a: Number, b: Number) -> Result<Number, CalcError> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.checked_add(y).map(Number::Int).ok_or(CalcError::Overflow),
        _ => Ok(Number::Float(a.as_f64() + b.as_f64())),
    }
}

fn sub(a: Number, b: Number) -> Result<Number, CalcError> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.checked_sub(y).map(Number::Int).ok_or(CalcError::Overflow),
        _ => Ok(Number::Float(a.as_f64() - b.as_f64())),
    }
}

fn mul(a: Number, b: Number) -> Result<Number, CalcError> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.checked_mul(y).map(Number::Int).ok_or(CalcError::Overflow),
        _ => Ok(Number::Float(a.as_f64() * b.as_f64())),
    }
}

fn div(a: Number, b: Number) -> Result<Number, CalcError> {
    let divisor = b.as_f64();
    if divisor == 0.0 {
        return Err(CalcError::DivisionByZero);
    }
    Ok(Number::Float(a.as_f64() / divisor))
}

fn floor_div(a: Number, b: Number) -> Result<Number, CalcError> {
    match (a, b) {
        (Number::Int(_), Number::Int(0)) => Err(CalcError::DivisionByZero),
        (Number::Int(x), Number::Int(y)) => {
            let q = x.checked_div(y).ok_or(CalcError::Overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) {
                Ok(Number::Int(q - 1))
            } else {
                Ok(Number::Int(q))
            }
        }
        _ => {
            let divisor = b.as_f64();
            if divisor == 0.0 {
                return Err(CalcError::DivisionByZero);
            }
            Ok(Number::Float((a.as_f64() / divisor).floor()))
        }
    }
}

fn negate(a: Number) -> Result<Number, CalcError> {
    match a {
        Number::Int(x) => x.checked_neg().map(Number::Int).ok_or(CalcError::Overflow),
        Number::Float(x) => Ok(Number::Float(-x)),
    }
}

fn pow(base: Number, exponent: Number) -> Result<Number, CalcError> {
    if base.as_f64() == 0.0 && exponent.as_f64() < 0.0 {
        return Err(CalcError::Domain(
            "0.0 cannot be raised to a negative power".to_string(),
        ));
    }
    match (base, exponent) {
        (Number::Int(b), Number::Int(e)) if e >= 0 => {
            let e = u32::try_from(e).map_err(|_| CalcError::Overflow)?;
            b.checked_pow(e).map(Number::Int).ok_or(CalcError::Overflow)
        }
        _ => {
            let value = base.as_f64().powf(exponent.as_f64());
            if value.is_nan() {
                return Err(CalcError::Domain("complex results are not supported".to_string()));
            }
            if value.is_infinite() && base.as_f64().is_finite() && exponent.as_f64().is_finite() {
                return Err(CalcError::OutOfRange);
            }
            Ok(Number::Float(value))
        }
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<Number, CalcError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(CalcError::Syntax("empty expression".to_string()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(CalcError::Syntax("unexpected trailing input".to_string()));
    }
    Ok(value)
}

fn has_only_allowed_chars(expression: &str) -> bool {
    expression
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_whitespace() || ALLOWED_SYMBOLS.contains(c))
}

/// Calculator tool.
pub struct Calculator;

impl Calculator {
    /// Evaluate and render the tool payload, success or error.
    pub fn calculate(expression: &str) -> String {
        if !has_only_allowed_chars(expression) {
            return format!(
                "Error: Invalid characters in expression '{}'. Only numbers and basic math operators/parentheses are allowed.",
                expression
            );
        }
        match evaluate(expression) {
            Ok(value) => value.to_string(),
            Err(e) => format!(
                "Error in calculator for expression '{}': {}",
                expression, e
            ),
        }
    }
}

#[async_trait]
impl Tool for Calculator {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Calculates the result of a mathematical expression. Input MUST be a valid mathematical expression string (e.g., \"2 + 2 * 5\", \"(100-20)/5\"). Only supports basic arithmetic operations: +, -, *, /, parentheses. Use this for any math calculation required to answer the user."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Arithmetic expression using digits, + - * / ( ) and ."
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let expression = args["expression"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'expression' argument"))?;

        let result = Self::calculate(expression);
        tracing::debug!(expression = expression, result = %result, "Calculator evaluated");
        Ok(result)
    }
}
