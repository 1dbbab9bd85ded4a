//! `Calculator` filter (`spec.md §4.3`/§9): evaluate `newKey = expr` against
//! a precompiled AST rather than synthesizing and running code at runtime.
//!
//! The grammar is closed over `+ - * / **`, parentheses, numeric literals
//! and `${key}` references (`spec.md §4.3`d): no function calls, no
//! assignment inside expressions, no way to reach anything but the current
//! record's body (`spec.md §8` invariant 10).

use serde::Deserialize;
use statcollector_core::{yaml_to_config, FilterContext, FilterDriver};
use statcollector_types::{ParsedData, PipelineError, Scalar};

#[derive(Debug, Clone, Deserialize)]
struct RawExpression {
    key: String,
    expr: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    ShortCircuit,
    Zero,
}

impl Default for MissingKeyPolicy {
    fn default() -> Self {
        MissingKeyPolicy::ShortCircuit
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CalculatorConfig {
    expressions: Vec<RawExpression>,
    missing_key_policy: MissingKeyPolicy,
}

#[derive(Debug, Clone)]
enum Ast {
    Num(f64),
    Key(String),
    Neg(Box<Ast>),
    Add(Box<Ast>, Box<Ast>),
    Sub(Box<Ast>, Box<Ast>),
    Mul(Box<Ast>, Box<Ast>),
    Div(Box<Ast>, Box<Ast>),
    Pow(Box<Ast>, Box<Ast>),
}

struct Compiled {
    target_key: String,
    ast: Ast,
}

pub struct Calculator {
    compiled: Vec<Compiled>,
    missing_key_policy: MissingKeyPolicy,
}

impl Calculator {
    pub fn new(name: &str, config: &serde_yaml::Value) -> Result<Self, PipelineError> {
        let parsed: CalculatorConfig = yaml_to_config(config);
        Self::from_expressions(
            name,
            parsed.expressions.into_iter().map(|e| (e.key, e.expr)),
            parsed.missing_key_policy,
        )
    }

    /// Compiles `(targetKey, expr)` pairs directly, bypassing YAML —
    /// used by the `CODE` filter, whose expressions come from a script file
    /// rather than a config fragment.
    pub(crate) fn from_expressions(
        name: &str,
        expressions: impl IntoIterator<Item = (String, String)>,
        missing_key_policy: MissingKeyPolicy,
    ) -> Result<Self, PipelineError> {
        let mut compiled = Vec::new();
        for (key, expr) in expressions {
            let ast = parse_expr(&expr).map_err(|reason| PipelineError::InvalidConfig {
                kind: "filter",
                name: name.to_string(),
                reason: format!("expression `{expr}` for key `{key}`: {reason}"),
            })?;
            compiled.push(Compiled { target_key: key, ast });
        }
        Ok(Self {
            compiled,
            missing_key_policy,
        })
    }
}

impl FilterDriver for Calculator {
    fn filter_body(&self, mut data: ParsedData, _ctx: &FilterContext) -> Option<ParsedData> {
        for compiled in &self.compiled {
            if let Some(value) = eval(&compiled.ast, &data, self.missing_key_policy) {
                data.set(compiled.target_key.clone(), Scalar::Number(value));
            }
        }
        Some(data)
    }
}

fn eval(ast: &Ast, data: &ParsedData, policy: MissingKeyPolicy) -> Option<f64> {
    match ast {
        Ast::Num(n) => Some(*n),
        Ast::Key(name) => match data.get(name).and_then(Scalar::as_f64) {
            Some(v) => Some(v),
            None => match policy {
                MissingKeyPolicy::ShortCircuit => None,
                MissingKeyPolicy::Zero => Some(0.0),
            },
        },
        Ast::Neg(inner) => eval(inner, data, policy).map(|v| -v),
        Ast::Add(a, b) => Some(eval(a, data, policy)? + eval(b, data, policy)?),
        Ast::Sub(a, b) => Some(eval(a, data, policy)? - eval(b, data, policy)?),
        Ast::Mul(a, b) => Some(eval(a, data, policy)? * eval(b, data, policy)?),
        Ast::Div(a, b) => Some(eval(a, data, policy)? / eval(b, data, policy)?), // x/0.0 -> +-inf, by design
        Ast::Pow(a, b) => Some(eval(a, data, policy)?.powf(eval(b, data, policy)?)),
    }
}

// --- recursive-descent parser over a closed grammar ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Key(String),
    Plus,
    Minus,
    Star,
    Slash,
    Pow,
    LParen,
    RParen,
    End,
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Pow);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
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
            '$' => {
                if chars.get(i + 1) != Some(&'{') {
                    return Err("expected '{' after '$'".to_string());
                }
                let start = i + 2;
                let mut j = start;
                while j < chars.len() && chars[j] != '}' {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err("unterminated ${...} reference".to_string());
                }
                tokens.push(Token::Key(chars[start..j].iter().collect()));
                i = j + 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                let mut j = i;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    j += 1;
                }
                let text: String = chars[start..j].iter().collect();
                let n = text.parse::<f64>().map_err(|_| format!("invalid numeric literal `{text}`"))?;
                tokens.push(Token::Num(n));
                i = j;
            }
            other => return Err(format!("unexpected character `{other}` in expression")),
        }
    }
    tokens.push(Token::End);
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        tok
    }

    fn expr(&mut self) -> Result<Ast, String> {
        let mut node = self.term()?;
        loop {
            match self.peek() {
                Token::Plus => {
                    self.advance();
                    node = Ast::Add(Box::new(node), Box::new(self.term()?));
                }
                Token::Minus => {
                    self.advance();
                    node = Ast::Sub(Box::new(node), Box::new(self.term()?));
                }
                _ => return Ok(node),
            }
        }
    }

    fn term(&mut self) -> Result<Ast, String> {
        let mut node = self.power()?;
        loop {
            match self.peek() {
                Token::Star => {
                    self.advance();
                    node = Ast::Mul(Box::new(node), Box::new(self.power()?));
                }
                Token::Slash => {
                    self.advance();
                    node = Ast::Div(Box::new(node), Box::new(self.power()?));
                }
                _ => return Ok(node),
            }
        }
    }

    /// Right-associative: `2 ** 3 ** 2 == 2 ** (3 ** 2)`.
    fn power(&mut self) -> Result<Ast, String> {
        let base = self.unary()?;
        if matches!(self.peek(), Token::Pow) {
            self.advance();
            let exponent = self.power()?;
            return Ok(Ast::Pow(Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Ast, String> {
        if matches!(self.peek(), Token::Minus) {
            self.advance();
            return Ok(Ast::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Ast, String> {
        match self.advance() {
            Token::Num(n) => Ok(Ast::Num(n)),
            Token::Key(name) => Ok(Ast::Key(name)),
            Token::LParen => {
                let inner = self.expr()?;
                if !matches!(self.advance(), Token::RParen) {
                    return Err("expected closing ')'".to_string());
                }
                Ok(inner)
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

fn parse_expr(src: &str) -> Result<Ast, String> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.expr()?;
    if !matches!(parser.peek(), Token::End) {
        return Err(format!("trailing input after expression at token {:?}", parser.peek()));
    }
    Ok(ast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::SystemTime;
    use statcollector_core::Registry;
    use statcollector_types::RawData;

    fn ctx() -> FilterContext {
        FilterContext::new(Rc::new(RefCell::new(Registry::new("filter"))))
    }

    fn sample() -> ParsedData {
        RawData::new("d", "u", None, None, SystemTime::now(), SystemTime::now(), vec![])
            .into_parsed(vec![("a".into(), Scalar::Number(4.0)), ("b".into(), Scalar::Number(2.0))])
    }

    fn calc(expr: &str, policy: MissingKeyPolicy) -> Calculator {
        Calculator {
            compiled: vec![Compiled {
                target_key: "result".into(),
                ast: parse_expr(expr).unwrap(),
            }],
            missing_key_policy: policy,
        }
    }

    #[test]
    fn basic_arithmetic_precedence() {
        let c = calc("${a} + ${b} * 2", MissingKeyPolicy::ShortCircuit);
        let result = c.filter_body(sample(), &ctx()).unwrap();
        assert_eq!(result.get("result"), Some(&Scalar::Number(8.0)));
    }

    #[test]
    fn power_is_right_associative() {
        let c = calc("2 ** 3 ** 2", MissingKeyPolicy::ShortCircuit);
        let result = c.filter_body(sample(), &ctx()).unwrap();
        assert_eq!(result.get("result"), Some(&Scalar::Number(512.0)));
    }

    #[test]
    fn division_by_zero_is_infinity() {
        let c = calc("${a} / 0", MissingKeyPolicy::ShortCircuit);
        let result = c.filter_body(sample(), &ctx()).unwrap();
        assert_eq!(result.get("result"), Some(&Scalar::Number(f64::INFINITY)));
    }

    #[test]
    fn missing_key_short_circuits_and_skips_assignment() {
        let c = calc("${missing} + 1", MissingKeyPolicy::ShortCircuit);
        let result = c.filter_body(sample(), &ctx()).unwrap();
        assert_eq!(result.get("result"), None);
    }

    #[test]
    fn missing_key_zero_policy_substitutes_zero() {
        let c = calc("${missing} + 1", MissingKeyPolicy::Zero);
        let result = c.filter_body(sample(), &ctx()).unwrap();
        assert_eq!(result.get("result"), Some(&Scalar::Number(1.0)));
    }

    #[test]
    fn rejects_unknown_tokens_at_compile_time() {
        assert!(parse_expr("${a} ; rm -rf /").is_err());
    }
}
