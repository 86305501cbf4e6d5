//! Small expression language for value transforms and plan initializers.
//!
//! An expression is a literal (`'text'`, `42`, `true`, `null`), an argument
//! path (`value`, `identity.department`) or a function call such as
//! `concat(lower(firstname), '.', lower(lastname))`.

use async_trait::async_trait;
use provisio_application::ScriptEvaluator;
use provisio_core::{AppError, AppResult};
use provisio_domain::{is_empty_value, value_as_text};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Number(f64),
    Ident(String),
    LeftParen,
    RightParen,
    Comma,
}

fn tokenize(source: &str) -> AppResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(&current) = chars.peek() {
        match current {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LeftParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RightParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '\'' | '"' => {
                let quote = current;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => text.push(escaped),
                            None => break,
                        },
                        Some(next) if next == quote => {
                            tokens.push(Token::Text(text));
                            break;
                        }
                        Some(next) => text.push(next),
                        None => {
                            return Err(AppError::Validation(format!(
                                "unterminated string in script '{source}'"
                            )));
                        }
                    }
                }
            }
            digit if digit.is_ascii_digit() || digit == '-' => {
                let mut number = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_digit() || next == '.' || (number.is_empty() && next == '-') {
                        number.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let parsed = number.parse::<f64>().map_err(|_| {
                    AppError::Validation(format!("invalid number '{number}' in script"))
                })?;
                tokens.push(Token::Number(parsed));
            }
            letter if letter.is_alphabetic() || letter == '_' => {
                let mut ident = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' || next == '.' {
                        ident.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(AppError::Validation(format!(
                    "unexpected character '{other}' in script '{source}'"
                )));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn expression(&mut self) -> AppResult<Expr> {
        match self.next() {
            Some(Token::Text(text)) => Ok(Expr::Literal(Value::String(text))),
            Some(Token::Number(number)) => Ok(Expr::Literal(number_value(number))),
            Some(Token::Ident(ident)) => {
                if self.peek() == Some(&Token::LeftParen) {
                    self.position += 1;
                    let arguments = self.arguments()?;
                    return Ok(Expr::Call(ident, arguments));
                }
                Ok(match ident.as_str() {
                    "true" => Expr::Literal(Value::Bool(true)),
                    "false" => Expr::Literal(Value::Bool(false)),
                    "null" => Expr::Literal(Value::Null),
                    _ => Expr::Path(ident.split('.').map(ToOwned::to_owned).collect()),
                })
            }
            Some(token) => Err(AppError::Validation(format!(
                "unexpected token {token:?} in script"
            ))),
            None => Err(AppError::Validation("script ended early".to_owned())),
        }
    }

    fn arguments(&mut self) -> AppResult<Vec<Expr>> {
        let mut arguments = Vec::new();
        if self.peek() == Some(&Token::RightParen) {
            self.position += 1;
            return Ok(arguments);
        }
        loop {
            arguments.push(self.expression()?);
            match self.next() {
                Some(Token::Comma) => {}
                Some(Token::RightParen) => return Ok(arguments),
                _ => {
                    return Err(AppError::Validation(
                        "expected ',' or ')' in function call".to_owned(),
                    ));
                }
            }
        }
    }
}

fn number_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < 9.0e15 {
        Value::from(number as i64)
    } else {
        Value::from(number)
    }
}

fn parse(source: &str) -> AppResult<Expr> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        position: 0,
    };
    let expression = parser.expression()?;
    if parser.position != parser.tokens.len() {
        return Err(AppError::Validation(format!(
            "unexpected trailing input in script '{source}'"
        )));
    }
    Ok(expression)
}

fn lookup(arguments: &Map<String, Value>, path: &[String]) -> Value {
    let Some((first, rest)) = path.split_first() else {
        return Value::Null;
    };
    let mut current = arguments.get(first.as_str());
    for segment in rest {
        current = current.and_then(|value| value.get(segment.as_str()));
    }
    current.cloned().unwrap_or(Value::Null)
}

fn map_text(value: Value, transform: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(text) => Value::String(transform(text.as_str())),
        Value::Array(values) => Value::Array(
            values
                .into_iter()
                .map(|value| match value {
                    Value::String(text) => Value::String(transform(text.as_str())),
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}

fn text_argument(values: &[Value], index: usize, function: &str) -> AppResult<String> {
    values
        .get(index)
        .and_then(value_as_text)
        .ok_or_else(|| AppError::Validation(format!("{function}() needs a text argument {}", index + 1)))
}

fn call(function: &str, values: Vec<Value>) -> AppResult<Value> {
    let single = |values: Vec<Value>| -> AppResult<Value> {
        let mut values = values.into_iter();
        match (values.next(), values.next()) {
            (Some(value), None) => Ok(value),
            _ => Err(AppError::Validation(format!(
                "{function}() takes exactly one argument"
            ))),
        }
    };

    match function {
        "upper" => Ok(map_text(single(values)?, str::to_uppercase)),
        "lower" => Ok(map_text(single(values)?, str::to_lowercase)),
        "trim" => Ok(map_text(single(values)?, |text| text.trim().to_owned())),
        "concat" => Ok(Value::String(
            values.iter().filter_map(value_as_text).collect::<String>(),
        )),
        "coalesce" => Ok(values
            .into_iter()
            .find(|value| !is_empty_value(Some(value)))
            .unwrap_or(Value::Null)),
        "first" => Ok(match single(values)? {
            Value::Array(values) => values.into_iter().next().unwrap_or(Value::Null),
            other => other,
        }),
        "split" => {
            let text = text_argument(&values, 0, function)?;
            let separator = text_argument(&values, 1, function)?;
            Ok(Value::Array(
                text.split(separator.as_str())
                    .filter(|part| !part.is_empty())
                    .map(|part| Value::String(part.to_owned()))
                    .collect(),
            ))
        }
        "join" => {
            let separator = text_argument(&values, 1, function)?;
            let parts: Vec<String> = match values.first() {
                Some(Value::Array(items)) => items.iter().filter_map(value_as_text).collect(),
                Some(other) => value_as_text(other).into_iter().collect(),
                None => Vec::new(),
            };
            Ok(Value::String(parts.join(separator.as_str())))
        }
        "replace" => {
            let from = text_argument(&values, 1, function)?;
            let to = text_argument(&values, 2, function)?;
            let subject = values.into_iter().next().unwrap_or(Value::Null);
            Ok(map_text(subject, |text| text.replace(from.as_str(), to.as_str())))
        }
        "fail" => {
            let message = values
                .first()
                .and_then(value_as_text)
                .unwrap_or_else(|| "script failed".to_owned());
            Err(AppError::Validation(message))
        }
        other => Err(AppError::Validation(format!("unknown script function '{other}'"))),
    }
}

fn evaluate(expression: &Expr, arguments: &Map<String, Value>) -> AppResult<Value> {
    match expression {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(path) => Ok(lookup(arguments, path)),
        Expr::Call(function, parameters) => {
            let values = parameters
                .iter()
                .map(|parameter| evaluate(parameter, arguments))
                .collect::<AppResult<Vec<Value>>>()?;
            call(function.as_str(), values)
        }
    }
}

/// Script evaluator over the expression language.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionScriptEvaluator;

impl ExpressionScriptEvaluator {
    /// Creates the evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parses a script without running it.
    pub fn validate(&self, script: &str) -> AppResult<()> {
        parse(script).map(|_| ())
    }
}

#[async_trait]
impl ScriptEvaluator for ExpressionScriptEvaluator {
    async fn run(&self, script: &str, arguments: &Map<String, Value>) -> AppResult<Value> {
        let expression = parse(script)?;
        evaluate(&expression, arguments)
    }
}
