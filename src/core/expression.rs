//! # Deferred Expressions
//!
//! Setting values that are computed from other settings at resolution time,
//! e.g. `layer_height_0 = "=layer_height * 1.5"`. An expression is parsed once
//! when the container is built and evaluated every time the setting is
//! resolved against a stack.
//!
//! The grammar is a small, Python-flavoured subset:
//!
//! - literals: `0.2`, `3`, `'text'`, `True`, `False`
//! - setting references: `machine_nozzle_size`
//! - arithmetic `+ - * / **`, comparisons `== != < <= > >=`
//! - `and`, `or`, `not`, unary `-`
//! - calls `min(..)`, `max(..)`, `abs(x)`, `round(x[, digits])`, `sqrt(x)`, `int(x)`, `float(x)`
//! - conditionals `a if condition else b`

use crate::constants::MAX_EVALUATION_DEPTH;
use crate::models::{Literal, SettingType, SettingValue};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use thiserror::Error;

lazy_static! {
    // One token per match, anchored at the current offset. Leading whitespace is skipped.
    static ref TOKEN_RE: Result<Regex, regex::Error> = Regex::new(
        r#"^\s*(?:(?P<number>(?:\d+\.\d*|\.\d+|\d+)(?:[eE][+-]?\d+)?)|(?P<ident>[A-Za-z_][A-Za-z0-9_]*)|(?P<string>'[^']*'|"[^"]*")|(?P<symbol>\*\*|==|!=|<=|>=|[-+*/<>(),]))"#
    );
}

/// Failures while parsing or evaluating a deferred expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    /// The tokenizer hit text it cannot classify.
    #[error("Unexpected character at offset {offset} in '{source_text}'.")]
    UnexpectedCharacter {
        /// Byte offset of the offending text.
        offset: usize,
        /// The whole expression.
        source_text: String,
    },
    /// A token appeared where the grammar does not allow it.
    #[error("Unexpected token '{found}' in '{source_text}'.")]
    UnexpectedToken {
        /// The token text.
        found: String,
        /// The whole expression.
        source_text: String,
    },
    /// The expression ended mid-construct.
    #[error("Unexpected end of expression '{source_text}'.")]
    UnexpectedEnd {
        /// The whole expression.
        source_text: String,
    },
    /// A numeric literal did not parse.
    #[error("Invalid number literal '{0}'.")]
    InvalidNumber(String),
    /// Call of a function outside the supported set.
    #[error("Unknown function '{0}'.")]
    UnknownFunction(String),
    /// Wrong number of call arguments.
    #[error("Function '{function}' expects {expected} argument(s), got {found}.")]
    Arity {
        /// Function name.
        function: &'static str,
        /// Accepted argument count, as text.
        expected: &'static str,
        /// Arguments supplied.
        found: usize,
    },
    /// A reference names a setting no layer defines.
    #[error("Setting '{0}' is not defined in any layer.")]
    UnknownSetting(String),
    /// Evaluation re-entered a setting already on the path.
    #[error("Circular reference detected while evaluating: {cycle_path}")]
    CircularReference {
        /// The path, joined with ` -> `.
        cycle_path: String,
    },
    /// Nested evaluation went too deep.
    #[error("Maximum evaluation depth ({depth}) exceeded while evaluating '{key}'.")]
    MaxDepth {
        /// The depth limit.
        depth: u32,
        /// Setting being evaluated when the limit was hit.
        key: String,
    },
    /// An operator got operands it does not accept.
    #[error("Operator '{operator}' cannot be applied to {left} and {right}.")]
    TypeMismatch {
        /// Operator symbol.
        operator: &'static str,
        /// Kind of the left operand.
        left: &'static str,
        /// Kind of the right operand.
        right: &'static str,
    },
    /// A value could not be converted to its setting's declared type.
    #[error("Value '{value}' of setting '{key}' cannot be converted to {kind:?}.")]
    Coercion {
        /// Setting key.
        key: String,
        /// The value, rendered.
        value: String,
        /// Target type.
        kind: SettingType,
    },
    /// Division by zero and similar.
    #[error("Arithmetic error: {0}")]
    Arithmetic(&'static str),
    /// The token pattern itself is invalid.
    #[error("Tokenizer pattern failed to compile: {0}")]
    Tokenizer(String),
}

/// Result of parsing or evaluating an expression.
pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// A read-only view of layered settings that deferred expressions resolve
/// their references against.
pub trait SettingSource {
    /// The stored value of `key` on the highest layer that defines it.
    fn raw_value(&self, key: &str) -> Option<SettingValue>;

    /// The declared type of `key`, if any layer declares one.
    fn declared_type(&self, key: &str) -> Option<SettingType>;
}

// --- AST ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOperator {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl BinaryOperator {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Power => "**",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::And => "and",
            Self::Or => "or",
        }
    }

    fn precedence(self) -> Precedence {
        match self {
            Self::Or => Precedence::Or,
            Self::And => Precedence::And,
            Self::Equal
            | Self::NotEqual
            | Self::Less
            | Self::LessEqual
            | Self::Greater
            | Self::GreaterEqual => Precedence::Comparison,
            Self::Add | Self::Subtract => Precedence::Additive,
            Self::Multiply | Self::Divide => Precedence::Multiplicative,
            Self::Power => Precedence::Power,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Function {
    Min,
    Max,
    Abs,
    Round,
    Sqrt,
    Int,
    Float,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "abs" => Some(Self::Abs),
            "round" => Some(Self::Round),
            "sqrt" => Some(Self::Sqrt),
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Abs => "abs",
            Self::Round => "round",
            Self::Sqrt => "sqrt",
            Self::Int => "int",
            Self::Float => "float",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Literal(Literal),
    Reference(String),
    Unary {
        op: UnaryOperator,
        operand: Box<Node>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Node>,
        right: Box<Node>,
    },
    Call {
        function: Function,
        args: Vec<Node>,
    },
    Conditional {
        condition: Box<Node>,
        then_branch: Box<Node>,
        else_branch: Box<Node>,
    },
}

/// A parsed deferred expression together with its source text.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Node,
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Expression {
    /// Parses the expression text (without the leading `=`).
    pub fn parse(source: &str) -> ExpressionResult<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens: &tokens,
            cursor: 0,
            source,
        };
        let root = parser.parse_expression()?;
        if let Some(token) = parser.peek() {
            return Err(parser.unexpected(token));
        }
        Ok(Self {
            source: source.trim().to_string(),
            root,
        })
    }

    /// The trimmed source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn root(&self) -> &Node {
        &self.root
    }

    /// Names of all settings this expression reads directly.
    pub fn references(&self) -> Vec<&str> {
        let mut found = Vec::new();
        collect_references(&self.root, &mut found);
        found
    }

    /// Evaluates the expression against a layered setting source.
    pub fn evaluate(&self, source: &dyn SettingSource) -> ExpressionResult<Literal> {
        Evaluator::new(source).eval(&self.root)
    }
}

fn collect_references<'a>(node: &'a Node, found: &mut Vec<&'a str>) {
    match node {
        Node::Literal(_) => {}
        Node::Reference(name) => {
            if !found.contains(&name.as_str()) {
                found.push(name);
            }
        }
        Node::Unary { operand, .. } => collect_references(operand, found),
        Node::Binary { left, right, .. } => {
            collect_references(left, found);
            collect_references(right, found);
        }
        Node::Call { args, .. } => args.iter().for_each(|a| collect_references(a, found)),
        Node::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            collect_references(then_branch, found);
            collect_references(condition, found);
            collect_references(else_branch, found);
        }
    }
}

impl SettingValue {
    /// Produces the concrete value: literals as-is, deferred expressions
    /// evaluated against `source`.
    pub fn evaluate(&self, source: &dyn SettingSource) -> ExpressionResult<Literal> {
        match self {
            Self::Literal(literal) => Ok(literal.clone()),
            Self::Deferred(expression) => expression.evaluate(source),
        }
    }
}

// --- TOKENIZER ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Literal),
    Ident(String),
    Str(String),
    Symbol(&'static str),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Ident(s) => f.write_str(s),
            Self::Str(s) => write!(f, "'{}'", s),
            Self::Symbol(s) => f.write_str(s),
        }
    }
}

const SYMBOLS: &[&str] = &[
    "**", "==", "!=", "<=", ">=", "-", "+", "*", "/", "<", ">", "(", ")", ",",
];

fn tokenize(source: &str) -> ExpressionResult<Vec<Token>> {
    let token_re = TOKEN_RE
        .as_ref()
        .map_err(|e| ExpressionError::Tokenizer(e.to_string()))?;
    let mut tokens = Vec::new();
    let mut offset = 0;

    while let Some(rest) = source.get(offset..) {
        if rest.trim().is_empty() {
            break;
        }
        let caps = token_re
            .captures(rest)
            .ok_or_else(|| ExpressionError::UnexpectedCharacter {
                offset: offset + (rest.len() - rest.trim_start().len()),
                source_text: source.to_string(),
            })?;

        if let Some(m) = caps.name("number") {
            tokens.push(Token::Number(parse_number(m.as_str())?));
        } else if let Some(m) = caps.name("ident") {
            tokens.push(Token::Ident(m.as_str().to_string()));
        } else if let Some(m) = caps.name("string") {
            let raw = m.as_str();
            tokens.push(Token::Str(raw.get(1..raw.len() - 1).unwrap_or_default().to_string()));
        } else if let Some(m) = caps.name("symbol") {
            let symbol = SYMBOLS
                .iter()
                .find(|s| **s == m.as_str())
                .copied()
                .ok_or_else(|| ExpressionError::UnexpectedCharacter {
                    offset: offset + m.start(),
                    source_text: source.to_string(),
                })?;
            tokens.push(Token::Symbol(symbol));
        }

        let consumed = caps.get(0).map_or(0, |m| m.end());
        if consumed == 0 {
            break;
        }
        offset += consumed;
    }
    Ok(tokens)
}

fn parse_number(text: &str) -> ExpressionResult<Literal> {
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>()
            .map(Literal::Float)
            .map_err(|_| ExpressionError::InvalidNumber(text.to_string()))
    } else {
        text.parse::<i64>()
            .map(Literal::Int)
            .map_err(|_| ExpressionError::InvalidNumber(text.to_string()))
    }
}

// --- PARSER ---

/// Binding power of binary operators (higher = tighter binding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Or = 1,
    And = 2,
    Comparison = 3,
    Additive = 4,
    Multiplicative = 5,
    Unary = 6,
    Power = 7,
}

impl Precedence {
    /// The next level up, used for left-associative operators.
    fn next(self) -> Self {
        match self {
            Self::Or => Self::And,
            Self::And => Self::Comparison,
            Self::Comparison => Self::Additive,
            Self::Additive => Self::Multiplicative,
            Self::Multiplicative => Self::Unary,
            Self::Unary | Self::Power => Self::Power,
        }
    }
}

struct Parser<'t> {
    tokens: &'t [Token],
    cursor: usize,
    source: &'t str,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.cursor)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.cursor);
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn unexpected(&self, token: &Token) -> ExpressionError {
        ExpressionError::UnexpectedToken {
            found: token.to_string(),
            source_text: self.source.to_string(),
        }
    }

    fn end(&self) -> ExpressionError {
        ExpressionError::UnexpectedEnd {
            source_text: self.source.to_string(),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == keyword)
    }

    fn expect_symbol(&mut self, symbol: &str) -> ExpressionResult<()> {
        match self.advance() {
            Some(Token::Symbol(s)) if *s == symbol => Ok(()),
            Some(other) => Err(self.unexpected(other)),
            None => Err(self.end()),
        }
    }

    /// `value [if condition else alternative]`, right-associative.
    fn parse_expression(&mut self) -> ExpressionResult<Node> {
        let value = self.parse_binary(Precedence::Or)?;
        if !self.is_keyword("if") {
            return Ok(value);
        }
        self.advance();
        let condition = self.parse_binary(Precedence::Or)?;
        if !self.is_keyword("else") {
            return match self.peek() {
                Some(token) => Err(self.unexpected(token)),
                None => Err(self.end()),
            };
        }
        self.advance();
        let alternative = self.parse_expression()?;
        Ok(Node::Conditional {
            condition: Box::new(condition),
            then_branch: Box::new(value),
            else_branch: Box::new(alternative),
        })
    }

    fn peek_binary_operator(&self) -> Option<BinaryOperator> {
        match self.peek()? {
            Token::Symbol(s) => match *s {
                "+" => Some(BinaryOperator::Add),
                "-" => Some(BinaryOperator::Subtract),
                "*" => Some(BinaryOperator::Multiply),
                "/" => Some(BinaryOperator::Divide),
                "**" => Some(BinaryOperator::Power),
                "==" => Some(BinaryOperator::Equal),
                "!=" => Some(BinaryOperator::NotEqual),
                "<" => Some(BinaryOperator::Less),
                "<=" => Some(BinaryOperator::LessEqual),
                ">" => Some(BinaryOperator::Greater),
                ">=" => Some(BinaryOperator::GreaterEqual),
                _ => None,
            },
            Token::Ident(s) if s == "and" => Some(BinaryOperator::And),
            Token::Ident(s) if s == "or" => Some(BinaryOperator::Or),
            _ => None,
        }
    }

    /// Precedence climbing over binary operators. `**` is right-associative.
    fn parse_binary(&mut self, min: Precedence) -> ExpressionResult<Node> {
        let mut left = self.parse_prefix()?;

        while let Some(op) = self.peek_binary_operator() {
            let precedence = op.precedence();
            if precedence < min {
                break;
            }
            self.advance();
            let next_min = if op == BinaryOperator::Power {
                precedence
            } else {
                precedence.next()
            };
            let right = self.parse_binary(next_min)?;
            left = Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> ExpressionResult<Node> {
        let token = self.advance().ok_or_else(|| self.end())?;
        match token {
            Token::Number(n) => Ok(Node::Literal(n.clone())),
            Token::Str(s) => Ok(Node::Literal(Literal::Str(s.clone()))),
            Token::Symbol("-") => Ok(Node::Unary {
                op: UnaryOperator::Negate,
                operand: Box::new(self.parse_binary(Precedence::Unary)?),
            }),
            Token::Symbol("+") => self.parse_binary(Precedence::Unary),
            Token::Symbol("(") => {
                let inner = self.parse_expression()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "True" | "true" => Ok(Node::Literal(Literal::Bool(true))),
                "False" | "false" => Ok(Node::Literal(Literal::Bool(false))),
                "not" => Ok(Node::Unary {
                    op: UnaryOperator::Not,
                    operand: Box::new(self.parse_binary(Precedence::Comparison)?),
                }),
                "and" | "or" | "if" | "else" => Err(self.unexpected(token)),
                _ if matches!(self.peek(), Some(Token::Symbol("("))) => self.parse_call(name),
                _ => Ok(Node::Reference(name.clone())),
            },
            other => Err(self.unexpected(other)),
        }
    }

    fn parse_call(&mut self, name: &str) -> ExpressionResult<Node> {
        let function =
            Function::from_name(name).ok_or_else(|| ExpressionError::UnknownFunction(name.to_string()))?;
        self.expect_symbol("(")?;

        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::Symbol(")"))) {
            self.advance();
        } else {
            loop {
                args.push(self.parse_expression()?);
                match self.advance() {
                    Some(Token::Symbol(",")) => continue,
                    Some(Token::Symbol(")")) => break,
                    Some(other) => return Err(self.unexpected(other)),
                    None => return Err(self.end()),
                }
            }
        }
        check_arity(function, args.len())?;
        Ok(Node::Call { function, args })
    }
}

fn check_arity(function: Function, found: usize) -> ExpressionResult<()> {
    let (ok, expected) = match function {
        Function::Min | Function::Max => (found >= 1, "at least 1"),
        Function::Round => ((1..=2).contains(&found), "1 or 2"),
        Function::Abs | Function::Sqrt | Function::Int | Function::Float => (found == 1, "1"),
    };
    if ok {
        Ok(())
    } else {
        Err(ExpressionError::Arity {
            function: function.name(),
            expected,
            found,
        })
    }
}

// --- EVALUATOR ---

/// Walks an expression tree, resolving references through a `SettingSource`.
/// Tracks the chain of settings being evaluated to detect cycles.
struct Evaluator<'a> {
    source: &'a dyn SettingSource,
    // For direct cycle detection (a -> b -> a)
    recursion_stack: Vec<String>,
}

impl<'a> Evaluator<'a> {
    fn new(source: &'a dyn SettingSource) -> Self {
        Self {
            source,
            recursion_stack: Vec::new(),
        }
    }

    fn eval(&mut self, node: &Node) -> ExpressionResult<Literal> {
        match node {
            Node::Literal(literal) => Ok(literal.clone()),
            Node::Reference(key) => self.resolve_reference(key),
            Node::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOperator::Not => Ok(Literal::Bool(!value.is_truthy())),
                    UnaryOperator::Negate => match value {
                        Literal::Int(i) => i
                            .checked_neg()
                            .map(Literal::Int)
                            .ok_or(ExpressionError::Arithmetic("integer overflow")),
                        Literal::Bool(b) => Ok(Literal::Int(-i64::from(b))),
                        Literal::Float(f) => Ok(Literal::Float(-f)),
                        Literal::Str(_) => Err(ExpressionError::TypeMismatch {
                            operator: "-",
                            left: "nothing",
                            right: "str",
                        }),
                    },
                }
            }
            Node::Binary { op, left, right } => match op {
                BinaryOperator::And => {
                    let lhs = self.eval(left)?;
                    if lhs.is_truthy() { self.eval(right) } else { Ok(lhs) }
                }
                BinaryOperator::Or => {
                    let lhs = self.eval(left)?;
                    if lhs.is_truthy() { Ok(lhs) } else { self.eval(right) }
                }
                _ => {
                    let lhs = self.eval(left)?;
                    let rhs = self.eval(right)?;
                    apply_binary(*op, &lhs, &rhs)
                }
            },
            Node::Call { function, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<ExpressionResult<Vec<_>>>()?;
                apply_function(*function, &values)
            }
            Node::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval(condition)?.is_truthy() {
                    self.eval(then_branch)
                } else {
                    self.eval(else_branch)
                }
            }
        }
    }

    fn resolve_reference(&mut self, key: &str) -> ExpressionResult<Literal> {
        if self.recursion_stack.iter().any(|k| k == key) {
            let mut cycle = self.recursion_stack.clone();
            cycle.push(key.to_string());
            return Err(ExpressionError::CircularReference {
                cycle_path: cycle.join(" -> "),
            });
        }
        let depth = u32::try_from(self.recursion_stack.len()).unwrap_or(u32::MAX);
        if depth >= MAX_EVALUATION_DEPTH {
            return Err(ExpressionError::MaxDepth {
                depth,
                key: key.to_string(),
            });
        }

        let raw = self
            .source
            .raw_value(key)
            .ok_or_else(|| ExpressionError::UnknownSetting(key.to_string()))?;

        let value = match raw {
            SettingValue::Literal(literal) => literal,
            SettingValue::Deferred(expression) => {
                self.recursion_stack.push(key.to_string());
                let result = self.eval(expression.root());
                self.recursion_stack.pop();
                result?
            }
        };

        match self.source.declared_type(key) {
            Some(kind) => coerce(key, &value, kind),
            None => Ok(value),
        }
    }
}

/// Converts `value` to `kind`, reporting which setting failed.
pub fn coerce(key: &str, value: &Literal, kind: SettingType) -> ExpressionResult<Literal> {
    value.coerce(kind).ok_or_else(|| ExpressionError::Coercion {
        key: key.to_string(),
        value: value.to_string(),
        kind,
    })
}

fn numeric(op: BinaryOperator, lhs: &Literal, rhs: &Literal) -> ExpressionResult<(f64, f64)> {
    let mismatch = || ExpressionError::TypeMismatch {
        operator: op.symbol(),
        left: lhs.type_name(),
        right: rhs.type_name(),
    };
    if matches!(lhs, Literal::Str(_)) || matches!(rhs, Literal::Str(_)) {
        return Err(mismatch());
    }
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(mismatch()),
    }
}

fn as_int(value: &Literal) -> Option<i64> {
    match value {
        Literal::Int(i) => Some(*i),
        Literal::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn apply_binary(op: BinaryOperator, lhs: &Literal, rhs: &Literal) -> ExpressionResult<Literal> {
    use BinaryOperator as B;

    match op {
        B::Equal | B::NotEqual => {
            let equal = match (lhs, rhs) {
                (Literal::Str(a), Literal::Str(b)) => a == b,
                (Literal::Str(_), _) | (_, Literal::Str(_)) => false,
                _ => lhs.as_f64() == rhs.as_f64(),
            };
            Ok(Literal::Bool(if op == B::Equal { equal } else { !equal }))
        }
        B::Less | B::LessEqual | B::Greater | B::GreaterEqual => {
            let ordering = match (lhs, rhs) {
                (Literal::Str(a), Literal::Str(b)) => a.partial_cmp(b),
                _ => {
                    let (a, b) = numeric(op, lhs, rhs)?;
                    a.partial_cmp(&b)
                }
            };
            let result = ordering.is_some_and(|o| match op {
                B::Less => o.is_lt(),
                B::LessEqual => o.is_le(),
                B::Greater => o.is_gt(),
                _ => o.is_ge(),
            });
            Ok(Literal::Bool(result))
        }
        B::Add => match (lhs, rhs) {
            (Literal::Str(a), Literal::Str(b)) => Ok(Literal::Str(format!("{}{}", a, b))),
            _ => int_or_float(op, lhs, rhs, i64::checked_add, |a, b| a + b),
        },
        B::Subtract => int_or_float(op, lhs, rhs, i64::checked_sub, |a, b| a - b),
        B::Multiply => int_or_float(op, lhs, rhs, i64::checked_mul, |a, b| a * b),
        B::Divide => {
            let (a, b) = numeric(op, lhs, rhs)?;
            if b == 0.0 {
                return Err(ExpressionError::Arithmetic("division by zero"));
            }
            Ok(Literal::Float(a / b))
        }
        B::Power => {
            if let (Some(a), Some(b)) = (as_int(lhs), as_int(rhs)) {
                if let Ok(exp) = u32::try_from(b) {
                    return a
                        .checked_pow(exp)
                        .map(Literal::Int)
                        .ok_or(ExpressionError::Arithmetic("integer overflow"));
                }
            }
            let (a, b) = numeric(op, lhs, rhs)?;
            Ok(Literal::Float(a.powf(b)))
        }
        // The evaluator short-circuits these; this is the eager form.
        B::And => Ok(if lhs.is_truthy() { rhs.clone() } else { lhs.clone() }),
        B::Or => Ok(if lhs.is_truthy() { lhs.clone() } else { rhs.clone() }),
    }
}

fn int_or_float(
    op: BinaryOperator,
    lhs: &Literal,
    rhs: &Literal,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> ExpressionResult<Literal> {
    if let (Some(a), Some(b)) = (as_int(lhs), as_int(rhs)) {
        return int_op(a, b)
            .map(Literal::Int)
            .ok_or(ExpressionError::Arithmetic("integer overflow"));
    }
    let (a, b) = numeric(op, lhs, rhs)?;
    Ok(Literal::Float(float_op(a, b)))
}

fn apply_function(function: Function, args: &[Literal]) -> ExpressionResult<Literal> {
    let number = |value: &Literal| {
        value
            .as_f64()
            .filter(|_| !matches!(value, Literal::Str(_)))
            .ok_or(ExpressionError::TypeMismatch {
                operator: function.name(),
                left: value.type_name(),
                right: "nothing",
            })
    };

    match function {
        Function::Min | Function::Max => {
            let mut best: Option<(&Literal, f64)> = None;
            for arg in args {
                let v = number(arg)?;
                let better = match best {
                    None => true,
                    Some((_, current)) if function == Function::Min => v < current,
                    Some((_, current)) => v > current,
                };
                if better {
                    best = Some((arg, v));
                }
            }
            best.map(|(arg, _)| arg.clone())
                .ok_or(ExpressionError::Arity {
                    function: function.name(),
                    expected: "at least 1",
                    found: 0,
                })
        }
        Function::Abs => match args.first() {
            Some(Literal::Int(i)) => i
                .checked_abs()
                .map(Literal::Int)
                .ok_or(ExpressionError::Arithmetic("integer overflow")),
            Some(other) => Ok(Literal::Float(number(other)?.abs())),
            None => Err(arity(function, "1", 0)),
        },
        Function::Round => {
            let value = number(args.first().ok_or_else(|| arity(function, "1 or 2", 0))?)?;
            match args.get(1) {
                None => coerce_round(value.round_ties_even()),
                Some(digits) => {
                    let digits = as_int(digits).ok_or(ExpressionError::TypeMismatch {
                        operator: "round",
                        left: digits.type_name(),
                        right: "nothing",
                    })?;
                    let factor = 10f64.powi(i32::try_from(digits).unwrap_or(0));
                    Ok(Literal::Float((value * factor).round_ties_even() / factor))
                }
            }
        }
        Function::Sqrt => {
            let value = number(args.first().ok_or_else(|| arity(function, "1", 0))?)?;
            if value < 0.0 {
                return Err(ExpressionError::Arithmetic("square root of a negative number"));
            }
            Ok(Literal::Float(value.sqrt()))
        }
        Function::Int => args
            .first()
            .and_then(|v| v.coerce(SettingType::Int))
            .ok_or(ExpressionError::Arithmetic("value cannot be converted to int")),
        Function::Float => args
            .first()
            .and_then(|v| v.coerce(SettingType::Float))
            .ok_or(ExpressionError::Arithmetic("value cannot be converted to float")),
    }
}

fn arity(function: Function, expected: &'static str, found: usize) -> ExpressionError {
    ExpressionError::Arity {
        function: function.name(),
        expected,
        found,
    }
}

fn coerce_round(value: f64) -> ExpressionResult<Literal> {
    Literal::Float(value)
        .coerce(SettingType::Int)
        .ok_or(ExpressionError::Arithmetic("value cannot be rounded to an integer"))
}
