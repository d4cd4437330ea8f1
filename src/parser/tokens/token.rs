use std::fmt;

use serde_json::{Number, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Literal {
    pub fn from_number(text: &str) -> Option<Self> {
        if let Ok(value) = text.parse::<i64>() {
            return Some(Self::Int(value));
        }
        text.parse::<f64>().ok().map(Self::Float)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Number(Number::from(*i)),
            Literal::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            Literal::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(x) => write!(f, "{x}"),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CmpOp {
    pub fn from_operator(op: &str) -> Option<Self> {
        Some(match op {
            "=" => CmpOp::Eq,
            "<>" | "!=" => CmpOp::NotEq,
            "<" => CmpOp::Lt,
            "<=" => CmpOp::LtEq,
            ">" => CmpOp::Gt,
            ">=" => CmpOp::GtEq,
            _ => return None,
        })
    }

    /// Logical complement: `NOT (a < b)` is `a >= b`.
    pub fn negate(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::NotEq,
            CmpOp::NotEq => CmpOp::Eq,
            CmpOp::Lt => CmpOp::GtEq,
            CmpOp::LtEq => CmpOp::Gt,
            CmpOp::Gt => CmpOp::LtEq,
            CmpOp::GtEq => CmpOp::Lt,
        }
    }

    /// Operand swap: `5 < a` is `a > 5`.
    pub fn mirror(self) -> Self {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::LtEq => CmpOp::GtEq,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::GtEq => CmpOp::LtEq,
            other => other,
        }
    }

    pub fn mongo(self) -> &'static str {
        match self {
            CmpOp::Eq => "$eq",
            CmpOp::NotEq => "$ne",
            CmpOp::Lt => "$lt",
            CmpOp::LtEq => "$lte",
            CmpOp::Gt => "$gt",
            CmpOp::GtEq => "$gte",
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CmpOp::Eq => "=",
            CmpOp::NotEq => "<>",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    pub fn from_operator(op: &str) -> Option<Self> {
        Some(match op {
            "+" => ArithOp::Add,
            "-" => ArithOp::Sub,
            "*" => ArithOp::Mul,
            "/" => ArithOp::Div,
            "%" => ArithOp::Mod,
            _ => return None,
        })
    }

    pub fn is_multiplicative(self) -> bool {
        matches!(self, ArithOp::Mul | ArithOp::Div | ArithOp::Mod)
    }

    pub fn mongo(self) -> &'static str {
        match self {
            ArithOp::Add => "$add",
            ArithOp::Sub => "$subtract",
            ArithOp::Mul => "$multiply",
            ArithOp::Div => "$divide",
            ArithOp::Mod => "$mod",
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseToken {
    /// `CASE <operand> WHEN <value>` form.
    pub operand: Option<Vec<Token>>,
    pub branches: Vec<(Vec<Token>, Vec<Token>)>,
    pub otherwise: Option<Vec<Token>>,
}

/// Grouped statement token. Clause converters only see these shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Keyword(String),
    Name { qualifier: Option<String>, name: String },
    Literal(Literal),
    Placeholder(usize),
    Wildcard,
    Punctuation(char),
    Operator(String),
    Parenthesis(Vec<Token>),
    Function { name: String, args: Vec<Vec<Token>> },
    Comparison { left: Box<Token>, op: CmpOp, right: Box<Token> },
    Operation { left: Box<Token>, op: ArithOp, right: Box<Token> },
    Case(CaseToken),
    Aliased { token: Box<Token>, alias: String },
}

impl Token {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Keyword(k) if k == keyword)
    }

    pub fn is_punctuation(&self, ch: char) -> bool {
        matches!(self, Token::Punctuation(c) if *c == ch)
    }

    /// Tokens that can stand on either side of an operator.
    pub fn is_operand(&self) -> bool {
        matches!(
            self,
            Token::Name { .. }
                | Token::Literal(_)
                | Token::Placeholder(_)
                | Token::Parenthesis(_)
                | Token::Function { .. }
                | Token::Operation { .. }
                | Token::Case(_)
        )
    }

    /// Whether a parenthesis wraps a sub-select.
    pub fn is_subquery(&self) -> bool {
        matches!(self, Token::Parenthesis(inner) if inner.first().is_some_and(|t| t.is_keyword("SELECT")))
    }
}

pub fn split_commas(tokens: &[Token]) -> Vec<&[Token]> {
    if tokens.is_empty() {
        return vec![];
    }
    tokens.split(|t| t.is_punctuation(',')).collect()
}

fn write_joined(f: &mut fmt::Formatter<'_>, tokens: &[Token]) -> fmt::Result {
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && !token.is_punctuation(',') {
            f.write_str(" ")?;
        }
        write!(f, "{token}")?;
    }
    Ok(())
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Keyword(k) => f.write_str(k),
            Token::Name { qualifier: Some(q), name } => write!(f, "\"{q}\".\"{name}\""),
            Token::Name { qualifier: None, name } => write!(f, "\"{name}\""),
            Token::Literal(l) => write!(f, "{l}"),
            Token::Placeholder(i) => write!(f, "%({i})s"),
            Token::Wildcard => f.write_str("*"),
            Token::Punctuation(c) => write!(f, "{c}"),
            Token::Operator(op) => f.write_str(op),
            Token::Parenthesis(inner) => {
                f.write_str("(")?;
                write_joined(f, inner)?;
                f.write_str(")")
            }
            Token::Function { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_joined(f, arg)?;
                }
                f.write_str(")")
            }
            Token::Comparison { left, op, right } => write!(f, "{left} {op} {right}"),
            Token::Operation { left, op, right } => write!(f, "{left} {op} {right}"),
            Token::Case(case) => {
                f.write_str("CASE")?;
                if let Some(operand) = &case.operand {
                    f.write_str(" ")?;
                    write_joined(f, operand)?;
                }
                for (when, then) in &case.branches {
                    f.write_str(" WHEN ")?;
                    write_joined(f, when)?;
                    f.write_str(" THEN ")?;
                    write_joined(f, then)?;
                }
                if let Some(otherwise) = &case.otherwise {
                    f.write_str(" ELSE ")?;
                    write_joined(f, otherwise)?;
                }
                f.write_str(" END")
            }
            Token::Aliased { token, alias } => write!(f, "{token} AS \"{alias}\""),
        }
    }
}
