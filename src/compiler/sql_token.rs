use serde_json::{Value, json};

use crate::{
    CompileResult, ErrorKind,
    compiler::{ExpressionCompiler, FUNCTIONS, Predicate, QueryContext},
    parser::{ArithOp, CaseToken, CmpOp, Token},
};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    /// Visible table name.
    pub table: String,
    pub column: String,
    /// Document path: `column` for the FROM table, `table.column` for joined ones.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    /// Canonical lowercase name, as registered.
    pub name: &'static str,
    /// `None` for `COUNT(*)`.
    pub arg: Option<Box<SqlToken>>,
    pub distinct: bool,
    /// DATE_TRUNC unit.
    pub unit: Option<String>,
}

impl FunctionCall {
    pub fn is_count_all(&self) -> bool {
        self.name == "count" && self.arg.is_none()
    }

    pub fn is_aggregate(&self) -> bool {
        FUNCTIONS.get(self.name).is_some_and(|f| f.is_aggregate())
    }

    /// Result name when the call has no alias: `count_all`, `sum_price`, ...
    pub fn default_name(&self) -> String {
        match self.arg.as_deref().and_then(SqlToken::default_name) {
            Some(arg) => format!("{}_{}", self.name, arg.replace('.', "_")),
            None if self.is_count_all() => "count_all".to_string(),
            None => self.name.to_string(),
        }
    }
}

/// Semantic token: a grouped token resolved against the query context.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlToken {
    Identifier(ColumnRef),
    Comparison { lhs: Box<SqlToken>, op: CmpOp, rhs: Box<SqlToken> },
    Function(FunctionCall),
    Operation { op: ArithOp, left: Box<SqlToken>, right: Box<SqlToken> },
    CaseExpr { branches: Vec<(Predicate, SqlToken)>, otherwise: Option<Box<SqlToken>> },
    Placeholder { index: usize, value: Value },
    Const(Value),
    /// Field materialised earlier in the pipeline (SELECT alias, accumulator, group key).
    Alias(String),
}

impl SqlToken {
    pub fn classify(token: &Token, ctx: &QueryContext) -> CompileResult<Self> {
        Self::classify_scoped(token, ctx, false)
    }

    /// `aliases` lets bare names refer to SELECT aliases (ORDER BY, HAVING, GROUP BY).
    pub fn classify_scoped(token: &Token, ctx: &QueryContext, aliases: bool) -> CompileResult<Self> {
        match token {
            Token::Name { name, .. } if name == "*" => ErrorKind::not_supported("SELECT *").err(),
            Token::Name { qualifier: Some(qualifier), name } => {
                let table = ctx.resolve_table(qualifier)?;
                Ok(Self::column(ctx, table, name))
            }
            Token::Name { qualifier: None, name } => {
                if aliases && ctx.alias2token.contains_key(name) {
                    return Ok(SqlToken::Alias(name.clone()));
                }
                let table = ctx.left_table()?.to_string();
                Ok(Self::column(ctx, table, name))
            }
            Token::Wildcard => ErrorKind::not_supported("SELECT *").err(),
            Token::Literal(literal) => Ok(SqlToken::Const(literal.to_value())),
            Token::Placeholder(index) => Ok(SqlToken::Placeholder { index: *index, value: ctx.param(*index)?.clone() }),
            Token::Parenthesis(inner) if token.is_subquery() => {
                ErrorKind::not_supported(format!("scalar subquery {}", Token::Parenthesis(inner.clone()))).err()
            }
            Token::Parenthesis(inner) => Self::classify_slice(inner, ctx, aliases),
            Token::Function { name, args } => {
                let function = FUNCTIONS
                    .get(name)
                    .ok_or_else(|| ErrorKind::not_supported(format!("function {name}")))?;
                Ok(SqlToken::Function(function.classify(args, ctx, aliases)?))
            }
            Token::Comparison { left, op, right } => Ok(SqlToken::Comparison {
                lhs: Box::new(Self::classify_scoped(left, ctx, aliases)?),
                op: *op,
                rhs: Box::new(Self::classify_scoped(right, ctx, aliases)?),
            }),
            Token::Operation { left, op, right } => Ok(SqlToken::Operation {
                op: *op,
                left: Box::new(Self::classify_scoped(left, ctx, aliases)?),
                right: Box::new(Self::classify_scoped(right, ctx, aliases)?),
            }),
            Token::Case(case) => Self::classify_case(case, ctx, aliases),
            _ => ErrorKind::decode(format!("Unrecognised token {token}")).err(),
        }
    }

    /// A token list that must hold exactly one value.
    pub fn classify_slice(tokens: &[Token], ctx: &QueryContext, aliases: bool) -> CompileResult<Self> {
        match tokens {
            [single] => Self::classify_scoped(single, ctx, aliases),
            [] => ErrorKind::decode("Expected an expression").err(),
            [first, ..] => ErrorKind::decode(format!("Unexpected token after {first}")).err(),
        }
    }

    fn column(ctx: &QueryContext, table: String, column: &str) -> Self {
        let path = if ctx.is_left(&table) {
            column.to_string()
        } else {
            format!("{table}.{column}")
        };
        SqlToken::Identifier(ColumnRef { table, column: column.to_string(), path })
    }

    fn classify_case(case: &CaseToken, ctx: &QueryContext, aliases: bool) -> CompileResult<Self> {
        let operand = match &case.operand {
            Some(tokens) => Some(Self::classify_slice(tokens, ctx, aliases)?),
            None => None,
        };

        let mut branches = Vec::with_capacity(case.branches.len());
        for (when, then) in &case.branches {
            let condition = match &operand {
                Some(operand) => Predicate::Compare {
                    lhs: operand.clone(),
                    op: CmpOp::Eq,
                    rhs: Self::classify_slice(when, ctx, aliases)?,
                },
                None => ExpressionCompiler::compile(when, ctx, aliases)?,
            };
            branches.push((condition, Self::classify_slice(then, ctx, aliases)?));
        }

        let otherwise = match &case.otherwise {
            Some(tokens) => Some(Box::new(Self::classify_slice(tokens, ctx, aliases)?)),
            None => None,
        };

        Ok(SqlToken::CaseExpr { branches, otherwise })
    }

    pub fn default_name(&self) -> Option<String> {
        match self {
            SqlToken::Identifier(column) => Some(column.path.clone()),
            SqlToken::Function(call) => Some(call.default_name()),
            SqlToken::Alias(name) => Some(name.clone()),
            _ => None,
        }
    }

    pub fn field_path(&self) -> Option<&str> {
        match self {
            SqlToken::Identifier(column) => Some(&column.path),
            SqlToken::Alias(name) => Some(name),
            _ => None,
        }
    }

    pub fn constant(&self) -> Option<&Value> {
        match self {
            SqlToken::Const(value) | SqlToken::Placeholder { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_count_all(&self) -> bool {
        matches!(self, SqlToken::Function(call) if call.is_count_all())
    }

    pub fn contains_aggregate(&self) -> bool {
        match self {
            SqlToken::Function(call) => call.is_aggregate(),
            SqlToken::Comparison { lhs, rhs, .. } => lhs.contains_aggregate() || rhs.contains_aggregate(),
            SqlToken::Operation { left, right, .. } => left.contains_aggregate() || right.contains_aggregate(),
            SqlToken::CaseExpr { branches, otherwise } => {
                branches.iter().any(|(when, then)| when.contains_aggregate() || then.contains_aggregate())
                    || otherwise.as_ref().is_some_and(|o| o.contains_aggregate())
            }
            _ => false,
        }
    }

    /// Top-down rewrite: `f` returns a replacement for a node, or `None` to
    /// descend into its children.
    pub fn rewrite<F>(self, f: &mut F) -> CompileResult<SqlToken>
    where
        F: FnMut(&SqlToken) -> CompileResult<Option<SqlToken>>,
    {
        if let Some(replacement) = f(&self)? {
            return Ok(replacement);
        }
        Ok(match self {
            SqlToken::Comparison { lhs, op, rhs } => SqlToken::Comparison {
                lhs: Box::new(lhs.rewrite(f)?),
                op,
                rhs: Box::new(rhs.rewrite(f)?),
            },
            SqlToken::Operation { op, left, right } => SqlToken::Operation {
                op,
                left: Box::new(left.rewrite(f)?),
                right: Box::new(right.rewrite(f)?),
            },
            SqlToken::CaseExpr { branches, otherwise } => {
                let mut rewritten = Vec::with_capacity(branches.len());
                for (when, then) in branches {
                    rewritten.push((when.rewrite(f)?, then.rewrite(f)?));
                }
                let otherwise = match otherwise {
                    Some(o) => Some(Box::new(o.rewrite(f)?)),
                    None => None,
                };
                SqlToken::CaseExpr { branches: rewritten, otherwise }
            }
            other => other,
        })
    }

    /// Aggregation-expression form.
    pub fn to_expr(&self) -> CompileResult<Value> {
        match self {
            SqlToken::Identifier(column) => Ok(Value::String(format!("${}", column.path))),
            SqlToken::Alias(name) => Ok(Value::String(format!("${name}"))),
            SqlToken::Const(value) | SqlToken::Placeholder { value, .. } => Ok(literal(value)),
            SqlToken::Comparison { lhs, op, rhs } => Ok(json!({ op.mongo(): [lhs.to_expr()?, rhs.to_expr()?] })),
            SqlToken::Operation { op, left, right } => Ok(json!({ op.mongo(): [left.to_expr()?, right.to_expr()?] })),
            SqlToken::Function(call) => {
                let function = FUNCTIONS
                    .get(call.name)
                    .ok_or_else(|| ErrorKind::not_supported(format!("function {}", call.name)))?;
                function.expression(call)
            }
            SqlToken::CaseExpr { branches, otherwise } => {
                let mut expr = match otherwise {
                    Some(o) => o.to_expr()?,
                    None => Value::Null,
                };
                for (when, then) in branches.iter().rev() {
                    expr = json!({"$cond": {"if": when.to_expr()?, "then": then.to_expr()?, "else": expr}});
                }
                Ok(expr)
            }
        }
    }
}

/// Strings starting with `$` would read as field paths inside expressions.
pub fn literal(value: &Value) -> Value {
    match value {
        Value::String(s) if s.starts_with('$') => json!({"$literal": s}),
        other => other.clone(),
    }
}
