use std::cmp::Reverse;

use serde_json::Value;

use crate::{
    CompileResult, ErrorKind,
    compiler::{InValues, Predicate, QueryContext, SelectQuery, SqlToken},
    parser::{CmpOp, Literal, Token, split_commas},
};

enum Operand {
    Term(SqlToken),
    Pred { pred: Predicate, paren: bool },
    Values(InValues),
}

enum Operator {
    Is { negated: bool },
    IsBool { value: bool, negated: bool },
    Between { low: SqlToken, high: SqlToken, negated: bool },
    Like { ilike: bool, negated: bool },
    In { negated: bool },
    Not,
    And,
    Or,
}

impl Operator {
    fn precedence(&self) -> u8 {
        match self {
            Operator::Is { .. } | Operator::IsBool { .. } => 8,
            Operator::Between { .. } => 7,
            Operator::Like { .. } => 6,
            Operator::In { negated: false } => 5,
            Operator::In { negated: true } => 4,
            Operator::Not => 3,
            Operator::And => 2,
            Operator::Or => 1,
        }
    }
}

/// Arena cell. Reduced operators and consumed operands become `None`.
enum Cell {
    Operand(Option<Operand>),
    Operator(Option<Operator>),
}

/// Compiles a WHERE/HAVING token sequence into a [`Predicate`].
///
/// One left-to-right scan fills the arena; operators are then reduced by
/// precedence (ties left first), each against its nearest unconsumed
/// operands.
pub struct ExpressionCompiler<'c> {
    ctx: &'c QueryContext,
    aliases: bool,
    cells: Vec<Cell>,
}

impl<'c> ExpressionCompiler<'c> {
    pub fn compile(tokens: &[Token], ctx: &'c QueryContext, aliases: bool) -> CompileResult<Predicate> {
        let mut compiler = Self { ctx, aliases, cells: Vec::with_capacity(tokens.len()) };
        compiler.scan(tokens)?;
        compiler.reduce()
    }

    fn classify(&self, token: &Token) -> CompileResult<SqlToken> {
        SqlToken::classify_scoped(token, self.ctx, self.aliases)
    }

    fn push_operator(&mut self, operator: Operator) {
        self.cells.push(Cell::Operator(Some(operator)));
    }

    fn push_operand(&mut self, operand: Operand) {
        self.cells.push(Cell::Operand(Some(operand)));
    }

    fn scan(&mut self, tokens: &[Token]) -> CompileResult<()> {
        if tokens.is_empty() {
            return ErrorKind::decode("Empty condition").err();
        }

        let mut i = 0;
        while let Some(token) = tokens.get(i) {
            i += 1;
            match token {
                Token::Keyword(keyword) => match keyword.as_str() {
                    "AND" => self.push_operator(Operator::And),
                    "OR" => self.push_operator(Operator::Or),
                    "IN" => self.push_operator(Operator::In { negated: false }),
                    "LIKE" => self.push_operator(Operator::Like { ilike: false, negated: false }),
                    "ILIKE" => self.push_operator(Operator::Like { ilike: true, negated: false }),
                    "BETWEEN" => i = self.between(tokens, i, false)?,
                    "NOT" => match tokens.get(i) {
                        Some(next) if next.is_keyword("IN") => {
                            i += 1;
                            self.push_operator(Operator::In { negated: true });
                        }
                        Some(next) if next.is_keyword("LIKE") || next.is_keyword("ILIKE") => {
                            i += 1;
                            self.push_operator(Operator::Like { ilike: next.is_keyword("ILIKE"), negated: true });
                        }
                        Some(next) if next.is_keyword("BETWEEN") => i = self.between(tokens, i + 1, true)?,
                        _ => self.push_operator(Operator::Not),
                    },
                    "IS" => {
                        let negated = tokens.get(i).is_some_and(|t| t.is_keyword("NOT"));
                        if negated {
                            i += 1;
                        }
                        match tokens.get(i) {
                            Some(Token::Literal(Literal::Null)) => self.push_operator(Operator::Is { negated }),
                            Some(Token::Literal(Literal::Bool(value))) => {
                                self.push_operator(Operator::IsBool { value: *value, negated })
                            }
                            _ => return ErrorKind::decode("IS must be followed by NULL, TRUE or FALSE").err(),
                        }
                        i += 1;
                    }
                    other => return ErrorKind::decode(format!("Unexpected keyword {other} in condition")).err(),
                },
                Token::Parenthesis(inner) => {
                    let after_in = matches!(self.cells.last(), Some(Cell::Operator(Some(Operator::In { .. }))));
                    if after_in {
                        let values = if token.is_subquery() {
                            SelectQuery::compile_nested(inner, self.ctx)?
                        } else {
                            let mut list = vec![];
                            for item in split_commas(inner) {
                                list.push(SqlToken::classify_slice(item, self.ctx, self.aliases)?);
                            }
                            InValues::List(list)
                        };
                        self.push_operand(Operand::Values(values));
                    } else if token.is_subquery() {
                        return ErrorKind::not_supported("sub-select outside of IN").err();
                    } else {
                        let pred = Self::compile(inner, self.ctx, self.aliases)?;
                        self.push_operand(Operand::Pred { pred, paren: true });
                    }
                }
                Token::Punctuation(ch) => return ErrorKind::decode(format!("Unexpected '{ch}' in condition")).err(),
                other => {
                    let term = self.classify(other)?;
                    self.push_operand(Operand::Term(term));
                }
            }
        }
        Ok(())
    }

    /// `BETWEEN low AND high`; `i` points at `low`. Returns the next index.
    fn between(&mut self, tokens: &[Token], i: usize, negated: bool) -> CompileResult<usize> {
        match (tokens.get(i), tokens.get(i + 1), tokens.get(i + 2)) {
            (Some(low), Some(and), Some(high)) if and.is_keyword("AND") => {
                let low = self.classify(low)?;
                let high = self.classify(high)?;
                self.push_operator(Operator::Between { low, high, negated });
                Ok(i + 3)
            }
            _ => ErrorKind::decode("BETWEEN expects `low AND high`").err(),
        }
    }

    fn reduce(mut self) -> CompileResult<Predicate> {
        let mut order: Vec<(usize, u8)> = self
            .cells
            .iter()
            .enumerate()
            .filter_map(|(i, cell)| match cell {
                Cell::Operator(Some(op)) => Some((i, op.precedence())),
                _ => None,
            })
            .collect();
        // stable: equal precedence keeps source order
        order.sort_by_key(|&(_, precedence)| Reverse(precedence));

        for (index, _) in order {
            let operator = match &mut self.cells[index] {
                Cell::Operator(slot) => slot.take(),
                Cell::Operand(_) => None,
            };
            if let Some(operator) = operator {
                self.apply(index, operator)?;
            }
        }

        let mut remaining = self.cells.into_iter().filter_map(|cell| match cell {
            Cell::Operand(operand) => operand,
            Cell::Operator(_) => None,
        });
        match (remaining.next(), remaining.next()) {
            (Some(root), None) => Self::to_predicate(root),
            (None, _) => ErrorKind::decode("Empty condition").err(),
            (Some(_), Some(_)) => ErrorKind::decode("Malformed condition: operands without an operator").err(),
        }
    }

    fn apply(&mut self, index: usize, operator: Operator) -> CompileResult<()> {
        // prefix NOT: result replaces its right operand
        if let Operator::Not = operator {
            let right = self.neighbour(index, false)?;
            let (pred, paren) = match self.take(right)? {
                Operand::Pred { pred, paren } => (pred, paren),
                other => (Self::to_predicate(other)?, false),
            };
            self.put(right, Operand::Pred { pred: pred.negate(paren)?, paren: false });
            return Ok(());
        }

        let left = self.neighbour(index, true)?;
        let pred = match operator {
            Operator::Is { negated } => Predicate::IsNull { operand: self.take_term(left)?, negated },
            Operator::IsBool { value, negated } => Predicate::Compare {
                lhs: self.take_term(left)?,
                op: if negated { CmpOp::NotEq } else { CmpOp::Eq },
                rhs: SqlToken::Const(Value::Bool(value)),
            },
            Operator::Between { low, high, negated } => {
                Predicate::Between { operand: self.take_term(left)?, low, high, negated }
            }
            Operator::Like { ilike, negated } => {
                let right = self.neighbour(index, false)?;
                let pattern = self.take_term(right)?;
                Predicate::Like { operand: self.take_term(left)?, pattern, ilike, negated }
            }
            Operator::In { negated } => {
                let right = self.neighbour(index, false)?;
                let values = match self.take(right)? {
                    Operand::Values(values) => values,
                    Operand::Term(term) => InValues::List(vec![term]),
                    Operand::Pred { .. } => return ErrorKind::decode("IN expects a list").err(),
                };
                Predicate::In { operand: self.take_term(left)?, values, negated }
            }
            Operator::And | Operator::Or | Operator::Not => {
                let right = self.neighbour(index, false)?;
                let rhs = Self::to_predicate(self.take(right)?)?;
                let lhs = Self::to_predicate(self.take(left)?)?;
                Self::join(matches!(operator, Operator::And), lhs, rhs)
            }
        };
        self.put(left, Operand::Pred { pred, paren: false });
        Ok(())
    }

    /// Nearest unconsumed operand to the left (or right) of `index`.
    fn neighbour(&self, index: usize, left: bool) -> CompileResult<usize> {
        let found = if left {
            (0..index).rev().find(|&i| matches!(self.cells[i], Cell::Operand(Some(_))))
        } else {
            (index + 1..self.cells.len()).find(|&i| matches!(self.cells[i], Cell::Operand(Some(_))))
        };
        found.ok_or_else(|| ErrorKind::decode("Operator is missing an operand"))
    }

    fn take(&mut self, index: usize) -> CompileResult<Operand> {
        match &mut self.cells[index] {
            Cell::Operand(slot) => slot.take().ok_or_else(|| ErrorKind::decode("Operand used twice")),
            Cell::Operator(_) => ErrorKind::decode("Expected an operand").err(),
        }
    }

    fn take_term(&mut self, index: usize) -> CompileResult<SqlToken> {
        match self.take(index)? {
            Operand::Term(term) => Ok(term),
            _ => ErrorKind::decode("Expected a value, found a condition").err(),
        }
    }

    fn put(&mut self, index: usize, operand: Operand) {
        self.cells[index] = Cell::Operand(Some(operand));
    }

    fn to_predicate(operand: Operand) -> CompileResult<Predicate> {
        match operand {
            Operand::Pred { pred, .. } => Ok(pred),
            Operand::Term(SqlToken::Comparison { lhs, op, rhs }) => Ok(Predicate::Compare { lhs: *lhs, op, rhs: *rhs }),
            Operand::Term(operand @ (SqlToken::Identifier(_) | SqlToken::Alias(_))) => {
                Ok(Predicate::Truth { operand, negated: false })
            }
            Operand::Term(other) => ErrorKind::decode(format!("Expected a condition, found {other:?}")).err(),
            Operand::Values(_) => ErrorKind::decode("Value list outside of IN").err(),
        }
    }

    fn join(and: bool, lhs: Predicate, rhs: Predicate) -> Predicate {
        let mut children = vec![];
        for pred in [lhs, rhs] {
            match pred {
                Predicate::And(inner) if and => children.extend(inner),
                Predicate::Or(inner) if !and => children.extend(inner),
                other => children.push(other),
            }
        }
        if and { Predicate::And(children) } else { Predicate::Or(children) }
    }
}
