use serde_json::{Map, Value, json};

use crate::{
    CompileResult, ErrorKind,
    compiler::{ClauseConverter, QueryContext, SqlToken, is_clause_keyword},
    parser::{ArithOp, CmpOp, Token, TokenCursor, split_commas},
};

/// `SET "c" = <value>, ...` of an UPDATE.
///
/// Plain values go to `$set`. `"c" = "c" + n` and `"c" = "c" - n` become
/// `$inc`, `"c" = "c" * n` becomes `$mul`.
#[derive(Debug, Clone, PartialEq)]
pub struct SetConverter {
    pub set: Map<String, Value>,
    pub inc: Map<String, Value>,
    pub mul: Map<String, Value>,
    pub begin: usize,
    pub end: usize,
}

impl SetConverter {
    pub fn parse(cursor: &mut TokenCursor, ctx: &QueryContext) -> CompileResult<Self> {
        let begin = cursor.position();
        if !cursor.eat_keyword("SET") {
            return ErrorKind::decode("UPDATE without SET").err();
        }
        let tokens = cursor.take_until(is_clause_keyword);
        if tokens.is_empty() {
            return ErrorKind::decode("SET without assignments").err();
        }

        let mut clause = Self { set: Map::new(), inc: Map::new(), mul: Map::new(), begin, end: begin };
        for piece in split_commas(tokens) {
            let [Token::Comparison { left, op: CmpOp::Eq, right }] = piece else {
                return ErrorKind::decode("Expected \"column\" = value in SET").err();
            };
            let SqlToken::Identifier(column) = SqlToken::classify(left, ctx)? else {
                return ErrorKind::decode(format!("Expected a column, found {left}")).err();
            };
            let value = SqlToken::classify(right, ctx)?;
            clause.assign(column.path, value)?;
        }
        clause.end = cursor.position();
        Ok(clause)
    }

    fn assign(&mut self, field: String, value: SqlToken) -> CompileResult<()> {
        if let Some(constant) = value.constant() {
            self.set.insert(field, constant.clone());
            return Ok(());
        }

        let unsupported = || ErrorKind::not_supported(format!("SET \"{field}\" to a computed value")).err();
        let SqlToken::Operation { op, left, right } = &value else {
            return unsupported();
        };
        let is_self = |token: &SqlToken| token.field_path() == Some(field.as_str());
        let amount = match (is_self(left), is_self(right), op) {
            (true, false, ArithOp::Add | ArithOp::Sub | ArithOp::Mul) => right.constant(),
            (false, true, ArithOp::Add | ArithOp::Mul) => left.constant(),
            _ => None,
        };
        let Some(amount) = amount.filter(|amount| amount.is_number()) else {
            return unsupported();
        };

        match op {
            ArithOp::Add => self.inc.insert(field, amount.clone()),
            ArithOp::Sub => self.inc.insert(field, negate(amount)),
            _ => self.mul.insert(field, amount.clone()),
        };
        Ok(())
    }

    /// Update document with the non-empty operators.
    pub fn to_update(&self) -> Value {
        let mut update = Map::new();
        for (operator, fields) in [("$set", &self.set), ("$inc", &self.inc), ("$mul", &self.mul)] {
            if !fields.is_empty() {
                update.insert(operator.to_string(), Value::Object(fields.clone()));
            }
        }
        Value::Object(update)
    }
}

fn negate(amount: &Value) -> Value {
    match (amount.as_i64(), amount.as_f64()) {
        (Some(n), _) => json!(-n),
        (None, Some(f)) => json!(-f),
        _ => amount.clone(),
    }
}

impl ClauseConverter for SetConverter {
    fn span(&self) -> (usize, usize) {
        (self.begin, self.end)
    }

    fn to_pipeline_stages(&self) -> CompileResult<Vec<Value>> {
        ErrorKind::decode("SET has no pipeline form").err()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        ErrorKind,
        compiler::{QueryContext, SetConverter},
        parser::{Statement, TokenCursor},
    };

    fn set(sql: &str, params: Vec<serde_json::Value>) -> Result<SetConverter, ErrorKind> {
        let stm = Statement::parse(sql)?;
        let mut ctx = QueryContext::new(params);
        ctx.set_left_table("t", "t");
        let mut cursor = TokenCursor::new(&stm.tokens);
        cursor.seek(2);
        SetConverter::parse(&mut cursor, &ctx)
    }

    #[test]
    pub fn test_set_inc_and_mul() {
        let clause = set(
            r#"UPDATE "t" SET "a" = %s, "n" = "n" + 1, "m" = ("m" - 2), "p" = "p" * 3 WHERE "t"."id" = 1"#,
            vec![json!("x")],
        )
        .expect("Failed to parse SET");
        assert_eq!(clause.to_update(), json!({
            "$set": {"a": "x"},
            "$inc": {"n": 1, "m": -2},
            "$mul": {"p": 3},
        }));
    }

    #[test]
    pub fn test_computed_assignment_not_supported() {
        let err = set(r#"UPDATE "t" SET "a" = "b" + 1"#, vec![]).expect_err("Should fail");
        assert!(matches!(err, ErrorKind::NotSupported(_)));
    }
}
