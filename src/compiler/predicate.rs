use serde_json::{Map, Value, json};

use crate::{
    CompileResult, ErrorKind,
    compiler::{QueryContext, SqlToken, literal},
    parser::CmpOp,
};

/// Right-hand side of an `IN`.
#[derive(Debug, Clone, PartialEq)]
pub enum InValues {
    List(Vec<SqlToken>),
    /// Compiled sub-select awaiting registration in the query context.
    Subquery { collection: String, pipeline: Vec<Value>, field: String },
    /// Registered sub-select, materialised as a list under this field.
    Nested(String),
}

/// Boolean expression tree built by the expression compiler. Immutable once reduced.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Compare { lhs: SqlToken, op: CmpOp, rhs: SqlToken },
    In { operand: SqlToken, values: InValues, negated: bool },
    IsNull { operand: SqlToken, negated: bool },
    Between { operand: SqlToken, low: SqlToken, high: SqlToken, negated: bool },
    Like { operand: SqlToken, pattern: SqlToken, ilike: bool, negated: bool },
    /// Bare boolean operand: `WHERE "t"."active"`.
    Truth { operand: SqlToken, negated: bool },
}

impl Predicate {
    /// Pushes a NOT into the tree. `through_paren` marks a negation applied to
    /// a parenthesised group.
    pub fn negate(self, through_paren: bool) -> CompileResult<Predicate> {
        Ok(match self {
            Predicate::And(children) => Predicate::Or(
                children.into_iter().map(|c| c.negate(through_paren)).collect::<CompileResult<_>>()?,
            ),
            Predicate::Or(children) => Predicate::And(
                children.into_iter().map(|c| c.negate(through_paren)).collect::<CompileResult<_>>()?,
            ),
            Predicate::Compare { lhs, op, rhs } => Predicate::Compare { lhs, op: op.negate(), rhs },
            Predicate::In { operand, values, negated } => Predicate::In { operand, values, negated: !negated },
            Predicate::IsNull { operand, negated } => Predicate::IsNull { operand, negated: !negated },
            Predicate::Between { operand, low, high, negated } => Predicate::Between { operand, low, high, negated: !negated },
            Predicate::Like { .. } if through_paren => {
                return ErrorKind::not_supported("NOT applied to a parenthesised LIKE").err();
            }
            Predicate::Like { operand, pattern, ilike, negated } => Predicate::Like { operand, pattern, ilike, negated: !negated },
            Predicate::Truth { operand, negated } => Predicate::Truth { operand, negated: !negated },
        })
    }

    pub fn contains_aggregate(&self) -> bool {
        match self {
            Predicate::And(children) | Predicate::Or(children) => children.iter().any(Predicate::contains_aggregate),
            Predicate::Compare { lhs, rhs, .. } => lhs.contains_aggregate() || rhs.contains_aggregate(),
            Predicate::In { operand, .. }
            | Predicate::IsNull { operand, .. }
            | Predicate::Between { operand, .. }
            | Predicate::Like { operand, .. }
            | Predicate::Truth { operand, .. } => operand.contains_aggregate(),
        }
    }

    /// Applies [`SqlToken::rewrite`] to every operand.
    pub fn rewrite<F>(self, f: &mut F) -> CompileResult<Predicate>
    where
        F: FnMut(&SqlToken) -> CompileResult<Option<SqlToken>>,
    {
        Ok(match self {
            Predicate::And(children) => Predicate::And(children.into_iter().map(|c| c.rewrite(f)).collect::<CompileResult<_>>()?),
            Predicate::Or(children) => Predicate::Or(children.into_iter().map(|c| c.rewrite(f)).collect::<CompileResult<_>>()?),
            Predicate::Compare { lhs, op, rhs } => Predicate::Compare { lhs: lhs.rewrite(f)?, op, rhs: rhs.rewrite(f)? },
            Predicate::In { operand, values, negated } => Predicate::In { operand: operand.rewrite(f)?, values, negated },
            Predicate::IsNull { operand, negated } => Predicate::IsNull { operand: operand.rewrite(f)?, negated },
            Predicate::Between { operand, low, high, negated } => Predicate::Between {
                operand: operand.rewrite(f)?,
                low: low.rewrite(f)?,
                high: high.rewrite(f)?,
                negated,
            },
            Predicate::Like { operand, pattern, ilike, negated } => Predicate::Like {
                operand: operand.rewrite(f)?,
                pattern: pattern.rewrite(f)?,
                ilike,
                negated,
            },
            Predicate::Truth { operand, negated } => Predicate::Truth { operand: operand.rewrite(f)?, negated },
        })
    }

    /// Moves compiled sub-selects into the context, leaving named references behind.
    pub fn register_nested(self, ctx: &mut QueryContext) -> Predicate {
        match self {
            Predicate::And(children) => Predicate::And(children.into_iter().map(|c| c.register_nested(ctx)).collect()),
            Predicate::Or(children) => Predicate::Or(children.into_iter().map(|c| c.register_nested(ctx)).collect()),
            Predicate::In { operand, values: InValues::Subquery { collection, pipeline, field }, negated } => {
                let name = ctx.add_nested(collection, pipeline, field);
                Predicate::In { operand, values: InValues::Nested(name), negated }
            }
            other => other,
        }
    }

    /// Query (find filter / `$match`) form.
    pub fn to_query(&self) -> CompileResult<Value> {
        match self {
            Predicate::And(children) => Ok(json!({"$and": Self::all_to_query(children)?})),
            Predicate::Or(children) => Ok(json!({"$or": Self::all_to_query(children)?})),
            Predicate::Compare { lhs, op, rhs } => Self::compare_query(lhs, *op, rhs),
            Predicate::In { operand, values, negated } => {
                let field = match operand.field_path() {
                    Some(field) => field,
                    None => return self.expr_query(),
                };
                match values {
                    InValues::List(list) => match Self::constants(list) {
                        Some(values) => {
                            let op = if *negated { "$nin" } else { "$in" };
                            Ok(field_doc(field, json!({ op: values })))
                        }
                        None => self.expr_query(),
                    },
                    _ => self.expr_query(),
                }
            }
            Predicate::IsNull { operand, negated } => match operand.field_path() {
                Some(field) => {
                    let op = if *negated { "$ne" } else { "$eq" };
                    Ok(field_doc(field, json!({ op: null })))
                }
                None => self.expr_query(),
            },
            Predicate::Between { operand, low, high, negated } => {
                match (operand.field_path(), low.constant(), high.constant()) {
                    (Some(field), Some(low), Some(high)) => {
                        let range = json!({"$gte": low, "$lte": high});
                        let condition = if *negated { json!({"$not": range}) } else { range };
                        Ok(field_doc(field, condition))
                    }
                    _ => self.expr_query(),
                }
            }
            Predicate::Like { operand, pattern, ilike, negated } => {
                let field = operand
                    .field_path()
                    .ok_or_else(|| ErrorKind::not_supported("LIKE on a computed expression"))?;
                let regex = like_regex(pattern)?;
                let mut condition = Map::new();
                condition.insert("$regex".into(), Value::String(regex));
                if *ilike {
                    condition.insert("$options".into(), json!("i"));
                }
                let condition = Value::Object(condition);
                Ok(field_doc(field, if *negated { json!({"$not": condition}) } else { condition }))
            }
            Predicate::Truth { operand, negated } => match operand.field_path() {
                Some(field) => {
                    let op = if *negated { "$ne" } else { "$eq" };
                    Ok(field_doc(field, json!({ op: true })))
                }
                None => self.expr_query(),
            },
        }
    }

    fn all_to_query(children: &[Predicate]) -> CompileResult<Vec<Value>> {
        children.iter().map(Predicate::to_query).collect()
    }

    fn expr_query(&self) -> CompileResult<Value> {
        Ok(json!({"$expr": self.to_expr()?}))
    }

    fn constants(list: &[SqlToken]) -> Option<Vec<Value>> {
        let mut values = vec![];
        for token in list {
            match token {
                // a bound list expands in place
                SqlToken::Placeholder { value: Value::Array(items), .. } => values.extend(items.iter().cloned()),
                other => values.push(other.constant()?.clone()),
            }
        }
        Some(values)
    }

    fn compare_query(lhs: &SqlToken, op: CmpOp, rhs: &SqlToken) -> CompileResult<Value> {
        let (field, op, value) = match (lhs.field_path(), rhs.constant(), rhs.field_path(), lhs.constant()) {
            (Some(field), Some(value), _, _) => (field, op, value),
            (_, _, Some(field), Some(value)) => (field, op.mirror(), value),
            _ => {
                return Ok(json!({"$expr": {op.mongo(): [lhs.to_expr()?, rhs.to_expr()?]}}));
            }
        };

        // {sub: v} bound to a document field narrows to `field.sub`
        if let Value::Object(map) = value {
            if map.len() == 1 {
                if let Some((sub, inner)) = map.iter().next() {
                    return Ok(field_doc(&format!("{field}.{sub}"), json!({ op.mongo(): inner })));
                }
            }
        }
        Ok(field_doc(field, json!({ op.mongo(): value })))
    }

    /// Aggregation-expression form, used by `$expr` and CASE conditions.
    pub fn to_expr(&self) -> CompileResult<Value> {
        match self {
            Predicate::And(children) => Ok(json!({"$and": Self::all_to_expr(children)?})),
            Predicate::Or(children) => Ok(json!({"$or": Self::all_to_expr(children)?})),
            Predicate::Compare { lhs, op, rhs } => Ok(json!({ op.mongo(): [lhs.to_expr()?, rhs.to_expr()?] })),
            Predicate::In { operand, values, negated } => {
                let list = match values {
                    InValues::List(list) => match Self::constants(list) {
                        Some(values) => Value::Array(values.iter().map(literal).collect()),
                        None => Value::Array(list.iter().map(SqlToken::to_expr).collect::<CompileResult<_>>()?),
                    },
                    InValues::Nested(name) => Value::String(format!("${name}")),
                    InValues::Subquery { .. } => {
                        return ErrorKind::not_supported("IN (SELECT ...) inside an expression").err();
                    }
                };
                let test = json!({"$in": [operand.to_expr()?, list]});
                Ok(if *negated { json!({"$not": [test]}) } else { test })
            }
            // `$lte: [x, null]` also holds for missing fields
            Predicate::IsNull { operand, negated } => {
                let op = if *negated { "$gt" } else { "$lte" };
                Ok(json!({ op: [operand.to_expr()?, null] }))
            }
            Predicate::Between { operand, low, high, negated } => {
                let operand = operand.to_expr()?;
                let range = json!({"$and": [
                    {"$gte": [operand.clone(), low.to_expr()?]},
                    {"$lte": [operand, high.to_expr()?]},
                ]});
                Ok(if *negated { json!({"$not": [range]}) } else { range })
            }
            Predicate::Like { operand, pattern, ilike, negated } => {
                let mut args = Map::new();
                args.insert("input".into(), operand.to_expr()?);
                args.insert("regex".into(), Value::String(like_regex(pattern)?));
                if *ilike {
                    args.insert("options".into(), json!("i"));
                }
                let test = json!({"$regexMatch": args});
                Ok(if *negated { json!({"$not": [test]}) } else { test })
            }
            Predicate::Truth { operand, negated } => {
                let op = if *negated { "$ne" } else { "$eq" };
                Ok(json!({ op: [operand.to_expr()?, true] }))
            }
        }
    }

    fn all_to_expr(children: &[Predicate]) -> CompileResult<Vec<Value>> {
        children.iter().map(Predicate::to_expr).collect()
    }
}

fn field_doc(field: &str, condition: Value) -> Value {
    let mut doc = Map::new();
    doc.insert(field.to_string(), condition);
    Value::Object(doc)
}

/// Anchored regex for a LIKE pattern. `%` and `_` are wildcards, a
/// backslash escapes the next character.
pub fn like_regex(pattern: &SqlToken) -> CompileResult<String> {
    let Some(Value::String(pattern)) = pattern.constant() else {
        return ErrorKind::not_supported("LIKE pattern must be a string").err();
    };

    let mut regex = String::from("^");
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    regex.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    Ok(regex)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        ErrorKind,
        compiler::{ColumnRef, Predicate, SqlToken, like_regex},
        parser::CmpOp,
    };

    fn col(name: &str) -> SqlToken {
        SqlToken::Identifier(ColumnRef { table: "t".into(), column: name.into(), path: name.into() })
    }

    fn val(value: serde_json::Value) -> SqlToken {
        SqlToken::Const(value)
    }

    #[test]
    pub fn test_like_regex_escapes() {
        assert_eq!(like_regex(&val(json!("a.b%"))).expect("Failed to build regex"), r"^a\.b.*$");
        assert_eq!(like_regex(&val(json!("_x\\%"))).expect("Failed to build regex"), r"^.x%$");
    }

    #[test]
    pub fn test_value_on_the_left_is_mirrored() {
        let pred = Predicate::Compare { lhs: val(json!(5)), op: CmpOp::Lt, rhs: col("a") };
        assert_eq!(pred.to_query().expect("Failed to render"), json!({"a": {"$gt": 5}}));
    }

    #[test]
    pub fn test_column_vs_column_uses_expr() {
        let pred = Predicate::Compare { lhs: col("a"), op: CmpOp::Eq, rhs: col("b") };
        assert_eq!(pred.to_query().expect("Failed to render"), json!({"$expr": {"$eq": ["$a", "$b"]}}));
    }

    #[test]
    pub fn test_single_key_mapping_extends_path() {
        let pred = Predicate::Compare {
            lhs: col("meta"),
            op: CmpOp::Eq,
            rhs: SqlToken::Placeholder { index: 0, value: json!({"lang": "pt"}) },
        };
        assert_eq!(pred.to_query().expect("Failed to render"), json!({"meta.lang": {"$eq": "pt"}}));
    }

    #[test]
    pub fn test_de_morgan() {
        let pred = Predicate::And(vec![
            Predicate::Compare { lhs: col("a"), op: CmpOp::Eq, rhs: val(json!(1)) },
            Predicate::IsNull { operand: col("b"), negated: false },
        ]);
        let negated = pred.negate(true).expect("Failed to negate");
        assert_eq!(
            negated.to_query().expect("Failed to render"),
            json!({"$or": [{"a": {"$ne": 1}}, {"b": {"$ne": null}}]})
        );
    }

    #[test]
    pub fn test_negated_like_through_paren_is_not_supported() {
        let like = Predicate::Like { operand: col("a"), pattern: val(json!("x%")), ilike: false, negated: false };
        assert!(matches!(like.clone().negate(true), Err(ErrorKind::NotSupported(_))));
        let negated = like.negate(false).expect("Failed to negate");
        assert_eq!(negated.to_query().expect("Failed to render"), json!({"a": {"$not": {"$regex": "^x.*$"}}}));
    }

    #[test]
    pub fn test_between_and_ilike() {
        let between = Predicate::Between { operand: col("n"), low: val(json!(1)), high: val(json!(9)), negated: true };
        assert_eq!(between.to_query().expect("Failed to render"), json!({"n": {"$not": {"$gte": 1, "$lte": 9}}}));

        let ilike = Predicate::Like { operand: col("s"), pattern: val(json!("%ab%")), ilike: true, negated: false };
        assert_eq!(ilike.to_query().expect("Failed to render"), json!({"s": {"$regex": "^.*ab.*$", "$options": "i"}}));
    }
}
