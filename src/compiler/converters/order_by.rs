use serde_json::{Map, Value, json};

use crate::{
    CompileResult, ErrorKind,
    compiler::{ClauseConverter, GroupPlan, QueryContext, SelectColumns, SqlToken, is_clause_keyword},
    parser::{Token, TokenCursor, split_commas},
    store::FindArgs,
};

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub token: SqlToken,
    /// 1 ascending, -1 descending
    pub direction: i32,
}

/// `ORDER BY k1 [ASC|DESC], ...`
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByConverter {
    pub keys: Vec<OrderKey>,
    /// Resolved sort fields, filled by one of the `resolve_*` methods.
    pub fields: Vec<(String, i32)>,
    /// Computed sort values materialised right before `$sort`.
    pub computed: Map<String, Value>,
    pub begin: usize,
    pub end: usize,
}

impl OrderByConverter {
    pub fn parse(cursor: &mut TokenCursor, ctx: &QueryContext) -> CompileResult<Option<Self>> {
        let begin = cursor.position();
        if !cursor.eat_keyword("ORDER BY") {
            return Ok(None);
        }
        let tokens = cursor.take_until(is_clause_keyword);
        if tokens.is_empty() {
            return ErrorKind::decode("ORDER BY without keys").err();
        }

        let mut keys = vec![];
        for piece in split_commas(tokens) {
            let (expr, direction) = Self::direction(piece)?;
            keys.push(OrderKey { token: SqlToken::classify_slice(expr, ctx, true)?, direction });
        }
        Ok(Some(Self { keys, fields: vec![], computed: Map::new(), begin, end: cursor.position() }))
    }

    /// Splits `expr [ASC|DESC] [NULLS FIRST|LAST]`. Nulls sort lowest, so only
    /// the placement matching the direction is accepted.
    fn direction(piece: &[Token]) -> CompileResult<(&[Token], i32)> {
        let mut end = piece.len();
        let mut nulls_first = None;
        if end >= 2 && piece[end - 2].is_keyword("NULLS") {
            nulls_first = Some(piece[end - 1].is_keyword("FIRST"));
            end -= 2;
        }
        let direction = match piece[..end].last() {
            Some(t) if t.is_keyword("DESC") => {
                end -= 1;
                -1
            }
            Some(t) if t.is_keyword("ASC") => {
                end -= 1;
                1
            }
            _ => 1,
        };
        if nulls_first.is_some_and(|first| first != (direction == 1)) {
            return ErrorKind::not_supported("NULLS placement against the sort direction").err();
        }
        Ok((&piece[..end], direction))
    }

    /// Ungrouped, non-DISTINCT query: sort on document paths. Computed keys,
    /// aliased or not, are sorted through private `_sort_{i}` fields.
    pub fn resolve_plain(&mut self, columns: &SelectColumns) -> CompileResult<()> {
        self.fields.clear();
        self.computed.clear();
        for (i, key) in self.keys.iter().enumerate() {
            let item = match &key.token {
                SqlToken::Alias(alias) => Some(
                    columns
                        .by_name(alias)
                        .ok_or_else(|| ErrorKind::decode(format!("Unknown alias '{alias}'")))?,
                ),
                token => columns.by_token(token),
            };
            let token = item.map_or(&key.token, |item| &item.token);

            let field = match token {
                SqlToken::Identifier(column) => column.path.clone(),
                // a SELECT alias may name a stored field the final projection still reads
                token => {
                    let name = format!("_sort_{i}");
                    self.computed.insert(name.clone(), token.to_expr()?);
                    name
                }
            };
            self.fields.push((field, key.direction));
        }
        Ok(())
    }

    /// After DISTINCT only the SELECT items survive.
    pub fn resolve_distinct(&mut self, columns: &SelectColumns) -> CompileResult<()> {
        self.fields.clear();
        for key in &self.keys {
            let item = match &key.token {
                SqlToken::Alias(alias) => columns.by_name(alias),
                token => columns.by_token(token),
            };
            let item = item.ok_or_else(|| {
                ErrorKind::decode(format!("ORDER BY {:?} must appear in the SELECT DISTINCT list", key.token))
            })?;
            self.fields.push((item.name.clone(), key.direction));
        }
        Ok(())
    }

    /// After grouping, sort keys read flattened outputs.
    pub fn resolve_grouped(&mut self, plan: &mut GroupPlan, columns: &SelectColumns) -> CompileResult<()> {
        self.fields.clear();
        for key in &self.keys {
            self.fields.push((plan.expose(&key.token, columns)?, key.direction));
        }
        Ok(())
    }

    pub fn needs_aggregation(&self) -> bool {
        !self.computed.is_empty()
    }
}

impl ClauseConverter for OrderByConverter {
    fn span(&self) -> (usize, usize) {
        (self.begin, self.end)
    }

    fn to_find_fragment(&self, args: &mut FindArgs) -> CompileResult<()> {
        if self.needs_aggregation() {
            return ErrorKind::decode("computed ORDER BY needs an aggregation pipeline").err();
        }
        args.sort = self.fields.clone();
        Ok(())
    }

    fn to_pipeline_stages(&self) -> CompileResult<Vec<Value>> {
        let mut stages = vec![];
        if !self.computed.is_empty() {
            stages.push(json!({"$addFields": self.computed}));
        }
        let mut sort = Map::new();
        for (field, direction) in &self.fields {
            sort.insert(field.clone(), json!(direction));
        }
        stages.push(json!({"$sort": sort}));
        Ok(stages)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        ErrorKind,
        compiler::{ClauseConverter, OrderByConverter, QueryContext, SelectColumns},
        parser::{Statement, TokenCursor},
        store::FindArgs,
    };

    fn order_by(sql: &str) -> Result<(OrderByConverter, SelectColumns), ErrorKind> {
        let stm = Statement::parse(sql)?;
        let mut ctx = QueryContext::new(vec![]);
        ctx.set_left_table("t", "t");

        let mut cursor = TokenCursor::new(&stm.tokens);
        cursor.skip(1);
        let select = cursor.take_until(|t| t.is_keyword("FROM"));
        let columns = SelectColumns::parse(select, &mut ctx, 1)?;
        cursor.skip(2);
        let order = OrderByConverter::parse(&mut cursor, &ctx)?
            .ok_or_else(|| ErrorKind::decode("ORDER BY not found"))?;
        Ok((order, columns))
    }

    #[test]
    pub fn test_plain_sort_on_columns() {
        let (mut order, columns) =
            order_by(r#"SELECT "t"."a" FROM "t" ORDER BY "t"."a" DESC, "t"."b""#).expect("Failed to parse");
        order.resolve_plain(&columns).expect("Failed to resolve");
        assert!(!order.needs_aggregation());

        let mut args = FindArgs::default();
        order.to_find_fragment(&mut args).expect("Failed to render");
        assert_eq!(args.sort, vec![("a".to_string(), -1), ("b".to_string(), 1)]);
    }

    #[test]
    pub fn test_computed_alias_is_added_before_sort() {
        let (mut order, columns) =
            order_by(r#"SELECT "t"."a" * 2 AS twice FROM "t" ORDER BY twice"#).expect("Failed to parse");
        order.resolve_plain(&columns).expect("Failed to resolve");
        assert!(order.needs_aggregation());
        assert_eq!(order.to_pipeline_stages().expect("Failed to render"), vec![
            json!({"$addFields": {"_sort_0": {"$multiply": ["$a", 2]}}}),
            json!({"$sort": {"_sort_0": 1}}),
        ]);
    }

    #[test]
    pub fn test_alias_shadowing_a_column_sorts_on_private_field() {
        let (mut order, columns) =
            order_by(r#"SELECT "t"."a" * 2 AS a FROM "t" ORDER BY "t"."b", a DESC"#).expect("Failed to parse");
        order.resolve_plain(&columns).expect("Failed to resolve");
        assert_eq!(order.to_pipeline_stages().expect("Failed to render"), vec![
            json!({"$addFields": {"_sort_1": {"$multiply": ["$a", 2]}}}),
            json!({"$sort": {"b": 1, "_sort_1": -1}}),
        ]);
    }

    #[test]
    pub fn test_distinct_requires_selected_key() {
        let (mut order, columns) =
            order_by(r#"SELECT "t"."a" FROM "t" ORDER BY "t"."b""#).expect("Failed to parse");
        assert!(matches!(order.resolve_distinct(&columns), Err(ErrorKind::Decode(_))));
    }

    #[test]
    pub fn test_nulls_placement() {
        assert!(order_by(r#"SELECT "t"."a" FROM "t" ORDER BY "t"."a" DESC NULLS LAST"#).is_ok());
        assert!(matches!(
            order_by(r#"SELECT "t"."a" FROM "t" ORDER BY "t"."a" ASC NULLS LAST"#),
            Err(ErrorKind::NotSupported(_))
        ));
    }
}
