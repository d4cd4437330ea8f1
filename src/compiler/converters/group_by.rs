use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::{Map, Value, json};

use crate::{
    CompileResult, ErrorKind,
    compiler::{
        ClauseConverter, FUNCTIONS, FunctionCall, QueryContext, SelectColumns, SqlToken, is_clause_keyword,
        projected, sanitize,
    },
    parser::{TokenCursor, split_commas},
};

#[derive(Debug, Clone, PartialEq)]
pub struct GroupKey {
    /// Field under `_id`.
    pub name: String,
    pub token: SqlToken,
}

/// `GROUP BY` plus everything the grouping has to carry: accumulators for
/// aggregate calls, `$first` for plain columns, and the output shape the
/// later stages read.
///
/// Without a GROUP BY clause, aggregates in the SELECT list or a HAVING
/// still build an implicit plan grouping on `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPlan {
    pub keys: Vec<GroupKey>,
    /// `$group` fields besides `_id`, in insertion order.
    pub fields: IndexMap<String, Value>,
    calls: Vec<(FunctionCall, String)>,
    /// document path -> `$first` field
    carried: IndexMap<String, String>,
    /// Flattened output name -> expression over the `$group` result.
    pub outputs: IndexMap<String, SqlToken>,
    /// Outputs only HAVING/ORDER BY read; never projected.
    pub hidden: Vec<(SqlToken, String)>,
    pub explicit: bool,
    pub begin: usize,
    pub end: usize,
}

impl GroupPlan {
    fn empty(explicit: bool, begin: usize, end: usize) -> Self {
        Self {
            keys: vec![],
            fields: IndexMap::new(),
            calls: vec![],
            carried: IndexMap::new(),
            outputs: IndexMap::new(),
            hidden: vec![],
            explicit,
            begin,
            end,
        }
    }

    pub fn implicit(position: usize) -> Self {
        Self::empty(false, position, position)
    }

    /// `GROUP BY k1, k2`. Keys may name SELECT aliases.
    pub fn parse(cursor: &mut TokenCursor, ctx: &QueryContext, columns: &SelectColumns) -> CompileResult<Option<Self>> {
        let begin = cursor.position();
        if !cursor.eat_keyword("GROUP BY") {
            return Ok(None);
        }
        let tokens = cursor.take_until(is_clause_keyword);
        if tokens.is_empty() {
            return ErrorKind::decode("GROUP BY without keys").err();
        }

        let mut plan = Self::empty(true, begin, cursor.position());
        let mut names = HashSet::new();
        for (i, piece) in split_commas(tokens).into_iter().enumerate() {
            let token = match SqlToken::classify_slice(piece, ctx, true)? {
                SqlToken::Alias(alias) => ctx
                    .alias2token
                    .get(&alias)
                    .cloned()
                    .ok_or_else(|| ErrorKind::decode(format!("Unknown alias '{alias}'")))?,
                token => token,
            };
            if token.contains_aggregate() {
                return ErrorKind::decode("aggregate in GROUP BY").err();
            }

            let base = match columns.by_token(&token) {
                Some(item) => sanitize(&item.name),
                None => format!("key_{i}"),
            };
            let name = unique(&base, |n| names.contains(n));
            names.insert(name.clone());
            plan.keys.push(GroupKey { name, token });
        }
        Ok(Some(plan))
    }

    /// Registers the SELECT list as the plan's outputs.
    pub fn add_outputs(&mut self, columns: &SelectColumns) -> CompileResult<()> {
        for item in &columns.items {
            let lowered = self.lower(item.token.clone())?;
            self.outputs.insert(item.name.clone(), lowered);
        }
        Ok(())
    }

    /// Rewrites `token` to read from the `$group` result.
    pub fn lower(&mut self, token: SqlToken) -> CompileResult<SqlToken> {
        token.rewrite(&mut |node| self.lower_node(node))
    }

    fn lower_node(&mut self, node: &SqlToken) -> CompileResult<Option<SqlToken>> {
        // 1) group keys
        if let Some(key) = self.keys.iter().find(|key| &key.token == node) {
            return Ok(Some(SqlToken::Alias(format!("_id.{}", key.name))));
        }

        match node {
            // 2) aggregate calls become accumulators
            SqlToken::Function(call) if call.is_aggregate() => Ok(Some(SqlToken::Alias(self.accumulate(call)?))),
            // 3) scalar calls keep their shape over lowered arguments
            SqlToken::Function(call) => {
                let mut call = call.clone();
                if let Some(arg) = call.arg.take() {
                    call.arg = Some(Box::new(self.lower(*arg)?));
                }
                Ok(Some(SqlToken::Function(call)))
            }
            // 4) any other column rides along with $first
            SqlToken::Identifier(column) => {
                let field = match self.carried.get(&column.path) {
                    Some(field) => field.clone(),
                    None => {
                        let field = self.group_field(&sanitize(&column.path));
                        self.fields.insert(field.clone(), json!({"$first": format!("${}", column.path)}));
                        self.carried.insert(column.path.clone(), field.clone());
                        field
                    }
                };
                Ok(Some(SqlToken::Alias(field)))
            }
            SqlToken::Alias(name) => ErrorKind::decode(format!("alias '{name}' cannot be read before grouping")).err(),
            _ => Ok(None),
        }
    }

    fn accumulate(&mut self, call: &FunctionCall) -> CompileResult<String> {
        if let Some((_, field)) = self.calls.iter().find(|(known, _)| known == call) {
            return Ok(field.clone());
        }
        let function = FUNCTIONS
            .get(call.name)
            .ok_or_else(|| ErrorKind::not_supported(format!("function {}", call.name)))?;
        let field = self.group_field(&sanitize(&call.default_name()));
        self.fields.insert(field.clone(), function.accumulator(call)?);
        self.calls.push((call.clone(), field.clone()));
        Ok(field)
    }

    fn group_field(&self, base: &str) -> String {
        unique(base, |name| name == "_id" || self.fields.contains_key(name))
    }

    /// Output name holding `token` after the flattening `$project`,
    /// adding a hidden output when the SELECT list does not have it.
    pub fn expose(&mut self, token: &SqlToken, columns: &SelectColumns) -> CompileResult<String> {
        if let SqlToken::Alias(alias) = token {
            return columns
                .by_name(alias)
                .map(|item| item.name.clone())
                .ok_or_else(|| ErrorKind::decode(format!("Unknown alias '{alias}'")));
        }
        if let Some(item) = columns.by_token(token) {
            return Ok(item.name.clone());
        }
        if let Some((_, name)) = self.hidden.iter().find(|(known, _)| known == token) {
            return Ok(name.clone());
        }

        let lowered = self.lower(token.clone())?;
        let base = format!("_{}", sanitize(&token.default_name().unwrap_or_else(|| "expr".to_string())));
        let name = unique(&base, |name| self.outputs.contains_key(name));
        self.outputs.insert(name.clone(), lowered);
        self.hidden.push((token.clone(), name.clone()));
        Ok(name)
    }

    /// HAVING operands: anything the grouping knows becomes a field read.
    pub fn expose_node(&mut self, node: &SqlToken, columns: &SelectColumns) -> CompileResult<Option<SqlToken>> {
        let known = columns.by_token(node).is_some()
            || self.keys.iter().any(|key| &key.token == node)
            || matches!(node, SqlToken::Alias(_) | SqlToken::Identifier(_))
            || matches!(node, SqlToken::Function(call) if call.is_aggregate());
        if !known {
            return Ok(None);
        }
        Ok(Some(SqlToken::Alias(self.expose(node, columns)?)))
    }

    /// Values of an implicit grouping over zero documents.
    pub fn empty_row(&self, columns: &SelectColumns) -> Vec<Value> {
        columns
            .items
            .iter()
            .map(|item| match &item.token {
                SqlToken::Function(call) => FUNCTIONS
                    .get(call.name)
                    .filter(|function| function.is_aggregate())
                    .map(|function| function.empty_value())
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            })
            .collect()
    }
}

fn unique(base: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut name = base.to_string();
    let mut k = 1;
    while taken(&name) {
        name = format!("{base}_{k}");
        k += 1;
    }
    name
}

impl ClauseConverter for GroupPlan {
    fn span(&self) -> (usize, usize) {
        (self.begin, self.end)
    }

    fn to_pipeline_stages(&self) -> CompileResult<Vec<Value>> {
        let mut stages = vec![];

        let id = if self.keys.is_empty() {
            Value::Null
        } else {
            let mut id = Map::new();
            for key in &self.keys {
                id.insert(key.name.clone(), key.token.to_expr()?);
            }
            Value::Object(id)
        };
        let mut group = Map::new();
        group.insert("_id".into(), id);
        for (field, accumulator) in &self.fields {
            group.insert(field.clone(), accumulator.clone());
        }
        stages.push(json!({"$group": group}));

        let mut finalize = Map::new();
        for (call, field) in &self.calls {
            if let Some(function) = FUNCTIONS.get(call.name) {
                if let Some(expr) = function.finalize(call, field) {
                    finalize.insert(field.clone(), expr);
                }
            }
        }
        if !finalize.is_empty() {
            stages.push(json!({"$addFields": finalize}));
        }

        let mut project = Map::new();
        project.insert("_id".into(), json!(0));
        for (name, token) in &self.outputs {
            let value = match token {
                SqlToken::Alias(field) if field == name => json!(1),
                token => projected(token)?,
            };
            project.insert(name.clone(), value);
        }
        stages.push(json!({"$project": project}));

        Ok(stages)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        compiler::{ClauseConverter, GroupPlan, QueryContext, SelectColumns, SqlToken},
        parser::{Statement, TokenCursor},
    };

    fn plan(sql: &str) -> (GroupPlan, SelectColumns) {
        let stm = Statement::parse(sql).expect("Failed to parse");
        let mut ctx = QueryContext::new(vec![]);
        ctx.set_left_table("t", "t");

        let mut cursor = TokenCursor::new(&stm.tokens);
        cursor.skip(1);
        let select = cursor.take_until(|t| t.is_keyword("FROM"));
        let columns = SelectColumns::parse(select, &mut ctx, 1).expect("Failed to parse columns");
        cursor.skip(2);

        let mut plan = GroupPlan::parse(&mut cursor, &ctx, &columns)
            .expect("Failed to parse GROUP BY")
            .unwrap_or_else(|| GroupPlan::implicit(cursor.position()));
        plan.add_outputs(&columns).expect("Failed to add outputs");
        (plan, columns)
    }

    #[test]
    pub fn test_group_by_key_and_aggregate() {
        let (plan, _) = plan(r#"SELECT "t"."k", SUM("t"."v") AS total FROM "t" GROUP BY "t"."k""#);
        assert_eq!(plan.to_pipeline_stages().expect("Failed to render"), vec![
            json!({"$group": {"_id": {"k": "$k"}, "sum_v": {"$sum": "$v"}}}),
            json!({"$project": {"_id": 0, "k": "$_id.k", "total": "$sum_v"}}),
        ]);
    }

    #[test]
    pub fn test_group_by_select_alias() {
        let (plan, _) = plan(r#"SELECT DATE_TRUNC('day', "t"."at") AS day, COUNT(*) FROM "t" GROUP BY day"#);
        assert_eq!(plan.keys[0].name, "day");
        assert_eq!(plan.outputs.get("day"), Some(&SqlToken::Alias("_id.day".into())));
    }

    #[test]
    pub fn test_implicit_group_carries_plain_columns() {
        let (plan, columns) = plan(r#"SELECT "t"."a", COUNT(DISTINCT "t"."b") FROM "t""#);
        assert!(!plan.explicit);
        assert_eq!(plan.to_pipeline_stages().expect("Failed to render"), vec![
            json!({"$group": {"_id": null, "a": {"$first": "$a"}, "count_b": {"$addToSet": "$b"}}}),
            json!({"$addFields": {"count_b": {"$size": {"$setDifference": ["$count_b", [null]]}}}}),
            json!({"$project": {"_id": 0, "a": 1, "count_b": 1}}),
        ]);
        assert_eq!(plan.empty_row(&columns), vec![json!(null), json!(0)]);
    }

    #[test]
    pub fn test_expose_adds_hidden_output() {
        let (mut plan, columns) = plan(r#"SELECT "t"."k" FROM "t" GROUP BY "t"."k""#);
        let stm = Statement::parse(r#"SELECT MAX("t"."v")"#).expect("Failed to parse");
        let mut ctx = QueryContext::new(vec![]);
        ctx.set_left_table("t", "t");
        let token = SqlToken::classify(&stm.tokens[1], &ctx).expect("Failed to classify");

        let name = plan.expose(&token, &columns).expect("Failed to expose");
        assert_eq!(name, "_max_v");
        assert_eq!(plan.expose(&token, &columns).expect("Failed to expose"), "_max_v");
        assert_eq!(plan.fields.get("max_v"), Some(&json!({"$max": "$v"})));
    }
}
