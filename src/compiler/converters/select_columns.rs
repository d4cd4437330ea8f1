use std::collections::HashSet;

use serde_json::{Map, Value, json};

use crate::{
    CompileResult, ErrorKind,
    compiler::{ClauseConverter, QueryContext, SqlToken},
    parser::{Token, split_commas},
    store::FindArgs,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub token: SqlToken,
    /// Output field name, read back by the realigner.
    pub name: String,
    pub alias: Option<String>,
}

impl SelectItem {
    /// `$project` value for this item before anything was materialised.
    pub fn projection(&self) -> CompileResult<Value> {
        match &self.token {
            SqlToken::Identifier(column) if column.path == self.name => Ok(json!(true)),
            token => projected(token),
        }
    }
}

/// `$project` value computing `token`.
pub fn projected(token: &SqlToken) -> CompileResult<Value> {
    match token {
        // a bare number in $project would read as an inclusion flag
        SqlToken::Const(value) | SqlToken::Placeholder { value, .. } => Ok(json!({"$literal": value})),
        token => token.to_expr(),
    }
}

/// The SELECT list.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumns {
    pub items: Vec<SelectItem>,
    /// Set once grouping or DISTINCT has already produced every item under its name.
    pub materialized: bool,
    pub begin: usize,
    pub end: usize,
}

impl SelectColumns {
    /// Classifies the SELECT list. The FROM/JOIN roster must already be registered.
    pub fn parse(tokens: &[Token], ctx: &mut QueryContext, begin: usize) -> CompileResult<Self> {
        if tokens.is_empty() {
            return ErrorKind::decode("SELECT without columns").err();
        }

        let mut items = vec![];
        let mut taken = HashSet::new();
        for (i, piece) in split_commas(tokens).into_iter().enumerate() {
            let (token, alias) = match piece {
                [Token::Aliased { token, alias }] => (token.as_ref(), Some(alias.clone())),
                [token] => (token, None),
                [] => return ErrorKind::decode("Empty SELECT item").err(),
                [first, ..] => return ErrorKind::decode(format!("Unexpected token after {first}")).err(),
            };
            let token = SqlToken::classify(token, ctx)?;

            let base = match (&alias, token.default_name()) {
                (Some(alias), _) => alias.clone(),
                (None, Some(name)) => name,
                (None, None) if token.constant().is_some() => format!("const_{i}"),
                (None, None) => format!("expr_{i}"),
            };
            let mut name = base.clone();
            let mut k = 1;
            while !taken.insert(name.clone()) {
                name = format!("{base}_{k}");
                k += 1;
            }

            if let Some(alias) = &alias {
                ctx.alias2token.insert(alias.clone(), token.clone());
            }
            items.push(SelectItem { token, name, alias });
        }

        Ok(Self { items, materialized: false, begin, end: begin + tokens.len() })
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|item| item.name.clone()).collect()
    }

    /// Anything but plain columns under their own path needs a pipeline.
    pub fn needs_aggregation(&self) -> bool {
        self.items.iter().any(|item| match &item.token {
            SqlToken::Identifier(column) => column.path != item.name,
            _ => true,
        })
    }

    pub fn has_aggregates(&self) -> bool {
        self.items.iter().any(|item| item.token.contains_aggregate())
    }

    /// `SELECT 1, 'x'`: values repeated once per matching document.
    pub fn constants(&self) -> Option<Vec<Value>> {
        self.items.iter().map(|item| item.token.constant().cloned()).collect()
    }

    /// A lone `COUNT(*)`.
    pub fn is_count_all(&self) -> bool {
        matches!(self.items.as_slice(), [item] if item.token.is_count_all())
    }

    pub fn by_token(&self, token: &SqlToken) -> Option<&SelectItem> {
        self.items.iter().find(|item| &item.token == token)
    }

    pub fn by_name(&self, name: &str) -> Option<&SelectItem> {
        self.items
            .iter()
            .find(|item| item.name == name || item.alias.as_deref() == Some(name))
    }
}

impl ClauseConverter for SelectColumns {
    fn span(&self) -> (usize, usize) {
        (self.begin, self.end)
    }

    fn to_find_fragment(&self, args: &mut FindArgs) -> CompileResult<()> {
        if self.needs_aggregation() {
            return ErrorKind::decode("computed SELECT items need an aggregation pipeline").err();
        }
        args.projection = self.names();
        Ok(())
    }

    fn to_pipeline_stages(&self) -> CompileResult<Vec<Value>> {
        let mut project = Map::new();
        for item in &self.items {
            let value = if self.materialized { json!(true) } else { item.projection()? };
            project.insert(item.name.clone(), value);
        }
        Ok(vec![json!({ "$project": project })])
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        ErrorKind,
        compiler::{ClauseConverter, QueryContext, SelectColumns},
        parser::Statement,
        store::FindArgs,
    };

    fn columns(text: &str, params: Vec<serde_json::Value>) -> Result<(SelectColumns, QueryContext), ErrorKind> {
        let stm = Statement::parse(&format!("SELECT {text}"))?;
        let mut ctx = QueryContext::new(params);
        ctx.set_left_table("t", "t");
        ctx.add_table("u", "users");
        let columns = SelectColumns::parse(&stm.tokens[1..], &mut ctx, 1)?;
        Ok((columns, ctx))
    }

    #[test]
    pub fn test_plain_columns_project_in_find() {
        let (columns, _) = columns(r#""t"."c1", "t"."c2""#, vec![]).expect("Failed to parse columns");
        assert!(!columns.needs_aggregation());

        let mut args = FindArgs::default();
        columns.to_find_fragment(&mut args).expect("Failed to render");
        assert_eq!(args.projection, vec!["c1".to_string(), "c2".to_string()]);
    }

    #[test]
    pub fn test_names_for_computed_items() {
        let (columns, ctx) = columns(
            r#""u"."name", SUM("t"."price") AS total, COUNT(*), "t"."a" + 1, 'x', "t"."a" AS "a""#,
            vec![],
        )
        .expect("Failed to parse columns");

        assert_eq!(columns.names(), vec!["u.name", "total", "count_all", "expr_3", "const_4", "a"]);
        assert!(columns.needs_aggregation());
        assert!(columns.has_aggregates());
        assert!(ctx.alias2token.contains_key("total"));
    }

    #[test]
    pub fn test_duplicate_names_get_suffixes() {
        let (columns, _) = columns(r#""t"."a", "t"."a""#, vec![]).expect("Failed to parse columns");
        assert_eq!(columns.names(), vec!["a", "a_1"]);
    }

    #[test]
    pub fn test_project_stage() {
        let (columns, _) = columns(r#""t"."a", "t"."b" * 2 AS twice, 1"#, vec![]).expect("Failed to parse columns");
        assert_eq!(columns.to_pipeline_stages().expect("Failed to render"), vec![json!({"$project": {
            "a": true,
            "twice": {"$multiply": ["$b", 2]},
            "const_2": {"$literal": 1},
        }})]);
    }

    #[test]
    pub fn test_shortcuts() {
        let (count, _) = columns("COUNT(*)", vec![]).expect("Failed to parse columns");
        assert!(count.is_count_all());

        let (constants, _) = columns("1, %s", vec![json!("a")]).expect("Failed to parse columns");
        assert_eq!(constants.constants(), Some(vec![json!(1), json!("a")]));
    }

    #[test]
    pub fn test_star_is_not_supported() {
        assert!(matches!(columns("*", vec![]), Err(ErrorKind::NotSupported(_))));
    }
}
