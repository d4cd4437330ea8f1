use serde_json::{Value, json};

use crate::{
    CompileResult, ErrorKind,
    compiler::{QueryContext, SetConverter, WhereConverter, table_reference},
    parser::{Token, TokenCursor},
    store::DocumentStore,
};

/// `UPDATE "t" SET ... [WHERE ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCommand {
    pub collection: String,
    pub filter: Value,
    pub update: Value,
}

impl UpdateCommand {
    pub fn compile(tokens: &[Token], ctx: &mut QueryContext) -> CompileResult<Self> {
        let mut cursor = TokenCursor::new(tokens);
        if !cursor.eat_keyword("UPDATE") {
            return ErrorKind::decode("Expected UPDATE").err();
        }
        let table = cursor.next().ok_or_else(|| ErrorKind::decode("UPDATE without a table"))?;
        let (collection, visible) = table_reference(table)?;
        ctx.set_left_table(visible, collection.clone());

        let set = SetConverter::parse(&mut cursor, ctx)?;
        let filter = write_filter(&mut cursor, ctx)?;

        Ok(Self { collection, filter, update: set.to_update() })
    }

    /// Returns the matched count.
    pub fn execute<S: DocumentStore>(&self, store: &S) -> CompileResult<u64> {
        Ok(store.update_many(&self.collection, &self.filter, &self.update)?)
    }
}

/// Optional WHERE of a write, as a plain filter; the rest of the statement must be empty.
pub fn write_filter(cursor: &mut TokenCursor, ctx: &mut QueryContext) -> CompileResult<Value> {
    let filter = match WhereConverter::parse(cursor, ctx)? {
        Some(clause) if clause.has_nested() => {
            return ErrorKind::not_supported("IN (SELECT ...) in a write").err();
        }
        Some(clause) => clause.predicate.to_query()?,
        None => json!({}),
    };
    if let Some(token) = cursor.peek() {
        return ErrorKind::decode(format!("Unexpected {token} at token {}", cursor.position())).err();
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        ErrorKind,
        compiler::QueryContext,
        parser::Statement,
        query::UpdateCommand,
    };

    fn update(sql: &str, params: Vec<serde_json::Value>) -> Result<UpdateCommand, ErrorKind> {
        let stm = Statement::parse(sql)?;
        UpdateCommand::compile(&stm.tokens, &mut QueryContext::new(params))
    }

    #[test]
    pub fn test_update_with_filter() {
        let command = update(r#"UPDATE "t" SET "a" = %s WHERE "t"."id" = %s"#, vec![json!("x"), json!(3)])
            .expect("Failed to compile");
        assert_eq!(command, UpdateCommand {
            collection: "t".into(),
            filter: json!({"id": {"$eq": 3}}),
            update: json!({"$set": {"a": "x"}}),
        });
    }

    #[test]
    pub fn test_update_without_filter_matches_all() {
        let command = update(r#"UPDATE "t" SET "n" = "n" + 1"#, vec![]).expect("Failed to compile");
        assert_eq!(command.filter, json!({}));
        assert_eq!(command.update, json!({"$inc": {"n": 1}}));
    }

    #[test]
    pub fn test_nested_select_in_write_not_supported() {
        let err = update(
            r#"UPDATE "t" SET "a" = 1 WHERE "t"."id" IN (SELECT "u"."id" FROM "u")"#,
            vec![],
        )
        .expect_err("Should fail");
        assert!(matches!(err, ErrorKind::NotSupported(_)));
    }
}
