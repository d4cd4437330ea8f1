use serde_json::Value;

use crate::{
    CompileResult, ErrorKind,
    compiler::{FromConverter, QueryContext},
    parser::{Token, TokenCursor},
    query::write_filter,
    store::DocumentStore,
};

/// `DELETE FROM "t" [WHERE ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteCommand {
    pub collection: String,
    pub filter: Value,
}

impl DeleteCommand {
    pub fn compile(tokens: &[Token], ctx: &mut QueryContext) -> CompileResult<Self> {
        let mut cursor = TokenCursor::new(tokens);
        if !cursor.eat_keyword("DELETE") {
            return ErrorKind::decode("Expected DELETE").err();
        }
        let from = FromConverter::parse(&mut cursor, ctx)?;
        let filter = write_filter(&mut cursor, ctx)?;
        Ok(Self { collection: from.collection, filter })
    }

    /// Returns the deleted count.
    pub fn execute<S: DocumentStore>(&self, store: &S) -> CompileResult<u64> {
        Ok(store.delete_many(&self.collection, &self.filter)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{compiler::QueryContext, parser::Statement, query::DeleteCommand};

    #[test]
    pub fn test_delete_in_list() {
        let stm = Statement::parse(r#"DELETE FROM "t" WHERE "t"."k" IN (?)"#).expect("Failed to parse");
        let command = DeleteCommand::compile(&stm.tokens, &mut QueryContext::new(vec![json!("key1")]))
            .expect("Failed to compile");
        assert_eq!(command, DeleteCommand { collection: "t".into(), filter: json!({"k": {"$in": ["key1"]}}) });
    }
}
