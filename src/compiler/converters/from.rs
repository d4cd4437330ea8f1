use serde_json::Value;

use crate::{
    CompileResult, ErrorKind,
    compiler::{ClauseConverter, QueryContext},
    parser::{Token, TokenCursor},
    store::FindArgs,
};

/// `FROM "table" ["alias"]`
#[derive(Debug, Clone, PartialEq)]
pub struct FromConverter {
    pub collection: String,
    pub visible: String,
    pub begin: usize,
    pub end: usize,
}

impl FromConverter {
    pub fn parse(cursor: &mut TokenCursor, ctx: &mut QueryContext) -> CompileResult<Self> {
        let begin = cursor.position();
        if !cursor.eat_keyword("FROM") {
            return ErrorKind::decode("SELECT without FROM").err();
        }
        let token = cursor.next().ok_or_else(|| ErrorKind::decode("FROM without a table"))?;
        let (collection, visible) = table_reference(token)?;
        ctx.set_left_table(visible.clone(), collection.clone());

        Ok(Self { collection, visible, begin, end: cursor.position() })
    }
}

/// `(collection, visible name)` of a table reference.
pub fn table_reference(token: &Token) -> CompileResult<(String, String)> {
    match token {
        Token::Name { qualifier: None, name } => Ok((name.clone(), name.clone())),
        Token::Aliased { token, alias } => match token.as_ref() {
            Token::Name { qualifier: None, name } => Ok((name.clone(), alias.clone())),
            inner if inner.is_subquery() => ErrorKind::not_supported("sub-select as a table").err(),
            other => ErrorKind::decode(format!("Expected a table, found {other}")).err(),
        },
        inner if inner.is_subquery() => ErrorKind::not_supported("sub-select as a table").err(),
        other => ErrorKind::decode(format!("Expected a table, found {other}")).err(),
    }
}

impl ClauseConverter for FromConverter {
    fn span(&self) -> (usize, usize) {
        (self.begin, self.end)
    }

    fn to_find_fragment(&self, _args: &mut FindArgs) -> CompileResult<()> {
        Ok(())
    }

    fn to_pipeline_stages(&self) -> CompileResult<Vec<Value>> {
        Ok(vec![])
    }
}
