use serde_json::{Value, json};

use crate::{
    CompileResult,
    compiler::{ClauseConverter, ExpressionCompiler, InValues, Predicate, QueryContext, is_clause_keyword},
    parser::TokenCursor,
    store::FindArgs,
};

#[derive(Debug, Clone, PartialEq)]
pub struct WhereConverter {
    pub predicate: Predicate,
    pub begin: usize,
    pub end: usize,
}

impl WhereConverter {
    /// Reads `WHERE <condition>` up to the next clause keyword.
    /// Returns `None` when the cursor is not on a WHERE.
    pub fn parse(cursor: &mut TokenCursor, ctx: &mut QueryContext) -> CompileResult<Option<Self>> {
        let begin = cursor.position();
        if !cursor.eat_keyword("WHERE") {
            return Ok(None);
        }
        let tokens = cursor.take_until(is_clause_keyword);
        let predicate = ExpressionCompiler::compile(tokens, ctx, false)?.register_nested(ctx);
        Ok(Some(Self { predicate, begin, end: cursor.position() }))
    }

    pub fn has_nested(&self) -> bool {
        fn walk(predicate: &Predicate) -> bool {
            match predicate {
                Predicate::And(children) | Predicate::Or(children) => children.iter().any(walk),
                Predicate::In { values, .. } => matches!(values, InValues::Nested(_)),
                _ => false,
            }
        }
        walk(&self.predicate)
    }
}

impl ClauseConverter for WhereConverter {
    fn span(&self) -> (usize, usize) {
        (self.begin, self.end)
    }

    fn to_find_fragment(&self, args: &mut FindArgs) -> CompileResult<()> {
        args.filter = Some(self.predicate.to_query()?);
        Ok(())
    }

    fn to_pipeline_stages(&self) -> CompileResult<Vec<Value>> {
        Ok(vec![json!({"$match": self.predicate.to_query()?})])
    }
}
