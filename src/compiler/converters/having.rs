use serde_json::{Value, json};

use crate::{
    CompileResult, ErrorKind,
    compiler::{ClauseConverter, ExpressionCompiler, GroupPlan, Predicate, QueryContext, SelectColumns, is_clause_keyword},
    parser::TokenCursor,
};

/// `HAVING <condition>`, matched against the flattened group outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct HavingConverter {
    pub predicate: Predicate,
    pub begin: usize,
    pub end: usize,
}

impl HavingConverter {
    pub fn parse(
        cursor: &mut TokenCursor,
        ctx: &QueryContext,
        plan: &mut GroupPlan,
        columns: &SelectColumns,
    ) -> CompileResult<Option<Self>> {
        let begin = cursor.position();
        if !cursor.eat_keyword("HAVING") {
            return Ok(None);
        }
        let tokens = cursor.take_until(is_clause_keyword);
        let predicate = ExpressionCompiler::compile(tokens, ctx, true)?
            .rewrite(&mut |node| plan.expose_node(node, columns))?;
        if predicate.contains_aggregate() {
            return ErrorKind::decode("HAVING aggregate could not be resolved").err();
        }
        Ok(Some(Self { predicate, begin, end: cursor.position() }))
    }

    /// `HAVING` without `GROUP BY` still needs a grouping.
    pub fn starts(cursor: &TokenCursor) -> bool {
        cursor.is_keyword("HAVING")
    }
}

impl ClauseConverter for HavingConverter {
    fn span(&self) -> (usize, usize) {
        (self.begin, self.end)
    }

    fn to_pipeline_stages(&self) -> CompileResult<Vec<Value>> {
        Ok(vec![json!({"$match": self.predicate.to_query()?})])
    }
}
