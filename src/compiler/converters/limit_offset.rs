use serde_json::{Value, json};

use crate::{
    CompileResult, ErrorKind,
    compiler::{ClauseConverter, QueryContext},
    parser::{Literal, Token, TokenCursor},
    store::FindArgs,
};

/// `LIMIT n` and `OFFSET n`, in either order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitOffsetConverter {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub begin: usize,
    pub end: usize,
}

impl LimitOffsetConverter {
    pub fn parse(cursor: &mut TokenCursor, ctx: &QueryContext) -> CompileResult<Option<Self>> {
        let begin = cursor.position();
        let mut clause = Self { begin, ..Self::default() };

        loop {
            let target = if cursor.eat_keyword("LIMIT") {
                &mut clause.limit
            } else if cursor.eat_keyword("OFFSET") {
                &mut clause.offset
            } else {
                break;
            };
            if target.is_some() {
                return ErrorKind::decode("LIMIT/OFFSET given twice").err();
            }
            let token = cursor.next().ok_or_else(|| ErrorKind::decode("LIMIT/OFFSET without a value"))?;
            *target = Some(Self::count(token, ctx)?);
        }
        // find() reads 0 as "no limit" and $limit rejects it
        if clause.limit == Some(0) {
            return ErrorKind::not_supported("LIMIT 0").err();
        }

        clause.end = cursor.position();
        Ok((clause.end > begin).then_some(clause))
    }

    fn count(token: &Token, ctx: &QueryContext) -> CompileResult<u64> {
        let value = match token {
            Token::Literal(Literal::Int(n)) => json!(n),
            Token::Placeholder(index) => ctx.param(*index)?.clone(),
            other => return ErrorKind::decode(format!("Expected a row count, found {other}")).err(),
        };
        value
            .as_u64()
            .ok_or_else(|| ErrorKind::decode(format!("Row count must be a non-negative integer, got {value}")))
    }
}

impl LimitOffsetConverter {
    /// True when a lone result row would be skipped.
    pub fn skips_first_row(&self) -> bool {
        self.offset.is_some_and(|offset| offset > 0)
    }
}

impl ClauseConverter for LimitOffsetConverter {
    fn span(&self) -> (usize, usize) {
        (self.begin, self.end)
    }

    fn to_find_fragment(&self, args: &mut FindArgs) -> CompileResult<()> {
        args.limit = self.limit;
        args.skip = self.offset;
        Ok(())
    }

    /// `$skip` before `$limit`.
    fn to_pipeline_stages(&self) -> CompileResult<Vec<Value>> {
        let mut stages = vec![];
        if let Some(offset) = self.offset {
            stages.push(json!({"$skip": offset}));
        }
        if let Some(limit) = self.limit {
            stages.push(json!({"$limit": limit}));
        }
        Ok(stages)
    }
}
