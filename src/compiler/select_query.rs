use serde_json::Value;

use crate::{
    CompileResult, ErrorKind,
    compiler::{
        DistinctConverter, FromConverter, GroupPlan, HavingConverter, InValues, JoinConverter, LimitOffsetConverter,
        NestedIn, OrderByConverter, QueryContext, SelectColumns, WhereConverter,
    },
    parser::{Token, TokenCursor},
};

/// How result documents map back to SQL rows.
#[derive(Debug, Clone, PartialEq)]
pub enum RowShape {
    /// Lone `COUNT(*)`: one `(n,)` row read from a `$count` document.
    Count,
    /// Constant SELECT list, repeated once per matching document.
    Const(Vec<Value>),
    Documents {
        /// Field path per SELECT item.
        columns: Vec<String>,
        /// Row produced by an implicit grouping when no document arrives.
        empty_row: Option<Vec<Value>>,
    },
}

/// A compiled SELECT: every clause converter, in textual order.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub from: FromConverter,
    pub joins: Vec<JoinConverter>,
    pub nested: Vec<NestedIn>,
    pub columns: SelectColumns,
    pub where_clause: Option<WhereConverter>,
    pub group: Option<GroupPlan>,
    pub having: Option<HavingConverter>,
    pub distinct: Option<DistinctConverter>,
    pub order_by: Option<OrderByConverter>,
    pub limit: Option<LimitOffsetConverter>,
    pub shape: RowShape,
}

impl SelectQuery {
    pub fn compile(tokens: &[Token], ctx: &mut QueryContext) -> CompileResult<Self> {
        let mut cursor = TokenCursor::new(tokens);
        if !cursor.eat_keyword("SELECT") {
            return ErrorKind::decode("Expected SELECT").err();
        }

        // 1) DISTINCT and the raw SELECT list
        let distinct_at = cursor.position();
        let is_distinct = cursor.eat_keyword("DISTINCT");
        let columns_at = cursor.position();
        let column_tokens = cursor.take_until(|t| t.is_keyword("FROM"));

        // 2) table roster: FROM then every JOIN
        let from = FromConverter::parse(&mut cursor, ctx)?;
        let mut joins = vec![];
        while cursor.peek().is_some_and(JoinConverter::starts) {
            joins.push(JoinConverter::parse(&mut cursor, ctx)?);
        }

        // 3) the SELECT list, now that every qualifier resolves
        let mut columns = SelectColumns::parse(column_tokens, ctx, columns_at)?;
        for join in &mut joins {
            join.set_backfill(&columns);
        }

        // 4) WHERE
        let where_clause = WhereConverter::parse(&mut cursor, ctx)?;

        // 5) GROUP BY, explicit or implied by aggregates / HAVING
        let mut group = GroupPlan::parse(&mut cursor, ctx, &columns)?;
        let has_having = HavingConverter::starts(&cursor);
        let counts_only = group.is_none() && !has_having && !is_distinct && columns.is_count_all();
        let constants = match (&group, has_having, is_distinct) {
            (None, false, false) => columns.constants(),
            _ => None,
        };
        if group.is_none() && !counts_only && (has_having || columns.has_aggregates()) {
            group = Some(GroupPlan::implicit(cursor.position()));
        }
        if let Some(plan) = &mut group {
            plan.add_outputs(&columns)?;
        }

        // 6) HAVING
        let having = match &mut group {
            Some(plan) => HavingConverter::parse(&mut cursor, ctx, plan, &columns)?,
            None => None,
        };
        if group.is_some() {
            columns.materialized = true;
        }

        // 7) DISTINCT
        let distinct = match is_distinct {
            true => Some(DistinctConverter::new(&columns, distinct_at)?),
            false => None,
        };
        if distinct.is_some() {
            columns.materialized = true;
        }

        // 8) ORDER BY, against whatever the previous stages left
        let mut order_by = OrderByConverter::parse(&mut cursor, ctx)?;
        if let Some(order) = &mut order_by {
            match (&distinct, &mut group) {
                (Some(_), _) => order.resolve_distinct(&columns)?,
                (None, Some(plan)) => order.resolve_grouped(plan, &columns)?,
                (None, None) => order.resolve_plain(&columns)?,
            }
        }

        // 9) LIMIT / OFFSET
        let limit = LimitOffsetConverter::parse(&mut cursor, ctx)?;

        if let Some(token) = cursor.peek() {
            return ErrorKind::decode(format!("Unexpected {token} at token {}", cursor.position())).err();
        }

        let shape = if counts_only {
            RowShape::Count
        } else if let Some(values) = constants {
            RowShape::Const(values)
        } else {
            let skipped = limit.as_ref().is_some_and(LimitOffsetConverter::skips_first_row);
            let empty_row = match (&group, &having) {
                (Some(plan), None) if !plan.explicit && !skipped => Some(plan.empty_row(&columns)),
                _ => None,
            };
            RowShape::Documents { columns: columns.names(), empty_row }
        };

        Ok(Self {
            from,
            joins,
            nested: ctx.nested.clone(),
            columns,
            where_clause,
            group,
            having,
            distinct,
            order_by,
            limit,
            shape,
        })
    }

    /// `IN (SELECT ...)`: compiled in its own context into a sub-pipeline
    /// selecting exactly one column.
    pub fn compile_nested(tokens: &[Token], parent: &QueryContext) -> CompileResult<InValues> {
        let mut ctx = parent.child();
        let query = Self::compile(tokens, &mut ctx)?;

        let [item] = query.columns.items.as_slice() else {
            return ErrorKind::decode("IN (SELECT ...) must select exactly one column").err();
        };
        if !matches!(query.shape, RowShape::Documents { .. }) {
            return ErrorKind::not_supported(format!("IN (SELECT {})", item.name)).err();
        }

        Ok(InValues::Subquery {
            collection: query.from.collection.clone(),
            pipeline: query.pipeline()?,
            field: item.name.clone(),
        })
    }

    /// Every collection the query reads.
    pub fn collections(&self) -> Vec<String> {
        let mut collections = vec![self.from.collection.clone()];
        let joined = self.joins.iter().map(|join| &join.collection);
        let nested = self.nested.iter().map(|nested| &nested.collection);
        for collection in joined.chain(nested) {
            if !collections.contains(collection) {
                collections.push(collection.clone());
            }
        }
        collections
    }
}
