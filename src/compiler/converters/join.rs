use serde_json::{Map, Value, json};

use crate::{
    CompileResult, ErrorKind,
    compiler::{ClauseConverter, QueryContext, SelectColumns, SqlToken, table_reference},
    parser::{CmpOp, Token, TokenCursor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Outer,
}

impl JoinKind {
    pub fn from_keyword(token: &Token) -> Option<CompileResult<Self>> {
        let Token::Keyword(keyword) = token else {
            return None;
        };
        match keyword.as_str() {
            "JOIN" | "INNER JOIN" => Some(Ok(JoinKind::Inner)),
            "LEFT JOIN" | "LEFT OUTER JOIN" => Some(Ok(JoinKind::Outer)),
            "RIGHT JOIN" | "RIGHT OUTER JOIN" | "FULL JOIN" | "FULL OUTER JOIN" | "CROSS JOIN" => {
                Some(ErrorKind::not_supported(keyword.clone()).err())
            }
            _ => None,
        }
    }
}

/// `[INNER | LEFT [OUTER]] JOIN "b" ON ("a"."x" = "b"."y")`
#[derive(Debug, Clone, PartialEq)]
pub struct JoinConverter {
    pub kind: JoinKind,
    /// Visible name of the table the join condition reads from.
    pub left_table: String,
    /// Visible name of the joined table; also the `$lookup` output field.
    pub right_table: String,
    pub collection: String,
    pub local_field: String,
    pub foreign_field: String,
    /// Joined-table columns the SELECT list reads; back-filled with nulls on outer joins.
    pub backfill: Vec<String>,
    pub begin: usize,
    pub end: usize,
}

impl JoinConverter {
    pub fn starts(token: &Token) -> bool {
        JoinKind::from_keyword(token).is_some()
    }

    pub fn parse(cursor: &mut TokenCursor, ctx: &mut QueryContext) -> CompileResult<Self> {
        let begin = cursor.position();
        let kind = cursor
            .next()
            .and_then(JoinKind::from_keyword)
            .ok_or_else(|| ErrorKind::decode("Expected JOIN"))??;

        let table = cursor.next().ok_or_else(|| ErrorKind::decode("JOIN without a table"))?;
        let (collection, right_table) = table_reference(table)?;
        ctx.add_table(right_table.clone(), collection.clone());

        if !cursor.eat_keyword("ON") {
            return ErrorKind::not_supported("JOIN without ON").err();
        }
        let condition = match cursor.next() {
            Some(Token::Parenthesis(inner)) if inner.len() == 1 => &inner[0],
            Some(token) => token,
            None => return ErrorKind::decode("JOIN ... ON without a condition").err(),
        };
        let Token::Comparison { left, op: CmpOp::Eq, right } = condition else {
            return ErrorKind::not_supported(format!("join condition {condition}")).err();
        };

        let lhs = SqlToken::classify(left, ctx)?;
        let rhs = SqlToken::classify(right, ctx)?;
        let (local, foreign) = match (&lhs, &rhs) {
            (SqlToken::Identifier(l), SqlToken::Identifier(r)) if r.table == right_table => (l, r),
            (SqlToken::Identifier(l), SqlToken::Identifier(r)) if l.table == right_table => (r, l),
            _ => {
                return ErrorKind::decode(format!("join condition must compare a column of '{right_table}'")).err();
            }
        };

        Ok(Self {
            kind,
            left_table: local.table.clone(),
            right_table,
            collection,
            local_field: local.path.clone(),
            foreign_field: foreign.column.clone(),
            backfill: vec![],
            begin,
            end: cursor.position(),
        })
    }

    pub fn set_backfill(&mut self, columns: &SelectColumns) {
        let mut found = vec![];
        for item in &columns.items {
            collect_columns(&item.token, &self.right_table, &mut found);
        }
        for column in found {
            if !self.backfill.contains(&column) {
                self.backfill.push(column);
            }
        }
    }
}

fn collect_columns(token: &SqlToken, table: &str, found: &mut Vec<String>) {
    match token {
        SqlToken::Identifier(column) if column.table == table => found.push(column.column.clone()),
        SqlToken::Function(call) => {
            if let Some(arg) = &call.arg {
                collect_columns(arg, table, found);
            }
        }
        SqlToken::Operation { left, right, .. } => {
            collect_columns(left, table, found);
            collect_columns(right, table, found);
        }
        SqlToken::Comparison { lhs, rhs, .. } => {
            collect_columns(lhs, table, found);
            collect_columns(rhs, table, found);
        }
        SqlToken::CaseExpr { branches, otherwise } => {
            for (_, then) in branches {
                collect_columns(then, table, found);
            }
            if let Some(otherwise) = otherwise {
                collect_columns(otherwise, table, found);
            }
        }
        _ => {}
    }
}

impl ClauseConverter for JoinConverter {
    fn span(&self) -> (usize, usize) {
        (self.begin, self.end)
    }

    fn to_pipeline_stages(&self) -> CompileResult<Vec<Value>> {
        let lookup = json!({"$lookup": {
            "from": self.collection,
            "localField": self.local_field,
            "foreignField": self.foreign_field,
            "as": self.right_table,
        }});
        let path = format!("${}", self.right_table);

        Ok(match self.kind {
            JoinKind::Inner => vec![
                json!({"$match": { self.local_field.as_str(): {"$ne": null, "$exists": true} }}),
                lookup,
                json!({"$unwind": path}),
            ],
            JoinKind::Outer => {
                let placeholder: Map<String, Value> =
                    self.backfill.iter().map(|column| (column.clone(), Value::Null)).collect();
                vec![
                    lookup,
                    json!({"$unwind": {"path": path, "preserveNullAndEmptyArrays": true}}),
                    json!({"$addFields": {
                        self.right_table.as_str(): {"$ifNull": [path, placeholder]}
                    }}),
                ]
            }
        })
    }
}
