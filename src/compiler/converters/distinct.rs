use serde_json::{Map, Value, json};

use crate::{
    CompileResult,
    compiler::{ClauseConverter, SelectColumns, insert_path},
};

/// `SELECT DISTINCT`: groups on the whole projected row, then unwraps `_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct DistinctConverter {
    /// Row shape: output name -> value expression.
    pub shape: Vec<(String, Value)>,
    pub begin: usize,
    pub end: usize,
}

impl DistinctConverter {
    pub fn new(columns: &SelectColumns, begin: usize) -> CompileResult<Self> {
        let mut shape = Vec::with_capacity(columns.items.len());
        for item in &columns.items {
            let value = if columns.materialized {
                Value::String(format!("${}", item.name))
            } else {
                item.token.to_expr()?
            };
            shape.push((item.name.clone(), value));
        }
        Ok(Self { shape, begin, end: begin + 1 })
    }
}

impl ClauseConverter for DistinctConverter {
    fn span(&self) -> (usize, usize) {
        (self.begin, self.end)
    }

    fn to_pipeline_stages(&self) -> CompileResult<Vec<Value>> {
        // dotted names become nested documents so `$replaceRoot` restores the same paths
        let mut id = Map::new();
        for (name, value) in &self.shape {
            insert_path(&mut id, name, value.clone());
        }
        Ok(vec![
            json!({"$group": {"_id": id}}),
            json!({"$replaceRoot": {"newRoot": "$_id"}}),
        ])
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        compiler::{ClauseConverter, DistinctConverter, QueryContext, SelectColumns},
        parser::Statement,
    };

    #[test]
    pub fn test_distinct_groups_on_row_shape() {
        let stm = Statement::parse(r#"SELECT DISTINCT "t"."a", "u"."b" FROM "t""#).expect("Failed to parse");
        let mut ctx = QueryContext::new(vec![]);
        ctx.set_left_table("t", "t");
        ctx.add_table("u", "u");
        let columns = SelectColumns::parse(&stm.tokens[2..5], &mut ctx, 2).expect("Failed to parse columns");

        let distinct = DistinctConverter::new(&columns, 1).expect("Failed to build DISTINCT");
        assert_eq!(distinct.to_pipeline_stages().expect("Failed to render"), vec![
            json!({"$group": {"_id": {"a": "$a", "u": {"b": "$u.b"}}}}),
            json!({"$replaceRoot": {"newRoot": "$_id"}}),
        ]);
    }
}
