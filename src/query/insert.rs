use serde_json::{Value, json};

use crate::{
    CompileResult, ErrorKind,
    compiler::{QueryContext, SqlToken},
    parser::{Token, TokenCursor, split_commas},
    store::{Document, DocumentStore},
};

/// Collection holding per-collection auto-increment sequences:
/// `{name, auto: {field_names: [...], seq: n}}`.
pub const SCHEMA_COLLECTION: &str = "__schema__";

#[derive(Debug, Clone, PartialEq)]
pub enum InsertValue {
    Value(Value),
    Default,
}

/// `INSERT INTO "t" ("a", "b") VALUES (..) [VALUES (..) | , (..)]...`
#[derive(Debug, Clone, PartialEq)]
pub struct InsertCommand {
    pub collection: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<InsertValue>>,
}

/// Outcome of an executed INSERT.
#[derive(Debug, Clone, PartialEq)]
pub struct Inserted {
    pub count: u64,
    /// Last allocated sequence value, else the last store id.
    pub last_row_id: Option<Value>,
}

impl InsertCommand {
    pub fn compile(tokens: &[Token], ctx: &QueryContext) -> CompileResult<Self> {
        let mut cursor = TokenCursor::new(tokens);
        if !cursor.eat_keyword("INSERT") || !cursor.eat_keyword("INTO") {
            return ErrorKind::decode("Expected INSERT INTO").err();
        }

        let (collection, columns) = match (cursor.next(), cursor.peek()) {
            // `t(a, b)` groups as a call
            (Some(Token::Function { name, args }), _) => {
                let columns: Vec<String> = args.iter().map(|arg| Self::column(arg)).collect::<CompileResult<_>>()?;
                (name.clone(), columns)
            }
            (Some(Token::Name { qualifier: None, name }), Some(Token::Parenthesis(inner))) => {
                cursor.skip(1);
                let columns: Vec<String> =
                    split_commas(inner).into_iter().map(Self::column).collect::<CompileResult<_>>()?;
                (name.clone(), columns)
            }
            (Some(Token::Name { .. }), _) => return ErrorKind::not_supported("INSERT without a column list").err(),
            _ => return ErrorKind::decode("INSERT INTO without a table").err(),
        };

        let mut rows = vec![];
        while cursor.eat_keyword("VALUES") {
            loop {
                let Some(Token::Parenthesis(values)) = cursor.next() else {
                    return ErrorKind::decode("VALUES without a row").err();
                };
                rows.push(Self::row(values, ctx, columns.len())?);
                if !cursor.peek().is_some_and(|t| t.is_punctuation(',')) {
                    break;
                }
                cursor.skip(1);
            }
        }
        if rows.is_empty() {
            return ErrorKind::not_supported("INSERT without VALUES").err();
        }

        match cursor.peek() {
            // the store reports ids itself
            Some(token) if token.is_keyword("RETURNING") => {}
            Some(token) => return ErrorKind::decode(format!("Unexpected {token} in INSERT")).err(),
            None => {}
        }

        Ok(Self { collection, columns, rows })
    }

    fn column(tokens: &[Token]) -> CompileResult<String> {
        match tokens {
            [Token::Name { name, .. }] => Ok(name.clone()),
            _ => ErrorKind::decode("Expected a column name").err(),
        }
    }

    fn row(values: &[Token], ctx: &QueryContext, width: usize) -> CompileResult<Vec<InsertValue>> {
        let mut row = Vec::with_capacity(width);
        for piece in split_commas(values) {
            let value = match piece {
                [token] if token.is_keyword("DEFAULT") => InsertValue::Default,
                [token] => match SqlToken::classify(token, ctx)?.constant() {
                    Some(value) => InsertValue::Value(value.clone()),
                    None => return ErrorKind::not_supported(format!("computed INSERT value {token}")).err(),
                },
                _ => return ErrorKind::decode("Malformed VALUES row").err(),
            };
            row.push(value);
        }
        if row.len() != width {
            return ErrorKind::decode(format!("VALUES row has {} values for {width} columns", row.len())).err();
        }
        Ok(row)
    }

    /// Allocates auto-increment values, then inserts every row unordered.
    pub fn execute<S: DocumentStore>(&self, store: &S) -> CompileResult<Inserted> {
        let n = self.rows.len() as i64;
        let sequence = store.find_one_and_increment(
            SCHEMA_COLLECTION,
            &json!({"name": self.collection, "auto": {"$exists": true}}),
            &json!({"$inc": {"auto.seq": n}}),
        )?;

        let (auto_fields, first) = match &sequence {
            Some(entry) => {
                let fields: Vec<String> = entry["auto"]["field_names"]
                    .as_array()
                    .map(|names| names.iter().filter_map(|n| n.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                let seq = entry["auto"]["seq"]
                    .as_i64()
                    .ok_or_else(|| ErrorKind::decode(format!("no sequence for '{}'", self.collection)))?;
                (fields, seq - n + 1)
            }
            None => (vec![], 0),
        };

        let mut last_seq = None;
        let mut documents = Vec::with_capacity(self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            let seq = first + i as i64;
            let mut document = Document::new();
            for (column, value) in self.columns.iter().zip(row) {
                match value {
                    InsertValue::Value(value) => {
                        document.insert(column.clone(), value.clone());
                    }
                    InsertValue::Default if auto_fields.contains(column) => {
                        document.insert(column.clone(), json!(seq));
                        last_seq = Some(seq);
                    }
                    InsertValue::Default => {}
                }
            }
            for field in &auto_fields {
                if !self.columns.contains(field) {
                    document.insert(field.clone(), json!(seq));
                    last_seq = Some(seq);
                }
            }
            documents.push(document);
        }

        let ids = store.insert_many(&self.collection, documents, false)?;
        Ok(Inserted {
            count: ids.len() as u64,
            last_row_id: last_seq.map(Value::from).or_else(|| ids.last().cloned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        ErrorKind,
        compiler::QueryContext,
        parser::Statement,
        query::{InsertCommand, InsertValue, SCHEMA_COLLECTION},
        store::{MemoryStore, StoreCall},
    };

    fn insert(sql: &str, params: Vec<serde_json::Value>) -> Result<InsertCommand, ErrorKind> {
        let stm = Statement::parse(sql)?;
        InsertCommand::compile(&stm.tokens, &QueryContext::new(params))
    }

    #[test]
    pub fn test_both_multi_row_forms() {
        let repeated = insert(r#"INSERT INTO "t" ("a", "b") VALUES (?, ?) VALUES (?, ?)"#, vec![
            json!(1),
            json!(2),
            json!(3),
            json!(4),
        ])
        .expect("Failed to compile");
        let listed = insert(r#"INSERT INTO "t" ("a", "b") VALUES (1, 2), (3, 4) RETURNING "t"."id""#, vec![])
            .expect("Failed to compile");
        assert_eq!(repeated, listed);
        assert_eq!(repeated.rows[1], vec![InsertValue::Value(json!(3)), InsertValue::Value(json!(4))]);
    }

    #[test]
    pub fn test_column_list_touching_the_table_name() {
        let command = insert(r#"INSERT INTO t(a, b) VALUES (1, 2)"#, vec![]).expect("Failed to compile");
        assert_eq!(command.collection, "t");
        assert_eq!(command.columns, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(command.rows, vec![vec![InsertValue::Value(json!(1)), InsertValue::Value(json!(2))]]);
    }

    #[test]
    pub fn test_row_width_mismatch() {
        let err = insert(r#"INSERT INTO "t" ("a", "b") VALUES (1)"#, vec![]).expect_err("Should fail");
        assert!(matches!(err, ErrorKind::Decode(_)));
    }

    #[test]
    pub fn test_auto_increment_and_default() {
        let store = MemoryStore::new().with_collection(SCHEMA_COLLECTION, vec![json!({
            "name": "t",
            "auto": {"field_names": ["id"], "seq": 10},
        })]);
        let command = insert(r#"INSERT INTO "t" ("id", "a", "b") VALUES (DEFAULT, 1, DEFAULT), (DEFAULT, 2, 'x')"#, vec![])
            .expect("Failed to compile");

        let inserted = command.execute(&store).expect("Failed to insert");
        assert_eq!(inserted.count, 2);
        assert_eq!(inserted.last_row_id, Some(json!(12)));

        let documents = store.documents("t");
        assert_eq!(documents[0].get("id"), Some(&json!(11)));
        assert_eq!(documents[0].get("b"), None);
        assert_eq!(documents[1].get("id"), Some(&json!(12)));
        assert_eq!(documents[1].get("b"), Some(&json!("x")));

        match store.calls().last() {
            Some(StoreCall::InsertMany { ordered, .. }) => assert!(!ordered),
            other => panic!("Expected insert_many, got {other:?}"),
        }
    }

    #[test]
    pub fn test_missing_auto_field_is_filled() {
        let store = MemoryStore::new().with_collection(SCHEMA_COLLECTION, vec![json!({
            "name": "t",
            "auto": {"field_names": ["id"], "seq": 0},
        })]);
        let command = insert(r#"INSERT INTO "t" ("a") VALUES (5)"#, vec![]).expect("Failed to compile");
        let inserted = command.execute(&store).expect("Failed to insert");
        assert_eq!(inserted.last_row_id, Some(json!(1)));
        assert_eq!(store.documents("t")[0].get("id"), Some(&json!(1)));
    }
}
