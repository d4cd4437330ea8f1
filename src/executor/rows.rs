use serde_json::Value;
use tracing::{trace, warn};

use crate::{
    CompileResult, ErrorKind, QueryError, QueryResult,
    compiler::RowShape,
    store::DocumentCursor,
};

/// Realigns result documents into SQL rows, one per `next()`.
///
/// Dropping the iterator closes the store cursor.
pub struct Rows<C: DocumentCursor> {
    cursor: Option<C>,
    shape: RowShape,
    enforce_schema: bool,
    /// Rows still owed by a constant SELECT.
    remaining: Option<u64>,
    produced: bool,
    done: bool,
    sql: String,
    params: Vec<Value>,
}

impl<C: DocumentCursor> Rows<C> {
    pub fn new(cursor: C, shape: RowShape, enforce_schema: bool, sql: &str, params: &[Value]) -> Self {
        Self {
            cursor: Some(cursor),
            shape,
            enforce_schema,
            remaining: None,
            produced: false,
            done: false,
            sql: sql.to_string(),
            params: params.to_vec(),
        }
    }

    /// Closes the underlying cursor. Later calls are no-ops.
    pub fn close(&mut self) -> QueryResult<()> {
        self.done = true;
        match self.cursor.take() {
            Some(mut cursor) => cursor.close().map_err(|err| self.error(err.into())),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cursor.is_none()
    }

    fn error(&self, kind: ErrorKind) -> QueryError {
        QueryError::new(kind, &self.sql, &self.params)
    }

    fn fetch(&mut self) -> CompileResult<Option<Value>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        let document = cursor.next().transpose()?;
        if let Some(document) = &document {
            trace!("realigning {}", document);
        }
        Ok(document)
    }

    /// `{"_count": n}` from a `$count` stage; no document means zero.
    fn fetch_count(&mut self) -> CompileResult<u64> {
        Ok(self
            .fetch()?
            .and_then(|document| document.get("_count").and_then(Value::as_u64))
            .unwrap_or(0))
    }

    fn next_row(&mut self) -> CompileResult<Option<Vec<Value>>> {
        match self.shape {
            RowShape::Count => {
                if self.produced {
                    return Ok(None);
                }
                Ok(Some(vec![Value::from(self.fetch_count()?)]))
            }
            RowShape::Const(_) => {
                let remaining = match self.remaining {
                    Some(remaining) => remaining,
                    None => self.fetch_count()?,
                };
                if remaining == 0 {
                    self.remaining = Some(0);
                    return Ok(None);
                }
                self.remaining = Some(remaining - 1);
                match &self.shape {
                    RowShape::Const(values) => Ok(Some(values.clone())),
                    _ => Ok(None),
                }
            }
            RowShape::Documents { .. } => {
                let Some(document) = self.fetch()? else {
                    return Ok(self.empty_row());
                };
                self.realign(&document).map(Some)
            }
        }
    }

    fn empty_row(&self) -> Option<Vec<Value>> {
        match &self.shape {
            RowShape::Documents { empty_row: Some(row), .. } if !self.produced => Some(row.clone()),
            _ => None,
        }
    }

    fn realign(&self, document: &Value) -> CompileResult<Vec<Value>> {
        let RowShape::Documents { columns, .. } = &self.shape else {
            return Ok(vec![]);
        };
        let mut row = Vec::with_capacity(columns.len());
        for column in columns {
            match lookup(document, column) {
                Some(value) => row.push(value.clone()),
                None if self.enforce_schema => {
                    return ErrorKind::migration(format!("column '{column}' is missing from a result document")).err();
                }
                None => row.push(Value::Null),
            }
        }
        Ok(row)
    }

    fn finish(&mut self) {
        if let Err(err) = self.close() {
            warn!("Failed to close cursor: {}", err);
        }
    }
}

/// Dotted path lookup; a literal dotted key wins.
pub fn lookup<'v>(document: &'v Value, path: &str) -> Option<&'v Value> {
    if let Some(value) = document.get(path) {
        return Some(value);
    }
    let mut current = document;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

impl<C: DocumentCursor> Iterator for Rows<C> {
    type Item = QueryResult<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_row() {
            Ok(Some(row)) => {
                self.produced = true;
                Some(Ok(row))
            }
            Ok(None) => {
                self.finish();
                None
            }
            Err(kind) => {
                let err = self.error(kind);
                self.finish();
                Some(Err(err))
            }
        }
    }
}

impl<C: DocumentCursor> Drop for Rows<C> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        ErrorKind,
        compiler::RowShape,
        executor::Rows,
        store::{DocumentStore, FindArgs, MemoryCursor, MemoryStore},
    };

    fn rows(store: &MemoryStore, shape: RowShape, enforce_schema: bool) -> Rows<MemoryCursor> {
        let cursor = store.find("t", &FindArgs::default()).expect("Failed to open cursor");
        Rows::new(cursor, shape, enforce_schema, "SELECT", &[])
    }

    fn documents(columns: &[&str]) -> RowShape {
        RowShape::Documents { columns: columns.iter().map(|c| c.to_string()).collect(), empty_row: None }
    }

    #[test]
    pub fn test_realigns_in_select_order() {
        let store = MemoryStore::new();
        store.push_result(vec![json!({"b": 2, "a": 1, "u": {"name": "x"}}), json!({"a": 3})]);

        let rows: Vec<_> = rows(&store, documents(&["a", "u.name", "b"]), false)
            .collect::<Result<_, _>>()
            .expect("Failed to read rows");
        assert_eq!(rows, vec![vec![json!(1), json!("x"), json!(2)], vec![json!(3), json!(null), json!(null)]]);
        assert_eq!(store.closed_cursors(), 1);
    }

    #[test]
    pub fn test_missing_column_under_enforce_schema() {
        let store = MemoryStore::new();
        store.push_result(vec![json!({"a": 1})]);

        let mut rows = rows(&store, documents(&["a", "b"]), true);
        match rows.next() {
            Some(Err(err)) => assert!(matches!(err.kind, ErrorKind::Migration(_))),
            other => panic!("Expected a migration error, got {other:?}"),
        }
        assert!(rows.next().is_none());
    }

    #[test]
    pub fn test_count_rows() {
        let store = MemoryStore::new();
        store.push_result(vec![json!({"_count": 7})]);
        let counted: Vec<_> = rows(&store, RowShape::Count, false).collect();
        assert_eq!(counted, vec![Ok(vec![json!(7)])]);

        let empty: Vec<_> = rows(&store, RowShape::Count, false).collect();
        assert_eq!(empty, vec![Ok(vec![json!(0)])]);
    }

    #[test]
    pub fn test_const_rows() {
        let store = MemoryStore::new();
        store.push_result(vec![json!({"_count": 2})]);
        let constants: Vec<_> = rows(&store, RowShape::Const(vec![json!(1)]), false).collect();
        assert_eq!(constants, vec![Ok(vec![json!(1)]), Ok(vec![json!(1)])]);

        let none: Vec<_> = rows(&store, RowShape::Const(vec![json!(1)]), false).collect();
        assert!(none.is_empty());
    }

    #[test]
    pub fn test_implicit_group_on_no_documents() {
        let store = MemoryStore::new();
        let shape = RowShape::Documents { columns: vec!["n".into()], empty_row: Some(vec![json!(0)]) };
        let rows: Vec<_> = rows(&store, shape, false).collect();
        assert_eq!(rows, vec![Ok(vec![json!(0)])]);
    }

    #[test]
    pub fn test_drop_closes_cursor_once() {
        let store = MemoryStore::new();
        store.push_result(vec![json!({"a": 1}), json!({"a": 2})]);
        {
            let mut rows = rows(&store, documents(&["a"]), false);
            assert!(rows.next().is_some());
        }
        assert_eq!(store.closed_cursors(), 1);

        store.push_result(vec![json!({"a": 1})]);
        let mut rows = rows(&store, documents(&["a"]), false);
        rows.close().expect("Failed to close");
        rows.close().expect("Failed to close twice");
        assert!(rows.next().is_none());
        drop(rows);
        assert_eq!(store.closed_cursors(), 2);
    }
}
