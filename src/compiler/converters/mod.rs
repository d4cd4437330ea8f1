use serde_json::{Map, Value};

use crate::{CompileResult, ErrorKind, parser::Token, store::FindArgs};

pub mod select_columns;
pub use select_columns::*;

pub mod from;
pub use from::*;

pub mod join;
pub use join::*;

pub mod where_clause;
pub use where_clause::*;

pub mod group_by;
pub use group_by::*;

pub mod having;
pub use having::*;

pub mod distinct;
pub use distinct::*;

pub mod order_by;
pub use order_by::*;

pub mod limit_offset;
pub use limit_offset::*;

pub mod set;
pub use set::*;

/// One SQL clause, rendered either as part of a `find()` call or as pipeline stages.
pub trait ClauseConverter {
    /// Token positions `[begin, end)` the clause was read from.
    fn span(&self) -> (usize, usize);

    fn to_find_fragment(&self, _args: &mut FindArgs) -> CompileResult<()> {
        let (begin, end) = self.span();
        ErrorKind::decode(format!("clause at tokens {begin}..{end} needs an aggregation pipeline")).err()
    }

    fn to_pipeline_stages(&self) -> CompileResult<Vec<Value>>;
}

/// Keywords that end the clause before them.
pub fn is_clause_keyword(token: &Token) -> bool {
    matches!(
        token,
        Token::Keyword(k) if matches!(
            k.as_str(),
            "FROM" | "WHERE" | "GROUP BY" | "HAVING" | "ORDER BY" | "LIMIT" | "OFFSET" | "RETURNING"
                | "JOIN" | "INNER JOIN" | "LEFT JOIN" | "LEFT OUTER JOIN" | "RIGHT JOIN"
                | "RIGHT OUTER JOIN" | "FULL JOIN" | "FULL OUTER JOIN" | "CROSS JOIN"
        )
    )
}

/// `"t.c"` -> `{"t": {"c": value}}`
pub fn insert_path(doc: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = doc.entry(head.to_string()).or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Group/accumulator field names cannot contain dots.
pub fn sanitize(name: &str) -> String {
    name.replace('.', "__")
}
