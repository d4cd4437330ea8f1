use indexmap::IndexMap;
use serde_json::{Value, json};

use crate::{CompileResult, ErrorKind, compiler::SqlToken};

/// An uncorrelated `IN (SELECT ...)` compiled into a `$lookup` sub-pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedIn {
    /// Field the sub-result list is materialised into.
    pub name: String,
    pub collection: String,
    pub pipeline: Vec<Value>,
    /// Path of the single selected column inside each sub-result document.
    pub field: String,
}

impl NestedIn {
    pub fn to_pipeline_stages(&self) -> Vec<Value> {
        vec![
            json!({"$lookup": {"from": self.collection, "pipeline": self.pipeline, "as": self.name}}),
            json!({"$addFields": {
                self.name.as_str(): {"$map": {
                    "input": format!("${}", self.name),
                    "as": "row",
                    "in": format!("$$row.{}", self.field),
                }}
            }}),
        ]
    }
}

/// Per-statement state shared by the clause converters.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub params: Vec<Value>,
    /// visible name -> backing collection, in declaration order
    pub tables: IndexMap<String, String>,
    /// Visible name of the FROM table.
    pub left_table: Option<String>,
    /// SELECT aliases, usable from ORDER BY / HAVING / GROUP BY.
    pub alias2token: IndexMap<String, SqlToken>,
    pub nested: Vec<NestedIn>,
}

impl QueryContext {
    pub fn new(params: Vec<Value>) -> Self {
        Self { params, ..Self::default() }
    }

    pub fn add_table(&mut self, visible: impl Into<String>, backing: impl Into<String>) {
        self.tables.insert(visible.into(), backing.into());
    }

    pub fn set_left_table(&mut self, visible: impl Into<String>, backing: impl Into<String>) {
        let visible = visible.into();
        self.add_table(visible.clone(), backing);
        self.left_table = Some(visible);
    }

    pub fn left_table(&self) -> CompileResult<&str> {
        self.left_table
            .as_deref()
            .ok_or_else(|| ErrorKind::decode("Column referenced before FROM"))
    }

    pub fn left_collection(&self) -> CompileResult<&str> {
        let visible = self.left_table()?;
        self.tables
            .get(visible)
            .map(String::as_str)
            .ok_or_else(|| ErrorKind::decode(format!("Unknown table {visible}")))
    }

    /// Visible name for a qualifier: a visible alias first, then a backing collection.
    pub fn resolve_table(&self, qualifier: &str) -> CompileResult<String> {
        if self.tables.contains_key(qualifier) {
            return Ok(qualifier.to_string());
        }
        self.tables
            .iter()
            .find(|(_, backing)| backing.as_str() == qualifier)
            .map(|(visible, _)| visible.clone())
            .ok_or_else(|| ErrorKind::decode(format!("Unknown table '{qualifier}'")))
    }

    pub fn is_left(&self, visible: &str) -> bool {
        self.left_table.as_deref() == Some(visible)
    }

    pub fn param(&self, index: usize) -> CompileResult<&Value> {
        self.params.get(index).ok_or_else(|| {
            ErrorKind::decode(format!("Placeholder {index} out of range ({} parameters)", self.params.len()))
        })
    }

    pub fn add_nested(&mut self, collection: String, pipeline: Vec<Value>, field: String) -> String {
        let name = format!("_nested_in_{}", self.nested.len());
        self.nested.push(NestedIn { name: name.clone(), collection, pipeline, field });
        name
    }

    /// Fresh context for a sub-select. Placeholders are global, so the
    /// parameter list is shared.
    pub fn child(&self) -> Self {
        Self::new(self.params.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{ErrorKind, compiler::QueryContext};

    #[test]
    pub fn test_resolve_by_alias_or_collection() {
        let mut ctx = QueryContext::new(vec![]);
        ctx.set_left_table("o", "orders");
        ctx.add_table("customers", "customers");

        assert_eq!(ctx.resolve_table("o").expect("Failed to resolve"), "o");
        assert_eq!(ctx.resolve_table("orders").expect("Failed to resolve"), "o");
        assert_eq!(ctx.left_collection().expect("Failed to resolve"), "orders");
        assert!(matches!(ctx.resolve_table("x"), Err(ErrorKind::Decode(_))));
    }

    #[test]
    pub fn test_param_out_of_range() {
        let ctx = QueryContext::new(vec![json!(1)]);
        assert_eq!(ctx.param(0).expect("Failed to read param"), &json!(1));
        assert!(matches!(ctx.param(1), Err(ErrorKind::Decode(_))));
    }
}
