use serde_json::Value;
use tracing::debug;

use crate::{
    CompileResult, ErrorKind, Properties, QueryError, QueryResult,
    compiler::{QueryContext, SelectCommand, SelectQuery},
    executor::Rows,
    parser::{Statement, StatementKind},
    store::DocumentStore,
};

pub mod insert;
pub use insert::*;

pub mod update;
pub use update::*;

pub mod delete;
pub use delete::*;

pub mod ddl;
pub use ddl::*;

#[cfg(test)]
mod _tests;

/// A compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Select { query: Box<SelectQuery>, command: SelectCommand },
    Insert(InsertCommand),
    Update(UpdateCommand),
    Delete(DeleteCommand),
    Schema(SchemaCommand),
}

impl Command {
    pub fn compile(statement: &Statement, params: &[Value]) -> CompileResult<Self> {
        if params.len() != statement.placeholders {
            return ErrorKind::decode(format!(
                "{} parameters bound for {} placeholders",
                params.len(),
                statement.placeholders
            ))
            .err();
        }
        let mut ctx = QueryContext::new(params.to_vec());
        let tokens = &statement.tokens;
        Ok(match statement.kind {
            StatementKind::Select => {
                let query = SelectQuery::compile(tokens, &mut ctx)?;
                let command = query.to_command()?;
                Command::Select { query: Box::new(query), command }
            }
            StatementKind::Insert => Command::Insert(InsertCommand::compile(tokens, &ctx)?),
            StatementKind::Update => Command::Update(UpdateCommand::compile(tokens, &mut ctx)?),
            StatementKind::Delete => Command::Delete(DeleteCommand::compile(tokens, &mut ctx)?),
            kind => Command::Schema(SchemaCommand::compile(kind, tokens)?),
        })
    }
}

/// One SQL statement bound to a store. Compiles on construction; no I/O
/// happens until [`Query::rows`] or [`Query::execute`].
pub struct Query<'a, S: DocumentStore> {
    store: &'a S,
    properties: &'a mut Properties,
    sql: String,
    params: Vec<Value>,
    command: Command,
    last_row_id: Option<Value>,
}

impl<'a, S: DocumentStore> Query<'a, S> {
    pub fn new(store: &'a S, properties: &'a mut Properties, sql: &str, params: Vec<Value>) -> QueryResult<Self> {
        let statement = Statement::parse(sql).map_err(|err| QueryError::new(err.into(), sql, &params))?;
        Self::from_statement(store, properties, &statement, params)
    }

    pub fn from_statement(
        store: &'a S,
        properties: &'a mut Properties,
        statement: &Statement,
        params: Vec<Value>,
    ) -> QueryResult<Self> {
        let command = Command::compile(statement, &params)
            .map_err(|kind| QueryError::new(kind, &statement.sql, &params))?;
        debug!("Compiled {} into {:?}", statement.sql, command);

        Ok(Self {
            store,
            properties,
            sql: statement.sql.clone(),
            params,
            command,
            last_row_id: None,
        })
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn last_row_id(&self) -> Option<&Value> {
        self.last_row_id.as_ref()
    }

    fn error(&self, kind: ErrorKind) -> QueryError {
        QueryError::new(kind, &self.sql, &self.params)
    }

    /// Runs a SELECT and returns its rows, in SELECT-list order.
    pub fn rows(&mut self) -> QueryResult<Rows<S::Cursor>> {
        let Command::Select { query, command } = &self.command else {
            return Err(self.error(ErrorKind::decode("only a SELECT returns rows")));
        };

        if self.properties.enforce_schema {
            check_collections(self.store, self.properties, &query.collections())
                .map_err(|kind| QueryError::new(kind, &self.sql, &self.params))?;
        }

        let cursor = match command {
            SelectCommand::Find { collection, args } => self.store.find(collection, args),
            SelectCommand::Aggregate { collection, pipeline } => self.store.aggregate(collection, pipeline),
        }
        .map_err(|err| self.error(err.into()))?;

        Ok(Rows::new(cursor, query.shape.clone(), self.properties.enforce_schema, &self.sql, &self.params))
    }

    /// Runs an INSERT, UPDATE, DELETE or schema hint; returns the affected count.
    pub fn execute(&mut self) -> QueryResult<u64> {
        let result = match &self.command {
            Command::Select { .. } => ErrorKind::decode("a SELECT must be read through rows()").err(),
            Command::Insert(insert) => insert.execute(self.store).map(|inserted| {
                self.properties.cached_collections.insert(insert.collection.clone());
                self.last_row_id = inserted.last_row_id;
                inserted.count
            }),
            Command::Update(update) => update.execute(self.store),
            Command::Delete(delete) => delete.execute(self.store),
            Command::Schema(schema) => Ok(schema.execute()),
        };
        result.map_err(|kind| self.error(kind))
    }
}

/// Every collection must be cached; a miss refreshes the cache from the store once.
fn check_collections<S: DocumentStore>(store: &S, properties: &mut Properties, collections: &[String]) -> CompileResult<()> {
    if collections.iter().all(|c| properties.cached_collections.contains(c)) {
        return Ok(());
    }
    properties.cached_collections.extend(store.list_collection_names()?);
    match collections.iter().find(|c| !properties.cached_collections.contains(*c)) {
        Some(missing) => ErrorKind::migration(format!("collection '{missing}' does not exist")).err(),
        None => Ok(()),
    }
}
