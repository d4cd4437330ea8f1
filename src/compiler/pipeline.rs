use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    CompileResult,
    compiler::{ClauseConverter, RowShape, SelectQuery},
    store::FindArgs,
};

/// The store call a SELECT compiles to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectCommand {
    Find { collection: String, args: FindArgs },
    Aggregate { collection: String, pipeline: Vec<Value> },
}

impl SelectCommand {
    pub fn collection(&self) -> &str {
        match self {
            SelectCommand::Find { collection, .. } | SelectCommand::Aggregate { collection, .. } => collection,
        }
    }
}

impl SelectQuery {
    pub fn needs_aggregation(&self) -> bool {
        !self.joins.is_empty()
            || !self.nested.is_empty()
            || self.group.is_some()
            || self.distinct.is_some()
            || !matches!(self.shape, RowShape::Documents { .. })
            || self.columns.needs_aggregation()
            || self.order_by.as_ref().is_some_and(|order| order.needs_aggregation())
    }

    pub fn to_command(&self) -> CompileResult<SelectCommand> {
        let collection = self.from.collection.clone();
        if self.needs_aggregation() {
            return Ok(SelectCommand::Aggregate { collection, pipeline: self.pipeline()? });
        }
        Ok(SelectCommand::Find { collection, args: self.find_args()? })
    }

    /// Every clause merged into one `find()`.
    pub fn find_args(&self) -> CompileResult<FindArgs> {
        let mut args = FindArgs::default();
        self.columns.to_find_fragment(&mut args)?;
        if let Some(clause) = &self.where_clause {
            clause.to_find_fragment(&mut args)?;
        }
        if let Some(clause) = &self.order_by {
            clause.to_find_fragment(&mut args)?;
        }
        if let Some(clause) = &self.limit {
            clause.to_find_fragment(&mut args)?;
        }
        Ok(args)
    }

    /// Stages in fixed order: joins, sub-select lookups, WHERE, grouping,
    /// HAVING, DISTINCT, sort, skip, limit, final projection.
    pub fn pipeline(&self) -> CompileResult<Vec<Value>> {
        let mut stages = vec![];
        for join in &self.joins {
            stages.extend(join.to_pipeline_stages()?);
        }
        for nested in &self.nested {
            stages.extend(nested.to_pipeline_stages());
        }

        let clauses: [Option<&dyn ClauseConverter>; 6] = [
            self.where_clause.as_ref().map(|c| c as &dyn ClauseConverter),
            self.group.as_ref().map(|c| c as &dyn ClauseConverter),
            self.having.as_ref().map(|c| c as &dyn ClauseConverter),
            self.distinct.as_ref().map(|c| c as &dyn ClauseConverter),
            self.order_by.as_ref().map(|c| c as &dyn ClauseConverter),
            self.limit.as_ref().map(|c| c as &dyn ClauseConverter),
        ];
        for clause in clauses.into_iter().flatten() {
            stages.extend(clause.to_pipeline_stages()?);
        }

        match self.shape {
            RowShape::Documents { .. } => stages.extend(self.columns.to_pipeline_stages()?),
            RowShape::Count | RowShape::Const(_) => stages.push(json!({"$count": "_count"})),
        }
        Ok(stages)
    }
}
