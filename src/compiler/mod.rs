pub mod context;
pub use context::*;

pub mod sql_token;
pub use sql_token::*;

pub mod functions;
pub use functions::*;

pub mod predicate;
pub use predicate::*;

pub mod expression;
pub use expression::*;

pub mod converters;
pub use converters::*;

pub mod select_query;
pub use select_query::*;

pub mod pipeline;
pub use pipeline::*;
