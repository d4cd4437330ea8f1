pub mod query_parser;
pub use query_parser::*;

pub mod parse_error;
pub use parse_error::*;

pub mod word_comparer;
pub use word_comparer::*;

pub mod tokens;
pub use tokens::*;
