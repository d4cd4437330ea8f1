pub mod parser;

pub mod error;
pub use error::*;

pub mod config;
pub use config::*;

pub mod store;

pub mod compiler;

pub mod executor;

pub mod query;
pub use query::{Command, Query};
