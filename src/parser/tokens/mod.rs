pub mod token;
pub use token::*;

pub mod grouper;
pub use grouper::*;

pub mod statement;
pub use statement::*;

pub mod cursor;
pub use cursor::*;
