use tracing::warn;

use crate::{
    CompileResult, ErrorKind,
    parser::{Literal, StatementKind, Token},
};

/// DDL the compiler accepts: constraint hints without query semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaCommand {
    Hint { table: String, hint: String },
}

impl SchemaCommand {
    /// `ALTER TABLE "t" ... {CONSTRAINT | CHECK | UNIQUE | NOT NULL} ...`
    pub fn compile(kind: StatementKind, tokens: &[Token]) -> CompileResult<Self> {
        let unsupported = || ErrorKind::not_supported(format!("{kind:?} statement")).err();

        if !kind.is_ddl() {
            return unsupported();
        }
        let [Token::Keyword(alter), Token::Keyword(table_kw), table, rest @ ..] = tokens else {
            return unsupported();
        };
        if alter != "ALTER" || table_kw != "TABLE" {
            return unsupported();
        }
        let Token::Name { name: table, .. } = table else {
            return unsupported();
        };

        let hinted = rest.iter().any(|t| t.is_keyword("CONSTRAINT") || t.is_keyword("CHECK") || t.is_keyword("UNIQUE"))
            || rest
                .windows(2)
                .any(|pair| pair[0].is_keyword("NOT") && pair[1] == Token::Literal(Literal::Null));
        if !hinted {
            return unsupported();
        }

        let hint = rest.iter().map(Token::to_string).collect::<Vec<_>>().join(" ");
        Ok(SchemaCommand::Hint { table: table.clone(), hint })
    }

    pub fn execute(&self) -> u64 {
        match self {
            SchemaCommand::Hint { table, hint } => {
                warn!("Ignoring schema hint on '{}': {}", table, hint);
                0
            }
        }
    }
}
