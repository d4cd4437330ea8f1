use crate::parser::{Grouper, ParseError, QueryParser, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
}

impl StatementKind {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "SELECT" => StatementKind::Select,
            "INSERT" => StatementKind::Insert,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            "CREATE" => StatementKind::Create,
            "ALTER" => StatementKind::Alter,
            "DROP" => StatementKind::Drop,
            _ => return None,
        })
    }

    pub fn is_ddl(self) -> bool {
        matches!(self, StatementKind::Create | StatementKind::Alter | StatementKind::Drop)
    }
}

/// One grouped SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub tokens: Vec<Token>,
    pub sql: String,
    /// Number of placeholder slots the text references.
    pub placeholders: usize,
}

impl Statement {
    pub fn parse(sql: &str) -> Result<Self, ParseError> {
        let mut parser = QueryParser::new(sql);
        let lexemes = parser.tokenize()?;
        let mut tokens = Grouper::group(&lexemes)?;
        while tokens.last().is_some_and(|t| t.is_punctuation(';')) {
            tokens.pop();
        }

        let kind = match tokens.first() {
            Some(Token::Keyword(keyword)) => StatementKind::from_keyword(keyword),
            _ => None,
        };
        let Some(kind) = kind else {
            let head = tokens.first().map(|t| t.to_string()).unwrap_or_default();
            return ParseError::at_text("Unrecognised statement", head).err();
        };

        Ok(Self {
            kind,
            tokens,
            sql: sql.to_string(),
            placeholders: parser.next_placeholder,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::{Statement, StatementKind, Token};

    #[test]
    pub fn test_parse_select_statement() {
        let stm = Statement::parse(r#"SELECT "t"."a" FROM "t" WHERE "t"."a" = %s;"#)
            .expect("Failed to parse statement");
        assert_eq!(stm.kind, StatementKind::Select);
        assert_eq!(stm.placeholders, 1);
        assert!(!stm.tokens.iter().any(|t| matches!(t, Token::Punctuation(';'))));
    }

    #[test]
    pub fn test_unknown_statement() {
        let err = Statement::parse("EXPLAIN SELECT 1").expect_err("Should fail");
        assert_eq!(err.message, "Unrecognised statement");
    }
}
