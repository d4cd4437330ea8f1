use crate::parser::{ArithOp, CaseToken, CmpOp, Lexeme, LexemeKind, Literal, ParseError, Token};

enum Binary {
    Arith(ArithOp),
    Cmp(CmpOp),
}

impl Binary {
    fn build(self, left: Token, right: Token) -> Token {
        match self {
            Binary::Arith(op) => Token::Operation { left: Box::new(left), op, right: Box::new(right) },
            Binary::Cmp(op) => Token::Comparison { left: Box::new(left), op, right: Box::new(right) },
        }
    }
}

/// Builds the grouped token tree out of a flat lexeme stream.
///
/// Parentheses, function calls and qualified names are assembled while
/// walking the lexemes. Every nesting level is then folded in order:
/// `CASE ... END`, multiplicative arithmetic, additive arithmetic,
/// comparisons, aliases.
pub struct Grouper;

impl Grouper {
    pub fn group(lexemes: &[Lexeme]) -> Result<Vec<Token>, ParseError> {
        let mut position = 0;
        let raw = Self::build_level(lexemes, &mut position, false)?;
        Self::finish_level(raw)
    }

    fn build_level(lexemes: &[Lexeme], position: &mut usize, nested: bool) -> Result<Vec<Token>, ParseError> {
        let mut tokens: Vec<Token> = vec![];

        while let Some(lexeme) = lexemes.get(*position) {
            *position += 1;
            let token = match &lexeme.kind {
                LexemeKind::LParen => {
                    let inner = Self::build_level(lexemes, position, true)?;
                    Token::Parenthesis(Self::finish_level(inner)?)
                }
                LexemeKind::RParen => {
                    if nested {
                        return Ok(tokens);
                    }
                    return Err(Self::error("Unbalanced parenthesis", ")", lexeme));
                }
                LexemeKind::Name(name) => {
                    let opens_call = lexemes
                        .get(*position)
                        .is_some_and(|next| next.kind == LexemeKind::LParen && !next.spaced);
                    if opens_call {
                        *position += 1;
                        let inner = Self::build_level(lexemes, position, true)?;
                        Self::function(name, inner)?
                    } else {
                        Self::name(name, lexemes, position)?
                    }
                }
                LexemeKind::Quoted(name) => Self::name(name, lexemes, position)?,
                LexemeKind::Star => {
                    if tokens.last().is_some_and(Token::is_operand) {
                        Token::Operator("*".into())
                    } else {
                        Token::Wildcard
                    }
                }
                LexemeKind::Keyword(keyword) => Token::Keyword(keyword.clone()),
                LexemeKind::Str(value) => Token::Literal(Literal::String(value.clone())),
                LexemeKind::Number(text) => {
                    let literal = Literal::from_number(text)
                        .ok_or_else(|| Self::error("Invalid number", text, lexeme))?;
                    Token::Literal(literal)
                }
                LexemeKind::Null => Token::Literal(Literal::Null),
                LexemeKind::Bool(value) => Token::Literal(Literal::Bool(*value)),
                LexemeKind::Placeholder(index) => Token::Placeholder(*index),
                LexemeKind::Operator(op) => Token::Operator(op.clone()),
                LexemeKind::Comma => Token::Punctuation(','),
                LexemeKind::Semicolon => Token::Punctuation(';'),
                LexemeKind::Dot => return Err(Self::error("Unexpected '.'", ".", lexeme)),
            };
            tokens.push(token);
        }

        if nested {
            return ParseError::at_text("Unclosed parenthesis", "(").err();
        }
        Ok(tokens)
    }

    fn error(message: &str, text: &str, lexeme: &Lexeme) -> ParseError {
        ParseError::at_text(message, text).with_span(lexeme.start, lexeme.start + text.chars().count())
    }

    fn function(name: &str, inner: Vec<Token>) -> Result<Token, ParseError> {
        let mut args = vec![];
        if !inner.is_empty() {
            let mut current = vec![];
            for token in inner {
                if token.is_punctuation(',') {
                    args.push(Self::finish_level(std::mem::take(&mut current))?);
                } else {
                    current.push(token);
                }
            }
            args.push(Self::finish_level(current)?);
        }

        Ok(Token::Function { name: name.to_string(), args })
    }

    /// `a`, `a.b`, `"a"."b"`, `a.*`
    fn name(first: &str, lexemes: &[Lexeme], position: &mut usize) -> Result<Token, ParseError> {
        let dotted = lexemes.get(*position).is_some_and(|l| l.kind == LexemeKind::Dot);
        if !dotted {
            return Ok(Token::Name { qualifier: None, name: first.to_string() });
        }

        let Some(member) = lexemes.get(*position + 1) else {
            return ParseError::at_text("Expected a column after '.'", first).err();
        };
        let name = match &member.kind {
            LexemeKind::Name(name) | LexemeKind::Quoted(name) => name.clone(),
            LexemeKind::Keyword(keyword) => keyword.to_ascii_lowercase(),
            LexemeKind::Star => "*".to_string(),
            _ => return Err(Self::error("Expected a column after '.'", first, member)),
        };
        *position += 2;

        Ok(Token::Name { qualifier: Some(first.to_string()), name })
    }

    fn finish_level(tokens: Vec<Token>) -> Result<Vec<Token>, ParseError> {
        let tokens = Self::group_case(tokens)?;
        let tokens = Self::fold_binary(tokens, |op| {
            ArithOp::from_operator(op).filter(|a| a.is_multiplicative()).map(Binary::Arith)
        });
        let tokens = Self::fold_binary(tokens, |op| {
            ArithOp::from_operator(op).filter(|a| !a.is_multiplicative()).map(Binary::Arith)
        });
        let tokens = Self::fold_binary(tokens, |op| CmpOp::from_operator(op).map(Binary::Cmp));
        Ok(Self::group_aliases(tokens))
    }

    fn group_case(tokens: Vec<Token>) -> Result<Vec<Token>, ParseError> {
        if !tokens.iter().any(|t| t.is_keyword("CASE")) {
            return Ok(tokens);
        }

        let mut out = vec![];
        let mut iter = tokens.into_iter();
        while let Some(token) = iter.next() {
            if !token.is_keyword("CASE") {
                out.push(token);
                continue;
            }

            let mut depth = 0usize;
            let mut body = vec![];
            let mut closed = false;
            for inner in iter.by_ref() {
                if inner.is_keyword("CASE") {
                    depth += 1;
                } else if inner.is_keyword("END") {
                    if depth == 0 {
                        closed = true;
                        break;
                    }
                    depth -= 1;
                }
                body.push(inner);
            }
            if !closed {
                return ParseError::at_text("CASE without END", "CASE").err();
            }
            out.push(Token::Case(Self::case_body(body)?));
        }
        Ok(out)
    }

    fn case_body(body: Vec<Token>) -> Result<CaseToken, ParseError> {
        let mut segments: Vec<(Option<&'static str>, Vec<Token>)> = vec![(None, vec![])];
        let mut depth = 0usize;
        for token in body {
            let marker = match &token {
                Token::Keyword(k) if depth == 0 && k == "WHEN" => Some("WHEN"),
                Token::Keyword(k) if depth == 0 && k == "THEN" => Some("THEN"),
                Token::Keyword(k) if depth == 0 && k == "ELSE" => Some("ELSE"),
                _ => None,
            };
            if token.is_keyword("CASE") {
                depth += 1;
            } else if token.is_keyword("END") {
                depth = depth.saturating_sub(1);
            }
            if let Some(marker) = marker {
                segments.push((Some(marker), vec![]));
            } else if let Some((_, tokens)) = segments.last_mut() {
                tokens.push(token);
            }
        }

        let mut segments = segments.into_iter();
        let operand = match segments.next() {
            Some((None, tokens)) if tokens.is_empty() => None,
            Some((None, tokens)) => Some(Self::finish_level(tokens)?),
            _ => None,
        };

        let mut branches = vec![];
        let mut otherwise = None;
        while let Some((marker, tokens)) = segments.next() {
            match marker {
                Some("WHEN") => {
                    let then = match segments.next() {
                        Some((Some("THEN"), then)) if !then.is_empty() => then,
                        _ => return ParseError::at_text("WHEN without THEN", "WHEN").err(),
                    };
                    branches.push((Self::finish_level(tokens)?, Self::finish_level(then)?));
                }
                Some("ELSE") if otherwise.is_none() => otherwise = Some(Self::finish_level(tokens)?),
                _ => return ParseError::at_text("Malformed CASE expression", "CASE").err(),
            }
        }

        if branches.is_empty() {
            return ParseError::at_text("CASE without WHEN", "CASE").err();
        }

        Ok(CaseToken { operand, branches, otherwise })
    }

    fn fold_binary(tokens: Vec<Token>, select: impl Fn(&str) -> Option<Binary>) -> Vec<Token> {
        let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
        let mut iter = tokens.into_iter().peekable();

        while let Some(token) = iter.next() {
            let binary = match &token {
                Token::Operator(op) => select(op),
                _ => None,
            };
            if let Some(kind) = binary {
                if out.last().is_some_and(Token::is_operand) && iter.peek().is_some_and(Token::is_operand) {
                    if let (Some(left), Some(right)) = (out.pop(), iter.next()) {
                        out.push(kind.build(left, right));
                        continue;
                    }
                }
            }
            out.push(token);
        }
        out
    }

    fn group_aliases(tokens: Vec<Token>) -> Vec<Token> {
        let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
        let mut iter = tokens.into_iter().peekable();

        while let Some(token) = iter.next() {
            let explicit = token.is_keyword("AS")
                && out.last().is_some_and(Self::aliasable)
                && matches!(iter.peek(), Some(Token::Name { qualifier: None, .. }));
            if explicit {
                if let (Some(target), Some(Token::Name { name, .. })) = (out.pop(), iter.next()) {
                    out.push(Token::Aliased { token: Box::new(target), alias: name });
                }
                continue;
            }

            if let Token::Name { qualifier: None, name } = &token {
                if out.last().is_some_and(Self::aliasable) {
                    if let Some(target) = out.pop() {
                        out.push(Token::Aliased { token: Box::new(target), alias: name.clone() });
                        continue;
                    }
                }
            }
            out.push(token);
        }
        out
    }

    fn aliasable(token: &Token) -> bool {
        matches!(
            token,
            Token::Name { .. } | Token::Function { .. } | Token::Parenthesis(_) | Token::Case(_) | Token::Operation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::{ArithOp, CmpOp, Grouper, Literal, QueryParser, Token};

    fn group(text: &str) -> Vec<Token> {
        let mut parser = QueryParser::new(text);
        let lexemes = parser.tokenize().expect("Failed to tokenize");
        Grouper::group(&lexemes).expect("Failed to group")
    }

    fn name(qualifier: &str, name: &str) -> Token {
        Token::Name { qualifier: Some(qualifier.into()), name: name.into() }
    }

    #[test]
    pub fn test_group_function_and_alias() {
        let tokens = group(r#"COUNT("t"."a") AS "n""#);
        assert_eq!(tokens, vec![Token::Aliased {
            token: Box::new(Token::Function { name: "COUNT".into(), args: vec![vec![name("t", "a")]] }),
            alias: "n".into(),
        }]);
    }

    #[test]
    pub fn test_spaced_paren_is_not_a_call() {
        let tokens = group(r#""t" ("a", "b")"#);
        assert_eq!(tokens.len(), 2);
        assert!(matches!(&tokens[1], Token::Parenthesis(inner) if inner.len() == 3));
    }

    #[test]
    pub fn test_arithmetic_precedence_inside_comparison() {
        let tokens = group(r#""t"."a" + "t"."b" * 2 >= 10"#);
        let expected = Token::Comparison {
            left: Box::new(Token::Operation {
                left: Box::new(name("t", "a")),
                op: ArithOp::Add,
                right: Box::new(Token::Operation {
                    left: Box::new(name("t", "b")),
                    op: ArithOp::Mul,
                    right: Box::new(Token::Literal(Literal::Int(2))),
                }),
            }),
            op: CmpOp::GtEq,
            right: Box::new(Token::Literal(Literal::Int(10))),
        };
        assert_eq!(tokens, vec![expected]);
    }

    #[test]
    pub fn test_star_is_wildcard_in_operand_position() {
        let tokens = group("COUNT(*)");
        match &tokens[0] {
            Token::Function { args, .. } => assert_eq!(args, &vec![vec![Token::Wildcard]]),
            other => panic!("Expected a function, got {other:?}"),
        }
    }

    #[test]
    pub fn test_group_case_expression() {
        let tokens = group(r#"CASE WHEN "t"."a" > 1 THEN 'big' ELSE 'small' END AS "size""#);
        let Token::Aliased { token, alias } = &tokens[0] else {
            panic!("Expected an aliased CASE");
        };
        assert_eq!(alias, "size");
        match token.as_ref() {
            Token::Case(case) => {
                assert!(case.operand.is_none());
                assert_eq!(case.branches.len(), 1);
                assert_eq!(case.otherwise, Some(vec![Token::Literal(Literal::String("small".into()))]));
            }
            other => panic!("Expected CASE, got {other:?}"),
        }
    }

    #[test]
    pub fn test_implicit_table_alias() {
        let tokens = group(r#"FROM "table_one" "o""#);
        assert_eq!(tokens[1], Token::Aliased {
            token: Box::new(Token::Name { qualifier: None, name: "table_one".into() }),
            alias: "o".into(),
        });
    }

    #[test]
    pub fn test_unbalanced_parenthesis() {
        let mut parser = QueryParser::new("(a");
        let lexemes = parser.tokenize().expect("Failed to tokenize");
        let err = Grouper::group(&lexemes).expect_err("Should fail");
        assert_eq!(err.message, "Unclosed parenthesis");
    }
}
