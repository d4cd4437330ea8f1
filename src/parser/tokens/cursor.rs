use crate::parser::Token;

/// Sequential and random-access walk over a statement's top-level tokens.
#[derive(Debug, Clone)]
pub struct TokenCursor<'a> {
    tokens: &'a [Token],
    position: usize,
}

impl<'a> TokenCursor<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn seek(&mut self, position: usize) {
        self.position = position.min(self.tokens.len());
    }

    pub fn eof(&self) -> bool {
        self.position >= self.tokens.len()
    }

    pub fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.position)
    }

    pub fn peek_at(&self, ahead: usize) -> Option<&'a Token> {
        self.tokens.get(self.position + ahead)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.position);
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    pub fn skip(&mut self, count: usize) {
        self.seek(self.position + count);
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a [Token] {
        let end = end.min(self.tokens.len());
        if start >= end {
            return &[];
        }
        &self.tokens[start..end]
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(keyword))
    }

    /// Consumes the keyword when it is the current token.
    pub fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.position += 1;
            return true;
        }
        false
    }

    /// Consumes tokens up to (not including) the first one `stop` accepts.
    pub fn take_until(&mut self, stop: impl Fn(&Token) -> bool) -> &'a [Token] {
        let start = self.position;
        while let Some(token) = self.peek() {
            if stop(token) {
                break;
            }
            self.position += 1;
        }
        self.slice(start, self.position)
    }
}
