use once_cell::sync::Lazy;
use regex::Regex;

use crate::parser::{ParseError, QueryComparers};

static NAMED_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^%\((\d+)\)s").expect("valid placeholder regex")
});

/// Words lexed as keywords when unquoted. Quoted words are always names.
pub const KEYWORDS: &[&str] = &[
    "SELECT", "DISTINCT", "FROM", "WHERE", "AND", "OR", "NOT", "IN", "IS", "LIKE", "ILIKE",
    "BETWEEN", "AS", "ON", "JOIN", "INNER", "LEFT", "RIGHT", "OUTER", "FULL", "CROSS",
    "HAVING", "LIMIT", "OFFSET", "ASC", "DESC", "CASE", "WHEN", "THEN", "ELSE", "END",
    "INSERT", "INTO", "VALUES", "UPDATE", "SET", "DELETE", "DEFAULT", "CREATE", "ALTER",
    "DROP", "TABLE", "ADD", "CONSTRAINT", "CHECK", "UNIQUE", "PRIMARY", "FOREIGN", "KEY",
    "REFERENCES", "COLUMN", "INDEX", "EXISTS", "NULLS", "FIRST", "LAST", "RETURNING",
];

#[derive(Debug, Clone, PartialEq)]
pub enum LexemeKind {
    Keyword(String),
    Name(String),
    Quoted(String),
    Str(String),
    Number(String),
    Null,
    Bool(bool),
    Placeholder(usize),
    Operator(String),
    Star,
    Dot,
    Comma,
    Semicolon,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub kind: LexemeKind,
    /// Whether whitespace separates this lexeme from the previous one.
    pub spaced: bool,
    pub start: usize,
}

/// Character walker that turns SQL text into lexemes and rewrites every
/// `%s` / `?` hole into a unique positional placeholder.
#[derive(Debug, Default)]
pub struct QueryParser {
    pub position: usize,
    pub length: usize,
    pub text_v: Vec<char>,
    pub text: String,
    pub comparers: QueryComparers,
    pub next_placeholder: usize,
}

impl QueryParser {
    pub fn new(query: &str) -> Self {
        let text_v: Vec<char> = query.chars().collect();
        Self {
            position: 0,
            length: text_v.len(),
            text_v,
            text: query.to_string(),
            comparers: QueryComparers::new(),
            next_placeholder: 0,
        }
    }

    pub fn eof(&self) -> bool {
        self.position >= self.length
    }

    pub fn current(&self) -> char {
        if self.position < self.length {
            return self.text_v[self.position];
        }

        '\0'
    }

    pub fn peek(&self, ahead: usize) -> Option<char> {
        self.text_v.get(self.position + ahead).copied()
    }

    pub fn next(&mut self) {
        self.position += 1;
    }

    pub fn next_non_whitespace(&mut self) -> bool {
        let start = self.position;
        while !self.eof() && self.current().is_whitespace() {
            self.next();
        }
        self.position > start
    }

    pub fn jump(&mut self, ahead: usize) {
        self.position = (self.position + ahead).min(self.length);
    }

    pub fn text_from_range(&self, start: usize, end: usize) -> String {
        let end = end.min(self.length);
        if start >= end {
            return String::new();
        }
        self.text_v[start..end].iter().collect()
    }

    pub fn text_from_pivot(&self, pivot: usize) -> String {
        self.text_from_range(pivot, self.position)
    }

    pub fn tokenize(&mut self) -> Result<Vec<Lexeme>, ParseError> {
        let mut lexemes: Vec<Lexeme> = vec![];
        loop {
            let spaced = self.next_non_whitespace();
            if self.eof() {
                break;
            }
            let start = self.position;
            let kind = self.lex_one(lexemes.last())?;
            lexemes.push(Lexeme { kind, spaced, start });
        }
        Ok(lexemes)
    }

    fn lex_one(&mut self, previous: Option<&Lexeme>) -> Result<LexemeKind, ParseError> {
        let pivot = self.position;
        let current = self.current();

        if let Some((keyword, len)) = self.comparers.match_compound(self) {
            self.jump(len);
            return Ok(LexemeKind::Keyword(keyword.to_string()));
        }

        match current {
            '"' | '`' => self.lex_quoted(current).map(LexemeKind::Quoted),
            '\'' => self.lex_string().map(LexemeKind::Str),
            '(' => { self.next(); Ok(LexemeKind::LParen) },
            ')' => { self.next(); Ok(LexemeKind::RParen) },
            ',' => { self.next(); Ok(LexemeKind::Comma) },
            ';' => { self.next(); Ok(LexemeKind::Semicolon) },
            '.' if !self.peek(1).is_some_and(|c| c.is_ascii_digit()) => { self.next(); Ok(LexemeKind::Dot) },
            '*' => { self.next(); Ok(LexemeKind::Star) },
            '?' => { self.next(); Ok(self.positional_placeholder()) },
            '%' => self.lex_percent(),
            '-' if Self::starts_operand(previous) && self.peek(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.next();
                let number = self.lex_number();
                Ok(LexemeKind::Number(format!("-{number}")))
            },
            '<' | '>' | '!' | '=' | '+' | '-' | '/' | '|' => self.lex_operator(),
            c if c.is_ascii_digit() || c == '.' => Ok(LexemeKind::Number(self.lex_number())),
            c if c.is_alphabetic() || c == '_' => Ok(self.lex_word()),
            _ => ParseError::new("Unexpected character", pivot, self).err(),
        }
    }

    fn starts_operand(previous: Option<&Lexeme>) -> bool {
        match previous.map(|l| &l.kind) {
            None => true,
            Some(LexemeKind::Operator(_)) | Some(LexemeKind::Keyword(_)) | Some(LexemeKind::Comma) | Some(LexemeKind::LParen) => true,
            _ => false,
        }
    }

    fn positional_placeholder(&mut self) -> LexemeKind {
        let index = self.next_placeholder;
        self.next_placeholder += 1;
        LexemeKind::Placeholder(index)
    }

    fn lex_percent(&mut self) -> Result<LexemeKind, ParseError> {
        let pivot = self.position;
        if self.peek(1) == Some('s') {
            self.jump(2);
            return Ok(self.positional_placeholder());
        }

        let rest = self.text_from_range(self.position, self.length);
        if let Some(caps) = NAMED_PLACEHOLDER.captures(&rest) {
            let matched = caps[0].chars().count();
            let index = caps[1].parse::<usize>()
                .map_err(|_| ParseError::new("Invalid placeholder index", pivot, self))?;
            self.jump(matched);
            self.next_placeholder = self.next_placeholder.max(index + 1);
            return Ok(LexemeKind::Placeholder(index));
        }

        self.next();
        Ok(LexemeKind::Operator("%".into()))
    }

    fn lex_quoted(&mut self, delimiter: char) -> Result<String, ParseError> {
        let pivot = self.position;
        self.next();
        let start = self.position;
        while !self.eof() && self.current() != delimiter {
            self.next();
        }
        if self.eof() {
            return ParseError::new("Unterminated quoted identifier", pivot, self).err();
        }
        let name = self.text_from_pivot(start);
        self.next();
        Ok(name)
    }

    fn lex_string(&mut self) -> Result<String, ParseError> {
        let pivot = self.position;
        self.next();
        let mut value = String::new();
        loop {
            if self.eof() {
                return ParseError::new("Unterminated string literal", pivot, self).err();
            }
            let ch = self.current();
            self.next();
            if ch == '\'' {
                if self.current() == '\'' {
                    value.push('\'');
                    self.next();
                    continue;
                }
                break;
            }
            value.push(ch);
        }
        Ok(value)
    }

    fn lex_number(&mut self) -> String {
        let start = self.position;
        let mut seen_exponent = false;
        while !self.eof() {
            let ch = self.current();
            if ch.is_ascii_digit() || ch == '.' {
                self.next();
            } else if (ch == 'e' || ch == 'E') && !seen_exponent {
                seen_exponent = true;
                self.next();
                if matches!(self.current(), '+' | '-') {
                    self.next();
                }
            } else {
                break;
            }
        }
        self.text_from_pivot(start)
    }

    fn lex_operator(&mut self) -> Result<LexemeKind, ParseError> {
        let pivot = self.position;
        let two: String = [self.current(), self.peek(1).unwrap_or('\0')].iter().collect();
        if matches!(two.as_str(), "<=" | ">=" | "<>" | "!=" | "||") {
            self.jump(2);
            return Ok(LexemeKind::Operator(two));
        }
        let one = self.current();
        if one == '!' || one == '|' {
            return ParseError::new("Invalid operator", pivot, self).err();
        }
        self.next();
        Ok(LexemeKind::Operator(one.to_string()))
    }

    fn lex_word(&mut self) -> LexemeKind {
        let start = self.position;
        while !self.eof() && (self.current().is_alphanumeric() || self.current() == '_' || self.current() == '$') {
            self.next();
        }
        let word = self.text_from_pivot(start);
        let upper = word.to_ascii_uppercase();
        match upper.as_str() {
            "NULL" => LexemeKind::Null,
            "TRUE" => LexemeKind::Bool(true),
            "FALSE" => LexemeKind::Bool(false),
            _ if KEYWORDS.contains(&upper.as_str()) => LexemeKind::Keyword(upper),
            _ => LexemeKind::Name(word),
        }
    }
}
