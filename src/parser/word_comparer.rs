use crate::parser::QueryParser;

/// Case-insensitive matcher for a (possibly multi-word) keyword at the
/// parser's current position. A space inside `word` matches any run of
/// whitespace in the input.
#[derive(Debug, Default, Clone)]
pub struct WordComparer {
    pub keyword: &'static str,
    pub word: Vec<char>,
}

impl WordComparer {
    pub fn new(word: &'static str) -> Self {
        Self {
            keyword: word,
            word: word.to_uppercase().chars().collect(),
        }
    }

    pub fn is_block_delimiter(ch: char) -> bool {
        ch.is_whitespace()
    }

    pub fn is_any_delimiter(ch: char) -> bool {
        ch == ',' || ch == '(' || ch == ')' || ch == ';' || Self::is_block_delimiter(ch)
    }

    /// Returns the number of input chars the keyword spans, when it matches
    /// and ends on a delimiter (or at the end of input).
    pub fn compare(&self, parser: &QueryParser) -> Option<usize> {
        let mut offset = 0;
        for ch in self.word.iter() {
            if *ch == ' ' {
                let run_start = offset;
                while parser.peek(offset).is_some_and(Self::is_block_delimiter) {
                    offset += 1;
                }
                if offset == run_start {
                    return None;
                }
                continue;
            }

            match parser.peek(offset) {
                Some(found) if found.to_ascii_uppercase() == *ch => offset += 1,
                _ => return None,
            }
        }

        match parser.peek(offset) {
            None => Some(offset),
            Some(next) if Self::is_any_delimiter(next) => Some(offset),
            Some(_) => None,
        }
    }
}

/// Multi-word keywords, longest first so `LEFT OUTER JOIN` wins over `LEFT`.
#[derive(Debug, Clone)]
pub struct QueryComparers {
    pub compound: Vec<WordComparer>,
}

impl Default for QueryComparers {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryComparers {
    pub fn new() -> Self {
        Self {
            compound: vec![
                WordComparer::new("LEFT OUTER JOIN"),
                WordComparer::new("RIGHT OUTER JOIN"),
                WordComparer::new("FULL OUTER JOIN"),
                WordComparer::new("INNER JOIN"),
                WordComparer::new("LEFT JOIN"),
                WordComparer::new("RIGHT JOIN"),
                WordComparer::new("FULL JOIN"),
                WordComparer::new("CROSS JOIN"),
                WordComparer::new("GROUP BY"),
                WordComparer::new("ORDER BY"),
            ],
        }
    }

    /// Canonical keyword text and matched length of the first compound keyword
    /// found at the current position.
    pub fn match_compound(&self, parser: &QueryParser) -> Option<(&'static str, usize)> {
        self.compound
            .iter()
            .find_map(|comparer| comparer.compare(parser).map(|len| (comparer.keyword, len)))
    }
}
