use std::fmt;
use std::sync::LazyLock;

use fancy_regex::Regex;

use crate::error::{Error, Result};

/// Separator for dotted references: a single dot that is neither preceded by a dot
/// nor followed by `./`, so `../` prefixes never split.
static REFERENCE_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?<!\.)\.(?!\./)").expect("reference separator pattern is valid")
});

const UP_LEVEL: &str = "../";

/// Parses a path expression of the form `{"../"} word { "." word | "[" word "]" }`.
///
/// Up-level prefixes stay attached to the first chunk, bracketed words may
/// contain dots.
pub fn parse_path(input: &str) -> Result<Vec<String>> {
    PathParser::new(input).parse()
}

/// Splits a dotted reference on unescaped separators.
pub fn split_reference(expr: &str) -> Result<Vec<String>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for found in REFERENCE_SEPARATOR.find_iter(expr) {
        let found = found.map_err(|err| separator_error(expr, start, &err))?;
        chunks.push(expr[start..found.start()].to_string());
        start = found.end();
    }
    chunks.push(expr[start..].to_string());
    Ok(chunks)
}

fn separator_error(input: &str, position: usize, err: &fancy_regex::Error) -> Error {
    Error::InvalidPath {
        input: input.to_string(),
        position,
        message: format!("cannot split reference: {err}"),
    }
}

/// Splits a reference that may use bracket syntax into its chunks.
pub fn reference_chunks(expr: &str) -> Result<Vec<String>> {
    if expr.contains('[') {
        parse_path(expr)
    } else {
        split_reference(expr)
    }
}

/// Strips leading `../` prefixes, returning how many levels were requested.
pub fn strip_up_levels(chunk: &str) -> (usize, &str) {
    let mut levels = 0;
    let mut rest = chunk;
    while let Some(stripped) = rest.strip_prefix(UP_LEVEL) {
        levels += 1;
        rest = stripped;
    }
    (levels, rest)
}

struct PathParser<'a> {
    input: &'a str,
    chars: Vec<char>,
    position: usize,
}

impl<'a> PathParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            position: 0,
        }
    }

    fn parse(mut self) -> Result<Vec<String>> {
        let mut chunks = Vec::new();
        let mut head = String::new();
        while self.lookahead(UP_LEVEL) {
            head.push_str(UP_LEVEL);
            self.position += UP_LEVEL.len();
        }
        let word = self.word(&['.', '[', ']']);
        if word.is_empty() {
            return Err(self.error("expected a word"));
        }
        head.push_str(&word);
        chunks.push(head);

        loop {
            match self.peek() {
                Some('.') => {
                    self.position += 1;
                    let word = self.word(&['.', '[', ']']);
                    if word.is_empty() {
                        return Err(self.error("expected a word after '.'"));
                    }
                    chunks.push(word);
                }
                Some('[') => {
                    self.position += 1;
                    let word = self.word(&['[', ']']);
                    if word.is_empty() {
                        return Err(self.error("expected a word after '['"));
                    }
                    if self.peek() != Some(']') {
                        return Err(self.error("expected ']'"));
                    }
                    self.position += 1;
                    chunks.push(word);
                }
                Some(other) => {
                    return Err(self.error(&format!("unexpected character '{other}'")));
                }
                None => break,
            }
        }
        Ok(chunks)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn lookahead(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(offset, ch)| self.chars.get(self.position + offset) == Some(&ch))
    }

    fn word(&mut self, stops: &[char]) -> String {
        let mut word = String::new();
        while let Some(ch) = self.peek() {
            if stops.contains(&ch) {
                break;
            }
            word.push(ch);
            self.position += 1;
        }
        word
    }

    fn error(&self, message: &str) -> Error {
        Error::InvalidPath {
            input: self.input.to_string(),
            position: self.position,
            message: message.to_string(),
        }
    }
}

/// Scope used when a name carries no explicit scope.
pub const DEFAULT_SCOPE: &str = "default";

/// Name used by dependency slots to accept any plugin name within a scope.
pub const WILDCARD: &str = "*";

/// A `scope.name` pair; a bare `name` lives in the default scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub scope: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }

    pub fn parse(expr: &str) -> Self {
        match expr.split_once('.') {
            Some((scope, name)) => Self::new(scope, name),
            None => Self::new(DEFAULT_SCOPE, expr),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.name == WILDCARD
    }

    /// Whether a plugin identified by `other` satisfies this name.
    pub fn accepts(&self, other: &QualifiedName) -> bool {
        self.scope == other.scope && (self.is_wildcard() || self.name == other.name)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope == DEFAULT_SCOPE {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.scope, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_up_levels_dots_and_brackets() {
        let chunks = parse_path("../../var1.var2[var.3].var4").expect("parse path");
        assert_eq!(chunks, vec!["../../var1", "var2", "var.3", "var4"]);
    }

    #[test]
    fn parses_single_word() {
        assert_eq!(parse_path("rows").expect("parse path"), vec!["rows"]);
    }

    #[test]
    fn reports_missing_bracket() {
        let err = parse_path("a[b.c").expect_err("unterminated bracket");
        match err {
            Error::InvalidPath { position, .. } => assert_eq!(position, 5),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_empty_words() {
        assert!(parse_path("").is_err());
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a[]").is_err());
        assert!(parse_path("a]").is_err());
    }

    #[test]
    fn split_keeps_up_level_prefix_together() {
        assert_eq!(
            split_reference("../../var1.var2").expect("split"),
            vec!["../../var1", "var2"]
        );
        assert_eq!(split_reference("a.b.c").expect("split"), vec!["a", "b", "c"]);
        assert_eq!(split_reference("single").expect("split"), vec!["single"]);
    }

    #[test]
    fn separator_failures_name_the_reference() {
        let err = separator_error(
            "rows.a",
            5,
            &fancy_regex::Error::RuntimeError(fancy_regex::RuntimeError::BacktrackLimitExceeded),
        );
        match err {
            Error::InvalidPath {
                input, position, ..
            } => {
                assert_eq!(input, "rows.a");
                assert_eq!(position, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reference_chunks_switches_on_brackets() {
        assert_eq!(
            reference_chunks("rows[a.b].c").expect("chunks"),
            vec!["rows", "a.b", "c"]
        );
        assert_eq!(reference_chunks("rows.a").expect("chunks"), vec!["rows", "a"]);
    }

    #[test]
    fn strips_up_levels() {
        assert_eq!(strip_up_levels("../../name"), (2, "name"));
        assert_eq!(strip_up_levels("name"), (0, "name"));
    }

    #[test]
    fn qualified_names_default_scope_and_wildcard() {
        let bare = QualifiedName::parse("counter");
        assert_eq!(bare, QualifiedName::new(DEFAULT_SCOPE, "counter"));
        assert_eq!(bare.to_string(), "counter");

        let scoped = QualifiedName::parse("ext.counter");
        assert_eq!(scoped.scope, "ext");
        assert_eq!(scoped.to_string(), "ext.counter");

        let wildcard = QualifiedName::parse("ext.*");
        assert!(wildcard.accepts(&scoped));
        assert!(!wildcard.accepts(&bare));
        assert!(bare.accepts(&QualifiedName::parse("counter")));
    }
}
