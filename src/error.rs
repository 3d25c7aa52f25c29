use serde::Serialize;
use thiserror::Error;

/// A fatal parse failure. No partial document is ever returned alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    /// 1-based. For unterminated blocks this is the line that opened the block.
    pub line: usize,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(line: usize, kind: ParseErrorKind) -> Self {
        Self { line, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParseErrorKind {
    #[error("{opened} is never closed by {expected}")]
    UnterminatedBlock {
        opened: String,
        expected: &'static str,
    },
    #[error("found {found} but the innermost open block expects {expected}")]
    MismatchedKeyword {
        found: String,
        expected: &'static str,
    },
    #[error("{found} has no open block to belong to")]
    UnexpectedKeyword { found: String },
    #[error("a second else branch in the block opened at line {opened_at}")]
    DuplicateElse { opened_at: usize },
    #[error("elif after else in the block opened at line {opened_at}")]
    ElifAfterElse { opened_at: usize },
    #[error("decision {prompt:?} has no options")]
    EmptyDecision { prompt: String },
    #[error("heading {heading:?} inside the block opened at line {opened_at}")]
    HeadingInsideBlock { heading: String, opened_at: usize },
    #[error("frontmatter opened at line {opened_at} is not closed by ===")]
    UnterminatedFrontmatter { opened_at: usize },
    #[error("malformed frontmatter line {text:?}")]
    MalformedFrontmatter { text: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("continue_labels must name at least one label")]
    NoContinueLabels,
}

/// Failures of the JSON-in/JSON-out surface used by the host bindings.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid document JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown dialect {0:?}")]
    UnknownDialect(String),
    #[error("{0} can be written but not read")]
    WriteOnlyDialect(crate::dialect::Dialect),
}
