//! Assembly-time error taxonomy. Runtime errors are
//! `armcore::error::*`; these are raised only while turning source text
//! into bytecode.

use crate::parser::Rule;
use thiserror::Error;

/// One per-line diagnostic. The assembler keeps parsing after one of
/// these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: {message}")]
    Range { line: usize, message: String },
}

impl ParseError {
    pub fn line(&self) -> usize {
        match self {
            ParseError::Syntax { line, .. } | ParseError::Range { line, .. } => *line,
        }
    }
}

/// Errors only detectable once the whole program has been parsed once
/// (labels may be defined after their first reference).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("line {line}: label \"{name}\" is not defined")]
    UndefinedLabel { name: String, line: usize },

    #[error("label \"{name}\" redefined at line {second_line} (first defined at line {first_line})")]
    DuplicateLabel {
        name: String,
        first_line: usize,
        second_line: usize,
    },

    #[error("line {line}: branch displacement {diff} is not a multiple of 4 bytes")]
    MisalignedBranch { line: usize, diff: i64 },

    #[error("line {line}: {what} does not fit in {bits} bits")]
    OutOfRange { line: usize, what: String, bits: u32 },

    #[error("section \"{name}\" is required but was never declared")]
    MissingSection { name: &'static str },

    #[error("total assembled size {size} exceeds the configured limit of {limit} bytes")]
    TotalMemoryExceeded { size: u32, limit: u32 },

    #[error("the \"real\" PC-behavior model is not implemented")]
    UnsupportedPcBehavior,
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> ParseError {
        let line = match err.line_col {
            pest::error::LineColLocation::Pos((l, _)) => l,
            pest::error::LineColLocation::Span((l, _), _) => l,
        };
        ParseError::Syntax {
            line,
            message: err.variant.message().to_string(),
        }
    }
}
