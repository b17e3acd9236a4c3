//! Parse errors for fragment grammars

use crate::ast::Position;
use std::fmt;

/// The grammar a fragment is parsed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarEntry {
    Expr,
    Metadata,
    ComplexType,
}

impl fmt::Display for GrammarEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarEntry::Expr => write!(f, "expression"),
            GrammarEntry::Metadata => write!(f, "metadata"),
            GrammarEntry::ComplexType => write!(f, "type"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The grammar did not match at `pos`
    Unexpected {
        entry: GrammarEntry,
        found: String,
        pos: Position,
    },
    /// The grammar matched a prefix but input remains
    TrailingInput {
        entry: GrammarEntry,
        rest: String,
        pos: Position,
    },
    /// Empty input
    Empty { entry: GrammarEntry, pos: Position },
}

impl ParseError {
    pub fn pos(&self) -> Position {
        match self {
            ParseError::Unexpected { pos, .. }
            | ParseError::TrailingInput { pos, .. }
            | ParseError::Empty { pos, .. } => *pos,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Unexpected { entry, found, .. } => {
                write!(f, "Unexpected '{}' while parsing {}", found, entry)
            }
            ParseError::TrailingInput { entry, rest, .. } => {
                write!(f, "Unexpected '{}' after {}", rest, entry)
            }
            ParseError::Empty { entry, .. } => write!(f, "Empty {}", entry),
        }
    }
}

impl std::error::Error for ParseError {}
