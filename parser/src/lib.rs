//! Rayzor fragment parser
//!
//! The AST for program fragments exchanged with macro code, a parser for the
//! expression, metadata and complex-type grammars, and a source printer.

pub mod ast;
pub mod error;
pub mod expr_parser;
pub mod printer;
pub mod visit;

pub use ast::*;
pub use error::{GrammarEntry, ParseError};
pub use visit::{walk, walk_mut};

/// A parsed fragment, tagged by the grammar that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Expr(Expr),
    Metadata(MetadataEntry),
    ComplexType(ComplexType),
}

/// Parse `text` against `entry`; node positions are relative to `pos.min`.
pub fn parse(entry: GrammarEntry, text: &str, pos: Position) -> Result<Fragment, ParseError> {
    match entry {
        GrammarEntry::Expr => parse_expr(text, pos).map(Fragment::Expr),
        GrammarEntry::Metadata => parse_metadata(text, pos).map(Fragment::Metadata),
        GrammarEntry::ComplexType => parse_complex_type(text, pos).map(Fragment::ComplexType),
    }
}

pub fn parse_expr(text: &str, pos: Position) -> Result<Expr, ParseError> {
    expr_parser::parse_entry(GrammarEntry::Expr, text, pos, expr_parser::expr)
}

pub fn parse_metadata(text: &str, pos: Position) -> Result<MetadataEntry, ParseError> {
    expr_parser::parse_entry(GrammarEntry::Metadata, text, pos, expr_parser::metadata_entry)
}

pub fn parse_complex_type(text: &str, pos: Position) -> Result<ComplexType, ParseError> {
    expr_parser::parse_entry(GrammarEntry::ComplexType, text, pos, expr_parser::complex_type)
}
