//! Parser for template markup

pub mod ast;
mod grammar;
pub mod lexer;
mod tree;

pub use ast::*;
pub use grammar::{parse_expression, KNOWN_TAGS};
pub use tree::parse;
