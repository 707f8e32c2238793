//! Expression compiler
//!
//! Turns filter, sort, grouping and projection text into the compiled tree
//! from `monodoc_common::ast`.

pub mod lexer;
pub mod parser;


// Re-export commonly used items
pub use parser::{
    ParseResult, Parser, parse_document_path, parse_expr, parse_expr_list, parse_projection,
    parse_sort,
};
