// Text parsers for filter predicates given on the command line

pub mod filter;
pub mod lexer;

pub use filter::{filter_expr, parse_filter_expr};
