//! Parser from tokens to the Kite AST.

mod expr;
mod program;
mod stmt;
mod types;

pub use expr::expr_parser;
pub use program::program_parser;
pub use stmt::stmt_parser;
pub use types::type_parser;
