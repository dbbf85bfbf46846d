//! Source spans shared by the lexer, parser and semantic checks.

use chumsky::span::SimpleSpan;

pub type Span = SimpleSpan<usize>;

/// A value paired with the source span it was parsed from
pub type Spanned<T> = (T, Span);

/// Translate a byte offset into a 1-based `line:column` pair
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, c) in source.chars().enumerate() {
        if i == offset {
            break;
        }
        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}
