//! Lexer for Kite source text.

use crate::common::ast::Token;
use crate::common::span::{Span, Spanned};
use chumsky::prelude::*;

pub fn lexer<'src>()
-> impl Parser<'src, &'src str, Vec<Spanned<Token<'src>>>, extra::Err<Rich<'src, char, Span>>> {
    // A parser for numbers
    let num = text::int(10)
        .to_slice()
        .from_str()
        .unwrapped()
        .map(Token::Num);

    // A parser for string literals with the usual escapes
    let escape = just('\\').ignore_then(choice((
        just('\\').to('\\'),
        just('"').to('"'),
        just('n').to('\n'),
        just('t').to('\t'),
    )));
    let string = none_of("\\\"")
        .or(escape)
        .repeated()
        .collect::<String>()
        .delimited_by(just('"'), just('"'))
        .map(Token::Str);

    // A parser for operators, longest first
    let op = choice((
        just("=="),
        just("!="),
        just("<="),
        just(">="),
        just("&&"),
        just("||"),
        just("->"),
        just("<"),
        just(">"),
        just("+"),
        just("-"),
        just("*"),
        just("/"),
        just("^"),
        just("="),
    ))
    .map(Token::Op);

    // A parser for control characters
    let ctrl = one_of("(){}[];,:").map(Token::Ctrl);

    // A parser for identifiers and keywords
    let ident = any()
        .filter(|c: &char| c.is_ascii_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
                .repeated()
                .collect::<String>(),
        )
        .to_slice()
        .map(|ident: &str| match ident {
            "function" => Token::Function,
            "var" => Token::Var,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "return" => Token::Return,
            "int" => Token::Int,
            "array" => Token::Array,
            "string" => Token::Strty,
            "void" => Token::Void,
            _ => Token::Ident(ident),
        });

    let token = num.or(string).or(op).or(ctrl).or(ident);

    let comment = just("//")
        .then(any().and_is(just('\n').not()).repeated())
        .padded();

    token
        .map_with(|tok, e| (tok, e.span()))
        .padded_by(comment.repeated())
        .padded()
        // If we encounter an error, skip and attempt to lex the next character as a token instead
        .recover_with(skip_then_retry_until(any().ignored(), end()))
        .repeated()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Token> {
        lexer()
            .parse(src)
            .into_result()
            .unwrap()
            .into_iter()
            .map(|(tok, _)| tok)
            .collect()
    }

    #[test]
    fn test_keywords_and_idents() {
        let tokens = lex("function main while whilex");
        assert_eq!(
            tokens,
            vec![
                Token::Function,
                Token::Ident("main"),
                Token::While,
                Token::Ident("whilex"),
            ]
        );
    }

    #[test]
    fn test_operators_longest_first() {
        let tokens = lex("<= < == = -> -");
        assert_eq!(
            tokens,
            vec![
                Token::Op("<="),
                Token::Op("<"),
                Token::Op("=="),
                Token::Op("="),
                Token::Op("->"),
                Token::Op("-"),
            ]
        );
    }

    #[test]
    fn test_numbers_and_strings() {
        let tokens = lex(r#"42 "hi\n""#);
        assert_eq!(
            tokens,
            vec![Token::Num(42), Token::Str("hi\n".to_string())]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = lex("1 // a comment\n2");
        assert_eq!(tokens, vec![Token::Num(1), Token::Num(2)]);
    }

    #[test]
    fn test_spans_cover_tokens() {
        let spanned = lexer().parse("ab + cd").into_result().unwrap();
        assert_eq!(spanned[0].1.start, 0);
        assert_eq!(spanned[0].1.end, 2);
        assert_eq!(spanned[2].1.start, 5);
    }
}
