use crate::common::ast::{Token, Type};
use crate::common::span::Span;
use chumsky::{input::ValueInput, prelude::*};

pub fn type_parser<'tokens, 'src: 'tokens, I>()
-> impl Parser<'tokens, I, Type, extra::Err<Rich<'tokens, Token<'src>, Span>>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    select! {
        Token::Int => Type::Int,
        Token::Array => Type::Array,
        Token::Strty => Type::Str,
        Token::Void => Type::Void,
    }
    .labelled("type")
}
