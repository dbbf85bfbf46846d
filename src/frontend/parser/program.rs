use super::stmt::stmt_parser;
use super::types::type_parser;
use crate::common::ast::{Function, Module, Token};
use crate::common::span::Span;
use chumsky::{input::ValueInput, prelude::*};

pub fn program_parser<'tokens, 'src: 'tokens, I>()
-> impl Parser<'tokens, I, Module<'src>, extra::Err<Rich<'tokens, Token<'src>, Span>>>
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    let ty = type_parser();

    // name : type
    let binding = select! { Token::Ident(name) => name }
        .then_ignore(just(Token::Ctrl(':')))
        .then(ty.clone());

    let params = binding
        .clone()
        .separated_by(just(Token::Ctrl(',')))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::Ctrl('(')), just(Token::Ctrl(')')));

    // var a:int, b:array;
    let var_decl = just(Token::Var)
        .ignore_then(
            binding
                .separated_by(just(Token::Ctrl(',')))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .then_ignore(just(Token::Ctrl(';')));

    // function name(params) -> type { var-decls stmts }
    let function = just(Token::Function)
        .ignore_then(select! { Token::Ident(name) => name }.labelled("function name"))
        .then(params)
        .then_ignore(just(Token::Op("->")))
        .then(ty)
        .then(
            just(Token::Ctrl('{'))
                .ignore_then(var_decl.repeated().collect::<Vec<_>>())
                .then(stmt_parser().repeated().collect::<Vec<_>>())
                .then_ignore(just(Token::Ctrl('}'))),
        )
        .map(|(((name, params), return_type), (vars, body))| Function {
            name,
            return_type,
            params,
            vars: vars.into_iter().flatten().collect(),
            body,
        });

    function
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(end())
        .map(Module::new)
}
