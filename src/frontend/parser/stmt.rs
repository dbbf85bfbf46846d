use super::expr::expr_parser;
use crate::common::ast::{Expr, Stmt, Token};
use crate::common::span::{Span, Spanned};
use chumsky::{input::ValueInput, prelude::*};

pub fn stmt_parser<'tokens, 'src: 'tokens, I>()
-> impl Parser<'tokens, I, Spanned<Stmt<'src>>, extra::Err<Rich<'tokens, Token<'src>, Span>>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    recursive(|stmt| {
        let expr = expr_parser();

        let block = stmt
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::Ctrl('{')), just(Token::Ctrl('}')))
            .recover_with(via_parser(nested_delimiters(
                Token::Ctrl('{'),
                Token::Ctrl('}'),
                [
                    (Token::Ctrl('('), Token::Ctrl(')')),
                    (Token::Ctrl('['), Token::Ctrl(']')),
                ],
                |span| vec![(Stmt::Return(None), span)],
            )));

        // if cond { ... } / if cond { ... } else { ... }
        let if_stmt = just(Token::If)
            .ignore_then(expr.clone())
            .then(block.clone())
            .then(just(Token::Else).ignore_then(block.clone()).or_not())
            .map_with(|((cond, then_body), else_body), e| {
                let stmt = match else_body {
                    Some(else_body) => Stmt::IfElse {
                        cond,
                        then_body,
                        else_body,
                    },
                    None => Stmt::If { cond, then_body },
                };
                (stmt, e.span())
            });

        // while cond { ... }
        let while_stmt = just(Token::While)
            .ignore_then(expr.clone())
            .then(block)
            .map_with(|(cond, body), e| (Stmt::While { cond, body }, e.span()));

        // return; / return expr;
        let return_stmt = just(Token::Return)
            .ignore_then(expr.clone().or_not())
            .then_ignore(just(Token::Ctrl(';')))
            .map_with(|value, e| (Stmt::Return(value), e.span()));

        // call in statement position: name(args);
        let call_stmt = select! { Token::Ident(name) => name }
            .then(
                expr.clone()
                    .separated_by(just(Token::Ctrl(',')))
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::Ctrl('(')), just(Token::Ctrl(')'))),
            )
            .then_ignore(just(Token::Ctrl(';')))
            .map_with(|(name, args), e| {
                (Stmt::Call((Expr::Call { name, args }, e.span())), e.span())
            });

        // lvalue = expr;
        let assign = expr
            .clone()
            .then_ignore(just(Token::Op("=")))
            .then(expr)
            .then_ignore(just(Token::Ctrl(';')))
            .map_with(|(lhs, rhs), e| (Stmt::Assign { lhs, rhs }, e.span()));

        choice((if_stmt, while_stmt, return_stmt, call_stmt, assign)).labelled("statement")
    })
    .boxed()
}
