use crate::common::ast::{BinOp, Expr, Token};
use crate::common::span::{Span, Spanned};
use chumsky::{input::ValueInput, prelude::*};

pub fn expr_parser<'tokens, 'src: 'tokens, I>()
-> impl Parser<'tokens, I, Spanned<Expr<'src>>, extra::Err<Rich<'tokens, Token<'src>, Span>>> + Clone
where
    I: ValueInput<'tokens, Token = Token<'src>, Span = Span>,
{
    recursive(|expr| {
        // Literals
        let lit = select! {
            Token::Num(n) => Expr::Int(n),
            Token::Str(s) => Expr::Str(s),
        }
        .labelled("literal");

        // Function call
        let call = select! { Token::Ident(name) => name }
            .then(
                expr.clone()
                    .separated_by(just(Token::Ctrl(',')))
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::Ctrl('(')), just(Token::Ctrl(')'))),
            )
            .map(|(name, args)| Expr::Call { name, args });

        // Array access: name[index]
        let index = select! { Token::Ident(name) => name }
            .then(
                expr.clone()
                    .delimited_by(just(Token::Ctrl('[')), just(Token::Ctrl(']'))),
            )
            .map(|(name, index)| Expr::Index {
                name,
                index: Box::new(index),
            });

        // Variables
        let var = select! { Token::Ident(name) => name }
            .map(Expr::Var)
            .labelled("identifier");

        // Parenthesized expression
        let paren = expr
            .clone()
            .delimited_by(just(Token::Ctrl('(')), just(Token::Ctrl(')')))
            .map(|(e, _)| e);

        let atom = call
            .or(index)
            .or(var)
            .or(lit)
            .or(paren)
            .map_with(|expr, e| (expr, e.span()))
            .recover_with(via_parser(nested_delimiters(
                Token::Ctrl('('),
                Token::Ctrl(')'),
                [
                    (Token::Ctrl('['), Token::Ctrl(']')),
                    (Token::Ctrl('{'), Token::Ctrl('}')),
                ],
                |span| (Expr::Int(0), span),
            )))
            .boxed();

        // Binary operators with precedence
        // Multiplication and division
        let op_mul = just(Token::Op("*")).to(BinOp::Mul);
        let op_div = just(Token::Op("/")).to(BinOp::Div);
        let product = atom.clone().foldl_with(
            choice((op_mul, op_div)).then(atom).repeated(),
            |lhs, (op, rhs), e| {
                (
                    Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    e.span(),
                )
            },
        );

        // Addition and subtraction
        let op_add = just(Token::Op("+")).to(BinOp::Add);
        let op_sub = just(Token::Op("-")).to(BinOp::Sub);
        let sum = product.clone().foldl_with(
            choice((op_add, op_sub)).then(product).repeated(),
            |lhs, (op, rhs), e| {
                (
                    Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    e.span(),
                )
            },
        );

        // Relational comparisons
        let op_lt = just(Token::Op("<")).to(BinOp::Lt);
        let op_le = just(Token::Op("<=")).to(BinOp::Le);
        let op_gt = just(Token::Op(">")).to(BinOp::Gt);
        let op_ge = just(Token::Op(">=")).to(BinOp::Ge);
        let relational = sum.clone().foldl_with(
            choice((op_le, op_ge, op_lt, op_gt)).then(sum).repeated(),
            |lhs, (op, rhs), e| {
                (
                    Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    e.span(),
                )
            },
        );

        // Equality
        let op_eq = just(Token::Op("==")).to(BinOp::Eq);
        let op_ne = just(Token::Op("!=")).to(BinOp::Ne);
        let equality = relational.clone().foldl_with(
            choice((op_eq, op_ne)).then(relational).repeated(),
            |lhs, (op, rhs), e| {
                (
                    Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    e.span(),
                )
            },
        );

        // Bitwise xor
        let op_xor = just(Token::Op("^")).to(BinOp::Xor);
        let xor = equality.clone().foldl_with(
            op_xor.then(equality).repeated(),
            |lhs, (op, rhs), e| {
                (
                    Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    e.span(),
                )
            },
        );

        // Logical operators
        let op_and = just(Token::Op("&&")).to(BinOp::And);
        let op_or = just(Token::Op("||")).to(BinOp::Or);
        let and = xor.clone().foldl_with(
            op_and.then(xor).repeated(),
            |lhs, (op, rhs), e| {
                (
                    Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    e.span(),
                )
            },
        );
        let or = and.clone().foldl_with(
            op_or.then(and).repeated(),
            |lhs, (op, rhs), e| {
                (
                    Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    e.span(),
                )
            },
        );

        or.labelled("expression").as_context()
    })
    .boxed()
}
