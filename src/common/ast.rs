//! Abstract syntax tree for Kite source programs.
//!
//! The parser produces a `Module`; the semantic checker validates it and the
//! IR generator consumes it. External functions (the runtime API) are
//! registered on the module by the driver before checking.

use crate::common::span::Spanned;
use std::collections::BTreeMap;
use std::fmt;

/// Tokens produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub enum Token<'src> {
    Num(i64),
    Str(String),
    Op(&'src str),
    Ctrl(char),
    Ident(&'src str),
    Function,
    Var,
    If,
    Else,
    While,
    Return,
    Int,
    Array,
    Strty,
    Void,
}

impl<'src> fmt::Display for Token<'src> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Num(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::Op(op) => write!(f, "{}", op),
            Token::Ctrl(c) => write!(f, "{}", c),
            Token::Ident(name) => write!(f, "{}", name),
            Token::Function => write!(f, "function"),
            Token::Var => write!(f, "var"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::While => write!(f, "while"),
            Token::Return => write!(f, "return"),
            Token::Int => write!(f, "int"),
            Token::Array => write!(f, "array"),
            Token::Strty => write!(f, "string"),
            Token::Void => write!(f, "void"),
        }
    }
}

/// The four Kite types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    Int,
    Array,
    Str,
    Void,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Array => write!(f, "array"),
            Type::Str => write!(f, "string"),
            Type::Void => write!(f, "void"),
        }
    }
}

/// Binary operators at the source level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Clone, Debug)]
pub enum Expr<'src> {
    Int(i64),
    Str(String),
    Var(&'src str),
    /// `name[index]`
    Index {
        name: &'src str,
        index: Box<Spanned<Expr<'src>>>,
    },
    Call {
        name: &'src str,
        args: Vec<Spanned<Expr<'src>>>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Spanned<Expr<'src>>>,
        rhs: Box<Spanned<Expr<'src>>>,
    },
}

#[derive(Clone, Debug)]
pub enum Stmt<'src> {
    Assign {
        lhs: Spanned<Expr<'src>>,
        rhs: Spanned<Expr<'src>>,
    },
    If {
        cond: Spanned<Expr<'src>>,
        then_body: Vec<Spanned<Stmt<'src>>>,
    },
    IfElse {
        cond: Spanned<Expr<'src>>,
        then_body: Vec<Spanned<Stmt<'src>>>,
        else_body: Vec<Spanned<Stmt<'src>>>,
    },
    While {
        cond: Spanned<Expr<'src>>,
        body: Vec<Spanned<Stmt<'src>>>,
    },
    Return(Option<Spanned<Expr<'src>>>),
    /// Call in statement position; the result is discarded
    Call(Spanned<Expr<'src>>),
}

/// A function prototype: return type plus parameter types
pub type Prototype = (Type, Vec<Type>);

#[derive(Clone, Debug)]
pub struct Function<'src> {
    pub name: &'src str,
    pub return_type: Type,
    pub params: Vec<(&'src str, Type)>,
    pub vars: Vec<(&'src str, Type)>,
    pub body: Vec<Spanned<Stmt<'src>>>,
}

impl<'src> Function<'src> {
    pub fn prototype(&self) -> Prototype {
        (
            self.return_type,
            self.params.iter().map(|(_, ty)| *ty).collect(),
        )
    }

    /// Look up a local variable or parameter type by name
    pub fn variable_type(&self, name: &str) -> Option<Type> {
        self.vars
            .iter()
            .chain(self.params.iter())
            .find(|(n, _)| *n == name)
            .map(|(_, ty)| *ty)
    }
}

#[derive(Clone, Debug)]
pub struct Module<'src> {
    pub functions: Vec<Function<'src>>,
    externals: BTreeMap<String, Prototype>,
}

impl<'src> Module<'src> {
    pub fn new(functions: Vec<Function<'src>>) -> Self {
        Self {
            functions,
            externals: BTreeMap::new(),
        }
    }

    /// Register an external function linked from the runtime
    pub fn add_external(&mut self, name: &str, proto: Prototype) {
        self.externals.insert(name.to_string(), proto);
    }

    /// Resolve a callee against defined functions and externals
    pub fn prototype(&self, name: &str) -> Option<Prototype> {
        if let Some(f) = self.functions.iter().find(|f| f.name == name) {
            return Some(f.prototype());
        }
        self.externals.get(name).cloned()
    }
}
