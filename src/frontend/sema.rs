//! Semantic checks over the parsed AST.
//!
//! Validates the module before IR generation: entry-point shape, unique
//! function names, the per-function limits (at most 3 parameters and 10
//! locals), return placement, the no-nested-loop restriction, and full type
//! checking of statements and expressions against declared variables and
//! the registered prototypes. Checking stops at the first error.

use crate::common::ast::{Expr, Function, Module, Stmt, Type};
use crate::common::span::{Span, Spanned};
use std::collections::BTreeSet;
use thiserror::Error;

pub const MAX_PARAMETERS: usize = 3;
pub const MAX_VARIABLES: usize = 10;

#[derive(Debug, Error)]
pub enum SemaError {
    #[error("cannot find variable `{name}`")]
    UndefinedVariable { name: String, span: Span },
    #[error("cannot find function `{name}`")]
    UndefinedFunction { name: String, span: Span },
    #[error("type mismatch: expected `{expected}`, found `{found}`")]
    TypeMismatch {
        expected: Type,
        found: Type,
        span: Span,
    },
    #[error("binary operands must be integers")]
    NonIntegerOperand { span: Span },
    #[error("`{name}` expects {expected} argument(s), found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("`return` must be the last statement of its block")]
    MisplacedReturn { span: Span },
    #[error("function `{name}` must end with a return statement")]
    MissingReturn { name: String },
    #[error("variable `{name}` cannot have type void")]
    VoidVariable { name: String },
    #[error("function `{name}` has more than 10 variables")]
    TooManyVariables { name: String },
    #[error("function `{name}` has more than 3 parameters")]
    TooManyParameters { name: String },
    #[error("nested loops are not supported")]
    NestedLoop { span: Span },
    #[error("duplicate function name `{name}`")]
    DuplicateFunction { name: String },
    #[error("entry function `main` is not defined")]
    MissingMain,
    #[error("`main` must take no parameters and return int")]
    InvalidMainSignature,
    #[error("invalid assignment target")]
    InvalidAssignment { span: Span },
    #[error("`{name}` is not an array")]
    NotAnArray { name: String, span: Span },
}

impl SemaError {
    /// Source span to highlight, where one exists
    pub fn span(&self) -> Option<Span> {
        match self {
            SemaError::UndefinedVariable { span, .. }
            | SemaError::UndefinedFunction { span, .. }
            | SemaError::TypeMismatch { span, .. }
            | SemaError::NonIntegerOperand { span }
            | SemaError::ArityMismatch { span, .. }
            | SemaError::MisplacedReturn { span }
            | SemaError::NestedLoop { span }
            | SemaError::InvalidAssignment { span }
            | SemaError::NotAnArray { span, .. } => Some(*span),
            _ => None,
        }
    }
}

/// Check a whole module. The runtime prototypes must already be registered.
pub fn check_module(module: &Module) -> Result<(), SemaError> {
    let mut names = BTreeSet::new();
    let mut has_main = false;

    for func in &module.functions {
        if func.name == "main" {
            if !func.params.is_empty() || func.return_type != Type::Int {
                return Err(SemaError::InvalidMainSignature);
            }
            has_main = true;
        }
        if !names.insert(func.name) {
            return Err(SemaError::DuplicateFunction {
                name: func.name.to_string(),
            });
        }
    }
    if !has_main {
        return Err(SemaError::MissingMain);
    }

    for func in &module.functions {
        check_function(module, func)?;
    }
    Ok(())
}

fn check_function(module: &Module, func: &Function) -> Result<(), SemaError> {
    if !matches!(func.body.last(), Some((Stmt::Return(_), _))) {
        return Err(SemaError::MissingReturn {
            name: func.name.to_string(),
        });
    }

    for (name, ty) in &func.vars {
        if *ty == Type::Void {
            return Err(SemaError::VoidVariable {
                name: name.to_string(),
            });
        }
    }
    if func.vars.len() > MAX_VARIABLES {
        return Err(SemaError::TooManyVariables {
            name: func.name.to_string(),
        });
    }
    if func.params.len() > MAX_PARAMETERS {
        return Err(SemaError::TooManyParameters {
            name: func.name.to_string(),
        });
    }

    check_block(module, func, &func.body)
}

fn check_block(module: &Module, func: &Function, stmts: &[Spanned<Stmt>]) -> Result<(), SemaError> {
    for stmt in stmts {
        check_statement(module, func, stmt)?;
    }

    // a return is only valid as the last statement of its block
    for (idx, stmt) in stmts.iter().enumerate() {
        if matches!(stmt.0, Stmt::Return(_)) && idx + 1 != stmts.len() {
            return Err(SemaError::MisplacedReturn { span: stmt.1 });
        }
    }
    Ok(())
}

fn check_statement(module: &Module, func: &Function, stmt: &Spanned<Stmt>) -> Result<(), SemaError> {
    match &stmt.0 {
        Stmt::Assign { lhs, rhs } => {
            let lhs_ty = match &lhs.0 {
                Expr::Var(_) | Expr::Index { .. } => expr_type(module, func, lhs)?,
                _ => return Err(SemaError::InvalidAssignment { span: lhs.1 }),
            };
            let rhs_ty = expr_type(module, func, rhs)?;
            if lhs_ty != rhs_ty {
                return Err(SemaError::TypeMismatch {
                    expected: lhs_ty,
                    found: rhs_ty,
                    span: rhs.1,
                });
            }
            Ok(())
        }

        Stmt::If { cond, then_body } => {
            expect_int(module, func, cond)?;
            check_block(module, func, then_body)
        }

        Stmt::IfElse {
            cond,
            then_body,
            else_body,
        } => {
            expect_int(module, func, cond)?;
            check_block(module, func, then_body)?;
            check_block(module, func, else_body)
        }

        Stmt::While { cond, body } => {
            expect_int(module, func, cond)?;
            if let Some(span) = find_nested_loop(body) {
                return Err(SemaError::NestedLoop { span });
            }
            check_block(module, func, body)
        }

        Stmt::Return(value) => match value {
            Some(expr) => {
                let ty = expr_type(module, func, expr)?;
                if ty != func.return_type {
                    return Err(SemaError::TypeMismatch {
                        expected: func.return_type,
                        found: ty,
                        span: expr.1,
                    });
                }
                Ok(())
            }
            None => {
                if func.return_type != Type::Void {
                    return Err(SemaError::TypeMismatch {
                        expected: func.return_type,
                        found: Type::Void,
                        span: stmt.1,
                    });
                }
                Ok(())
            }
        },

        Stmt::Call(call) => {
            expr_type(module, func, call)?;
            Ok(())
        }
    }
}

/// Loops may not contain further loops, even through branches
fn find_nested_loop(stmts: &[Spanned<Stmt>]) -> Option<Span> {
    for stmt in stmts {
        match &stmt.0 {
            Stmt::While { .. } => return Some(stmt.1),
            Stmt::If { then_body, .. } => {
                if let Some(span) = find_nested_loop(then_body) {
                    return Some(span);
                }
            }
            Stmt::IfElse {
                then_body,
                else_body,
                ..
            } => {
                if let Some(span) = find_nested_loop(then_body) {
                    return Some(span);
                }
                if let Some(span) = find_nested_loop(else_body) {
                    return Some(span);
                }
            }
            _ => {}
        }
    }
    None
}

fn expect_int(module: &Module, func: &Function, expr: &Spanned<Expr>) -> Result<(), SemaError> {
    let ty = expr_type(module, func, expr)?;
    if ty != Type::Int {
        return Err(SemaError::TypeMismatch {
            expected: Type::Int,
            found: ty,
            span: expr.1,
        });
    }
    Ok(())
}

fn expr_type(module: &Module, func: &Function, expr: &Spanned<Expr>) -> Result<Type, SemaError> {
    match &expr.0 {
        Expr::Int(_) => Ok(Type::Int),
        Expr::Str(_) => Ok(Type::Str),

        Expr::Var(name) => func
            .variable_type(name)
            .ok_or_else(|| SemaError::UndefinedVariable {
                name: name.to_string(),
                span: expr.1,
            }),

        Expr::Index { name, index } => {
            let base = func
                .variable_type(name)
                .ok_or_else(|| SemaError::UndefinedVariable {
                    name: name.to_string(),
                    span: expr.1,
                })?;
            if base != Type::Array {
                return Err(SemaError::NotAnArray {
                    name: name.to_string(),
                    span: expr.1,
                });
            }
            expect_int(module, func, index)?;
            Ok(Type::Int)
        }

        Expr::Call { name, args } => {
            let (return_type, param_types) =
                module
                    .prototype(name)
                    .ok_or_else(|| SemaError::UndefinedFunction {
                        name: name.to_string(),
                        span: expr.1,
                    })?;
            if param_types.len() != args.len() {
                return Err(SemaError::ArityMismatch {
                    name: name.to_string(),
                    expected: param_types.len(),
                    found: args.len(),
                    span: expr.1,
                });
            }
            for (arg, expected) in args.iter().zip(param_types) {
                let found = expr_type(module, func, arg)?;
                if found != expected {
                    return Err(SemaError::TypeMismatch {
                        expected,
                        found,
                        span: arg.1,
                    });
                }
            }
            Ok(return_type)
        }

        Expr::Binary { lhs, rhs, .. } => {
            let lhs_ty = expr_type(module, func, lhs)?;
            let rhs_ty = expr_type(module, func, rhs)?;
            if lhs_ty != Type::Int || rhs_ty != Type::Int {
                return Err(SemaError::NonIntegerOperand { span: expr.1 });
            }
            Ok(Type::Int)
        }
    }
}
