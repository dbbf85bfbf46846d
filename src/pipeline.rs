//! End-to-end compilation pipeline.
//!
//! ```text
//! Source (&str)
//!     │
//!     ▼ lexer
//! Tokens (Vec<Spanned<Token>>)
//!     │
//!     ▼ parser
//! AST (Module)
//!     │
//!     ▼ sema
//! Checked AST
//!     │
//!     ▼ irgen
//! TAC-IR ──▶ optimizer (fixed point) ──▶ verify
//!     │
//!     ▼ lower / schedule / allocate
//! Machine IR
//!     │
//!     ▼ emit
//! Assembly text (String)
//! ```
//!
//! Functions are compiled independently; only the string-literal table is
//! shared across them.

use crate::backend::emit::{self, EmitError};
use crate::backend::ir::VerifyError;
use crate::backend::irgen;
use crate::backend::lower::lower_function;
use crate::backend::opt::{self, OptConfig};
use crate::backend::regalloc::{allocate_function, AllocError};
use crate::backend::sched::schedule_function;
use crate::common::ast;
use crate::common::ast::Type;
use crate::common::span::Span;
use crate::frontend::lexer::lexer;
use crate::frontend::parser::program_parser;
use crate::frontend::report::report_sema_error;
use crate::frontend::sema::{self, SemaError};
use chumsky::prelude::*;
use log::debug;
use thiserror::Error;

/// Compilation error types
#[derive(Debug, Error)]
pub enum CompileError {
    /// Tokenization failed
    #[error("lex error: {0}")]
    Lex(String),
    /// Syntax errors
    #[error("parse error: {0}")]
    Parse(String),
    /// Semantic errors
    #[error("semantic error: {0}")]
    Semantic(#[from] SemaError),
    /// Generated IR failed verification (a compiler bug)
    #[error("IR verification failed: {0}")]
    IrVerify(#[from] VerifyError),
    /// Register allocation reported failure
    #[error("register allocation failed: {0}")]
    Allocation(#[from] AllocError),
    /// Writing the output file failed
    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// Register the runtime API prototypes on a parsed module
pub fn register_runtime(module: &mut ast::Module) {
    module.add_external("printi", (Type::Void, vec![Type::Int]));
    module.add_external("prints", (Type::Void, vec![Type::Str]));
    module.add_external("inputi", (Type::Int, vec![]));
    module.add_external("inputs", (Type::Str, vec![]));
    module.add_external("random", (Type::Int, vec![]));
    module.add_external("array_new", (Type::Array, vec![Type::Int]));
}

/// Compile source text to assembly.
///
/// This is the main entry point for the compiler pipeline.
pub fn compile(source: &str) -> Result<String, CompileError> {
    // Stage 1: lexical analysis
    let tokens = lexer().parse(source).into_result().map_err(|errors| {
        CompileError::Lex(
            errors
                .iter()
                .map(|e| format!("{:?}", e))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    // Stage 2: parsing
    let eoi: Span = (source.len()..source.len()).into();
    let token_stream = tokens.as_slice().map(eoi, |(t, s)| (t, s));
    let mut ast = program_parser()
        .parse(token_stream)
        .into_result()
        .map_err(|errors| {
            CompileError::Parse(
                errors
                    .iter()
                    .map(|e| format!("{:?}", e))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        })?;

    // Stage 3: semantic checks against the runtime prototypes
    register_runtime(&mut ast);
    sema::check_module(&ast)?;

    // Stage 4: translate to TAC-IR and optimize to a fixed point
    let (mut ir_module, strings) = irgen::generate_module(&ast);
    let config = OptConfig::all();
    for func in ir_module.functions_mut() {
        opt::optimize_function(func, &config);
        func.verify()?;
        debug!("optimized IR:\n{}", func);
    }

    // Stage 5: lower, schedule and allocate each function
    let mut machine_functions = Vec::new();
    for func in ir_module.functions() {
        let mut mf = lower_function(func);
        schedule_function(&mut mf);
        allocate_function(&mut mf)?;
        machine_functions.push(mf);
    }

    // Stage 6: emit text
    Ok(emit::emit_module(&machine_functions, &strings))
}

/// Compile and print pretty diagnostics on failure
#[allow(clippy::result_unit_err)]
pub fn compile_and_report(filename: &str, source: &str) -> Result<String, ()> {
    match compile(source) {
        Ok(assembly) => Ok(assembly),
        Err(CompileError::Lex(msg)) => {
            eprintln!("lex errors in {}:\n{}", filename, msg);
            Err(())
        }
        Err(CompileError::Parse(msg)) => {
            eprintln!("parse errors in {}:\n{}", filename, msg);
            Err(())
        }
        Err(CompileError::Semantic(error)) => {
            report_sema_error(filename, source, &error);
            Err(())
        }
        Err(error) => {
            eprintln!("error: {}", error);
            Err(())
        }
    }
}
