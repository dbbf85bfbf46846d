//! Compiler for the Kite language targeting x86-64.
//!
//! Kite is a small imperative language with integers, arrays and strings.
//! The compiler parses `.kite` sources, checks them, translates them to a
//! three-address IR, optimizes that to a fixed point, and emits scheduled,
//! register-allocated Intel-syntax assembly against a small runtime
//! (symbols prefixed `K_`; the runtime calls `K_main` and exits with its
//! result).
//!
//! See [`pipeline::compile`] for the end-to-end entry point.

pub mod backend;
pub mod common;
pub mod frontend;
pub mod pipeline;
