//! Kite compiler back-end.
//!
//! The pipeline per function, after the front-end hands over a checked AST:
//!
//! ```text
//! AST ──irgen──▶ TAC-IR ──opt──▶ TAC-IR ──lower──▶ machine IR
//!                                  │
//!                 scheduler ◀──────┘
//!                     │
//!                 regalloc + fixups ──▶ emit (.S text)
//! ```
//!
//! - `ir`: the three-address representation, its builder and interpreter
//! - `dataflow`: the generic worklist solver used by `opt` and `regalloc`
//! - `opt`: machine-independent optimizations run to a fixed point
//! - `mir`: the x86-64 machine representation
//! - `lower`, `sched`, `regalloc`, `emit`: the machine-dependent stages

pub mod dataflow;
pub mod emit;
pub mod ir;
pub mod irgen;
pub mod lower;
pub mod mir;
pub mod opt;
pub mod regalloc;
pub mod sched;
