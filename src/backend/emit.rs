//! Whole-module assembly emission.
//!
//! Produces one GAS-syntax `.S` text: `.intel_syntax noprefix`, a `.text`
//! section with every function, then a `.data` section listing the interned
//! string literals as zero-terminated byte runs.

use crate::backend::irgen::StringTable;
use crate::backend::mir::MachineFunction;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Render the final assembly text
pub fn emit_module(functions: &[MachineFunction], strings: &StringTable) -> String {
    let mut out = String::new();
    out.push_str(".intel_syntax noprefix\n");
    out.push_str(".text\n");
    for func in functions {
        func.emit(&mut out);
        out.push('\n');
    }
    out.push_str(".data\n");
    strings.emit(&mut out);
    out
}

/// Write the assembly to disk, surfacing I/O failures as a typed error
pub fn write_assembly(path: &Path, contents: &str) -> Result<(), EmitError> {
    fs::write(path, contents).map_err(|source| EmitError::Io {
        path: path.display().to_string(),
        source,
    })
}
