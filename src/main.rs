use clap::Parser;
use kite::backend::emit;
use kite::pipeline;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// Kite language compiler
#[derive(Parser)]
#[command(name = "kitec", version, about = "Compile Kite sources to x86-64 assembly")]
struct Cli {
    /// Source file to compile
    input: PathBuf,

    /// Output assembly file
    #[arg(default_value = "out.S")]
    output: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("error: cannot open {}: {}", cli.input.display(), error);
            return ExitCode::FAILURE;
        }
    };

    let filename = cli.input.display().to_string();
    let assembly = match pipeline::compile_and_report(&filename, &source) {
        Ok(assembly) => assembly,
        Err(()) => return ExitCode::FAILURE,
    };

    if let Err(error) = emit::write_assembly(&cli.output, &assembly) {
        eprintln!("error: {}", error);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
