mod ast;
mod backend;
mod codegen;
mod error;
mod ir;
mod jit;
mod lexer;
#[cfg(feature = "llvm")]
mod llvm;
mod operator;
mod parser;
mod token;
mod toplevel;

use backend::Backend;
use clap::Parser;
use jit::Jit;
use lexer::Lexer;
use std::path::PathBuf;
use toplevel::Driver;

/// A simple kaleidoscope interpreter
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Run the forms in PATH before reading from stdin
    #[arg(short = 'i', long = "include-file", value_name = "PATH")]
    include_file: Vec<PathBuf>,

    /// Compile through LLVM's MCJIT instead of the built-in interpreter
    #[cfg(feature = "llvm")]
    #[arg(long)]
    llvm: bool,
}

fn run<B: Backend, J: Jit<Module = B::Module>>(mut driver: Driver<B, J>, includes: &[PathBuf]) {
    for path in includes {
        if let Err(e) = driver.include_file(path) {
            eprintln!("ERROR: {}", e);
        }
    }
    driver.main_loop(true);
}

fn main() {
    let cli = Cli::parse();

    #[cfg(feature = "llvm")]
    {
        if cli.llvm {
            match Driver::llvm(Lexer::stdin()) {
                Ok(driver) => run(driver, &cli.include_file),
                Err(e) => eprintln!("ERROR: {}", e),
            }
            return;
        }
    }

    run(Driver::new(Lexer::stdin()), &cli.include_file);
}
