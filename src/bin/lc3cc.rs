//! The `lc3cc` command-line driver (spec.md §6.3).
//!
//! Grounded on `parishoffman-smol/src/bin/smolc.rs`'s `Args`/`main` shape:
//! a `clap::Parser` struct read once at startup, a single file read, and a
//! pipeline call whose result is printed or written out.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use lc3cc::error::CompileError;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    #[arg(default_value = "testcases/1.c")]
    source_file: PathBuf,
    /// output file path (default: basename of source with `.asm` suffix)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// emit comments and blank lines for readability
    #[arg(short = 'g', long = "symbols", default_value_t = false)]
    symbols: bool,
}

fn default_output_path(source: &Path) -> PathBuf {
    source.with_extension("asm")
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args = Args::parse();

    let source = match std::fs::read_to_string(&args.source_file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: could not read {}: {e}", args.source_file.display());
            return ExitCode::from(1);
        }
    };

    let asm = match lc3cc::compile(&source, !args.symbols) {
        Ok(asm) => asm,
        Err(err) => {
            eprintln!("{}", render_error(&err, &source));
            return ExitCode::from(err.exit_code() as u8);
        }
    };

    let output_path = args.output.unwrap_or_else(|| default_output_path(&args.source_file));
    if let Err(e) = std::fs::write(&output_path, asm) {
        eprintln!("error: could not write {}: {e}", output_path.display());
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

/// Render a `CompileError` with a caret-pointing line when the error
/// carries a source coordinate (spec.md §6.3, §7).
fn render_error(err: &CompileError, source: &str) -> String {
    match err {
        CompileError::Parse(e) => e.caret_display(source),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_path_replaces_extension() {
        assert_eq!(default_output_path(Path::new("testcases/1.c")), PathBuf::from("testcases/1.asm"));
    }
}
