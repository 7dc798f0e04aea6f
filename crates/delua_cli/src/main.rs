use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use delua_lib::{Chunk, DecompileOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, TopLevel};

mod cli;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
        }
        None => match (&cli.input, &cli.output) {
            (Some(input), Some(output)) => {
                if let Err(e) = run(input, output, cli.options()) {
                    eprintln!("error: {e:#}");
                    std::process::exit(1);
                }
            }
            _ => {
                let _ = Cli::command().print_help();
            }
        },
    }
}

/// `RUST_LOG` wins over `--verbose` when set.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Parses `input` fully, then streams the rendering into `output`.
///
/// The output file is only created once the chunk parsed. Lines written
/// before a generation failure are flushed to disk before the error is
/// returned.
fn run(input: &Path, output: &Path, options: DecompileOptions) -> Result<()> {
    let bytes = fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let chunk = Chunk::read(&bytes).with_context(|| format!("failed to parse {}", input.display()))?;
    info!(functions = count_functions(&chunk), "parsed {}", input.display());

    let file = File::create(output).with_context(|| format!("failed to create {}", output.display()))?;
    let mut out = BufWriter::new(file);
    let rendered = delua_lib::write_chunk(&chunk, options, &mut out);
    let flushed = out.flush();
    rendered.with_context(|| format!("failed to decompile {}", input.display()))?;
    flushed.with_context(|| format!("failed to write {}", output.display()))?;

    info!("wrote {}", output.display());
    Ok(())
}

fn count_functions(chunk: &Chunk) -> usize {
    let mut count = 0;
    let mut stack = vec![&chunk.main];
    while let Some(f) = stack.pop() {
        count += 1;
        stack.extend(f.prototypes.iter());
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use delua_lib::DecompileMode;

    // Little-endian x86 header followed by a vararg main function with no
    // debug info.
    fn image(code: &[u32], constants: &[&[u8]]) -> Vec<u8> {
        let mut b = vec![0x1b, 0x4c, 0x75, 0x61, 0x51, 0x00, 0x01, 0x04, 0x04, 0x04, 0x08, 0x00];
        b.extend_from_slice(&0u32.to_le_bytes()); // source
        b.extend_from_slice(&0i32.to_le_bytes());
        b.extend_from_slice(&0i32.to_le_bytes());
        b.extend_from_slice(&[0, 0, 2, 4]);
        b.extend_from_slice(&(code.len() as u32).to_le_bytes());
        for w in code {
            b.extend_from_slice(&w.to_le_bytes());
        }
        b.extend_from_slice(&(constants.len() as u32).to_le_bytes());
        for s in constants {
            b.push(4);
            b.extend_from_slice(&(s.len() as u32).to_le_bytes());
            b.extend_from_slice(s);
        }
        b.extend_from_slice(&0u32.to_le_bytes()); // prototypes
        b.extend_from_slice(&0u32.to_le_bytes()); // line info
        b.extend_from_slice(&0u32.to_le_bytes()); // locals
        b.extend_from_slice(&0u32.to_le_bytes()); // upvalues
        b
    }

    const MOVE_0_1: u32 = 1 << 23;
    const RETURN_0_1: u32 = 30 | (1 << 23);
    const LOADK_0_0: u32 = 1;
    const CLOSURE_0_0: u32 = 36;

    #[test]
    fn writes_pseudocode_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.luac");
        let output = dir.path().join("out.lua");
        fs::write(&input, image(&[LOADK_0_0, RETURN_0_1], &[b"hi\0"])).unwrap();

        run(&input, &output, DecompileOptions::default()).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "var0 = \"hi\"\nreturn\n");
    }

    #[test]
    fn keeps_lines_written_before_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.luac");
        let output = dir.path().join("out.lua");
        fs::write(&input, image(&[MOVE_0_1, CLOSURE_0_0, RETURN_0_1], &[])).unwrap();

        let err = run(&input, &output, DecompileOptions::default()).unwrap_err();
        assert!(format!("{err:#}").contains("unsupported opcode CLOSURE at pc=1"), "{err:#}");
        assert_eq!(fs::read_to_string(&output).unwrap(), "var0 = var1\n");
    }

    #[test]
    fn parse_failure_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.luac");
        let output = dir.path().join("out.lua");
        let mut bytes = image(&[RETURN_0_1], &[]);
        bytes[4] = 0x50;
        fs::write(&input, bytes).unwrap();

        let err = run(&input, &output, DecompileOptions::default()).unwrap_err();
        assert!(format!("{err:#}").contains("0x50"), "{err:#}");
        assert!(!output.exists());
    }

    #[test]
    fn missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(
            &dir.path().join("absent.luac"),
            &dir.path().join("out.lua"),
            DecompileOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("failed to read"));
    }

    #[test]
    fn disasm_mode_writes_listing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.luac");
        let output = dir.path().join("out.txt");
        fs::write(&input, image(&[MOVE_0_1, RETURN_0_1], &[])).unwrap();

        let options = DecompileOptions {
            mode: DecompileMode::Disasm,
            emit_constants: false,
        };
        run(&input, &output, options).unwrap();
        let text = fs::read_to_string(&output).unwrap();
        assert!(text.starts_with("function main "), "{text}");
        assert!(text.contains("MOVE"), "{text}");
    }

    #[test]
    fn counts_nested_functions() {
        let chunk = Chunk::read(&image(&[RETURN_0_1], &[])).unwrap();
        assert_eq!(count_functions(&chunk), 1);
    }
}
