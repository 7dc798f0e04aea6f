use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_version};
use clap_complete::Shell;
use delua_lib::{DecompileMode, DecompileOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DecompileModeCli {
    /// Register-level pseudocode
    Pseudo,
    /// Annotated instruction listing
    Disasm,
    /// The parsed chunk as JSON
    Json,
}

impl From<DecompileModeCli> for DecompileMode {
    fn from(mode: DecompileModeCli) -> Self {
        match mode {
            DecompileModeCli::Pseudo => DecompileMode::Pseudo,
            DecompileModeCli::Disasm => DecompileMode::Disasm,
            DecompileModeCli::Json => DecompileMode::Json,
        }
    }
}

#[derive(Parser)]
#[command(name = "delua",
    version = crate_version!(),
    about = crate_description!(),
    args_conflicts_with_subcommands = true,
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<TopLevel>,

    /// Path to the Lua 5.1 bytecode file
    pub input: Option<PathBuf>,

    /// Path of the file to write
    pub output: Option<PathBuf>,

    /// Output mode
    #[arg(long, value_enum, default_value_t = DecompileModeCli::Pseudo)]
    pub mode: DecompileModeCli,

    /// List each function's constants before its body
    #[arg(long, default_value_t = false)]
    pub constants: bool,

    /// Log parsing progress to stderr
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    pub fn options(&self) -> DecompileOptions {
        DecompileOptions {
            mode: self.mode.into(),
            emit_constants: self.constants,
        }
    }
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}
