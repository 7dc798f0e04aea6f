use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod chunk;
pub mod cursor;
pub mod instruction;
pub mod pseudo;

pub use chunk::{Chunk, Constant, FileHeader, FunctionPrototype, Local, VarArgFlags, read_chunk};
pub use cursor::Endianness;
pub use instruction::{Instruction, OpMode, Opcode, Operand, Rk, decode};
pub use pseudo::{PseudoWriter, disassemble, generate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecompileMode {
    #[default]
    Pseudo,
    Disasm,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecompileOptions {
    pub mode: DecompileMode,
    pub emit_constants: bool,
}

#[derive(Debug, Error)]
pub enum DeluaError {
    #[error("not a Lua bytecode file (signature {0:02x?})")]
    InvalidSignature([u8; 4]),

    #[error("unsupported Lua bytecode version: 0x{0:02x} (only 0x51 is supported)")]
    UnsupportedVersion(u8),

    #[error("unexpected end of input at offset {offset} (needed {needed} bytes, {remaining} remaining)")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("invalid {field} width in header: {width}")]
    InvalidWidth { field: &'static str, width: u8 },

    #[error("unknown constant type tag: {0}")]
    UnknownConstantTag(u8),

    #[error("length {0} does not fit in memory")]
    LengthOverflow(u64),

    #[error("unsupported opcode {opcode} at pc={pc}")]
    UnsupportedOpcode { opcode: Opcode, pc: usize },

    #[error("unsupported operands for {opcode} at pc={pc}: {detail}")]
    UnsupportedOperand {
        opcode: Opcode,
        pc: usize,
        detail: &'static str,
    },

    #[error("invalid constant index {index} (constant table has {len} entries)")]
    InvalidConstIndex { index: u32, len: usize },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = DeluaError> = std::result::Result<T, E>;

pub fn write_chunk<W: Write>(chunk: &Chunk, options: DecompileOptions, mut out: W) -> Result<()> {
    match options.mode {
        DecompileMode::Pseudo => {
            let mut w = PseudoWriter::new(&mut out, options.emit_constants);
            w.write_chunk(&chunk.main)?;
        }
        DecompileMode::Disasm => disassemble(&chunk.main, &mut out)?,
        DecompileMode::Json => {
            serde_json::to_writer_pretty(&mut out, chunk)?;
            out.write_all(b"\n")?;
        }
    }
    out.flush()?;
    Ok(())
}

pub fn decompile_to_writer<W: Write>(bytecode: &[u8], options: DecompileOptions, out: W) -> Result<()> {
    let chunk = Chunk::read(bytecode)?;
    write_chunk(&chunk, options, out)
}

pub fn decompile_with_options(bytecode: &[u8], options: DecompileOptions) -> Result<String> {
    let mut buf = Vec::new();
    decompile_to_writer(bytecode, options, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub fn decompile(bytecode: &[u8]) -> Result<String> {
    decompile_with_options(bytecode, DecompileOptions::default())
}
