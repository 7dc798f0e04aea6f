use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::cursor::{Endianness, Reader};
use crate::instruction::{Instruction, decode};
use crate::DeluaError;

pub const SIGNATURE: [u8; 4] = *b"\x1bLua";
pub const LUA51_VERSION: u8 = 0x51;
pub const HEADER_SIZE: usize = 12;

const LUA_TNIL: u8 = 0;
const LUA_TBOOLEAN: u8 = 1;
const LUA_TNUMBER: u8 = 3;
const LUA_TSTRING: u8 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Nil,
    Bool(bool),
    Number(#[serde(with = "lua_number")] f64),
    String(String),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Nil => write!(f, "nil"),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Number(v) => write!(f, "{v}"),
            Constant::String(s) => write!(f, "\"{s}\""),
        }
    }
}

// JSON has no inf/nan, so non-finite numbers are written as strings.
mod lua_number {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            s.serialize_f64(*v)
        } else if v.is_nan() {
            s.serialize_str("nan")
        } else if v.is_sign_positive() {
            s.serialize_str("inf")
        } else {
            s.serialize_str("-inf")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Finite(f64),
        Special(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Finite(v) => Ok(v),
            Repr::Special(s) => match s.as_str() {
                "nan" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid number {other:?}"))),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Local {
    pub name: String,
    pub start_pc: i64,
    pub end_pc: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VarArgFlags(pub u8);

impl VarArgFlags {
    pub const HAS: u8 = 1;
    pub const IS: u8 = 2;
    pub const NEEDS: u8 = 4;

    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }
}

impl fmt::Display for VarArgFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [(Self::HAS, "has"), (Self::IS, "is"), (Self::NEEDS, "needs")]
            .into_iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, n)| n)
            .collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub version: u8,
    pub format: u8,
    pub endianness: Endianness,
    pub int_size: u8,
    pub size_t_size: u8,
    pub instruction_size: u8,
    pub number_size: u8,
    pub integral: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionPrototype {
    pub source_name: String,
    pub line_defined: i64,
    pub last_line_defined: i64,
    pub num_upvalues: u8,
    pub num_params: u8,
    pub vararg: VarArgFlags,
    pub max_stack_size: u8,
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub prototypes: Vec<FunctionPrototype>,
    /// 0-based source line per instruction.
    pub line_info: Vec<i64>,
    pub locals: Vec<Local>,
    pub upvalue_names: Vec<String>,
}

impl FunctionPrototype {
    /// The main chunk is the only prototype with both line markers at zero.
    pub fn is_main(&self) -> bool {
        self.line_defined == 0 && self.last_line_defined == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub header: FileHeader,
    pub main: FunctionPrototype,
}

impl Chunk {
    pub fn read(bytes: &[u8]) -> Result<Chunk, DeluaError> {
        let mut r = Reader::new(bytes);
        let header = read_header(&mut r)?;
        r.set_order(header.endianness);
        let main = read_function(&mut r, &header)?;
        if r.remaining() != 0 {
            debug!(trailing = r.remaining(), "ignoring bytes after main prototype");
        }
        Ok(Chunk { header, main })
    }
}

pub fn read_chunk(bytes: &[u8]) -> Result<FunctionPrototype, DeluaError> {
    Chunk::read(bytes).map(|c| c.main)
}

fn read_header(r: &mut Reader<'_>) -> Result<FileHeader, DeluaError> {
    let sig = r.get_bytes(4)?;
    if sig != SIGNATURE {
        let mut got = [0u8; 4];
        got.copy_from_slice(sig);
        return Err(DeluaError::InvalidSignature(got));
    }

    let version = r.get_u8()?;
    if version != LUA51_VERSION {
        return Err(DeluaError::UnsupportedVersion(version));
    }

    let rest = r.get_bytes(HEADER_SIZE - 5)?;
    let header = FileHeader {
        version,
        format: rest[0],
        endianness: if rest[1] != 0 {
            Endianness::Little
        } else {
            Endianness::Big
        },
        int_size: check_width("int", rest[2])?,
        size_t_size: check_width("size_t", rest[3])?,
        instruction_size: match rest[4] {
            4 => 4,
            width => return Err(DeluaError::InvalidWidth { field: "instruction", width }),
        },
        number_size: match rest[5] {
            4 | 8 => rest[5],
            width => return Err(DeluaError::InvalidWidth { field: "lua_Number", width }),
        },
        integral: rest[6] != 0,
    };
    debug!(?header, "read chunk header");
    Ok(header)
}

fn check_width(field: &'static str, width: u8) -> Result<u8, DeluaError> {
    if (1..=8).contains(&width) {
        Ok(width)
    } else {
        Err(DeluaError::InvalidWidth { field, width })
    }
}

fn read_count(r: &mut Reader<'_>, h: &FileHeader) -> Result<usize, DeluaError> {
    let n = r.get_uint(h.int_size)?;
    usize::try_from(n).map_err(|_| DeluaError::LengthOverflow(n))
}

// Counts come from the file. Each element needs at least `min_encoded`
// bytes of input, which bounds what may be reserved up front.
fn with_capacity_for<T>(r: &Reader<'_>, count: usize, min_encoded: usize) -> Vec<T> {
    Vec::with_capacity(count.min(r.remaining() / min_encoded.max(1)))
}

// Empty source string, two line fields, four bytes, six empty sections.
fn min_prototype_size(h: &FileHeader) -> usize {
    h.size_t_size as usize + 8 * h.int_size as usize + 4
}

fn read_string(r: &mut Reader<'_>, h: &FileHeader) -> Result<String, DeluaError> {
    let len = r.get_uint(h.size_t_size)?;
    let len = usize::try_from(len).map_err(|_| DeluaError::LengthOverflow(len))?;
    let mut bytes = r.get_bytes(len)?;
    if let [head @ .., 0] = bytes {
        bytes = head;
    }
    Ok(bytes.iter().map(|&b| b as char).collect())
}

fn read_constant(r: &mut Reader<'_>, h: &FileHeader) -> Result<Constant, DeluaError> {
    let tag = r.get_u8()?;
    Ok(match tag {
        LUA_TNIL => Constant::Nil,
        LUA_TBOOLEAN => Constant::Bool(r.get_u8()? != 0),
        LUA_TNUMBER => Constant::Number(match h.number_size {
            4 => r.get_f32()? as f64,
            _ => r.get_f64()?,
        }),
        LUA_TSTRING => Constant::String(read_string(r, h)?),
        _ => return Err(DeluaError::UnknownConstantTag(tag)),
    })
}

fn read_function(r: &mut Reader<'_>, h: &FileHeader) -> Result<FunctionPrototype, DeluaError> {
    let source_name = read_string(r, h)?;
    let line_defined = r.get_int(h.int_size)?;
    let last_line_defined = r.get_int(h.int_size)?;
    let num_upvalues = r.get_u8()?;
    let num_params = r.get_u8()?;
    let vararg = VarArgFlags(r.get_u8()?);
    let max_stack_size = r.get_u8()?;

    let count = read_count(r, h)?;
    let mut instructions = with_capacity_for(r, count, h.instruction_size as usize);
    for pc in 0..count {
        let word = r.get_u32()?;
        let ins = decode(word);
        trace!(pc, "{ins}");
        instructions.push(ins);
    }

    let count = read_count(r, h)?;
    let mut constants = with_capacity_for(r, count, 1);
    for _ in 0..count {
        constants.push(read_constant(r, h)?);
    }

    let count = read_count(r, h)?;
    let mut prototypes = with_capacity_for(r, count, min_prototype_size(h));
    for _ in 0..count {
        prototypes.push(read_function(r, h)?);
    }

    let count = read_count(r, h)?;
    let mut line_info = with_capacity_for(r, count, h.int_size as usize);
    for _ in 0..count {
        line_info.push(r.get_int(h.int_size)?.saturating_sub(1));
    }

    let count = read_count(r, h)?;
    let mut locals = with_capacity_for(r, count, h.size_t_size as usize + 2 * h.int_size as usize);
    for _ in 0..count {
        let name = read_string(r, h)?;
        let start_pc = r.get_int(h.int_size)?;
        let end_pc = r.get_int(h.int_size)?;
        locals.push(Local {
            name,
            start_pc,
            end_pc,
        });
    }

    let count = read_count(r, h)?;
    let mut upvalue_names = with_capacity_for(r, count, h.size_t_size as usize);
    for _ in 0..count {
        upvalue_names.push(read_string(r, h)?);
    }

    debug!(
        source = %source_name,
        line_defined,
        last_line_defined,
        instructions = instructions.len(),
        constants = constants.len(),
        children = prototypes.len(),
        "read function prototype"
    );

    Ok(FunctionPrototype {
        source_name,
        line_defined,
        last_line_defined,
        num_upvalues,
        num_params,
        vararg,
        max_stack_size,
        instructions,
        constants,
        prototypes,
        line_info,
        locals,
        upvalue_names,
    })
}
