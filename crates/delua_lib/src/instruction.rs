use std::fmt;

use serde::{Deserialize, Serialize};

// LSB 6      8         9         9  MSB
// |------|--------|---------|---------|
// |opcode|   A    |    C    |    B    |
// |opcode|   A    |     Bx or sBx     |
const SIZE_OP: u32 = 6;
const SIZE_A: u32 = 8;
const SIZE_C: u32 = 9;
const POS_A: u32 = SIZE_OP;
const POS_C: u32 = POS_A + SIZE_A;
const POS_B: u32 = POS_C + SIZE_C;

const MASK_OP: u32 = 0x3f;
const MASK_A: u32 = 0xff;
const MASK_BC: u32 = 0x1ff;
const MASK_BX: u32 = 0x3ffff;

pub const SBX_BIAS: i32 = 131072;

/// Bit 8 of a B/C operand selects the constant table.
pub const BIT_RK: u16 = 1 << 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Move,
    LoadK,
    LoadBool,
    LoadNil,
    GetUpVal,
    GetGlobal,
    GetTable,
    SetGlobal,
    SetUpVal,
    SetTable,
    NewTable,
    Self_,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Not,
    Len,
    Concat,
    Jmp,
    Eq,
    Lt,
    Le,
    Test,
    TestSet,
    Call,
    TailCall,
    Return,
    ForLoop,
    ForPrep,
    TForLoop,
    SetList,
    Close,
    Closure,
    VarArg,
    /// Any 6-bit code past `VarArg`.
    Unknown(u8),
}

/// Which fields of the word an opcode reads beyond A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpMode {
    Abc,
    ABx,
    AsBx,
}

#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub op: Opcode,
    pub name: &'static str,
    pub mode: OpMode,
}

// Indexed by the 6-bit opcode field.
static OPCODE_INFO: &[OpInfo] = &[
    OpInfo { op: Opcode::Move, name: "MOVE", mode: OpMode::Abc },
    OpInfo { op: Opcode::LoadK, name: "LOADK", mode: OpMode::ABx },
    OpInfo { op: Opcode::LoadBool, name: "LOADBOOL", mode: OpMode::Abc },
    OpInfo { op: Opcode::LoadNil, name: "LOADNIL", mode: OpMode::Abc },
    OpInfo { op: Opcode::GetUpVal, name: "GETUPVAL", mode: OpMode::Abc },
    OpInfo { op: Opcode::GetGlobal, name: "GETGLOBAL", mode: OpMode::ABx },
    OpInfo { op: Opcode::GetTable, name: "GETTABLE", mode: OpMode::Abc },
    OpInfo { op: Opcode::SetGlobal, name: "SETGLOBAL", mode: OpMode::ABx },
    OpInfo { op: Opcode::SetUpVal, name: "SETUPVAL", mode: OpMode::Abc },
    OpInfo { op: Opcode::SetTable, name: "SETTABLE", mode: OpMode::Abc },
    OpInfo { op: Opcode::NewTable, name: "NEWTABLE", mode: OpMode::Abc },
    OpInfo { op: Opcode::Self_, name: "SELF", mode: OpMode::Abc },
    OpInfo { op: Opcode::Add, name: "ADD", mode: OpMode::Abc },
    OpInfo { op: Opcode::Sub, name: "SUB", mode: OpMode::Abc },
    OpInfo { op: Opcode::Mul, name: "MUL", mode: OpMode::Abc },
    OpInfo { op: Opcode::Div, name: "DIV", mode: OpMode::Abc },
    OpInfo { op: Opcode::Mod, name: "MOD", mode: OpMode::Abc },
    OpInfo { op: Opcode::Pow, name: "POW", mode: OpMode::Abc },
    OpInfo { op: Opcode::Unm, name: "UNM", mode: OpMode::Abc },
    OpInfo { op: Opcode::Not, name: "NOT", mode: OpMode::Abc },
    OpInfo { op: Opcode::Len, name: "LEN", mode: OpMode::Abc },
    OpInfo { op: Opcode::Concat, name: "CONCAT", mode: OpMode::Abc },
    OpInfo { op: Opcode::Jmp, name: "JMP", mode: OpMode::AsBx },
    OpInfo { op: Opcode::Eq, name: "EQ", mode: OpMode::Abc },
    OpInfo { op: Opcode::Lt, name: "LT", mode: OpMode::Abc },
    OpInfo { op: Opcode::Le, name: "LE", mode: OpMode::Abc },
    OpInfo { op: Opcode::Test, name: "TEST", mode: OpMode::Abc },
    OpInfo { op: Opcode::TestSet, name: "TESTSET", mode: OpMode::Abc },
    OpInfo { op: Opcode::Call, name: "CALL", mode: OpMode::Abc },
    OpInfo { op: Opcode::TailCall, name: "TAILCALL", mode: OpMode::Abc },
    OpInfo { op: Opcode::Return, name: "RETURN", mode: OpMode::Abc },
    OpInfo { op: Opcode::ForLoop, name: "FORLOOP", mode: OpMode::AsBx },
    OpInfo { op: Opcode::ForPrep, name: "FORPREP", mode: OpMode::AsBx },
    OpInfo { op: Opcode::TForLoop, name: "TFORLOOP", mode: OpMode::Abc },
    OpInfo { op: Opcode::SetList, name: "SETLIST", mode: OpMode::Abc },
    OpInfo { op: Opcode::Close, name: "CLOSE", mode: OpMode::Abc },
    OpInfo { op: Opcode::Closure, name: "CLOSURE", mode: OpMode::ABx },
    OpInfo { op: Opcode::VarArg, name: "VARARG", mode: OpMode::Abc },
];

pub fn opcode_info(code: u8) -> Option<&'static OpInfo> {
    OPCODE_INFO.get(code as usize)
}

impl Opcode {
    pub fn from_code(code: u8) -> Self {
        opcode_info(code).map_or(Opcode::Unknown(code), |i| i.op)
    }

    pub fn code(self) -> u8 {
        match self {
            Opcode::Unknown(code) => code,
            op => OPCODE_INFO
                .iter()
                .position(|i| i.op == op)
                .map_or(u8::MAX, |p| p as u8),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Unknown(_) => "UNKNOWN",
            op => opcode_info(op.code()).map_or("UNKNOWN", |i| i.name),
        }
    }

    pub fn mode(self) -> OpMode {
        match self {
            Opcode::Unknown(_) => OpMode::Abc,
            op => opcode_info(op.code()).map_or(OpMode::Abc, |i| i.mode),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Unknown(code) => write!(f, "UNKNOWN({code})"),
            op => f.write_str(op.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Abc { b: u16, c: u16 },
    Bx(u32),
    SBx(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub raw: u32,
    pub op: Opcode,
    pub a: u8,
    pub operand: Operand,
}

impl Instruction {
    /// Raw B field, regardless of the opcode's mode.
    pub fn b(&self) -> u16 {
        ((self.raw >> POS_B) & MASK_BC) as u16
    }

    /// Raw C field, regardless of the opcode's mode.
    pub fn c(&self) -> u16 {
        ((self.raw >> POS_C) & MASK_BC) as u16
    }

    pub fn bx(&self) -> u32 {
        (((self.b() as u32) << SIZE_C) | self.c() as u32) & MASK_BX
    }

    pub fn sbx(&self) -> i32 {
        self.bx() as i32 - SBX_BIAS
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.op.to_string();
        match self.operand {
            Operand::Abc { b, c } => write!(f, "{:<10} {} {} {}", name, self.a, b, c),
            Operand::Bx(bx) => write!(f, "{:<10} {} {}", name, self.a, bx),
            Operand::SBx(sbx) => write!(f, "{:<10} {} {}", name, self.a, sbx),
        }
    }
}

/// Decodes one instruction word. Total: codes without a table entry become
/// `Opcode::Unknown` with plain A/B/C operands.
pub fn decode(word: u32) -> Instruction {
    let op = Opcode::from_code((word & MASK_OP) as u8);
    let a = ((word >> POS_A) & MASK_A) as u8;
    let mut ins = Instruction {
        raw: word,
        op,
        a,
        operand: Operand::Abc { b: 0, c: 0 },
    };
    ins.operand = match op.mode() {
        OpMode::Abc => Operand::Abc {
            b: ins.b(),
            c: ins.c(),
        },
        OpMode::ABx => Operand::Bx(ins.bx()),
        OpMode::AsBx => Operand::SBx(ins.sbx()),
    };
    ins
}

/// A B/C operand that addresses either a register or a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rk {
    Register(u16),
    Constant(u16),
}

impl Rk {
    pub fn decode(value: u16) -> Rk {
        if value & BIT_RK != 0 {
            Rk::Constant(value & !BIT_RK)
        } else {
            Rk::Register(value)
        }
    }
}
