//! Byte-image builder for Lua 5.1 chunks used by the integration tests.

#![allow(dead_code)]

pub const MOVE: u8 = 0;
pub const LOADK: u8 = 1;
pub const GETGLOBAL: u8 = 5;
pub const CALL: u8 = 28;
pub const RETURN: u8 = 30;
pub const JMP: u8 = 22;
pub const CLOSURE: u8 = 36;

pub fn abc(op: u8, a: u32, b: u32, c: u32) -> u32 {
    op as u32 | (a << 6) | (c << 14) | (b << 23)
}

pub fn abx(op: u8, a: u32, bx: u32) -> u32 {
    op as u32 | (a << 6) | (bx << 14)
}

pub enum K {
    Nil,
    Bool(bool),
    Num(f64),
    Str(&'static [u8]),
}

pub struct Proto {
    pub source: &'static [u8],
    pub line: u32,
    pub last_line: u32,
    pub params: u8,
    pub code: Vec<u32>,
    pub constants: Vec<K>,
    pub children: Vec<Proto>,
    pub lines: Vec<u32>,
}

impl Proto {
    pub fn main(code: Vec<u32>) -> Self {
        Self {
            source: b"@test.lua\0",
            line: 0,
            last_line: 0,
            params: 0,
            code,
            constants: Vec::new(),
            children: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn function(line: u32, params: u8, code: Vec<u32>) -> Self {
        Self {
            source: b"",
            line,
            last_line: line + 1,
            params,
            ..Self::main(code)
        }
    }

    pub fn with_constants(mut self, constants: Vec<K>) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_child(mut self, child: Proto) -> Self {
        self.children.push(child);
        self
    }
}

/// Header for 4-byte int/size_t/instruction, 8-byte numbers, little endian.
pub const X86_HEADER: [u8; 12] = [0x1b, 0x4c, 0x75, 0x61, 0x51, 0x00, 0x01, 0x04, 0x04, 0x04, 0x08, 0x00];

pub fn chunk(main: &Proto) -> Vec<u8> {
    let mut out = X86_HEADER.to_vec();
    write_proto(&mut out, main);
    out
}

fn int(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn string(out: &mut Vec<u8>, s: &[u8]) {
    int(out, s.len() as u32);
    out.extend_from_slice(s);
}

fn write_proto(out: &mut Vec<u8>, p: &Proto) {
    string(out, p.source);
    int(out, p.line);
    int(out, p.last_line);
    out.extend_from_slice(&[0, p.params, 0, 8]);
    int(out, p.code.len() as u32);
    for w in &p.code {
        int(out, *w);
    }
    int(out, p.constants.len() as u32);
    for k in &p.constants {
        match k {
            K::Nil => out.push(0),
            K::Bool(b) => out.extend_from_slice(&[1, *b as u8]),
            K::Num(n) => {
                out.push(3);
                out.extend_from_slice(&n.to_le_bytes());
            }
            K::Str(s) => {
                out.push(4);
                string(out, s);
            }
        }
    }
    int(out, p.children.len() as u32);
    for c in &p.children {
        write_proto(out, c);
    }
    int(out, p.lines.len() as u32);
    for l in &p.lines {
        int(out, *l);
    }
    int(out, 0);
    int(out, 0);
}
