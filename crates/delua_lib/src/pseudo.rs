use std::io::Write;

use tracing::debug;

use crate::chunk::{Constant, FunctionPrototype};
use crate::instruction::{Instruction, Opcode, Operand, Rk};
use crate::DeluaError;

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    Line(String),
    Block { head: String, body: Vec<Stmt> },
}

fn var(r: impl std::fmt::Display) -> String {
    format!("var{r}")
}

fn constant(f: &FunctionPrototype, index: u32) -> Result<&Constant, DeluaError> {
    f.constants
        .get(index as usize)
        .ok_or(DeluaError::InvalidConstIndex {
            index,
            len: f.constants.len(),
        })
}

fn rk(f: &FunctionPrototype, value: u16) -> Result<String, DeluaError> {
    Ok(match Rk::decode(value) {
        Rk::Register(r) => var(r),
        Rk::Constant(k) => constant(f, k as u32)?.to_string(),
    })
}

fn binary_op(op: Opcode) -> Option<&'static str> {
    Some(match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Mod => "%",
        Opcode::Pow => "^",
        _ => return None,
    })
}

fn compare_op(op: Opcode) -> Option<&'static str> {
    Some(match op {
        Opcode::Eq => "==",
        Opcode::Lt => "<",
        Opcode::Le => "<=",
        _ => return None,
    })
}

fn lower_call(pc: usize, ins: &Instruction) -> Result<String, DeluaError> {
    let (a, b, c) = (ins.a as u32, ins.b() as u32, ins.c() as u32);
    if c == 0 {
        return Err(DeluaError::UnsupportedOperand {
            opcode: ins.op,
            pc,
            detail: "C == 0 (results up to top of stack)",
        });
    }
    if b == 0 {
        return Err(DeluaError::UnsupportedOperand {
            opcode: ins.op,
            pc,
            detail: "B == 0 (arguments up to top of stack)",
        });
    }

    let mut out = String::new();
    if c >= 2 {
        let rets: Vec<String> = (a..=a + c - 2).map(var).collect();
        out.push_str(&rets.join(", "));
        out.push_str(" = ");
    }
    let args: Vec<String> = (a + 1..a + b).map(var).collect();
    out.push_str(&format!("{}({})", var(a), args.join(", ")));
    Ok(out)
}

fn lower_instruction(f: &FunctionPrototype, pc: usize, ins: &Instruction) -> Result<Vec<Stmt>, DeluaError> {
    let a = ins.a as u32;
    let (b, c) = (ins.b(), ins.c());
    let line = |s: String| -> Result<Vec<Stmt>, DeluaError> { Ok(vec![Stmt::Line(s)]) };

    match ins.op {
        Opcode::Move => line(format!("{} = {}", var(a), var(b))),
        Opcode::LoadK => line(format!("{} = {}", var(a), constant(f, ins.bx())?)),
        Opcode::LoadBool => line(format!("{} = {}", var(a), b != 0)),
        Opcode::LoadNil => Ok((a..=b as u32).map(|x| Stmt::Line(format!("{} = nil", var(x)))).collect()),
        Opcode::GetUpVal => line(format!("{} = upvalue[{}]", var(a), b)),
        Opcode::GetGlobal => line(format!("{} = _G[{}]", var(a), constant(f, ins.bx())?)),
        Opcode::GetTable => line(format!("{} = {}[{}]", var(a), var(b), rk(f, c)?)),
        Opcode::SetGlobal => line(format!("_G[{}] = {}", constant(f, ins.bx())?, var(a))),
        Opcode::SetUpVal => line(format!("upvalue[{}] = {}", b, var(a))),
        Opcode::SetTable => line(format!("{}[{}] = {}", var(a), rk(f, b)?, rk(f, c)?)),
        Opcode::NewTable => line(format!("{} = {{}}", var(a))),
        Opcode::Self_ => Ok(vec![
            Stmt::Line(format!("{} = {}", var(a + 1), var(b))),
            Stmt::Line(format!("{} = {}[{}]", var(a), var(b), rk(f, c)?)),
        ]),
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::Pow => {
            let sym = binary_op(ins.op).unwrap_or("?");
            line(format!("{} = {} {} {}", var(a), var(b), sym, var(c)))
        }
        Opcode::Unm => line(format!("{} = -{}", var(a), var(b))),
        Opcode::Not => line(format!("{} = not {}", var(a), var(b))),
        Opcode::Len => line(format!("{} = #{}", var(a), var(b))),
        Opcode::Concat => {
            let parts: Vec<String> = (b..c).map(var).chain(std::iter::once(var(c))).collect();
            line(format!("{} = {}", var(a), parts.join(" .. ")))
        }
        // The paired JMP is rejected below, so these never get an `end`.
        Opcode::Eq | Opcode::Lt | Opcode::Le => {
            let sym = compare_op(ins.op).unwrap_or("?");
            line(format!("if ({} {} {}) ~= {} then", rk(f, b)?, sym, rk(f, c)?, a))
        }
        Opcode::Test => line(format!("if not {} <=> {} then", var(a), c)),
        Opcode::TestSet => Ok(vec![Stmt::Block {
            head: format!("if {} <=> {} then", var(b), c),
            body: vec![Stmt::Line(format!("{} = {}", var(a), var(b)))],
        }]),
        Opcode::Call => line(lower_call(pc, ins)?),
        Opcode::Return => line("return".to_string()),
        Opcode::Jmp
        | Opcode::TailCall
        | Opcode::ForLoop
        | Opcode::ForPrep
        | Opcode::TForLoop
        | Opcode::SetList
        | Opcode::Close
        | Opcode::Closure
        | Opcode::VarArg
        | Opcode::Unknown(_) => Err(DeluaError::UnsupportedOpcode { opcode: ins.op, pc }),
    }
}

// `func<N>` numbering is pre-order and restarts with every `write_chunk`.
pub struct PseudoWriter<W: Write> {
    out: W,
    next_func: u32,
    emit_constants: bool,
}

impl<W: Write> PseudoWriter<W> {
    pub fn new(out: W, emit_constants: bool) -> Self {
        Self {
            out,
            next_func: 0,
            emit_constants,
        }
    }

    pub fn write_chunk(&mut self, main: &FunctionPrototype) -> Result<(), DeluaError> {
        self.next_func = 0;
        self.write_function(main, 0)
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_function(&mut self, f: &FunctionPrototype, depth: usize) -> Result<(), DeluaError> {
        if f.is_main() {
            return self.write_body(f, depth);
        }

        let name = format!("func{}", self.next_func);
        self.next_func += 1;
        debug!(%name, line = f.line_defined, params = f.num_params, "emitting function");

        let params: Vec<String> = (0..f.num_params).map(|i| format!("arg{i}")).collect();
        self.line(depth, &format!("function {}({})", name, params.join(", ")))?;
        self.write_body(f, depth + 1)?;
        self.line(depth, "end")
    }

    fn write_body(&mut self, f: &FunctionPrototype, depth: usize) -> Result<(), DeluaError> {
        if self.emit_constants {
            for (i, k) in f.constants.iter().enumerate() {
                self.line(depth, &format!("const{i} = {k}"))?;
            }
        }
        for child in &f.prototypes {
            self.write_function(child, depth)?;
        }
        for (pc, ins) in f.instructions.iter().enumerate() {
            let stmts = lower_instruction(f, pc, ins)?;
            self.write_stmts(&stmts, depth)?;
        }
        Ok(())
    }

    fn write_stmts(&mut self, stmts: &[Stmt], depth: usize) -> Result<(), DeluaError> {
        for s in stmts {
            match s {
                Stmt::Line(text) => self.line(depth, text)?,
                Stmt::Block { head, body } => {
                    self.line(depth, head)?;
                    self.write_stmts(body, depth + 1)?;
                    self.line(depth, "end")?;
                }
            }
        }
        Ok(())
    }

    fn line(&mut self, depth: usize, text: &str) -> Result<(), DeluaError> {
        for _ in 0..depth {
            self.out.write_all(b"\t")?;
        }
        self.out.write_all(text.as_bytes())?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

pub fn generate(main: &FunctionPrototype, emit_constants: bool) -> Result<String, DeluaError> {
    let mut w = PseudoWriter::new(Vec::new(), emit_constants);
    w.write_chunk(main)?;
    Ok(String::from_utf8_lossy(&w.into_inner()).into_owned())
}

// B/C operands that are RK-encoded, per opcode.
fn rk_operands(op: Opcode) -> (bool, bool) {
    match op {
        Opcode::SetTable
        | Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Mod
        | Opcode::Pow
        | Opcode::Eq
        | Opcode::Lt
        | Opcode::Le => (true, true),
        Opcode::GetTable | Opcode::Self_ => (false, true),
        _ => (false, false),
    }
}

fn disasm_comment(f: &FunctionPrototype, pc: usize, ins: &Instruction) -> Option<String> {
    match ins.operand {
        Operand::Bx(bx) => match ins.op {
            Opcode::Closure => Some(format!("proto[{bx}]")),
            _ => Some(
                f.constants
                    .get(bx as usize)
                    .map_or_else(|| format!("<const:{bx}>"), |k| k.to_string()),
            ),
        },
        Operand::SBx(sbx) => Some(format!("to {}", pc as i64 + 1 + sbx as i64)),
        Operand::Abc { b, c } => {
            let (rk_b, rk_c) = rk_operands(ins.op);
            let mut parts = Vec::new();
            for (is_rk, v) in [(rk_b, b), (rk_c, c)] {
                if let (true, Rk::Constant(k)) = (is_rk, Rk::decode(v)) {
                    parts.push(
                        f.constants
                            .get(k as usize)
                            .map_or_else(|| format!("<const:{k}>"), |k| k.to_string()),
                    );
                }
            }
            if parts.is_empty() { None } else { Some(parts.join(" ")) }
        }
    }
}

fn disassemble_function<W: Write>(
    f: &FunctionPrototype,
    name: &str,
    out: &mut W,
) -> Result<(), DeluaError> {
    writeln!(
        out,
        "function {} (lines {}..{}, params={}, upvalues={}, vararg={}, stack={})",
        name, f.line_defined, f.last_line_defined, f.num_params, f.num_upvalues, f.vararg, f.max_stack_size
    )?;
    if !f.source_name.is_empty() {
        writeln!(out, "source: {}", f.source_name)?;
    }
    if !f.constants.is_empty() {
        writeln!(out, "constants:")?;
        for (i, k) in f.constants.iter().enumerate() {
            writeln!(out, "  [{i}] {k}")?;
        }
    }
    writeln!(out, "code:")?;
    for (pc, ins) in f.instructions.iter().enumerate() {
        write!(out, "  {:05}", pc)?;
        if let Some(line) = f.line_info.get(pc) {
            write!(out, " [{}]", line + 1)?;
        }
        write!(out, " {}", ins)?;
        if let Some(comment) = disasm_comment(f, pc, ins) {
            write!(out, " ; {}", comment)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn disassemble<W: Write>(main: &FunctionPrototype, out: &mut W) -> Result<(), DeluaError> {
    let mut next_func = 0u32;
    let mut stack = vec![main];
    let mut first = true;
    while let Some(f) = stack.pop() {
        let name = if f.is_main() {
            "main".to_string()
        } else {
            let n = next_func;
            next_func += 1;
            format!("func{n}")
        };
        if !first {
            writeln!(out)?;
        }
        first = false;
        disassemble_function(f, &name, out)?;
        stack.extend(f.prototypes.iter().rev());
    }
    Ok(())
}
