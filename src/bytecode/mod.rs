//! Bytecode wire format and a minimal reference interpreter, spec.md §6.
//!
//! Not a required component: spec.md §1 scopes the model-text compiler and the bytecode
//! interpreter out as "an external collaborator defined solely by an evaluation contract"
//! (§6), and DESIGN.md records it as documentation, not core surface. It exists so
//! `evaluator::Evaluator` has two real variants to dispatch over (spec.md §9's "Dynamic
//! dispatch" note) and so the "Bytecode round-trip" property in spec.md §8 is checkable
//! against a hand-assembled fixture, not so this crate can load arbitrary compiler output.
//!
//! The typed index kinds (`VAR, AUX, PAR, CON, FLG, RES, TMP, DRES, DTMP`) are mutually
//! exclusive tags rather than combinable bits, so [`num_enum::TryFromPrimitive`] drives their
//! decoding; `bitflags` covers the one place this module actually has combinable bits, the FP
//! exception flags the interpreter tracks per spec.md §4.3/§5.
//!
//! TODO: the `IF`/`ELSE`/`FI`/`JMP` control-flow family is parsed (so a header+opcode stream
//! containing them round-trips through [`Program::decode`]) but not executed — this fixture
//! only runs straight-line models, which is all the bytecode round-trip property (spec.md
//! §8) and the compiled-vs-interpreted dispatch test need.

use bitflags::bitflags;
use num_enum::TryFromPrimitive;

use crate::E;
use crate::errors::EvaluatorError;
use crate::evaluator::{EvalRequest, EvalResult, ModelDims, ModelEvaluator};
use crate::linalg::dense::Vector;

/// The file-identifier string every bytecode header must carry (spec.md §6), NUL-terminated
/// on the wire.
pub const FILE_IDENT: &str = "PARX interpreter code";
/// The only code version this interpreter accepts; a mismatch is fatal (spec.md §6).
pub const CODE_VERSION: i16 = 3;
/// Minimum execution stack depth spec.md §6 requires.
pub const MIN_STACK_DEPTH: usize = 64;

bitflags! {
    /// Floating-point exception bits raised by arithmetic opcodes (spec.md §4.3/§5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FpFlags: u8 {
        const DIVBYZERO = 0b001;
        const OVERFLOW  = 0b010;
        const INVALID   = 0b100;
    }
}

/// Typed index kind tagging an operand slot (spec.md §6 `typ`).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum IndexKind {
    Var = 0,
    Aux = 1,
    Par = 2,
    Con = 3,
    Flg = 4,
    Res = 5,
    Tmp = 6,
    DRes = 7,
    DTmp = 8,
}

/// Bytecode operation codes (spec.md §6).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum Opcode {
    And = 0,
    Or = 1,
    Lt = 2,
    Le = 3,
    Gt = 4,
    Ge = 5,
    Eq = 6,
    Ne = 7,
    Add = 8,
    Sub = 9,
    Mul = 10,
    Div = 11,
    Pow = 12,
    Neg = 13,
    Not = 14,
    Inc = 15,
    Dec = 16,
    Rev = 17,
    Sqr = 18,
    Sgn = 19,
    Abs = 20,
    Sin = 21,
    Cos = 22,
    Tan = 23,
    Asin = 24,
    Acos = 25,
    Atan = 26,
    Exp = 27,
    Log = 28,
    Lg = 29,
    Sqrt = 30,
    Opd = 31,
    DOpd = 32,
    Num = 33,
    Ldf = 34,
    Ass = 35,
    NAss = 36,
    Clr = 37,
    If = 38,
    Else = 39,
    Fi = 40,
    Jmp = 41,
    Ret = 42,
    Chkl = 43,
    Chkg = 44,
    Sok = 45,
    Eod = 46,
    Stop = 47,
}

/// One decoded instruction. Variants carry the operands the opcode needs.
#[derive(Debug, Clone, Copy)]
pub enum Instr {
    Binary(Opcode),
    Unary(Opcode),
    Operand { op: Opcode, typ: IndexKind, ind: usize },
    Num { ind: usize },
    Store { op: Opcode, typ: IndexKind, ind: usize },
    Clear { typ: IndexKind, ind: usize },
    Branch { op: Opcode, target: usize },
    Check(Opcode),
    Section(Opcode),
    Ret,
    Stop,
}

/// Parsed header fields (spec.md §6).
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub n_num: i16,
    pub n_tmp: i16,
    pub code_version: i16,
}

fn read_i16(bytes: &[u8], offset: &mut usize) -> Result<i16, EvaluatorError> {
    if *offset + 2 > bytes.len() {
        return Err(EvaluatorError::UnexpectedEof);
    }
    let v = i16::from_le_bytes([bytes[*offset], bytes[*offset + 1]]);
    *offset += 2;
    Ok(v)
}

impl Header {
    /// Parses the header at the start of `bytes`, returning it and the byte offset of the
    /// instruction stream that follows.
    pub fn parse(bytes: &[u8]) -> Result<(Header, usize), EvaluatorError> {
        let mut offset = 0;
        let n_num = read_i16(bytes, &mut offset)?;
        let n_tmp = read_i16(bytes, &mut offset)?;
        let ident_len = read_i16(bytes, &mut offset)?.max(0) as usize;
        if offset + ident_len > bytes.len() {
            return Err(EvaluatorError::UnexpectedEof);
        }
        let ident_bytes = &bytes[offset..offset + ident_len];
        offset += ident_len;
        let ident = std::str::from_utf8(ident_bytes)
            .map_err(|_| EvaluatorError::BadHeader("file identifier is not valid UTF-8".into()))?
            .trim_end_matches('\0');
        if ident != FILE_IDENT {
            return Err(EvaluatorError::BadHeader(format!(
                "unexpected file identifier '{ident}'"
            )));
        }
        let code_version = read_i16(bytes, &mut offset)?;
        if code_version != CODE_VERSION {
            return Err(EvaluatorError::BadHeader(format!(
                "bytecode version {code_version} is not the supported version {CODE_VERSION}"
            )));
        }
        Ok((
            Header {
                n_num,
                n_tmp,
                code_version,
            },
            offset,
        ))
    }
}

/// A decoded model program: header, straight-line instruction stream, and trailing numeric
/// constant pool (spec.md §6).
pub struct Program {
    pub header: Header,
    pub instructions: Vec<Instr>,
    pub constants: Vec<E>,
}

fn index_kind(v: u16) -> Result<IndexKind, EvaluatorError> {
    IndexKind::try_from_primitive(v).map_err(|_| EvaluatorError::IllegalOpcode {
        opcode: v,
        offset: 0,
    })
}

impl Program {
    /// Decodes a full bytecode file: header, instruction stream (terminated by `STOP`), and
    /// the trailing `n_num` IEEE-754 constants.
    pub fn decode(bytes: &[u8]) -> Result<Program, EvaluatorError> {
        let (header, mut offset) = Header::parse(bytes)?;
        let mut instructions = Vec::new();

        loop {
            let raw = read_i16(bytes, &mut offset)? as u16;
            let op = Opcode::try_from_primitive(raw).map_err(|_| EvaluatorError::IllegalOpcode {
                opcode: raw,
                offset,
            })?;
            let instr = match op {
                Opcode::And
                | Opcode::Or
                | Opcode::Lt
                | Opcode::Le
                | Opcode::Gt
                | Opcode::Ge
                | Opcode::Eq
                | Opcode::Ne
                | Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Pow => Instr::Binary(op),
                Opcode::Neg
                | Opcode::Not
                | Opcode::Inc
                | Opcode::Dec
                | Opcode::Rev
                | Opcode::Sqr
                | Opcode::Sgn
                | Opcode::Abs
                | Opcode::Sin
                | Opcode::Cos
                | Opcode::Tan
                | Opcode::Asin
                | Opcode::Acos
                | Opcode::Atan
                | Opcode::Exp
                | Opcode::Log
                | Opcode::Lg
                | Opcode::Sqrt => Instr::Unary(op),
                Opcode::Opd | Opcode::DOpd | Opcode::Ldf => {
                    let typ = index_kind(read_i16(bytes, &mut offset)? as u16)?;
                    let ind = read_i16(bytes, &mut offset)?.max(0) as usize;
                    Instr::Operand { op, typ, ind }
                }
                Opcode::Num => {
                    let ind = read_i16(bytes, &mut offset)?.max(0) as usize;
                    Instr::Num { ind }
                }
                Opcode::Ass | Opcode::NAss => {
                    let typ = index_kind(read_i16(bytes, &mut offset)? as u16)?;
                    let ind = read_i16(bytes, &mut offset)?.max(0) as usize;
                    Instr::Store { op, typ, ind }
                }
                Opcode::Clr => {
                    let typ = index_kind(read_i16(bytes, &mut offset)? as u16)?;
                    let ind = read_i16(bytes, &mut offset)?.max(0) as usize;
                    Instr::Clear { typ, ind }
                }
                Opcode::If | Opcode::Else | Opcode::Jmp => {
                    let target = read_i16(bytes, &mut offset)?.max(0) as usize;
                    Instr::Branch { op, target }
                }
                Opcode::Fi => Instr::Branch { op, target: 0 },
                Opcode::Chkl | Opcode::Chkg => Instr::Check(op),
                Opcode::Sok | Opcode::Eod => Instr::Section(op),
                Opcode::Ret => Instr::Ret,
                Opcode::Stop => {
                    instructions.push(Instr::Stop);
                    break;
                }
            };
            instructions.push(instr);
        }

        let mut constants = Vec::with_capacity(header.n_num.max(0) as usize);
        for _ in 0..header.n_num.max(0) {
            if offset + 8 > bytes.len() {
                return Err(EvaluatorError::UnexpectedEof);
            }
            let v = E::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
            constants.push(v);
            offset += 8;
        }

        Ok(Program {
            header,
            instructions,
            constants,
        })
    }
}

/// A register file: one vector per typed index kind, indexed by [`IndexKind`].
#[derive(Default)]
struct Registers {
    var: Vec<E>,
    aux: Vec<E>,
    par: Vec<E>,
    con: Vec<E>,
    flg: Vec<E>,
    res: Vec<E>,
    tmp: Vec<E>,
    dres: Vec<E>,
    dtmp: Vec<E>,
}

impl Registers {
    fn slot(&mut self, typ: IndexKind) -> &mut Vec<E> {
        match typ {
            IndexKind::Var => &mut self.var,
            IndexKind::Aux => &mut self.aux,
            IndexKind::Par => &mut self.par,
            IndexKind::Con => &mut self.con,
            IndexKind::Flg => &mut self.flg,
            IndexKind::Res => &mut self.res,
            IndexKind::Tmp => &mut self.tmp,
            IndexKind::DRes => &mut self.dres,
            IndexKind::DTmp => &mut self.dtmp,
        }
    }

    fn get(&mut self, typ: IndexKind, ind: usize) -> E {
        let slot = self.slot(typ);
        if ind >= slot.len() {
            slot.resize(ind + 1, 0.0);
        }
        slot[ind]
    }

    fn set(&mut self, typ: IndexKind, ind: usize, v: E) {
        let slot = self.slot(typ);
        if ind >= slot.len() {
            slot.resize(ind + 1, 0.0);
        }
        slot[ind] = v;
    }
}

/// Executes a straight-line [`Program`] against a register file, returning the final value
/// of `RES` and flagging any floating-point exception encountered.
///
/// `DOPD` reads from the same value registers as `OPD`: the compiler is assumed to emit
/// already-differentiated straight-line code in the derivative sections rather than
/// performing forward-mode automatic differentiation at interpret time, so there is no
/// separate "tangent" register file to thread through.
fn run(program: &Program, registers: &mut Registers) -> Result<(FpFlags, Vec<E>), EvaluatorError> {
    let mut stack: Vec<E> = Vec::with_capacity(MIN_STACK_DEPTH);
    let mut flags = FpFlags::empty();

    for instr in &program.instructions {
        match instr {
            Instr::Binary(op) => {
                let b = stack.pop().ok_or(EvaluatorError::StackOverflow)?;
                let a = stack.pop().ok_or(EvaluatorError::StackOverflow)?;
                let v = match op {
                    Opcode::And => {
                        if a != 0.0 && b != 0.0 {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    Opcode::Or => {
                        if a != 0.0 || b != 0.0 {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    Opcode::Lt => (a < b) as u8 as E,
                    Opcode::Le => (a <= b) as u8 as E,
                    Opcode::Gt => (a > b) as u8 as E,
                    Opcode::Ge => (a >= b) as u8 as E,
                    Opcode::Eq => (a == b) as u8 as E,
                    Opcode::Ne => (a != b) as u8 as E,
                    Opcode::Add => a + b,
                    Opcode::Sub => a - b,
                    Opcode::Mul => a * b,
                    Opcode::Div => {
                        if b == 0.0 {
                            flags |= FpFlags::DIVBYZERO;
                            E::INFINITY
                        } else {
                            a / b
                        }
                    }
                    Opcode::Pow => a.powf(b),
                    _ => unreachable!(),
                };
                if v.is_infinite() {
                    flags |= FpFlags::OVERFLOW;
                }
                if v.is_nan() {
                    flags |= FpFlags::INVALID;
                }
                stack.push(v);
            }
            Instr::Unary(op) => {
                let a = stack.pop().ok_or(EvaluatorError::StackOverflow)?;
                let v = match op {
                    Opcode::Neg => -a,
                    Opcode::Not => (a == 0.0) as u8 as E,
                    Opcode::Inc => a + 1.0,
                    Opcode::Dec => a - 1.0,
                    Opcode::Rev => 1.0 / a,
                    Opcode::Sqr => a * a,
                    Opcode::Sgn => a.signum(),
                    Opcode::Abs => a.abs(),
                    Opcode::Sin => a.sin(),
                    Opcode::Cos => a.cos(),
                    Opcode::Tan => a.tan(),
                    Opcode::Asin => a.asin(),
                    Opcode::Acos => a.acos(),
                    Opcode::Atan => a.atan(),
                    Opcode::Exp => a.exp(),
                    Opcode::Log => a.ln(),
                    Opcode::Lg => a.log10(),
                    Opcode::Sqrt => a.sqrt(),
                    _ => unreachable!(),
                };
                if v.is_infinite() {
                    flags |= FpFlags::OVERFLOW;
                }
                if v.is_nan() {
                    flags |= FpFlags::INVALID;
                }
                stack.push(v);
            }
            Instr::Operand { typ, ind, .. } => {
                stack.push(registers.get(*typ, *ind));
            }
            Instr::Num { ind } => {
                stack.push(*program.constants.get(*ind).unwrap_or(&0.0));
            }
            Instr::Store { op, typ, ind } => {
                let v = stack.pop().ok_or(EvaluatorError::StackOverflow)?;
                match op {
                    Opcode::Ass => registers.set(*typ, *ind, v),
                    Opcode::NAss => {
                        let prev = registers.get(*typ, *ind);
                        registers.set(*typ, *ind, prev + v);
                    }
                    _ => unreachable!(),
                }
            }
            Instr::Clear { typ, ind } => registers.set(*typ, *ind, 0.0),
            Instr::Check(_) => {
                let a = stack.last().copied().unwrap_or(0.0);
                if a <= 0.0 {
                    flags |= FpFlags::INVALID;
                }
            }
            Instr::Branch { .. } => {
                return Err(EvaluatorError::BadHeader(
                    "control-flow opcodes are not supported by the fixture interpreter".into(),
                ));
            }
            Instr::Section(_) | Instr::Ret | Instr::Stop => {}
        }
    }

    Ok((flags, registers.res.clone()))
}

/// A [`ModelEvaluator`] backed by an interpreted [`Program`] rather than compiled native
/// code (spec.md §4.3(b), §9 "Dynamic dispatch").
pub struct BytecodeEvaluator {
    pub dims: ModelDims,
    pub program: Program,
}

impl ModelEvaluator for BytecodeEvaluator {
    fn dims(&self) -> ModelDims {
        self.dims
    }

    fn evaluate_raw(&mut self, req: &EvalRequest) -> Result<EvalResult, EvaluatorError> {
        let mut regs = Registers::default();
        for i in 0..req.x.nrows() {
            regs.set(IndexKind::Var, i, req.x[i]);
        }
        for i in 0..req.a.nrows() {
            regs.set(IndexKind::Aux, i, req.a[i]);
        }
        for i in 0..req.p.nrows() {
            regs.set(IndexKind::Par, i, req.p[i]);
        }
        for i in 0..req.c.nrows() {
            regs.set(IndexKind::Con, i, req.c[i]);
        }
        for i in 0..req.f.nrows() {
            regs.set(IndexKind::Flg, i, req.f[i]);
        }

        let (flags, res) = run(&self.program, &mut regs)?;
        if !flags.is_empty() {
            return Err(EvaluatorError::FloatingPointException {
                flags: format!("{flags:?}"),
            });
        }

        let mut out = EvalResult::default();
        if req.want_r {
            out.r = Some(Vector::from_fn(self.dims.n_r, |i| {
                res.get(i).copied().unwrap_or(0.0)
            }));
        }
        Ok(out)
    }
}
