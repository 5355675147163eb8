//! Jeu d'instructions de la VM à pile, partagé entre compilateur et runtime.
//!
//! Encodage : opcode `u8` suivi des opérandes little-endian. Les cibles de saut
//! et les `pc` des points de séquence sont des indices d'instruction (pas des offsets).

use core::fmt;

use kiln_core::{ByteReader, ByteWriter, CoreError, CoreResult};

const OP_LOAD_CONST: u8 = 0x01;
const OP_LOAD_LOCAL: u8 = 0x02;
const OP_STORE_LOCAL: u8 = 0x03;
const OP_POP: u8 = 0x04;

const OP_ADD: u8 = 0x10;
const OP_SUB: u8 = 0x11;
const OP_MUL: u8 = 0x12;
const OP_DIV: u8 = 0x13;
const OP_REM: u8 = 0x14;
const OP_NEG: u8 = 0x15;
const OP_NOT: u8 = 0x16;

const OP_EQ: u8 = 0x20;
const OP_NE: u8 = 0x21;
const OP_LT: u8 = 0x22;
const OP_LE: u8 = 0x23;
const OP_GT: u8 = 0x24;
const OP_GE: u8 = 0x25;

const OP_JUMP: u8 = 0x30;
const OP_JUMP_IF_FALSE: u8 = 0x31;

const OP_CALL: u8 = 0x40;
const OP_CALL_EXTERN: u8 = 0x41;

const OP_RETURN: u8 = 0x60;
const OP_RETURN_VOID: u8 = 0x61;

/// Instruction de la VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Empile la constante d'indice donné.
    LoadConst(u32),
    /// Empile le local (les paramètres occupent les premiers slots).
    LoadLocal(u16),
    /// Dépile dans le local.
    StoreLocal(u16),
    /// Jette le sommet de pile.
    Pop,
    /// `a + b` (concaténation si l'un est une chaîne).
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
    /// `a % b`
    Rem,
    /// `-a`
    Neg,
    /// `!a`
    Not,
    /// `a == b`
    Eq,
    /// `a != b`
    Ne,
    /// `a < b`
    Lt,
    /// `a <= b`
    Le,
    /// `a > b`
    Gt,
    /// `a >= b`
    Ge,
    /// Saut inconditionnel.
    Jump(u32),
    /// Saut si le sommet (dépilé) est faux.
    JumpIfFalse(u32),
    /// Appel d'une méthode de la même image (indice global de méthode).
    Call {
        /// Indice de méthode.
        method: u32,
        /// Nombre d'arguments dépilés.
        argc: u8,
    },
    /// Appel d'une native importée depuis un assembly référencé.
    CallExtern {
        /// Indice dans la table des imports.
        import: u32,
        /// Nombre d'arguments dépilés.
        argc: u8,
    },
    /// Retourne le sommet de pile.
    Return,
    /// Retourne `null`.
    ReturnVoid,
}

impl Op {
    /// Écrit l'instruction.
    pub fn encode(&self, w: &mut ByteWriter) {
        match *self {
            Op::LoadConst(i) => {
                w.write_u8(OP_LOAD_CONST);
                w.write_u32_le(i);
            }
            Op::LoadLocal(s) => {
                w.write_u8(OP_LOAD_LOCAL);
                w.write_u16_le(s);
            }
            Op::StoreLocal(s) => {
                w.write_u8(OP_STORE_LOCAL);
                w.write_u16_le(s);
            }
            Op::Jump(t) => {
                w.write_u8(OP_JUMP);
                w.write_u32_le(t);
            }
            Op::JumpIfFalse(t) => {
                w.write_u8(OP_JUMP_IF_FALSE);
                w.write_u32_le(t);
            }
            Op::Call { method, argc } => {
                w.write_u8(OP_CALL);
                w.write_u32_le(method);
                w.write_u8(argc);
            }
            Op::CallExtern { import, argc } => {
                w.write_u8(OP_CALL_EXTERN);
                w.write_u32_le(import);
                w.write_u8(argc);
            }
            simple => w.write_u8(simple.simple_opcode()),
        }
    }

    const fn simple_opcode(self) -> u8 {
        match self {
            Op::Pop => OP_POP,
            Op::Add => OP_ADD,
            Op::Sub => OP_SUB,
            Op::Mul => OP_MUL,
            Op::Div => OP_DIV,
            Op::Rem => OP_REM,
            Op::Neg => OP_NEG,
            Op::Not => OP_NOT,
            Op::Eq => OP_EQ,
            Op::Ne => OP_NE,
            Op::Lt => OP_LT,
            Op::Le => OP_LE,
            Op::Gt => OP_GT,
            Op::Ge => OP_GE,
            Op::Return => OP_RETURN,
            Op::ReturnVoid => OP_RETURN_VOID,
            // opérandes : traités par `encode`
            Op::LoadConst(_)
            | Op::LoadLocal(_)
            | Op::StoreLocal(_)
            | Op::Jump(_)
            | Op::JumpIfFalse(_)
            | Op::Call { .. }
            | Op::CallExtern { .. } => 0xFF,
        }
    }

    /// Lit une instruction.
    pub fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let at = r.offset();
        let op = match r.read_u8()? {
            OP_LOAD_CONST => Op::LoadConst(r.read_u32_le()?),
            OP_LOAD_LOCAL => Op::LoadLocal(r.read_u16_le()?),
            OP_STORE_LOCAL => Op::StoreLocal(r.read_u16_le()?),
            OP_POP => Op::Pop,
            OP_ADD => Op::Add,
            OP_SUB => Op::Sub,
            OP_MUL => Op::Mul,
            OP_DIV => Op::Div,
            OP_REM => Op::Rem,
            OP_NEG => Op::Neg,
            OP_NOT => Op::Not,
            OP_EQ => Op::Eq,
            OP_NE => Op::Ne,
            OP_LT => Op::Lt,
            OP_LE => Op::Le,
            OP_GT => Op::Gt,
            OP_GE => Op::Ge,
            OP_JUMP => Op::Jump(r.read_u32_le()?),
            OP_JUMP_IF_FALSE => Op::JumpIfFalse(r.read_u32_le()?),
            OP_CALL => Op::Call { method: r.read_u32_le()?, argc: r.read_u8()? },
            OP_CALL_EXTERN => Op::CallExtern { import: r.read_u32_le()?, argc: r.read_u8()? },
            OP_RETURN => Op::Return,
            OP_RETURN_VOID => Op::ReturnVoid,
            other => return Err(CoreError::corrupted(format!("unknown opcode 0x{other:02X} at {at}"))),
        };
        Ok(op)
    }

    /// Encode une séquence complète.
    pub fn encode_all(ops: &[Op]) -> Vec<u8> {
        let mut w = ByteWriter::new();
        for op in ops {
            op.encode(&mut w);
        }
        w.into_vec()
    }

    /// Décode un corps de méthode complet.
    pub fn decode_all(code: &[u8]) -> CoreResult<Vec<Op>> {
        let mut r = ByteReader::new(code);
        let mut ops = Vec::new();
        while r.remaining() > 0 {
            ops.push(Op::decode(&mut r)?);
        }
        Ok(ops)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::LoadConst(i) => write!(f, "LOAD_CONST #{i}"),
            Op::LoadLocal(s) => write!(f, "LOAD_LOCAL ${s}"),
            Op::StoreLocal(s) => write!(f, "STORE_LOCAL ${s}"),
            Op::Jump(t) => write!(f, "JUMP @{t}"),
            Op::JumpIfFalse(t) => write!(f, "JUMP_IF_FALSE @{t}"),
            Op::Call { method, argc } => write!(f, "CALL m{method}/{argc}"),
            Op::CallExtern { import, argc } => write!(f, "CALL_EXTERN i{import}/{argc}"),
            other => write!(f, "{}", format!("{other:?}").to_uppercase()),
        }
    }
}
