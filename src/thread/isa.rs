//! The reference instruction set executed by the engine's step loop.
//!
//! Instruction-level emulation of the real foreign CPU is out of scope for
//! this runtime; what the engine needs is *some* executable encoding so the
//! thread lifecycle, memory model, and import dispatch contracts can run end
//! to end. This module defines that encoding: fixed-width 32-bit
//! little-endian words with the opcode in the top byte and 4-bit register
//! fields below it. A real CPU backend replaces the step loop, not this
//! module's callers.
//!
//! Import calls mirror the thunk shape the original toolchain emits: an
//! [`IMPORT`](Instr::Import) word followed immediately by a literal word
//! holding the nid.
//!
//! # Word layout
//!
//! ```text
//! 31      24 23  20 19  16 15  12 11           0
//! [ opcode ][ rd  ][ ra  ][ rb  ][   (imm12)   ]
//! [ opcode ][ rd  ][    imm16 (low 16 bits)    ]
//! ```

use crate::dispatch::Nid;

const OP_MOVW: u8 = 0x01;
const OP_MOVT: u8 = 0x02;
const OP_MOV: u8 = 0x03;
const OP_ADD: u8 = 0x04;
const OP_SUB: u8 = 0x05;
const OP_LDR: u8 = 0x06;
const OP_STR: u8 = 0x07;
const OP_B: u8 = 0x08;
const OP_CBNZ: u8 = 0x09;
const OP_IMPORT: u8 = 0x0A;
const OP_RET: u8 = 0x0B;

/// A decoded instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instr {
    /// `rd = imm16` (upper half cleared).
    Movw {
        /// Destination register.
        rd: usize,
        /// Immediate loaded into the low half.
        imm: u16,
    },
    /// `rd = (rd & 0xFFFF) | (imm16 << 16)`.
    Movt {
        /// Destination register.
        rd: usize,
        /// Immediate loaded into the high half.
        imm: u16,
    },
    /// `rd = ra`.
    Mov {
        /// Destination register.
        rd: usize,
        /// Source register.
        ra: usize,
    },
    /// `rd = ra + rb` (wrapping).
    Add {
        /// Destination register.
        rd: usize,
        /// First operand register.
        ra: usize,
        /// Second operand register.
        rb: usize,
    },
    /// `rd = ra - rb` (wrapping).
    Sub {
        /// Destination register.
        rd: usize,
        /// First operand register.
        ra: usize,
        /// Second operand register.
        rb: usize,
    },
    /// `rd = *(u32*)(ra + imm12)`.
    Ldr {
        /// Destination register.
        rd: usize,
        /// Base address register.
        ra: usize,
        /// Byte offset from the base.
        offset: u16,
    },
    /// `*(u32*)(ra + imm12) = rd`.
    Str {
        /// Source register.
        rd: usize,
        /// Base address register.
        ra: usize,
        /// Byte offset from the base.
        offset: u16,
    },
    /// Relative branch, in words from the next instruction.
    B {
        /// Signed word offset.
        offset: i16,
    },
    /// Branch if `rd != 0`, in words from the next instruction.
    Cbnz {
        /// Register compared against zero.
        rd: usize,
        /// Signed word offset.
        offset: i16,
    },
    /// Import call; the following word is the nid literal.
    Import,
    /// Return: `pc = lr`.
    Ret,
}

/// Decodes one instruction word. Returns `None` for an unknown opcode.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // Field extraction below 32 bits
pub fn decode(word: u32) -> Option<Instr> {
    let op = (word >> 24) as u8;
    let rd = ((word >> 20) & 0xF) as usize;
    let ra = ((word >> 16) & 0xF) as usize;
    let rb = ((word >> 12) & 0xF) as usize;
    let imm16 = (word & 0xFFFF) as u16;
    let imm12 = (word & 0xFFF) as u16;

    Some(match op {
        OP_MOVW => Instr::Movw { rd, imm: imm16 },
        OP_MOVT => Instr::Movt { rd, imm: imm16 },
        OP_MOV => Instr::Mov { rd, ra },
        OP_ADD => Instr::Add { rd, ra, rb },
        OP_SUB => Instr::Sub { rd, ra, rb },
        OP_LDR => Instr::Ldr { rd, ra, offset: imm12 },
        OP_STR => Instr::Str { rd, ra, offset: imm12 },
        OP_B => Instr::B {
            offset: imm16 as i16,
        },
        OP_CBNZ => Instr::Cbnz {
            rd,
            offset: (imm12 as i16) << 4 >> 4,
        },
        OP_IMPORT => Instr::Import,
        OP_RET => Instr::Ret,
        _ => return None,
    })
}

fn word(op: u8, rd: usize, ra: usize, rb: usize, imm: u16) -> u32 {
    (u32::from(op) << 24)
        | ((rd as u32 & 0xF) << 20)
        | ((ra as u32 & 0xF) << 16)
        | ((rb as u32 & 0xF) << 12)
        | u32::from(imm) & 0xFFF_F
}

/// Encodes `rd = imm16`.
#[must_use]
pub fn movw(rd: usize, imm: u16) -> u32 {
    word(OP_MOVW, rd, 0, 0, imm)
}

/// Encodes `rd |= imm16 << 16`.
#[must_use]
pub fn movt(rd: usize, imm: u16) -> u32 {
    word(OP_MOVT, rd, 0, 0, imm)
}

/// Encodes `rd = ra`.
#[must_use]
pub fn mov(rd: usize, ra: usize) -> u32 {
    word(OP_MOV, rd, ra, 0, 0)
}

/// Encodes `rd = ra + rb`.
#[must_use]
pub fn add(rd: usize, ra: usize, rb: usize) -> u32 {
    word(OP_ADD, rd, ra, rb, 0)
}

/// Encodes `rd = ra - rb`.
#[must_use]
pub fn sub(rd: usize, ra: usize, rb: usize) -> u32 {
    word(OP_SUB, rd, ra, rb, 0)
}

/// Encodes `rd = *(u32*)(ra + offset)`.
#[must_use]
pub fn ldr(rd: usize, ra: usize, offset: u16) -> u32 {
    word(OP_LDR, rd, ra, 0, offset & 0xFFF)
}

/// Encodes `*(u32*)(ra + offset) = rd`.
#[must_use]
pub fn str(rd: usize, ra: usize, offset: u16) -> u32 {
    word(OP_STR, rd, ra, 0, offset & 0xFFF)
}

/// Encodes a relative branch, in words from the next instruction.
#[must_use]
#[allow(clippy::cast_sign_loss)] // Two's-complement field encoding
pub fn b(offset: i16) -> u32 {
    word(OP_B, 0, 0, 0, offset as u16)
}

/// Encodes a branch-if-nonzero, in words from the next instruction.
///
/// The offset field is 12 bits; callers stay within ±2047 words.
#[must_use]
#[allow(clippy::cast_sign_loss)] // Two's-complement field encoding
pub fn cbnz(rd: usize, offset: i16) -> u32 {
    word(OP_CBNZ, rd, 0, 0, (offset as u16) & 0xFFF)
}

/// Encodes an import thunk: the `IMPORT` word plus the nid literal.
#[must_use]
pub fn import(nid: Nid) -> [u32; 2] {
    [word(OP_IMPORT, 0, 0, 0, 0), nid.value()]
}

/// Encodes `pc = lr`.
#[must_use]
pub fn ret() -> u32 {
    word(OP_RET, 0, 0, 0, 0)
}

/// Flattens instruction words into little-endian bytes for loading.
#[must_use]
pub fn assemble(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_movw_movt() {
        assert_eq!(decode(movw(3, 0xBEEF)), Some(Instr::Movw { rd: 3, imm: 0xBEEF }));
        assert_eq!(decode(movt(3, 0xDEAD)), Some(Instr::Movt { rd: 3, imm: 0xDEAD }));
    }

    #[test]
    fn test_decode_alu() {
        assert_eq!(decode(mov(1, 2)), Some(Instr::Mov { rd: 1, ra: 2 }));
        assert_eq!(decode(add(1, 2, 3)), Some(Instr::Add { rd: 1, ra: 2, rb: 3 }));
        assert_eq!(decode(sub(4, 5, 6)), Some(Instr::Sub { rd: 4, ra: 5, rb: 6 }));
    }

    #[test]
    fn test_decode_memory_ops() {
        assert_eq!(
            decode(ldr(2, 13, 0x20)),
            Some(Instr::Ldr { rd: 2, ra: 13, offset: 0x20 })
        );
        assert_eq!(
            decode(str(2, 13, 0x24)),
            Some(Instr::Str { rd: 2, ra: 13, offset: 0x24 })
        );
    }

    #[test]
    fn test_decode_branches() {
        assert_eq!(decode(b(-3)), Some(Instr::B { offset: -3 }));
        assert_eq!(decode(b(5)), Some(Instr::B { offset: 5 }));
        assert_eq!(decode(cbnz(1, -2)), Some(Instr::Cbnz { rd: 1, offset: -2 }));
        assert_eq!(decode(cbnz(1, 7)), Some(Instr::Cbnz { rd: 1, offset: 7 }));
    }

    #[test]
    fn test_decode_import_and_ret() {
        let [head, nid] = import(Nid::new(0x1234_5678));
        assert_eq!(decode(head), Some(Instr::Import));
        assert_eq!(nid, 0x1234_5678);
        assert_eq!(decode(ret()), Some(Instr::Ret));
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(decode(0xFF00_0000), None);
        assert_eq!(decode(0x0000_0000), None);
    }

    #[test]
    fn test_assemble_is_little_endian() {
        let bytes = assemble(&[movw(0, 1)]);
        assert_eq!(bytes, vec![0x01, 0x00, 0x00, 0x01]);
    }
}
