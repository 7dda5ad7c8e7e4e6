//! RV64I instruction encoding.
//!
//! Instructions are built in structured form and encoded to their 32-bit
//! binary representation on demand. Only the RV64I subset the backend
//! emits is covered: `add`, `addi`, `addiw`, `ld`, `sd`, `lui`, `jalr`.

use core::fmt;

use crate::regs::Gpr;

/// A structured RV64I instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inst {
    /// `add rd, rs1, rs2`: rd = rs1 + rs2
    Add { rd: Gpr, rs1: Gpr, rs2: Gpr },
    /// `addi rd, rs1, imm`: rd = rs1 + sign_extend(imm)
    Addi { rd: Gpr, rs1: Gpr, imm: i32 },
    /// `addiw rd, rs1, imm`: rd = sign_extend32(rs1 + sign_extend(imm))
    Addiw { rd: Gpr, rs1: Gpr, imm: i32 },
    /// `ld rd, imm(rs1)`: rd = mem64[rs1 + imm]
    Ld { rd: Gpr, rs1: Gpr, imm: i32 },
    /// `sd rs2, imm(rs1)`: mem64[rs1 + imm] = rs2
    Sd { rs1: Gpr, rs2: Gpr, imm: i32 },
    /// `lui rd, imm`: rd = sign_extend(imm[31:12] << 12)
    Lui { rd: Gpr, imm: u32 },
    /// `jalr rd, rs1, imm`: rd = pc + 4; pc = (rs1 + imm) & !1
    Jalr { rd: Gpr, rs1: Gpr, imm: i32 },
}

impl Inst {
    /// Encode this instruction to its 32-bit binary representation.
    pub fn encode(&self) -> u32 {
        match *self {
            Inst::Add { rd, rs1, rs2 } => encode_r(0x33, 0x0, 0x00, rd, rs1, rs2),
            Inst::Addi { rd, rs1, imm } => encode_i(0x13, 0x0, rd, rs1, imm),
            Inst::Addiw { rd, rs1, imm } => encode_i(0x1b, 0x0, rd, rs1, imm),
            Inst::Ld { rd, rs1, imm } => encode_i(0x03, 0x3, rd, rs1, imm),
            Inst::Sd { rs1, rs2, imm } => encode_s(0x23, 0x3, rs1, rs2, imm),
            Inst::Lui { rd, imm } => encode_u(0x37, rd, imm),
            Inst::Jalr { rd, rs1, imm } => encode_i(0x67, 0x0, rd, rs1, imm),
        }
    }
}

/// Encode an R-type instruction (register-register).
fn encode_r(opcode: u32, funct3: u32, funct7: u32, rd: Gpr, rs1: Gpr, rs2: Gpr) -> u32 {
    (funct7 << 25)
        | ((rs2.num() as u32) << 20)
        | ((rs1.num() as u32) << 15)
        | (funct3 << 12)
        | ((rd.num() as u32) << 7)
        | opcode
}

/// Encode an I-type instruction (immediate, load, jalr).
///
/// The immediate must fit in 12 signed bits.
fn encode_i(opcode: u32, funct3: u32, rd: Gpr, rs1: Gpr, imm: i32) -> u32 {
    debug_assert!((-2048..2048).contains(&imm), "i12 immediate out of range");
    (((imm as u32) & 0xfff) << 20)
        | ((rs1.num() as u32) << 15)
        | (funct3 << 12)
        | ((rd.num() as u32) << 7)
        | opcode
}

/// Encode an S-type instruction (store).
///
/// The immediate must fit in 12 signed bits.
fn encode_s(opcode: u32, funct3: u32, rs1: Gpr, rs2: Gpr, imm: i32) -> u32 {
    debug_assert!((-2048..2048).contains(&imm), "s12 immediate out of range");
    let imm = imm as u32;
    (((imm >> 5) & 0x7f) << 25)
        | ((rs2.num() as u32) << 20)
        | ((rs1.num() as u32) << 15)
        | (funct3 << 12)
        | ((imm & 0x1f) << 7)
        | opcode
}

/// Encode a U-type instruction (lui).
///
/// `imm` is the pre-shifted 20-bit upper-immediate field.
fn encode_u(opcode: u32, rd: Gpr, imm: u32) -> u32 {
    debug_assert!(imm < (1 << 20), "u20 immediate out of range");
    (imm << 12) | ((rd.num() as u32) << 7) | opcode
}

/// Build an `add` instruction.
pub fn add(rd: Gpr, rs1: Gpr, rs2: Gpr) -> Inst {
    Inst::Add { rd, rs1, rs2 }
}

/// Build an `addi` instruction.
pub fn addi(rd: Gpr, rs1: Gpr, imm: i32) -> Inst {
    Inst::Addi { rd, rs1, imm }
}

/// Build an `addiw` instruction.
pub fn addiw(rd: Gpr, rs1: Gpr, imm: i32) -> Inst {
    Inst::Addiw { rd, rs1, imm }
}

/// Build an `ld` instruction.
pub fn ld(rd: Gpr, rs1: Gpr, imm: i32) -> Inst {
    Inst::Ld { rd, rs1, imm }
}

/// Build an `sd` instruction.
pub fn sd(rs1: Gpr, rs2: Gpr, imm: i32) -> Inst {
    Inst::Sd { rs1, rs2, imm }
}

/// Build a `lui` instruction.
pub fn lui(rd: Gpr, imm: u32) -> Inst {
    Inst::Lui { rd, imm }
}

/// Build a `jalr` instruction.
pub fn jalr(rd: Gpr, rs1: Gpr, imm: i32) -> Inst {
    Inst::Jalr { rd, rs1, imm }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Inst::Add { rd, rs1, rs2 } => write!(f, "add {}, {}, {}", rd, rs1, rs2),
            Inst::Addi { rd, rs1, imm } => write!(f, "addi {}, {}, {}", rd, rs1, imm),
            Inst::Addiw { rd, rs1, imm } => write!(f, "addiw {}, {}, {}", rd, rs1, imm),
            Inst::Ld { rd, rs1, imm } => write!(f, "ld {}, {}({})", rd, imm, rs1),
            Inst::Sd { rs1, rs2, imm } => write!(f, "sd {}, {}({})", rs2, imm, rs1),
            Inst::Lui { rd, imm } => write!(f, "lui {}, 0x{:05x}", rd, imm),
            Inst::Jalr { rd, rs1, imm } => write!(f, "jalr {}, {}({})", rd, imm, rs1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_add() {
        // add a0, a0, a1
        assert_eq!(add(Gpr::A0, Gpr::A0, Gpr::A1).encode(), 0x00b5_0533);
    }

    #[test]
    fn test_encode_addi() {
        // addi a0, a0, 21
        assert_eq!(addi(Gpr::A0, Gpr::A0, 21).encode(), 0x0155_0513);
        // mv a0, a1 == addi a0, a1, 0
        assert_eq!(addi(Gpr::A0, Gpr::A1, 0).encode(), 0x0005_8513);
        // li a0, 42 == addi a0, zero, 42
        assert_eq!(addi(Gpr::A0, Gpr::ZERO, 42).encode(), 0x02a0_0513);
        // negative immediate: addi sp, sp, -16
        assert_eq!(addi(Gpr::SP, Gpr::SP, -16).encode(), 0xff01_0113);
    }

    #[test]
    fn test_encode_addiw() {
        // addiw t0, t0, 0x400
        assert_eq!(addiw(Gpr::T0, Gpr::T0, 0x400).encode(), 0x4002_829b);
    }

    #[test]
    fn test_encode_lui() {
        // lui t0, 0x4c4b
        assert_eq!(lui(Gpr::T0, 0x4c4b).encode(), 0x04c4_b2b7);
    }

    #[test]
    fn test_encode_ld() {
        // ld fp, -8(fp)
        assert_eq!(ld(Gpr::FP, Gpr::FP, -8).encode(), 0xff84_3403);
    }

    #[test]
    fn test_encode_sd() {
        // sd fp, -8(sp)
        assert_eq!(sd(Gpr::SP, Gpr::FP, -8).encode(), 0xfe81_3c23);
    }

    #[test]
    fn test_encode_ret() {
        // ret == jalr zero, ra, 0
        assert_eq!(jalr(Gpr::ZERO, Gpr::RA, 0).encode(), 0x0000_8067);
    }

    #[test]
    fn test_encode_mv_fp_sp() {
        // mv fp, sp == addi fp, sp, 0
        assert_eq!(addi(Gpr::FP, Gpr::SP, 0).encode(), 0x0001_0413);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            alloc::format!("{}", add(Gpr::A0, Gpr::A1, Gpr::A2)),
            "add a0, a1, a2"
        );
        assert_eq!(alloc::format!("{}", ld(Gpr::FP, Gpr::FP, -8)), "ld fp, -8(fp)");
    }
}
