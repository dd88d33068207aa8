//! Thumb/Thumb-2 encoding recognizers.
//!
//! Only the handful of encodings that build absolute addresses are
//! decoded: PC-relative literal loads, `MOVW`/`MOVT`, and the 16-bit
//! immediate-offset loads and stores that dereference a loaded base.
//! Everything else is reported as "not recognized".

use crate::types::Access;

/// Masks and match values for the recognized encodings.
pub mod opcodes {
    /// Opcode bits of 16-bit `LDR Rt, [PC, #imm8]`
    pub const LDR_LITERAL_MASK: u16 = 0xF800;
    /// `LDR Rt, [PC, #imm8]`
    pub const LDR_LITERAL: u16 = 0x4800;

    /// First halfword of `LDR.W` literal, U bit (7) masked out
    pub const LDR_LITERAL_W_MASK: u16 = 0xFF7F;
    /// `LDR.W Rt, [PC, #±imm12]`
    pub const LDR_LITERAL_W: u16 = 0xF85F;

    /// First halfword of `MOVW`/`MOVT`, immediate fields masked out
    pub const MOV_WIDE_MASK: u16 = 0xFBF0;
    /// `MOVW Rd, #imm16`
    pub const MOVW: u16 = 0xF240;
    /// `MOVT Rd, #imm16`
    pub const MOVT: u16 = 0xF2C0;

    /// Opcode bits of the 16-bit immediate-offset loads and stores
    pub const LOAD_STORE_IMM_MASK: u16 = 0xF800;
    /// `STR Rt, [Rn, #imm5 * 4]`
    pub const STR_IMM: u16 = 0x6000;
    /// `LDR Rt, [Rn, #imm5 * 4]`
    pub const LDR_IMM: u16 = 0x6800;
    /// `STRB Rt, [Rn, #imm5]`
    pub const STRB_IMM: u16 = 0x7000;
    /// `LDRB Rt, [Rn, #imm5]`
    pub const LDRB_IMM: u16 = 0x7800;
    /// `STRH Rt, [Rn, #imm5 * 2]`
    pub const STRH_IMM: u16 = 0x8000;
    /// `LDRH Rt, [Rn, #imm5 * 2]`
    pub const LDRH_IMM: u16 = 0x8800;

    /// Opcode bits of `MOVS Rd, #imm8`
    pub const MOVS_IMM_MASK: u16 = 0xF800;
    /// `MOVS Rd, #imm8`
    pub const MOVS_IMM: u16 = 0x2000;

    /// Opcode bits of `SUBS Rd, Rn, Rm`
    pub const SUBS_REG_MASK: u16 = 0xFE00;
    /// `SUBS Rd, Rn, Rm`
    pub const SUBS_REG: u16 = 0x1A00;
}

/// Byte length of the instruction that starts with `halfword`.
pub fn thumb_instruction_length(halfword: u16) -> usize {
    if is_thumb2_prefix(halfword) {
        4
    } else {
        2
    }
}

/// True if the halfword starts a 32-bit Thumb-2 instruction.
pub fn is_thumb2_prefix(halfword: u16) -> bool {
    let top5 = (halfword >> 11) & 0x1F;
    matches!(top5, 0x1D | 0x1E | 0x1F)
}

/// A PC-relative literal load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiteralLoad {
    /// Destination register
    pub rt: u8,
    /// Signed byte offset from the aligned PC
    pub offset: i32,
}

/// Decode 16-bit `LDR Rt, [PC, #imm8 * 4]` (T1).
pub fn decode_ldr_literal(hw: u16) -> Option<LiteralLoad> {
    if hw & opcodes::LDR_LITERAL_MASK != opcodes::LDR_LITERAL {
        return None;
    }
    Some(LiteralLoad {
        rt: ((hw >> 8) & 0x7) as u8,
        offset: i32::from(hw & 0xFF) << 2,
    })
}

/// Decode 32-bit `LDR.W Rt, [PC, #±imm12]` (T2).
pub fn decode_ldr_literal_wide(hw1: u16, hw2: u16) -> Option<LiteralLoad> {
    if hw1 & opcodes::LDR_LITERAL_W_MASK != opcodes::LDR_LITERAL_W {
        return None;
    }
    let imm12 = i32::from(hw2 & 0x0FFF);
    let add = hw1 & 0x0080 != 0;
    Some(LiteralLoad {
        rt: (hw2 >> 12) as u8,
        offset: if add { imm12 } else { -imm12 },
    })
}

/// Address of a literal referenced from the instruction at `instr_address`.
///
/// The PC reads as the instruction address plus 4, aligned down to
/// `alignment` (a power of two, 4 on Cortex-M).
pub fn literal_address(instr_address: u32, alignment: u32, offset: i32) -> u32 {
    let pc = instr_address.wrapping_add(4) & !(alignment.wrapping_sub(1));
    pc.wrapping_add_signed(offset)
}

/// Which half of a register a wide move writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveHalf {
    /// `MOVW`: lower 16 bits, upper cleared
    Lower,
    /// `MOVT`: upper 16 bits, lower kept
    Upper,
}

/// A decoded `MOVW`/`MOVT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveWide {
    /// Which half is written
    pub half: MoveHalf,
    /// Destination register
    pub rd: u8,
    /// 16-bit immediate
    pub imm16: u16,
}

/// Decode `MOVW Rd, #imm16` / `MOVT Rd, #imm16` (T3 / T1).
pub fn decode_move_wide(hw1: u16, hw2: u16) -> Option<MoveWide> {
    let half = match hw1 & opcodes::MOV_WIDE_MASK {
        opcodes::MOVW => MoveHalf::Lower,
        opcodes::MOVT => MoveHalf::Upper,
        _ => return None,
    };
    if hw2 & 0x8000 != 0 {
        return None;
    }
    let rd = ((hw2 >> 8) & 0xF) as u8;
    if rd == 13 || rd == 15 {
        return None;
    }
    let imm4 = hw1 & 0x000F;
    let i = (hw1 >> 10) & 0x1;
    let imm3 = (hw2 >> 12) & 0x7;
    let imm8 = hw2 & 0x00FF;
    Some(MoveWide {
        half,
        rd,
        imm16: (imm4 << 12) | (i << 11) | (imm3 << 8) | imm8,
    })
}

/// A 16-bit `LDR`/`STR` (word, byte or halfword) with immediate offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStoreImm {
    /// Transfer register
    pub rt: u8,
    /// Base register
    pub rn: u8,
    /// Byte offset, already scaled by the access width
    pub offset: u32,
    /// Load or store
    pub access: Access,
}

/// Decode 16-bit `LDR{B,H}`/`STR{B,H} Rt, [Rn, #imm5]`.
pub fn decode_load_store_imm(hw: u16) -> Option<LoadStoreImm> {
    let (access, scale) = match hw & opcodes::LOAD_STORE_IMM_MASK {
        opcodes::STR_IMM => (Access::WRITE, 2),
        opcodes::LDR_IMM => (Access::READ, 2),
        opcodes::STRB_IMM => (Access::WRITE, 0),
        opcodes::LDRB_IMM => (Access::READ, 0),
        opcodes::STRH_IMM => (Access::WRITE, 1),
        opcodes::LDRH_IMM => (Access::READ, 1),
        _ => return None,
    };
    Some(LoadStoreImm {
        rt: (hw & 0x7) as u8,
        rn: ((hw >> 3) & 0x7) as u8,
        offset: u32::from((hw >> 6) & 0x1F) << scale,
        access,
    })
}

/// Low register overwritten by a 16-bit instruction that cannot carry an address.
///
/// Covers literal loads, `MOVS Rd, #imm8` and `SUBS Rd, Rn, Rm`.
pub fn clobbered_register(hw: u16) -> Option<u8> {
    if let Some(load) = decode_ldr_literal(hw) {
        return Some(load.rt);
    }
    if hw & opcodes::MOVS_IMM_MASK == opcodes::MOVS_IMM {
        return Some(((hw >> 8) & 0x7) as u8);
    }
    if hw & opcodes::SUBS_REG_MASK == opcodes::SUBS_REG {
        return Some((hw & 0x7) as u8);
    }
    None
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumb_length() {
        assert_eq!(thumb_instruction_length(0xBF00), 2); // NOP.N
        assert_eq!(thumb_instruction_length(0xF3AF), 4); // NOP.W prefix
        assert_eq!(thumb_instruction_length(0xE92D), 4); // PUSH.W
        assert_eq!(thumb_instruction_length(0xE000), 2); // B
    }

    #[test]
    fn test_ldr_literal() {
        // ldr r3, [pc, #0x10]
        let load = decode_ldr_literal(0x4B04).unwrap();
        assert_eq!(load, LiteralLoad { rt: 3, offset: 0x10 });
        assert!(decode_ldr_literal(0x6800).is_none());
    }

    #[test]
    fn test_ldr_literal_wide() {
        // ldr.w r1, [pc, #0x124]
        let load = decode_ldr_literal_wide(0xF8DF, 0x1124).unwrap();
        assert_eq!(load, LiteralLoad { rt: 1, offset: 0x124 });
        // ldr.w r2, [pc, #-8]
        let load = decode_ldr_literal_wide(0xF85F, 0x2008).unwrap();
        assert_eq!(load, LiteralLoad { rt: 2, offset: -8 });
        // ldr.w r0, [r1, #4] is not PC-relative
        assert!(decode_ldr_literal_wide(0xF8D1, 0x0004).is_none());
    }

    #[test]
    fn test_literal_address() {
        assert_eq!(literal_address(0x100, 4, 0), 0x104);
        assert_eq!(literal_address(0x102, 4, 0), 0x104);
        assert_eq!(literal_address(0x102, 4, 8), 0x10C);
        assert_eq!(literal_address(0x102, 2, 0), 0x106);
        assert_eq!(literal_address(0x0800_0010, 4, -8), 0x0800_000C);
    }

    #[test]
    fn test_move_wide() {
        // movw r0, #0x1234 / movt r0, #0x4001
        let [a, b] = encode::movw(0, 0x1234);
        let mv = decode_move_wide(a, b).unwrap();
        assert_eq!(mv.half, MoveHalf::Lower);
        assert_eq!((mv.rd, mv.imm16), (0, 0x1234));

        let [a, b] = encode::movt(5, 0x4001);
        let mv = decode_move_wide(a, b).unwrap();
        assert_eq!(mv.half, MoveHalf::Upper);
        assert_eq!((mv.rd, mv.imm16), (5, 0x4001));

        // Known encoding: movw r3, #0xF800 = F64F 0300
        let mv = decode_move_wide(0xF64F, 0x0300).unwrap();
        assert_eq!((mv.rd, mv.imm16), (3, 0xF800));

        // SP destination is unpredictable
        let [a, b] = encode::movw(13, 1);
        assert!(decode_move_wide(a, b).is_none());
    }

    #[test]
    fn test_load_store_imm() {
        // str r1, [r0, #12]
        let op = decode_load_store_imm(encode::str_imm(1, 0, 3)).unwrap();
        assert_eq!((op.rt, op.rn, op.offset), (1, 0, 12));
        assert_eq!(op.access, Access::WRITE);

        // ldrh r2, [r3, #6] = 0x88DA
        let op = decode_load_store_imm(0x88DA).unwrap();
        assert_eq!((op.rt, op.rn, op.offset), (2, 3, 6));
        assert_eq!(op.access, Access::READ);

        // strb r0, [r4, #1] = 0x7060
        let op = decode_load_store_imm(0x7060).unwrap();
        assert_eq!((op.rt, op.rn, op.offset), (0, 4, 1));

        assert!(decode_load_store_imm(0x4770).is_none()); // BX LR
    }

    #[test]
    fn test_clobbered_register() {
        assert_eq!(clobbered_register(encode::movs_imm(2, 1)), Some(2));
        assert_eq!(clobbered_register(encode::ldr_literal(6, 0)), Some(6));
        assert_eq!(clobbered_register(0x1A8B), Some(3)); // subs r3, r1, r2
        assert_eq!(clobbered_register(0xBF00), None);
    }
}
