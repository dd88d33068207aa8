//! Register accesses through a literal-loaded base.
//!
//! After `LDR Rt, [PC, #imm]` the following 16-bit instructions are
//! followed while `Rt` (or a copy of it) still holds the literal. Each
//! `LDR`/`STR` with immediate offset through it yields the exact register
//! address that was touched.

use crate::thumb;
use crate::types::{Access, RegisterAccess};

use super::read_u16;

/// Follow the instructions starting at `offset` while `rt` holds `literal`.
///
/// Stops at the first 32-bit or unrecognized instruction, once no tracked
/// register is left, or after `window` instructions.
pub fn trace(
    data: &[u8],
    offset: usize,
    literal: u32,
    rt: u8,
    window: usize,
) -> Vec<RegisterAccess> {
    let mut accesses = Vec::new();
    if rt > 7 {
        return accesses;
    }
    let mut tracked: u8 = 1 << rt;
    let mut pos = offset;

    for _ in 0..window {
        if tracked == 0 {
            break;
        }
        let Some(hw) = read_u16(data, pos) else {
            break;
        };
        if thumb::is_thumb2_prefix(hw) {
            break;
        }

        if let Some(op) = thumb::decode_load_store_imm(hw) {
            if tracked & (1 << op.rn) != 0 {
                accesses.push(RegisterAccess {
                    address: literal.wrapping_add(op.offset),
                    access: op.access,
                    offset: pos,
                });
            }
            if op.access.contains(Access::READ) {
                tracked &= !(1 << op.rt);
            }
        } else if let Some(reg) = thumb::clobbered_register(hw) {
            tracked &= !(1 << reg);
        } else {
            break;
        }
        pos += 2;
    }

    accesses
}
