//! `MOVW`/`MOVT` constant construction.
//!
//! Thumb-2 code without literal pools builds 32-bit constants with a
//! `MOVW Rd, #lo16` and a later `MOVT Rd, #hi16`. The compiler may
//! schedule unrelated instructions in between, so the `MOVT` is searched
//! for within a small instruction window.

use crate::thumb::{self, MoveHalf};
use crate::types::IdentifyOptions;

use super::read_u16;

/// Try to decode a `MOVW` at `offset` and pair it with its `MOVT`.
///
/// Returns the synthesized constant. A second `MOVW` to the same register
/// before any `MOVT` abandons the pair.
pub fn decode_at(data: &[u8], offset: usize, options: &IdentifyOptions) -> Option<u32> {
    let low = thumb::decode_move_wide(read_u16(data, offset)?, read_u16(data, offset + 2)?)?;
    if low.half != MoveHalf::Lower {
        return None;
    }

    let mut pos = offset + 4;
    for _ in 0..=options.split_immediate_gap {
        let hw = read_u16(data, pos)?;
        let length = thumb::thumb_instruction_length(hw);
        if length == 4 {
            let hw2 = read_u16(data, pos + 2)?;
            if let Some(mv) = thumb::decode_move_wide(hw, hw2) {
                if mv.rd == low.rd {
                    return match mv.half {
                        MoveHalf::Upper => {
                            Some((u32::from(mv.imm16) << 16) | u32::from(low.imm16))
                        }
                        MoveHalf::Lower => None,
                    };
                }
            }
        }
        pos += length;
    }
    None
}
