//! PC-relative literal-pool loads.
//!
//! Compilers materialize peripheral base addresses as 32-bit literals
//! placed after a function and loaded with `LDR Rt, [PC, #imm]`. Reading
//! the literal back gives the address the program works with.

use crate::thumb::{self, LiteralLoad};
use crate::types::{AddressOrigin, FirmwareImage, IdentifyOptions};

use super::{read_u16, read_u32};

/// A literal load and the value it loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiteralHit {
    /// Loaded 32-bit value
    pub value: u32,
    /// Destination register
    pub rt: u8,
    /// Encoding that produced it
    pub origin: AddressOrigin,
    /// Length of the load instruction in bytes
    pub length: usize,
}

/// Try to decode a literal load at `offset` and read its literal.
///
/// Returns `None` for any other encoding and for literals outside the image.
pub fn decode_at(
    image: &FirmwareImage,
    offset: usize,
    options: &IdentifyOptions,
) -> Option<LiteralHit> {
    let data = image.data();
    let hw1 = read_u16(data, offset)?;

    if let Some(load) = thumb::decode_ldr_literal(hw1) {
        if options.strict_boundaries && offset >= 2 {
            let prev = read_u16(data, offset - 2)?;
            if thumb::is_thumb2_prefix(prev) {
                return None;
            }
        }
        return read_literal(image, offset, load, options).map(|value| LiteralHit {
            value,
            rt: load.rt,
            origin: AddressOrigin::LiteralPool,
            length: 2,
        });
    }

    let hw2 = read_u16(data, offset + 2)?;
    let load = thumb::decode_ldr_literal_wide(hw1, hw2)?;
    read_literal(image, offset, load, options).map(|value| LiteralHit {
        value,
        rt: load.rt,
        origin: AddressOrigin::LiteralPoolWide,
        length: 4,
    })
}

fn read_literal(
    image: &FirmwareImage,
    offset: usize,
    load: LiteralLoad,
    options: &IdentifyOptions,
) -> Option<u32> {
    let pc = image.address_of(offset);
    let address = thumb::literal_address(pc, options.literal_alignment, load.offset);
    let literal_offset = image.offset_of(address)?;
    read_u32(image.data(), literal_offset)
}
