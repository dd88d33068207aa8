//! Extraction of probable MMIO addresses from a Thumb instruction stream.
//!
//! Every halfword-aligned offset is tried as an instruction start. No
//! attempt is made to find true instruction boundaries: overlapping
//! speculative decodes are accepted, which costs some false positives but
//! does not miss addresses behind a mis-segmented stream. Bit patterns that
//! match no idiom are skipped silently.

pub mod literal_pool;
pub mod register_trace;
pub mod split_immediate;

use byteorder::{ByteOrder, LittleEndian};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, trace};

use crate::error::{IdentifyError, Result};
use crate::types::{
    Access, AddressOrigin, CandidateAddress, ExtractionReport, FirmwareImage, IdentifyOptions,
};

/// Read a little-endian halfword, `None` past the end of `data`.
pub(crate) fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(LittleEndian::read_u16(bytes))
}

/// Read a little-endian word, `None` past the end of `data`.
pub(crate) fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(LittleEndian::read_u32(bytes))
}

/// Extract the set of peripheral-relevant addresses referenced by the image.
///
/// # Errors
///
/// Same as [`extract_report`].
///
/// # Example
///
/// ```rust
/// use chiprec::{extractor, FirmwareImage, IdentifyOptions};
///
/// // ldr r0, [pc, #0]; nop; .word 0x40021000
/// let mut bytes = vec![0x00, 0x48, 0x00, 0xBF];
/// bytes.extend_from_slice(&0x4002_1000u32.to_le_bytes());
///
/// let addresses = extractor::extract(&FirmwareImage::new(bytes), &IdentifyOptions::new())?;
/// assert!(addresses.contains(&0x4002_1000));
/// # Ok::<(), chiprec::IdentifyError>(())
/// ```
pub fn extract(image: &FirmwareImage, options: &IdentifyOptions) -> Result<BTreeSet<u32>> {
    Ok(extract_report(image, options)?.addresses())
}

/// Extract addresses with their origins, plus traced register accesses.
///
/// # Errors
///
/// Returns [`IdentifyError::InvalidInput`] for an empty image or an odd
/// base address, and [`IdentifyError::Config`] for invalid options.
pub fn extract_report(image: &FirmwareImage, options: &IdentifyOptions) -> Result<ExtractionReport> {
    if image.is_empty() {
        return Err(IdentifyError::InvalidInput {
            message: "firmware image is empty".into(),
        });
    }
    if image.base_address() & 1 != 0 {
        return Err(IdentifyError::InvalidInput {
            message: format!(
                "base address 0x{:08X} is not halfword aligned",
                image.base_address()
            ),
        });
    }
    options.validate()?;

    let data = image.data();
    let mut report = ExtractionReport::default();
    let mut seen_accesses: HashSet<(u32, Access)> = HashSet::new();
    let mut literal_hits = 0usize;
    let mut split_hits = 0usize;

    let push = |report: &mut ExtractionReport,
                address: u32,
                origin: AddressOrigin,
                offset: usize| {
        if options.is_peripheral_relevant(address) {
            trace!(offset, address = %format!("0x{:08X}", address), %origin, "candidate");
            report.candidates.push(CandidateAddress {
                address,
                origin,
                offset,
            });
        } else {
            report.discarded += 1;
        }
    };

    let mut offset = 0;
    while offset + 2 <= data.len() {
        if let Some(hit) = literal_pool::decode_at(image, offset, options) {
            literal_hits += 1;
            if options.register_trace_window > 0 {
                let accesses = register_trace::trace(
                    data,
                    offset + hit.length,
                    hit.value,
                    hit.rt,
                    options.register_trace_window,
                );
                for access in accesses {
                    if options.is_peripheral_relevant(access.address)
                        && seen_accesses.insert((access.address, access.access))
                    {
                        report.register_accesses.push(access);
                    }
                }
            }
            push(&mut report, hit.value, hit.origin, offset);
        }

        if let Some(value) = split_immediate::decode_at(data, offset, options) {
            split_hits += 1;
            push(&mut report, value, AddressOrigin::SplitImmediate, offset);
        }

        offset += 2;
    }

    debug!(
        bytes = data.len(),
        literal_hits,
        split_hits,
        kept = report.candidates.len(),
        discarded = report.discarded,
        register_accesses = report.register_accesses.len(),
        "extraction finished"
    );

    Ok(report)
}
