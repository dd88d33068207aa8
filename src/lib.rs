//! chiprec - Cortex-M chip identification from raw firmware
//!
//! This library recovers the memory-mapped I/O addresses a stripped
//! firmware image touches and ranks the chips of a peripheral database by
//! how well their peripheral layout explains those addresses.
//!
//! # Features
//!
//! - **Address Extraction**: Literal-pool loads (16- and 32-bit) and `MOVW`/`MOVT` pairs
//! - **Elimination Matching**: Chips explaining none of the observed addresses are ruled out
//! - **Register Tracing**: Loads and stores through a loaded base narrow the set further
//! - **Pluggable Databases**: In-memory/JSON store, or a SQLite database built from SVD files
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use chiprec::{identify_file, ChipDatabase, IdentifyOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let database = ChipDatabase::from_json_file("chips.json")?;
//!     let report = identify_file("firmware.bin", 0x0800_0000, &database, &IdentifyOptions::new())?;
//!     for candidate in report.matches.best_ties() {
//!         println!("{} ({:.0}%)", candidate.chip, candidate.score * 100.0);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Identification is elimination, not confirmation: the candidates are the
//! chips the firmware could not rule out.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

pub mod database;
pub mod error;
pub mod extractor;
pub mod formatter;
pub mod matcher;
pub mod thumb;
pub mod types;

pub use database::{ChipDatabase, DatabaseReader};
pub use error::{IdentifyError, Result};
pub use types::{
    Candidate, ChipId, ChipProfile, FirmwareImage, Identification, IdentifyOptions, MatchResult,
};

use std::path::Path;
use tracing::{debug, info};

/// Identify the chip a firmware image was built for.
///
/// Runs extraction, base-address matching and, when
/// [`IdentifyOptions::register_elimination`] is set, register-level strict
/// elimination. The database is read once per call.
///
/// # Errors
///
/// * [`IdentifyError::InvalidInput`] - empty or unscannable image
/// * [`IdentifyError::NoCandidates`] - the database has nothing to match against
/// * [`IdentifyError::DatabaseUnavailable`] - the database could not be read
/// * [`IdentifyError::Config`] - inconsistent options
///
/// # Example
///
/// ```rust
/// use chiprec::{identify, ChipDatabase, ChipId, ChipProfile, FirmwareImage, IdentifyOptions};
///
/// let database = ChipDatabase::new([
///     ChipProfile::from_base_addresses(ChipId::new("", "ChipA"), [0x4002_1000]),
///     ChipProfile::from_base_addresses(ChipId::new("", "ChipB"), [0x5000_0000]),
/// ]);
///
/// // ldr r0, [pc, #0]; nop; .word 0x40021000
/// let mut bytes = vec![0x00, 0x48, 0x00, 0xBF];
/// bytes.extend_from_slice(&0x4002_1000u32.to_le_bytes());
///
/// let report = identify(&FirmwareImage::new(bytes), &database, &IdentifyOptions::new())?;
/// assert_eq!(report.matches.best().unwrap().chip.name, "ChipA");
/// # Ok::<(), chiprec::IdentifyError>(())
/// ```
pub fn identify(
    image: &FirmwareImage,
    database: &dyn DatabaseReader,
    options: &IdentifyOptions,
) -> Result<Identification> {
    let extraction = extractor::extract_report(image, options)?;
    let observed = extraction.addresses();
    let database = crate::database::Snapshot::take(database)?;
    let matches = matcher::rank(&observed, &database, options)?;

    let registers = if options.register_elimination {
        if extraction.register_accesses.is_empty() {
            debug!("register elimination requested, but no register accesses were traced");
            None
        } else {
            Some(matcher::intersect::eliminate_by_registers(
                &extraction.register_accesses,
                &database,
            )?)
        }
    } else {
        None
    };

    info!(
        bytes = image.len(),
        observed = observed.len(),
        candidates = matches.candidates.len(),
        "identification finished"
    );

    Ok(Identification {
        firmware_sha256: image.sha256_hex(),
        image_len: image.len(),
        base_address: image.base_address(),
        extraction,
        matches,
        registers,
    })
}

/// Identify raw bytes loaded at `base_address`.
///
/// # Errors
///
/// Same as [`identify`].
pub fn identify_with_options(
    data: &[u8],
    base_address: u32,
    database: &dyn DatabaseReader,
    options: &IdentifyOptions,
) -> Result<Identification> {
    identify(&FirmwareImage::with_base(data, base_address), database, options)
}

/// Read a firmware file and identify it.
///
/// # Errors
///
/// Returns [`IdentifyError::Io`] if the file cannot be read, plus
/// everything [`identify`] can return.
pub fn identify_file<P: AsRef<Path>>(
    path: P,
    base_address: u32,
    database: &dyn DatabaseReader,
    options: &IdentifyOptions,
) -> Result<Identification> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    debug!(path = %path.display(), bytes = data.len(), "read firmware");
    identify(&FirmwareImage::with_base(data, base_address), database, options)
}

/// Get version information for this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
