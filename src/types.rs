//! Core types for chip identification.
//!
//! This module defines the firmware image, the chip database records,
//! the addresses pulled out of the instruction stream and the ranked
//! match results handed back to callers.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{IdentifyError, Result};

/// Conventional start of the Cortex-M peripheral region.
pub const DEFAULT_MMIO_THRESHOLD: u32 = 0x4000_0000;

// =============================================================================
// Firmware
// =============================================================================

/// A raw firmware dump and the address it is loaded at.
///
/// The image is read once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
    base_address: u32,
}

impl FirmwareImage {
    /// Create an image loaded at address 0.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self::with_base(data, 0)
    }

    /// Create an image loaded at `base_address`.
    pub fn with_base(data: impl Into<Vec<u8>>, base_address: u32) -> Self {
        Self {
            data: data.into(),
            base_address,
        }
    }

    /// Raw image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Load address of the first byte.
    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the image holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Translate an absolute address into a buffer offset, if it is inside the image.
    pub fn offset_of(&self, address: u32) -> Option<usize> {
        let offset = address.checked_sub(self.base_address)? as usize;
        (offset < self.data.len()).then_some(offset)
    }

    /// Absolute address of a buffer offset.
    pub fn address_of(&self, offset: usize) -> u32 {
        self.base_address.wrapping_add(offset as u32)
    }

    /// Lowercase hex SHA-256 of the image bytes.
    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.data))
    }
}

// =============================================================================
// Chip database records
// =============================================================================

/// Vendor and part name of a chip variant.
///
/// Ordering is lexicographic on vendor, then name. The matcher relies on it
/// to break score ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChipId {
    /// Vendor, empty when the description does not name one
    #[serde(default)]
    pub vendor: String,
    /// Part name, e.g. `STM32F103xx`
    pub name: String,
}

impl ChipId {
    /// Create a chip identifier.
    pub fn new(vendor: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.vendor.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} {}", self.vendor, self.name)
        }
    }
}

bitflags! {
    /// Read/write access, used for observed accesses and register permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Access: u8 {
        /// Load from the address
        const READ = 0b01;
        /// Store to the address
        const WRITE = 0b10;
    }
}

impl Default for Access {
    fn default() -> Self {
        Access::READ | Access::WRITE
    }
}

impl Access {
    /// Parse an SVD access string, tolerating the vendor typos seen in the wild.
    pub fn from_svd(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        let value = value
            .replace("read-onlye", "read-only")
            .replace("read-wirte", "read-write")
            .replace("read_write", "read-write")
            .replace("read-writeonce", "read-write")
            .replace("writeonce", "write-only");
        match value.as_str() {
            "read-only" | "read" => Some(Access::READ),
            "write-only" | "write" => Some(Access::WRITE),
            "read-write" => Some(Access::READ | Access::WRITE),
            _ => None,
        }
    }

    /// Short label: `read`, `write` or `read-write`.
    pub fn label(self) -> &'static str {
        if self == Access::READ {
            "read"
        } else if self == Access::WRITE {
            "write"
        } else if self.is_empty() {
            "none"
        } else {
            "read-write"
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn default_register_size() -> u32 {
    32
}

/// A single peripheral register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    /// Register name
    pub name: String,
    /// Absolute address of the register
    pub address: u32,
    /// Width in bits
    #[serde(default = "default_register_size")]
    pub size_bits: u32,
    /// Declared access permission
    #[serde(default)]
    pub access: Access,
}

impl Register {
    /// Create a 32-bit read-write register.
    pub fn new(name: impl Into<String>, address: u32) -> Self {
        Self {
            name: name.into(),
            address,
            size_bits: default_register_size(),
            access: Access::default(),
        }
    }

    /// True if `address` falls inside this register's bytes.
    pub fn contains(&self, address: u32) -> bool {
        let width = u64::from((self.size_bits / 8).max(1));
        let start = u64::from(self.address);
        (start..start + width).contains(&u64::from(address))
    }
}

/// A peripheral block: a base address and optionally its registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peripheral {
    /// Peripheral name, e.g. `USART1`
    pub name: String,
    /// Base address of the register block
    pub base_address: u32,
    /// Size of the register block in bytes, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    /// Registers, when the description lists them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registers: Vec<Register>,
}

impl Peripheral {
    /// Create a peripheral without registers.
    pub fn new(name: impl Into<String>, base_address: u32) -> Self {
        Self {
            name: name.into(),
            base_address,
            size: None,
            registers: Vec::new(),
        }
    }

    /// Add a register.
    pub fn with_register(mut self, register: Register) -> Self {
        self.registers.push(register);
        self
    }
}

/// Everything the database knows about one chip variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipProfile {
    /// Chip identifier
    #[serde(flatten)]
    pub id: ChipId,
    /// Description file the profile was built from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Peripheral blocks
    #[serde(default)]
    pub peripherals: Vec<Peripheral>,
}

impl ChipProfile {
    /// Create an empty profile.
    pub fn new(id: ChipId) -> Self {
        Self {
            id,
            source: None,
            peripherals: Vec::new(),
        }
    }

    /// Create a profile from bare base addresses, naming peripherals after their address.
    pub fn from_base_addresses(id: ChipId, bases: impl IntoIterator<Item = u32>) -> Self {
        let mut profile = Self::new(id);
        for base in bases {
            profile
                .peripherals
                .push(Peripheral::new(format!("P{:08X}", base), base));
        }
        profile
    }

    /// Add a peripheral.
    pub fn with_peripheral(mut self, peripheral: Peripheral) -> Self {
        self.peripherals.push(peripheral);
        self
    }

    /// Set of peripheral base addresses.
    pub fn base_addresses(&self) -> BTreeSet<u32> {
        self.peripherals.iter().map(|p| p.base_address).collect()
    }

    /// First peripheral whose base address is `address`.
    pub fn peripheral_at(&self, address: u32) -> Option<&Peripheral> {
        self.peripherals.iter().find(|p| p.base_address == address)
    }
}

// =============================================================================
// Extraction output
// =============================================================================

/// Instruction idiom an address was recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressOrigin {
    /// 16-bit `LDR Rt, [PC, #imm]`
    LiteralPool,
    /// 32-bit `LDR.W Rt, [PC, #±imm]`
    LiteralPoolWide,
    /// `MOVW` + `MOVT` pair
    SplitImmediate,
}

impl fmt::Display for AddressOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AddressOrigin::LiteralPool => "ldr literal",
            AddressOrigin::LiteralPoolWide => "ldr.w literal",
            AddressOrigin::SplitImmediate => "movw/movt",
        };
        f.write_str(s)
    }
}

/// An absolute address the program appears to form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateAddress {
    /// The 32-bit address
    pub address: u32,
    /// Idiom it was recovered from
    pub origin: AddressOrigin,
    /// Buffer offset of the instruction that formed it
    pub offset: usize,
}

/// A load or store at a fixed offset from a literal-pool address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterAccess {
    /// Accessed address (literal plus scaled immediate)
    pub address: u32,
    /// Whether the instruction loads or stores
    pub access: Access,
    /// Buffer offset of the load/store instruction
    pub offset: usize,
}

/// Everything the extractor found in one image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionReport {
    /// Peripheral-relevant addresses in scan order, duplicates included
    pub candidates: Vec<CandidateAddress>,
    /// Register accesses in scan order, deduplicated on (address, access)
    pub register_accesses: Vec<RegisterAccess>,
    /// Number of recovered addresses dropped by the MMIO window
    pub discarded: usize,
}

impl ExtractionReport {
    /// Deduplicated set of peripheral-relevant addresses.
    pub fn addresses(&self) -> BTreeSet<u32> {
        self.candidates.iter().map(|c| c.address).collect()
    }
}

// =============================================================================
// Matching output
// =============================================================================

/// An observed address that equals one of a chip's peripheral bases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedAddress {
    /// The observed address
    pub address: u32,
    /// Peripheral at that base, when the profile names one
    pub peripheral: Option<String>,
}

/// Why a chip scored the way it did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    /// Observed addresses the chip explains, ascending
    pub matched: Vec<MatchedAddress>,
    /// Observed addresses the chip does not explain, ascending
    pub unmatched: Vec<u32>,
}

/// One ranked chip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Chip identifier
    pub chip: ChipId,
    /// Description file of the chip profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Fraction of observed addresses explained (0.0 - 1.0)
    pub score: f64,
    /// Number of observed addresses explained
    pub matched_count: usize,
    /// True when the chip explains none of a non-empty observed set
    pub eliminated: bool,
    /// Matched and unmatched addresses
    pub explanation: Explanation,
}

/// Ranked outcome of one matching run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Candidates, best first
    pub candidates: Vec<Candidate>,
    /// Number of distinct observed addresses
    pub observed: usize,
    /// Number of chip profiles examined
    pub chips_examined: usize,
    /// Number of chips eliminated
    pub eliminated: usize,
}

impl MatchResult {
    /// True if no chip survived.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Highest ranked candidate.
    pub fn best(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    /// All candidates sharing the best score.
    pub fn best_ties(&self) -> &[Candidate] {
        let Some(best) = self.best() else {
            return &[];
        };
        let n = self
            .candidates
            .iter()
            .take_while(|c| c.matched_count == best.matched_count)
            .count();
        &self.candidates[..n]
    }
}

/// Register evidence supporting a chip in strict elimination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterEvidence {
    /// Observed address
    pub address: u32,
    /// Observed access kind
    pub access: Access,
    /// Peripheral owning the register
    pub peripheral: String,
    /// Register name
    pub register: String,
}

/// A chip that survived strict elimination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivingChip {
    /// Chip identifier
    pub chip: ChipId,
    /// Registers explaining the applied accesses, in access order
    pub evidence: Vec<RegisterEvidence>,
}

/// Why a register access did not constrain strict elimination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No chip in the database has a register at the address
    NoChipHasRegister,
    /// Applying the access would eliminate every remaining chip
    EmptyIntersection,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoChipHasRegister => write!(f, "no chip has a register there"),
            SkipReason::EmptyIntersection => write!(f, "intersection would be empty"),
        }
    }
}

/// A register access ignored by strict elimination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedAccess {
    /// Observed address
    pub address: u32,
    /// Observed access kind
    pub access: Access,
    /// Why it was skipped
    pub reason: SkipReason,
}

/// Outcome of register-level strict elimination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterElimination {
    /// Surviving chips ordered by identifier
    pub survivors: Vec<SurvivingChip>,
    /// Accesses that narrowed the set
    pub applied: usize,
    /// Accesses that were skipped
    pub skipped: Vec<SkippedAccess>,
}

/// Full result of identifying one firmware image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identification {
    /// SHA-256 of the image bytes
    pub firmware_sha256: String,
    /// Image length in bytes
    pub image_len: usize,
    /// Load address used for PC-relative decoding
    pub base_address: u32,
    /// Extractor output
    pub extraction: ExtractionReport,
    /// Ranked base-address matches
    pub matches: MatchResult,
    /// Register-level elimination, when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registers: Option<RegisterElimination>,
}

// =============================================================================
// Options
// =============================================================================

/// Options controlling extraction and matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyOptions {
    /// Addresses below this are not considered peripheral accesses
    pub mmio_threshold: u32,
    /// Addresses at or above this are dropped too, when set
    pub mmio_ceiling: Option<u32>,
    /// Keep at most this many candidates
    pub max_results: Option<usize>,
    /// Drop candidates scoring below this (0.0 - 1.0)
    pub min_score: f64,
    /// Keep eliminated chips in the output with score 0
    pub include_eliminated: bool,
    /// Alignment applied to PC before adding a literal offset
    pub literal_alignment: u32,
    /// Instructions allowed between MOVW and its MOVT
    pub split_immediate_gap: usize,
    /// Instructions followed after a literal load when tracing register accesses
    pub register_trace_window: usize,
    /// Skip 16-bit literal loads that may be the tail of a 32-bit instruction
    pub strict_boundaries: bool,
    /// Run register-level strict elimination as well
    pub register_elimination: bool,
}

impl IdentifyOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            mmio_threshold: DEFAULT_MMIO_THRESHOLD,
            mmio_ceiling: None,
            max_results: None,
            min_score: 0.0,
            include_eliminated: false,
            literal_alignment: 4,
            split_immediate_gap: 4,
            register_trace_window: 16,
            strict_boundaries: false,
            register_elimination: false,
        }
    }

    /// Options that trade recall for fewer false positives.
    ///
    /// Restricts addresses to the peripheral and external device windows
    /// below the private peripheral bus.
    pub fn strict() -> Self {
        Self {
            mmio_ceiling: Some(0xE000_0000),
            split_immediate_gap: 1,
            strict_boundaries: true,
            register_elimination: true,
            ..Self::new()
        }
    }

    /// Options that keep everything, including eliminated chips.
    pub fn permissive() -> Self {
        Self {
            include_eliminated: true,
            split_immediate_gap: 8,
            register_trace_window: 32,
            ..Self::new()
        }
    }

    /// True if `address` lies inside the configured MMIO window.
    pub fn is_peripheral_relevant(&self, address: u32) -> bool {
        address >= self.mmio_threshold && self.mmio_ceiling.map_or(true, |c| address < c)
    }

    /// Reject option combinations that cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifyError::Config`] naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.literal_alignment == 0 || !self.literal_alignment.is_power_of_two() {
            return Err(IdentifyError::Config {
                message: format!(
                    "literal alignment must be a power of two, got {}",
                    self.literal_alignment
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(IdentifyError::Config {
                message: format!("min score must be within 0.0 - 1.0, got {}", self.min_score),
            });
        }
        if let Some(ceiling) = self.mmio_ceiling {
            if ceiling <= self.mmio_threshold {
                return Err(IdentifyError::Config {
                    message: format!(
                        "MMIO ceiling 0x{:08X} is not above threshold 0x{:08X}",
                        ceiling, self.mmio_threshold
                    ),
                });
            }
        }
        Ok(())
    }
}

impl Default for IdentifyOptions {
    fn default() -> Self {
        Self::new()
    }
}
