//! Chip peripheral databases.
//!
//! The matcher only sees the [`DatabaseReader`] trait. Two readers ship
//! with the crate: [`ChipDatabase`], an in-memory store that persists as
//! JSON, and (with the `sqlite` feature) [`sqlite::SqliteDatabase`], which
//! reads the `device`/`peripheral`/`register` tables built from SVD files.

#[cfg(feature = "sqlite")]
pub mod sqlite;

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{IdentifyError, Result, ResultExt};
use crate::types::{ChipId, ChipProfile};

/// Version written to and accepted from JSON database files.
pub const JSON_FORMAT_VERSION: u32 = 1;

/// Read interface over a chip peripheral database.
///
/// Implementations must present a stable view for the duration of one
/// identification run.
pub trait DatabaseReader {
    /// All chip profiles.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifyError::DatabaseUnavailable`] when the backing
    /// store cannot be read.
    fn profiles(&self) -> Result<Cow<'_, [ChipProfile]>>;

    /// Chips having a peripheral at `address`.
    ///
    /// Readers with an address index return `Some`, which lets the matcher
    /// look up each observed address instead of scanning every chip.
    fn chips_with_base(&self, _address: u32) -> Option<Result<Vec<ChipId>>> {
        None
    }
}

impl DatabaseReader for Vec<ChipProfile> {
    fn profiles(&self) -> Result<Cow<'_, [ChipProfile]>> {
        Ok(Cow::Borrowed(self.as_slice()))
    }
}

/// A single `profiles()` read shared by every step of one run.
///
/// Index lookups still go to the wrapped reader.
pub(crate) struct Snapshot<'a> {
    profiles: Cow<'a, [ChipProfile]>,
    reader: &'a dyn DatabaseReader,
}

impl<'a> Snapshot<'a> {
    pub(crate) fn take(reader: &'a dyn DatabaseReader) -> Result<Self> {
        Ok(Self {
            profiles: reader.profiles()?,
            reader,
        })
    }
}

impl DatabaseReader for Snapshot<'_> {
    fn profiles(&self) -> Result<Cow<'_, [ChipProfile]>> {
        Ok(Cow::Borrowed(self.profiles.as_ref()))
    }

    fn chips_with_base(&self, address: u32) -> Option<Result<Vec<ChipId>>> {
        self.reader.chips_with_base(address)
    }
}

/// On-disk JSON layout.
#[derive(Debug, Serialize, Deserialize)]
struct DatabaseFile {
    version: u32,
    chips: Vec<ChipProfile>,
}

/// In-memory chip database indexed by peripheral base address.
#[derive(Debug, Clone, Default)]
pub struct ChipDatabase {
    profiles: Vec<ChipProfile>,
    by_base: BTreeMap<u32, Vec<usize>>,
}

impl ChipDatabase {
    /// Create a database from profiles. Later duplicates of a chip id are ignored.
    pub fn new(profiles: impl IntoIterator<Item = ChipProfile>) -> Self {
        let mut db = Self::default();
        for profile in profiles {
            db.insert(profile);
        }
        db
    }

    /// Add a profile. Returns `false` if a chip with the same id already exists.
    pub fn insert(&mut self, profile: ChipProfile) -> bool {
        if self.get(&profile.id).is_some() {
            warn!(chip = %profile.id, "duplicate chip profile ignored");
            return false;
        }
        let index = self.profiles.len();
        for base in profile.base_addresses() {
            self.by_base.entry(base).or_default().push(index);
        }
        self.profiles.push(profile);
        true
    }

    /// Look up a profile by chip id.
    pub fn get(&self, id: &ChipId) -> Option<&ChipProfile> {
        self.profiles.iter().find(|p| &p.id == id)
    }

    /// Number of profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// True if the database holds no profiles.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Iterate over the profiles in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ChipProfile> {
        self.profiles.iter()
    }

    /// Load a database from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifyError::DatabaseUnavailable`] for malformed JSON or
    /// an unsupported format version.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        let file: DatabaseFile =
            serde_json::from_reader(reader).db_context("parsing JSON chip database")?;
        if file.version != JSON_FORMAT_VERSION {
            return Err(IdentifyError::database(format!(
                "unsupported JSON database version {} (expected {})",
                file.version, JSON_FORMAT_VERSION
            )));
        }
        let db = Self::new(file.chips);
        debug!(chips = db.len(), "loaded JSON chip database");
        Ok(db)
    }

    /// Load a database from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifyError::DatabaseUnavailable`] if the file cannot be
    /// opened or parsed.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).db_context(format!("opening {}", path.display()))?;
        Self::from_json_reader(BufReader::new(file))
    }

    /// Write the database as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifyError::DatabaseUnavailable`] if serialization fails.
    pub fn to_json_writer<W: Write>(&self, writer: W) -> Result<()> {
        let file = DatabaseFile {
            version: JSON_FORMAT_VERSION,
            chips: self.profiles.clone(),
        };
        serde_json::to_writer_pretty(writer, &file).db_context("writing JSON chip database")
    }

    /// Write the database to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifyError::DatabaseUnavailable`] if the file cannot be
    /// created or written.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).db_context(format!("creating {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        self.to_json_writer(&mut writer)?;
        writer.flush().db_context(format!("writing {}", path.display()))
    }
}

impl DatabaseReader for ChipDatabase {
    fn profiles(&self) -> Result<Cow<'_, [ChipProfile]>> {
        Ok(Cow::Borrowed(self.profiles.as_slice()))
    }

    fn chips_with_base(&self, address: u32) -> Option<Result<Vec<ChipId>>> {
        let ids = self
            .by_base
            .get(&address)
            .map(|indices| indices.iter().map(|&i| self.profiles[i].id.clone()).collect())
            .unwrap_or_default();
        Some(Ok(ids))
    }
}
