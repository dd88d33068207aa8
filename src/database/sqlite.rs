//! SQLite peripheral database reader.
//!
//! Reads the layout produced by the SVD import tooling: one `device` row
//! per chip, its `peripheral` rows, and their `register` rows with absolute
//! addresses. The database is opened read-only and loaded once per
//! handle: later changes to the file are not seen.

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::{ChipDatabase, DatabaseReader};
use crate::error::{IdentifyError, Result, ResultExt};
use crate::types::{Access, ChipId, ChipProfile, Peripheral, Register};

/// Schema of the peripheral database.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS "device" (
    id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
    device_name TEXT NOT NULL,
    device_vendor TEXT,
    svd_filename TEXT NOT NULL,
    UNIQUE(device_name)
);
CREATE TABLE IF NOT EXISTS "peripheral" (
    id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER,
    peripheral_name TEXT NOT NULL,
    peripheral_address INTEGER NOT NULL,
    FOREIGN KEY(device_id) REFERENCES device(id),
    UNIQUE(peripheral_name, device_id)
);
CREATE TABLE IF NOT EXISTS "register" (
    id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
    peripheral_id INTEGER,
    register_name TEXT NOT NULL,
    register_access INTEGER NOT NULL,
    register_address INTEGER NOT NULL,
    register_size INTEGER NOT NULL,
    FOREIGN KEY(peripheral_id) REFERENCES peripheral(id),
    UNIQUE(register_name, peripheral_id)
);
CREATE INDEX IF NOT EXISTS "register_register_address_idx" ON register(register_address);
"#;

const REQUIRED_TABLES: [&str; 3] = ["device", "peripheral", "register"];

/// Read-only view over a SQLite peripheral database.
#[derive(Debug)]
pub struct SqliteDatabase {
    conn: Connection,
    loaded: OnceLock<ChipDatabase>,
}

impl SqliteDatabase {
    /// Open an existing database file read-only and check its tables.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifyError::DatabaseUnavailable`] if the file is missing,
    /// cannot be opened, or lacks the expected tables.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IdentifyError::database(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .db_context(format!("opening {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// Wrap an open connection, checking that the expected tables exist.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifyError::DatabaseUnavailable`] if a table is missing.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        for table in REQUIRED_TABLES {
            let found: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![table],
                    |row| row.get(0),
                )
                .db_context("reading database schema")?;
            if found == 0 {
                return Err(IdentifyError::database(format!(
                    "missing table '{}' in peripheral database",
                    table
                )));
            }
        }
        Ok(Self {
            conn,
            loaded: OnceLock::new(),
        })
    }

    /// Profiles and base-address index, read from the tables on first use.
    fn loaded(&self) -> Result<&ChipDatabase> {
        if let Some(db) = self.loaded.get() {
            return Ok(db);
        }
        let profiles = self
            .load_profiles()
            .db_context("reading chip profiles from SQLite")?;
        debug!(chips = profiles.len(), "loaded SQLite chip database");
        Ok(self.loaded.get_or_init(|| ChipDatabase::new(profiles)))
    }

    fn load_profiles(&self) -> rusqlite::Result<Vec<ChipProfile>> {
        let mut profiles = Vec::new();
        let mut device_index: HashMap<i64, usize> = HashMap::new();

        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, device_name, device_vendor, svd_filename
            FROM device
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;
        for row in rows {
            let (id, name, vendor, source) = row?;
            let mut profile = ChipProfile::new(ChipId::new(vendor.unwrap_or_default(), name));
            profile.source = source;
            device_index.insert(id, profiles.len());
            profiles.push(profile);
        }

        // (device index, peripheral index) by peripheral row id
        let mut peripheral_index: HashMap<i64, (usize, usize)> = HashMap::new();
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, device_id, peripheral_name, peripheral_address
            FROM peripheral
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        for row in rows {
            let (id, device_id, name, address) = row?;
            let Some(&device) = device_id.and_then(|d| device_index.get(&d)) else {
                warn!(peripheral = %name, "peripheral without device, skipping");
                continue;
            };
            let Ok(address) = u32::try_from(address) else {
                warn!(peripheral = %name, address, "peripheral address out of range, skipping");
                continue;
            };
            let peripherals = &mut profiles[device].peripherals;
            peripheral_index.insert(id, (device, peripherals.len()));
            peripherals.push(Peripheral::new(name, address));
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT peripheral_id, register_name, register_access, register_address, register_size
            FROM register
            ORDER BY id
            "#,
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let peripheral_id: Option<i64> = row.get(0)?;
            let name: String = row.get(1)?;
            let Some(&(device, peripheral)) =
                peripheral_id.and_then(|p| peripheral_index.get(&p))
            else {
                continue;
            };
            let address: i64 = row.get(3)?;
            let size: i64 = row.get(4)?;
            let (Ok(address), Ok(size_bits)) = (u32::try_from(address), u32::try_from(size)) else {
                warn!(register = %name, address, size, "register out of range, skipping");
                continue;
            };
            let access = access_from_column(row.get_ref(2)?).unwrap_or_default();
            profiles[device].peripherals[peripheral]
                .registers
                .push(Register {
                    name,
                    address,
                    size_bits,
                    access,
                });
        }

        Ok(profiles)
    }
}

/// The access column holds SVD strings, or bit flags in hand-built databases.
fn access_from_column(value: ValueRef<'_>) -> Option<Access> {
    match value {
        ValueRef::Text(text) => std::str::from_utf8(text).ok().and_then(Access::from_svd),
        ValueRef::Integer(bits) => u8::try_from(bits).ok().and_then(Access::from_bits),
        _ => None,
    }
}

impl DatabaseReader for SqliteDatabase {
    fn profiles(&self) -> Result<Cow<'_, [ChipProfile]>> {
        self.loaded()?.profiles()
    }

    fn chips_with_base(&self, address: u32) -> Option<Result<Vec<ChipId>>> {
        match self.loaded() {
            Ok(db) => db.chips_with_base(address),
            Err(e) => Some(Err(e)),
        }
    }
}
