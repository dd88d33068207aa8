//! Register-level strict elimination.
//!
//! Register accesses traced from literal-pool loads are applied one at a
//! time, in file order. Each access keeps only the chips that have a
//! register covering the accessed address. An access that no chip can
//! explain, or that would leave no chip at all, is skipped: accesses near
//! the end of the image are the most likely to be false positives.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::database::DatabaseReader;
use crate::error::{IdentifyError, Result};
use crate::types::{
    ChipProfile, RegisterAccess, RegisterElimination, RegisterEvidence, SkipReason,
    SkippedAccess, SurvivingChip,
};

/// Register location: (profile, peripheral, register) indices.
type RegisterRef = (usize, usize, usize);

/// Start address → registers starting there, across every profile.
struct RegisterIndex {
    by_start: BTreeMap<u32, Vec<RegisterRef>>,
    max_width: u32,
}

impl RegisterIndex {
    fn build(profiles: &[ChipProfile]) -> Self {
        let mut by_start: BTreeMap<u32, Vec<RegisterRef>> = BTreeMap::new();
        let mut max_width = 1;
        for (c, profile) in profiles.iter().enumerate() {
            for (p, peripheral) in profile.peripherals.iter().enumerate() {
                for (r, register) in peripheral.registers.iter().enumerate() {
                    max_width = max_width.max((register.size_bits / 8).max(1));
                    by_start.entry(register.address).or_default().push((c, p, r));
                }
            }
        }
        Self {
            by_start,
            max_width,
        }
    }

    /// Registers covering `address`, first per chip.
    fn covering<'a>(
        &self,
        profiles: &'a [ChipProfile],
        address: u32,
    ) -> BTreeMap<usize, (&'a str, &'a str)> {
        let low = address.saturating_sub(self.max_width - 1);
        let mut hits = BTreeMap::new();
        for refs in self.by_start.range(low..=address).map(|(_, refs)| refs) {
            for &(c, p, r) in refs {
                let peripheral = &profiles[c].peripherals[p];
                let register = &peripheral.registers[r];
                if register.contains(address) {
                    hits.entry(c)
                        .or_insert((peripheral.name.as_str(), register.name.as_str()));
                }
            }
        }
        hits
    }
}

/// Narrow the database down with traced register accesses.
///
/// When no access could be applied, `survivors` is empty and `applied` is
/// zero: the accesses did not constrain anything. A database without any
/// register gives the same empty result.
///
/// # Errors
///
/// Returns [`IdentifyError::NoCandidates`] for an empty database and
/// propagates reader failures.
pub fn eliminate_by_registers(
    accesses: &[RegisterAccess],
    database: &dyn DatabaseReader,
) -> Result<RegisterElimination> {
    let profiles = database.profiles()?;
    if profiles.is_empty() {
        return Err(IdentifyError::NoCandidates {
            reason: "chip database is empty".into(),
        });
    }

    let index = RegisterIndex::build(&profiles);
    if index.by_start.is_empty() {
        debug!("chip database lists no registers, nothing to narrow");
        return Ok(RegisterElimination::default());
    }

    let mut survivors: Option<BTreeMap<usize, Vec<RegisterEvidence>>> = None;
    let mut result = RegisterElimination::default();

    for access in accesses {
        let hits = index.covering(&profiles, access.address);
        let skip = |reason| SkippedAccess {
            address: access.address,
            access: access.access,
            reason,
        };
        if hits.is_empty() {
            debug!(address = %format!("0x{:08X}", access.address), "no chip has this register");
            result.skipped.push(skip(SkipReason::NoChipHasRegister));
            continue;
        }

        let evidence = |(peripheral, register): (&str, &str)| RegisterEvidence {
            address: access.address,
            access: access.access,
            peripheral: peripheral.to_string(),
            register: register.to_string(),
        };

        let narrowed: BTreeMap<usize, Vec<RegisterEvidence>> = match &survivors {
            None => hits
                .into_iter()
                .map(|(chip, names)| (chip, vec![evidence(names)]))
                .collect(),
            Some(current) => {
                let keep: BTreeSet<usize> = current.keys().copied().collect();
                hits.into_iter()
                    .filter(|(chip, _)| keep.contains(chip))
                    .map(|(chip, names)| {
                        let mut trail = current[&chip].clone();
                        trail.push(evidence(names));
                        (chip, trail)
                    })
                    .collect()
            }
        };

        if narrowed.is_empty() {
            debug!(address = %format!("0x{:08X}", access.address), "intersection would be empty");
            result.skipped.push(skip(SkipReason::EmptyIntersection));
            continue;
        }
        survivors = Some(narrowed);
        result.applied += 1;
    }

    let mut survivors: Vec<SurvivingChip> = survivors
        .unwrap_or_default()
        .into_iter()
        .map(|(chip, evidence)| SurvivingChip {
            chip: profiles[chip].id.clone(),
            evidence,
        })
        .collect();
    survivors.sort_by(|a, b| a.chip.cmp(&b.chip));
    result.survivors = survivors;

    info!(
        accesses = accesses.len(),
        applied = result.applied,
        skipped = result.skipped.len(),
        survivors = result.survivors.len(),
        "register elimination finished"
    );

    Ok(result)
}
