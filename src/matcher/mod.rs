//! Elimination matching of observed addresses against chip profiles.
//!
//! Each chip is scored by the fraction of observed addresses that equal
//! one of its peripheral base addresses. Chips explaining none of a
//! non-empty observed set are eliminated. Nothing is ever positively
//! confirmed: the output is the set of chips that could not be ruled out.

pub mod intersect;

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::database::DatabaseReader;
use crate::error::{IdentifyError, Result};
use crate::types::{
    Candidate, ChipId, ChipProfile, Explanation, IdentifyOptions, MatchResult, MatchedAddress,
};

/// Rank every chip in `database` against the observed address set.
///
/// Candidates are sorted by descending score, then by chip identifier.
///
/// # Errors
///
/// An empty database, or one without a single peripheral address, is
/// reported as [`IdentifyError::NoCandidates`]. Reader failures and
/// invalid options are propagated.
pub fn rank(
    observed: &BTreeSet<u32>,
    database: &dyn DatabaseReader,
    options: &IdentifyOptions,
) -> Result<MatchResult> {
    options.validate()?;

    let profiles = database.profiles()?;
    if profiles.is_empty() {
        return Err(IdentifyError::NoCandidates {
            reason: "chip database is empty".into(),
        });
    }
    if profiles.iter().all(|p| p.peripherals.is_empty()) {
        return Err(IdentifyError::NoCandidates {
            reason: "chip database has no peripheral addresses to test".into(),
        });
    }

    let index = matched_by_index(observed, database)?;
    if index.is_some() {
        debug!(observed = observed.len(), "using database address index");
    }

    let score = |profile: &ChipProfile| {
        let matched = index
            .as_ref()
            .map(|idx| idx.get(&profile.id).map(Vec::as_slice).unwrap_or_default());
        score_profile(profile, observed, matched)
    };

    #[cfg(feature = "parallel")]
    let scored: Vec<Candidate> = profiles.par_iter().map(score).collect();
    #[cfg(not(feature = "parallel"))]
    let scored: Vec<Candidate> = profiles.iter().map(score).collect();

    let chips_examined = scored.len();
    let eliminated = scored.iter().filter(|c| c.eliminated).count();

    let mut candidates: Vec<Candidate> = scored
        .into_iter()
        .filter(|c| {
            if c.eliminated {
                options.include_eliminated
            } else {
                c.score >= options.min_score
            }
        })
        .collect();
    candidates.sort_by(compare_candidates);
    if let Some(max) = options.max_results {
        candidates.truncate(max);
    }

    info!(
        observed = observed.len(),
        chips = chips_examined,
        eliminated,
        kept = candidates.len(),
        "matching finished"
    );

    Ok(MatchResult {
        candidates,
        observed: observed.len(),
        chips_examined,
        eliminated,
    })
}

/// Score a single chip against the observed set.
///
/// `matched` short-circuits the intersection when an index lookup already
/// produced it.
pub fn score_profile(
    profile: &ChipProfile,
    observed: &BTreeSet<u32>,
    matched: Option<&[u32]>,
) -> Candidate {
    let matched: BTreeSet<u32> = match matched {
        Some(addresses) => addresses.iter().copied().collect(),
        None => {
            let bases = profile.base_addresses();
            observed.intersection(&bases).copied().collect()
        }
    };

    let explanation = Explanation {
        matched: matched
            .iter()
            .map(|&address| MatchedAddress {
                address,
                peripheral: profile.peripheral_at(address).map(|p| p.name.clone()),
            })
            .collect(),
        unmatched: observed.difference(&matched).copied().collect(),
    };

    let score = if observed.is_empty() {
        0.0
    } else {
        matched.len() as f64 / observed.len() as f64
    };

    Candidate {
        chip: profile.id.clone(),
        source: profile.source.clone(),
        score,
        matched_count: matched.len(),
        eliminated: matched.is_empty() && !observed.is_empty(),
        explanation,
    }
}

/// Descending match count, then ascending chip id.
///
/// Every candidate shares the denominator, so comparing counts is exact.
fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.matched_count
        .cmp(&a.matched_count)
        .then_with(|| a.chip.cmp(&b.chip))
}

/// Build chip → matched addresses from the reader's address index, if it has one.
fn matched_by_index(
    observed: &BTreeSet<u32>,
    database: &dyn DatabaseReader,
) -> Result<Option<HashMap<ChipId, Vec<u32>>>> {
    let mut matched: HashMap<ChipId, Vec<u32>> = HashMap::new();
    for &address in observed {
        let Some(lookup) = database.chips_with_base(address) else {
            return Ok(None);
        };
        for chip in lookup? {
            let entry = matched.entry(chip).or_default();
            if entry.last() != Some(&address) {
                entry.push(address);
            }
        }
    }
    if observed.is_empty() {
        return Ok(None);
    }
    Ok(Some(matched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ChipDatabase;
    use crate::types::Peripheral;
    use pretty_assertions::assert_eq;
    use std::borrow::Cow;

    fn chip(name: &str, bases: &[u32]) -> ChipProfile {
        ChipProfile::from_base_addresses(ChipId::new("", name), bases.iter().copied())
    }

    fn abc() -> Vec<ChipProfile> {
        vec![
            chip("ChipC", &[0x5000_0000]),
            chip("ChipB", &[0x4001_0000]),
            chip("ChipA", &[0x4001_0000, 0x4002_0000]),
        ]
    }

    fn observed() -> BTreeSet<u32> {
        BTreeSet::from([0x4001_0000, 0x4002_0000])
    }

    #[test]
    fn test_reference_scenario_scan() {
        let result = rank(&observed(), &abc(), &IdentifyOptions::new()).unwrap();
        let names: Vec<_> = result.candidates.iter().map(|c| c.chip.name.as_str()).collect();
        assert_eq!(names, vec!["ChipA", "ChipB"]);
        assert_eq!(result.candidates[0].score, 1.0);
        assert_eq!(result.candidates[1].score, 0.5);
        assert_eq!(result.eliminated, 1);
        assert_eq!(result.chips_examined, 3);
    }

    #[test]
    fn test_reference_scenario_indexed() {
        let db = ChipDatabase::new(abc());
        let result = rank(&observed(), &db, &IdentifyOptions::new()).unwrap();
        let names: Vec<_> = result.candidates.iter().map(|c| c.chip.name.as_str()).collect();
        assert_eq!(names, vec!["ChipA", "ChipB"]);
        assert_eq!(result.candidates[1].explanation.unmatched, vec![0x4002_0000]);
    }

    #[test]
    fn test_index_and_scan_agree() {
        let options = IdentifyOptions::permissive();
        let scanned = rank(&observed(), &abc(), &options).unwrap();
        let indexed = rank(&observed(), &ChipDatabase::new(abc()), &options).unwrap();
        assert_eq!(scanned, indexed);
    }

    #[test]
    fn test_include_eliminated() {
        let options = IdentifyOptions {
            include_eliminated: true,
            ..IdentifyOptions::new()
        };
        let result = rank(&observed(), &abc(), &options).unwrap();
        let last = result.candidates.last().unwrap();
        assert_eq!(last.chip.name, "ChipC");
        assert!(last.eliminated);
        assert_eq!(last.score, 0.0);
    }

    #[test]
    fn test_min_score_and_max_results() {
        let options = IdentifyOptions {
            min_score: 0.75,
            ..IdentifyOptions::new()
        };
        let result = rank(&observed(), &abc(), &options).unwrap();
        assert_eq!(result.candidates.len(), 1);

        let options = IdentifyOptions {
            max_results: Some(1),
            ..IdentifyOptions::new()
        };
        let result = rank(&observed(), &abc(), &options).unwrap();
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].chip.name, "ChipA");
    }

    #[test]
    fn test_empty_database() {
        let err = rank(&observed(), &Vec::<ChipProfile>::new(), &IdentifyOptions::new()).unwrap_err();
        assert!(err.is_no_candidates());

        let bare = vec![ChipProfile::new(ChipId::new("", "Bare"))];
        let err = rank(&observed(), &bare, &IdentifyOptions::new()).unwrap_err();
        assert!(err.is_no_candidates());
    }

    #[test]
    fn test_empty_observed_eliminates_nothing() {
        let result = rank(&BTreeSet::new(), &abc(), &IdentifyOptions::new()).unwrap();
        assert_eq!(result.candidates.len(), 3);
        assert_eq!(result.eliminated, 0);
        assert!(result.candidates.iter().all(|c| c.score == 0.0));
        // Ties broken by name
        assert_eq!(result.candidates[0].chip.name, "ChipA");
    }

    #[test]
    fn test_ties_surface_together() {
        let profiles = vec![
            chip("VariantY", &[0x4001_0000, 0x4002_0000]),
            chip("VariantX", &[0x4001_0000, 0x4002_0000]),
            chip("Other", &[0x4001_0000]),
        ];
        let result = rank(&observed(), &profiles, &IdentifyOptions::new()).unwrap();
        assert_eq!(result.best_ties().len(), 2);
        assert_eq!(result.candidates[0].chip.name, "VariantX");
        assert_eq!(result.candidates[1].chip.name, "VariantY");
        assert_eq!(result.candidates[0].score, result.candidates[1].score);
    }

    #[test]
    fn test_monotonic_in_added_address() {
        let observed = BTreeSet::from([0x4001_0000, 0x4002_0000, 0x4003_0000]);
        let before = score_profile(&chip("C", &[0x4001_0000]), &observed, None);
        let grown = chip("C", &[0x4001_0000]).with_peripheral(Peripheral::new("TIM2", 0x4003_0000));
        let after = score_profile(&grown, &observed, None);
        assert!(after.score >= before.score);
        assert_eq!(after.explanation.matched[1].peripheral.as_deref(), Some("TIM2"));
    }

    #[test]
    fn test_disjoint_is_eliminated() {
        let c = score_profile(&chip("C", &[0x5000_0000]), &observed(), None);
        assert!(c.eliminated);
        assert_eq!(c.score, 0.0);
        assert_eq!(c.explanation.unmatched.len(), 2);
    }

    #[test]
    fn test_stable_across_runs() {
        let first = rank(&observed(), &abc(), &IdentifyOptions::permissive()).unwrap();
        for _ in 0..5 {
            let mut reversed = abc();
            reversed.reverse();
            let again = rank(&observed(), &reversed, &IdentifyOptions::permissive()).unwrap();
            assert_eq!(again, first);
        }
    }

    struct Broken;

    impl DatabaseReader for Broken {
        fn profiles(&self) -> Result<Cow<'_, [ChipProfile]>> {
            Err(IdentifyError::database("connection refused"))
        }
    }

    #[test]
    fn test_database_failure_propagates() {
        let err = rank(&observed(), &Broken, &IdentifyOptions::new()).unwrap_err();
        assert!(matches!(err, IdentifyError::DatabaseUnavailable { .. }));
    }
}
