//! Output formatters for identification reports.
//!
//! This module provides trait-based formatters for rendering
//! identification results in various output formats (human-readable,
//! JSON, compact).

use crate::types::{ExtractionReport, Identification, MatchResult, RegisterElimination};
use std::path::Path;

/// Trait for formatting identification reports.
///
/// Implementors render each section of a report, plus the complete report.
pub trait ReportFormatter {
    /// Format the file path header.
    fn format_file(&self, path: &Path) -> String;

    /// Format the image summary line.
    fn format_image(&self, _report: &Identification) -> Option<String> {
        None
    }

    /// Format the extracted addresses.
    fn format_addresses(&self, extraction: &ExtractionReport) -> Option<String>;

    /// Format the ranked chip candidates.
    fn format_candidates(&self, matches: &MatchResult) -> Option<String>;

    /// Format the register-level elimination.
    fn format_registers(&self, registers: &RegisterElimination) -> Option<String>;

    /// Format the complete report.
    ///
    /// Default implementation concatenates all section outputs.
    fn format_report(&self, report: &Identification, path: &Path) -> String {
        let mut parts = vec![self.format_file(path)];

        if let Some(s) = self.format_image(report) {
            parts.push(s);
        }
        if let Some(s) = self.format_addresses(&report.extraction) {
            parts.push(s);
        }
        if let Some(s) = self.format_candidates(&report.matches) {
            parts.push(s);
        }
        if let Some(s) = report
            .registers
            .as_ref()
            .and_then(|r| self.format_registers(r))
        {
            parts.push(s);
        }

        parts.join("")
    }
}

/// Human-readable output formatter.
#[derive(Debug, Clone, Default)]
pub struct HumanFormatter {
    /// Show verbose output (every address and explanation)
    pub verbose: bool,
    /// Quiet mode (best candidates only)
    pub quiet: bool,
}

impl HumanFormatter {
    /// Create a new human formatter with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a verbose formatter.
    pub fn verbose() -> Self {
        Self {
            verbose: true,
            quiet: false,
        }
    }

    /// Create a quiet formatter.
    pub fn quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
        }
    }
}

impl ReportFormatter for HumanFormatter {
    fn format_file(&self, path: &Path) -> String {
        if self.quiet {
            format!("{}: ", path.display())
        } else {
            format!("=== {} ===\n", path.display())
        }
    }

    fn format_image(&self, report: &Identification) -> Option<String> {
        if self.quiet {
            return None;
        }
        Some(format!(
            "  Image:      {} bytes at 0x{:08X}, sha256 {}\n",
            report.image_len, report.base_address, report.firmware_sha256
        ))
    }

    fn format_addresses(&self, extraction: &ExtractionReport) -> Option<String> {
        if self.quiet {
            return None;
        }

        let addresses = extraction.addresses();
        let mut s = format!(
            "  Addresses:  {} distinct ({} discarded outside MMIO window)\n",
            addresses.len(),
            extraction.discarded
        );
        if self.verbose {
            for c in &extraction.candidates {
                s.push_str(&format!(
                    "    0x{:08X}  at +0x{:06X}  ({})\n",
                    c.address, c.offset, c.origin
                ));
            }
            for a in &extraction.register_accesses {
                s.push_str(&format!(
                    "    0x{:08X}  at +0x{:06X}  ({} register)\n",
                    a.address, a.offset, a.access
                ));
            }
        } else if !addresses.is_empty() {
            let list: Vec<String> = addresses.iter().map(|a| format!("0x{:08X}", a)).collect();
            s.push_str(&format!("    {}\n", list.join(", ")));
        }
        Some(s)
    }

    fn format_candidates(&self, matches: &MatchResult) -> Option<String> {
        let indent = if self.quiet { "" } else { "  " };
        if matches.observed == 0 {
            return Some(format!(
                "{}No peripheral addresses found: no chip could be eliminated\n",
                indent
            ));
        }
        if matches.is_empty() {
            return Some(format!(
                "{}No chip explains the observed addresses ({} examined)\n",
                indent, matches.chips_examined
            ));
        }

        if self.quiet {
            let names: Vec<String> = matches.best_ties().iter().map(|c| c.chip.to_string()).collect();
            return Some(format!("{}\n", names.join(", ")));
        }

        let mut s = format!(
            "  Candidates: {} of {} chips ({} eliminated)\n",
            matches.candidates.len(),
            matches.chips_examined,
            matches.eliminated
        );
        for (i, c) in matches.candidates.iter().enumerate() {
            s.push_str(&format!(
                "    {}. {} - {:.1}% ({}/{})",
                i + 1,
                c.chip,
                c.score * 100.0,
                c.matched_count,
                matches.observed
            ));
            if let Some(ref source) = c.source {
                s.push_str(&format!(" [{}]", source));
            }
            s.push('\n');

            if self.verbose {
                for m in &c.explanation.matched {
                    s.push_str(&format!(
                        "         matched   0x{:08X} {}\n",
                        m.address,
                        m.peripheral.as_deref().unwrap_or("")
                    ));
                }
                for a in &c.explanation.unmatched {
                    s.push_str(&format!("         unmatched 0x{:08X}\n", a));
                }
            }
        }
        Some(s)
    }

    fn format_registers(&self, registers: &RegisterElimination) -> Option<String> {
        if self.quiet {
            return None;
        }
        if registers.applied == 0 {
            return Some(String::from(
                "  Registers:  no traced access matched a known register\n",
            ));
        }

        let mut s = format!(
            "  Registers:  {} chip(s) left after {} access(es), {} skipped\n",
            registers.survivors.len(),
            registers.applied,
            registers.skipped.len()
        );
        for survivor in &registers.survivors {
            s.push_str(&format!("    {}:\n", survivor.chip));
            for e in &survivor.evidence {
                s.push_str(&format!(
                    "        {} register {} of {}\n",
                    e.access, e.register, e.peripheral
                ));
            }
        }
        if self.verbose {
            for skipped in &registers.skipped {
                s.push_str(&format!(
                    "    [skip] 0x{:08X} ({}): {}\n",
                    skipped.address, skipped.access, skipped.reason
                ));
            }
        }
        Some(s)
    }
}

/// JSON output formatter.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    /// Pretty-print JSON
    pub pretty: bool,
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl JsonFormatter {
    /// Create a new JSON formatter with pretty printing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact JSON formatter.
    pub fn compact() -> Self {
        Self { pretty: false }
    }
}

impl ReportFormatter for JsonFormatter {
    fn format_file(&self, _path: &Path) -> String {
        String::new() // Handled in format_report
    }

    fn format_addresses(&self, _extraction: &ExtractionReport) -> Option<String> {
        None // Handled in format_report
    }

    fn format_candidates(&self, _matches: &MatchResult) -> Option<String> {
        None // Handled in format_report
    }

    fn format_registers(&self, _registers: &RegisterElimination) -> Option<String> {
        None // Handled in format_report
    }

    fn format_report(&self, report: &Identification, path: &Path) -> String {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            file: String,
            addresses: Vec<String>,
            #[serde(flatten)]
            report: &'a Identification,
        }

        let output = JsonOutput {
            file: path.display().to_string(),
            addresses: report
                .extraction
                .addresses()
                .iter()
                .map(|a| format!("0x{:08X}", a))
                .collect(),
            report,
        };

        let mut s = if self.pretty {
            serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
        } else {
            serde_json::to_string(&output).unwrap_or_else(|_| "{}".to_string())
        };
        s.push('\n');
        s
    }
}

/// Compact single-line output formatter.
#[derive(Debug, Clone, Default)]
pub struct ShortFormatter;

impl ShortFormatter {
    /// Create a new short formatter.
    pub fn new() -> Self {
        Self
    }
}

impl ReportFormatter for ShortFormatter {
    fn format_file(&self, _path: &Path) -> String {
        String::new() // Handled in format_report
    }

    fn format_addresses(&self, _extraction: &ExtractionReport) -> Option<String> {
        None
    }

    fn format_candidates(&self, _matches: &MatchResult) -> Option<String> {
        None
    }

    fn format_registers(&self, _registers: &RegisterElimination) -> Option<String> {
        None
    }

    fn format_report(&self, report: &Identification, path: &Path) -> String {
        let matches = &report.matches;
        let best = match matches.best() {
            Some(best) if matches.observed > 0 => {
                let ties = matches.best_ties().len();
                let extra = if ties > 1 {
                    format!(" (+{} tied)", ties - 1)
                } else {
                    String::new()
                };
                format!("{}\t{:.0}%{}", best.chip, best.score * 100.0, extra)
            }
            Some(_) => String::from("-\tno addresses"),
            None => String::from("-\tall eliminated"),
        };
        format!("{}\t{}\t{}\n", path.display(), matches.observed, best)
    }
}
