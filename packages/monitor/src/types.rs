use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// License class a road test slot is offered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LicenseType {
    /// Class 7 (N) road test
    Novice,
    /// Class 5 road test
    Class5,
}

impl LicenseType {
    /// Parse the configuration surface's short codes ("N", "5") as well as
    /// the longer names the portal displays.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "n" | "7" | "novice" | "class 7" | "class7" | "class 7 (n)" => Some(Self::Novice),
            "5" | "class 5" | "class5" => Some(Self::Class5),
            _ => None,
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Novice => "N",
            Self::Class5 => "5",
        }
    }
}

impl fmt::Display for LicenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Novice => write!(f, "Class 7 (N)"),
            Self::Class5 => write!(f, "Class 5"),
        }
    }
}

/// One slot surfaced by the portal in a single poll.
///
/// Created fresh every cycle by the extractor and never mutated; only its
/// identity outlives the cycle (promoted into the dedup ledger).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentCandidate {
    /// Site-provided test centre name, not yet normalized
    pub test_center: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub license_type: LicenseType,
    /// Site-stable slot id when the portal exposes one, otherwise derived
    /// deterministically from the other fields.
    pub raw_identity: String,
}

impl AppointmentCandidate {
    pub fn new(
        test_center: String,
        date: NaiveDate,
        time: NaiveTime,
        license_type: LicenseType,
        slot_id: Option<String>,
    ) -> Self {
        let raw_identity = slot_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| derived_identity(&test_center, date, time, license_type));
        Self {
            test_center,
            date,
            time,
            license_type,
            raw_identity,
        }
    }
}

/// Deterministic slot identity for portals that expose no slot id.
fn derived_identity(
    test_center: &str,
    date: NaiveDate,
    time: NaiveTime,
    license_type: LicenseType,
) -> String {
    let canonical = format!(
        "{}|{}|{}|{}",
        normalize_center(test_center),
        date,
        time,
        license_type.as_code()
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Normalize a test centre name for identity and preference matching.
///
/// Lower-cases, trims, collapses whitespace runs, and canonicalizes the
/// apostrophes the portal is inconsistent about.
pub fn normalize_center(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_space = true;
    for c in name.trim().chars() {
        let c = match c {
            '\u{2018}' | '\u{2019}' => '\'',
            c => c,
        };
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Deduplication identity of a notified appointment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeenKey {
    pub test_center: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub license_type: LicenseType,
}

impl From<&AppointmentCandidate> for SeenKey {
    fn from(candidate: &AppointmentCandidate) -> Self {
        Self {
            test_center: normalize_center(&candidate.test_center),
            date: candidate.date,
            time: candidate.time,
            license_type: candidate.license_type,
        }
    }
}

impl fmt::Display for SeenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({})",
            self.test_center,
            self.date,
            self.time.format("%H:%M"),
            self.license_type.as_code()
        )
    }
}

/// Which collaborator produced a transient failure. The scheduler keys its
/// promotion rules (markup drift, auth budget) off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Auth,
    Markup,
    Transport,
}

/// Terminal status of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleStatus {
    Ok,
    TransientError(TransientKind),
    FatalError(String),
}

/// Outcome of one poll cycle, consumed by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates_seen: usize,
    pub qualifying: usize,
    pub notified: usize,
    pub status: CycleStatus,
}

impl CycleReport {
    pub fn failed(status: CycleStatus) -> Self {
        Self {
            candidates_seen: 0,
            qualifying: 0,
            notified: 0,
            status,
        }
    }
}
