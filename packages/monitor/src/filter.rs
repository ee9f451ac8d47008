//! Preference filtering: decides whether a candidate slot is worth alerting on.

use chrono::NaiveDate;

use crate::types::{normalize_center, AppointmentCandidate, LicenseType};

/// User-level filter criteria, immutable for the process lifetime.
///
/// Centre names and the city are normalized at construction so that
/// `qualifies` stays a pure comparison.
#[derive(Debug, Clone)]
pub struct Preferences {
    pub license_type: LicenseType,
    pub preferred_city: String,
    pub earliest_acceptable_date: NaiveDate,
    /// Normalized; empty means any centre in the preferred city.
    pub preferred_centers: Vec<String>,
    /// When set, a slot is only interesting strictly before this date
    /// (the user's currently booked appointment).
    pub before_current_booking: Option<NaiveDate>,
}

impl Preferences {
    pub fn new(
        license_type: LicenseType,
        preferred_city: &str,
        earliest_acceptable_date: NaiveDate,
        preferred_centers: &[String],
        before_current_booking: Option<NaiveDate>,
    ) -> Self {
        let preferred_centers = preferred_centers
            .iter()
            .map(|c| normalize_center(c))
            .filter(|c| !c.is_empty())
            .collect();
        Self {
            license_type,
            preferred_city: normalize_center(preferred_city),
            earliest_acceptable_date,
            preferred_centers,
            before_current_booking,
        }
    }
}

/// Pure qualification check: deterministic, total, no side effects.
pub fn qualifies(candidate: &AppointmentCandidate, preferences: &Preferences) -> bool {
    if candidate.license_type != preferences.license_type {
        return false;
    }

    let center = normalize_center(&candidate.test_center);
    let center_ok = if preferences.preferred_centers.is_empty() {
        center.contains(&preferences.preferred_city)
    } else {
        preferences
            .preferred_centers
            .iter()
            .any(|preferred| center == *preferred || center.contains(preferred.as_str()))
    };
    if !center_ok {
        return false;
    }

    if candidate.date < preferences.earliest_acceptable_date {
        return false;
    }

    if let Some(cutoff) = preferences.before_current_booking {
        if candidate.date >= cutoff {
            return false;
        }
    }

    true
}
