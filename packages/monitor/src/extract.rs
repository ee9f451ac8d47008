//! Turns the portal's booking surface into appointment candidates.
//!
//! All markup knowledge lives in this module so drift stays contained.
//! Parsing prefers labelled anchors (`data-date`, `data-slot-id`, named
//! classes) and only falls back to heading-based structure, never to
//! positional assumptions. "Zero appointments open" is a normal outcome
//! and comes back as an empty vector, not an error.

use chrono::{NaiveDate, NaiveTime};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::browser::{is_login_url, BaseBrowser};
use crate::error::ExtractError;
use crate::types::{AppointmentCandidate, LicenseType};

/// What the caller is polling for; stamped into every candidate.
#[derive(Debug, Clone)]
pub struct ExtractCriteria {
    pub license_type: LicenseType,
    pub city: String,
}

/// Load the booking surface and parse it into candidates.
pub async fn extract(
    browser: &dyn BaseBrowser,
    booking_url: &str,
    criteria: &ExtractCriteria,
) -> Result<Vec<AppointmentCandidate>, ExtractError> {
    let page = browser
        .load(booking_url)
        .await
        .map_err(|e| ExtractError::Transport(format!("{e:#}")))?;

    if is_login_url(&page.url) {
        return Err(ExtractError::NotAuthenticated);
    }

    let candidates = parse_booking_page(&page.body, criteria)?;
    debug!(
        url = %page.url,
        city = %criteria.city,
        candidates = candidates.len(),
        "Extraction pass complete"
    );
    Ok(candidates)
}

/// Parse a booking page body. Pure; exercised directly by fixture tests.
pub fn parse_booking_page(
    html: &str,
    criteria: &ExtractCriteria,
) -> Result<Vec<AppointmentCandidate>, ExtractError> {
    let document = Html::parse_document(html);

    if has_login_form(&document) {
        return Err(ExtractError::NotAuthenticated);
    }

    let page_center = find_center(document.root_element());

    let mut slots = collect_grouped_slots(&document);
    let saw_groups = !slots.is_empty() || has_date_groups(&document);

    if !saw_groups {
        slots = collect_heading_slots(&document);
    }

    let saw_date_anchor = saw_groups || !slots.is_empty() || has_date_headings(&document);

    if !saw_date_anchor {
        if has_empty_notice(&document) {
            return Ok(Vec::new());
        }
        return Err(ExtractError::MarkupChanged(
            "no date groupings or availability notice found".to_string(),
        ));
    }

    let mut candidates = Vec::with_capacity(slots.len());
    for slot in slots {
        let center = match slot.center.or_else(|| page_center.clone()) {
            Some(center) => center,
            None => {
                return Err(ExtractError::MarkupChanged(
                    "time slots present but no test centre heading found".to_string(),
                ))
            }
        };
        candidates.push(AppointmentCandidate::new(
            center,
            slot.date,
            slot.time,
            criteria.license_type,
            slot.slot_id,
        ));
    }

    Ok(candidates)
}

struct RawSlot {
    date: NaiveDate,
    time: NaiveTime,
    slot_id: Option<String>,
    center: Option<String>,
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector should parse")
}

/// Preferred shape: explicit per-day containers carrying a `data-date`
/// attribute or a parseable date label.
fn collect_grouped_slots(document: &Html) -> Vec<RawSlot> {
    let group_selector = selector(".date-group, [data-date]");
    let mut slots = Vec::new();

    for group in document.select(&group_selector) {
        let date = group
            .value()
            .attr("data-date")
            .and_then(|v| NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").ok())
            .or_else(|| first_descendant_date(group));
        let Some(date) = date else { continue };

        let center = find_center(group);
        for (time, slot_id) in slot_entries(group) {
            slots.push(RawSlot {
                date,
                time,
                slot_id,
                center: center.clone(),
            });
        }
    }

    slots
}

/// Fallback shape: date headings with the day's slots in the siblings
/// between one heading and the next.
fn collect_heading_slots(document: &Html) -> Vec<RawSlot> {
    let heading_selector = selector("h1, h2, h3, h4, .date-title");
    let mut slots = Vec::new();

    for heading in document.select(&heading_selector) {
        let Some(date) = parse_date_text(&element_text(&heading)) else {
            continue;
        };

        for sibling in heading.next_siblings() {
            let Some(el) = ElementRef::wrap(sibling) else { continue };
            if is_date_heading(&el) {
                break;
            }
            for (time, slot_id) in slot_entries(el) {
                slots.push(RawSlot {
                    date,
                    time,
                    slot_id,
                    center: None,
                });
            }
        }
    }

    slots
}

fn has_date_groups(document: &Html) -> bool {
    let group_selector = selector(".date-group, [data-date]");
    document.select(&group_selector).any(|group| {
        group
            .value()
            .attr("data-date")
            .and_then(|v| NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").ok())
            .or_else(|| first_descendant_date(group))
            .is_some()
    })
}

fn has_date_headings(document: &Html) -> bool {
    let heading_selector = selector("h1, h2, h3, h4, .date-title");
    document
        .select(&heading_selector)
        .any(|h| parse_date_text(&element_text(&h)).is_some())
}

fn is_date_heading(el: &ElementRef) -> bool {
    let name = el.value().name();
    let heading_like = matches!(name, "h1" | "h2" | "h3" | "h4")
        || el.value().classes().any(|c| c == "date-title");
    heading_like && parse_date_text(&element_text(el)).is_some()
}

fn first_descendant_date(scope: ElementRef) -> Option<NaiveDate> {
    let heading_selector = selector("h1, h2, h3, h4, .date-title, .date-label");
    scope
        .select(&heading_selector)
        .find_map(|h| parse_date_text(&element_text(&h)))
}

/// Time-slot entries in and under `scope`: (time, optional site slot id).
fn slot_entries(scope: ElementRef) -> Vec<(NaiveTime, Option<String>)> {
    let slot_selector = selector("button, .time-slot, [data-slot-id]");
    let mut entries = Vec::new();

    if let Some(entry) = slot_entry(&scope) {
        entries.push(entry);
    }
    for el in scope.select(&slot_selector) {
        if let Some(entry) = slot_entry(&el) {
            entries.push(entry);
        }
    }

    entries
}

fn slot_entry(el: &ElementRef) -> Option<(NaiveTime, Option<String>)> {
    let value = el.value();
    let slot_like = value.name() == "button"
        || value.attr("data-slot-id").is_some()
        || value.classes().any(|c| c == "time-slot");
    if !slot_like {
        return None;
    }
    let time = parse_time_text(&element_text(el))?;
    Some((time, value.attr("data-slot-id").map(str::to_string)))
}

/// Test centre label: explicit data attribute or named heading, page- or
/// group-scoped.
fn find_center(scope: ElementRef) -> Option<String> {
    let center_selector =
        selector("[data-test-center], .location-name, .test-centre-name, h2");
    for el in scope.select(&center_selector) {
        if let Some(attr) = el.value().attr("data-test-center") {
            if !attr.trim().is_empty() {
                return Some(attr.trim().to_string());
            }
        }
        let text = element_text(&el);
        if !text.is_empty() && parse_date_text(&text).is_none() {
            return Some(text);
        }
    }
    None
}

fn has_login_form(document: &Html) -> bool {
    let password_selector = selector("input[type='password']");
    document.select(&password_selector).next().is_some()
}

fn has_empty_notice(document: &Html) -> bool {
    let notice_selector = selector(".no-appointments, .empty-state, [role='status']");
    if document
        .select(&notice_selector)
        .any(|el| element_text(&el).to_lowercase().contains("no "))
    {
        return true;
    }
    let body_text = document
        .root_element()
        .text()
        .collect::<String>()
        .to_lowercase();
    body_text.contains("no appointments") || body_text.contains("no road test appointments")
}

fn element_text(el: &ElementRef) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Parse date labels as the portal renders them: "Thursday, January 22nd,
/// 2026", "March 6, 2026", or plain ISO.
pub(crate) fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return None;
    }

    let without_weekday = match cleaned.split_once(',') {
        Some((first, rest)) if WEEKDAYS.contains(&first.trim().to_lowercase().as_str()) => {
            rest.trim()
        }
        _ => cleaned,
    };

    let plain = strip_ordinal_suffixes(without_weekday);
    let plain = plain.trim();

    NaiveDate::parse_from_str(plain, "%B %d, %Y")
        .or_else(|_| NaiveDate::parse_from_str(plain, "%b %d, %Y"))
        .or_else(|_| NaiveDate::parse_from_str(plain, "%Y-%m-%d"))
        .ok()
}

/// "22nd" -> "22", "1st," -> "1," — only suffixes directly after a digit.
fn strip_ordinal_suffixes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let after_digit = i > 0 && chars[i - 1].is_ascii_digit();
        let next_is_alpha = i + 1 < chars.len() && chars[i + 1].is_ascii_alphabetic();
        let after_next_is_alpha = i + 2 < chars.len() && chars[i + 2].is_ascii_alphabetic();
        if after_digit && c.is_ascii_alphabetic() && next_is_alpha && !after_next_is_alpha {
            let suffix: String = chars[i..i + 2].iter().collect::<String>().to_lowercase();
            if matches!(suffix.as_str(), "st" | "nd" | "rd" | "th") {
                i += 2;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// "8:35 AM" / "1:15 pm" slot labels.
pub(crate) fn parse_time_text(text: &str) -> Option<NaiveTime> {
    let cleaned = text.trim().to_uppercase();
    if !(cleaned.ends_with("AM") || cleaned.ends_with("PM")) {
        return None;
    }
    NaiveTime::parse_from_str(&cleaned, "%I:%M %p").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria() -> ExtractCriteria {
        ExtractCriteria {
            license_type: LicenseType::Novice,
            city: "Vancouver".to_string(),
        }
    }

    const GROUPED_PAGE: &str = r#"<html><body>
      <h2 class="location-name">Vancouver Downtown</h2>
      <div class="appointment-listings">
        <div class="date-group" data-date="2026-01-22">
          <h3 class="date-title">Thursday, January 22nd, 2026</h3>
          <button class="time-slot" data-slot-id="slot-8841">8:35 AM</button>
          <button class="time-slot">1:15 PM</button>
        </div>
      </div>
    </body></html>"#;

    const HEADING_PAGE: &str = r#"<html><body>
      <h2 class="location-name">Richmond Claim Centre</h2>
      <h3>Friday, March 6, 2026</h3>
      <div><button>9:05 AM</button><button>10:45 AM</button></div>
      <h3>Saturday, March 7th, 2026</h3>
      <div><button>8:00 AM</button></div>
    </body></html>"#;

    const EMPTY_PAGE: &str = r#"<html><body>
      <h2 class="location-name">Vancouver Downtown</h2>
      <div class="no-appointments">There are no road test appointments available at this time.</div>
    </body></html>"#;

    const LOGIN_PAGE: &str = r#"<html><body>
      <form><input type="text"><input type="tel"><input type="password"></form>
    </body></html>"#;

    const DRIFTED_PAGE: &str = r#"<html><body>
      <div class="maintenance">Scheduled maintenance in progress.</div>
    </body></html>"#;

    #[test]
    fn test_grouped_page_yields_candidates() {
        let candidates = parse_booking_page(GROUPED_PAGE, &criteria()).unwrap();
        assert_eq!(candidates.len(), 2);

        let first = &candidates[0];
        assert_eq!(first.test_center, "Vancouver Downtown");
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2026, 1, 22).unwrap());
        assert_eq!(first.time, NaiveTime::from_hms_opt(8, 35, 0).unwrap());
        assert_eq!(first.raw_identity, "slot-8841");

        // The second slot has no site id and falls back to a derived identity.
        assert_ne!(candidates[1].raw_identity, "slot-8841");
        assert!(!candidates[1].raw_identity.is_empty());
    }

    #[test]
    fn test_heading_page_assigns_slots_to_the_right_day() {
        let candidates = parse_booking_page(HEADING_PAGE, &criteria()).unwrap();
        assert_eq!(candidates.len(), 3);

        let march_6 = NaiveDate::from_ymd_opt(2026, 3, 6).unwrap();
        let march_7 = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(
            candidates.iter().filter(|c| c.date == march_6).count(),
            2
        );
        assert_eq!(
            candidates.iter().filter(|c| c.date == march_7).count(),
            1
        );
        assert!(candidates.iter().all(|c| c.test_center == "Richmond Claim Centre"));
    }

    #[test]
    fn test_empty_notice_is_not_an_error() {
        let candidates = parse_booking_page(EMPTY_PAGE, &criteria()).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_login_form_means_not_authenticated() {
        let err = parse_booking_page(LOGIN_PAGE, &criteria()).unwrap_err();
        assert!(matches!(err, ExtractError::NotAuthenticated));
    }

    #[test]
    fn test_unrecognized_page_is_markup_drift() {
        let err = parse_booking_page(DRIFTED_PAGE, &criteria()).unwrap_err();
        assert!(matches!(err, ExtractError::MarkupChanged(_)));
    }

    #[test]
    fn test_recognized_structure_with_zero_slots_is_empty() {
        let html = r#"<html><body>
          <h2 class="location-name">Vancouver Downtown</h2>
          <div class="date-group" data-date="2026-01-22"></div>
        </body></html>"#;
        let candidates = parse_booking_page(html, &criteria()).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_parse_date_text_variants() {
        let expected = NaiveDate::from_ymd_opt(2026, 1, 22).unwrap();
        assert_eq!(parse_date_text("Thursday, January 22nd, 2026"), Some(expected));
        assert_eq!(parse_date_text("January 22, 2026"), Some(expected));
        assert_eq!(parse_date_text("2026-01-22"), Some(expected));
        assert_eq!(parse_date_text("Road Test Booking"), None);
        assert_eq!(parse_date_text(""), None);
    }

    #[test]
    fn test_parse_date_text_ordinals_do_not_eat_month_names() {
        // "August" contains "st" but not after a digit.
        let expected = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(parse_date_text("August 1st, 2026"), Some(expected));
    }

    #[test]
    fn test_parse_time_text() {
        assert_eq!(
            parse_time_text("8:35 AM"),
            Some(NaiveTime::from_hms_opt(8, 35, 0).unwrap())
        );
        assert_eq!(
            parse_time_text("1:15 pm"),
            Some(NaiveTime::from_hms_opt(13, 15, 0).unwrap())
        );
        assert_eq!(
            parse_time_text("12:00 PM"),
            Some(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
        );
        assert_eq!(parse_time_text("Morning"), None);
        assert_eq!(parse_time_text("Book now"), None);
    }
}
