use chrono::{Datelike, NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::{FREE_PRICE, MIN_EVENT_YEAR};

// Numeric forms
static DOTTED_WITH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\.(\d{1,2})\.(\d{2,4})").unwrap());
static DOTTED_NO_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\.(\d{1,2})\.?").unwrap());
static SLASH_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})/(\d{1,2})(?:/(\d{2,4}))?").unwrap());
static COMPACT_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{2})(\d{2})(\d{2})\b").unwrap());

// Month-name forms, e.g. "26. November 2025" or "Mittwoch 26. November".
// The range form must be tried first so "26. November - 27. November 2025"
// resolves to the range start, not the dated tail.
static RANGE_WITH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d{1,2})\.?\s*(\p{L}+)\s*[-–]\s*\d{1,2}\.?\s*\p{L}+\s+(\d{4})").unwrap()
});
static DAY_MONTH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d{1,2})\.?\s*(\p{L}+)\s+(\d{4})").unwrap());
static DAY_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d{1,2})\.?\s*(\p{L}+)").unwrap());

// Time forms
static PREFIXED_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:doors?|einlass|start|beginn)[:\s]+(\d{1,2}):(\d{2})").unwrap());
static BARE_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d{1,2}):(\d{2})\s*(?:uhr)?").unwrap());

// Price forms
static PRICE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)(?:€|EUR|Euro)\s*(\d+(?:[.,]\d{2})?)").unwrap(),
        Regex::new(r"(?i)(\d+(?:[.,]\d{2})?)\s*(?:€|EUR|Euro)").unwrap(),
        Regex::new(r"(?i)(?:ab|from)\s+(?:€|EUR)?\s*(\d+(?:[.,]\d{2})?)").unwrap(),
    ]
});

static FREE_KEYWORDS: [&str; 4] = ["eintritt frei", "freier eintritt", "gratis", "free"];

// Date embedded in a title, e.g. "26/09 KAS:ST" or "26.09. CLUBNACHT"
static TITLE_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,2})[./](\d{1,2})").unwrap());

/// Maps a German or English month name or abbreviation to its month number.
/// Vienna venue sites mix both languages freely.
pub fn month_from_name(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().as_str() {
        "jänner" | "januar" | "january" | "jän" | "jan" => 1,
        "februar" | "february" | "feb" => 2,
        "märz" | "march" | "mär" | "mar" => 3,
        "april" | "apr" => 4,
        "mai" | "may" => 5,
        "juni" | "june" | "jun" => 6,
        "juli" | "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sept" | "sep" => 9,
        "oktober" | "october" | "okt" | "oct" => 10,
        "november" | "nov" => 11,
        "dezember" | "december" | "dez" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Picks the year for a day/month that came without one. Listings advertise
/// upcoming events, so a day/month that already passed this year means the
/// next year.
pub fn infer_year(day: u32, month: u32, today: NaiveDate) -> i32 {
    if month < today.month() || (month == today.month() && day < today.day()) {
        today.year() + 1
    } else {
        today.year()
    }
}

/// Validates ranges and assembles the date. Rejects instead of erroring on
/// nonsense like month 13 or years before the floor.
pub fn build_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) || year < MIN_EVENT_YEAR {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn dotted_with_year(text: &str) -> Option<NaiveDate> {
    let caps = DOTTED_WITH_YEAR.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year_text = &caps[3];
    let year: i32 = match year_text.len() {
        4 => year_text.parse().ok()?,
        2 => 2000 + year_text.parse::<i32>().ok()?,
        _ => return None,
    };
    build_date(year, month, day)
}

fn dotted_no_year(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    // An explicit year, even a rejected one, never falls back to inference.
    if DOTTED_WITH_YEAR.is_match(text) {
        return None;
    }
    let caps = DOTTED_NO_YEAR.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    build_date(infer_year(day, month, today), month, day)
}

fn slash_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = SLASH_DATE.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year = match caps.get(3) {
        Some(y) if y.as_str().len() == 4 => y.as_str().parse().ok()?,
        Some(y) if y.as_str().len() == 2 => 2000 + y.as_str().parse::<i32>().ok()?,
        Some(_) => return None,
        None => infer_year(day, month, today),
    };
    build_date(year, month, day)
}

fn range_with_year(text: &str) -> Option<NaiveDate> {
    let caps = RANGE_WITH_YEAR.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month = month_from_name(&caps[2])?;
    let year: i32 = caps[3].parse().ok()?;
    build_date(year, month, day)
}

fn day_month_year(text: &str) -> Option<NaiveDate> {
    let caps = DAY_MONTH_YEAR.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month = month_from_name(&caps[2])?;
    let year: i32 = caps[3].parse().ok()?;
    build_date(year, month, day)
}

fn day_month(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = DAY_MONTH.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month = month_from_name(&caps[2])?;
    build_date(infer_year(day, month, today), month, day)
}

fn compact_date(text: &str) -> Option<NaiveDate> {
    let caps = COMPACT_DATE.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year = 2000 + caps[3].parse::<i32>().ok()?;
    build_date(year, month, day)
}

/// Parses the German date formats seen on Vienna venue pages.
///
/// Handles `DD.MM.YYYY`, `DD.MM.YY`, yearless `DD.MM.` and `DD/MM[/YYYY]`,
/// `"26. November 2025"`, `"Mittwoch 26. November"`, compact `DDMMYY`, and
/// ranges like `"26. November - 27. November 2025"` where only the tail
/// carries the year. `today` anchors year inference for forms without one.
pub fn parse_german_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    dotted_with_year(text)
        .or_else(|| dotted_no_year(text, today))
        .or_else(|| slash_date(text, today))
        .or_else(|| range_with_year(text))
        .or_else(|| day_month_year(text))
        .or_else(|| day_month(text, today))
        .or_else(|| compact_date(text))
}

/// Extracts a clock time from text like "23:00", "Einlass 19:00" or
/// "20:00 Uhr". Prefixed forms win over the first bare match.
pub fn parse_time(text: &str) -> Option<NaiveTime> {
    if text.trim().is_empty() {
        return None;
    }
    for pattern in [&*PREFIXED_TIME, &*BARE_TIME] {
        if let Some(caps) = pattern.captures(text) {
            let hour: u32 = match caps[1].parse() {
                Ok(h) => h,
                Err(_) => continue,
            };
            let minute: u32 = match caps[2].parse() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if hour <= 23 && minute <= 59 {
                return NaiveTime::from_hms_opt(hour, minute, 0);
            }
        }
    }
    None
}

/// Extracts a price string. Free-entry keywords win; otherwise the first
/// currency-adjacent amount is normalized to `"ab €<amount>"` with a dot
/// decimal separator.
pub fn extract_price(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    let lowered = text.to_lowercase();
    if FREE_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
        return Some(FREE_PRICE.to_string());
    }
    for pattern in PRICE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            let amount = caps[1].replace(',', ".");
            return Some(format!("ab €{}", amount));
        }
    }
    None
}

/// Pulls a `DD/MM` or `DD.MM.` date out of an event title for sources that
/// embed the date there, e.g. "26/09 KAS:ST".
pub fn date_from_title(title: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = TITLE_DATE.captures(title)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    build_date(infer_year(day, month, today), month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 15).unwrap()
    }

    #[test]
    fn test_dotted_date_with_four_digit_year() {
        assert_eq!(
            parse_german_date("14.11.2025", today()),
            NaiveDate::from_ymd_opt(2025, 11, 14)
        );
    }

    #[test]
    fn test_dotted_date_with_two_digit_year() {
        assert_eq!(
            parse_german_date("14.11.25", today()),
            NaiveDate::from_ymd_opt(2025, 11, 14)
        );
    }

    #[test]
    fn test_weekday_prefixed_date() {
        assert_eq!(
            parse_german_date("Do. 27.11.2025", today()),
            NaiveDate::from_ymd_opt(2025, 11, 27)
        );
    }

    #[test]
    fn test_slash_date_without_year_infers_forward() {
        // October 20 is still ahead of the anchor date
        assert_eq!(
            parse_german_date("20/10", today()),
            NaiveDate::from_ymd_opt(2025, 10, 20)
        );
        // March already passed, so next year
        assert_eq!(
            parse_german_date("05/03", today()),
            NaiveDate::from_ymd_opt(2026, 3, 5)
        );
    }

    #[test]
    fn test_dotted_date_without_year_infers_forward() {
        // November is still ahead of the anchor date
        assert_eq!(
            parse_german_date("26.11.", today()),
            NaiveDate::from_ymd_opt(2025, 11, 26)
        );
        assert_eq!(
            parse_german_date("26.11", today()),
            NaiveDate::from_ymd_opt(2025, 11, 26)
        );
        // May already passed, so next year
        assert_eq!(
            parse_german_date("02.05.", today()),
            NaiveDate::from_ymd_opt(2026, 5, 2)
        );
    }

    #[test]
    fn test_weekday_prefixed_dotted_date_without_year() {
        assert_eq!(
            parse_german_date("Sa. 22.11.", today()),
            NaiveDate::from_ymd_opt(2025, 11, 22)
        );
    }

    #[test]
    fn test_same_month_earlier_day_rolls_to_next_year() {
        assert_eq!(
            parse_german_date("03/10", today()),
            NaiveDate::from_ymd_opt(2026, 10, 3)
        );
    }

    #[test]
    fn test_month_name_with_year() {
        assert_eq!(
            parse_german_date("26. November 2025", today()),
            NaiveDate::from_ymd_opt(2025, 11, 26)
        );
    }

    #[test]
    fn test_month_name_without_year() {
        assert_eq!(
            parse_german_date("Mittwoch 26. November", today()),
            NaiveDate::from_ymd_opt(2025, 11, 26)
        );
        // February has passed relative to the anchor
        assert_eq!(
            parse_german_date("3. Februar", today()),
            NaiveDate::from_ymd_opt(2026, 2, 3)
        );
    }

    #[test]
    fn test_range_takes_year_from_tail() {
        assert_eq!(
            parse_german_date("26. November - 27. November 2025", today()),
            NaiveDate::from_ymd_opt(2025, 11, 26)
        );
    }

    #[test]
    fn test_compact_six_digit_date() {
        assert_eq!(
            parse_german_date("081125", today()),
            NaiveDate::from_ymd_opt(2025, 11, 8)
        );
    }

    #[test]
    fn test_austrian_month_names() {
        assert_eq!(
            parse_german_date("7. Jänner 2026", today()),
            NaiveDate::from_ymd_opt(2026, 1, 7)
        );
        assert_eq!(
            parse_german_date("12. Dez 2025", today()),
            NaiveDate::from_ymd_opt(2025, 12, 12)
        );
    }

    #[test]
    fn test_out_of_range_month_and_day_rejected() {
        assert_eq!(parse_german_date("14.13.2025", today()), None);
        assert_eq!(parse_german_date("32.05.2025", today()), None);
    }

    #[test]
    fn test_year_floor_rejected() {
        assert_eq!(parse_german_date("14.11.2019", today()), None);
    }

    #[test]
    fn test_invalid_calendar_date_rejected() {
        assert_eq!(parse_german_date("31.02.2025", today()), None);
    }

    #[test]
    fn test_garbage_returns_none() {
        assert_eq!(parse_german_date("", today()), None);
        assert_eq!(parse_german_date("Samstag Clubnacht", today()), None);
    }

    #[test]
    fn test_bare_time() {
        assert_eq!(parse_time("23:00"), NaiveTime::from_hms_opt(23, 0, 0));
        assert_eq!(parse_time("20:00 Uhr"), NaiveTime::from_hms_opt(20, 0, 0));
    }

    #[test]
    fn test_prefixed_time() {
        assert_eq!(
            parse_time("Einlass: 23:15"),
            NaiveTime::from_hms_opt(23, 15, 0)
        );
        assert_eq!(
            parse_time("Doors 19:30, Start 20:30"),
            NaiveTime::from_hms_opt(19, 30, 0)
        );
    }

    #[test]
    fn test_out_of_range_time_rejected() {
        assert_eq!(parse_time("25:00"), None);
        assert_eq!(parse_time("12:75"), None);
    }

    #[test]
    fn test_free_entry_keywords() {
        assert_eq!(
            extract_price("Eintritt frei").as_deref(),
            Some("Free / Gratis")
        );
        assert_eq!(extract_price("GRATIS!").as_deref(), Some("Free / Gratis"));
    }

    #[test]
    fn test_price_amount_normalized() {
        assert_eq!(extract_price("ab €12,50").as_deref(), Some("ab €12.50"));
        assert_eq!(extract_price("€ 15").as_deref(), Some("ab €15"));
        assert_eq!(extract_price("10 EUR").as_deref(), Some("ab €10"));
    }

    #[test]
    fn test_no_price_in_text() {
        assert_eq!(extract_price("Techno all night"), None);
    }

    #[test]
    fn test_date_from_title() {
        assert_eq!(
            date_from_title("26/09 KAS:ST", NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()),
            NaiveDate::from_ymd_opt(2025, 9, 26)
        );
        assert_eq!(
            date_from_title("05.03. CLUBNACHT", today()),
            NaiveDate::from_ymd_opt(2026, 3, 5)
        );
        assert_eq!(date_from_title("KAS:ST", today()), None);
    }
}
