/// Shared defaults applied to events during normalization.
/// Venue pages rarely state the country or an exact start time, so the
/// pipeline falls back to these when a field is missing.

// Classification defaults for club listings
pub const DEFAULT_CATEGORY: &str = "Clubs/Discos";
pub const DEFAULT_SUBCATEGORY: &str = "Electronic";

// Location defaults
pub const DEFAULT_COUNTRY: &str = "Austria";
pub const DEFAULT_CITY: &str = "Wien";

// Club nights without a published time are assumed to open at 23:00
pub const DEFAULT_CLUB_START_HOUR: u32 = 23;

// Price strings used when no price could be extracted
pub const FREE_PRICE: &str = "Free / Gratis";
pub const FALLBACK_PRICE: &str = "See event page";

// Events dated earlier than this year are parser artifacts
pub const MIN_EVENT_YEAR: i32 = 2020;

// Maximum number of artist names kept per event
pub const MAX_ARTIST_TAGS: usize = 10;

// Browser-like header so venue sites serve the full markup
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

/// Provenance tag recorded on every published event, derived from the venue
/// name so that listings harvested from different pages of the same venue
/// share one tag, e.g. "chelsea-scraper".
pub fn source_tag(venue_name: &str) -> String {
    format!("{}-scraper", venue_name.to_lowercase().replace(' ', "-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_tag_from_venue_name() {
        assert_eq!(source_tag("Grelle Forelle"), "grelle-forelle-scraper");
    }

    #[test]
    fn test_source_tag_normalizes_case_and_spaces() {
        assert_eq!(source_tag("Das WERK"), "das-werk-scraper");
    }
}
