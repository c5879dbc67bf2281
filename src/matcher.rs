use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::Storage;
use crate::types::{NormalizedEvent, Venue};

/// Canonical form used for name comparisons: lowercase with runs of
/// whitespace collapsed to single spaces.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Venues are unique per (normalized name, lowercased city).
pub fn venue_key(name: &str, city: &str) -> (String, String) {
    (normalize_name(name), city.trim().to_lowercase())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LinkStats {
    pub linked: usize,
    pub unmatched: usize,
    pub errors: usize,
}

/// In-memory index over known venues, keyed the same way the store
/// deduplicates them.
pub struct VenueMatcher {
    by_key: HashMap<(String, String), Venue>,
}

impl VenueMatcher {
    pub async fn build(storage: &dyn Storage) -> Result<Self> {
        let mut by_key = HashMap::new();
        for venue in storage.all_venues().await? {
            by_key.insert(venue_key(&venue.name, &venue.city), venue);
        }
        debug!(venues = by_key.len(), "built venue matcher");
        Ok(Self { by_key })
    }

    pub fn find(&self, name: &str, city: &str) -> Option<&Venue> {
        self.by_key.get(&venue_key(name, city))
    }

    /// Attaches the matching venue id to the event. Events that already
    /// carry a venue id are left untouched. Returns whether the event has
    /// a venue id after the call.
    pub fn link(&self, event: &mut NormalizedEvent) -> bool {
        if event.venue_id.is_some() {
            return true;
        }
        if let Some(venue) = self.find(&event.venue_name, &event.city) {
            event.venue_id = venue.id;
            return event.venue_id.is_some();
        }
        false
    }
}

/// Walks stored events without a venue and links each one whose
/// (name, city) pair exists in the venue registry. Unknown pairs are
/// counted as unmatched and left alone; venue creation belongs to the
/// ingest endpoint. With `dry_run` nothing is written; the stats report
/// what would happen. Idempotent: linked events drop out of later passes.
pub async fn link_unmatched(storage: &dyn Storage, dry_run: bool) -> Result<LinkStats> {
    let matcher = VenueMatcher::build(storage).await?;
    let mut stats = LinkStats::default();

    for event in storage.get_unlinked_events().await? {
        let Some(venue) = matcher.find(&event.event.venue_name, &event.event.city) else {
            debug!(
                venue = %event.event.venue_name,
                event = %event.event.title,
                "no venue in registry"
            );
            stats.unmatched += 1;
            continue;
        };

        if dry_run {
            info!(event = %event.event.title, venue = %venue.name, "dry run: would link");
            stats.linked += 1;
            continue;
        }

        match (event.id, venue.id) {
            (Some(event_id), Some(venue_id)) => {
                if let Err(err) = storage.set_event_venue(event_id, venue_id).await {
                    warn!(event = %event.event.title, error = %err, "venue link failed");
                    stats.errors += 1;
                } else {
                    stats.linked += 1;
                }
            }
            _ => {
                warn!(event = %event.event.title, "event or venue record has no id");
                stats.errors += 1;
            }
        }
    }

    if stats.linked > 0 || stats.unmatched > 0 {
        info!(
            linked = stats.linked,
            unmatched = stats.unmatched,
            dry_run, "venue link pass finished"
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn venue(name: &str, city: &str) -> Venue {
        Venue {
            id: Some(Uuid::new_v4()),
            name: name.to_string(),
            normalized_name: normalize_name(name),
            address: "Donaukanal, Augartenbrücke 1, 1010 Wien".to_string(),
            city: city.to_string(),
            created_at: Utc::now(),
        }
    }

    fn matcher_with(venues: Vec<Venue>) -> VenueMatcher {
        let mut by_key = HashMap::new();
        for v in venues {
            by_key.insert(venue_key(&v.name, &v.city), v);
        }
        VenueMatcher { by_key }
    }

    fn event_at(venue_name: &str) -> NormalizedEvent {
        NormalizedEvent {
            title: "Dompteur Mooner".to_string(),
            start_date: None,
            start_time: None,
            description: None,
            price: "See event page".to_string(),
            is_free: false,
            source_url: None,
            image_url: None,
            ticket_url: None,
            artists: Vec::new(),
            venue_name: venue_name.to_string(),
            venue_address: String::new(),
            city: "Wien".to_string(),
            country: "Austria".to_string(),
            category: "Clubs/Discos".to_string(),
            subcategory: "Electronic".to_string(),
            source: "flex-scraper".to_string(),
            venue_id: None,
        }
    }

    #[test]
    fn test_normalize_name_collapses_case_and_whitespace() {
        assert_eq!(normalize_name("  Grelle   Forelle "), "grelle forelle");
        assert_eq!(normalize_name("FLEX"), "flex");
        assert_eq!(normalize_name("Café\tLeopold"), "café leopold");
    }

    #[test]
    fn test_find_is_key_insensitive() {
        let matcher = matcher_with(vec![venue("Grelle Forelle", "Wien")]);

        assert!(matcher.find("grelle  forelle", "WIEN").is_some());
        assert!(matcher.find("Grelle Forelle", "Graz").is_none());
        assert!(matcher.find("Flex", "Wien").is_none());
    }

    #[test]
    fn test_link_sets_venue_id() {
        let known = venue("Flex", "Wien");
        let expected = known.id;
        let matcher = matcher_with(vec![known]);

        let mut event = event_at("flex");
        assert!(matcher.link(&mut event));
        assert_eq!(event.venue_id, expected);
    }

    #[test]
    fn test_link_keeps_existing_venue_id() {
        let matcher = matcher_with(vec![venue("Flex", "Wien")]);
        let already = Some(Uuid::new_v4());

        let mut event = event_at("Flex");
        event.venue_id = already;
        assert!(matcher.link(&mut event));
        assert_eq!(event.venue_id, already);
    }

    #[test]
    fn test_link_unknown_venue_reports_false() {
        let matcher = matcher_with(Vec::new());

        let mut event = event_at("Unknown Cellar");
        assert!(!matcher.link(&mut event));
        assert!(event.venue_id.is_none());
    }
}
