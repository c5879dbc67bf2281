use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::debug;

use crate::matcher::normalize_name;
use crate::types::NormalizedEvent;

/// Identity of an event for duplicate collapsing. The per-event page URL is
/// the strongest key; events without one fall back to title plus date.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    SourceUrl(String),
    TitleDate(String, Option<NaiveDate>),
}

pub fn dedup_key(event: &NormalizedEvent) -> DedupKey {
    match &event.source_url {
        Some(url) if !url.trim().is_empty() => DedupKey::SourceUrl(url.clone()),
        _ => DedupKey::TitleDate(normalize_name(&event.title), event.start_date),
    }
}

/// Collapses repeats surfaced by overlapping windows or re-runs. Keys
/// accumulate for the lifetime of one instance, i.e. one pipeline run.
#[derive(Default)]
pub struct Deduplicator {
    seen: HashSet<DedupKey>,
    collapsed: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retains the first occurrence per key, in input order.
    pub fn dedup(&mut self, events: Vec<NormalizedEvent>) -> Vec<NormalizedEvent> {
        let mut kept = Vec::with_capacity(events.len());
        for event in events {
            let key = dedup_key(&event);
            if self.seen.insert(key) {
                kept.push(event);
            } else {
                self.collapsed += 1;
                debug!(title = %event.title, "collapsed duplicate event");
            }
        }
        kept
    }

    /// How many records were dropped as duplicates so far.
    pub fn collapsed(&self) -> usize {
        self.collapsed
    }
}
