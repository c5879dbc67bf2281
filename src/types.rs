use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Field values pulled out of a single listing card before any cleanup.
///
/// Raw text is kept alongside the parsed value so a failed parse still
/// leaves the original string available downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFieldSet {
    pub title: Option<String>,
    pub date_text: Option<String>,
    pub time_text: Option<String>,
    pub price_text: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub price: Option<String>,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub image_url: Option<String>,
    pub ticket_url: Option<String>,
    pub artists: Vec<String>,
}

/// A cleaned-up event ready for deduplication and publishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub title: String,
    pub start_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub description: Option<String>,
    pub price: String,
    pub is_free: bool,
    pub source_url: Option<String>,
    pub image_url: Option<String>,
    pub ticket_url: Option<String>,
    pub artists: Vec<String>,
    pub venue_name: String,
    pub venue_address: String,
    pub city: String,
    pub country: String,
    pub category: String,
    pub subcategory: String,
    pub source: String,
    /// Set by the venue matcher once the event is linked to a stored venue.
    pub venue_id: Option<Uuid>,
}

/// Venue entity as kept in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    pub id: Option<Uuid>,
    pub name: String,
    /// Lowercased, whitespace-collapsed name used for lookup.
    pub normalized_name: String,
    pub address: String,
    pub city: String,
    pub created_at: DateTime<Utc>,
}

/// Event entity as kept in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: Option<Uuid>,
    pub slug: String,
    pub event: NormalizedEvent,
    /// Start instant combining date and (possibly defaulted) time.
    pub start_date_time: Option<DateTime<Utc>>,
    /// Refreshed on every upsert, like the downstream listing expects.
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One pipeline execution, recorded for traceability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestRun {
    pub id: Option<Uuid>,
    pub name: String,
    pub sources: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: RunStats,
    pub errors: Vec<String>,
}

/// Counters accumulated while a single source runs through the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub found: usize,
    pub after_dedup: usize,
    pub collapsed_duplicates: usize,
    pub discarded_invalid: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub venues_created: usize,
    pub venues_linked: usize,
    pub venues_unmatched: usize,
}

/// Outcome of running one source end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRunResult {
    pub source_id: String,
    pub stats: RunStats,
    pub errors: Vec<String>,
    pub output_file: Option<String>,
    pub dry_run: bool,
}
