use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::IngestCredentials;
use crate::constants::{DEFAULT_CLUB_START_HOUR, USER_AGENT};
use crate::error::{Result, ScraperError};
use crate::storage::Storage;
use crate::types::{NormalizedEvent, StoredEvent};

static SLUG_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());
static SLUG_DASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").unwrap());

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub source: String,
    pub city: String,
    pub dry_run: bool,
    pub debug: bool,
    pub sync_to_cache: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PublishOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub venues_created: usize,
    pub errors: Vec<String>,
}

/// Write path for normalized events. Both strategies take the same batch;
/// which one runs depends on whether ingest credentials are configured.
#[async_trait]
pub trait PublishStrategy: Send + Sync {
    fn strategy_name(&self) -> &'static str;

    async fn publish(
        &self,
        events: &[NormalizedEvent],
        options: &PublishOptions,
    ) -> Result<PublishOutcome>;
}

/// Start instant for an event. Club listings usually omit the time, so a
/// missing one defaults to 23:00.
pub fn event_start_instant(event: &NormalizedEvent) -> Option<DateTime<Utc>> {
    let date = event.start_date?;
    let time = match event.start_time {
        Some(t) => t,
        None => NaiveTime::from_hms_opt(DEFAULT_CLUB_START_HOUR, 0, 0)?,
    };
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let cleaned = SLUG_STRIP.replace_all(&lowered, "");
    SLUG_DASHES
        .replace_all(&cleaned, "-")
        .trim_matches('-')
        .to_string()
}

/// URL-friendly slug of the form `<venue>-<title>-<date>`.
pub fn event_slug(event: &NormalizedEvent) -> String {
    let venue_slug = event.venue_name.to_lowercase().replace(' ', "-");
    let date_part = event.start_date.map(|d| d.format("%Y-%m-%d").to_string());

    if event.title.trim().is_empty() {
        return format!("{}-{}", venue_slug, date_part.as_deref().unwrap_or("event"));
    }

    let mut slug = slugify(&event.title);
    if let Some(date) = &date_part {
        slug = format!("{}-{}", slug, date);
    }
    let slug = format!("{}-{}", venue_slug, slug);
    slug.chars().take(200).collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestEvent {
    title: String,
    venue_name: String,
    venue_address: String,
    venue_city: String,
    category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ticket_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    website_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
}

impl IngestEvent {
    fn from_event(event: &NormalizedEvent) -> Self {
        Self {
            title: event.title.clone(),
            venue_name: event.venue_name.clone(),
            venue_address: event.venue_address.clone(),
            venue_city: event.city.clone(),
            category: event.category.clone(),
            start_date_time: event_start_instant(event)
                .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()),
            end_date_time: None,
            price: Some(event.price.clone()),
            ticket_url: event.ticket_url.clone(),
            website_url: event.source_url.clone(),
            image_url: event.image_url.clone(),
            source: event.source.clone(),
            source_url: event.source_url.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestRequestOptions<'a> {
    source: &'a str,
    city: &'a str,
    dry_run: bool,
    debug: bool,
    sync_to_cache: bool,
}

#[derive(Debug, Serialize)]
struct IngestRequest<'a> {
    events: Vec<IngestEvent>,
    options: IngestRequestOptions<'a>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestResponse {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub venues_created: usize,
    pub errors: Vec<String>,
}

/// Publishes batches to the ingestion endpoint, which owns venue creation
/// and cache invalidation downstream.
pub struct RemoteIngestPublisher {
    client: reqwest::Client,
    credentials: IngestCredentials,
}

impl RemoteIngestPublisher {
    pub fn new(credentials: IngestCredentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

#[async_trait]
impl PublishStrategy for RemoteIngestPublisher {
    fn strategy_name(&self) -> &'static str {
        "remote-ingest"
    }

    async fn publish(
        &self,
        events: &[NormalizedEvent],
        options: &PublishOptions,
    ) -> Result<PublishOutcome> {
        let request = IngestRequest {
            events: events.iter().map(IngestEvent::from_event).collect(),
            options: IngestRequestOptions {
                source: &options.source,
                city: &options.city,
                dry_run: options.dry_run,
                debug: options.debug,
                sync_to_cache: options.sync_to_cache,
            },
        };

        if options.dry_run {
            let payload = serde_json::to_string_pretty(&request)?;
            debug!(events = events.len(), "dry run: skipping ingest POST");
            debug!("Would submit payload:\n{}", payload);
            return Ok(PublishOutcome::default());
        }

        info!(
            events = events.len(),
            endpoint = %self.credentials.api_url,
            "submitting batch to ingest endpoint"
        );

        let response = self
            .client
            .post(&self.credentials.api_url)
            .bearer_auth(&self.credentials.api_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScraperError::Ingest {
                message: format!("ingest endpoint returned {}: {}", status, body),
            });
        }

        let parsed: IngestResponse = response.json().await?;
        for error in &parsed.errors {
            warn!("ingest endpoint reported: {}", error);
        }

        Ok(PublishOutcome {
            inserted: parsed.inserted,
            updated: parsed.updated,
            failed: parsed.failed,
            venues_created: parsed.venues_created,
            errors: parsed.errors,
        })
    }
}

/// Upserts events straight into the backing store. Venue linking runs as a
/// separate pass after the batch lands.
pub struct DirectStorePublisher {
    storage: Arc<dyn Storage>,
}

impl DirectStorePublisher {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Returns true when the event was inserted, false when an existing
    /// record matched and was updated.
    async fn upsert(&self, event: &NormalizedEvent) -> Result<bool> {
        let start = event_start_instant(event);

        let mut existing = None;
        if let Some(url) = event.source_url.as_deref() {
            existing = self.storage.get_event_by_source_url(url).await?;
        }
        if existing.is_none() && start.is_some() {
            existing = self
                .storage
                .get_event_by_title_start(&event.title, start)
                .await?;
        }

        match existing {
            Some(mut found) => {
                let now = Utc::now();
                found.event = event.clone();
                found.slug = event_slug(event);
                found.start_date_time = start;
                found.published_at = now;
                found.updated_at = now;
                self.storage.update_event(&found).await?;
                info!(title = %event.title, "updated event");
                Ok(false)
            }
            None => {
                let now = Utc::now();
                let mut stored = StoredEvent {
                    id: None,
                    slug: event_slug(event),
                    event: event.clone(),
                    start_date_time: start,
                    published_at: now,
                    created_at: now,
                    updated_at: now,
                };
                self.storage.create_event(&mut stored).await?;
                info!(title = %event.title, "inserted event");
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl PublishStrategy for DirectStorePublisher {
    fn strategy_name(&self) -> &'static str {
        "direct-store"
    }

    async fn publish(
        &self,
        events: &[NormalizedEvent],
        options: &PublishOptions,
    ) -> Result<PublishOutcome> {
        let mut outcome = PublishOutcome::default();

        for event in events {
            if options.dry_run {
                debug!(title = %event.title, "dry run: would upsert event");
                continue;
            }
            match self.upsert(event).await {
                Ok(true) => outcome.inserted += 1,
                Ok(false) => outcome.updated += 1,
                Err(e) => {
                    outcome.failed += 1;
                    outcome.errors.push(format!("{}: {}", event.title, e));
                    warn!(title = %event.title, "failed to upsert event: {}", e);
                }
            }
        }

        Ok(outcome)
    }
}

/// Picks the write path: remote ingestion when credentials are configured,
/// otherwise the direct store. `force_direct` overrides the credentials.
pub fn select_strategy(
    credentials: Option<IngestCredentials>,
    storage: Arc<dyn Storage>,
    force_direct: bool,
) -> Result<Arc<dyn PublishStrategy>> {
    match credentials {
        Some(creds) if !force_direct => Ok(Arc::new(RemoteIngestPublisher::new(creds)?)),
        _ => Ok(Arc::new(DirectStorePublisher::new(storage))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use chrono::NaiveDate;

    fn event(title: &str, url: Option<&str>) -> NormalizedEvent {
        NormalizedEvent {
            title: title.to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 9, 26),
            start_time: None,
            description: None,
            price: "ab €15".to_string(),
            is_free: false,
            source_url: url.map(str::to_string),
            image_url: None,
            ticket_url: Some("https://tickets.example/kasst".to_string()),
            artists: vec!["KAS:ST".to_string()],
            venue_name: "Grelle Forelle".to_string(),
            venue_address: "Spittelauer Lände 12, 1090 Wien".to_string(),
            city: "Wien".to_string(),
            country: "Austria".to_string(),
            category: "Clubs/Discos".to_string(),
            subcategory: "Electronic".to_string(),
            source: "grelle-forelle-scraper".to_string(),
            venue_id: None,
        }
    }

    fn options(dry_run: bool) -> PublishOptions {
        PublishOptions {
            source: "grelle-forelle".to_string(),
            city: "Wien".to_string(),
            dry_run,
            debug: false,
            sync_to_cache: true,
        }
    }

    #[test]
    fn test_event_slug_strips_specials_and_appends_date() {
        let e = event("KAS:ST / All Night!", None);
        assert_eq!(
            event_slug(&e),
            "grelle-forelle-kasst-all-night-2025-09-26"
        );
    }

    #[test]
    fn test_event_slug_without_title_uses_date() {
        let mut e = event("", None);
        assert_eq!(event_slug(&e), "grelle-forelle-2025-09-26");

        e.start_date = None;
        assert_eq!(event_slug(&e), "grelle-forelle-event");
    }

    #[test]
    fn test_event_slug_caps_length() {
        let e = event(&"x".repeat(300), None);
        assert_eq!(event_slug(&e).chars().count(), 200);
    }

    #[test]
    fn test_start_instant_defaults_to_club_hour() {
        let e = event("KAS:ST", None);
        let instant = event_start_instant(&e).unwrap();
        assert_eq!(
            instant.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            "2025-09-26T23:00:00.000Z"
        );

        let mut dateless = event("KAS:ST", None);
        dateless.start_date = None;
        assert!(event_start_instant(&dateless).is_none());
    }

    #[test]
    fn test_ingest_event_uses_camel_case_and_drops_empty_fields() {
        let value = serde_json::to_value(IngestEvent::from_event(&event("KAS:ST", None))).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object["venueName"], "Grelle Forelle");
        assert_eq!(object["venueCity"], "Wien");
        assert_eq!(object["startDateTime"], "2025-09-26T23:00:00.000Z");
        assert_eq!(object["ticketUrl"], "https://tickets.example/kasst");
        assert!(!object.contains_key("sourceUrl"));
        assert!(!object.contains_key("imageUrl"));
        assert!(!object.contains_key("endDateTime"));
    }

    #[test]
    fn test_ingest_response_tolerates_missing_fields() {
        let parsed: IngestResponse = serde_json::from_str(r#"{"inserted": 3}"#).unwrap();
        assert_eq!(parsed.inserted, 3);
        assert_eq!(parsed.failed, 0);
        assert!(parsed.errors.is_empty());
    }

    #[tokio::test]
    async fn test_direct_store_inserts_then_updates_by_url() {
        let storage = Arc::new(InMemoryStorage::new());
        let publisher = DirectStorePublisher::new(storage.clone());
        let batch = vec![event(
            "KAS:ST",
            Some("https://www.grelleforelle.com/event/kasst/"),
        )];

        let first = publisher.publish(&batch, &options(false)).await.unwrap();
        assert_eq!((first.inserted, first.updated), (1, 0));

        let second = publisher.publish(&batch, &options(false)).await.unwrap();
        assert_eq!((second.inserted, second.updated), (0, 1));
    }

    #[tokio::test]
    async fn test_direct_store_matches_by_title_and_start() {
        let storage = Arc::new(InMemoryStorage::new());
        let publisher = DirectStorePublisher::new(storage.clone());

        publisher
            .publish(&[event("KAS:ST", None)], &options(false))
            .await
            .unwrap();

        // Same title and start, no source URL on either side
        let outcome = publisher
            .publish(&[event("kas:st", None)], &options(false))
            .await
            .unwrap();
        assert_eq!((outcome.inserted, outcome.updated), (0, 1));
    }

    #[tokio::test]
    async fn test_direct_store_dry_run_writes_nothing() {
        let storage = Arc::new(InMemoryStorage::new());
        let publisher = DirectStorePublisher::new(storage.clone());

        let outcome = publisher
            .publish(&[event("KAS:ST", None)], &options(true))
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 0);
        assert!(storage
            .get_event_by_title_start("KAS:ST", event_start_instant(&event("KAS:ST", None)))
            .await
            .unwrap()
            .is_none());
    }
}
