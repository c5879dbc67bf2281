use crate::error::{Result, ScraperError};
use crate::matcher::{normalize_name, venue_key};
use crate::types::{HarvestRun, StoredEvent, Venue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// Storage trait for persisting harvested data
#[async_trait]
pub trait Storage: Send + Sync {
    // Venue operations
    async fn create_venue(&self, venue: &mut Venue) -> Result<()>;
    async fn get_venue_by_key(&self, name: &str, city: &str) -> Result<Option<Venue>>;
    async fn all_venues(&self) -> Result<Vec<Venue>>;

    // Event operations
    async fn create_event(&self, event: &mut StoredEvent) -> Result<()>;
    async fn update_event(&self, event: &StoredEvent) -> Result<()>;
    async fn get_event_by_source_url(&self, url: &str) -> Result<Option<StoredEvent>>;
    async fn get_event_by_title_start(
        &self,
        title: &str,
        start: Option<DateTime<Utc>>,
    ) -> Result<Option<StoredEvent>>;
    async fn get_unlinked_events(&self) -> Result<Vec<StoredEvent>>;
    async fn set_event_venue(&self, event_id: Uuid, venue_id: Uuid) -> Result<()>;

    // Harvest run operations
    async fn create_run(&self, run: &mut HarvestRun) -> Result<()>;
    async fn update_run(&self, run: &HarvestRun) -> Result<()>;
}

/// In-memory storage implementation for development/testing
pub struct InMemoryStorage {
    venues: Arc<Mutex<HashMap<Uuid, Venue>>>,
    events: Arc<Mutex<HashMap<Uuid, StoredEvent>>>,
    runs: Arc<Mutex<HashMap<Uuid, HarvestRun>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            venues: Arc::new(Mutex::new(HashMap::new())),
            events: Arc::new(Mutex::new(HashMap::new())),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_venue(&self, venue: &mut Venue) -> Result<()> {
        let id = Uuid::new_v4();
        venue.id = Some(id);
        venue.normalized_name = normalize_name(&venue.name);

        let mut venues = self.venues.lock().unwrap();
        venues.insert(id, venue.clone());

        debug!("Created venue: {} with id {}", venue.name, id);
        Ok(())
    }

    async fn get_venue_by_key(&self, name: &str, city: &str) -> Result<Option<Venue>> {
        let key = venue_key(name, city);
        let venues = self.venues.lock().unwrap();
        let venue = venues
            .values()
            .find(|v| venue_key(&v.name, &v.city) == key)
            .cloned();
        Ok(venue)
    }

    async fn all_venues(&self) -> Result<Vec<Venue>> {
        let venues = self.venues.lock().unwrap();
        let mut all: Vec<Venue> = venues.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn create_event(&self, event: &mut StoredEvent) -> Result<()> {
        let id = Uuid::new_v4();
        event.id = Some(id);

        let mut events = self.events.lock().unwrap();
        events.insert(id, event.clone());

        debug!("Created event: {} with id {}", event.event.title, id);
        Ok(())
    }

    async fn update_event(&self, event: &StoredEvent) -> Result<()> {
        let event_id = event.id.ok_or_else(|| ScraperError::Storage {
            message: "Cannot update event without ID".to_string(),
        })?;

        let mut events = self.events.lock().unwrap();
        events.insert(event_id, event.clone());

        debug!("Updated event: {} with id {}", event.event.title, event_id);
        Ok(())
    }

    async fn get_event_by_source_url(&self, url: &str) -> Result<Option<StoredEvent>> {
        let events = self.events.lock().unwrap();
        let event = events
            .values()
            .find(|e| e.event.source_url.as_deref() == Some(url))
            .cloned();
        Ok(event)
    }

    async fn get_event_by_title_start(
        &self,
        title: &str,
        start: Option<DateTime<Utc>>,
    ) -> Result<Option<StoredEvent>> {
        let events = self.events.lock().unwrap();
        let event = events
            .values()
            .find(|e| {
                e.event.title.to_lowercase() == title.to_lowercase() && e.start_date_time == start
            })
            .cloned();
        Ok(event)
    }

    async fn get_unlinked_events(&self) -> Result<Vec<StoredEvent>> {
        let events = self.events.lock().unwrap();
        let mut unlinked: Vec<StoredEvent> = events
            .values()
            .filter(|e| e.event.venue_id.is_none())
            .cloned()
            .collect();

        // Sort by start to keep the link pass deterministic
        unlinked.sort_by(|a, b| a.start_date_time.cmp(&b.start_date_time));
        Ok(unlinked)
    }

    async fn set_event_venue(&self, event_id: Uuid, venue_id: Uuid) -> Result<()> {
        let mut events = self.events.lock().unwrap();
        if let Some(event) = events.get_mut(&event_id) {
            event.event.venue_id = Some(venue_id);
            event.updated_at = Utc::now();
            debug!("Linked event {} to venue {}", event_id, venue_id);
        }
        Ok(())
    }

    async fn create_run(&self, run: &mut HarvestRun) -> Result<()> {
        let id = Uuid::new_v4();
        run.id = Some(id);

        let mut runs = self.runs.lock().unwrap();
        runs.insert(id, run.clone());

        debug!("Created harvest run: {} with id {}", run.name, id);
        Ok(())
    }

    async fn update_run(&self, run: &HarvestRun) -> Result<()> {
        let run_id = run.id.ok_or_else(|| ScraperError::Storage {
            message: "Cannot update harvest run without ID".to_string(),
        })?;

        let mut runs = self.runs.lock().unwrap();
        runs.insert(run_id, run.clone());

        debug!("Updated harvest run: {} with id {}", run.name, run_id);
        Ok(())
    }
}

/// One entry of the venue seed file.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueSeed {
    pub name: String,
    pub address: String,
    #[serde(default = "default_seed_city")]
    pub city: String,
}

fn default_seed_city() -> String {
    crate::constants::DEFAULT_CITY.to_string()
}

/// Loads venues from a JSON seed file into storage, skipping venues that
/// already exist under the same (name, city) key. A missing file is fine.
pub async fn seed_venues(storage: &dyn Storage, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    if !path.exists() {
        debug!("No venue seed file at {}", path.display());
        return Ok(0);
    }

    let body = std::fs::read_to_string(path)?;
    let seeds: Vec<VenueSeed> = serde_json::from_str(&body)?;

    let mut created = 0;
    for seed in seeds {
        if storage
            .get_venue_by_key(&seed.name, &seed.city)
            .await?
            .is_some()
        {
            continue;
        }

        let mut venue = Venue {
            id: None,
            name: seed.name.clone(),
            normalized_name: normalize_name(&seed.name),
            address: seed.address,
            city: seed.city,
            created_at: Utc::now(),
        };
        storage.create_venue(&mut venue).await?;
        created += 1;
    }

    if created > 0 {
        info!(created, path = %path.display(), "seeded venues");
    }
    Ok(created)
}
