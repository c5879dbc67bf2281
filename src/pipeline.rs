use crate::config::{Config, IngestCredentials};
use crate::constants::{self, MAX_ARTIST_TAGS};
use crate::dedupe::Deduplicator;
use crate::error::Result;
use crate::extractor::Extractor;
use crate::fetch::{DocumentProvider, FetchClient};
use crate::matcher;
use crate::publish::{self, PublishOptions, PublishOutcome};
use crate::registry::SourceConfig;
use crate::shapes::{self, EventShape};
use crate::storage::Storage;
use crate::types::{HarvestRun, NormalizedEvent, RawFieldSet, RunStats, SourceRunResult};
use crate::windows::{fill_template, windows_from};
use chrono::{NaiveDate, Utc};
use metrics::{counter, histogram};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Knobs for one pipeline run, shared by every source in the batch.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Extract and normalize but suppress every write.
    pub dry_run: bool,
    /// Upsert into the local store even when ingest credentials exist.
    pub force_direct: bool,
    /// Drop events whose parsed date lies in the past. Events without a
    /// date are always kept for manual review.
    pub future_only: bool,
    /// Stop after writing the JSON snapshot, without publishing.
    pub skip_publish: bool,
    pub debug: bool,
}

/// Turns one extracted field set into a publishable event. Returns `None`
/// when the required title is missing, which the caller counts as discarded.
pub fn normalize_raw(fields: RawFieldSet, config: &SourceConfig) -> Option<NormalizedEvent> {
    let title = fields.title.as_deref().map(str::trim).unwrap_or("").to_string();
    if title.is_empty() {
        return None;
    }

    let price = fields
        .price
        .clone()
        .unwrap_or_else(|| constants::FALLBACK_PRICE.to_string());
    let is_free = matches!(
        price.to_lowercase().as_str(),
        "free" | "gratis" | "free / gratis"
    );

    let mut artists = fields.artists;
    artists.truncate(MAX_ARTIST_TAGS);

    Some(NormalizedEvent {
        title,
        start_date: fields.date,
        start_time: fields.time,
        description: fields.description,
        price,
        is_free,
        source_url: fields.source_url,
        image_url: fields.image_url.or_else(|| config.venue.logo_url.clone()),
        ticket_url: fields.ticket_url,
        artists,
        venue_name: config.venue.name.clone(),
        venue_address: config.venue.address.clone(),
        city: config.venue.city.clone(),
        country: config.venue.country.clone(),
        category: config
            .category
            .clone()
            .unwrap_or_else(|| constants::DEFAULT_CATEGORY.to_string()),
        subcategory: config
            .subcategory
            .clone()
            .unwrap_or_else(|| constants::DEFAULT_SUBCATEGORY.to_string()),
        source: constants::source_tag(&config.venue.name),
        venue_id: None,
    })
}

/// Drives one source end to end: fetch, extract, normalize, dedup, snapshot,
/// publish, link. Sources run sequentially; nothing here is shared across
/// concurrent runs.
pub struct Pipeline {
    config: Config,
    fetcher: FetchClient,
    storage: Arc<dyn Storage>,
    browser: Option<Arc<dyn DocumentProvider>>,
}

impl Pipeline {
    pub fn new(config: Config, storage: Arc<dyn Storage>) -> Result<Self> {
        let fetcher = FetchClient::new(&config.fetch)?;
        Ok(Self {
            config,
            fetcher,
            storage,
            browser: None,
        })
    }

    /// Attaches a rendered-document capability for script-heavy sources.
    pub fn with_browser(mut self, browser: Arc<dyn DocumentProvider>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Fetches every listing document for the source: one per window when a
    /// window template is configured, a single page otherwise. Failed windows
    /// are skipped and reported; the run goes on with what it got.
    #[instrument(skip(self), fields(source = %source.source_id))]
    async fn collect_documents(
        &self,
        source: &SourceConfig,
        today: NaiveDate,
    ) -> (Vec<String>, Vec<String>) {
        let mut documents = Vec::new();
        let mut errors = Vec::new();

        if source.requires_browser {
            match &self.browser {
                Some(browser) => match browser.render(&source.urls.events).await {
                    Ok(body) => documents.push(body),
                    Err(e) => {
                        warn!("Browser render failed for {}: {}", source.urls.events, e);
                        errors.push(format!("browser render failed: {e}"));
                    }
                },
                None => {
                    warn!(
                        "Source {} requires a browser capability; none configured",
                        source.source_id
                    );
                    errors.push("no browser capability configured".to_string());
                }
            }
            return (documents, errors);
        }

        if let Some(template) = &source.urls.window_template {
            let date_format = source
                .urls
                .window_date_format
                .as_deref()
                .unwrap_or("%Y-%m-%d");
            let windows = windows_from(
                today,
                self.config.windows.count,
                self.config.windows.length_days,
            );

            for window in &windows {
                let url = fill_template(template, window, date_format);
                match self.fetcher.fetch_with_retry(&url).await {
                    Ok(body) => documents.push(body),
                    Err(e) => {
                        warn!("Window fetch failed for {}: {}", url, e);
                        counter!("scraper_window_failures_total", "source" => source.source_id.clone())
                            .increment(1);
                        errors.push(format!("window fetch failed ({url}): {e}"));
                    }
                }
            }
            return (documents, errors);
        }

        match self.fetcher.fetch_with_retry(&source.urls.events).await {
            Ok(body) => documents.push(body),
            Err(e) => {
                warn!("Listing fetch failed for {}: {}", source.urls.events, e);
                errors.push(format!("listing fetch failed: {e}"));
            }
        }
        (documents, errors)
    }

    /// Extracts raw field sets from one document, through the shape parser
    /// when the source has a known text shape, the selector engine otherwise.
    /// Browser-rendered documents always go through the selector engine.
    fn extract_events(
        &self,
        source: &SourceConfig,
        body: &str,
        today: NaiveDate,
    ) -> Vec<RawFieldSet> {
        match shapes::resolve_shape(source) {
            Some(shape) if shape != EventShape::ScriptRendered => {
                shapes::parse_with_shape(shape, body, today)
            }
            _ => Extractor::new(source, today).extract(body),
        }
    }

    /// Follows each event's detail page and merges richer fields in. A failed
    /// detail fetch leaves the list-page fields untouched.
    async fn enrich_from_details(
        &self,
        source: &SourceConfig,
        items: &mut [RawFieldSet],
        today: NaiveDate,
    ) {
        let extractor = Extractor::new(source, today);
        let total = items.len();

        for (i, fields) in items.iter_mut().enumerate() {
            let Some(url) = fields.source_url.clone() else {
                continue;
            };
            match self.fetcher.fetch(&url).await {
                Ok(body) => {
                    extractor.enrich(fields, &body);
                    debug!("Enriched detail {}/{}", i + 1, total);
                }
                Err(e) => {
                    warn!("Detail fetch failed for {}: {}", url, e);
                }
            }
        }
    }

    /// Runs the complete pipeline for a single source.
    #[instrument(skip(self, options), fields(source = %source.source_id))]
    pub async fn run_source(
        &self,
        source: &SourceConfig,
        options: &RunOptions,
    ) -> Result<SourceRunResult> {
        let mut options = options.clone();
        let today = Utc::now().date_naive();

        println!("{}", "=".repeat(60));
        println!("{} Event Scraper", source.venue.name);
        println!("{}", "=".repeat(60));
        info!("🚀 Starting pipeline for {}", source.source_id);
        counter!("scraper_pipeline_runs_total", "source" => source.source_id.clone()).increment(1);
        let t_pipeline = std::time::Instant::now();

        let mut run = HarvestRun {
            id: None,
            name: format!("harvest-{}", source.source_id),
            sources: vec![source.source_id.clone()],
            started_at: Utc::now(),
            finished_at: None,
            stats: RunStats::default(),
            errors: Vec::new(),
        };
        self.storage.create_run(&mut run).await?;

        // Without credentials the remote write path cannot run; downgrade
        // instead of aborting.
        let credentials = IngestCredentials::from_env();
        let publishing = !options.skip_publish;
        let use_direct = options.force_direct || credentials.is_none();
        if publishing && credentials.is_none() && !options.force_direct && !options.dry_run {
            warn!("Ingestion credentials not found. Running in dry-run mode.");
            println!("⚠️  Ingestion credentials not found. Running in dry-run mode.");
            options.dry_run = true;
        }
        if options.dry_run {
            info!("Running in DRY-RUN mode (no writes)");
        }

        let mut stats = RunStats::default();

        // Step 1: fetch listing documents
        info!("📡 Fetching listings from {}...", source.source_id);
        println!("📡 Fetching listings from {}...", source.source_id);
        let t_fetch = std::time::Instant::now();
        let (documents, mut errors) = self.collect_documents(source, today).await;
        histogram!("scraper_fetch_duration_seconds", "source" => source.source_id.clone())
            .record(t_fetch.elapsed().as_secs_f64());

        // Step 2: extract raw field sets
        let mut raw_items = Vec::new();
        for body in &documents {
            raw_items.extend(self.extract_events(source, body, today));
        }
        stats.found = raw_items.len();
        info!("✅ Extracted {} raw events", raw_items.len());
        println!("✅ Extracted {} raw events", raw_items.len());
        histogram!("scraper_raw_events_per_run", "source" => source.source_id.clone())
            .record(raw_items.len() as f64);

        // Step 3: detail-page enrichment
        if source.detail.enabled && !raw_items.is_empty() {
            info!("🔎 Enriching from detail pages...");
            println!("🔎 Enriching from detail pages...");
            self.enrich_from_details(source, &mut raw_items, today).await;
        }

        // Step 4: normalize
        let mut normalized = Vec::new();
        for fields in raw_items {
            match normalize_raw(fields, source) {
                Some(event) => normalized.push(event),
                None => {
                    stats.discarded_invalid += 1;
                    debug!("Discarded event without title");
                }
            }
        }
        counter!("scraper_events_discarded_total", "source" => source.source_id.clone())
            .increment(stats.discarded_invalid as u64);

        // Step 5: dedup across windows
        let mut dedup = Deduplicator::new();
        let mut events = dedup.dedup(normalized);
        stats.collapsed_duplicates = dedup.collapsed();
        stats.after_dedup = events.len();
        counter!("scraper_duplicates_collapsed_total", "source" => source.source_id.clone())
            .increment(stats.collapsed_duplicates as u64);

        if options.future_only {
            events.retain(|e| e.start_date.map_or(true, |d| d >= today));
        }
        info!(
            "✅ Normalized {} events ({} duplicates collapsed, {} discarded)",
            events.len(),
            stats.collapsed_duplicates,
            stats.discarded_invalid
        );
        println!(
            "✅ Normalized {} events ({} duplicates collapsed, {} discarded)",
            events.len(),
            stats.collapsed_duplicates,
            stats.discarded_invalid
        );
        counter!("scraper_events_processed_total", "source" => source.source_id.clone())
            .increment(events.len() as u64);

        // Step 6: persist JSON snapshot
        let output_file = Self::persist_to_json(&events, &source.source_id, &self.config.output.dir)?;
        info!("💾 Saved events to {}", output_file);
        println!("💾 Saved events to {}", output_file);

        // Step 7: publish
        let mut outcome = PublishOutcome::default();
        if publishing && !events.is_empty() {
            let strategy =
                publish::select_strategy(credentials, self.storage.clone(), options.force_direct)?;
            info!("📤 Publishing via {}", strategy.strategy_name());
            println!("📤 Publishing via {}", strategy.strategy_name());

            let publish_options = PublishOptions {
                source: source.source_id.clone(),
                city: source.venue.city.clone(),
                dry_run: options.dry_run,
                debug: options.debug,
                sync_to_cache: true,
            };
            match strategy.publish(&events, &publish_options).await {
                Ok(result) => outcome = result,
                Err(e) => {
                    error!("Publishing failed for {}: {}", source.source_id, e);
                    outcome.failed = events.len();
                    outcome.errors.push(format!("publish failed: {e}"));
                }
            }

            stats.inserted = outcome.inserted;
            stats.updated = outcome.updated;
            stats.failed = outcome.failed;
            stats.venues_created = outcome.venues_created;
            errors.extend(outcome.errors.clone());

            // The ingest endpoint links venues itself; the direct store needs
            // an explicit pass.
            if use_direct && !options.dry_run && outcome.inserted > 0 {
                println!("🔗 Linking events to venues...");
                match matcher::link_unmatched(self.storage.as_ref(), false).await {
                    Ok(link) => {
                        stats.venues_linked = link.linked;
                        stats.venues_unmatched = link.unmatched;
                        if link.errors > 0 {
                            errors.push(format!("{} venue link failures", link.errors));
                        }
                        println!("🔗 Linked {} events to venues", link.linked);
                        if link.unmatched > 0 {
                            println!("⚠️  {} events without a matching venue", link.unmatched);
                        }
                    }
                    Err(e) => {
                        warn!("Venue link pass failed: {}", e);
                        errors.push(format!("venue link pass failed: {e}"));
                    }
                }
            }
        }
        counter!("scraper_event_errors_total", "source" => source.source_id.clone())
            .increment(errors.len() as u64);

        run.stats = stats.clone();
        run.errors = errors.clone();
        run.finished_at = Some(Utc::now());
        if let Err(e) = self.storage.update_run(&run).await {
            warn!("Failed to update run record: {}", e);
        }

        histogram!("scraper_pipeline_duration_seconds", "source" => source.source_id.clone())
            .record(t_pipeline.elapsed().as_secs_f64());

        println!("\n{}", "=".repeat(60));
        println!("Summary:");
        println!("{}", "=".repeat(60));
        println!("  Events found:    {}", events.len());
        println!("  Inserted:        {}", stats.inserted);
        println!("  Updated:         {}", stats.updated);
        println!("  Errors:          {}", errors.len());
        println!("{}", "=".repeat(60));

        if options.debug || options.dry_run {
            println!("\n{}", "=".repeat(60));
            println!("Event Data (JSON):");
            println!("{}", "=".repeat(60));
            println!("{}", serde_json::to_string_pretty(&events)?);
        }

        Ok(SourceRunResult {
            source_id: source.source_id.clone(),
            stats,
            errors,
            output_file: Some(output_file),
            dry_run: options.dry_run,
        })
    }

    /// Runs a batch of sources sequentially. A failing source is reported
    /// and the batch moves on.
    pub async fn run_many(
        &self,
        sources: &[&SourceConfig],
        options: &RunOptions,
    ) -> Vec<SourceRunResult> {
        let mut results = Vec::new();
        for source in sources {
            match self.run_source(source, options).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("Pipeline failed for {}: {}", source.source_id, e);
                    results.push(SourceRunResult {
                        source_id: source.source_id.clone(),
                        stats: RunStats::default(),
                        errors: vec![e.to_string()],
                        output_file: None,
                        dry_run: options.dry_run,
                    });
                }
            }
        }
        results
    }

    /// Persist normalized events to a timestamped JSON file
    fn persist_to_json(
        events: &[NormalizedEvent],
        source_id: &str,
        output_dir: &str,
    ) -> Result<String> {
        fs::create_dir_all(output_dir)?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!("{source_id}_{timestamp}.json");
        let filepath = Path::new(output_dir).join(&filename);

        let json_content = serde_json::to_string_pretty(events)?;
        fs::write(&filepath, json_content)?;

        Ok(filepath.to_string_lossy().to_string())
    }
}
