use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::matcher::normalize_name;
use crate::parsing::{date_from_title, extract_price, parse_german_date, parse_time};
use crate::registry::SourceConfig;
use crate::types::RawFieldSet;

// WordPress-style size suffix on image filenames, e.g. "poster-300x200.jpg"
static SIZE_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\d+x\d+").unwrap());

/// Selector-chain extraction engine, parameterized entirely by the source
/// configuration. One instance handles one source for one run.
pub struct Extractor<'a> {
    config: &'a SourceConfig,
    today: NaiveDate,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a SourceConfig, today: NaiveDate) -> Self {
        Self { config, today }
    }

    /// Runs container discovery plus per-card field extraction over one
    /// fetched listing document.
    pub fn extract(&self, body: &str) -> Vec<RawFieldSet> {
        let document = Html::parse_document(body);
        let containers = select_containers(&document, &self.config.selectors.event_container);
        debug!(
            source_id = %self.config.source_id,
            containers = containers.len(),
            "matched event containers"
        );
        containers
            .into_iter()
            .map(|card| self.extract_card(card))
            .collect()
    }

    /// Pulls every configured field out of one event card.
    pub fn extract_card(&self, card: ElementRef) -> RawFieldSet {
        let selectors = &self.config.selectors;
        let base = &self.config.urls.base;

        let mut fields = RawFieldSet {
            title: select_text(card, &selectors.title),
            date_text: select_text(card, &selectors.date),
            time_text: select_text(card, &selectors.time),
            price_text: select_text(card, &selectors.price),
            description: select_text(card, &selectors.description),
            source_url: select_attr(card, &selectors.link, &["href"])
                .map(|href| absolutize(base, &href)),
            image_url: select_attr(card, &selectors.image, &["src", "data-src"])
                .map(|src| absolutize(base, &src)),
            artists: dedup_names(select_text_all(card, &selectors.artists)),
            ..RawFieldSet::default()
        };

        if let Some(date_text) = &fields.date_text {
            fields.date = parse_german_date(date_text, self.today);
        }
        if fields.date.is_none() && self.config.date_in_title {
            if let Some(title) = &fields.title {
                fields.date = date_from_title(title, self.today);
            }
        }
        if let Some(time_text) = &fields.time_text {
            fields.time = parse_time(time_text);
        }
        if let Some(price_text) = &fields.price_text {
            fields.price = extract_price(price_text);
        }

        fields
    }

    /// Merges detail-page fields into an already extracted card. Populated
    /// scalars are kept; title, description and image are replaced only by a
    /// strictly richer value.
    pub fn enrich(&self, fields: &mut RawFieldSet, detail_body: &str) {
        let document = Html::parse_document(detail_body);
        let root = document.root_element();
        let detail = &self.config.detail;
        let base = &self.config.urls.base;

        if let Some(title) = select_text(root, &detail.title) {
            let longer = fields.title.as_ref().map_or(true, |t| title.len() > t.len());
            if longer {
                fields.title = Some(title);
            }
        }

        if let Some(description) = joined_paragraphs(root, &detail.description) {
            let longer = fields
                .description
                .as_ref()
                .map_or(true, |d| description.len() > d.len());
            if longer {
                fields.description = Some(description);
            }
        }

        if fields.ticket_url.is_none() {
            fields.ticket_url =
                select_attr(root, &detail.ticket_link, &["href"]).map(|href| absolutize(base, &href));
        }

        if fields.price.is_none() {
            if let Some(price_text) = select_text(root, &detail.price) {
                fields.price = extract_price(&price_text);
            }
        }

        // Whole-page sweeps for fields the card did not carry
        let page = page_text(&document);
        if fields.time.is_none() {
            fields.time = parse_time(&page);
        }
        if fields.date.is_none() {
            fields.date = parse_german_date(&page, self.today);
        }
        if fields.price.is_none() {
            fields.price = extract_price(&page);
        }

        if let Some(image) = best_image(root, &detail.image) {
            // A thumbnail never replaces an image the card already carried.
            let thumbnail = image.to_lowercase().contains("thumb");
            if fields.image_url.is_none() || !thumbnail {
                let full_size = SIZE_SUFFIX.replace_all(&image, "").to_string();
                fields.image_url = Some(absolutize(base, &full_size));
            }
        }
    }
}

/// Tries the candidate container selectors in order and returns the matches
/// of the first one that hits. First match wins; later candidates are never
/// unioned in.
pub fn select_containers<'b>(document: &'b Html, candidates: &[String]) -> Vec<ElementRef<'b>> {
    for candidate in candidates {
        let selector = match Selector::parse(candidate) {
            Ok(s) => s,
            Err(_) => continue,
        };
        let matches: Vec<ElementRef> = document.select(&selector).collect();
        if !matches.is_empty() {
            return matches;
        }
    }
    Vec::new()
}

/// First non-empty text produced by the candidate selectors, whitespace
/// collapsed.
pub fn select_text(scope: ElementRef, candidates: &[String]) -> Option<String> {
    for candidate in candidates {
        let selector = match Selector::parse(candidate) {
            Ok(s) => s,
            Err(_) => continue,
        };
        if let Some(element) = scope.select(&selector).next() {
            let text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// First non-empty attribute value for the candidate selectors. `attrs` are
/// tried in order on each matched element.
pub fn select_attr(scope: ElementRef, candidates: &[String], attrs: &[&str]) -> Option<String> {
    for candidate in candidates {
        let selector = match Selector::parse(candidate) {
            Ok(s) => s,
            Err(_) => continue,
        };
        for element in scope.select(&selector) {
            for attr in attrs {
                if let Some(value) = element.value().attr(attr) {
                    let value = value.trim();
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
    }
    None
}

/// All texts matched by the first candidate selector that yields anything.
pub fn select_text_all(scope: ElementRef, candidates: &[String]) -> Vec<String> {
    for candidate in candidates {
        let selector = match Selector::parse(candidate) {
            Ok(s) => s,
            Err(_) => continue,
        };
        let texts: Vec<String> = scope
            .select(&selector)
            .map(|e| collapse_whitespace(&e.text().collect::<Vec<_>>().join(" ")))
            .filter(|t| !t.is_empty())
            .collect();
        if !texts.is_empty() {
            return texts;
        }
    }
    Vec::new()
}

/// Case- and whitespace-insensitive dedup that keeps first-seen order.
pub fn dedup_names(names: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for name in names {
        if seen.insert(normalize_name(&name)) {
            out.push(name);
        }
    }
    out
}

/// Resolves a possibly relative href against the source's base URL.
pub fn absolutize(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if href.starts_with("//") {
        return format!("https:{}", href);
    }
    let base = base.trim_end_matches('/');
    if href.starts_with('/') {
        format!("{}{}", base, href)
    } else {
        format!("{}/{}", base, href)
    }
}

// Paragraphs under the first matching description selector, joined with
// blank lines. Short fragments and navigation stubs are dropped.
fn joined_paragraphs(root: ElementRef, candidates: &[String]) -> Option<String> {
    for candidate in candidates {
        let selector = match Selector::parse(candidate) {
            Ok(s) => s,
            Err(_) => continue,
        };
        let parts: Vec<String> = root
            .select(&selector)
            .map(|e| collapse_whitespace(&e.text().collect::<Vec<_>>().join(" ")))
            .filter(|t| t.len() > 10)
            .filter(|t| {
                let lowered = t.to_lowercase();
                !["home", "back", "weiter"]
                    .iter()
                    .any(|nav| lowered.starts_with(nav))
            })
            .collect();
        if !parts.is_empty() {
            return Some(parts.join("\n\n"));
        }
    }
    None
}

// Scores candidate images the way venue sites name them: full-resolution
// uploads beat sized variants beat thumbnails.
fn best_image(root: ElementRef, candidates: &[String]) -> Option<String> {
    let mut best: Option<(i32, String)> = None;
    for candidate in candidates {
        let selector = match Selector::parse(candidate) {
            Ok(s) => s,
            Err(_) => continue,
        };
        for element in root.select(&selector) {
            let src = match element.value().attr("src").or_else(|| element.value().attr("data-src")) {
                Some(s) => s.trim(),
                None => continue,
            };
            if src.is_empty() {
                continue;
            }
            let lowered = src.to_lowercase();
            if ["logo", "icon", "avatar", "wp-content/themes"]
                .iter()
                .any(|skip| lowered.contains(skip))
            {
                continue;
            }
            let mut priority = 0;
            if !lowered.contains("thumb") {
                priority += 2;
            }
            if ["-1024x", "-800x", "-600x", "full"]
                .iter()
                .any(|m| lowered.contains(m))
            {
                priority += 3;
            } else if ["-400x", "-300x"].iter().any(|m| lowered.contains(m)) {
                priority += 1;
            }
            if best.as_ref().map_or(true, |(p, _)| priority > *p) {
                best = Some((priority, src.to_string()));
            }
        }
        if best.is_some() {
            break;
        }
    }
    best.map(|(_, src)| src)
}

/// All text nodes of the document, newline separated, for whole-page
/// pattern sweeps.
pub fn page_text(document: &Html) -> String {
    document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DetailConfig, SelectorConfig, SourceUrls, VenueInfo};

    fn test_config() -> SourceConfig {
        SourceConfig {
            source_id: "grelle-forelle".to_string(),
            enabled: true,
            venue: VenueInfo {
                name: "Grelle Forelle".to_string(),
                address: "Spittelauer Lände 12, 1090 Wien".to_string(),
                city: "Wien".to_string(),
                country: "Austria".to_string(),
                logo_url: None,
            },
            urls: SourceUrls {
                base: "https://www.grelleforelle.com".to_string(),
                events: "https://www.grelleforelle.com/programm/".to_string(),
                window_template: None,
                window_date_format: None,
            },
            selectors: SelectorConfig {
                event_container: vec![
                    "div.missing".to_string(),
                    "div.et_pb_portfolio_item".to_string(),
                ],
                title: vec!["h2 a".to_string(), "h2".to_string()],
                link: vec!["a[href]".to_string()],
                image: vec!["img".to_string()],
                ..SelectorConfig::default()
            },
            detail: DetailConfig {
                enabled: true,
                title: vec!["h1.entry-title".to_string()],
                description: vec!["div.entry-content p".to_string()],
                ticket_link: vec!["a[href*=\"ticket\"]".to_string()],
                price: vec![],
                image: vec!["img[src*=\"wp-content/uploads\"]".to_string()],
            },
            shape: None,
            date_in_title: true,
            requires_browser: false,
            category: None,
            subcategory: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    const LISTING: &str = r#"
        <html><body>
          <div class="et_pb_portfolio_item">
            <a href="/event/kasst/"><img src="/wp-content/uploads/kasst-300x200.jpg"></a>
            <h2><a href="/event/kasst/">26/09 KAS:ST</a></h2>
          </div>
          <div class="et_pb_portfolio_item">
            <a href="/event/clubnacht/"><img src="/wp-content/uploads/club.jpg"></a>
            <h2><a href="/event/clubnacht/">CLUBNACHT</a></h2>
          </div>
        </body></html>"#;

    #[test]
    fn test_container_fallback_takes_first_matching_selector() {
        let document = Html::parse_document(LISTING);
        let config = test_config();
        let containers = select_containers(&document, &config.selectors.event_container);
        assert_eq!(containers.len(), 2);
    }

    #[test]
    fn test_extract_card_fields() {
        let config = test_config();
        let extractor = Extractor::new(&config, today());
        let cards = extractor.extract(LISTING);

        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].title.as_deref(), Some("26/09 KAS:ST"));
        assert_eq!(
            cards[0].source_url.as_deref(),
            Some("https://www.grelleforelle.com/event/kasst/")
        );
        // Date lifted out of the title
        assert_eq!(cards[0].date, NaiveDate::from_ymd_opt(2025, 9, 26));
        // Second card has no date anywhere
        assert_eq!(cards[1].date, None);
    }

    #[test]
    fn test_enrich_prefers_richer_fields() {
        let config = test_config();
        let extractor = Extractor::new(&config, today());
        let mut fields = extractor.extract(LISTING).remove(0);

        let detail = r#"
            <html><body>
              <h1 class="entry-title">KAS:ST All Night Long</h1>
              <div class="entry-content">
                <p>Two hearts beating as one: KAS:ST returns for an extended set.</p>
                <p>Einlass: 23:00</p>
              </div>
              <a href="https://tickets.example.com/kasst">Tickets</a>
              <img src="https://www.grelleforelle.com/wp-content/uploads/kasst-1024x768.jpg">
            </body></html>"#;
        extractor.enrich(&mut fields, detail);

        assert_eq!(fields.title.as_deref(), Some("KAS:ST All Night Long"));
        assert!(fields
            .description
            .as_deref()
            .unwrap()
            .contains("extended set"));
        assert_eq!(
            fields.ticket_url.as_deref(),
            Some("https://tickets.example.com/kasst")
        );
        assert_eq!(fields.time, chrono::NaiveTime::from_hms_opt(23, 0, 0));
        // Size suffix stripped from the full-resolution upload
        assert_eq!(
            fields.image_url.as_deref(),
            Some("https://www.grelleforelle.com/wp-content/uploads/kasst.jpg")
        );
    }

    #[test]
    fn test_enrich_keeps_card_image_over_detail_thumbnail() {
        let config = test_config();
        let extractor = Extractor::new(&config, today());
        let mut fields = extractor.extract(LISTING).remove(0);
        assert_eq!(
            fields.image_url.as_deref(),
            Some("https://www.grelleforelle.com/wp-content/uploads/kasst-300x200.jpg")
        );

        let detail = r#"
            <html><body>
              <img src="https://www.grelleforelle.com/wp-content/uploads/kasst-thumb.jpg">
            </body></html>"#;
        extractor.enrich(&mut fields, detail);

        // The detail page only offers a thumbnail; the card image stays
        assert_eq!(
            fields.image_url.as_deref(),
            Some("https://www.grelleforelle.com/wp-content/uploads/kasst-300x200.jpg")
        );

        // Without a card image the thumbnail is still better than nothing
        let mut bare = RawFieldSet::default();
        extractor.enrich(&mut bare, detail);
        assert_eq!(
            bare.image_url.as_deref(),
            Some("https://www.grelleforelle.com/wp-content/uploads/kasst-thumb.jpg")
        );
    }

    #[test]
    fn test_enrich_keeps_longer_existing_description() {
        let config = test_config();
        let extractor = Extractor::new(&config, today());
        let mut fields = RawFieldSet {
            description: Some("An existing long description that should stay in place".to_string()),
            ..RawFieldSet::default()
        };

        let detail = r#"<html><body><div class="entry-content"><p>Short blurb here</p></div></body></html>"#;
        extractor.enrich(&mut fields, detail);

        assert!(fields.description.as_deref().unwrap().starts_with("An existing"));
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize("https://www.b72.at", "/program"),
            "https://www.b72.at/program"
        );
        assert_eq!(
            absolutize("https://www.b72.at/", "program"),
            "https://www.b72.at/program"
        );
        assert_eq!(
            absolutize("https://www.b72.at", "https://other.at/x"),
            "https://other.at/x"
        );
        assert_eq!(
            absolutize("https://www.b72.at", "//cdn.example.com/a.jpg"),
            "https://cdn.example.com/a.jpg"
        );
    }

    #[test]
    fn test_dedup_names_is_case_and_whitespace_insensitive() {
        let names = vec![
            "KAS:ST".to_string(),
            "kas:st".to_string(),
            "  KAS:ST ".to_string(),
            "Amelie Lens".to_string(),
        ];
        assert_eq!(dedup_names(names), vec!["KAS:ST", "Amelie Lens"]);
    }

    #[test]
    fn test_invalid_selector_is_skipped() {
        let document = Html::parse_document(LISTING);
        let candidates = vec![":::garbage:::".to_string(), "h2".to_string()];
        let containers = select_containers(&document, &candidates);
        assert_eq!(containers.len(), 2);
    }
}
