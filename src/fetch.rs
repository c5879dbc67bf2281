use crate::config::FetchConfig;
use crate::constants::USER_AGENT;
use crate::error::{Result, ScraperError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Renders script-driven pages into static HTML.
///
/// Sources flagged as browser-rendered need an external automation
/// capability; when none is wired in, those sources are skipped.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn render(&self, url: &str) -> Result<String>;
}

/// HTTP client with per-origin pacing and bounded retry.
pub struct FetchClient {
    client: reqwest::Client,
    min_delay: Duration,
    max_attempts: u32,
    base_delay: Duration,
    last_slot: Mutex<HashMap<String, Instant>>,
}

impl FetchClient {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            min_delay: Duration::from_secs_f64(config.min_delay_secs),
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(config.base_delay_secs),
            last_slot: Mutex::new(HashMap::new()),
        })
    }

    /// Fetches one document. A non-2xx status is a fetch failure.
    pub async fn fetch(&self, url: &str) -> Result<String> {
        self.pace(url).await;
        debug!(url, "fetching document");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScraperError::Fetch {
                url: url.to_string(),
                message: format!("unexpected status {}", status),
            });
        }
        Ok(response.text().await?)
    }

    /// Retries `fetch` with exponential backoff and returns the last error
    /// once attempts are exhausted.
    pub async fn fetch_with_retry(&self, url: &str) -> Result<String> {
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            match self.fetch(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!(url, attempt, error = %e, "fetch attempt failed");
                    last_error = Some(e);
                    if attempt < self.max_attempts {
                        tokio::time::sleep(backoff_delay(self.base_delay, attempt)).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ScraperError::Fetch {
            url: url.to_string(),
            message: "retries exhausted".to_string(),
        }))
    }

    // Reserve the next request slot for this origin under the lock, then
    // sleep outside it so concurrent callers queue up instead of piling on.
    async fn pace(&self, url: &str) {
        let origin = origin_of(url);
        let wait = {
            let mut slots = self.last_slot.lock().await;
            let now = Instant::now();
            let earliest = match slots.get(&origin) {
                Some(prev) => (*prev + self.min_delay).max(now),
                None => now,
            };
            slots.insert(origin, earliest);
            earliest - now
        };
        if !wait.is_zero() {
            debug!(origin = %origin_of(url), wait_ms = wait.as_millis() as u64, "pacing request");
            tokio::time::sleep(wait).await;
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    // Exponent capped to keep the multiplier inside u32
    base * 2u32.saturating_pow(attempt.saturating_sub(1).min(16))
}

// Scheme plus host, so pacing applies per site rather than per page.
fn origin_of(url: &str) -> String {
    match url.find("://") {
        Some(idx) => {
            let rest = &url[idx + 3..];
            let host_end = rest.find('/').unwrap_or(rest.len());
            url[..idx + 3 + host_end].to_string()
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_of_strips_path() {
        assert_eq!(
            origin_of("https://www.grelleforelle.com/programm/"),
            "https://www.grelleforelle.com"
        );
        assert_eq!(origin_of("https://rhiz.wien"), "https://rhiz.wien");
        assert_eq!(origin_of("not a url"), "not a url");
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_exponent_is_capped() {
        let base = Duration::from_millis(10);
        assert_eq!(backoff_delay(base, 17), base * 65536);
        // Attempts past the cap stop growing instead of overflowing
        assert_eq!(backoff_delay(base, 40), backoff_delay(base, 17));
    }

    #[tokio::test]
    async fn test_same_origin_requests_are_spaced() {
        let config = FetchConfig {
            min_delay_secs: 0.05,
            ..Default::default()
        };
        let client = FetchClient::new(&config).unwrap();

        let begin = std::time::Instant::now();
        client.pace("https://example.com/a").await;
        client.pace("https://example.com/b").await;
        assert!(begin.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_different_origins_do_not_wait() {
        let config = FetchConfig {
            min_delay_secs: 5.0,
            ..Default::default()
        };
        let client = FetchClient::new(&config).unwrap();

        let begin = std::time::Instant::now();
        client.pace("https://a.example.com/x").await;
        client.pace("https://b.example.com/x").await;
        assert!(begin.elapsed() < Duration::from_secs(1));
    }
}
