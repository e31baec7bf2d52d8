//! Resolution of shortened notification links to retailer product ids.
//!
//! Notification messages carry a shortened link to the retailer listing. A
//! HEAD request that follows redirects yields the retailer URL, and the
//! product id (ASIN) is read from its path, e.g. `/dp/B08HR7SV3M`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::Url;
use restock_core::models::RestockEvent;
use restock_core::{RestockError, Result};
use tracing::{debug, warn};

const MAX_REDIRECTS: usize = 10;

const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Length of a retailer product id.
const ASIN_LEN: usize = 10;

/// Path segments that precede the product id in retailer URLs.
const ASIN_MARKERS: [&str; 3] = ["dp", "product", "d"];

// ── LinkResolver ──────────────────────────────────────────────────────────────

/// Anything that can expand a link to its final destination.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve(&self, link: &str) -> Result<Url>;
}

/// Follows redirects with HEAD requests.
pub struct HttpLinkResolver {
    client: reqwest::Client,
}

impl HttpLinkResolver {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| RestockError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LinkResolver for HttpLinkResolver {
    async fn resolve(&self, link: &str) -> Result<Url> {
        let resp = self
            .client
            .head(link)
            .send()
            .await
            .map_err(|e| RestockError::Network(e.to_string()))?;

        // The final URL is usable even when the retailer refuses HEAD.
        if !resp.status().is_success() {
            debug!(link = %link, status = resp.status().as_u16(), "link resolved with non-success status");
        }
        Ok(resp.url().clone())
    }
}

// ── ASIN extraction ───────────────────────────────────────────────────────────

/// Product id in a retailer URL, uppercased.
///
/// The segment after `dp`, `product` or `d` wins; otherwise the last path
/// segment is used if it looks like a product id.
pub fn extract_asin(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();

    let after_marker = segments
        .windows(2)
        .find(|pair| ASIN_MARKERS.contains(&pair[0]) && is_asin(pair[1]))
        .map(|pair| pair[1]);

    after_marker
        .or_else(|| segments.last().copied().filter(|s| is_asin(s)))
        .map(str::to_ascii_uppercase)
}

fn is_asin(segment: &str) -> bool {
    segment.len() == ASIN_LEN && segment.chars().all(|c| c.is_ascii_alphanumeric())
}

// ── resolve_asins ─────────────────────────────────────────────────────────────

/// Fill in `asin` for every event with a link and no ASIN yet.
///
/// Each distinct link is requested once. A link that fails to resolve is
/// logged and left without an ASIN; it never fails the batch. Returns the
/// number of events that received an ASIN.
pub async fn resolve_asins(resolver: &dyn LinkResolver, events: &mut [RestockEvent]) -> usize {
    let mut cache: HashMap<String, Option<String>> = HashMap::new();
    let mut resolved = 0;

    for event in events.iter_mut().filter(|e| e.asin.is_none()) {
        let Some(link) = event.link.clone() else {
            continue;
        };

        if !cache.contains_key(&link) {
            let asin = match resolver.resolve(&link).await {
                Ok(url) => {
                    let asin = extract_asin(&url);
                    if asin.is_none() {
                        debug!(link = %link, url = %url, "no product id in resolved link");
                    }
                    asin
                }
                Err(e) => {
                    warn!(link = %link, error = %e, "could not resolve link");
                    None
                }
            };
            cache.insert(link.clone(), asin);
        }

        if let Some(asin) = cache.get(&link).cloned().flatten() {
            event.asin = Some(asin);
            resolved += 1;
        }
    }

    resolved
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    /// Maps short links to fixed destinations and counts lookups.
    struct MapResolver {
        targets: HashMap<String, String>,
        calls: Mutex<Vec<String>>,
    }

    impl MapResolver {
        fn new(targets: &[(&str, &str)]) -> Self {
            Self {
                targets: targets
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LinkResolver for MapResolver {
        async fn resolve(&self, link: &str) -> Result<Url> {
            self.calls.lock().unwrap().push(link.to_string());
            match self.targets.get(link) {
                Some(target) => Ok(Url::parse(target).unwrap()),
                None => Err(RestockError::Network(format!("no route to {link}"))),
            }
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn event(id: &str, link: Option<&str>) -> RestockEvent {
        let mut e = RestockEvent::new("RTX3080", Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(), id);
        e.link = link.map(str::to_string);
        e
    }

    // ── extract_asin ──────────────────────────────────────────────────────────

    #[test]
    fn test_extract_asin_after_dp() {
        let u = url("https://www.amazon.com/EVGA-GeForce-Gaming/dp/B08HR3Y5GQ?tag=snail-20&th=1");
        assert_eq!(extract_asin(&u).as_deref(), Some("B08HR3Y5GQ"));
    }

    #[test]
    fn test_extract_asin_gp_product() {
        let u = url("https://www.amazon.com/gp/product/b08hr7sv3m/ref=ox_sc_act_title_1");
        assert_eq!(extract_asin(&u).as_deref(), Some("B08HR7SV3M"));
    }

    #[test]
    fn test_extract_asin_trailing_segment() {
        let u = url("https://smile.amazon.com/B08KWLMZV4?smid=ATVPDKIKX0DER");
        assert_eq!(extract_asin(&u).as_deref(), Some("B08KWLMZV4"));
    }

    #[test]
    fn test_extract_asin_none_for_other_urls() {
        assert_eq!(extract_asin(&url("https://www.bestbuy.com/site/searchpage.jsp?st=3080")), None);
        assert_eq!(extract_asin(&url("https://t.co/abc123")), None);
    }

    // ── resolve_asins ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_resolve_asins_caches_per_link() {
        let resolver = MapResolver::new(&[(
            "https://t.co/a",
            "https://www.amazon.com/dp/B08HR3Y5GQ?tag=x",
        )]);
        let mut events = vec![
            event("1", Some("https://t.co/a")),
            event("2", Some("https://t.co/a")),
            event("3", None),
        ];

        let resolved = resolve_asins(&resolver, &mut events).await;

        assert_eq!(resolved, 2);
        assert_eq!(events[0].asin.as_deref(), Some("B08HR3Y5GQ"));
        assert_eq!(events[1].asin.as_deref(), Some("B08HR3Y5GQ"));
        assert_eq!(events[2].asin, None);
        assert_eq!(resolver.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_failure_leaves_event_unresolved() {
        let resolver = MapResolver::new(&[(
            "https://t.co/good",
            "https://www.amazon.com/dp/B08HR7SV3M",
        )]);
        let mut events = vec![
            event("1", Some("https://t.co/broken")),
            event("2", Some("https://t.co/good")),
        ];

        let resolved = resolve_asins(&resolver, &mut events).await;

        assert_eq!(resolved, 1);
        assert_eq!(events[0].asin, None);
        assert_eq!(events[1].asin.as_deref(), Some("B08HR7SV3M"));
    }

    #[tokio::test]
    async fn test_resolve_skips_events_with_asin() {
        let resolver = MapResolver::new(&[]);
        let mut e = event("1", Some("https://t.co/a"));
        e.asin = Some("B000000001".to_string());
        let mut events = vec![e];

        assert_eq!(resolve_asins(&resolver, &mut events).await, 0);
        assert!(resolver.calls.lock().unwrap().is_empty());
    }
}
