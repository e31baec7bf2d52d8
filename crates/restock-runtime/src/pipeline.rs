//! One scheduled run: fetch, parse, merge, persist, aggregate, publish.
//!
//! The store is saved before anything is published, so a failing publisher
//! never loses newly observed events. A failure while fetching aborts the run
//! before the store is touched; the next run picks up from the same bound.
//! A walk cut short by the page limit is saved together with its resume
//! point, so older messages are fetched by the following runs.

use std::path::Path;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use restock_core::registry::ProductRegistry;
use restock_core::settings::Settings;
use restock_core::{RestockError, Result};
use restock_data::aggregator::Aggregator;
use restock_data::fetcher::{next_fetch_state, plan_fetch, MessageSource, TimelinePager};
use restock_data::links::{resolve_asins, LinkResolver};
use restock_data::parser::EventParser;
use restock_data::store::EventStore;

use crate::publisher::ReportSink;
use crate::report::render_report;

// ── RunOptions ────────────────────────────────────────────────────────────────

/// Per-run knobs, usually taken from [`Settings`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub account: String,
    pub lookback_days: u32,
    pub max_pages: u32,
    pub page_size: u32,
    pub skip_fetch: bool,
    /// Report timezone for rendering and calendar buckets.
    pub timezone: Tz,
}

impl RunOptions {
    pub fn from_settings(settings: &Settings, timezone: Tz) -> Self {
        Self {
            account: settings.account.clone(),
            lookback_days: settings.lookback_days,
            max_pages: settings.max_pages,
            page_size: settings.page_size,
            skip_fetch: settings.skip_fetch,
            timezone,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            account: "SnailMonitor".to_string(),
            lookback_days: 7,
            max_pages: 10,
            page_size: 100,
            skip_fetch: false,
            timezone: Tz::UTC,
        }
    }
}

/// Counters describing a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pages: u32,
    pub messages: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub mismatched: usize,
    pub resolved: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub stored: usize,
    pub report_rows: usize,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// Wires a message source, the registry and a report sink together.
pub struct Pipeline<'a> {
    registry: &'a ProductRegistry,
    source: Option<&'a dyn MessageSource>,
    resolver: Option<&'a dyn LinkResolver>,
    sink: &'a dyn ReportSink,
    options: RunOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(registry: &'a ProductRegistry, sink: &'a dyn ReportSink, options: RunOptions) -> Self {
        Self {
            registry,
            source: None,
            resolver: None,
            sink,
            options,
        }
    }

    /// Source to fetch from. Not needed when `skip_fetch` is set.
    pub fn with_source(mut self, source: &'a dyn MessageSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Resolve links of newly seen events to ASINs. Without a resolver the
    /// listing breakdown falls back to listing names.
    pub fn with_resolver(mut self, resolver: &'a dyn LinkResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Execute one run against the store at `store_path`.
    pub async fn run(&self, store_path: &Path, now: DateTime<Utc>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut store = EventStore::open(store_path)?;
        tracing::info!(
            path = %store_path.display(),
            events = store.len(),
            "event store opened"
        );

        if self.options.skip_fetch {
            tracing::info!("fetch skipped; republishing stored history");
        } else {
            self.ingest(&mut store, now, &mut summary).await?;
        }
        summary.stored = store.len();

        let stats = Aggregator::new(self.registry, self.options.timezone).compute(store.events(), now);
        let grid = render_report(&stats, self.registry, self.options.timezone, now);
        summary.report_rows = stats.len();
        tracing::info!(rows = stats.len(), "statistics computed");

        if let Err(e) = self.sink.publish(&grid).await {
            tracing::error!(sink = self.sink.name(), error = %e, "publishing failed; stored events are kept");
            return Err(e);
        }
        tracing::info!(sink = self.sink.name(), "report published");

        Ok(summary)
    }

    /// Fetch new messages, parse them and persist the merged store.
    async fn ingest(&self, store: &mut EventStore, now: DateTime<Utc>, summary: &mut RunSummary) -> Result<()> {
        let source = self
            .source
            .ok_or_else(|| RestockError::Config("no message source configured".to_string()))?;
        let parser = EventParser::new(self.registry)?;

        let state = store.fetch_state().clone();
        let plan = plan_fetch(&state, store.latest_timestamp(), now, self.options.lookback_days);
        let query = self.registry.search_query(&self.options.account);
        tracing::info!(
            query = %query,
            since = %plan.since,
            until_id = plan.until_id.as_deref().unwrap_or("-"),
            "fetching messages"
        );

        let mut pager = TimelinePager::new(
            source,
            query,
            Some(plan.since),
            self.options.page_size,
            self.options.max_pages,
        )
        .until_id(plan.until_id.clone());

        let mut events = Vec::new();
        while let Some(messages) = pager.next_page().await? {
            summary.messages += messages.len();
            let outcome = parser.parse_all(&messages);
            summary.matched += outcome.events.len();
            summary.unmatched += outcome.unmatched;
            summary.mismatched += outcome.mismatches.len();
            events.extend(outcome.events);
        }
        summary.pages = pager.pages_fetched();

        tracing::info!(
            pages = summary.pages,
            messages = summary.messages,
            matched = summary.matched,
            unmatched = summary.unmatched,
            mismatched = summary.mismatched,
            "messages parsed"
        );

        if let Some(resolver) = self.resolver {
            let (mut fresh, known): (Vec<_>, Vec<_>) =
                events.into_iter().partition(|e| !store.contains(e.key()));
            summary.resolved = resolve_asins(resolver, &mut fresh).await;
            tracing::info!(resolved = summary.resolved, candidates = fresh.len(), "links resolved");
            events = fresh;
            events.extend(known);
        }

        let merge = store.merge(events);
        summary.inserted = merge.inserted;
        summary.duplicates = merge.duplicates;

        let next_state = next_fetch_state(&state, &plan, pager.outcome());
        let progressed = next_state != state;
        store.set_fetch_state(next_state);

        if merge.inserted > 0 || progressed {
            store.save()?;
        }
        tracing::info!(
            inserted = merge.inserted,
            duplicates = merge.duplicates,
            total = store.len(),
            "event store updated"
        );
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use restock_core::models::{RawMessage, Window};
    use restock_core::registry::ProductEntry;
    use restock_data::fetcher::{Page, PageRequest};
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::report::Grid;

    // ── fakes ─────────────────────────────────────────────────────────────────

    /// Returns the given messages as a single page.
    struct StaticSource {
        messages: Vec<RawMessage>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl StaticSource {
        fn new(messages: Vec<RawMessage>) -> Self {
            Self {
                messages,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessageSource for StaticSource {
        async fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(Page {
                messages: self.messages.clone(),
                next_token: None,
            })
        }
    }

    /// Serves its messages one per page, newest first, honouring `since`
    /// and `until_id` the way the recent-search endpoint does.
    struct PagedSource {
        messages: Vec<RawMessage>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl PagedSource {
        fn new(messages: Vec<RawMessage>) -> Self {
            Self {
                messages,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessageSource for PagedSource {
        async fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
            self.requests.lock().unwrap().push(request.clone());
            let matching: Vec<&RawMessage> = self
                .messages
                .iter()
                .filter(|m| {
                    let ts = DateTime::parse_from_rfc3339(&m.created_at).unwrap().with_timezone(&Utc);
                    request.since.map_or(true, |since| ts >= since)
                })
                .filter(|m| {
                    request.until_id.as_ref().map_or(true, |until| {
                        m.id.parse::<u64>().unwrap() < until.parse::<u64>().unwrap()
                    })
                })
                .collect();

            let offset: usize = request.next_token.as_deref().map_or(0, |t| t.parse().unwrap());
            Ok(Page {
                messages: matching.get(offset).map(|m| vec![(*m).clone()]).unwrap_or_default(),
                next_token: (offset + 1 < matching.len()).then(|| (offset + 1).to_string()),
            })
        }
    }

    struct FixedResolver;

    #[async_trait]
    impl LinkResolver for FixedResolver {
        async fn resolve(&self, link: &str) -> Result<reqwest::Url> {
            assert_ne!(link, "https://t.co/old", "stored events are not resolved again");
            Ok(reqwest::Url::parse("https://www.amazon.com/dp/B08HR3Y5GQ?tag=x").unwrap())
        }
    }

    struct RateLimitedSource;

    #[async_trait]
    impl MessageSource for RateLimitedSource {
        async fn fetch_page(&self, _request: &PageRequest) -> Result<Page> {
            Err(RestockError::RateLimited { reset_at: None })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        grids: Mutex<Vec<Grid>>,
    }

    #[async_trait]
    impl ReportSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn publish(&self, grid: &[Vec<String>]) -> Result<()> {
            self.grids.lock().unwrap().push(grid.to_vec());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl ReportSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn publish(&self, _grid: &[Vec<String>]) -> Result<()> {
            Err(RestockError::Publish("sheet unavailable".to_string()))
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    fn registry() -> ProductRegistry {
        ProductRegistry::new(vec![ProductEntry::new("RTX3080", "GeForce RTX 3080", "#RTX3080")]).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn at(hours_ago: i64) -> String {
        (now() - Duration::hours(hours_ago)).to_rfc3339()
    }

    fn sample_messages() -> Vec<RawMessage> {
        // Newest first, as the provider returns them.
        vec![
            RawMessage::new("3", "#RTX3080 restocked", at(2)),
            RawMessage::new("2", "unrelated", at(5)),
            RawMessage::new("1", "RTX 3080 back in stock #RTX3080", at(10)),
        ]
    }

    // ── run ───────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_run_ingests_and_publishes() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("events.json");
        let registry = registry();
        let source = StaticSource::new(sample_messages());
        let sink = RecordingSink::default();

        let summary = Pipeline::new(&registry, &sink, RunOptions::default())
            .with_source(&source)
            .run(&store_path, now())
            .await
            .unwrap();

        assert_eq!(summary.messages, 3);
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.unmatched, 1);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.stored, 2);
        assert_eq!(summary.report_rows, Window::ALL.len());

        let store = EventStore::open(&store_path).unwrap();
        let events = store.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].source_message_id, "1");
        assert_eq!(events[1].source_message_id, "3");

        let stats = Aggregator::new(&registry, Tz::UTC).compute(events, now());
        let gaps = stats[0].inter_arrival.unwrap();
        assert_eq!(gaps.mean, Duration::hours(8).num_seconds() as f64);

        let grids = sink.grids.lock().unwrap();
        assert_eq!(grids.len(), 1);
        assert_eq!(grids[0][1][0], "GeForce RTX 3080");
        assert_eq!(grids[0][1][2], "2");
    }

    #[tokio::test]
    async fn test_rerun_with_partial_window_keeps_history() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("events.json");
        let registry = registry();
        let sink = RecordingSink::default();

        let first = StaticSource::new(sample_messages());
        Pipeline::new(&registry, &sink, RunOptions::default())
            .with_source(&first)
            .run(&store_path, now())
            .await
            .unwrap();

        let only_latest = StaticSource::new(vec![RawMessage::new("3", "#RTX3080 restocked", at(2))]);
        let summary = Pipeline::new(&registry, &sink, RunOptions::default())
            .with_source(&only_latest)
            .run(&store_path, now())
            .await
            .unwrap();

        assert_eq!(summary.inserted, 0);
        let store = EventStore::open(&store_path).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.contains("1"));
    }

    #[tokio::test]
    async fn test_new_events_get_asin_from_resolver() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("events.json");
        let registry = registry();
        let sink = RecordingSink::default();

        let first = StaticSource::new(vec![RawMessage::new(
            "1",
            "EVGA RTX 3080 in stock at Amazon #RTX3080 https://t.co/old",
            at(10),
        )]);
        Pipeline::new(&registry, &sink, RunOptions::default())
            .with_source(&first)
            .run(&store_path, now())
            .await
            .unwrap();

        let second = StaticSource::new(vec![
            RawMessage::new("2", "EVGA RTX 3080 in stock at Amazon #RTX3080 https://t.co/new", at(2)),
            RawMessage::new("1", "EVGA RTX 3080 in stock at Amazon #RTX3080 https://t.co/old", at(10)),
        ]);
        let summary = Pipeline::new(&registry, &sink, RunOptions::default())
            .with_source(&second)
            .with_resolver(&FixedResolver)
            .run(&store_path, now())
            .await
            .unwrap();

        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.inserted, 1);
        let store = EventStore::open(&store_path).unwrap();
        assert_eq!(store.events()[0].asin, None);
        assert_eq!(store.events()[1].asin.as_deref(), Some("B08HR3Y5GQ"));

        let grids = sink.grids.lock().unwrap();
        let last = grids.last().unwrap();
        assert!(last.contains(&vec![
            "GeForce RTX 3080".to_string(),
            "EVGA RTX 3080".to_string(),
            "B08HR3Y5GQ".to_string(),
            "1".to_string(),
        ]));
    }

    #[tokio::test]
    async fn test_page_limit_resumes_on_following_runs() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("events.json");
        let registry = registry();
        let sink = RecordingSink::default();
        let source = PagedSource::new(vec![
            RawMessage::new("30", "#RTX3080 restocked", at(2)),
            RawMessage::new("20", "#RTX3080 restocked", at(5)),
            RawMessage::new("10", "#RTX3080 restocked", at(10)),
        ]);
        let options = RunOptions {
            max_pages: 1,
            ..RunOptions::default()
        };

        let mut stored = Vec::new();
        for _ in 0..3 {
            let summary = Pipeline::new(&registry, &sink, options.clone())
                .with_source(&source)
                .run(&store_path, now())
                .await
                .unwrap();
            stored.push(summary.stored);
        }

        assert_eq!(stored, vec![1, 2, 3]);
        let store = EventStore::open(&store_path).unwrap();
        let ids: Vec<&str> = store.events().iter().map(|e| e.source_message_id.as_str()).collect();
        assert_eq!(ids, vec!["10", "20", "30"]);

        let state = store.fetch_state();
        assert_eq!(state.backfill, None);
        assert_eq!(state.watermark, Some(now() - Duration::hours(2)));

        let requests = source.requests.lock().unwrap();
        assert_eq!(requests[0].until_id, None);
        assert_eq!(requests[1].until_id.as_deref(), Some("30"));
        assert_eq!(requests[2].until_id.as_deref(), Some("20"));

        // Caught up: the next run only asks for messages after the newest one.
        drop(requests);
        Pipeline::new(&registry, &sink, options)
            .with_source(&source)
            .run(&store_path, now())
            .await
            .unwrap();
        let requests = source.requests.lock().unwrap();
        assert_eq!(requests[3].until_id, None);
        assert_eq!(requests[3].since, Some(now() - Duration::hours(2) + Duration::seconds(1)));
    }

    #[tokio::test]
    async fn test_second_run_starts_after_latest_stored_event() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("events.json");
        let registry = registry();
        let sink = RecordingSink::default();

        let first = StaticSource::new(sample_messages());
        Pipeline::new(&registry, &sink, RunOptions::default())
            .with_source(&first)
            .run(&store_path, now())
            .await
            .unwrap();

        let second = StaticSource::new(Vec::new());
        Pipeline::new(&registry, &sink, RunOptions::default())
            .with_source(&second)
            .run(&store_path, now())
            .await
            .unwrap();

        let requests = second.requests.lock().unwrap();
        let expected = now() - Duration::hours(2) + Duration::seconds(1);
        assert_eq!(requests[0].since, Some(expected));
        assert_eq!(requests[0].query, "from:SnailMonitor (#RTX3080)");
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_merged_store() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("events.json");
        let registry = registry();
        let source = StaticSource::new(sample_messages());

        let err = Pipeline::new(&registry, &FailingSink, RunOptions::default())
            .with_source(&source)
            .run(&store_path, now())
            .await
            .unwrap_err();

        assert!(matches!(err, RestockError::Publish(_)));
        assert_eq!(err.exit_code(), 69);
        assert_eq!(EventStore::open(&store_path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_aborts_before_store_or_publish() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("events.json");
        let registry = registry();
        let sink = RecordingSink::default();

        let err = Pipeline::new(&registry, &sink, RunOptions::default())
            .with_source(&RateLimitedSource)
            .run(&store_path, now())
            .await
            .unwrap_err();

        assert!(matches!(err, RestockError::RateLimited { .. }));
        assert!(!store_path.exists());
        assert!(sink.grids.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_store_aborts_without_overwrite() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("events.json");
        std::fs::write(&store_path, "garbage").unwrap();
        let registry = registry();
        let source = StaticSource::new(sample_messages());
        let sink = RecordingSink::default();

        let err = Pipeline::new(&registry, &sink, RunOptions::default())
            .with_source(&source)
            .run(&store_path, now())
            .await
            .unwrap_err();

        assert!(matches!(err, RestockError::StoreCorrupt { .. }));
        assert_eq!(std::fs::read_to_string(&store_path).unwrap(), "garbage");
        assert!(source.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skip_fetch_republishes_without_source() {
        let tmp = TempDir::new().unwrap();
        let store_path = tmp.path().join("events.json");
        let registry = registry();
        let sink = RecordingSink::default();

        let first = StaticSource::new(sample_messages());
        Pipeline::new(&registry, &sink, RunOptions::default())
            .with_source(&first)
            .run(&store_path, now())
            .await
            .unwrap();

        let options = RunOptions {
            skip_fetch: true,
            ..RunOptions::default()
        };
        let summary = Pipeline::new(&registry, &sink, options)
            .run(&store_path, now())
            .await
            .unwrap();

        assert_eq!(summary.messages, 0);
        assert_eq!(summary.stored, 2);
        assert_eq!(sink.grids.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_without_source_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let registry = registry();
        let sink = RecordingSink::default();

        let err = Pipeline::new(&registry, &sink, RunOptions::default())
            .run(&tmp.path().join("events.json"), now())
            .await
            .unwrap_err();
        assert!(matches!(err, RestockError::Config(_)));
    }
}
