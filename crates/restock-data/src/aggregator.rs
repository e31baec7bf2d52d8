//! Restock statistics over rolling windows.
//!
//! For every registered product and every [`Window`] the aggregator derives
//! counts, inter-arrival gap statistics, first/last occurrence and timing
//! histograms. Aggregates are recomputed from the full event history on every
//! run and never persisted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use restock_core::models::{RestockEvent, Window};
use restock_core::registry::ProductRegistry;
use restock_core::stats::Summary;
use restock_core::time_utils::{hour_index, weekday_index};

// ── AggregateStats ────────────────────────────────────────────────────────────

/// Statistics for one product over one window.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateStats {
    pub product_id: String,
    pub window: Window,
    pub event_count: u32,
    /// Gaps between consecutive events, in seconds. `None` with fewer than
    /// two events.
    pub inter_arrival: Option<Summary>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Events per weekday in the report timezone, Monday first.
    pub day_of_week_histogram: [u32; 7],
    /// Events per hour of day in the report timezone.
    pub hour_of_day_histogram: [u32; 24],
    /// Average events per week over the window.
    pub rate_per_week: Option<f64>,
    /// Every retailer listing seen in the window, most restocks first.
    pub listings: Vec<ListingStats>,
}

/// Restocks of one retailer listing.
///
/// Listings are keyed by ASIN when the link was resolved and by the listing
/// name otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingStats {
    pub asin: Option<String>,
    /// Most common listing name among the grouped events; ties go to the
    /// alphabetically first.
    pub name: Option<String>,
    pub count: u32,
}

impl ListingStats {
    /// Name to show, falling back to the ASIN.
    pub fn label(&self) -> &str {
        self.name.as_deref().or(self.asin.as_deref()).unwrap_or_default()
    }
}

impl AggregateStats {
    fn empty(product_id: &str, window: Window) -> Self {
        Self {
            product_id: product_id.to_string(),
            window,
            event_count: 0,
            inter_arrival: None,
            first_seen: None,
            last_seen: None,
            day_of_week_histogram: [0; 7],
            hour_of_day_histogram: [0; 24],
            rate_per_week: None,
            listings: Vec::new(),
        }
    }

    /// Weekday index (Monday = 0) with the most events, if any.
    pub fn busiest_weekday(&self) -> Option<usize> {
        busiest(&self.day_of_week_histogram)
    }

    /// Hour of day with the most events, if any.
    pub fn busiest_hour(&self) -> Option<usize> {
        busiest(&self.hour_of_day_histogram)
    }
}

/// Index of the largest non-zero bucket; the earliest wins a tie.
fn busiest(buckets: &[u32]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, &n) in buckets.iter().enumerate() {
        if n > 0 && best.map_or(true, |(_, b)| n > b) {
            best = Some((i, n));
        }
    }
    best.map(|(i, _)| i)
}

// ── Aggregator ────────────────────────────────────────────────────────────────

/// Computes [`AggregateStats`] for a registry against an event history.
pub struct Aggregator<'r> {
    registry: &'r ProductRegistry,
    tz: Tz,
}

impl<'r> Aggregator<'r> {
    /// `tz` is used only for the weekday and hour buckets.
    pub fn new(registry: &'r ProductRegistry, tz: Tz) -> Self {
        Self { registry, tz }
    }

    /// One row per product per window, in registry order then window order.
    ///
    /// `events` must be sorted by timestamp, as [`crate::store::EventStore`]
    /// keeps them. Products without events still get rows.
    pub fn compute(&self, events: &[RestockEvent], now: DateTime<Utc>) -> Vec<AggregateStats> {
        let mut by_product: HashMap<&str, Vec<&RestockEvent>> = HashMap::new();
        for event in events {
            by_product
                .entry(event.product_id.as_str())
                .or_default()
                .push(event);
        }

        let mut rows = Vec::with_capacity(self.registry.len() * Window::ALL.len());
        for entry in self.registry.iter() {
            let history = by_product
                .get(entry.product_id.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            for window in Window::ALL {
                rows.push(self.compute_window(&entry.product_id, history, window, now));
            }
        }
        rows
    }

    /// Statistics for a single product's sorted history over `window`.
    pub fn compute_window(
        &self,
        product_id: &str,
        history: &[&RestockEvent],
        window: Window,
        now: DateTime<Utc>,
    ) -> AggregateStats {
        let in_window: Vec<&RestockEvent> = history
            .iter()
            .copied()
            .filter(|e| window.contains(e.timestamp, now))
            .collect();

        let mut stats = AggregateStats::empty(product_id, window);
        if in_window.is_empty() {
            stats.rate_per_week = window.days().map(|_| 0.0);
            return stats;
        }

        stats.event_count = in_window.len() as u32;
        stats.first_seen = in_window.first().map(|e| e.timestamp);
        stats.last_seen = in_window.last().map(|e| e.timestamp);

        let gaps: Vec<f64> = in_window
            .windows(2)
            .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_seconds() as f64)
            .collect();
        stats.inter_arrival = Summary::from_samples(&gaps);

        for event in &in_window {
            stats.day_of_week_histogram[weekday_index(event.timestamp, self.tz)] += 1;
            stats.hour_of_day_histogram[hour_index(event.timestamp, self.tz)] += 1;
        }
        stats.listings = listing_breakdown(&in_window);
        stats.rate_per_week = rate_per_week(stats.event_count, window, stats.first_seen, now);

        stats
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ListingKey<'e> {
    Asin(&'e str),
    Name(&'e str),
}

/// Group events by listing; events with neither ASIN nor name are skipped.
/// Most restocks first, labels break ties alphabetically.
fn listing_breakdown(events: &[&RestockEvent]) -> Vec<ListingStats> {
    let mut groups: HashMap<ListingKey<'_>, (u32, HashMap<&str, u32>)> = HashMap::new();
    for event in events {
        let key = match (event.asin.as_deref(), event.listing.as_deref()) {
            (Some(asin), _) => ListingKey::Asin(asin),
            (None, Some(name)) => ListingKey::Name(name),
            (None, None) => continue,
        };
        let (count, names) = groups.entry(key).or_default();
        *count += 1;
        if let Some(name) = event.listing.as_deref() {
            *names.entry(name).or_default() += 1;
        }
    }

    let mut listings: Vec<ListingStats> = groups
        .into_iter()
        .map(|(key, (count, names))| ListingStats {
            asin: match key {
                ListingKey::Asin(asin) => Some(asin.to_string()),
                ListingKey::Name(_) => None,
            },
            name: majority_name(&names),
            count,
        })
        .collect();
    listings.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label().cmp(b.label())));
    listings
}

fn majority_name(votes: &HashMap<&str, u32>) -> Option<String> {
    votes
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(name, _)| name.to_string())
}

/// Rolling windows divide by their length; all-time divides by the span
/// from the first event to `now`.
fn rate_per_week(
    count: u32,
    window: Window,
    first_seen: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<f64> {
    let days = match window.days() {
        Some(d) => d as f64,
        None => {
            let span = now - first_seen?;
            span.num_seconds() as f64 / 86_400.0
        }
    };
    if days <= 0.0 {
        return None;
    }
    Some(f64::from(count) * 7.0 / days)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use restock_core::registry::ProductEntry;

    fn registry() -> ProductRegistry {
        ProductRegistry::new(vec![
            ProductEntry::new("RTX3070", "GeForce RTX 3070", "#RTX3070"),
            ProductEntry::new("RTX3080", "GeForce RTX 3080", "#RTX3080"),
        ])
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn event(product: &str, id: &str, ts: DateTime<Utc>) -> RestockEvent {
        RestockEvent::new(product, ts, id)
    }

    fn row<'a>(rows: &'a [AggregateStats], product: &str, window: Window) -> &'a AggregateStats {
        rows.iter()
            .find(|r| r.product_id == product && r.window == window)
            .unwrap()
    }

    // ── compute ───────────────────────────────────────────────────────────────

    #[test]
    fn test_rows_for_every_product_and_window() {
        let registry = registry();
        let rows = Aggregator::new(&registry, Tz::UTC).compute(&[], now());

        assert_eq!(rows.len(), 8);
        assert_eq!(rows[0].product_id, "RTX3070");
        assert_eq!(rows[0].window, Window::Last7Days);
        assert_eq!(rows[7].product_id, "RTX3080");
        assert_eq!(rows[7].window, Window::AllTime);
        for r in &rows {
            assert_eq!(r.event_count, 0);
            assert!(r.inter_arrival.is_none());
            assert!(r.first_seen.is_none());
        }
    }

    #[test]
    fn test_single_event_has_no_gap_stats() {
        let registry = registry();
        let events = vec![event("RTX3080", "1", now() - Duration::days(1))];
        let rows = Aggregator::new(&registry, Tz::UTC).compute(&events, now());

        let r = row(&rows, "RTX3080", Window::Last7Days);
        assert_eq!(r.event_count, 1);
        assert!(r.inter_arrival.is_none());
        assert_eq!(r.first_seen, r.last_seen);
    }

    #[test]
    fn test_gap_statistics() {
        let registry = registry();
        let t0 = now() - Duration::days(3);
        let events = vec![
            event("RTX3080", "1", t0),
            event("RTX3080", "2", t0 + Duration::hours(2)),
            event("RTX3080", "3", t0 + Duration::hours(8)),
        ];
        let rows = Aggregator::new(&registry, Tz::UTC).compute(&events, now());

        let gaps = row(&rows, "RTX3080", Window::Last7Days).inter_arrival.unwrap();
        assert_eq!(gaps.count, 2);
        assert_eq!(gaps.min, 7200.0);
        assert_eq!(gaps.max, 21600.0);
        assert_eq!(gaps.mean, 14400.0);
    }

    #[test]
    fn test_gap_uses_consecutive_same_product_events_only() {
        let registry = registry();
        let t1 = now() - Duration::days(2);
        let events = vec![
            event("RTX3080", "1", t1),
            event("RTX3070", "2", t1 + Duration::hours(1)),
            event("RTX3080", "3", t1 + Duration::hours(5)),
        ];
        let rows = Aggregator::new(&registry, Tz::UTC).compute(&events, now());

        let gaps = row(&rows, "RTX3080", Window::Last7Days).inter_arrival.unwrap();
        assert_eq!(gaps.count, 1);
        assert_eq!(gaps.mean, Duration::hours(5).num_seconds() as f64);
    }

    #[test]
    fn test_window_membership() {
        let registry = registry();
        let events = vec![
            event("RTX3080", "1", now() - Duration::days(100)),
            event("RTX3080", "2", now() - Duration::days(60)),
            event("RTX3080", "3", now() - Duration::days(20)),
            event("RTX3080", "4", now() - Duration::days(7)),
            event("RTX3080", "5", now() - Duration::hours(1)),
        ];
        let rows = Aggregator::new(&registry, Tz::UTC).compute(&events, now());

        assert_eq!(row(&rows, "RTX3080", Window::Last7Days).event_count, 2);
        assert_eq!(row(&rows, "RTX3080", Window::Last30Days).event_count, 3);
        assert_eq!(row(&rows, "RTX3080", Window::Last90Days).event_count, 4);
        assert_eq!(row(&rows, "RTX3080", Window::AllTime).event_count, 5);
    }

    #[test]
    fn test_counts_never_decrease_as_windows_widen() {
        let registry = registry();
        let events: Vec<RestockEvent> = (0..40)
            .map(|i| event("RTX3070", &i.to_string(), now() - Duration::days(i * 3)))
            .collect();
        let rows = Aggregator::new(&registry, Tz::UTC).compute(&events, now());

        let counts: Vec<u32> = Window::ALL
            .iter()
            .map(|w| row(&rows, "RTX3070", *w).event_count)
            .collect();
        assert!(counts.windows(2).all(|c| c[0] <= c[1]), "{counts:?}");
    }

    #[test]
    fn test_histograms_use_report_timezone() {
        let registry = registry();
        // Sunday 2024-03-10 02:00 UTC is Saturday 21:00 in New York (EST).
        let ts = Utc.with_ymd_and_hms(2024, 3, 10, 2, 0, 0).unwrap();
        let events = vec![event("RTX3080", "1", ts)];

        let utc_rows = Aggregator::new(&registry, Tz::UTC).compute(&events, now());
        let utc = row(&utc_rows, "RTX3080", Window::AllTime);
        assert_eq!(utc.busiest_weekday(), Some(6));
        assert_eq!(utc.busiest_hour(), Some(2));

        let ny_rows = Aggregator::new(&registry, chrono_tz::America::New_York).compute(&events, now());
        let ny = row(&ny_rows, "RTX3080", Window::AllTime);
        assert_eq!(ny.busiest_weekday(), Some(5));
        assert_eq!(ny.busiest_hour(), Some(21));
        assert_eq!(ny.first_seen, Some(ts));
    }

    #[test]
    fn test_histogram_totals_match_count() {
        let registry = registry();
        let events: Vec<RestockEvent> = (0..10)
            .map(|i| event("RTX3080", &i.to_string(), now() - Duration::hours(i * 13)))
            .collect();
        let rows = Aggregator::new(&registry, Tz::UTC).compute(&events, now());

        for r in rows.iter().filter(|r| r.product_id == "RTX3080") {
            assert_eq!(r.day_of_week_histogram.iter().sum::<u32>(), r.event_count);
            assert_eq!(r.hour_of_day_histogram.iter().sum::<u32>(), r.event_count);
        }
    }

    fn listed(id: usize, listing: Option<&str>, asin: Option<&str>) -> RestockEvent {
        let mut e = event("RTX3080", &id.to_string(), now() - Duration::hours(id as i64 + 1));
        e.listing = listing.map(str::to_string);
        e.asin = asin.map(str::to_string);
        e
    }

    fn listings_of(events: Vec<RestockEvent>) -> Vec<ListingStats> {
        let mut events = events;
        events.reverse();
        let registry = registry();
        let rows = Aggregator::new(&registry, Tz::UTC).compute(&events, now());
        row(&rows, "RTX3080", Window::Last7Days).listings.clone()
    }

    #[test]
    fn test_listings_ranked_by_name_without_asin() {
        let listings = listings_of(vec![
            listed(0, Some("EVGA XC3"), None),
            listed(1, Some("ASUS TUF"), None),
            listed(2, Some("EVGA XC3"), None),
            listed(3, Some("MSI Ventus"), None),
        ]);

        let labels: Vec<(&str, u32)> = listings.iter().map(|l| (l.label(), l.count)).collect();
        assert_eq!(labels, vec![("EVGA XC3", 2), ("ASUS TUF", 1), ("MSI Ventus", 1)]);
        assert!(listings.iter().all(|l| l.asin.is_none()));
    }

    #[test]
    fn test_listings_grouped_by_asin_with_majority_name() {
        let listings = listings_of(vec![
            listed(0, Some("EVGA RTX 3080 XC3 Ultra"), Some("B08HR3Y5GQ")),
            listed(1, Some("EVGA XC3"), Some("B08HR3Y5GQ")),
            listed(2, Some("EVGA RTX 3080 XC3 Ultra"), Some("B08HR3Y5GQ")),
            listed(3, None, Some("B08HR7SV3M")),
            listed(4, Some("EVGA XC3"), None),
        ]);

        assert_eq!(listings.len(), 3);
        assert_eq!(
            listings[0],
            ListingStats {
                asin: Some("B08HR3Y5GQ".to_string()),
                name: Some("EVGA RTX 3080 XC3 Ultra".to_string()),
                count: 3,
            }
        );
        // Unnamed listing shows its ASIN, which sorts before the name.
        assert_eq!(listings[1].label(), "B08HR7SV3M");
        assert_eq!(listings[1].name, None);
        assert_eq!(listings[2].label(), "EVGA XC3");
        assert_eq!(listings[2].asin, None);
    }

    #[test]
    fn test_listings_are_not_truncated() {
        let events: Vec<RestockEvent> = (0..8)
            .map(|i| listed(i, Some(&format!("Listing {i}")), None))
            .collect();
        assert_eq!(listings_of(events).len(), 8);
    }

    #[test]
    fn test_majority_name_tie_is_alphabetical() {
        let votes: HashMap<&str, u32> = [("Zotac Trinity", 2), ("ASUS TUF", 2)].into_iter().collect();
        assert_eq!(majority_name(&votes).as_deref(), Some("ASUS TUF"));
        assert_eq!(majority_name(&HashMap::new()), None);
    }

    #[test]
    fn test_rate_per_week() {
        let registry = registry();
        let events: Vec<RestockEvent> = (0..14)
            .map(|i| event("RTX3080", &i.to_string(), now() - Duration::days(i) - Duration::hours(1)))
            .rev()
            .collect();
        let rows = Aggregator::new(&registry, Tz::UTC).compute(&events, now());

        assert_eq!(row(&rows, "RTX3080", Window::Last7Days).rate_per_week, Some(7.0));
        assert_eq!(row(&rows, "RTX3070", Window::Last7Days).rate_per_week, Some(0.0));
        assert_eq!(row(&rows, "RTX3070", Window::AllTime).rate_per_week, None);
    }

    #[test]
    fn test_busiest_none_when_empty() {
        let stats = AggregateStats::empty("RTX3080", Window::AllTime);
        assert_eq!(stats.busiest_weekday(), None);
        assert_eq!(stats.busiest_hour(), None);
    }
}
