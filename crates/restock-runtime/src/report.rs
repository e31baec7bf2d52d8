//! Rendering of aggregates into a sheet-shaped grid of strings.
//!
//! The grid is transport-neutral: every [`crate::publisher::ReportSink`]
//! receives the same rows. Timestamps are converted to the report timezone
//! here and nowhere else.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use restock_core::formatting::{format_duration, format_number, format_optional, WEEKDAY_NAMES};
use restock_core::models::Window;
use restock_core::registry::ProductRegistry;
use restock_core::time_utils::format_local;
use restock_data::aggregator::AggregateStats;

/// One sheet worth of cells, row-major.
pub type Grid = Vec<Vec<String>>;

/// Column headings of the statistics table.
pub const STATS_HEADER: [&str; 20] = [
    "Product",
    "Window",
    "Restocks",
    "Per week",
    "Mean gap",
    "Median gap",
    "Min gap",
    "Max gap",
    "P90 gap",
    "First seen",
    "Last seen",
    "Busiest day",
    "Busiest hour",
    "Mon",
    "Tue",
    "Wed",
    "Thu",
    "Fri",
    "Sat",
    "Sun",
];

/// Column headings of the listing breakdown.
pub const LISTING_HEADER: [&str; 4] = ["Product", "Listing", "ASIN", "Restocks"];

// ── render_report ─────────────────────────────────────────────────────────────

/// Build the full report grid.
///
/// Layout: the statistics header, one row per product and window, a blank
/// row, the all-time listing breakdown, a blank row, and an `Updated` row.
/// The breakdown lists every listing of every product, most restocks first
/// within each product.
pub fn render_report(
    stats: &[AggregateStats],
    registry: &ProductRegistry,
    tz: Tz,
    generated_at: DateTime<Utc>,
) -> Grid {
    let mut grid: Grid = Vec::with_capacity(stats.len() + 8);
    grid.push(STATS_HEADER.iter().map(|s| s.to_string()).collect());

    for row in stats {
        grid.push(stats_row(row, registry, tz));
    }

    grid.push(Vec::new());
    grid.push(LISTING_HEADER.iter().map(|s| s.to_string()).collect());
    for row in stats.iter().filter(|r| r.window == Window::AllTime) {
        let name = registry.display_name(&row.product_id);
        for listing in &row.listings {
            grid.push(vec![
                name.to_string(),
                listing.name.clone().unwrap_or_default(),
                listing.asin.clone().unwrap_or_default(),
                listing.count.to_string(),
            ]);
        }
    }

    grid.push(Vec::new());
    grid.push(vec![
        "Updated".to_string(),
        format!("{} ({})", format_local(generated_at, tz), tz.name()),
    ]);

    grid
}

fn stats_row(row: &AggregateStats, registry: &ProductRegistry, tz: Tz) -> Vec<String> {
    let gap = |f: fn(&restock_core::stats::Summary) -> f64| {
        format_optional(row.inter_arrival.as_ref(), |s| {
            format_duration(Duration::seconds(f(s).round() as i64))
        })
    };

    let mut cells = vec![
        registry.display_name(&row.product_id).to_string(),
        row.window.label().to_string(),
        row.event_count.to_string(),
        format_optional(row.rate_per_week, |r| format_number(r, 1)),
        gap(|s| s.mean),
        gap(|s| s.median),
        gap(|s| s.min),
        gap(|s| s.max),
        gap(|s| s.p90),
        format_optional(row.first_seen, |t| format_local(t, tz)),
        format_optional(row.last_seen, |t| format_local(t, tz)),
        format_optional(row.busiest_weekday(), |d| WEEKDAY_NAMES[d].to_string()),
        format_optional(row.busiest_hour(), |h| format!("{:02}:00", h)),
    ];
    cells.extend(row.day_of_week_histogram.iter().map(|n| n.to_string()));
    cells
}

// ── CSV ───────────────────────────────────────────────────────────────────────

/// Serialise a grid as CSV with `\n` line endings.
pub fn to_csv(grid: &[Vec<String>]) -> String {
    let mut out = String::new();
    for row in grid {
        let line: Vec<String> = row.iter().map(|cell| escape_csv(cell)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn escape_csv(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
