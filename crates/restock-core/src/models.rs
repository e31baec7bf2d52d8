use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single message as returned by the timeline API, before parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Provider-assigned unique message id.
    pub id: String,
    /// Full message text.
    pub text: String,
    /// Creation time exactly as the provider sent it.
    pub created_at: String,
}

impl RawMessage {
    pub fn new(id: impl Into<String>, text: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            created_at: created_at.into(),
        }
    }
}

/// One detected restock of a tracked product, derived from one message.
///
/// Events are immutable once recorded. A message yields at most one event,
/// so `source_message_id` alone identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestockEvent {
    /// Registry identifier of the product, e.g. `"RTX3080"`.
    pub product_id: String,
    /// When the notification was posted (UTC).
    pub timestamp: DateTime<Utc>,
    /// Id of the message the event was derived from.
    pub source_message_id: String,
    /// Retailer listing name taken from the message text, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing: Option<String>,
    /// First URL in the message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Retailer product id (ASIN) the link resolves to, if it was resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asin: Option<String>,
}

impl RestockEvent {
    pub fn new(
        product_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        source_message_id: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            timestamp,
            source_message_id: source_message_id.into(),
            listing: None,
            link: None,
            asin: None,
        }
    }

    /// Identity key used for deduplication.
    pub fn key(&self) -> &str {
        &self.source_message_id
    }
}

/// Time range over which aggregates are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    Last7Days,
    Last30Days,
    Last90Days,
    AllTime,
}

impl Window {
    /// Every window, shortest first. This is also the report order.
    pub const ALL: [Window; 4] = [
        Window::Last7Days,
        Window::Last30Days,
        Window::Last90Days,
        Window::AllTime,
    ];

    /// Length of the rolling window in days; `None` for all-time.
    pub fn days(&self) -> Option<i64> {
        match self {
            Window::Last7Days => Some(7),
            Window::Last30Days => Some(30),
            Window::Last90Days => Some(90),
            Window::AllTime => None,
        }
    }

    /// Earliest timestamp included in the window as seen from `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.days().map(|d| now - Duration::days(d))
    }

    /// Whether `ts` falls inside the window. The lower bound is inclusive.
    pub fn contains(&self, ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.cutoff(now) {
            Some(cutoff) => ts >= cutoff,
            None => true,
        }
    }

    /// Short label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            Window::Last7Days => "7d",
            Window::Last30Days => "30d",
            Window::Last90Days => "90d",
            Window::AllTime => "all",
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
