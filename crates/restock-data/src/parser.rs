//! Turns raw notification messages into [`RestockEvent`]s.
//!
//! Matching is driven entirely by the [`ProductRegistry`] handed to
//! [`EventParser::new`]; the parser keeps no other configuration.

use regex::{Regex, RegexBuilder};
use restock_core::models::{RawMessage, RestockEvent};
use restock_core::registry::ProductRegistry;
use restock_core::time_utils::parse_timestamp_strict;
use restock_core::{RestockError, Result};
use tracing::{debug, warn};

/// Text that separates the listing name from the retailer in a notification,
/// e.g. `"ASUS TUF RTX 3080 in stock at Amazon ..."`.
pub const LISTING_MARKER: &str = " in stock at";

// ── EventParser ───────────────────────────────────────────────────────────────

/// Compiled tag matchers for one registry.
pub struct EventParser<'r> {
    registry: &'r ProductRegistry,
    matchers: Vec<Regex>,
    link: Regex,
}

/// Outcome of parsing a batch of messages.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Events extracted, in input order.
    pub events: Vec<RestockEvent>,
    /// Messages that matched no registered tag.
    pub unmatched: usize,
    /// Messages that matched but could not be turned into an event.
    pub mismatches: Vec<RestockError>,
}

impl<'r> EventParser<'r> {
    /// Compile one case-insensitive matcher per registry entry.
    ///
    /// A tag matches only as a whole token: `#RTX3080` matches `"#rtx3080!"`
    /// but not `"#RTX3080Ti"`.
    pub fn new(registry: &'r ProductRegistry) -> Result<Self> {
        let matchers = registry
            .iter()
            .map(|entry| {
                let pattern = format!(r"(?:^|[^\w#]){}(?:$|[^\w])", regex::escape(&entry.match_tag));
                RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        RestockError::InvalidRegistry(format!(
                            "tag {} does not compile: {}",
                            entry.match_tag, e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let link = Regex::new(r"https?://\S+").map_err(|e| RestockError::Other(e.into()))?;

        Ok(Self {
            registry,
            matchers,
            link,
        })
    }

    /// Product id of the first registry entry whose tag appears in `text`.
    pub fn match_product(&self, text: &str) -> Option<&'r str> {
        let registry: &'r ProductRegistry = self.registry;
        let mut hits = registry
            .iter()
            .zip(&self.matchers)
            .filter(|(_, re)| re.is_match(text))
            .map(|(entry, _)| entry.product_id.as_str());

        let first = hits.next()?;
        if let Some(other) = hits.next() {
            debug!(
                "message carries tags for both {} and {}; keeping {}",
                first, other, first
            );
        }
        Some(first)
    }

    /// Parse one message.
    ///
    /// Returns `Ok(None)` when no registered tag appears in the text, and
    /// [`RestockError::ParseMismatch`] when a tag matched but the message
    /// lacks a usable id or timestamp.
    pub fn parse(&self, message: &RawMessage) -> Result<Option<RestockEvent>> {
        let Some(product_id) = self.match_product(&message.text) else {
            return Ok(None);
        };

        if message.id.trim().is_empty() {
            return Err(RestockError::ParseMismatch {
                message_id: String::new(),
                reason: "message has no id".to_string(),
            });
        }

        let timestamp =
            parse_timestamp_strict(&message.created_at).map_err(|e| RestockError::ParseMismatch {
                message_id: message.id.clone(),
                reason: e.to_string(),
            })?;

        Ok(Some(RestockEvent {
            product_id: product_id.to_string(),
            timestamp,
            source_message_id: message.id.clone(),
            listing: extract_listing(&message.text),
            link: self.extract_link(&message.text),
            asin: None,
        }))
    }

    /// Parse a batch. A failing message is recorded and skipped; it never
    /// stops the rest of the batch.
    pub fn parse_all<'m>(&self, messages: impl IntoIterator<Item = &'m RawMessage>) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();
        for message in messages {
            match self.parse(message) {
                Ok(Some(event)) => outcome.events.push(event),
                Ok(None) => outcome.unmatched += 1,
                Err(e) => {
                    warn!("skipping message: {}", e);
                    outcome.mismatches.push(e);
                }
            }
        }
        outcome
    }

    fn extract_link(&self, text: &str) -> Option<String> {
        self.link.find(text).map(|m| m.as_str().to_string())
    }
}

/// Listing name preceding [`LISTING_MARKER`], when the message has one.
pub fn extract_listing(text: &str) -> Option<String> {
    let end = text.find(LISTING_MARKER)?;
    let name = text[..end].trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
