//! Paginated retrieval of notification messages.
//!
//! [`MessageSource`] is the seam between the pipeline and the network: the
//! production implementation is [`TimelineClient`] (v2 recent-search API),
//! tests use in-memory sources. [`TimelinePager`] walks the pages of any
//! source lazily, newest first, and stops at the lookback bound or the page
//! limit, whichever comes first.
//!
//! A walk cut short by the page limit is resumed on the next run: the store
//! keeps a [`FetchState`] and [`plan_fetch`] / [`next_fetch_state`] turn it
//! into the bounds of the next walk and back.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use restock_core::models::RawMessage;
use restock_core::time_utils::{format_api_timestamp, parse_timestamp};
use restock_core::{RestockError, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::store::{Backfill, FetchState};

/// Public endpoint of the timeline API.
pub const DEFAULT_BASE_URL: &str = "https://api.twitter.com";

/// Path of the recent-search endpoint.
const SEARCH_PATH: &str = "/2/tweets/search/recent";

/// Header carrying the epoch second at which the rate-limit window resets.
const RATE_LIMIT_RESET_HEADER: &str = "x-rate-limit-reset";

/// Safety margin kept inside the provider's recency window, so a request
/// built at the edge of the window is not rejected as too old.
const RECENCY_MARGIN_SECS: i64 = 60;

/// The provider rejects a `start_time` closer to "now" than this.
const MIN_START_AGE_SECS: i64 = 10;

const REQUEST_TIMEOUT_SECS: u64 = 30;

// ── Source abstraction ────────────────────────────────────────────────────────

/// One page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Provider search query, e.g. `from:acct (#A OR #B)`.
    pub query: String,
    /// Only messages at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only messages older than this message id.
    pub until_id: Option<String>,
    /// Messages per page.
    pub page_size: u32,
    /// Continuation token from the previous page.
    pub next_token: Option<String>,
}

/// One page of results, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub messages: Vec<RawMessage>,
    /// Token for the following page; `None` on the last page.
    pub next_token: Option<String>,
}

/// Anything that can serve pages of notification messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page>;
}

// ── Lookback bound ────────────────────────────────────────────────────────────

/// Earliest instant worth requesting on this run.
///
/// Starts one second after the newest stored event (the provider's
/// `start_time` is inclusive) but never reaches further back than the
/// provider's recency window of `lookback_days`.
pub fn lookback_bound(
    latest_stored: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    lookback_days: u32,
) -> DateTime<Utc> {
    let floor = now - chrono::Duration::days(i64::from(lookback_days))
        + chrono::Duration::seconds(RECENCY_MARGIN_SECS);
    let ceiling = now - chrono::Duration::seconds(MIN_START_AGE_SECS);

    let bound = match latest_stored {
        Some(ts) => (ts + chrono::Duration::seconds(1)).max(floor),
        None => floor,
    };
    bound.min(ceiling)
}

// ── Fetch planning ────────────────────────────────────────────────────────────

/// Bounds of one run's walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub since: DateTime<Utc>,
    /// Set when the walk resumes an interrupted one.
    pub until_id: Option<String>,
    /// Watermark in effect for this run.
    pub watermark: Option<DateTime<Utc>>,
}

/// What a finished walk saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkOutcome {
    pub newest: Option<DateTime<Utc>>,
    /// Id and timestamp of the oldest message kept.
    pub oldest: Option<(String, DateTime<Utc>)>,
    /// The walk stopped at the page limit with older pages still unread.
    pub truncated: bool,
}

/// Decide the bounds of this run's walk.
///
/// A store written before fetch progress was tracked has no watermark; its
/// newest event stands in for one. A pending backfill is resumed while its
/// oldest message is still inside the recency window, otherwise it is
/// dropped and the walk starts over from the newest message.
pub fn plan_fetch(
    state: &FetchState,
    latest_stored: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    lookback_days: u32,
) -> FetchPlan {
    let watermark = if *state == FetchState::default() {
        latest_stored
    } else {
        state.watermark
    };
    let since = lookback_bound(watermark, now, lookback_days);

    let until_id = match &state.backfill {
        Some(backfill) if backfill.oldest > since => Some(backfill.until_id.clone()),
        Some(backfill) => {
            info!(
                until_id = %backfill.until_id,
                "pending backfill fell out of the lookback window; dropping it"
            );
            None
        }
        None => None,
    };

    FetchPlan {
        since,
        until_id,
        watermark,
    }
}

/// Progress to persist after a walk planned by [`plan_fetch`].
///
/// The watermark only moves when a walk reaches its lower bound. A truncated
/// walk records where the next run picks up instead.
pub fn next_fetch_state(state: &FetchState, plan: &FetchPlan, walk: &WalkOutcome) -> FetchState {
    let resumed = plan.until_id.as_ref().and(state.backfill.as_ref());

    if walk.truncated {
        let Some((until_id, oldest)) = walk.oldest.clone() else {
            return FetchState {
                watermark: plan.watermark,
                backfill: resumed.cloned(),
            };
        };
        let newest = match resumed {
            Some(backfill) => backfill.newest,
            None => walk.newest.unwrap_or(oldest),
        };
        return FetchState {
            watermark: plan.watermark,
            backfill: Some(Backfill {
                until_id,
                oldest,
                newest,
            }),
        };
    }

    let reached = match resumed {
        Some(backfill) => Some(backfill.newest),
        None => walk.newest,
    };
    FetchState {
        watermark: plan.watermark.max(reached),
        backfill: None,
    }
}

// ── TimelinePager ─────────────────────────────────────────────────────────────

/// Lazy, finite walk over the pages of a [`MessageSource`].
///
/// Each [`TimelinePager::next_page`] call performs at most one request.
pub struct TimelinePager<'s, S: MessageSource + ?Sized> {
    source: &'s S,
    request: PageRequest,
    since: Option<DateTime<Utc>>,
    max_pages: u32,
    pages_fetched: u32,
    done: bool,
    outcome: WalkOutcome,
}

impl<'s, S: MessageSource + ?Sized> TimelinePager<'s, S> {
    pub fn new(
        source: &'s S,
        query: impl Into<String>,
        since: Option<DateTime<Utc>>,
        page_size: u32,
        max_pages: u32,
    ) -> Self {
        Self {
            source,
            request: PageRequest {
                query: query.into(),
                since,
                until_id: None,
                page_size,
                next_token: None,
            },
            since,
            max_pages,
            pages_fetched: 0,
            done: max_pages == 0,
            outcome: WalkOutcome::default(),
        }
    }

    /// Only walk messages older than `until_id`.
    pub fn until_id(mut self, until_id: Option<String>) -> Self {
        self.request.until_id = until_id;
        self
    }

    /// Fetch the next page. Returns `Ok(None)` once the sequence is exhausted.
    ///
    /// Messages older than the bound are dropped; seeing one ends the walk,
    /// since every later page is older still.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RawMessage>>> {
        if self.done {
            return Ok(None);
        }

        let page = self.source.fetch_page(&self.request).await?;
        self.pages_fetched += 1;

        let received = page.messages.len();
        let mut reached_bound = false;
        let messages: Vec<RawMessage> = page
            .messages
            .into_iter()
            .filter(|m| match (self.since, parse_timestamp(&m.created_at)) {
                (Some(since), Some(ts)) if ts < since => {
                    reached_bound = true;
                    false
                }
                _ => true,
            })
            .collect();

        for message in &messages {
            if let Some(ts) = parse_timestamp(&message.created_at) {
                self.outcome.newest = self.outcome.newest.max(Some(ts));
                if self.outcome.oldest.as_ref().map_or(true, |(_, oldest)| ts <= *oldest) {
                    self.outcome.oldest = Some((message.id.clone(), ts));
                }
            }
        }

        debug!(
            page = self.pages_fetched,
            received,
            kept = messages.len(),
            "fetched timeline page"
        );

        self.request.next_token = page.next_token;
        if self.request.next_token.is_none() || reached_bound || self.pages_fetched >= self.max_pages {
            if self.request.next_token.is_some() && !reached_bound {
                self.outcome.truncated = true;
                info!(
                    max_pages = self.max_pages,
                    "page limit reached; older messages are left for the next run"
                );
            }
            self.done = true;
        }

        Ok(Some(messages))
    }

    /// Drain every remaining page into one vector, newest first.
    pub async fn collect_all(mut self) -> Result<Vec<RawMessage>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// What the walk has seen so far.
    pub fn outcome(&self) -> &WalkOutcome {
        &self.outcome
    }
}

// ── TimelineClient ────────────────────────────────────────────────────────────

/// Bearer token for the timeline API, read from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct TimelineCredentials {
    pub bearer_token: String,
}

impl TimelineCredentials {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| RestockError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let creds: Self = serde_json::from_str(&content)?;
        if creds.bearer_token.trim().is_empty() {
            return Err(RestockError::Auth(format!(
                "bearer_token in {} is empty",
                path.display()
            )));
        }
        Ok(creds)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchTweet>,
    meta: Option<SearchMeta>,
}

#[derive(Debug, Deserialize)]
struct SearchTweet {
    id: String,
    text: String,
    #[serde(default)]
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct SearchMeta {
    #[serde(default)]
    result_count: u32,
    next_token: Option<String>,
}

/// HTTP client for the recent-search endpoint.
pub struct TimelineClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl TimelineClient {
    pub fn new(base_url: &str, credentials: TimelineCredentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(network)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: credentials.bearer_token,
        })
    }

    /// Query parameters for one page request.
    pub fn query_params(request: &PageRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("query", request.query.clone()),
            ("tweet.fields", "created_at".to_string()),
            ("max_results", request.page_size.to_string()),
        ];
        if let Some(since) = request.since {
            params.push(("start_time", format_api_timestamp(since)));
        }
        if let Some(until_id) = &request.until_id {
            params.push(("until_id", until_id.clone()));
        }
        if let Some(token) = &request.next_token {
            params.push(("next_token", token.clone()));
        }
        params
    }
}

#[async_trait]
impl MessageSource for TimelineClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
        let url = format!("{}{}", self.base_url, SEARCH_PATH);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(&Self::query_params(request))
            .send()
            .await
            .map_err(network)?;

        let status = resp.status();
        if !status.is_success() {
            let reset = resp
                .headers()
                .get(RATE_LIMIT_RESET_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_failure(status.as_u16(), reset.as_deref(), body));
        }

        let body = resp.text().await.map_err(network)?;
        parse_search_response(&body)
    }
}

/// Decode a recent-search response body into a [`Page`].
///
/// A response reporting `result_count == 0` is an empty final page even if
/// it carries a token.
pub fn parse_search_response(body: &str) -> Result<Page> {
    let resp: SearchResponse = serde_json::from_str(body)?;
    let meta = resp.meta.unwrap_or(SearchMeta {
        result_count: 0,
        next_token: None,
    });

    if meta.result_count == 0 && resp.data.is_empty() {
        return Ok(Page::default());
    }

    Ok(Page {
        messages: resp
            .data
            .into_iter()
            .map(|t| RawMessage::new(t.id, t.text, t.created_at))
            .collect(),
        next_token: meta.next_token,
    })
}

/// Map a non-success response onto the error taxonomy.
pub fn classify_failure(status: u16, rate_limit_reset: Option<&str>, body: String) -> RestockError {
    match status {
        401 | 403 => RestockError::Auth(format!("timeline API returned {}: {}", status, body)),
        429 => RestockError::RateLimited {
            reset_at: rate_limit_reset
                .and_then(|v| v.trim().parse::<i64>().ok())
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        },
        _ => RestockError::Api {
            status,
            message: body,
        },
    }
}

fn network(err: reqwest::Error) -> RestockError {
    RestockError::Network(err.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
