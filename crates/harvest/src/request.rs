use std::borrow::Cow;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::time::Instant;
use url::Url;

use crate::error::{CrawlError, Result};
use crate::identity::Identity;
use crate::queue::QueueEntry;

/// Lifecycle of a single URL attempt.
///
/// ```text
/// Queued -> Dispatched -> InFlight -> Completed
///                                \-> Failed -> Retried -> Dispatched
///                                           \-> Abandoned
/// ```
///
/// A request still waiting for admission when the crawl shuts down goes
/// straight to `Abandoned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Queued,
    Dispatched,
    InFlight,
    Completed,
    Failed,
    Retried,
    Abandoned,
}

impl State {
    pub fn can_transition_to(self, next: State) -> bool {
        use State::*;
        matches!(
            (self, next),
            (Queued, Dispatched)
                | (Queued, Abandoned)
                | (Dispatched, InFlight)
                | (InFlight, Completed)
                | (InFlight, Failed)
                | (Failed, Retried)
                | (Failed, Abandoned)
                | (Retried, Dispatched)
                | (Retried, Abandoned)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Abandoned)
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    url: Url,
    depth: usize,
    referer: Option<Url>,
    identity: Option<Identity>,
    headers: HeaderMap,
    attempts: u32,
    retries: u32,
    dispatched_at: Option<Instant>,
    state: State,
}

impl Request {
    pub fn new(url: Url, depth: usize) -> Self {
        Self {
            url,
            depth,
            referer: None,
            identity: None,
            headers: HeaderMap::new(),
            attempts: 0,
            retries: 0,
            dispatched_at: None,
            state: State::Queued,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Page on which this URL was discovered, `None` for seeds.
    pub fn referer(&self) -> Option<&Url> {
        self.referer.as_ref()
    }

    /// Identity of the current attempt, `None` until first dispatched.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| CrawlError::InvalidHeader(format!("name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| CrawlError::InvalidHeader(format!("value `{value}`: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Number of network attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// When the politeness limiter admitted the current attempt.
    pub fn dispatched_at(&self) -> Option<Instant> {
        self.dispatched_at
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn transition(&mut self, next: State) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(CrawlError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        log::debug!("{} {:?} -> {next:?}", self.url, self.state);
        match next {
            State::InFlight => self.attempts += 1,
            State::Retried => self.retries += 1,
            _ => (),
        }
        self.state = next;
        Ok(())
    }

    pub(crate) fn dispatch(&mut self, identity: Identity, at: Instant) -> Result<()> {
        self.transition(State::Dispatched)?;
        self.identity = Some(identity);
        self.dispatched_at = Some(at);
        self.headers.clear();
        Ok(())
    }
}

impl From<QueueEntry> for Request {
    fn from(entry: QueueEntry) -> Self {
        let mut request = Self::new(entry.url, entry.depth);
        request.referer = entry.referer;
        request
    }
}

/// Result of a fetch that got an HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Final URL after redirects
    pub url: Url,
    request: Request,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, url: Url, request: Request) -> Self {
        Self {
            status,
            headers,
            body,
            url,
            request,
        }
    }

    /// Snapshot of the request as it was sent.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// URLs to follow, collected by the success callback.
#[derive(Debug, Clone)]
pub struct Links {
    base: Url,
    urls: Vec<Url>,
}

impl Links {
    pub fn new(base: Url) -> Self {
        Self { base, urls: vec![] }
    }

    /// Schedules `href`, resolved against the response URL, for crawling at
    /// the next depth. Returns false when `href` cannot be resolved.
    pub fn follow(&mut self, href: &str) -> bool {
        match self.base.join(href) {
            Ok(url) => {
                self.urls.push(url);
                true
            }
            Err(e) => {
                log::warn!("Cannot follow `{href}` from {}: {e}", self.base);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn into_urls(self) -> Vec<Url> {
        self.urls
    }
}
