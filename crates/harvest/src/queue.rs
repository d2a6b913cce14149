use std::collections::{HashSet, VecDeque};

use glob::Pattern;
use parking_lot::Mutex;
use tokio::sync::Notify;
use url::Url;

use crate::error::{CrawlError, Result};
use crate::shutdown::Shutdown;

/// A URL waiting to be crawled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub url: Url,
    pub depth: usize,
    pub referer: Option<Url>,
}

/// Outcome of a successful call to [`WorkQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    Duplicate,
    DepthExceeded,
    OutOfScope,
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<QueueEntry>,
    seen: HashSet<String>,
    /// Entries dequeued whose request has not reached a terminal state
    active: usize,
    closed: bool,
    discarded: usize,
}

/// Bounded FIFO of URLs to crawl.
///
/// Every URL ever accepted is remembered in normalized form so it is never
/// handed out twice. A full queue fails fast with [`CrawlError::QueueFull`]
/// and does not remember the refused URL.
///
/// The queue closes by itself once nothing is pending and no dequeued
/// request is still active, since only active requests can discover new URLs.
/// It also closes as soon as the shutdown signal is triggered.
#[derive(Debug)]
pub struct WorkQueue {
    capacity: usize,
    max_depth: usize,
    scope: Vec<Pattern>,
    state: Mutex<State>,
    notify: Notify,
    shutdown: Shutdown,
}

impl WorkQueue {
    pub fn new(capacity: usize, max_depth: usize, scope: Vec<Pattern>, shutdown: Shutdown) -> Self {
        Self {
            capacity,
            max_depth,
            scope,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            shutdown,
        }
    }

    pub fn enqueue(&self, url: &str, depth: usize, referer: Option<&Url>) -> Result<Enqueued> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CrawlError::InvalidUrl(format!(
                "Unsupported scheme `{}` in {url}",
                url.scheme()
            )));
        }

        if depth > self.max_depth {
            return Ok(Enqueued::DepthExceeded);
        }
        if !self.in_scope(&url) {
            return Ok(Enqueued::OutOfScope);
        }

        let key = normalize(&url);
        let mut state = self.state.lock();
        if self.shutdown.is_triggered() {
            Self::discard(&mut state);
        }
        if state.closed {
            return Err(CrawlError::QueueClosed);
        }
        if state.seen.contains(&key) {
            return Ok(Enqueued::Duplicate);
        }
        if state.pending.len() >= self.capacity {
            return Err(CrawlError::QueueFull {
                capacity: self.capacity,
            });
        }

        state.seen.insert(key);
        state.pending.push_back(QueueEntry {
            url,
            depth,
            referer: referer.cloned(),
        });
        drop(state);

        self.notify.notify_waiters();
        Ok(Enqueued::Accepted)
    }

    /// Waits for the next entry, `None` once the queue is closed.
    ///
    /// Every returned entry must be followed by a call to [`done`](Self::done).
    pub async fn dequeue(&self) -> Option<QueueEntry> {
        loop {
            // Registered before checking so a concurrent wake-up is not missed
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if self.shutdown.is_triggered() {
                    Self::discard(&mut state);
                }
                if state.closed {
                    return None;
                }
                if let Some(entry) = state.pending.pop_front() {
                    state.active += 1;
                    return Some(entry);
                }
                if state.active == 0 {
                    state.closed = true;
                    drop(state);
                    log::debug!("Work queue drained, closing");
                    self.notify.notify_waiters();
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn done(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        if state.active == 0 && state.pending.is_empty() {
            state.closed = true;
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Stops accepting and handing out entries, pending ones are discarded.
    pub fn shutdown(&self) {
        Self::discard(&mut self.state.lock());
        self.notify.notify_waiters();
    }

    fn discard(state: &mut State) {
        if state.closed {
            return;
        }
        state.closed = true;
        state.discarded += state.pending.len();
        if !state.pending.is_empty() {
            log::warn!("Discarding {} pending URLs", state.pending.len());
        }
        state.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn discarded(&self) -> usize {
        self.state.lock().discarded
    }

    fn in_scope(&self, url: &Url) -> bool {
        if self.scope.is_empty() {
            return true;
        }
        match url.host_str() {
            Some(host) => self.scope.iter().any(|p| p.matches(host)),
            None => false,
        }
    }
}

/// Canonical form used for deduplication: scheme, host, port, path and
/// sorted query, without fragment nor credentials.
pub fn normalize(url: &Url) -> String {
    let mut norm = format!("{}://", url.scheme());
    if let Some(host) = url.host_str() {
        norm.push_str(host);
    }
    if let Some(port) = url.port() {
        norm.push_str(&format!(":{port}"));
    }
    norm.push_str(url.path());

    let mut pairs = url.query_pairs().into_owned().collect::<Vec<_>>();
    if !pairs.is_empty() {
        pairs.sort();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        norm.push('?');
        norm.push_str(&query);
    }
    norm
}
