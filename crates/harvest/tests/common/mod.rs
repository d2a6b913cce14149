#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use harvest::{
    async_trait, CrawlError, CrawlerConfig, Fetch, FetchFailure, Handler, Links, Request, Response,
};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tokio::time::Instant;
use url::Url;

pub fn config() -> CrawlerConfig {
    CrawlerConfig {
        num_workers: 2,
        max_depth: 0,
        max_retries: 0,
        handle_sigint: false,
        ..Default::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Before(String),
    Fetch(String),
    Success(String),
    Failure(String),
    Done(String),
}

impl Event {
    pub fn url(&self) -> &str {
        match self {
            Self::Before(u) | Self::Fetch(u) | Self::Success(u) | Self::Failure(u) | Self::Done(u) => u,
        }
    }
}

pub type Log = Arc<Mutex<Vec<Event>>>;

/// What the mock answers for one attempt.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(&'static str),
    Status(u16),
    Timeout,
    Panic,
}

/// Scripted fetcher: replies are consumed per URL, `Ok("")` once exhausted.
#[derive(Clone, Default)]
pub struct MockFetch {
    pub log: Log,
    pub script: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
    pub requests: Arc<Mutex<Vec<Request>>>,
    pub latency: Duration,
    pub in_flight: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl MockFetch {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn script(self, url: &str, replies: Vec<Reply>) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetch for MockFetch {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchFailure> {
        let url = request.url().to_string();
        self.log.lock().unwrap().push(Event::Fetch(url.clone()));
        self.requests.lock().unwrap().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self
            .script
            .lock()
            .unwrap()
            .get_mut(&url)
            .and_then(|r| r.pop_front())
            .unwrap_or(Reply::Ok(""));

        let response = |status: u16, body: &'static str| {
            Response::new(
                StatusCode::from_u16(status).unwrap(),
                HeaderMap::new(),
                Bytes::from_static(body.as_bytes()),
                request.url().clone(),
                request.clone(),
            )
        };

        match reply {
            Reply::Ok(body) => Ok(response(200, body)),
            Reply::Status(code) => Err(FetchFailure::with_response(
                CrawlError::Status(StatusCode::from_u16(code).unwrap()),
                response(code, ""),
            )),
            Reply::Timeout => Err(FetchFailure::new(CrawlError::Timeout(Duration::from_secs(1)))),
            Reply::Panic => panic!("fetcher bug on {url}"),
        }
    }
}

/// Records every callback and follows the links configured per URL.
#[derive(Clone, Default)]
pub struct Recorder {
    pub log: Log,
    pub links: Arc<HashMap<String, Vec<String>>>,
    pub bodies: Arc<Mutex<Vec<(String, Bytes)>>>,
    pub dispatches: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl Recorder {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn link(mut self, page: &str, hrefs: &[&str]) -> Self {
        Arc::make_mut(&mut self.links).insert(
            page.to_string(),
            hrefs.iter().map(|h| h.to_string()).collect(),
        );
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }
}

impl Handler for Recorder {
    fn before_request(&self, request: &mut Request) -> anyhow::Result<()> {
        let url = request.url().to_string();
        if let Some(at) = request.dispatched_at() {
            self.dispatches.lock().unwrap().push((url.clone(), at));
        }
        self.log.lock().unwrap().push(Event::Before(url));
        Ok(())
    }

    fn on_success(&self, response: &Response, links: &mut Links) -> anyhow::Result<()> {
        let url = response.request().url().to_string();
        self.bodies
            .lock()
            .unwrap()
            .push((url.clone(), response.body.clone()));
        if let Some(hrefs) = self.links.get(&url) {
            for href in hrefs {
                links.follow(href);
            }
        }
        self.log.lock().unwrap().push(Event::Success(url));
        Ok(())
    }

    fn on_failure(
        &self,
        request: &Request,
        _error: &CrawlError,
        _response: Option<&Response>,
    ) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(Event::Failure(request.url().to_string()));
        Ok(())
    }

    fn on_done(&self, request: &Request, _response: Option<&Response>) -> anyhow::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(Event::Done(request.url().to_string()));
        Ok(())
    }
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}
