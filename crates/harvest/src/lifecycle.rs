use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use url::Url;

use crate::config::CrawlerConfig;
use crate::error::{CrawlError, Result};
use crate::fetch::{Fetch, FetchFailure};
use crate::handler::{guard, Handler};
use crate::identity::IdentityPool;
use crate::limiter::Limiter;
use crate::queue::{Enqueued, WorkQueue};
use crate::request::{Links, Request, Response, State};
use crate::shutdown::Shutdown;

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub attempts: AtomicUsize,
    pub completed: AtomicUsize,
    pub abandoned: AtomicUsize,
}

/// Everything the workers share.
pub(crate) struct Engine {
    pub config: CrawlerConfig,
    pub queue: WorkQueue,
    pub limiter: Limiter,
    pub identities: IdentityPool,
    pub default_headers: HeaderMap,
    pub fetcher: Arc<dyn Fetch>,
    pub handler: Arc<dyn Handler>,
    pub shutdown: Shutdown,
    pub counters: Counters,
}

impl Engine {
    pub async fn worker(self: Arc<Self>, id: usize) {
        log::debug!("Worker {id} started");
        while let Some(entry) = self.queue.dequeue().await {
            let url = entry.url.clone();
            let processed = AssertUnwindSafe(self.process(Request::from(entry)))
                .catch_unwind()
                .await;
            match processed {
                Ok(Ok(())) => (),
                Ok(Err(e)) => log::error!("Worker {id} lost request {url}: {e}"),
                Err(_) => {
                    log::error!("Worker {id} panicked while processing {url}");
                    self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
                }
            }
            self.queue.done();
        }
        log::debug!("Worker {id} stopped");
    }

    /// Drives one request until it is completed or abandoned.
    async fn process(&self, mut request: Request) -> Result<()> {
        let host = request.url().host_str().unwrap_or_default().to_string();
        let group = self.limiter.resolve(&host);
        let mut failed_proxy: Option<Url> = None;
        let mut last_response: Option<Response> = None;

        loop {
            let grant = match self.limiter.admit(group).await {
                Ok(grant) => grant,
                Err(e) => {
                    log::warn!("Abandoning {}: {e}", request.url());
                    return self.abandon(&mut request, last_response.as_ref());
                }
            };

            let identity = self.identities.select_avoiding(failed_proxy.as_ref());
            let user_agent = HeaderValue::from_str(&identity.user_agent)
                .map_err(|e| CrawlError::InvalidHeader(format!("user agent: {e}")))?;
            request.dispatch(identity, grant.dispatched_at())?;
            self.prepare_headers(&mut request, user_agent);

            let url = request.url().clone();
            guard("before_request", &url, || {
                self.handler.before_request(&mut request)
            })
            .ok();

            request.transition(State::InFlight)?;
            self.counters.attempts.fetch_add(1, Ordering::SeqCst);
            let result = self.fetch(&request).await;
            grant.release();

            match result {
                Ok(response) => return self.complete(request, response),
                Err(FetchFailure { error, response }) => {
                    request.transition(State::Failed)?;
                    log::warn!(
                        "Failed {} (attempt {}): {error}",
                        request.url(),
                        request.attempts()
                    );
                    guard("on_failure", &url, || {
                        self.handler.on_failure(&request, &error, response.as_ref())
                    })
                    .ok();

                    if error.is_retryable()
                        && request.retries() < self.config.max_retries
                        && !self.shutdown.is_triggered()
                    {
                        failed_proxy = request.identity().and_then(|id| id.proxy.clone());
                        last_response = response;
                        request.transition(State::Retried)?;
                        continue;
                    }

                    return self.abandon(&mut request, response.as_ref());
                }
            }
        }
    }

    fn prepare_headers(&self, request: &mut Request, user_agent: HeaderValue) {
        let referer = match (self.config.referer, request.referer()) {
            (true, Some(r)) => HeaderValue::from_str(r.as_str()).ok(),
            _ => None,
        };
        let headers = request.headers_mut();
        headers.extend(self.default_headers.clone());
        headers.insert(USER_AGENT, user_agent);
        if let Some(referer) = referer {
            headers.insert(REFERER, referer);
        }
    }

    /// Fetches, giving in-flight requests a grace period once shutdown is
    /// triggered.
    async fn fetch(&self, request: &Request) -> std::result::Result<Response, FetchFailure> {
        let interrupt = async {
            self.shutdown.triggered().await;
            tokio::time::sleep(self.config.shutdown_timeout()).await;
        };
        tokio::select! {
            res = self.fetcher.fetch(request) => res,
            _ = interrupt => Err(CrawlError::Cancelled.into()),
        }
    }

    fn complete(&self, mut request: Request, response: Response) -> Result<()> {
        request.transition(State::Completed)?;
        self.counters.completed.fetch_add(1, Ordering::SeqCst);
        log::info!("Visited {} ({})", request.url(), response.status);

        let url = request.url().clone();
        let mut links = Links::new(response.url.clone());
        guard("on_success", &url, || {
            self.handler.on_success(&response, &mut links)
        })
        .ok();

        self.follow(&response, request.depth(), links);

        guard("on_done", &url, || {
            self.handler.on_done(&request, Some(&response))
        })
        .ok();
        Ok(())
    }

    fn abandon(&self, request: &mut Request, response: Option<&Response>) -> Result<()> {
        request.transition(State::Abandoned)?;
        self.counters.abandoned.fetch_add(1, Ordering::SeqCst);

        // Requests never sent had no callback invoked so far
        if request.attempts() > 0 {
            let url = request.url().clone();
            guard("on_done", &url, || self.handler.on_done(request, response)).ok();
        }
        Ok(())
    }

    fn follow(&self, response: &Response, depth: usize, links: Links) {
        if links.is_empty() {
            return;
        }
        let depth = depth + 1;
        for link in links.into_urls() {
            match self.queue.enqueue(link.as_str(), depth, Some(&response.url)) {
                Ok(Enqueued::Accepted) => log::debug!("Queued {link} at depth {depth}"),
                Ok(skipped) => log::debug!("Skipping {link}: {skipped:?}"),
                Err(e) => log::warn!("Dropping {link} found on {}: {e}", response.url),
            }
        }
    }
}
