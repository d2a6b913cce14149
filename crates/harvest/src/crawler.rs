use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::task::JoinHandle;

use crate::config::CrawlerConfig;
use crate::error::{CrawlError, Result};
use crate::fetch::{Fetch, HttpFetcher};
use crate::handler::Handler;
use crate::identity::IdentityPool;
use crate::lifecycle::{Counters, Engine};
use crate::limiter::{DomainMatcher, Limiter};
use crate::queue::{Enqueued, WorkQueue};
use crate::shutdown::Shutdown;

/// Summary of a finished crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    /// Network attempts, retries included
    pub attempts: usize,
    pub completed: usize,
    pub abandoned: usize,
    /// Queued URLs dropped because of a shutdown
    pub discarded: usize,
    pub interrupted: bool,
}

impl CrawlStats {
    fn collect(counters: &Counters, discarded: usize, interrupted: bool) -> Self {
        Self {
            attempts: counters.attempts.load(Ordering::SeqCst),
            completed: counters.completed.load(Ordering::SeqCst),
            abandoned: counters.abandoned.load(Ordering::SeqCst),
            discarded,
            interrupted,
        }
    }
}

/// A configured crawl: seeds go in with [`submit_seeds`](Self::submit_seeds),
/// then [`run`](Self::run) or [`spawn`](Self::spawn) drives the workers.
pub struct Crawler {
    engine: Arc<Engine>,
}

impl Crawler {
    pub fn new<H: Handler>(config: CrawlerConfig, handler: H) -> Result<Self> {
        config.validate()?;
        let fetcher = HttpFetcher::new(&config)?;
        Self::with_fetcher(config, handler, fetcher)
    }

    pub fn with_fetcher<H, F>(config: CrawlerConfig, handler: H, fetcher: F) -> Result<Self>
    where
        H: Handler,
        F: Fetch,
    {
        config.validate()?;

        if let Some(ua) = config.fixed_user_agent() {
            HeaderValue::from_str(ua)
                .map_err(|e| CrawlError::Config(format!("Invalid user agent `{ua}`: {e}")))?;
        }
        let default_headers = config
            .headers
            .iter()
            .map(|(name, value)| {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| CrawlError::Config(format!("Invalid header `{name}`: {e}")))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| CrawlError::Config(format!("Invalid header `{name}`: {e}")))?;
                Ok((name, value))
            })
            .collect::<Result<HeaderMap>>()?;

        let scope = config
            .allowed_domains
            .iter()
            .map(|glob| DomainMatcher::new(glob).map(|m| m.pattern().clone()))
            .collect::<Result<Vec<_>>>()?;

        let shutdown = Shutdown::new();
        let engine = Engine {
            queue: WorkQueue::new(
                config.queue_capacity,
                config.max_depth,
                scope,
                shutdown.clone(),
            ),
            limiter: Limiter::new(&config.limits, config.num_workers, shutdown.clone())?,
            identities: IdentityPool::new(config.fixed_user_agent(), &config.proxies)?,
            default_headers,
            fetcher: Arc::new(fetcher),
            handler: Arc::new(handler),
            shutdown,
            counters: Counters::default(),
            config,
        };

        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.engine.config
    }

    /// Queues seed URLs at depth 0 and returns how many were accepted.
    pub fn submit_seeds<I, S>(&self, urls: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut accepted = 0;
        for url in urls {
            let url = url.as_ref();
            match self.engine.queue.enqueue(url, 0, None)? {
                Enqueued::Accepted => accepted += 1,
                skipped => log::info!("Seed {url} skipped: {skipped:?}"),
            }
        }
        Ok(accepted)
    }

    /// Triggering it stops the crawl: queued URLs are dropped, requests
    /// waiting for admission are abandoned and in-flight ones get
    /// `shutdownTimeout` to finish.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.engine.shutdown.clone()
    }

    /// Crawls until the queue is exhausted and every request is terminal.
    pub async fn run(self) -> Result<CrawlStats> {
        self.spawn().join().await
    }

    /// Starts the workers on the current tokio runtime.
    pub fn spawn(self) -> CrawlHandle {
        let engine = self.engine;
        let shutdown = engine.shutdown.clone();

        let task = tokio::spawn(async move {
            let supervisor = tokio::spawn(supervise(engine.clone()));

            let workers = (0..engine.config.num_workers)
                .map(|id| tokio::spawn(engine.clone().worker(id)))
                .collect::<Vec<_>>();
            for res in future::join_all(workers).await {
                if let Err(e) = res {
                    log::error!("Worker crashed: {e}");
                }
            }
            supervisor.abort();

            CrawlStats::collect(
                &engine.counters,
                engine.queue.discarded(),
                engine.shutdown.is_triggered(),
            )
        });

        CrawlHandle { shutdown, task }
    }
}

/// Closes the queue on shutdown, triggered by the user or by SIGINT.
async fn supervise(engine: Arc<Engine>) {
    let sigint = async {
        if engine.config.handle_sigint && tokio::signal::ctrl_c().await.is_ok() {
            return;
        }
        future::pending::<()>().await
    };

    tokio::select! {
        _ = engine.shutdown.triggered() => (),
        _ = sigint => {
            log::warn!("Interrupted, shutting down");
            engine.shutdown.trigger();
        }
    }
    engine.queue.shutdown();
}

/// A running crawl.
#[derive(Debug)]
pub struct CrawlHandle {
    shutdown: Shutdown,
    task: JoinHandle<CrawlStats>,
}

impl CrawlHandle {
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Waits until every worker stopped, same guarantee as [`Crawler::run`].
    pub async fn join(self) -> Result<CrawlStats> {
        self.task.await.map_err(|e| {
            log::error!("Crawl task failed: {e}");
            CrawlError::Cancelled
        })
    }
}
