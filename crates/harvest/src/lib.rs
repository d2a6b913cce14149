//! Polite, depth-bounded web crawling driven by user callbacks.
//!
//! ```no_run
//! use harvest::{Crawler, CrawlerConfig, Handler, Links, Response};
//!
//! struct Printer;
//!
//! impl Handler for Printer {
//!     fn on_success(&self, response: &Response, _links: &mut Links) -> anyhow::Result<()> {
//!         println!("{} {}", response.status, response.url);
//!         Ok(())
//!     }
//! }
//!
//! # async fn crawl() -> harvest::Result<()> {
//! let crawler = Crawler::new(CrawlerConfig::default(), Printer)?;
//! crawler.submit_seeds(["https://example.com/"])?;
//! let stats = crawler.run().await?;
//! println!("{stats:?}");
//! # Ok(())
//! # }
//! ```

mod config;
mod crawler;
mod error;
mod fetch;
mod handler;
mod identity;
mod lifecycle;
mod limiter;
mod queue;
mod request;
mod shutdown;

pub use config::{CrawlerConfig, LimitRule};
pub use crawler::{CrawlHandle, CrawlStats, Crawler};
pub use error::{CrawlError, Result};
pub use fetch::{Fetch, FetchFailure, HttpFetcher};
pub use handler::{Handler, NoopHandler};
pub use identity::{Draw, Identity, IdentityPool, RandomDraw};
pub use limiter::{DomainMatcher, Grant, GroupKey, Limiter};
pub use queue::{normalize, Enqueued, QueueEntry, WorkQueue};
pub use request::{Links, Request, Response, State};
pub use shutdown::Shutdown;

pub use anyhow;
pub use async_trait::async_trait;
