use std::panic::{self, AssertUnwindSafe};

use crate::error::{CrawlError, Result};
use crate::request::{Links, Request, Response};

/// User callbacks invoked along each request lifecycle.
///
/// For a given request the order is always `before_request`, then
/// `on_success` or `on_failure` (once per attempt), then `on_done` once the
/// request is terminal. Callbacks run on worker tasks; errors and panics are
/// logged and never stop the crawl.
pub trait Handler: Send + Sync + 'static {
    /// Called once admitted, before any network I/O. Headers may be modified.
    fn before_request(&self, _request: &mut Request) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called with every 2xx response. URLs passed to `links` are crawled at
    /// the next depth, within the configured maximum depth.
    fn on_success(&self, _response: &Response, _links: &mut Links) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called for every failed attempt with the response received, if any.
    fn on_failure(
        &self,
        _request: &Request,
        _error: &CrawlError,
        _response: Option<&Response>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once the request is completed or abandoned.
    fn on_done(&self, _request: &Request, _response: Option<&Response>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handler with no callback at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl Handler for NoopHandler {}

/// Runs a callback, isolating the engine from its errors and panics.
pub(crate) fn guard<F>(name: &'static str, url: &url::Url, f: F) -> Result<()>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            log::error!("Callback {name} failed for {url}: {e:#}");
            Err(CrawlError::Callback(name))
        }
        Err(cause) => {
            let msg = cause
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| cause.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            log::error!("Callback {name} panicked for {url}: {msg}");
            Err(CrawlError::Callback(name))
        }
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    #[test]
    fn guard_isolates_errors_and_panics() {
        let url = Url::parse("http://example.com/").unwrap();

        assert!(guard("ok", &url, || Ok(())).is_ok());
        assert!(matches!(
            guard("err", &url, || Err(anyhow::anyhow!("boom"))),
            Err(CrawlError::Callback("err"))
        ));
        assert!(matches!(
            guard("panic", &url, || panic!("boom")),
            Err(CrawlError::Callback("panic"))
        ));
    }
}
