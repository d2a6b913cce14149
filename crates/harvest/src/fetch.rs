use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::Client;
use url::Url;

use crate::config::CrawlerConfig;
use crate::error::{CrawlError, Result};
use crate::request::{Request, Response};

/// A failed attempt, with the response when one was received.
#[derive(Debug)]
pub struct FetchFailure {
    pub error: CrawlError,
    pub response: Option<Response>,
}

impl FetchFailure {
    pub fn new(error: CrawlError) -> Self {
        Self {
            error,
            response: None,
        }
    }

    pub fn with_response(error: CrawlError, response: Response) -> Self {
        Self {
            error,
            response: Some(response),
        }
    }
}

impl From<CrawlError> for FetchFailure {
    fn from(error: CrawlError) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

/// Performs the network part of an attempt.
///
/// Implementations must send the request headers as they are and go through
/// the proxy of the request identity.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    async fn fetch(&self, request: &Request) -> std::result::Result<Response, FetchFailure>;
}

/// HTTP fetcher with one client per proxy, responses outside 2xx are failures.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    direct: Client,
    proxied: HashMap<Url, Client>,
    timeout: Duration,
    max_body_size: Option<usize>,
}

impl HttpFetcher {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let timeout = config.request_timeout();
        let builder = || {
            reqwest::ClientBuilder::new()
                .gzip(true)
                .deflate(true)
                .timeout(timeout)
        };

        let direct = builder()
            .build()
            .map_err(|e| CrawlError::Config(format!("Cannot build HTTP client: {e}")))?;

        let mut proxied = HashMap::new();
        for proxy in &config.proxies {
            let url = Url::parse(proxy)
                .map_err(|e| CrawlError::Config(format!("Invalid proxy `{proxy}`: {e}")))?;
            let client = reqwest::Proxy::all(url.clone())
                .and_then(|p| builder().proxy(p).build())
                .map_err(|e| CrawlError::Config(format!("Invalid proxy `{proxy}`: {e}")))?;
            proxied.insert(url, client);
        }

        Ok(Self {
            direct,
            proxied,
            timeout,
            max_body_size: config.max_body_size,
        })
    }

    fn client(&self, proxy: Option<&Url>) -> Result<&Client> {
        match proxy {
            None => Ok(&self.direct),
            Some(proxy) => self
                .proxied
                .get(proxy)
                .ok_or_else(|| CrawlError::Config(format!("Unknown proxy {proxy}"))),
        }
    }

    fn network_error(&self, e: reqwest::Error) -> CrawlError {
        if e.is_timeout() {
            CrawlError::Timeout(self.timeout)
        } else {
            CrawlError::Network(e)
        }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &Request) -> std::result::Result<Response, FetchFailure> {
        let proxy = request.identity().and_then(|id| id.proxy.as_ref());
        let mut resp = self
            .client(proxy)?
            .get(request.url().clone())
            .headers(request.headers().clone())
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let url = resp.url().clone();
        let partial = |body: BytesMut| {
            Response::new(status, headers.clone(), body.freeze(), url.clone(), request.clone())
        };

        if let (Some(max), Some(len)) = (self.max_body_size, resp.content_length()) {
            if len as usize > max {
                let error = CrawlError::BodyTooLarge {
                    size: len as usize,
                    max,
                };
                return Err(FetchFailure::with_response(error, partial(BytesMut::new())));
            }
        }

        let mut body = BytesMut::new();
        loop {
            match resp.chunk().await {
                Ok(Some(chunk)) => {
                    if let Some(max) = self.max_body_size {
                        if body.len() + chunk.len() > max {
                            let error = CrawlError::BodyTooLarge {
                                size: body.len() + chunk.len(),
                                max,
                            };
                            return Err(FetchFailure::with_response(error, partial(body)));
                        }
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    return Err(FetchFailure::with_response(
                        self.network_error(e),
                        partial(body),
                    ))
                }
            }
        }

        let response = partial(body);
        if status.is_success() {
            Ok(response)
        } else {
            Err(FetchFailure::with_response(
                CrawlError::Status(status),
                response,
            ))
        }
    }
}
