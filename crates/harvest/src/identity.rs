use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::error::{CrawlError, Result};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.4; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
];

/// Source of uniform random indices, shared by all workers.
pub trait Draw: Send + Sync {
    /// Returns an index in `0..n`, `n` is never 0.
    fn draw(&self, n: usize) -> usize;
}

/// Draws from the thread-local generator of the calling worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomDraw;

impl Draw for RandomDraw {
    fn draw(&self, n: usize) -> usize {
        rand::random_range(0..n)
    }
}

/// User agent and optional proxy presented for one outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    pub proxy: Option<Url>,
}

#[derive(Clone)]
pub struct IdentityPool {
    user_agent: Option<String>,
    proxies: Vec<Url>,
    rng: Arc<dyn Draw>,
}

impl fmt::Debug for IdentityPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityPool")
            .field("user_agent", &self.user_agent)
            .field("proxies", &self.proxies)
            .finish()
    }
}

impl IdentityPool {
    pub fn new<S: AsRef<str>>(user_agent: Option<&str>, proxies: &[S]) -> Result<Self> {
        Self::with_draw(user_agent, proxies, Arc::new(RandomDraw))
    }

    pub fn with_draw<S: AsRef<str>>(
        user_agent: Option<&str>,
        proxies: &[S],
        rng: Arc<dyn Draw>,
    ) -> Result<Self> {
        let proxies = proxies
            .iter()
            .map(|p| {
                Url::parse(p.as_ref()).map_err(|e| {
                    CrawlError::Config(format!("Invalid proxy `{}`: {e}", p.as_ref()))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            user_agent: user_agent.filter(|ua| !ua.is_empty()).map(String::from),
            proxies,
            rng,
        })
    }

    pub fn proxies(&self) -> &[Url] {
        &self.proxies
    }

    pub fn select(&self) -> Identity {
        self.select_avoiding(None)
    }

    /// Like [`select`](Self::select) but never returns `failed` as long as
    /// another proxy is configured.
    pub fn select_avoiding(&self, failed: Option<&Url>) -> Identity {
        let user_agent = match &self.user_agent {
            Some(ua) => ua.clone(),
            None => USER_AGENTS[self.rng.draw(USER_AGENTS.len())].to_string(),
        };

        let proxy = match self.proxies.len() {
            0 => None,
            1 => Some(self.proxies[0].clone()),
            n => {
                let skip = failed.and_then(|f| self.proxies.iter().position(|p| p == f));
                let proxy = match skip {
                    Some(skip) => {
                        let i = self.rng.draw(n - 1);
                        if i >= skip {
                            &self.proxies[i + 1]
                        } else {
                            &self.proxies[i]
                        }
                    }
                    None => &self.proxies[self.rng.draw(n)],
                };
                Some(proxy.clone())
            }
        };

        Identity { user_agent, proxy }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Always draws the last index.
    struct Last;

    impl Draw for Last {
        fn draw(&self, n: usize) -> usize {
            n - 1
        }
    }

    /// Cycles through indices.
    #[derive(Default)]
    struct Cycle(AtomicUsize);

    impl Draw for Cycle {
        fn draw(&self, n: usize) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst) % n
        }
    }

    #[test]
    fn fixed_user_agent_wins() {
        let pool = IdentityPool::new::<&str>(Some("harvest-test"), &[]).unwrap();
        for _ in 0..10 {
            let id = pool.select();
            assert_eq!(id.user_agent, "harvest-test");
            assert_eq!(id.proxy, None);
        }
    }

    #[test]
    fn random_user_agent_from_builtin_list() {
        let pool = IdentityPool::with_draw::<&str>(None, &[], Arc::new(Cycle::default())).unwrap();
        let seen = (0..USER_AGENTS.len())
            .map(|_| pool.select().user_agent)
            .collect::<HashSet<_>>();
        assert_eq!(seen.len(), USER_AGENTS.len());
    }

    #[test]
    fn invalid_proxy_is_a_config_error() {
        let res = IdentityPool::new(None, &["not a url"]);
        assert!(matches!(res, Err(CrawlError::Config(_))));
    }

    #[test]
    fn retry_avoids_failed_proxy() {
        let proxies = ["http://p0:8080", "http://p1:8080", "http://p2:8080"];
        let pool = IdentityPool::with_draw(None, &proxies, Arc::new(Last)).unwrap();

        let last = pool.select().proxy.unwrap();
        assert_eq!(last.as_str(), "http://p2:8080/");

        for _ in 0..10 {
            let retry = pool.select_avoiding(Some(&last)).proxy.unwrap();
            assert_ne!(retry, last);
        }

        let first = pool.proxies()[0].clone();
        let retry = pool.select_avoiding(Some(&first)).proxy.unwrap();
        assert_eq!(retry.as_str(), "http://p2:8080/");
    }

    #[test]
    fn single_proxy_is_reused() {
        let pool = IdentityPool::new(None, &["http://only:3128"]).unwrap();
        let proxy = pool.select().proxy.unwrap();
        assert_eq!(pool.select_avoiding(Some(&proxy)).proxy, Some(proxy));
    }
}
