use std::cmp;
use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CrawlError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerConfig {
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed user agent, a random browser one is drawn per request when unset
    #[serde(default)]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub proxies: Vec<String>,

    #[serde(default)]
    pub limits: Vec<LimitRule>,

    /// Host globs a URL must match to be queued, any host when empty
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_referer")]
    pub referer: bool,

    /// Timeout in seconds of a single fetch
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f32,

    #[serde(default)]
    pub max_body_size: Option<usize>,

    /// Grace period in seconds given to in-flight fetches on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: f32,

    #[serde(default = "default_handle_sigint")]
    pub handle_sigint: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            max_depth: default_max_depth(),
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
            user_agent: None,
            proxies: vec![],
            limits: vec![],
            allowed_domains: vec![],
            headers: BTreeMap::new(),
            referer: default_referer(),
            request_timeout: default_request_timeout(),
            max_body_size: None,
            shutdown_timeout: default_shutdown_timeout(),
            handle_sigint: default_handle_sigint(),
        }
    }
}

fn default_num_workers() -> usize {
    cmp::max(1, num_cpus::get().saturating_sub(2))
}

fn default_max_depth() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_max_retries() -> u32 {
    1
}

fn default_referer() -> bool {
    true
}

fn default_request_timeout() -> f32 {
    30.
}

fn default_shutdown_timeout() -> f32 {
    10.
}

fn default_handle_sigint() -> bool {
    true
}

impl CrawlerConfig {
    /// Checks everything that can be checked before the crawl starts.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(CrawlError::Config("numWorkers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(CrawlError::Config("queueCapacity must be at least 1".into()));
        }
        seconds("requestTimeout", self.request_timeout)?;
        seconds("shutdownTimeout", self.shutdown_timeout)?;
        for rule in &self.limits {
            rule.validate()?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.request_timeout)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.shutdown_timeout)
    }

    pub fn fixed_user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref().filter(|ua| !ua.is_empty())
    }
}

/// Politeness rule applied to every host matching `domain_glob`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitRule {
    /// Host glob, an empty glob matches every host
    #[serde(default)]
    pub domain_glob: String,

    /// The maximum number of concurrent requests
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// The minimum delay in seconds between two requests
    #[serde(default)]
    pub delay: f32,

    /// Upper bound in seconds of the random extra delay
    #[serde(default)]
    pub random_delay: f32,
}

impl Default for LimitRule {
    fn default() -> Self {
        Self {
            domain_glob: String::new(),
            parallelism: default_parallelism(),
            delay: 0.,
            random_delay: 0.,
        }
    }
}

fn default_parallelism() -> usize {
    1
}

impl LimitRule {
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(CrawlError::Config(format!(
                "parallelism of rule `{}` must be at least 1",
                self.domain_glob
            )));
        }
        seconds("delay", self.delay)?;
        seconds("randomDelay", self.random_delay)?;
        Ok(())
    }

    pub fn glob(&self) -> &str {
        if self.domain_glob.is_empty() {
            "*"
        } else {
            &self.domain_glob
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs_f32(self.delay)
    }

    pub fn random_delay(&self) -> Duration {
        Duration::from_secs_f32(self.random_delay)
    }
}

fn seconds(name: &str, value: f32) -> Result<()> {
    Duration::try_from_secs_f32(value).map(|_| ()).map_err(|e| {
        CrawlError::Config(format!(
            "{name} must be a representable number of seconds >= 0, got {value}: {e}"
        ))
    })
}
