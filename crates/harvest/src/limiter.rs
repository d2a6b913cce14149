use std::collections::HashMap;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use glob::Pattern;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};

use crate::config::LimitRule;
use crate::error::{CrawlError, Result};
use crate::shutdown::Shutdown;

/// Host glob compiled once and tested against every request host.
#[derive(Debug, Clone)]
pub struct DomainMatcher {
    pattern: Pattern,
}

impl DomainMatcher {
    pub fn new(glob: &str) -> Result<Self> {
        let pattern = Pattern::new(glob)
            .map_err(|e| CrawlError::Config(format!("Invalid domain glob `{glob}`: {e}")))?;
        Ok(Self { pattern })
    }

    pub fn matches(&self, host: &str) -> bool {
        self.pattern.matches(host)
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }
}

/// Identifies the bucket a request is admitted through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Index of the first matching rule
    Rule(usize),
    Default,
}

#[derive(Debug)]
struct DomainBucket {
    permits: Arc<Semaphore>,
    parallelism: usize,
    delay: Duration,
    jitter: Duration,
    last_dispatch: AsyncMutex<Option<Instant>>,
}

impl DomainBucket {
    fn new(parallelism: usize, delay: Duration, jitter: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(parallelism)),
            parallelism,
            delay,
            jitter,
            last_dispatch: AsyncMutex::new(None),
        }
    }

    async fn acquire(&self) -> Result<Grant> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CrawlError::Cancelled)?;

        // Held while sleeping so dispatches of the group are serialized
        let mut last = self.last_dispatch.lock().await;
        if let Some(prev) = *last {
            let wait = self.delay.saturating_add(self.sample_jitter());
            match prev.checked_add(wait) {
                Some(ready_at) if ready_at > Instant::now() => sleep_until(ready_at).await,
                Some(_) => (),
                // Past the clock range, only a shutdown ends the wait
                None => future::pending::<()>().await,
            }
        }
        let dispatched_at = Instant::now();
        *last = Some(dispatched_at);

        Ok(Grant {
            dispatched_at,
            _permit: permit,
        })
    }

    fn sample_jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::random_range(0..=max))
        }
    }

    fn in_flight(&self) -> usize {
        self.parallelism - self.permits.available_permits()
    }
}

/// Permission to dispatch one request, the group slot is returned on drop.
#[derive(Debug)]
pub struct Grant {
    dispatched_at: Instant,
    _permit: OwnedSemaphorePermit,
}

impl Grant {
    pub fn dispatched_at(&self) -> Instant {
        self.dispatched_at
    }

    pub fn release(self) {}
}

/// Per domain group politeness: concurrency cap, delay floor and jitter.
#[derive(Debug)]
pub struct Limiter {
    rules: Vec<(DomainMatcher, LimitRule)>,
    default_parallelism: usize,
    buckets: Mutex<HashMap<GroupKey, Arc<DomainBucket>>>,
    shutdown: Shutdown,
}

impl Limiter {
    pub fn new(rules: &[LimitRule], default_parallelism: usize, shutdown: Shutdown) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                rule.validate()?;
                Ok((DomainMatcher::new(rule.glob())?, rule.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            default_parallelism: default_parallelism.max(1),
            buckets: Mutex::new(HashMap::new()),
            shutdown,
        })
    }

    pub fn resolve(&self, host: &str) -> GroupKey {
        self.rules
            .iter()
            .position(|(matcher, _)| matcher.matches(host))
            .map(GroupKey::Rule)
            .unwrap_or(GroupKey::Default)
    }

    /// Waits until the group has a free slot and its pacing allows a new
    /// dispatch. Fails with [`CrawlError::Cancelled`] on shutdown.
    pub async fn admit(&self, group: GroupKey) -> Result<Grant> {
        if self.shutdown.is_triggered() {
            return Err(CrawlError::Cancelled);
        }
        let bucket = self.bucket(group);
        tokio::select! {
            grant = bucket.acquire() => grant,
            _ = self.shutdown.triggered() => Err(CrawlError::Cancelled),
        }
    }

    pub fn in_flight(&self, group: GroupKey) -> usize {
        self.buckets
            .lock()
            .get(&group)
            .map(|b| b.in_flight())
            .unwrap_or(0)
    }

    fn bucket(&self, group: GroupKey) -> Arc<DomainBucket> {
        let mut buckets = self.buckets.lock();
        buckets
            .entry(group)
            .or_insert_with(|| {
                let bucket = match group {
                    GroupKey::Rule(i) => {
                        let rule = &self.rules[i].1;
                        DomainBucket::new(rule.parallelism, rule.delay(), rule.random_delay())
                    }
                    GroupKey::Default => {
                        DomainBucket::new(self.default_parallelism, Duration::ZERO, Duration::ZERO)
                    }
                };
                log::debug!("New domain bucket for {group:?}");
                Arc::new(bucket)
            })
            .clone()
    }
}
