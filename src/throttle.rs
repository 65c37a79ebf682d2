//! Rolling-window request throttling.
//!
//! Each bucket keeps the timestamps of the requests it admitted during the
//! last window. A request is admitted only if every bucket that applies to
//! its client has room; admission is recorded in all of them under the same
//! lock.

use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::client_identity::ClientIdentity;
use crate::config::ConfigError;

static RATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*/\s*(s|sec|second|m|min|minute|h|hour|d|day)s?\s*$")
        .expect("rate pattern is valid")
});

/// A quota of `requests` per rolling `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThrottleRate {
    pub requests: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl ThrottleRate {
    pub fn new(requests: u32, window: Duration) -> Self {
        Self { requests, window }
    }

    pub fn per_hour(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(60 * 60))
    }
}

impl FromStr for ThrottleRate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = RATE_PATTERN
            .captures(s)
            .ok_or_else(|| ConfigError::InvalidRate(s.to_string()))?;

        let requests = caps[1]
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidRate(s.to_string()))?;
        let seconds = match &caps[2] {
            "s" | "sec" | "second" => 1,
            "m" | "min" | "minute" => 60,
            "h" | "hour" => 60 * 60,
            _ => 24 * 60 * 60,
        };

        Ok(Self::new(requests, Duration::from_secs(seconds)))
    }
}

impl fmt::Display for ThrottleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.requests, humantime_serde::re::humantime::format_duration(self.window))
    }
}

/// Outcome of a throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl ThrottleDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ThrottleDecision::Allowed)
    }

    /// Whole seconds until the request could succeed, at least one.
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            ThrottleDecision::Allowed => 0,
            ThrottleDecision::Denied { retry_after } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                secs.max(1)
            }
        }
    }
}

struct Window {
    length: Duration,
    hits: VecDeque<Instant>,
}

impl Window {
    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.duration_since(oldest) >= self.length {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Process-wide request throttle with an anonymous and a user bucket.
#[derive(Clone)]
pub struct Throttle {
    anon: ThrottleRate,
    user: ThrottleRate,
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

impl Throttle {
    pub fn new(anon: ThrottleRate, user: ThrottleRate) -> Self {
        Self {
            anon,
            user,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn buckets(&self, client: &ClientIdentity) -> Vec<(String, ThrottleRate)> {
        match client {
            ClientIdentity::Anonymous(addr) => vec![
                (format!("anon:{}", addr), self.anon),
                (format!("user:addr:{}", addr), self.user),
            ],
            ClientIdentity::Authenticated(credential) => {
                vec![(format!("user:key:{}", credential), self.user)]
            }
        }
    }

    /// Checks every bucket for `client` and records the request if all of
    /// them have room. Denied requests are not recorded.
    pub fn check(&self, client: &ClientIdentity) -> ThrottleDecision {
        let now = Instant::now();
        let buckets = self.buckets(client);
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        let mut longest_wait: Option<Duration> = None;
        for (key, rate) in &buckets {
            let window = windows.entry(key.clone()).or_insert_with(|| Window {
                length: rate.window,
                hits: VecDeque::new(),
            });
            window.expire(now);

            if window.hits.len() >= rate.requests as usize {
                let wait = window
                    .hits
                    .front()
                    .map(|&oldest| rate.window.saturating_sub(now.duration_since(oldest)))
                    .unwrap_or(rate.window);
                longest_wait = Some(longest_wait.map_or(wait, |w| w.max(wait)));
            }
        }

        if let Some(retry_after) = longest_wait {
            return ThrottleDecision::Denied { retry_after };
        }

        for (key, _) in &buckets {
            if let Some(window) = windows.get_mut(key) {
                window.hits.push_back(now);
            }
        }
        ThrottleDecision::Allowed
    }

    /// Drops buckets with no requests left in their window.
    pub fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, window| {
            window.expire(now);
            !window.hits.is_empty()
        });
        before - windows.len()
    }

    /// Number of buckets currently tracked.
    pub fn tracked_buckets(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn anon_rate(&self) -> ThrottleRate {
        self.anon
    }

    pub fn user_rate(&self) -> ThrottleRate {
        self.user
    }
}
