use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DispatchError, DispatchResult};

/// Think-time budgets handed to the engine, by personality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTiers {
    /// Personalities whose ponder mode is `easy`. Default: 10s.
    pub easy: Duration,
    /// Everyone else. Default: 85.5s.
    pub standard: Duration,
    /// Personalities rated 2700 and above. Default: 3m.
    pub grandmaster: Duration,
}

impl Default for ClockTiers {
    fn default() -> Self {
        Self {
            easy: Duration::from_secs(10),
            standard: Duration::from_millis(85_500),
            grandmaster: Duration::from_secs(180),
        }
    }
}

/// Configuration for the dispatch client and the worker pool.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Durable subject requests are published on. Default: `move-req`.
    pub request_subject: String,
    /// Responses go to `<response_prefix>.<gameId>`. Default: `move-res`.
    pub response_prefix: String,
    /// How long `resolve` waits for a worker. Default: 60s.
    pub resolve_timeout: Duration,
    /// How long a fetched request may stay unacknowledged before it is
    /// redelivered to another worker. Default: 30s.
    pub ack_wait: Duration,
    /// How long a worker's fetch blocks before it re-checks for shutdown.
    /// Default: 1s.
    pub fetch_wait: Duration,
    /// Directory holding the Polyglot books. Default: `books`.
    pub book_dir: PathBuf,
    /// Personality definitions file. Default: `personalities.json`.
    pub personalities_path: PathBuf,
    pub clock: ClockTiers,
    /// Number of workers in the pool. Default: 1.
    pub workers: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_subject: "move-req".to_string(),
            response_prefix: "move-res".to_string(),
            resolve_timeout: Duration::from_secs(60),
            ack_wait: Duration::from_secs(30),
            fetch_wait: Duration::from_secs(1),
            book_dir: PathBuf::from("books"),
            personalities_path: PathBuf::from("personalities.json"),
            clock: ClockTiers::default(),
            workers: 1,
        }
    }
}

impl DispatchConfig {
    /// Defaults overridden by `KINGMOVE_*` environment variables.
    pub fn from_env() -> DispatchResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `KINGMOVE_*` key.
    ///
    /// Durations use humantime syntax (`30s`, `1m 30s`, `250ms`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DispatchResult<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("KINGMOVE_REQUEST_SUBJECT") {
            config.request_subject = v;
        }
        if let Some(v) = lookup("KINGMOVE_RESPONSE_PREFIX") {
            config.response_prefix = v;
        }
        if let Some(v) = lookup("KINGMOVE_BOOK_DIR") {
            config.book_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("KINGMOVE_PERSONALITIES") {
            config.personalities_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("KINGMOVE_WORKERS") {
            config.workers = v.trim().parse().map_err(|_| DispatchError::Config {
                reason: format!("KINGMOVE_WORKERS must be a positive integer, got {v:?}"),
            })?;
        }

        let durations: [(&str, &mut Duration); 6] = [
            ("KINGMOVE_RESOLVE_TIMEOUT", &mut config.resolve_timeout),
            ("KINGMOVE_ACK_WAIT", &mut config.ack_wait),
            ("KINGMOVE_FETCH_WAIT", &mut config.fetch_wait),
            ("KINGMOVE_CLOCK_EASY", &mut config.clock.easy),
            ("KINGMOVE_CLOCK_STANDARD", &mut config.clock.standard),
            ("KINGMOVE_CLOCK_GRANDMASTER", &mut config.clock.grandmaster),
        ];
        for (key, slot) in durations {
            if let Some(v) = lookup(key) {
                *slot = parse_duration(key, &v)?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Checks:
    /// - subjects are non-empty and contain no wildcard or whitespace
    /// - timeouts and the ack wait are non-zero
    /// - at least one worker
    pub fn validate(&self) -> DispatchResult<()> {
        for (name, subject) in [
            ("request_subject", &self.request_subject),
            ("response_prefix", &self.response_prefix),
        ] {
            let bad = subject.is_empty()
                || subject.starts_with('.')
                || subject.ends_with('.')
                || subject
                    .chars()
                    .any(|c| c == '*' || c == '>' || c.is_whitespace());
            if bad {
                return Err(DispatchError::Config {
                    reason: format!("{name} is not a valid subject: {subject:?}"),
                });
            }
        }

        for (name, value) in [
            ("resolve_timeout", self.resolve_timeout),
            ("ack_wait", self.ack_wait),
            ("fetch_wait", self.fetch_wait),
        ] {
            if value.is_zero() {
                return Err(DispatchError::Config {
                    reason: format!("{name} must be non-zero"),
                });
            }
        }

        if self.workers == 0 {
            return Err(DispatchError::Config {
                reason: "workers must be >= 1".to_string(),
            });
        }

        Ok(())
    }

    /// Subject a worker answers `game_id` on.
    pub fn response_subject(&self, game_id: &str) -> String {
        format!("{}.{}", self.response_prefix, game_id)
    }

    /// Pattern matching the responses of every game.
    pub fn response_wildcard(&self) -> String {
        format!("{}.*", self.response_prefix)
    }
}

fn parse_duration(key: &str, value: &str) -> DispatchResult<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| DispatchError::Config {
        reason: format!("{key}: {e}"),
    })
}
