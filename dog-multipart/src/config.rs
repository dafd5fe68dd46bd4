use std::time::Duration;

use crate::{MultipartError, MultipartResult};

/// Largest ranged read the downloader will buffer in one piece (512 MiB)
pub const MAX_DOWNLOAD_CHUNK_SIZE: u64 = 512 * 1024 * 1024;

/// Configuration for multipart coordination and chunked downloads
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Sliding TTL of a registry entry, refreshed on every registered part
    pub part_ttl: Duration,

    /// Highest part number accepted (S3 allows 10,000)
    pub max_parts: u32,

    /// TTL of the lease guarding a completion in progress
    pub completion_lease_ttl: Duration,

    /// Size of each ranged read issued by the downloader
    pub download_chunk_size: u64,

    /// Retry policy applied to each ranged read
    pub download_retry: RetryPolicy,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_ttl: Duration::from_secs(30 * 60),
            max_parts: 10_000,
            completion_lease_ttl: Duration::from_secs(60),
            download_chunk_size: 5 * 1024 * 1024, // 5MB
            download_retry: RetryPolicy::default(),
        }
    }
}

impl MultipartConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults layered with `PREFIX__KEY` environment overrides.
    ///
    /// Recognized keys: `PART_TTL_SECS`, `MAX_PARTS`, `COMPLETION_LEASE_TTL_SECS`,
    /// `DOWNLOAD_CHUNK_SIZE`, `DOWNLOAD_MAX_ATTEMPTS`, `DOWNLOAD_BASE_BACKOFF_MS`,
    /// `DOWNLOAD_MAX_BACKOFF_MS`.
    pub fn from_env(prefix: &str) -> MultipartResult<Self> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    fn from_lookup<F>(prefix: &str, lookup: F) -> MultipartResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(
            key: &str,
            raw: Option<String>,
        ) -> MultipartResult<Option<T>> {
            raw.map(|value| {
                value.trim().parse::<T>().map_err(|_| {
                    MultipartError::invalid(format!("{} has invalid value {:?}", key, value))
                })
            })
            .transpose()
        }

        let var = |name: &str| {
            let key = format!("{}__{}", prefix, name);
            let value = lookup(&key);
            (key, value)
        };

        let mut config = Self::default();

        let (key, raw) = var("PART_TTL_SECS");
        if let Some(secs) = parse::<u64>(&key, raw)? {
            config.part_ttl = Duration::from_secs(secs);
        }
        let (key, raw) = var("MAX_PARTS");
        if let Some(max) = parse::<u32>(&key, raw)? {
            config.max_parts = max;
        }
        let (key, raw) = var("COMPLETION_LEASE_TTL_SECS");
        if let Some(secs) = parse::<u64>(&key, raw)? {
            config.completion_lease_ttl = Duration::from_secs(secs);
        }
        let (key, raw) = var("DOWNLOAD_CHUNK_SIZE");
        if let Some(size) = parse::<u64>(&key, raw)? {
            config.download_chunk_size = size;
        }
        let (key, raw) = var("DOWNLOAD_MAX_ATTEMPTS");
        if let Some(attempts) = parse::<u32>(&key, raw)? {
            config.download_retry.max_attempts = attempts;
        }
        let (key, raw) = var("DOWNLOAD_BASE_BACKOFF_MS");
        if let Some(ms) = parse::<u64>(&key, raw)? {
            config.download_retry.base_backoff = Duration::from_millis(ms);
        }
        let (key, raw) = var("DOWNLOAD_MAX_BACKOFF_MS");
        if let Some(ms) = parse::<u64>(&key, raw)? {
            config.download_retry.max_backoff = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the coordinator and downloader cannot work with
    pub fn validate(&self) -> MultipartResult<()> {
        if self.download_chunk_size == 0 {
            return Err(MultipartError::invalid("download chunk size must be positive"));
        }
        if self.download_chunk_size > MAX_DOWNLOAD_CHUNK_SIZE {
            return Err(MultipartError::invalid(format!(
                "download chunk size {} exceeds the {} byte limit",
                self.download_chunk_size, MAX_DOWNLOAD_CHUNK_SIZE
            )));
        }
        if self.max_parts == 0 {
            return Err(MultipartError::invalid("max parts must be positive"));
        }
        if self.download_retry.max_attempts == 0 {
            return Err(MultipartError::invalid("download retry needs at least one attempt"));
        }
        Ok(())
    }

    /// Set the registry entry TTL
    pub fn with_part_ttl(mut self, ttl: Duration) -> Self {
        self.part_ttl = ttl;
        self
    }

    /// Set the highest accepted part number
    pub fn with_max_parts(mut self, max: u32) -> Self {
        self.max_parts = max;
        self
    }

    /// Set the completion lease TTL
    pub fn with_completion_lease_ttl(mut self, ttl: Duration) -> Self {
        self.completion_lease_ttl = ttl;
        self
    }

    /// Set the download chunk size
    pub fn with_download_chunk_size(mut self, bytes: u64) -> Self {
        self.download_chunk_size = bytes;
        self
    }

    /// Set the per-chunk retry policy
    pub fn with_download_retry(mut self, retry: RetryPolicy) -> Self {
        self.download_retry = retry;
        self
    }
}

/// Exponential backoff for retried ranged reads
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(self.base_backoff.saturating_mul(factor), self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_registry_and_download_contract() {
        let config = MultipartConfig::default();
        assert_eq!(config.part_ttl, Duration::from_secs(1800));
        assert_eq!(config.download_chunk_size, 5_242_880);
        assert_eq!(config.max_parts, 10_000);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(350));

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn env_overrides_are_applied() {
        let vars: HashMap<&str, &str> = [
            ("DOG_MULTIPART__PART_TTL_SECS", "60"),
            ("DOG_MULTIPART__DOWNLOAD_CHUNK_SIZE", "1024"),
            ("DOG_MULTIPART__DOWNLOAD_MAX_ATTEMPTS", "5"),
        ]
        .into_iter()
        .collect();

        let config = MultipartConfig::from_lookup("DOG_MULTIPART", |key| {
            vars.get(key).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.part_ttl, Duration::from_secs(60));
        assert_eq!(config.download_chunk_size, 1024);
        assert_eq!(config.download_retry.max_attempts, 5);
        assert_eq!(config.max_parts, 10_000);
    }

    #[test]
    fn malformed_env_value_is_rejected() {
        let result = MultipartConfig::from_lookup("DOG_MULTIPART", |key| {
            (key == "DOG_MULTIPART__MAX_PARTS").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(MultipartError::Validation { .. })));
    }

    #[test]
    fn zero_chunk_size_fails_validation() {
        let config = MultipartConfig::new().with_download_chunk_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_chunk_fails_validation() {
        let at_limit = MultipartConfig::new().with_download_chunk_size(MAX_DOWNLOAD_CHUNK_SIZE);
        assert!(at_limit.validate().is_ok());

        let above = MultipartConfig::new().with_download_chunk_size(MAX_DOWNLOAD_CHUNK_SIZE + 1);
        assert!(matches!(above.validate(), Err(MultipartError::Validation { .. })));
    }

    #[test]
    fn oversized_chunk_from_env_is_rejected() {
        let result = MultipartConfig::from_lookup("DOG_MULTIPART", |key| {
            (key == "DOG_MULTIPART__DOWNLOAD_CHUNK_SIZE").then(|| u64::MAX.to_string())
        });
        assert!(result.is_err());
    }
}
