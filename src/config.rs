use std::env;
use std::time::Duration;

/// Runtime settings, read from the environment with sane defaults. CLI
/// flags in `main` override the environment.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Port the proxy listens on.
    pub port: u16,
    /// Comma-separated admin API keys; empty disables admin auth.
    pub api_keys: Vec<String>,
    /// Deadline for one rule-store lookup on the request path.
    pub store_timeout: Duration,
    /// Bound on the observer hand-off queue.
    pub observer_queue: usize,
    /// How many request logs the sink retains.
    pub log_capacity: usize,
    /// Bodies larger than this bypass fuzzing instead of being buffered.
    pub max_fuzz_body_bytes: usize,
    /// Redis connection URL; only used with the `redis` feature.
    pub redis_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8081,
            api_keys: Vec::new(),
            store_timeout: Duration::from_secs(2),
            observer_queue: 256,
            log_capacity: 100,
            max_fuzz_body_bytes: 4 * 1024 * 1024,
            redis_url: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(port) = env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            settings.port = port;
        }
        if let Ok(keys) = env::var("CHAOS_API_KEYS") {
            settings.api_keys = parse_api_keys(&keys);
        }
        if let Ok(url) = env::var("REDIS_URL") {
            if !url.is_empty() {
                settings.redis_url = Some(url);
            }
        }

        settings
    }
}

pub fn parse_api_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.port, 8081);
        assert!(settings.api_keys.is_empty());
        assert_eq!(settings.store_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_parse_api_keys() {
        assert_eq!(
            parse_api_keys("alpha, beta ,,gamma"),
            vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()]
        );
        assert!(parse_api_keys("").is_empty());
        assert!(parse_api_keys(" , ").is_empty());
    }
}
