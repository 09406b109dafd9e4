use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{ChaosRules, DEFAULT_ERROR_BODY};

/// Marker header stamped on everything that passed through the proxy.
pub const HEADER_CHAOS_PROXY: &str = "X-Chaos-Proxy";
/// Injected latency, rendered as e.g. "500ms".
pub const HEADER_LATENCY_MS: &str = "X-Chaos-Proxy-Latency-Ms";
/// Present on synthesized error responses.
pub const HEADER_INJECTED: &str = "X-Chaos-Proxy-Injected";
pub const HEADER_CHAOS_TYPE: &str = "X-Chaos-Proxy-Type";

/// The per-request plan derived by sampling a rule set. Decisions are
/// single-use: the pipeline consumes one per request and never shares it.
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub should_drop_connection: bool,
    pub should_inject_error: bool,
    pub error_code: u16,
    pub error_body: String,
    pub should_inject_latency: bool,
    pub latency_duration: Duration,
    pub modify_headers: HashMap<String, String>,
    pub remove_headers: Vec<String>,
}

/// Turns chaos rules into per-request decisions. The engine is pure with
/// respect to the rules; the only hidden input is its RNG, which is shared
/// across requests behind a lock that is never held across an await.
pub struct ChaosEngine {
    rng: Mutex<StdRng>,
}

impl ChaosEngine {
    /// Creates an engine seeded from the wall clock.
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::with_seed(seed)
    }

    /// Creates an engine with a fixed seed, for reproducible tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Draws a fresh uniform sample on [0, 1). Callers must gate on the rule
    /// being non-trivial first so that zero-rate paths burn no samples.
    pub(crate) fn sample(&self) -> f64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen::<f64>(),
            // A poisoned lock means a panic mid-sample; treat the request
            // as unlucky rather than propagating the panic.
            Err(poisoned) => poisoned.into_inner().gen::<f64>(),
        }
    }

    fn sample_jitter(&self, jitter: u64) -> i64 {
        let bound = jitter as i64;
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(-bound..=bound),
            Err(poisoned) => poisoned.into_inner().gen_range(-bound..=bound),
        }
    }

    pub(crate) fn sample_choice(&self, upper: u32) -> u32 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..upper),
            Err(poisoned) => poisoned.into_inner().gen_range(0..upper),
        }
    }

    /// Derives the chaos plan for one request. Ordering is fixed: drop
    /// dominates error, error dominates forwarding, and error injection
    /// short-circuits latency.
    pub fn decide(&self, rules: &ChaosRules) -> Decision {
        let mut decision = Decision::default();

        if rules.drop_connection
            || (rules.drop_connection_rate > 0.0 && self.sample() < rules.drop_connection_rate)
        {
            decision.should_drop_connection = true;
            return decision;
        }

        if rules.inject_failure_rate > 0.0 && self.sample() < rules.inject_failure_rate {
            decision.should_inject_error = true;
            decision.error_code = if rules.error_code == 0 {
                500
            } else {
                rules.error_code
            };
            decision.error_body = if rules.error_body.is_empty() {
                DEFAULT_ERROR_BODY.to_string()
            } else {
                rules.error_body.clone()
            };
            decision
                .modify_headers
                .insert(HEADER_INJECTED.to_string(), "true".to_string());
            decision
                .modify_headers
                .insert(HEADER_CHAOS_TYPE.to_string(), "error".to_string());
            return decision;
        }

        if rules.latency_ms > 0 {
            decision.should_inject_latency = true;
            let mut latency = rules.latency_ms as i64;
            if rules.jitter > 0 {
                latency += self.sample_jitter(rules.jitter);
            }
            decision.latency_duration = Duration::from_millis(latency.max(0) as u64);
        }

        for (name, value) in &rules.modify_headers {
            decision
                .modify_headers
                .insert(name.clone(), value.clone());
        }
        decision
            .modify_headers
            .insert(HEADER_CHAOS_PROXY.to_string(), "true".to_string());
        if decision.should_inject_latency {
            decision.modify_headers.insert(
                HEADER_LATENCY_MS.to_string(),
                format_latency(decision.latency_duration),
            );
        }
        decision
            .remove_headers
            .extend(rules.remove_headers.iter().cloned());

        decision
    }

    /// How long a transfer of `bytes` should take under `limit_kbps` KB/s.
    pub fn calculate_bandwidth_delay(bytes: usize, limit_kbps: u64) -> Duration {
        if limit_kbps == 0 {
            return Duration::ZERO;
        }
        let bytes_per_second = (limit_kbps * 1024) as f64;
        Duration::from_secs_f64(bytes as f64 / bytes_per_second)
    }
}

impl Default for ChaosEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders a latency duration the way it appears in headers, e.g. "500ms".
pub fn format_latency(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}
