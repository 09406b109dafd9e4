use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default body returned when error injection fires without a custom body.
pub const DEFAULT_ERROR_BODY: &str = r#"{"error": "Chaos Engineering: Injected failure"}"#;

/// A chaos configuration binds an upstream target to a set of injection
/// rules. Configs are addressed by `id` from the proxy path or the
/// `X-Chaos-Config-ID` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Absolute upstream base URL, e.g. "https://api.stripe.com".
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub rules: ChaosRules,
}

/// The injection parameters of a config. Every field is optional on the
/// wire; zero or absent means the corresponding fault is inactive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaosRules {
    /// Fixed latency in milliseconds.
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub latency_ms: u64,
    /// Random variation applied to `latency_ms`, drawn on [-jitter, +jitter].
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub jitter: u64,

    /// Probability of synthesizing an error response, 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub inject_failure_rate: f64,
    /// HTTP status for injected errors; 0 falls back to 500.
    #[serde(default, skip_serializing_if = "is_zero_u16")]
    pub error_code: u16,
    /// Custom body for injected errors; empty falls back to the default JSON.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_body: String,

    /// Always close the connection without responding.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub drop_connection: bool,
    /// Probability of closing the connection, 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub drop_connection_rate: f64,

    /// Response bandwidth cap in KB/s; 0 means unlimited.
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub bandwidth_limit_kbps: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_fuzzing: Option<FuzzingConfig>,

    /// Headers set on the upstream request.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub modify_headers: HashMap<String, String>,
    /// Headers deleted from the upstream request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_headers: Vec<String>,
}

/// Structural mutation of JSON response bodies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FuzzingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Likelihood of fuzzing a given response, 0.0 to 1.0.
    #[serde(default)]
    pub probability: f64,
    /// Per-leaf mutation probability. Absent means 0.1; an explicit 0
    /// disables mutation outright.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_rate: Option<f64>,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("target is required")]
    MissingTarget,
    #[error("{0} must be between 0.0 and 1.0")]
    RateOutOfRange(&'static str),
}

impl ChaosConfig {
    /// Validates a rule document before it is accepted by the control plane.
    /// The proxy pipeline itself never calls this; it tolerates malformed
    /// rules as zero-defaults and only fails on an unparseable target.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.target.is_empty() {
            return Err(ValidationError::MissingTarget);
        }
        check_rate(self.rules.inject_failure_rate, "inject_failure_rate")?;
        check_rate(self.rules.drop_connection_rate, "drop_connection_rate")?;
        if let Some(fuzzing) = &self.rules.response_fuzzing {
            check_rate(fuzzing.probability, "response_fuzzing.probability")?;
            if let Some(rate) = fuzzing.mutation_rate {
                check_rate(rate, "response_fuzzing.mutation_rate")?;
            }
        }
        Ok(())
    }
}

fn check_rate(value: f64, field: &'static str) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::RateOutOfRange(field));
    }
    Ok(())
}

/// The kind of fault a request ended up experiencing. When several faults
/// apply the most impactful one wins: drop > error > fuzzing > latency >
/// bandwidth > none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChaosType {
    None,
    Latency,
    Error,
    DropConnection,
    BandwidthLimit,
    ResponseFuzzing,
}

impl ChaosType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChaosType::None => "none",
            ChaosType::Latency => "latency",
            ChaosType::Error => "error",
            ChaosType::DropConnection => "drop_connection",
            ChaosType::BandwidthLimit => "bandwidth_limit",
            ChaosType::ResponseFuzzing => "response_fuzzing",
        }
    }
}

impl fmt::Display for ChaosType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed request, recorded after the response (including any
/// streamed body) has been handed to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub config_id: String,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub duration_ms: i64,
    pub chaos_type: ChaosType,
}

fn is_zero_u64(value: &u64) -> bool {
    *value == 0
}

fn is_zero_u16(value: &u16) -> bool {
    *value == 0
}

fn is_zero_f64(value: &f64) -> bool {
    *value == 0.0
}
