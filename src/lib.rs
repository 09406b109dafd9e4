pub mod admin;
pub mod api;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod fuzzing;
pub mod models;
pub mod observer;
pub mod proxy;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod shaper;
pub mod store;

pub use engine::{ChaosEngine, Decision};
pub use models::{ChaosConfig, ChaosRules, FuzzingConfig, RequestLog};
pub use store::{ConfigStore, MemoryStore, StoreError};
