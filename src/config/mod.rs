//! Worker configuration: `WorkerConfig` and its typestate builder.

pub mod builder;
pub mod types;

pub use builder::{Complete, Incomplete, WithRedisUrl, WorkerConfigBuilder};
pub use types::WorkerConfig;
