pub mod config;
pub mod daemon;
pub mod host;

pub use config::{Config, ConfigError, ConfigSource};
pub use daemon::Agent;
pub use host::{HostAdapter, StandaloneHost};
