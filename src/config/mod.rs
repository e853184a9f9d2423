//! Gateway configuration.
//!
//! A `GatewayConfig` is read from TOML, checked by `validate_config`, and
//! handed to the lifecycle controller through `configure`. With `--watch`
//! the file is re-read on change and every valid new version becomes another
//! `configure` command; a listening server keeps its socket until it is
//! restarted.
//!
//! Every field has a default, so an empty file is a valid configuration.

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BridgeConfig, BridgeMode, ByteSize, CorsPolicy, GatewayConfig, LogFormat, ObservabilityConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
