//! Rift MongoDB proxy: a wire-protocol relay that injects faults requested
//! in-band by the client through a `proxyTest` command field.

pub mod config;
pub mod fault;
pub mod metrics;
pub mod proxy;
pub mod wire;

pub use config::{Config, ConfigError, ConnectionString};
pub use proxy::{ProxyListener, ProxyServer, ResolvedTarget};
