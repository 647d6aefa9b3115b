//! Proxy server module.
//!
//! This module provides the MongoDB proxy with support for:
//! - Primary discovery over a `hello` handshake
//! - Plain and TLS upstream connections
//! - Per-connection relaying with in-band fault injection
//!
//! # Module Structure
//!
//! - `server` - ProxyServer struct and accept loop
//! - `session` - One client connection and its two relay directions
//! - `resolver` - Primary discovery with bounded retries
//! - `upstream` - Upstream dialing (plain or TLS)
//! - `tls` - rustls client configuration
//! - `network` - Listener socket setup

mod network;
mod resolver;
mod server;
mod session;
mod tls;
mod upstream;

pub use resolver::{HelloProbe, HelloReply, ResolveError, TargetResolver, WireHelloProbe};
pub use server::{ProxyListener, ProxyServer, ResolvedTarget};
pub use session::{rewrite_request, ReplyOutcome, Session, SessionError};
pub use upstream::{UpstreamConnector, UpstreamStream};
