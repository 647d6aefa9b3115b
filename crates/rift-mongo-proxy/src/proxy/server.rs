//! Proxy server: target resolution at startup, then the accept loop.

use super::network::create_listener;
use super::resolver::{TargetResolver, WireHelloProbe};
use super::session::{Session, SessionError};
use super::upstream::UpstreamConnector;
use crate::config::{Config, ConnectionString};
use crate::metrics;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Target descriptor plus the address picked by primary discovery.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub connection_string: ConnectionString,
    pub primary: String,
}

pub struct ProxyServer {
    config: Config,
    target: ResolvedTarget,
    connector: UpstreamConnector,
}

impl ProxyServer {
    /// Validate `config` and resolve the target's primary.
    ///
    /// Fails before anything is bound when the configuration is invalid or
    /// no primary answers within the retry policy.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        config.validate().context("Invalid configuration")?;
        let connection_string = config.target_connection_string()?;

        info!("Resolving primary for {}", connection_string);
        let resolver = TargetResolver::new(WireHelloProbe, config.resolve.clone());
        let primary = resolver
            .resolve(&connection_string)
            .await
            .context("Failed to resolve target")?;

        Self::with_target(
            config,
            ResolvedTarget {
                connection_string,
                primary,
            },
        )
    }

    /// Skip discovery and proxy to an already-known primary.
    pub fn with_target(config: Config, target: ResolvedTarget) -> Result<Self, anyhow::Error> {
        let connector = UpstreamConnector::new(&target.connection_string)
            .context("Failed to build upstream TLS configuration")?;
        Ok(Self {
            config,
            target,
            connector,
        })
    }

    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    /// Bind the listen address.
    pub fn bind(self) -> Result<ProxyListener, anyhow::Error> {
        let addr = self.config.listen_socket_addr()?;
        let listener = create_listener(addr)
            .with_context(|| format!("Failed to bind listen address {addr}"))?;
        let local_addr = listener.local_addr()?;

        info!("Listening on {}", local_addr);
        info!(
            "Proxying to {} ({})",
            self.target.primary,
            if self.connector.is_tls() { "tls" } else { "plain" }
        );

        Ok(ProxyListener {
            listener,
            local_addr,
            upstream_addr: Arc::from(self.target.primary.as_str()),
            connector: self.connector,
        })
    }

    /// Bind and serve until an accept error.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        self.bind()?.serve().await
    }
}

/// A bound listener, ready to accept clients.
pub struct ProxyListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    upstream_addr: Arc<str>,
    connector: UpstreamConnector,
}

impl ProxyListener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever. An accept error ends the loop.
    pub async fn serve(self) -> Result<(), anyhow::Error> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .context("Failed to accept client connection")?;
            metrics::record_connection();
            debug!(peer = %peer, "Accepted connection");

            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, "Failed to set TCP_NODELAY: {}", e);
            }

            let session = Session::new(peer, Arc::clone(&self.upstream_addr));
            let connector = self.connector.clone();
            tokio::spawn(async move {
                match session.run(stream, &connector).await {
                    Ok(()) => {}
                    Err(e @ SessionError::Dial { .. }) => {
                        warn!(peer = %peer, "Dropping client: {}", e);
                    }
                    Err(e @ SessionError::Dsl(_)) => {
                        warn!(peer = %peer, "Closing connection: {}", e);
                    }
                    Err(e) => {
                        debug!(peer = %peer, "Connection ended: {}", e);
                    }
                }
            });
        }
    }
}
