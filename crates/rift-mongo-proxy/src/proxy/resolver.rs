//! Primary discovery for the configured target.
//!
//! Every candidate host in the target connection string is probed with a
//! `hello` command against `admin`. The first candidate, in input order,
//! that reports a primary identity or `isWritablePrimary: true` is chosen.
//! Full passes are retried a bounded number of times with a fixed pause.

use super::upstream::UpstreamConnector;
use crate::config::{ConnectionString, ResolveConfig};
use crate::wire::{read_message, write_message, OpMsg};
use async_trait::async_trait;
use bson::rawdoc;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on one probe (dial, TLS handshake and round trip).
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Request id used for probe commands.
const PROBE_REQUEST_ID: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("mongodb+srv targets are not supported: resolve the seed list and pass hosts explicitly")]
    SrvUnsupported,
    #[error("No primary found among {hosts:?} after {attempts} attempt(s)")]
    NoPrimary { hosts: Vec<String>, attempts: u32 },
    #[error("hello probe against {host} failed: {reason}")]
    Probe { host: String, reason: String },
}

/// Fields of the `hello` reply that identify a primary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HelloReply {
    #[serde(default)]
    pub primary: Option<String>,
    #[serde(default, rename = "isWritablePrimary")]
    pub is_writable_primary: Option<bool>,
}

impl HelloReply {
    pub fn is_primary(&self) -> bool {
        self.is_writable_primary == Some(true)
            || self.primary.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Issues the discovery handshake against one candidate.
#[async_trait]
pub trait HelloProbe: Send + Sync {
    async fn hello(&self, candidate: &ConnectionString) -> Result<HelloReply, ResolveError>;
}

/// Probe that speaks OP_MSG to the candidate over a fresh connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct WireHelloProbe;

#[async_trait]
impl HelloProbe for WireHelloProbe {
    async fn hello(&self, candidate: &ConnectionString) -> Result<HelloReply, ResolveError> {
        let host = candidate.hosts().first().cloned().unwrap_or_default();
        let probe_err = |reason: String| ResolveError::Probe {
            host: host.clone(),
            reason,
        };

        let connector = UpstreamConnector::new(candidate).map_err(|e| probe_err(e.to_string()))?;

        let exchange = async {
            let mut stream = connector
                .connect(&host)
                .await
                .map_err(|e| format!("dial failed: {e}"))?;

            let command = rawdoc! { "hello": 1, "$db": "admin" };
            let request = OpMsg::command(PROBE_REQUEST_ID, command.as_bytes());
            write_message(&mut stream, &request)
                .await
                .map_err(|e| format!("write failed: {e}"))?;

            let reply = read_message(&mut stream)
                .await
                .map_err(|e| format!("read failed: {e}"))?
                .ok_or_else(|| "connection closed before reply".to_string())?;

            let msg = OpMsg::decompose(&reply)
                .ok_or_else(|| "reply is not a single-document OP_MSG".to_string())?;
            bson::from_slice::<HelloReply>(msg.document)
                .map_err(|e| format!("undecodable hello reply: {e}"))
        };

        match tokio::time::timeout(PROBE_TIMEOUT, exchange).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(reason)) => Err(probe_err(reason)),
            Err(_) => Err(probe_err(format!("timed out after {PROBE_TIMEOUT:?}"))),
        }
    }
}

/// Bounded retry loop over the candidate list.
pub struct TargetResolver<P> {
    probe: P,
    policy: ResolveConfig,
}

impl<P: HelloProbe> TargetResolver<P> {
    pub fn new(probe: P, policy: ResolveConfig) -> Self {
        Self { probe, policy }
    }

    /// Address (`host:port`) of the first candidate that reports a primary.
    pub async fn resolve(&self, target: &ConnectionString) -> Result<String, ResolveError> {
        if target.is_srv() {
            return Err(ResolveError::SrvUnsupported);
        }

        for attempt in 1..=self.policy.attempts {
            if let Some(primary) = self.find_primary(target).await {
                info!(primary = %primary, attempt, "Resolved primary");
                return Ok(primary);
            }

            if attempt < self.policy.attempts {
                warn!(
                    attempt,
                    attempts = self.policy.attempts,
                    "No primary found, retrying in {:?}",
                    self.policy.backoff()
                );
                tokio::time::sleep(self.policy.backoff()).await;
            }
        }

        Err(ResolveError::NoPrimary {
            hosts: target.hosts().to_vec(),
            attempts: self.policy.attempts,
        })
    }

    async fn find_primary(&self, target: &ConnectionString) -> Option<String> {
        for host in target.hosts() {
            match self.probe.hello(&target.with_host(host)).await {
                Ok(reply) if reply.is_primary() => return Some(host.clone()),
                Ok(reply) => debug!(host = %host, ?reply, "Candidate is not primary"),
                Err(e) => debug!(host = %host, "Candidate skipped: {}", e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    /// Answers from a fixed table keyed by host; unknown hosts fail.
    struct TableProbe {
        replies: HashMap<String, HelloReply>,
        calls: AtomicU32,
    }

    impl TableProbe {
        fn new(replies: &[(&str, HelloReply)]) -> Self {
            Self {
                replies: replies
                    .iter()
                    .map(|(h, r)| (h.to_string(), r.clone()))
                    .collect(),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl HelloProbe for TableProbe {
        async fn hello(&self, candidate: &ConnectionString) -> Result<HelloReply, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let host = &candidate.hosts()[0];
            self.replies
                .get(host)
                .cloned()
                .ok_or_else(|| ResolveError::Probe {
                    host: host.clone(),
                    reason: "unreachable".into(),
                })
        }
    }

    fn writable() -> HelloReply {
        HelloReply {
            primary: None,
            is_writable_primary: Some(true),
        }
    }

    fn secondary() -> HelloReply {
        HelloReply {
            primary: None,
            is_writable_primary: Some(false),
        }
    }

    fn target(uri: &str) -> ConnectionString {
        ConnectionString::parse(uri).unwrap()
    }

    #[test]
    fn test_hello_reply_primary_detection() {
        assert!(writable().is_primary());
        assert!(!secondary().is_primary());
        assert!(!HelloReply::default().is_primary());
        assert!(HelloReply {
            primary: Some("a:27017".into()),
            is_writable_primary: Some(false),
        }
        .is_primary());
        assert!(!HelloReply {
            primary: Some(String::new()),
            is_writable_primary: None,
        }
        .is_primary());
    }

    #[tokio::test]
    async fn test_resolves_the_single_writable_candidate() {
        let probe = TableProbe::new(&[
            ("a:1", secondary()),
            ("b:2", writable()),
            ("c:3", secondary()),
        ]);
        let resolver = TargetResolver::new(probe, ResolveConfig::default());

        let primary = resolver.resolve(&target("mongodb://a:1,b:2,c:3")).await.unwrap();
        assert_eq!(primary, "b:2");
        assert_eq!(resolver.probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_first_match_in_input_order_wins() {
        let probe = TableProbe::new(&[("a:1", writable()), ("b:2", writable())]);
        let resolver = TargetResolver::new(probe, ResolveConfig::default());
        assert_eq!(
            resolver.resolve(&target("mongodb://b:2,a:1")).await.unwrap(),
            "b:2"
        );
    }

    #[tokio::test]
    async fn test_unreachable_candidate_is_skipped() {
        let probe = TableProbe::new(&[("b:2", writable())]);
        let resolver = TargetResolver::new(probe, ResolveConfig::default());
        assert_eq!(
            resolver.resolve(&target("mongodb://down:1,b:2")).await.unwrap(),
            "b:2"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_primary_fails_after_bounded_retries() {
        let probe = TableProbe::new(&[("a:1", secondary()), ("b:2", secondary())]);
        let resolver = TargetResolver::new(probe, ResolveConfig::default());
        let start = Instant::now();

        let err = resolver
            .resolve(&target("mongodb://a:1,b:2"))
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::NoPrimary { attempts: 5, .. }));
        assert_eq!(resolver.probe.calls.load(Ordering::SeqCst), 10);
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_srv_target_fails_without_probing() {
        let probe = TableProbe::new(&[]);
        let resolver = TargetResolver::new(probe, ResolveConfig::default());

        let err = resolver
            .resolve(&target("mongodb+srv://cluster0.example.net"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::SrvUnsupported));
        assert_eq!(resolver.probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wire_probe_reads_hello_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_message(&mut socket).await.unwrap().unwrap();
            let msg = OpMsg::decompose(&request).unwrap();
            let doc = bson::RawDocument::from_bytes(msg.document).unwrap();
            assert_eq!(doc.get_i32("hello").unwrap(), 1);
            assert_eq!(doc.get_str("$db").unwrap(), "admin");

            let reply = rawdoc! { "isWritablePrimary": true, "primary": "p:27017", "ok": 1.0 };
            write_message(&mut socket, &OpMsg::command(2, reply.as_bytes()))
                .await
                .unwrap();
        });

        let reply = WireHelloProbe
            .hello(&target(&format!("mongodb://{addr}")))
            .await
            .unwrap();
        assert!(reply.is_primary());
        assert_eq!(reply.primary.as_deref(), Some("p:27017"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_wire_probe_reports_dial_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = WireHelloProbe
            .hello(&target(&format!("mongodb://{addr}")))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Probe { .. }));
    }
}
