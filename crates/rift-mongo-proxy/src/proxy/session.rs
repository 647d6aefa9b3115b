//! One proxied client connection.
//!
//! A session dials the resolved target, then runs two relay tasks that share
//! an [`InstructionSlot`]. The request path strips `proxyTest` blocks and
//! parks the decoded instruction in the slot. The reply path takes it for
//! the next server reply and replays it through the executor.

use super::upstream::{UpstreamConnector, UpstreamStream};
use crate::fault::{apply_actions, extract, Delivery, DslError, InstructionSlot};
use crate::metrics;
use crate::wire::{read_message, write_message, OpMsg, WireError};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const CLIENT_TO_SERVER: &str = "client_to_server";
const SERVER_TO_CLIENT: &str = "server_to_client";

/// Why a session ended abnormally.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to dial upstream {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Framing error: {0}")]
    Wire(#[from] WireError),
    #[error("Rejected proxyTest block: {0}")]
    Dsl(#[from] DslError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Relay task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// How the reply path finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The server closed its side.
    Closed,
    /// A reply was short-sent and the client write side shut down.
    HalfClosed,
}

/// Per-connection context shared by both relay directions.
pub struct Session {
    peer: SocketAddr,
    upstream_addr: Arc<str>,
    slot: Arc<InstructionSlot>,
}

impl Session {
    pub fn new(peer: SocketAddr, upstream_addr: Arc<str>) -> Self {
        Self {
            peer,
            upstream_addr,
            slot: Arc::new(InstructionSlot::new()),
        }
    }

    /// Dial upstream and relay until either side finishes.
    ///
    /// A failed dial drops `client` without writing anything to it.
    pub async fn run(
        self,
        client: TcpStream,
        connector: &UpstreamConnector,
    ) -> Result<(), SessionError> {
        let upstream = match connector.connect(&self.upstream_addr).await {
            Ok(stream) => stream,
            Err(source) => {
                metrics::record_dial_failure();
                return Err(SessionError::Dial {
                    addr: self.upstream_addr.to_string(),
                    source,
                });
            }
        };
        debug!(peer = %self.peer, upstream = %self.upstream_addr, "Upstream connected");

        let (client_read, client_write) = client.into_split();
        let (server_read, server_write) = tokio::io::split(upstream);

        let requests: JoinHandle<Result<(), SessionError>> = tokio::spawn(relay_requests(
            client_read,
            server_write,
            Arc::clone(&self.slot),
        ));
        let replies: JoinHandle<Result<ReplyOutcome, SessionError>> = tokio::spawn(
            relay_replies(server_read, client_write, Arc::clone(&self.slot)),
        );

        let result = self.join(requests, replies).await;
        debug!(peer = %self.peer, "Session closed");
        result
    }

    async fn join(
        &self,
        mut requests: JoinHandle<Result<(), SessionError>>,
        mut replies: JoinHandle<Result<ReplyOutcome, SessionError>>,
    ) -> Result<(), SessionError> {
        tokio::select! {
            res = &mut requests => {
                replies.abort();
                res?
            }
            res = &mut replies => match res? {
                Ok(ReplyOutcome::HalfClosed) => {
                    info!(peer = %self.peer, "Reply short-sent, waiting for client to close");
                    requests.await?
                }
                Ok(ReplyOutcome::Closed) => {
                    requests.abort();
                    Ok(())
                }
                Err(e) => {
                    requests.abort();
                    Err(e)
                }
            },
        }
    }
}

/// Strip `proxyTest` from a request and register its instruction.
///
/// Messages that are not single-document `OP_MSG`s, or that carry no
/// `proxyTest`, come back borrowed and untouched.
pub fn rewrite_request<'a>(
    raw: &'a [u8],
    slot: &InstructionSlot,
) -> Result<Cow<'a, [u8]>, DslError> {
    let Some(msg) = OpMsg::decompose(raw) else {
        return Ok(Cow::Borrowed(raw));
    };

    let extraction = extract(msg.document)?;
    let Some(instruction) = extraction.instruction else {
        return Ok(Cow::Borrowed(raw));
    };

    debug!(actions = instruction.actions.len(), "Registering proxyTest instruction");
    slot.set(instruction);

    let rewritten = msg
        .with_document(&extraction.document)
        .without_checksum()
        .to_bytes();
    Ok(Cow::Owned(rewritten))
}

async fn relay_requests(
    mut client: OwnedReadHalf,
    mut server: WriteHalf<UpstreamStream>,
    slot: Arc<InstructionSlot>,
) -> Result<(), SessionError> {
    while let Some(raw) = read_message(&mut client).await? {
        let forward = rewrite_request(&raw, &slot).inspect_err(|_| metrics::record_dsl_error())?;
        write_message(&mut server, &forward).await?;
        metrics::record_message(CLIENT_TO_SERVER);
    }
    Ok(())
}

async fn relay_replies(
    server: ReadHalf<UpstreamStream>,
    client: OwnedWriteHalf,
    slot: Arc<InstructionSlot>,
) -> Result<ReplyOutcome, SessionError> {
    forward_replies(server, client, &slot).await
}

/// Reply path over any transport pair.
async fn forward_replies<R, W>(
    mut server: R,
    mut client: W,
    slot: &InstructionSlot,
) -> Result<ReplyOutcome, SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(raw) = read_message(&mut server).await? {
        metrics::record_message(SERVER_TO_CLIENT);

        let Some(instruction) = slot.take() else {
            write_message(&mut client, &raw).await?;
            continue;
        };

        match apply_actions(&raw, &instruction.actions, &mut client).await? {
            Delivery::Complete => {
                let copied = tokio::io::copy(&mut server, &mut client).await?;
                metrics::record_passthrough_bytes(copied);
                debug!(bytes = copied, "Passthrough finished");
                return Ok(ReplyOutcome::Closed);
            }
            Delivery::Partial { sent } => {
                debug!(sent, total = raw.len(), "Reply short-sent, half-closing");
                metrics::record_partial_reply();
                client.shutdown().await?;
                return Ok(ReplyOutcome::HalfClosed);
            }
        }
    }
    Ok(ReplyOutcome::Closed)
}
