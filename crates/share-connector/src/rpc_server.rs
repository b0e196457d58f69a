//! JSON-RPC 2.0 server over TCP.
//!
//! Each line received is a JSON-RPC request. Each line sent is either a
//! response or a realtime push (`{"type": ..., "timestamp": ...}`); the two
//! are interleaved on the same socket once the session is established.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use share_hub::ConnectionHandle;

use crate::rpc::{parse_request, process_request, process_unbound, ServerContext, Session};

/// The JSON-RPC 2.0 server.
pub struct RpcServer {
    bind_addr: String,
    ctx: ServerContext,
    max_connections: usize,
}

impl RpcServer {
    pub fn new(bind_addr: String, ctx: ServerContext, max_connections: usize) -> Self {
        Self {
            bind_addr,
            ctx,
            max_connections,
        }
    }

    /// Bind and serve until the listener fails.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        tracing::info!(addr = %listener.local_addr()?, "JSON-RPC server listening");
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_connections));

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            tracing::debug!(peer = %peer_addr, "RPC client connected");

            let ctx = self.ctx.clone();
            let permit = semaphore.clone().acquire_owned().await?;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, ctx).await {
                    tracing::warn!(peer = %peer_addr, error = %e, "RPC connection error");
                }
                drop(permit);
            });
        }
    }
}

/// Serve one socket: wait for `hub.connect`, then relay requests and pushes
/// until either side goes away.
async fn handle_connection(stream: TcpStream, ctx: ServerContext) -> Result<(), anyhow::Error> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let mut handle = loop {
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        let request = match parse_request(&line) {
            Ok(r) => r,
            Err(response) => {
                write_line(&mut writer, &response).await?;
                continue;
            }
        };
        let (response, handle) = process_unbound(&ctx, request);
        write_line(&mut writer, &response).await?;
        if let Some(handle) = handle {
            break handle;
        }
    };

    let session = Session::from(&handle);
    let result = run_session(&ctx, &session, &mut handle, &mut lines, &mut writer).await;
    ctx.close_session(&session);
    result
}

async fn run_session<R, W>(
    ctx: &ServerContext,
    session: &Session,
    handle: &mut ConnectionHandle,
    lines: &mut tokio::io::Lines<R>,
    writer: &mut W,
) -> Result<(), anyhow::Error>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::debug!(agent_id = %session.agent_id, "RPC client closed connection");
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = match parse_request(&line) {
                    Ok(request) => process_request(ctx, session, request),
                    Err(response) => response.into(),
                };
                write_line(writer, &reply.response).await?;
                if reply.close {
                    return Ok(());
                }
            }
            push = handle.outbound.recv() => {
                let Some(push) = push else {
                    tracing::debug!(agent_id = %session.agent_id, "Session closed by hub");
                    return Ok(());
                };
                write_line(writer, &push).await?;
                if push.is_terminal() {
                    return Ok(());
                }
            }
        }
    }
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> Result<(), anyhow::Error>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(message)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
