use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use super::parser::SessionParser;
use crate::profiler::ProfileRegistry;
use crate::protocol::{TrafficData, TrafficDirection};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Request id under which a proxied session is profiled.
pub fn session_request_id(session_id: u64) -> String {
    format!("session-{}", session_id)
}

/// Accept clients on `downstream`, forward them to `upstream` and profile
/// every session into `registry`.
pub async fn start_proxy_server(
    downstream: SocketAddr,
    upstream: SocketAddr,
    registry: ProfileRegistry,
) -> io::Result<()> {
    let listener = TcpListener::bind(downstream).await?;
    info!(downstream = %downstream, upstream = %upstream, "Proxy listening");

    loop {
        let (client_stream, client_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                continue;
            }
        };

        let session_id = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(client = %client_addr, session_id = session_id, "New connection accepted");

        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) =
                handle_client(client_stream, upstream, client_addr, registry, session_id).await
            {
                error!(client = %client_addr, error = %e, "Error handling client");
            }
        });
    }
}

async fn handle_client(
    client: TcpStream,
    upstream_addr: SocketAddr,
    client_addr: SocketAddr,
    registry: ProfileRegistry,
    session_id: u64,
) -> io::Result<()> {
    let server = TcpStream::connect(upstream_addr).await.map_err(|e| {
        error!(
            client = %client_addr,
            upstream = %upstream_addr,
            error = %e,
            "Failed to connect to upstream"
        );
        e
    })?;

    let (mut client_read, mut client_write) = client.into_split();
    let (mut server_read, mut server_write) = server.into_split();

    let (tx, rx) = mpsc::channel::<TrafficData>(1024);
    // Set by a copy task that had to drop a captured chunk.
    let capture_gap = Arc::new(AtomicBool::new(false));

    let scope = registry.scope(session_request_id(session_id));
    let parser = SessionParser::new(client_addr, scope);
    let parser_task = tokio::spawn(traffic_parser(rx, parser, Arc::clone(&capture_gap)));

    let tx_c2s = tx.clone();
    let tx_s2c = tx;
    let gap_c2s = Arc::clone(&capture_gap);
    let gap_s2c = capture_gap;

    let mut client_to_server = tokio::spawn(async move {
        copy_with_capture(
            &mut client_read,
            &mut server_write,
            tx_c2s,
            gap_c2s,
            TrafficDirection::ClientToServer,
            client_addr,
        )
        .await
    });

    let mut server_to_client = tokio::spawn(async move {
        copy_with_capture(
            &mut server_read,
            &mut client_write,
            tx_s2c,
            gap_s2c,
            TrafficDirection::ServerToClient,
            client_addr,
        )
        .await
    });

    // Either side closing ends the session.
    tokio::select! {
        res = &mut client_to_server => {
            log_copy_result(res, client_addr, TrafficDirection::ClientToServer);
            server_to_client.abort();
        }
        res = &mut server_to_client => {
            log_copy_result(res, client_addr, TrafficDirection::ServerToClient);
            client_to_server.abort();
        }
    }

    info!(client = %client_addr, session_id = session_id, "Connection closed");

    // The parser stops once both copy tasks are gone and finishes the profile.
    if let Err(e) = parser_task.await {
        error!(client = %client_addr, error = %e, "Traffic parser task failed");
    }

    Ok(())
}

fn log_copy_result(
    res: Result<io::Result<u64>, tokio::task::JoinError>,
    client_addr: SocketAddr,
    direction: TrafficDirection,
) {
    match res {
        Ok(Ok(bytes)) => debug!(client = %client_addr, direction = ?direction, bytes = bytes, "Stream finished"),
        Ok(Err(e)) => debug!(client = %client_addr, direction = ?direction, error = %e, "Stream closed with error"),
        Err(e) => error!(client = %client_addr, direction = ?direction, error = %e, "Copy task failed"),
    }
}

async fn traffic_parser(
    mut rx: mpsc::Receiver<TrafficData>,
    mut parser: SessionParser,
    capture_gap: Arc<AtomicBool>,
) {
    while let Some(traffic) = rx.recv().await {
        // Checked before every chunk: anything queued after a drop is
        // missing its predecessor.
        if capture_gap.load(Ordering::Acquire) {
            parser.mark_desynced();
        }
        match traffic.direction {
            TrafficDirection::ClientToServer => parser.parse_client_message(&traffic.data),
            TrafficDirection::ServerToClient => parser.parse_server_message(&traffic.data),
        }
    }
    if capture_gap.load(Ordering::Acquire) {
        parser.mark_desynced();
    }

    let request_id = parser.request_id().to_string();
    let backend_pid = parser.backend_pid();
    let complete = !parser.is_desynced();
    if let Some(profile) = parser.finish() {
        debug!(
            request_id = %request_id,
            backend_pid = ?backend_pid,
            query_count = profile.query_count,
            complete,
            "Session profile finished"
        );
    }
}

async fn copy_with_capture<R, W>(
    reader: &mut R,
    writer: &mut W,
    tx: mpsc::Sender<TrafficData>,
    capture_gap: Arc<AtomicBool>,
    direction: TrafficDirection,
    client_addr: SocketAddr,
) -> io::Result<u64>
where
    R: AsyncReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    let mut buffer = vec![0u8; 8192];
    let mut total_bytes = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }

        total_bytes += n as u64;
        writer.write_all(&buffer[..n]).await?;

        let traffic = TrafficData {
            direction,
            client_addr,
            data: buffer[..n].to_vec(),
        };
        // Forwarding never waits on the parser. A dropped chunk breaks
        // message framing, so the parser is told to stop for this session.
        match tx.try_send(traffic) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if !capture_gap.swap(true, Ordering::AcqRel) {
                    warn!(
                        client = %client_addr,
                        direction = ?direction,
                        "Traffic parser lagging, chunk dropped and session profile cut short"
                    );
                }
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    writer.shutdown().await?;
    Ok(total_bytes)
}
