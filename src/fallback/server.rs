//! HTTP delivery of the synthetic fallback stream.
//!
//! A deliberately small HTTP/1.1 surface: `GET /` and `GET /stream.ts`
//! answer with an endless chunked MPEG-TS body, everything else gets a
//! 404. Response headers go out before the encoder starts so players
//! begin buffering immediately, and once they are on the wire the
//! response never turns into an error, it only ends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::error::Result;
use crate::fallback::image::ImageSource;
use crate::fallback::pipeline::{FallbackStream, PipelineSupervisor};

const MAX_HEAD_BYTES: usize = 8 * 1024;

const STREAM_RESPONSE_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
    Content-Type: video/mp2t\r\n\
    Cache-Control: no-cache, no-store, must-revalidate\r\n\
    Pragma: no-cache\r\n\
    Connection: close\r\n\
    Transfer-Encoding: chunked\r\n\
    \r\n";

const NOT_FOUND_RESPONSE: &[u8] = b"HTTP/1.1 404 Not Found\r\n\
    Content-Type: text/plain\r\n\
    Content-Length: 9\r\n\
    Connection: close\r\n\
    \r\n\
    Not found";

/// Fallback stream server
pub struct FallbackServer {
    config: Config,
    pipeline: Arc<PipelineSupervisor>,
    image: Arc<dyn ImageSource>,
    client_semaphore: Option<Arc<Semaphore>>,
}

impl FallbackServer {
    /// Create a new server around a probed pipeline supervisor
    pub fn new(config: Config, pipeline: PipelineSupervisor, image: Arc<dyn ImageSource>) -> Self {
        let client_semaphore = if config.max_clients > 0 {
            Some(Arc::new(Semaphore::new(config.max_clients)))
        } else {
            None
        };

        Self {
            config,
            pipeline: Arc::new(pipeline),
            image,
            client_semaphore,
        }
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        tracing::info!(url = %self.config.stream_url(), "Fallback stream server listening");

        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        tracing::info!(url = %self.config.stream_url(), "Fallback stream server listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check client limit
        let permit = if let Some(ref sem) = self.client_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Client rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        tracing::debug!(peer = %peer_addr, "New client");

        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let config = self.config.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let image = Arc::clone(&self.image);

        tokio::spawn(async move {
            // Held for the lifetime of the session, not just the accept.
            let _permit = permit;

            if let Err(e) = serve_client(socket, peer_addr, config, pipeline, image).await {
                tracing::debug!(peer = %peer_addr, error = %e, "Client connection error");
            }

            tracing::debug!(peer = %peer_addr, "Client closed");
        });
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr()
    }
}

async fn serve_client(
    mut socket: TcpStream,
    peer: SocketAddr,
    config: Config,
    pipeline: Arc<PipelineSupervisor>,
    image: Arc<dyn ImageSource>,
) -> std::io::Result<()> {
    let head = match read_request_head(&mut socket, config.request_timeout).await? {
        Some(head) => head,
        // Disconnected before finishing the request.
        None => return Ok(()),
    };

    let target = match parse_request_line(&head) {
        Some((method, target)) if method == "GET" => target,
        _ => {
            socket.write_all(NOT_FOUND_RESPONSE).await?;
            return Ok(());
        }
    };

    if target != "/" && target != "/stream.ts" {
        tracing::debug!(peer = %peer, target = %target, "Unknown path");
        socket.write_all(NOT_FOUND_RESPONSE).await?;
        return Ok(());
    }

    socket.write_all(STREAM_RESPONSE_HEAD).await?;
    tracing::info!(peer = %peer, target = %target, "Serving fallback stream");

    let image_path = image.fallback_image().await;
    let mut stream = pipeline.open(image_path);

    let result = pump(&mut socket, &mut stream).await;
    stream.shutdown().await;
    result
}

/// Reads until the blank line ending the request head, bounded in both
/// time and size.
async fn read_request_head(
    socket: &mut TcpStream,
    limit: Duration,
) -> std::io::Result<Option<BytesMut>> {
    let deadline = tokio::time::Instant::now() + limit;
    let mut head = BytesMut::with_capacity(1024);

    loop {
        let read = tokio::time::timeout_at(deadline, socket.read_buf(&mut head)).await;
        let n = match read {
            Ok(result) => result?,
            Err(_) => return Err(std::io::ErrorKind::TimedOut.into()),
        };
        if n == 0 {
            return Ok(None);
        }
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(Some(head));
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
    }
}

fn parse_request_line(head: &[u8]) -> Option<(String, String)> {
    let text = std::str::from_utf8(head).ok()?;
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();
    Some((method, target))
}

/// Copies pipeline chunks to the client until either side goes away.
///
/// The read half is watched so a closed player is noticed even while the
/// write side is idle between chunks.
async fn pump(socket: &mut TcpStream, stream: &mut FallbackStream) -> std::io::Result<()> {
    let (mut reader, mut writer) = socket.split();
    let mut drain = [0u8; 256];

    loop {
        tokio::select! {
            chunk = stream.next_chunk() => match chunk {
                Some(chunk) => write_body_chunk(&mut writer, &chunk).await?,
                None => {
                    writer.write_all(b"0\r\n\r\n").await?;
                    return Ok(());
                }
            },
            read = reader.read(&mut drain) => match read? {
                0 => return Ok(()),
                _ => {}
            },
        }
    }
}

async fn write_body_chunk<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    chunk: &[u8],
) -> std::io::Result<()> {
    let frame = format!("{:x}\r\n", chunk.len());
    writer.write_all(frame.as_bytes()).await?;
    writer.write_all(chunk).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}
