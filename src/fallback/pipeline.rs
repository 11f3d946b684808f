//! Encoder process supervision.
//!
//! Each viewer gets its own [`FallbackStream`] backed by a supervision task
//! that owns the encoder child process. The encoder caps every run with
//! `-t`, so a clean exit is routine and triggers an immediate transparent
//! restart. Abnormal exits restart with exponential backoff until the
//! budget runs out, after which the task degrades to emitting MPEG-TS null
//! packets so the viewer keeps receiving valid transport stream bytes.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::fallback::encoder::{self, still_image_command, EncoderCapabilities, EncoderCommand};
use crate::fallback::ts::{null_packet, CHUNK_SIZE};

/// Chunks buffered between the supervision task and the viewer. The
/// encoder stalls on a full pipe, so a slow viewer throttles its own
/// encoder instead of growing a queue.
const CHANNEL_DEPTH: usize = 32;

/// Largest exponent applied to the restart backoff.
const MAX_BACKOFF_SHIFT: u32 = 5;

/// Spawns and supervises encoder pipelines.
///
/// Probes the encoder once at startup; a missing executable is reported
/// here and never again, and every stream opened afterwards carries null
/// packets instead of encoded video.
pub struct PipelineSupervisor {
    config: Config,
    encoder: Option<EncoderCapabilities>,
}

impl PipelineSupervisor {
    pub async fn probe(config: Config) -> Self {
        let encoder = match encoder::probe(&config.encoder_program).await {
            Ok(caps) => {
                tracing::info!(
                    program = %config.encoder_program.display(),
                    video = caps.video_codec(),
                    audio = caps.audio_codec(),
                    "Encoder ready"
                );
                Some(caps)
            }
            Err(e) => {
                tracing::error!(
                    program = %config.encoder_program.display(),
                    error = %e,
                    "Encoder not found, fallback streams will carry null packets only"
                );
                None
            }
        };
        Self { config, encoder }
    }

    /// Whether the probe found a usable encoder.
    pub fn encoder_available(&self) -> bool {
        self.encoder.is_some()
    }

    /// Opens a stream for one viewer.
    ///
    /// With a usable encoder and an image this starts the encode loop;
    /// otherwise the stream carries timed null packets.
    pub fn open(&self, image: Option<PathBuf>) -> FallbackStream {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let config = self.config.clone();
        let grace = config.kill_grace;

        let task = match (self.encoder, image) {
            (Some(caps), Some(image)) => {
                let command = still_image_command(&config, caps, &image);
                tracing::debug!(command = %command.command_line(), "Starting fallback encoder");
                tokio::spawn(supervise(config, command, tx))
            }
            (_, missing_image) => {
                if self.encoder.is_some() && missing_image.is_none() {
                    tracing::debug!("No fallback image, serving null packets");
                }
                let interval = config.keepalive_interval;
                tokio::spawn(keepalive(interval, tx))
            }
        };

        FallbackStream { rx, task, grace }
    }
}

/// One viewer's synthetic stream.
pub struct FallbackStream {
    rx: mpsc::Receiver<Bytes>,
    task: JoinHandle<()>,
    grace: Duration,
}

impl FallbackStream {
    /// Next run of MPEG-TS bytes, or `None` once the pipeline has ended.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Tears the pipeline down and waits for the encoder to be reaped.
    pub async fn shutdown(mut self) {
        self.rx.close();
        drop(self.rx);

        // Twice the child grace covers SIGTERM wait plus the kill path.
        if tokio::time::timeout(self.grace * 2, &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
    }
}

enum RunOutcome {
    /// The `-t` cap was reached; restart without backoff.
    Completed,
    /// Spawn failure, read failure, or abnormal exit.
    Failed,
    /// The viewer is gone and the child has been stopped.
    ViewerGone,
}

async fn supervise(config: Config, command: EncoderCommand, tx: mpsc::Sender<Bytes>) {
    let mut failures: u32 = 0;

    loop {
        if tx.is_closed() {
            return;
        }

        match run_encoder_once(&config, &command, &tx).await {
            RunOutcome::ViewerGone => return,
            RunOutcome::Completed => {
                failures = 0;
                tracing::debug!("Encoder segment complete, restarting");
            }
            RunOutcome::Failed => {
                failures += 1;
                if failures > config.restart_budget {
                    tracing::error!(
                        failures,
                        "Encoder restart budget exhausted, degrading to null packets"
                    );
                    keepalive(config.keepalive_interval, tx).await;
                    return;
                }

                let backoff =
                    config.restart_backoff * (1u32 << (failures - 1).min(MAX_BACKOFF_SHIFT));
                tracing::warn!(
                    failures,
                    backoff_ms = backoff.as_millis() as u64,
                    "Encoder exited abnormally, backing off before restart"
                );
                tokio::select! {
                    _ = tx.closed() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

async fn run_encoder_once(
    config: &Config,
    command: &EncoderCommand,
    tx: &mpsc::Sender<Bytes>,
) -> RunOutcome {
    let mut child = match tokio::process::Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to spawn encoder");
            return RunOutcome::Failed;
        }
    };

    let mut stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            stop_child(child, config.kill_grace).await;
            return RunOutcome::Failed;
        }
    };

    let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
    loop {
        buf.reserve(CHUNK_SIZE);
        let read = tokio::select! {
            _ = tx.closed() => {
                stop_child(child, config.kill_grace).await;
                return RunOutcome::ViewerGone;
            }
            read = stdout.read_buf(&mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(buf.split().freeze()).await.is_err() {
                    stop_child(child, config.kill_grace).await;
                    return RunOutcome::ViewerGone;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Encoder output read failed");
                stop_child(child, config.kill_grace).await;
                return RunOutcome::Failed;
            }
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => RunOutcome::Completed,
        Ok(status) => {
            tracing::warn!(status = %status, "Encoder exited with failure");
            RunOutcome::Failed
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to reap encoder");
            RunOutcome::Failed
        }
    }
}

/// Stops the child gently, then forcefully once the grace expires.
async fn stop_child(mut child: Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => return,
            Err(_) => tracing::debug!("Encoder ignored SIGTERM, killing"),
        }
    }

    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "Failed to kill encoder");
    }
}

/// Emits one null packet per tick until the viewer goes away.
async fn keepalive(interval: Duration, tx: mpsc::Sender<Bytes>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tx.closed() => return,
            _ = ticker.tick() => {
                if tx.send(null_packet()).await.is_err() {
                    return;
                }
            }
        }
    }
}
