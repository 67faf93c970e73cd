//! External fetch/decode stream pipeline
//!
//! Drives a two-stage byte pipeline — a fetch process producing an encoded
//! stream from a locator, and a decode process turning it into raw f32le PCM
//! — and delivers the PCM into a target ring buffer under backpressure.
//!
//! A bridging task copies fetch stdout into decode stdin; the main loop polls
//! the skip flag (highest priority, even while paused), the pause flag and
//! buffer occupancy, then reads one chunk of decoded PCM. Cancellation is
//! cooperative: worst-case latency is one loop iteration plus the bounded
//! teardown ladder (cancel bridge, terminate, timed wait, kill).
//!
//! Announcements reuse the decode stage alone: the encoded bytes are already
//! in memory, so a writer task replaces the fetch process.

use crate::audio::buffer::RingBuffer;
use crate::config::{PipelineConfig, FRAME_BYTES};
use crate::engine::session::{SessionControl, SessionState};
use crate::error::{Error, Result};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Interval for pause and backpressure polling
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bridge copy granularity
const BRIDGE_CHUNK_BYTES: usize = 64 * 1024;

/// Bounded wait for the bridge after cancelling it
const BRIDGE_CANCEL_WAIT: Duration = Duration::from_millis(500);

/// Bounded wait for the bridge after normal end of stream
const BRIDGE_EOF_WAIT: Duration = Duration::from_secs(1);

/// Wait between terminating a process and force-killing it
const TERMINATE_WAIT: Duration = Duration::from_secs(1);

/// Wait for a process to exit after normal end of stream
const EXIT_WAIT: Duration = Duration::from_secs(2);

/// How a pipeline run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEnd {
    /// Decode stage reached end of stream
    Completed,
    /// Skip requested; processes torn down and target buffer cleared
    Skipped,
}

/// Run the full fetch → decode pipeline for one locator, streaming decoded
/// PCM into `buffer` until end of stream or skip.
pub async fn run_media(
    locator: &str,
    buffer: &Arc<RingBuffer>,
    control: &Arc<SessionControl>,
    config: &PipelineConfig,
    state_tx: &watch::Sender<SessionState>,
) -> Result<PipelineEnd> {
    let mut fetch_argv = config.fetch_command.clone();
    fetch_argv.push(locator.to_string());

    let mut fetch = spawn(&fetch_argv, Stdio::null(), "fetch stage")?;
    let mut decode = spawn(&config.decode_command, Stdio::piped(), "decode stage")?;

    let fetch_out = fetch
        .stdout
        .take()
        .ok_or_else(|| Error::Pipeline("fetch stage has no stdout".into()))?;
    let decode_in = decode
        .stdin
        .take()
        .ok_or_else(|| Error::Pipeline("decode stage has no stdin".into()))?;
    let mut pcm = decode
        .stdout
        .take()
        .ok_or_else(|| Error::Pipeline("decode stage has no stdout".into()))?;

    let mut bridge = tokio::spawn(bridge_bytes(fetch_out, decode_in));

    let mut chunk = vec![0u8; config.chunk_bytes];
    let mut pending: Vec<u8> = Vec::new();
    let mut streaming = false;
    let mut paused_reported = false;

    loop {
        // Skip takes priority, even while paused
        if control.take_skip() {
            cancel_bridge(&mut bridge).await;
            shutdown_child(&mut decode, "decode stage").await;
            shutdown_child(&mut fetch, "fetch stage").await;
            buffer.clear();
            return Ok(PipelineEnd::Skipped);
        }

        if control.is_paused() {
            if !paused_reported {
                paused_reported = true;
                let _ = state_tx.send(SessionState::Paused);
            }
            sleep(POLL_INTERVAL).await;
            continue;
        }
        if paused_reported {
            paused_reported = false;
            let _ = state_tx.send(if streaming {
                SessionState::Streaming
            } else {
                SessionState::Fetching
            });
        }

        // Backpressure: let the mixer drain before reading more
        if buffer.occupancy() > config.backpressure_frames {
            sleep(POLL_INTERVAL).await;
            continue;
        }

        let n = match pcm.read(&mut chunk).await {
            Ok(n) => n,
            Err(e) => {
                cancel_bridge(&mut bridge).await;
                shutdown_child(&mut decode, "decode stage").await;
                shutdown_child(&mut fetch, "fetch stage").await;
                return Err(Error::Pipeline(format!("PCM read failed: {}", e)));
            }
        };
        if n == 0 {
            break;
        }

        push_pcm(&chunk[..n], &mut pending, buffer);
        if !streaming && buffer.occupancy() > 0 {
            streaming = true;
            let _ = state_tx.send(SessionState::Streaming);
        }
    }

    // Normal end of stream: drain the bridge and let both processes exit,
    // force-killing on timeout. Not an error.
    if timeout(BRIDGE_EOF_WAIT, &mut bridge).await.is_err() {
        bridge.abort();
    }
    reap_child(&mut decode, "decode stage").await;
    reap_child(&mut fetch, "fetch stage").await;

    debug!(locator, "pipeline reached end of stream");
    Ok(PipelineEnd::Completed)
}

/// Run the decode stage alone over pre-fetched encoded bytes, streaming
/// decoded PCM into the announcement buffer. No pause, no backpressure:
/// announcements are short, bounded and always play to completion.
pub async fn run_decode_only(
    encoded: Vec<u8>,
    buffer: &Arc<RingBuffer>,
    config: &PipelineConfig,
) -> Result<()> {
    let mut decode = spawn(&config.decode_command, Stdio::piped(), "decode stage")?;

    let mut decode_in = decode
        .stdin
        .take()
        .ok_or_else(|| Error::Pipeline("decode stage has no stdin".into()))?;
    let mut pcm = decode
        .stdout
        .take()
        .ok_or_else(|| Error::Pipeline("decode stage has no stdout".into()))?;

    // Feed stdin concurrently with the read loop; writing everything up front
    // would deadlock once the decode process fills its output pipe.
    let mut writer: JoinHandle<()> = tokio::spawn(async move {
        // A write failure means the decode stage closed its input; the read
        // loop will observe the outcome on stdout.
        let _ = decode_in.write_all(&encoded).await;
        let _ = decode_in.shutdown().await;
    });

    let mut chunk = vec![0u8; config.chunk_bytes];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match pcm.read(&mut chunk).await {
            Ok(n) => n,
            Err(e) => {
                writer.abort();
                shutdown_child(&mut decode, "decode stage").await;
                return Err(Error::Pipeline(format!("PCM read failed: {}", e)));
            }
        };
        if n == 0 {
            break;
        }
        push_pcm(&chunk[..n], &mut pending, buffer);
    }

    if timeout(BRIDGE_EOF_WAIT, &mut writer).await.is_err() {
        writer.abort();
    }
    reap_child(&mut decode, "decode stage").await;
    Ok(())
}

/// Copy bytes from fetch stdout to decode stdin until the fetch stream ends.
/// A broken connection (decode closed its input, e.g. during cancellation)
/// is expected and ends the bridge silently.
async fn bridge_bytes(mut from: ChildStdout, mut to: ChildStdin) {
    let mut buf = vec![0u8; BRIDGE_CHUNK_BYTES];
    loop {
        match from.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if to.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    let _ = to.shutdown().await;
}

/// Accumulate raw bytes, converting only whole frames to samples; a byte
/// remainder from a partial read is carried to the next call.
fn push_pcm(read: &[u8], pending: &mut Vec<u8>, buffer: &RingBuffer) {
    pending.extend_from_slice(read);
    let whole = pending.len() - pending.len() % FRAME_BYTES;
    if whole > 0 {
        let samples = pcm_bytes_to_samples(&pending[..whole]);
        buffer.write(&samples);
        pending.drain(..whole);
    }
}

/// Interpret little-endian f32 PCM bytes as samples.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<f32> {
    debug_assert_eq!(bytes.len() % 4, 0);
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn spawn(argv: &[String], stdin: Stdio, label: &str) -> Result<Child> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::Pipeline(format!("empty {} command", label)))?;

    Command::new(program)
        .args(args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Pipeline(format!("failed to spawn {} ({}): {}", label, program, e)))
}

/// Cancel the bridging task with a bounded wait, then abandon it.
async fn cancel_bridge(bridge: &mut JoinHandle<()>) {
    bridge.abort();
    let _ = timeout(BRIDGE_CANCEL_WAIT, bridge).await;
}

/// Terminate a process, wait briefly, then force-kill. Used on skip/cancel
/// and on pipeline failure.
async fn shutdown_child(child: &mut Child, label: &str) {
    terminate(child);
    if timeout(TERMINATE_WAIT, child.wait()).await.is_err() {
        warn!("{} did not exit after terminate, killing", label);
        let _ = child.kill().await;
    }
}

/// Wait for a process after normal end of stream, force-killing on timeout.
async fn reap_child(child: &mut Child, label: &str) {
    if timeout(EXIT_WAIT, child.wait()).await.is_err() {
        warn!("{} did not exit after end of stream, killing", label);
        let _ = child.kill().await;
    }
}

#[cfg(unix)]
fn terminate(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid comes from a child we own; SIGTERM to a dead pid is a
        // harmless ESRCH.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &Child) {
    // No graceful signal available; the bounded wait in shutdown_child falls
    // through to kill().
    let _ = child;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_bytes_to_samples() {
        let mut bytes = Vec::new();
        for value in [0.0f32, 0.5, -1.0, 0.25] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        assert_eq!(pcm_bytes_to_samples(&bytes), vec![0.0, 0.5, -1.0, 0.25]);
    }

    #[test]
    fn test_push_pcm_carries_partial_frames() {
        let buffer = RingBuffer::new("test", 1024);
        let mut pending = Vec::new();

        let mut bytes = Vec::new();
        for value in [0.1f32, 0.2, 0.3, 0.4] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        // Deliver a frame and a half, then the rest
        push_pcm(&bytes[..12], &mut pending, &buffer);
        assert_eq!(buffer.occupancy(), 1);
        assert_eq!(pending.len(), 4);

        push_pcm(&bytes[12..], &mut pending, &buffer);
        assert_eq!(buffer.occupancy(), 2);
        assert!(pending.is_empty());

        let out = buffer.read(2);
        assert!((out[0] - 0.1).abs() < 1e-6);
        assert!((out[3] - 0.4).abs() < 1e-6);
    }
}
