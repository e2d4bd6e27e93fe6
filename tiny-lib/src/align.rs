//! Frame alignment on a stream of unknown phase.
//!
//! After a connection is opened, either side may still hold bytes from an
//! earlier session, so nothing says where the box thinks a frame starts.
//! There is no out-of-band reset. Instead the host repeatedly sends a 6-byte
//! probe whose only valid opcode is the `0xE0` at offset 1:
//!
//! ```text
//! probe:  10 E0 7F 0F 55 2A
//! ```
//!
//! The box reads in 5-byte frames, so each 6-byte probe moves the opcode one
//! byte further through the box's framing. Within [`FRAME_SIZE`] rounds it
//! lands on a frame boundary; the box then accepts `E0 7F 0F 55 2A` as a
//! (harmless, state 0) schedule command and echoes it. Every other frame the
//! probe produces starts with filler the box drops silently.
//!
//! Seeing the echo tells the host two things: the box's input framing is now
//! in step with the host's writes, and the byte after the echo starts a frame
//! on the read side. Input already waiting before the first probe is drained
//! and dropped, since it may hold an echo from an earlier session.

use crate::constants::{ALIGN_ECHO, ALIGN_PROBE, FRAME_SIZE};
use crate::error::{AlignmentError, TransportError};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Upper bound on reads per round, in case the box never goes quiet.
const MAX_READS_PER_ROUND: usize = 64;

/// Timing of the read phase of each probe round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignConfig {
    /// How long to wait for the first bytes after a probe is sent. Must cover
    /// the box's turnaround plus the transfer of anything it had queued.
    pub response_timeout: Duration,
    /// Quiet period that ends a round once data has started arriving.
    pub settle_timeout: Duration,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(300),
            settle_timeout: Duration::from_millis(50),
        }
    }
}

/// Progress of one alignment attempt.
#[derive(Debug, Default)]
struct AlignerState {
    rounds: usize,
    residual: BytesMut,
}

/// Runs the probe procedure against a live transport.
#[derive(Debug, Default)]
pub struct FrameAligner {
    config: AlignConfig,
    state: AlignerState,
}

impl FrameAligner {
    pub fn new(config: AlignConfig) -> Self {
        Self {
            config,
            state: AlignerState::default(),
        }
    }

    /// Probe rounds used by the last call to [`FrameAligner::align`].
    pub fn rounds(&self) -> usize {
        self.state.rounds
    }

    /// Bring `stream` into frame alignment.
    ///
    /// On success returns the bytes that arrived after the echo. They start on
    /// a frame boundary and belong at the front of the aligned read stream.
    pub async fn align<T>(&mut self, stream: &mut T) -> Result<BytesMut, AlignmentError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        self.state = AlignerState::default();
        self.drain_stale(stream).await?;

        while self.state.rounds < FRAME_SIZE {
            self.state.rounds += 1;
            debug!(
                round = self.state.rounds,
                probe = hex::encode(ALIGN_PROBE),
                "Sending alignment probe"
            );
            stream.write_all(&ALIGN_PROBE).await.map_err(TransportError::from)?;
            stream.flush().await.map_err(TransportError::from)?;

            self.collect_round(stream).await?;

            if let Some(end) = find_echo(&self.state.residual) {
                let discarded = self.state.residual.split_to(end);
                let buffered = self.state.residual.split();
                trace!(bytes = hex::encode(&discarded), "Discarded up to alignment echo");
                info!(rounds = self.state.rounds, "Frame alignment achieved");
                return Ok(buffered);
            }

            if !self.state.residual.is_empty() {
                trace!(bytes = hex::encode(&self.state.residual), "Discarded misaligned bytes");
            }
            self.state.residual.clear();
        }

        warn!(rounds = self.state.rounds, "Too many align tries, giving up");
        Err(AlignmentError::NotAchieved {
            rounds: self.state.rounds,
        })
    }

    /// Throw away whatever is already waiting on the read side, such as the
    /// echo of a probe from an earlier session, so it cannot pass for the
    /// answer to this session's first probe.
    async fn drain_stale<T>(&mut self, stream: &mut T) -> Result<(), TransportError>
    where
        T: AsyncRead + Unpin,
    {
        self.read_until_idle(stream, self.config.settle_timeout).await?;
        if !self.state.residual.is_empty() {
            trace!(bytes = hex::encode(&self.state.residual), "Drained stale input");
        }
        self.state.residual.clear();
        Ok(())
    }

    /// Read everything the box sends in response to one probe: one read
    /// bounded by `response_timeout`, then further reads until one sits idle
    /// for `settle_timeout`.
    async fn collect_round<T>(&mut self, stream: &mut T) -> Result<(), TransportError>
    where
        T: AsyncRead + Unpin,
    {
        self.read_until_idle(stream, self.config.response_timeout).await
    }

    /// Append to the residual buffer until a read sits idle. The first read
    /// waits up to `first_wait`, later ones up to `settle_timeout`.
    async fn read_until_idle<T>(
        &mut self,
        stream: &mut T,
        first_wait: Duration,
    ) -> Result<(), TransportError>
    where
        T: AsyncRead + Unpin,
    {
        let mut wait = first_wait;
        for _ in 0..MAX_READS_PER_ROUND {
            self.state.residual.reserve(FRAME_SIZE * 8);
            match timeout(wait, stream.read_buf(&mut self.state.residual)).await {
                Err(_) => {
                    trace!(buffered = self.state.residual.len(), "Read timed out, input idle");
                    return Ok(());
                }
                Ok(Ok(0)) => return Err(TransportError::Closed),
                Ok(Ok(_)) => wait = self.config.settle_timeout,
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Offset just past the last probe echo in `residual`, if there is one.
fn find_echo(residual: &[u8]) -> Option<usize> {
    residual
        .windows(FRAME_SIZE)
        .rposition(|window| window == ALIGN_ECHO)
        .map(|start| start + FRAME_SIZE)
}

/// Align `stream` with the default timing.
pub async fn align<T>(stream: &mut T) -> Result<BytesMut, AlignmentError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    FrameAligner::new(AlignConfig::default()).align(stream).await
}
