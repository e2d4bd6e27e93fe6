//! Common test utilities: a simulated tiny-v1 box
//!
//! The box side of a `tokio::io::duplex` pair. It only models what is visible
//! on the wire: 5-byte receive framing starting at an arbitrary phase, echo of
//! frames whose first byte is a valid opcode, silence for everything else.

// Shared across test files - not every helper is used in every file
#![allow(dead_code, unused_imports)]

pub use tiny_lib::constants::{ALIGN_ECHO, ALIGN_PROBE, FRAME_SIZE};
pub use tiny_lib::{
    AlignConfig, AlignmentError, ClockValue, Command, Event, Frame, FrameAligner, TinyDriver,
    decode, encode,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

/// Filler the simulated box already holds when the session starts
pub const JUNK: u8 = 0x33;

/// Decode hex string to a frame for testing
pub fn hex_frame(hex_data: &str) -> Frame {
    let bytes = hex::decode(hex_data).expect("Failed to decode hex");
    Frame::try_from(bytes.as_slice()).expect("Frame must be 5 bytes")
}

pub fn is_valid_opcode(id: u8) -> bool {
    matches!(id, 0x00 | 0x04 | 0xE0..=0xFF)
}

#[derive(Debug, Default, Clone)]
pub struct SimBox {
    /// Bytes already sitting in the box's receive framing (0..5)
    pub phase: usize,
    /// Bytes queued towards the host from an earlier session
    pub stale: Vec<u8>,
    /// Never answer anything
    pub silent: bool,
    /// Follow every probe echo with a heartbeat at this clock
    pub heartbeat_after_echo: Option<u32>,
}

impl SimBox {
    pub fn with_phase(phase: usize) -> Self {
        Self {
            phase,
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    /// Start the box. Returns the host end of the link and a handle that
    /// resolves to every byte the box received once the host hangs up.
    pub fn spawn(self) -> (DuplexStream, JoinHandle<Vec<u8>>) {
        let (host, device) = tokio::io::duplex(1024);
        (host, tokio::spawn(self.run(device)))
    }

    async fn run(self, mut io: DuplexStream) -> Vec<u8> {
        let mut framing = vec![JUNK; self.phase];
        let mut received = Vec::new();
        let mut buf = [0u8; 64];

        if !self.stale.is_empty() && io.write_all(&self.stale).await.is_err() {
            return received;
        }

        loop {
            let n = match io.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            received.extend_from_slice(&buf[..n]);
            framing.extend_from_slice(&buf[..n]);

            while framing.len() >= FRAME_SIZE {
                let frame: Vec<u8> = framing.drain(..FRAME_SIZE).collect();
                if self.silent || !is_valid_opcode(frame[0]) {
                    continue;
                }
                let mut reply = frame.clone();
                if frame == ALIGN_ECHO {
                    if let Some(clock) = self.heartbeat_after_echo {
                        reply.push(0x10);
                        reply.extend_from_slice(&clock.to_be_bytes());
                    }
                }
                if io.write_all(&reply).await.is_err() {
                    return received;
                }
            }
        }
        received
    }
}

/// Default timings; tests run with paused time so waiting costs nothing
pub fn test_config() -> AlignConfig {
    AlignConfig::default()
}

/// Round on which the probe opcode lands on a frame boundary for `phase`
pub fn expected_rounds(phase: usize) -> usize {
    match (FRAME_SIZE - phase % FRAME_SIZE) % FRAME_SIZE {
        0 => FRAME_SIZE,
        r => r,
    }
}
