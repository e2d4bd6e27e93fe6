use crate::align::{AlignConfig, FrameAligner};
use crate::clock::ClockValue;
use crate::error::{TinyError, TransportError};
use crate::frame::{Frame, FrameReader, FrameWriter};
use crate::message::{Command, Event, decode};
use bytes::BytesMut;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tracing::{debug, info};

/// A Port A change the box has been asked to make at an exact clock value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingSchedule {
    pub state: u8,
    pub at: ClockValue,
}

/// The box holds a single schedule slot; so does the host-side mirror of it.
/// Shared by the send and receive halves of one connection.
#[derive(Debug, Clone, Default)]
struct ScheduleSlot(Arc<Mutex<Option<PendingSchedule>>>);

impl ScheduleSlot {
    fn lock(&self) -> MutexGuard<'_, Option<PendingSchedule>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self) -> Option<PendingSchedule> {
        *self.lock()
    }

    fn set(&self, schedule: PendingSchedule) {
        *self.lock() = Some(schedule);
    }

    fn clear(&self) -> Option<PendingSchedule> {
        self.lock().take()
    }

    fn restore(&self, previous: Option<PendingSchedule>) {
        *self.lock() = previous;
    }

    fn clear_if(&self, state: u8, at: ClockValue) -> bool {
        let mut slot = self.lock();
        if *slot == Some(PendingSchedule { state, at }) {
            *slot = None;
            true
        } else {
            false
        }
    }
}

/// Outbound half of a connection: encodes commands and writes them.
pub struct CommandSender<W> {
    writer: FrameWriter<W>,
    pending: ScheduleSlot,
}

impl<W: AsyncWrite + Unpin> CommandSender<W> {
    /// Encode and send any command, keeping the schedule mirror in step.
    ///
    /// The mirror is updated before the frame is written so the echo can never
    /// be observed ahead of it. If the write fails the mirror goes back to what
    /// it was; the box may or may not have seen a partial frame, but the
    /// connection is unusable by then anyway.
    pub async fn send(&mut self, command: Command) -> Result<(), TinyError> {
        let frame = command.encode()?;
        let previous = self.pending.get();
        match command {
            Command::SetPorts { port_a: Some(_), .. } => {
                if let Some(cancelled) = self.pending.clear() {
                    debug!(?cancelled, "Port A set manually, schedule cancelled");
                }
            }
            Command::SchedulePortA { state, at } => {
                self.pending.set(PendingSchedule { state, at });
            }
            _ => {}
        }
        if let Err(e) = self.writer.write_frame(&frame).await {
            self.pending.restore(previous);
            return Err(e.into());
        }
        Ok(())
    }

    /// Zero the box clock. Does not wait for the echo.
    pub async fn reset_clock(&mut self) -> Result<(), TinyError> {
        self.send(Command::ResetClock).await
    }

    /// Drive Port B, and Port A when `port_a` is given. Setting Port A
    /// cancels a pending schedule, here and on the box.
    pub async fn set_ports(&mut self, port_b: u8, port_a: Option<u8>) -> Result<(), TinyError> {
        self.send(Command::SetPorts { port_b, port_a }).await
    }

    /// Drive Port B only; Port A and any pending schedule are untouched.
    pub async fn set_port_b(&mut self, port_b: u8) -> Result<(), TinyError> {
        self.set_ports(port_b, None).await
    }

    /// Ask the box to set Port A to `state` when its clock equals `at`.
    ///
    /// Replaces any earlier schedule. `at` should be at least
    /// [`SCHEDULE_LEAD_TICKS`](crate::constants::SCHEDULE_LEAD_TICKS) (about
    /// half a second) ahead of the box clock. A time that has already passed,
    /// or is too close for the box to process the command in time, is simply
    /// never matched: the box reports no error and the schedule stays pending
    /// until the counter wraps round to it.
    pub async fn schedule_port_a(&mut self, state: u8, at: ClockValue) -> Result<(), TinyError> {
        self.send(Command::SchedulePortA { state, at }).await
    }

    /// The schedule the box is believed to hold, if any.
    ///
    /// The box answers a schedule command with a frame shaped exactly like the
    /// report it sends when the schedule fires, and either one clears the
    /// slot. So this normally reads `None` again as soon as the echo has been
    /// received, well before the scheduled time.
    pub fn pending_schedule(&self) -> Option<PendingSchedule> {
        self.pending.get()
    }
}

/// Inbound half of a connection: reads frames and decodes them to events in
/// arrival order.
pub struct EventReceiver<R> {
    reader: FrameReader<R>,
    pending: ScheduleSlot,
    backlog: VecDeque<Event>,
}

impl<R: AsyncRead + Unpin> EventReceiver<R> {
    /// Wait for the next event from the box.
    ///
    /// Blocks for as long as the box is silent; a healthy box sends at least a
    /// heartbeat every 2^16 ticks, so callers wanting a liveness check can
    /// wrap this in a timeout.
    pub async fn next_event(&mut self) -> Result<Event, TransportError> {
        if let Some(event) = self.backlog.pop_front() {
            return Ok(event);
        }
        self.read_event().await
    }

    /// Same slot as [`CommandSender::pending_schedule`]; cleared here when
    /// a matching schedule echo or fire report is read.
    pub fn pending_schedule(&self) -> Option<PendingSchedule> {
        self.pending.get()
    }

    async fn read_event(&mut self) -> Result<Event, TransportError> {
        let event = decode(self.reader.read_frame().await?);
        if let Event::ScheduleFired { state, at } = event {
            if self.pending.clear_if(state, at) {
                debug!(state, %at, "Pending schedule matched");
            }
        }
        Ok(event)
    }

    /// Read until the box echoes `echo`. Anything else that arrives first is
    /// queued for [`EventReceiver::next_event`].
    async fn wait_for_ack(&mut self, echo: Frame) -> Result<(), TransportError> {
        loop {
            match self.read_event().await? {
                Event::Ack(frame) if frame == echo => return Ok(()),
                other => self.backlog.push_back(other),
            }
        }
    }
}

/// One connection to a tiny-v1 relay box.
///
/// Owns the aligned transport and the single pending-schedule slot. For use
/// from separate reader and writer tasks, see [`TinyDriver::into_split`].
pub struct TinyDriver<T> {
    sender: CommandSender<WriteHalf<T>>,
    receiver: EventReceiver<ReadHalf<T>>,
}

impl<T: AsyncRead + AsyncWrite> TinyDriver<T> {
    /// Align a freshly opened transport and wrap it.
    pub async fn connect(mut stream: T, config: AlignConfig) -> Result<Self, TinyError>
    where
        T: Unpin,
    {
        let buffered = FrameAligner::new(config).align(&mut stream).await?;
        info!(buffered = buffered.len(), "Tiny aligned");
        Ok(Self::from_parts(stream, buffered))
    }

    /// Wrap a transport that is already frame aligned.
    pub fn assume_aligned(stream: T) -> Self {
        Self::from_parts(stream, BytesMut::new())
    }

    fn from_parts(stream: T, buffered: BytesMut) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending = ScheduleSlot::default();
        Self {
            sender: CommandSender {
                writer: FrameWriter::new(write_half),
                pending: pending.clone(),
            },
            receiver: EventReceiver {
                reader: FrameReader::with_buffered(read_half, buffered),
                pending,
                backlog: VecDeque::new(),
            },
        }
    }

    /// Separate the connection into halves that can live on different tasks.
    /// Both keep sharing the pending-schedule slot.
    pub fn into_split(self) -> (CommandSender<WriteHalf<T>>, EventReceiver<ReadHalf<T>>) {
        (self.sender, self.receiver)
    }

    pub async fn send(&mut self, command: Command) -> Result<(), TinyError> {
        self.sender.send(command).await
    }

    pub async fn reset_clock(&mut self) -> Result<(), TinyError> {
        self.sender.reset_clock().await
    }

    /// Zero the box clock and wait up to `wait` for the box to echo `tag`.
    ///
    /// Events that arrive in the meantime are kept and come out of
    /// [`TinyDriver::next_event`] afterwards, in order.
    pub async fn reset_clock_confirmed(&mut self, tag: u32, wait: Duration) -> Result<(), TinyError> {
        let command = Command::TaggedResetClock { tag };
        let echo = command.encode()?;
        self.sender.send(command).await?;
        tokio::time::timeout(wait, self.receiver.wait_for_ack(echo)).await??;
        info!("Clock reset acknowledged, tag {tag:#010x}");
        Ok(())
    }

    pub async fn set_ports(&mut self, port_b: u8, port_a: Option<u8>) -> Result<(), TinyError> {
        self.sender.set_ports(port_b, port_a).await
    }

    pub async fn set_port_b(&mut self, port_b: u8) -> Result<(), TinyError> {
        self.sender.set_port_b(port_b).await
    }

    /// See [`CommandSender::schedule_port_a`] for the lead-time caveat.
    pub async fn schedule_port_a(&mut self, state: u8, at: ClockValue) -> Result<(), TinyError> {
        self.sender.schedule_port_a(state, at).await
    }

    pub async fn next_event(&mut self) -> Result<Event, TransportError> {
        self.receiver.next_event().await
    }

    /// The schedule the box is believed to hold. Its immediate echo of
    /// [`TinyDriver::schedule_port_a`] looks the same as the fire report and
    /// clears this too; see [`CommandSender::pending_schedule`].
    pub fn pending_schedule(&self) -> Option<PendingSchedule> {
        self.sender.pending_schedule()
    }
}
