//! Host-side driver for the tiny-v1 relay box.
//!
//! The box talks in fixed 5-byte frames over a serial line: it echoes the
//! commands it accepts, reports input pulses and a periodic heartbeat stamped
//! with its 156.25 kHz clock, and can set its Port A outputs at an exact
//! future clock value.
//!
//! ```no_run
//! # async fn demo(
//! #     port: impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
//! # ) -> Result<(), tiny_lib::TinyError> {
//! use tiny_lib::{AlignConfig, Event, TinyDriver};
//!
//! let mut tiny = TinyDriver::connect(port, AlignConfig::default()).await?;
//! tiny.reset_clock().await?;
//! tiny.set_ports(0xFF, Some(0x1F)).await?;
//! loop {
//!     if let Event::InputChannel1 { at } = tiny.next_event().await? {
//!         let lead = tiny_lib::constants::TINY_RATE;
//!         tiny.schedule_port_a(0x01, at.wrapping_add(lead)).await?;
//!     }
//! }
//! # }
//! ```

pub mod align;
pub mod clock;
pub mod constants;
pub mod device;
pub mod error;
pub mod frame;
pub mod message;


pub use align::{AlignConfig, FrameAligner};
pub use clock::ClockValue;
pub use device::{CommandSender, EventReceiver, PendingSchedule, TinyDriver};
pub use error::{AlignmentError, EncodeError, TinyError, TransportError};
pub use frame::Frame;
pub use message::{Command, Event, decode, encode};
