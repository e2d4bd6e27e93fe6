//! Typed commands and events, and the codec between them and [`Frame`]s.
//!
//! The identifying byte selects the variant. Outbound opcodes are matched
//! exactly; inbound reports use ranges where the low bits carry a port mask.
//!
//! | id          | host -> box            | box -> host                    |
//! |-------------|------------------------|--------------------------------|
//! | `00`        | reset clock            | echo (ack)                     |
//! | `04`        | set ports              | echo (ack)                     |
//! | `10`        |                        | heartbeat                      |
//! | `20`        |                        | input channel 1                |
//! | `40`..`4F`  |                        | input channel 2, low nibble    |
//! | `80`..`8F`  |                        | input channel 3, low nibble    |
//! | `E0`..`FF`  | schedule Port A        | schedule echo or fire report   |

use crate::clock::ClockValue;
use crate::constants::{
    INPUT_PORT_BITS, PORT_A_BITS, PORT_B_BITS, SCHEDULE_PREFIX, SCHEDULE_STATE_MASK,
};
use crate::error::EncodeError;
use crate::frame::Frame;
use modular_bitfield::prelude::*;
use num_enum::{FromPrimitive, IntoPrimitive};
use serde::Serialize;
use std::fmt;

/// Identifying bytes that are matched exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    ResetClock = 0x00,
    SetPorts = 0x04,
    Heartbeat = 0x10,
    InputChannel1 = 0x20,

    // ranges (input 2/3, schedule) and unknown bytes
    #[num_enum(catch_all)]
    Other(u8),
}

/// Data field of a SetPorts frame.
///
/// Port A is left untouched by the box unless `apply_port_a` is set.
#[bitfield(bytes = 4)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortsWord {
    pub port_b: u8,
    #[skip]
    unused0: u8,
    pub port_a: B5,
    #[skip]
    unused1: B2,
    pub apply_port_a: bool,
    #[skip]
    unused2: u8,
}

/// A request from the host to the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Zero the box clock.
    ResetClock,
    /// Zero the box clock, carrying a tag the box echoes back verbatim so the
    /// acknowledgement can be recognised among other traffic.
    TaggedResetClock { tag: u32 },
    /// Drive Port B, and Port A too when `port_a` is set. Setting Port A
    /// cancels any pending schedule on the box.
    SetPorts { port_b: u8, port_a: Option<u8> },
    /// Set Port A to `state` when the box clock equals `at` exactly.
    SchedulePortA { state: u8, at: ClockValue },
}

impl Command {
    /// Build the wire frame for this command.
    pub fn encode(&self) -> Result<Frame, EncodeError> {
        match *self {
            Command::ResetClock => Ok(Frame::new(Opcode::ResetClock.into(), [0; 4])),
            Command::TaggedResetClock { tag } => {
                Ok(Frame::new(Opcode::ResetClock.into(), tag.to_be_bytes()))
            }
            Command::SetPorts { port_b, port_a } => {
                check_width("port_b", port_b, PORT_B_BITS)?;
                let mut word = PortsWord::new().with_port_b(port_b);
                if let Some(port_a) = port_a {
                    check_width("port_a", port_a, PORT_A_BITS)?;
                    word = word.with_port_a(port_a).with_apply_port_a(true);
                }
                Ok(Frame::new(Opcode::SetPorts.into(), word.into_bytes()))
            }
            Command::SchedulePortA { state, at } => {
                check_width("state", state, PORT_A_BITS)?;
                Ok(Frame::new(SCHEDULE_PREFIX | state, at.to_bytes()))
            }
        }
    }
}

fn check_width(field: &'static str, value: u8, bits: u32) -> Result<(), EncodeError> {
    if bits < u8::BITS && value >> bits != 0 {
        return Err(EncodeError::FieldOutOfRange { field, value, bits });
    }
    Ok(())
}

/// Anything the box can send to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Event {
    /// Echo of a ResetClock or SetPorts command, byte for byte.
    Ack(Frame),
    /// Periodic liveness report, every 2^16 ticks.
    Heartbeat { at: ClockValue },
    InputChannel1 { at: ClockValue },
    InputChannel2 { ports: u8, at: ClockValue },
    InputChannel3 { ports: u8, at: ClockValue },
    /// A schedule frame from the box. The echo of a SchedulePortA command and
    /// the report of it firing look identical on the wire.
    ScheduleFired { state: u8, at: ClockValue },
    /// Identifying byte outside every known range.
    Unrecognized(Frame),
}

impl Event {
    /// Box clock carried by the event, if it has one.
    pub fn clock(&self) -> Option<ClockValue> {
        match *self {
            Event::Heartbeat { at }
            | Event::InputChannel1 { at }
            | Event::InputChannel2 { at, .. }
            | Event::InputChannel3 { at, .. }
            | Event::ScheduleFired { at, .. } => Some(at),
            Event::Ack(_) | Event::Unrecognized(_) => None,
        }
    }

    /// Reconstruct the command an [`Event::Ack`] is echoing.
    pub fn echoed_command(&self) -> Option<Command> {
        let Event::Ack(frame) = self else {
            return None;
        };
        match Opcode::from_primitive(frame.id()) {
            Opcode::ResetClock => match u32::from_be_bytes(frame.data()) {
                0 => Some(Command::ResetClock),
                tag => Some(Command::TaggedResetClock { tag }),
            },
            Opcode::SetPorts => {
                let word = PortsWord::from_bytes(frame.data());
                Some(Command::SetPorts {
                    port_b: word.port_b(),
                    port_a: word.apply_port_a().then(|| word.port_a()),
                })
            }
            _ => None,
        }
    }
}

impl From<Frame> for Event {
    fn from(frame: Frame) -> Self {
        decode(frame)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Ack(frame) => match self.echoed_command() {
                Some(Command::SetPorts { port_b, port_a: Some(port_a) }) => {
                    write!(f, "setports PA:{port_a:02X} PB:{port_b:02X}")
                }
                Some(Command::SetPorts { port_b, port_a: None }) => write!(f, "setportb PB:{port_b:02X}"),
                _ => write!(f, "reset {}", hex::encode(frame.data())),
            },
            Event::Heartbeat { at } => write!(f, "clock {at}"),
            Event::InputChannel1 { at } => write!(f, "input 1 at {at}"),
            Event::InputChannel2 { ports, at } => write!(f, "input 2:{ports:02X} at {at}"),
            Event::InputChannel3 { ports, at } => write!(f, "input 3:{ports:02X} at {at}"),
            Event::ScheduleFired { state, at } => write!(f, "schedule PA:{state:02X} at {at}"),
            Event::Unrecognized(frame) => write!(f, "unknown {frame}"),
        }
    }
}

/// Encode a command into its wire frame.
pub fn encode(command: &Command) -> Result<Frame, EncodeError> {
    command.encode()
}

/// Classify an inbound frame. Total over all 256 identifying bytes: anything
/// outside the known ranges is reported as [`Event::Unrecognized`].
pub fn decode(frame: Frame) -> Event {
    let id = frame.id();
    let at = frame.clock();
    let port_mask = (1u8 << INPUT_PORT_BITS) - 1;
    match Opcode::from_primitive(id) {
        Opcode::ResetClock | Opcode::SetPorts => Event::Ack(frame),
        Opcode::Heartbeat => Event::Heartbeat { at },
        Opcode::InputChannel1 => Event::InputChannel1 { at },
        Opcode::Other(0x40..=0x4F) => Event::InputChannel2 { ports: id & port_mask, at },
        Opcode::Other(0x80..=0x8F) => Event::InputChannel3 { ports: id & port_mask, at },
        Opcode::Other(0xE0..=0xFF) => Event::ScheduleFired {
            state: id & SCHEDULE_STATE_MASK,
            at,
        },
        Opcode::Other(_) => Event::Unrecognized(frame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(hex_str: &str) -> Frame {
        Frame::try_from(hex::decode(hex_str).unwrap().as_slice()).unwrap()
    }

    #[test]
    fn test_ports_word_layout() {
        let word = PortsWord::new()
            .with_port_b(0xA5)
            .with_port_a(0x1F)
            .with_apply_port_a(true);
        assert_eq!(word.into_bytes(), [0xA5, 0x00, 0x9F, 0x00]);

        let port_b_only = PortsWord::new().with_port_b(0x01);
        assert_eq!(port_b_only.into_bytes(), [0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_reset_clock() {
        assert_eq!(Command::ResetClock.encode().unwrap(), frame("0000000000"));
        assert_eq!(
            Command::TaggedResetClock { tag: 0xCAFE_BEEF }.encode().unwrap(),
            frame("00cafebeef")
        );
    }

    #[test]
    fn test_encode_set_ports() {
        let cmd = Command::SetPorts {
            port_b: 0b0000_0101,
            port_a: Some(0b11011),
        };
        assert_eq!(cmd.encode().unwrap(), frame("0405009b00"));

        let low_port_a = Command::SetPorts {
            port_b: 0b0000_0101,
            port_a: Some(0b00011),
        };
        assert_eq!(low_port_a.encode().unwrap(), frame("0405008300"));

        let port_b_only = Command::SetPorts {
            port_b: 0xFF,
            port_a: None,
        };
        assert_eq!(port_b_only.encode().unwrap(), frame("04ff000000"));

        let port_a_zero = Command::SetPorts {
            port_b: 0x00,
            port_a: Some(0),
        };
        assert_eq!(port_a_zero.encode().unwrap(), frame("0400008000"));
    }

    #[test]
    fn test_encode_schedule() {
        let cmd = Command::SchedulePortA {
            state: 0b00101,
            at: ClockValue(0x0102_0304),
        };
        assert_eq!(cmd.encode().unwrap(), frame("e501020304"));
    }

    #[test]
    fn test_encode_rejects_wide_masks() {
        let wide_a = Command::SetPorts {
            port_b: 0,
            port_a: Some(0x20),
        };
        assert_eq!(
            wide_a.encode(),
            Err(EncodeError::FieldOutOfRange {
                field: "port_a",
                value: 0x20,
                bits: 5
            })
        );

        let wide_state = Command::SchedulePortA {
            state: 0x3F,
            at: ClockValue::ZERO,
        };
        assert!(matches!(
            wide_state.encode(),
            Err(EncodeError::FieldOutOfRange { field: "state", .. })
        ));
    }

    #[test]
    fn test_decode_reports() {
        assert_eq!(
            decode(frame("4a00000100")),
            Event::InputChannel2 {
                ports: 0b1010,
                at: ClockValue(256)
            }
        );
        assert_eq!(decode(frame("1000000000")), Event::Heartbeat { at: ClockValue(0) });
        assert_eq!(
            decode(frame("2000010000")),
            Event::InputChannel1 { at: ClockValue(65_536) }
        );
        assert_eq!(
            decode(frame("8f00000001")),
            Event::InputChannel3 {
                ports: 0x0F,
                at: ClockValue(1)
            }
        );
        assert_eq!(
            decode(frame("ff7f0f552a")),
            Event::ScheduleFired {
                state: 0x1F,
                at: ClockValue(0x7F0F_552A)
            }
        );
    }

    #[test]
    fn test_decode_is_total() {
        for id in 0..=u8::MAX {
            let event = decode(Frame::new(id, [0, 0, 0, 0]));
            let expected_unknown = !matches!(
                id,
                0x00 | 0x04 | 0x10 | 0x20 | 0x40..=0x4F | 0x80..=0x8F | 0xE0..=0xFF
            );
            assert_eq!(
                matches!(event, Event::Unrecognized(_)),
                expected_unknown,
                "id {id:#04x} decoded to {event:?}"
            );
        }
    }

    #[test]
    fn test_near_miss_ids_are_unrecognized() {
        for id in [0x01, 0x11, 0x21, 0x30, 0x50, 0x90, 0xC0, 0xDF] {
            let raw = Frame::new(id, [1, 2, 3, 4]);
            assert_eq!(decode(raw), Event::Unrecognized(raw));
        }
    }

    #[test]
    fn test_echoed_command_recovers_command() {
        let commands = [
            Command::ResetClock,
            Command::TaggedResetClock { tag: 0xCAFE_BEEF },
            Command::SetPorts {
                port_b: 0x12,
                port_a: Some(0x1F),
            },
            Command::SetPorts {
                port_b: 0x80,
                port_a: None,
            },
        ];
        for cmd in commands {
            let event = decode(cmd.encode().unwrap());
            assert!(matches!(event, Event::Ack(_)), "{cmd:?} -> {event:?}");
            assert_eq!(event.echoed_command(), Some(cmd));
        }
    }

    #[test]
    fn test_schedule_echo_has_fired_shape() {
        let at = ClockValue(0xDEAD_BEEF);
        let event = decode(Command::SchedulePortA { state: 0x09, at }.encode().unwrap());
        assert_eq!(event, Event::ScheduleFired { state: 0x09, at });
        assert_eq!(event.echoed_command(), None);
        assert_eq!(event.clock(), Some(at));
    }

    #[test]
    fn test_display_matches_box_vocabulary() {
        let setports = decode(frame("0405009b00"));
        assert_eq!(setports.to_string(), "setports PA:1B PB:05");
        let setportb = decode(frame("0402000000"));
        assert_eq!(setportb.to_string(), "setportb PB:02");
        assert_eq!(decode(frame("30aabbccdd")).to_string(), "unknown 30aabbccdd");
    }
}
