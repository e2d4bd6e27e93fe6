// Protocol constants for the tiny-v1 relay box

/// Every unit on the wire, in either direction, is exactly this many bytes
pub const FRAME_SIZE: usize = 5;

/// Size of the big-endian data field that follows the identifying byte
pub const DATA_SIZE: usize = FRAME_SIZE - 1;

/// Box clock rate in ticks per second (2.5 MHz / 16, +-0.5 ppm)
pub const TINY_RATE: u32 = 156_250;

/// The box emits a heartbeat every 2^16 clock ticks
pub const HEARTBEAT_TICKS: u32 = 1 << 16;

/// Recommended minimum lead time for a Port A schedule (~0.5 s)
pub const SCHEDULE_LEAD_TICKS: u32 = TINY_RATE / 2;

/// Serial line rate the box runs at (8N1).
pub const SERIAL_BAUD: u32 = 115_384;

/// Alignment probe. Only the `0xE0` at offset 1 is a valid opcode; the rest
/// is filler the box rejects if it ever lands at a frame start.
pub const ALIGN_PROBE: [u8; 6] = [0x10, 0xE0, 0x7F, 0x0F, 0x55, 0x2A];

/// What the box sends back once the probe's opcode falls on a frame boundary
pub const ALIGN_ECHO: [u8; FRAME_SIZE] = [0xE0, 0x7F, 0x0F, 0x55, 0x2A];

/// Bits available for a Port A mask
pub const PORT_A_BITS: u32 = 5;

/// Bits available for a Port B mask
pub const PORT_B_BITS: u32 = 8;

/// Bits available for an input channel port mask
pub const INPUT_PORT_BITS: u32 = 4;

/// High three bits shared by the schedule command and its reports
pub const SCHEDULE_PREFIX: u8 = 0xE0;

/// Mask selecting the Port A state out of a schedule identifying byte
pub const SCHEDULE_STATE_MASK: u8 = 0x1F;

/// Bit in data byte 2 of a SetPorts frame telling the box to apply Port A
pub const SET_PORT_A_FLAG: u8 = 0x80;
