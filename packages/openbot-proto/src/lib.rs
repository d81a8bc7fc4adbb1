//! Implementation of the OpenBot target-tracking line protocol in Rust.
//!
//! Every message is a single ASCII line: one header character identifying the
//! message kind, followed by a comma-separated body and a line terminator.
//!
//! ```text
//! t<x>,<y>,<w>,<h>,<image_width>,<image_height>\n
//! ```
//!
//! Bytes are pushed one at a time into a [`MessageFramer`], which yields
//! [`Frame`]s. A [`TargetDecoder`] turns frames into [`DecodeOutcome`]s,
//! optionally smoothing every field with a [`MovingAverage`].

#![no_std]

extern crate alloc;

mod decode;
mod decoder;
mod encode;
mod frame;
mod message;
mod smoothing;

pub use decode::{Decode, DecodeError, DecodeErrorKind};
pub use decoder::{DecodeOutcome, TargetDecoder};
pub use encode::{CommandToken, Encode, EncodeError};
pub use frame::{Frame, FrameMode, MessageFramer};
pub use message::{MessageKind, TargetBox, TargetField, TargetFieldParseError, TargetReport};
pub use smoothing::{MovingAverage, TargetSmoother};

/// Terminator appended to every outbound line.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Returns `true` for the characters that end a line (`\n` and `\r`).
pub const fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r')
}
