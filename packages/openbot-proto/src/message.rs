//! Message kinds and the target report payload.

use alloc::format;
use core::{fmt, str::FromStr};

use thiserror::Error;

use crate::{
    LINE_TERMINATOR,
    decode::{Decode, DecodeError, decode_fields},
    encode::Encode,
};

/// Kinds of message understood by the decoder, keyed by header character.
///
/// Headers without a kind are valid framing and are reserved for future use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Bounding box of the tracked object plus the source image size.
    Target,
}

impl MessageKind {
    pub const fn header(self) -> char {
        match self {
            Self::Target => TargetReport::HEADER,
        }
    }

    pub const fn from_header(header: char) -> Option<Self> {
        match header {
            TargetReport::HEADER => Some(Self::Target),
            _ => None,
        }
    }
}

/// Bounding box of a tracked object, in image pixels.
///
/// `x` and `y` locate the centre of the box.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl From<TargetBox> for (i32, i32, i32, i32) {
    fn from(b: TargetBox) -> Self {
        (b.x, b.y, b.w, b.h)
    }
}

/// A decoded `t` message.
///
/// # Encoding
///
/// | Field          | Description |
/// |----------------|-------------|
/// | `header`       | Always `t`. |
/// | `x`            | Box centre, horizontal. |
/// | `y`            | Box centre, vertical. |
/// | `w`            | Box width. |
/// | `h`            | Box height. |
/// | `image_width`  | Width of the frame the box was detected in. |
/// | `image_height` | Height of the frame the box was detected in. |
///
/// Fields are signed base-10 integers separated by commas, and the line ends
/// with `\n`. Exactly [`Self::FIELD_COUNT`] fields are accepted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetReport {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub image_width: i32,
    pub image_height: i32,
}

impl TargetReport {
    pub const HEADER: char = 't';
    pub const FIELD_COUNT: usize = 6;

    pub const fn from_fields(fields: [i32; Self::FIELD_COUNT]) -> Self {
        let [x, y, w, h, image_width, image_height] = fields;
        Self {
            x,
            y,
            w,
            h,
            image_width,
            image_height,
        }
    }

    /// Fields in wire order.
    pub const fn fields(&self) -> [i32; Self::FIELD_COUNT] {
        [
            self.x,
            self.y,
            self.w,
            self.h,
            self.image_width,
            self.image_height,
        ]
    }

    pub const fn bounding_box(&self) -> TargetBox {
        TargetBox {
            x: self.x,
            y: self.y,
            w: self.w,
            h: self.h,
        }
    }

    pub const fn image_size(&self) -> (i32, i32) {
        (self.image_width, self.image_height)
    }

    pub const fn field(&self, field: TargetField) -> i32 {
        match field {
            TargetField::X => self.x,
            TargetField::Y => self.y,
            TargetField::W => self.w,
            TargetField::H => self.h,
        }
    }
}

impl Decode for TargetReport {
    fn decode(body: &str) -> Result<Self, DecodeError> {
        decode_fields::<Self, { TargetReport::FIELD_COUNT }>(body).map(Self::from_fields)
    }
}

impl fmt::Display for TargetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{},{},{},{},{},{}",
            Self::HEADER,
            self.x,
            self.y,
            self.w,
            self.h,
            self.image_width,
            self.image_height
        )
    }
}

/// Encodes the full line, terminator included.
impl Encode for TargetReport {
    fn size(&self) -> usize {
        format!("{self}").len() + 1
    }

    fn encode(&self, data: &mut [u8]) {
        let line = format!("{self}");
        data[..line.len()].copy_from_slice(line.as_bytes());
        data[line.len()] = LINE_TERMINATOR;
    }
}

/// One coordinate of the bounding box, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetField {
    X,
    Y,
    W,
    H,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown target field, expected one of x, y, w, h.")]
pub struct TargetFieldParseError;

impl FromStr for TargetField {
    type Err = TargetFieldParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x" | "X" => Ok(Self::X),
            "y" | "Y" => Ok(Self::Y),
            "w" | "W" => Ok(Self::W),
            "h" | "H" => Ok(Self::H),
            _ => Err(TargetFieldParseError),
        }
    }
}
