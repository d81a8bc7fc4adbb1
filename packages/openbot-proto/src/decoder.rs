use core::num::NonZeroUsize;

use crate::{
    decode::{Decode, DecodeError},
    frame::Frame,
    message::{MessageKind, TargetReport},
    smoothing::TargetSmoother,
};

/// Result of decoding one [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A well-formed target report, smoothed if smoothing is enabled.
    Target(TargetReport),
    /// A target frame whose body could not be decoded.
    Rejected(DecodeError),
    /// A frame whose header has no [`MessageKind`].
    Ignored { header: char },
}

/// Turns framed lines into target reports.
///
/// Smoothing windows only ever see fields from frames that decoded
/// completely; a rejected frame leaves them untouched.
#[derive(Debug, Clone, Default)]
pub struct TargetDecoder {
    smoother: Option<TargetSmoother>,
}

impl TargetDecoder {
    /// Creates a decoder. `smoothing` is the moving-average window size, or
    /// `None` to pass fields through unchanged.
    pub fn new(smoothing: Option<NonZeroUsize>) -> Self {
        Self {
            smoother: smoothing.map(TargetSmoother::new),
        }
    }

    pub fn smoothing_window(&self) -> Option<NonZeroUsize> {
        self.smoother.as_ref().map(TargetSmoother::capacity)
    }

    pub fn decode(&mut self, frame: &Frame) -> DecodeOutcome {
        match MessageKind::from_header(frame.header) {
            Some(MessageKind::Target) => match TargetReport::decode(&frame.body) {
                Ok(report) => DecodeOutcome::Target(match &mut self.smoother {
                    Some(smoother) => smoother.smooth(report),
                    None => report,
                }),
                Err(err) => DecodeOutcome::Rejected(err),
            },
            None => DecodeOutcome::Ignored {
                header: frame.header,
            },
        }
    }

    /// Forgets all buffered smoothing samples.
    pub fn reset(&mut self) {
        if let Some(smoother) = &mut self.smoother {
            smoother.clear();
        }
    }
}
