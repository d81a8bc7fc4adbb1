//! Framer and decoder wired to the shared target.

use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};
use openbot_proto::{DecodeError, DecodeOutcome, MessageFramer, TargetDecoder, TargetReport};

use crate::state::SharedTarget;

/// What a single byte did to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The byte was buffered; no line was completed.
    Pending,
    /// A target line was decoded and published.
    Decoded(TargetReport),
    /// A target line was malformed; the target is now unavailable.
    Rejected(DecodeError),
    /// A line with an unassigned header was completed and dropped.
    Ignored { header: char },
}

impl FeedOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, FeedOutcome::Pending)
    }
}

/// The byte-to-target path shared by every transport.
#[derive(Debug)]
pub struct Pipeline {
    framer: MessageFramer,
    decoder: TargetDecoder,
    target: SharedTarget,
}

/// A [`Pipeline`] that can be fed from a radio callback and polled from the
/// main flow.
pub type SharedPipeline = Arc<Mutex<Pipeline>>;

impl Pipeline {
    pub fn new(decoder: TargetDecoder, target: SharedTarget) -> Self {
        Self {
            framer: MessageFramer::new(),
            decoder,
            target,
        }
    }

    pub fn into_shared(self) -> SharedPipeline {
        Arc::new(Mutex::new(self))
    }

    /// Pushes one byte, publishing or invalidating the target when it
    /// completes a line. `now_ms` stamps a successful decode.
    pub fn feed(&mut self, byte: u8, now_ms: u64) -> FeedOutcome {
        let Some(frame) = self.framer.feed_byte(byte) else {
            return FeedOutcome::Pending;
        };
        trace!("framed message: {:?}", frame);

        match self.decoder.decode(&frame) {
            DecodeOutcome::Target(report) => {
                debug!("decoded target: {:?}", report);
                self.target.publish(report, now_ms);
                FeedOutcome::Decoded(report)
            }
            DecodeOutcome::Rejected(err) => {
                warn!("Discarding malformed target message {:?}: {}", frame.body, err);
                self.target.invalidate();
                FeedOutcome::Rejected(err)
            }
            DecodeOutcome::Ignored { header } => {
                debug!("Ignoring message with unassigned header {:?}", header);
                FeedOutcome::Ignored { header }
            }
        }
    }

    /// Feeds a block of bytes and returns the outcome of every completed line.
    pub fn feed_all(&mut self, bytes: &[u8], now_ms: u64) -> Vec<FeedOutcome> {
        bytes
            .iter()
            .map(|byte| self.feed(*byte, now_ms))
            .filter(|outcome| !outcome.is_pending())
            .collect()
    }

    pub fn framer(&self) -> &MessageFramer {
        &self.framer
    }

    pub fn decoder(&self) -> &TargetDecoder {
        &self.decoder
    }

    pub fn target(&self) -> &SharedTarget {
        &self.target
    }

    /// Drops any partially framed line. Decoded state and smoothing windows
    /// are kept.
    pub fn reset_framing(&mut self) {
        self.framer.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use openbot_proto::{DecodeErrorKind, TargetDecoder, TargetReport};

    use super::{FeedOutcome, Pipeline};
    use crate::state::SharedTarget;

    fn pipeline(window: Option<usize>) -> Pipeline {
        Pipeline::new(
            TargetDecoder::new(window.and_then(NonZeroUsize::new)),
            SharedTarget::new(),
        )
    }

    #[test]
    fn publishes_decoded_targets() {
        let mut pipeline = pipeline(None);
        let outcomes = pipeline.feed_all(b"t10,20,30,40,640,480\n", 7);

        let report = TargetReport::from_fields([10, 20, 30, 40, 640, 480]);
        assert_eq!(outcomes, [FeedOutcome::Decoded(report)]);

        let latest = pipeline.target().snapshot();
        assert!(latest.available);
        assert_eq!(latest.report, report);
        assert_eq!(latest.last_update_ms, 7);
    }

    #[test]
    fn malformed_line_keeps_previous_fields() {
        let mut pipeline = pipeline(None);
        pipeline.feed_all(b"t1,2,3,4,5,6\n", 10);
        let outcomes = pipeline.feed_all(b"t9,9,9\n", 20);

        assert!(matches!(
            outcomes.as_slice(),
            [FeedOutcome::Rejected(err)] if err.kind() == DecodeErrorKind::FieldCount { expected: 6, found: 3 }
        ));

        let latest = pipeline.target().snapshot();
        assert!(!latest.available);
        assert_eq!(latest.report.fields(), [1, 2, 3, 4, 5, 6]);
        assert_eq!(latest.last_update_ms, 10);
    }

    #[test]
    fn empty_lines_change_nothing() {
        let mut pipeline = pipeline(None);
        pipeline.feed_all(b"t1,2,3,4,5,6\n", 10);
        let before = pipeline.target().snapshot();

        assert!(pipeline.feed_all(b"\n\r\n", 30).is_empty());
        assert_eq!(pipeline.target().snapshot(), before);
        assert!(pipeline.framer().is_idle());
    }

    #[test]
    fn unknown_headers_are_ignored() {
        let mut pipeline = pipeline(None);
        let outcomes = pipeline.feed_all(b"s1,2\n", 0);

        assert_eq!(outcomes, [FeedOutcome::Ignored { header: 's' }]);
        assert!(!pipeline.target().snapshot().available);
    }

    #[test]
    fn smoothing_applies_across_lines() {
        let mut pipeline = pipeline(Some(2));
        pipeline.feed_all(b"t1,1,1,1,640,480\nt3,3,3,3,640,480\n", 0);

        let latest = pipeline.target().snapshot();
        assert_eq!(latest.bounding_box().map(<(i32, i32, i32, i32)>::from), Some((2, 2, 2, 2)));
    }

    #[test]
    fn reset_framing_drops_partial_line() {
        let mut pipeline = pipeline(None);
        pipeline.feed_all(b"t1,2,", 0);
        pipeline.reset_framing();

        let outcomes = pipeline.feed_all(b"3,4,5,6\n", 0);

        assert_eq!(outcomes, [FeedOutcome::Ignored { header: '3' }]);
        assert!(!pipeline.target().snapshot().available);
    }
}
