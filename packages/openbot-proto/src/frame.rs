//! Line framing.

use alloc::string::String;

use crate::is_line_terminator;

/// Position of a [`MessageFramer`] within the current line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameMode {
    /// The next character starts a new message and becomes its header.
    #[default]
    AwaitingHeader,
    /// A header has been read; characters are appended to the body.
    AccumulatingBody,
}

/// A complete line, split into its header character and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: char,
    pub body: String,
}

impl Frame {
    pub fn new(header: char, body: impl Into<String>) -> Self {
        Self {
            header,
            body: body.into(),
        }
    }
}

/// Character-at-a-time state machine that splits a stream into [`Frame`]s.
///
/// Every input is valid. A line terminator (`\n` or `\r`) ends the current
/// message; the first character after a terminator is the header. Empty lines
/// are dropped without producing a frame, so `\r\n` endings are harmless.
///
/// The body is unbounded here. Callers reading from a transport bound the
/// number of characters they push per poll.
#[derive(Debug, Clone, Default)]
pub struct MessageFramer {
    mode: FrameMode,
    header: Option<char>,
    body: String,
}

impl MessageFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a single character, returning a [`Frame`] when it completes one.
    pub fn feed(&mut self, c: char) -> Option<Frame> {
        if is_line_terminator(c) {
            let header = self.header.take();
            let body = core::mem::take(&mut self.body);
            self.mode = FrameMode::AwaitingHeader;

            return header.map(|header| Frame { header, body });
        }

        match self.mode {
            FrameMode::AwaitingHeader => {
                self.header = Some(c);
                self.body.clear();
                self.mode = FrameMode::AccumulatingBody;
            }
            FrameMode::AccumulatingBody => self.body.push(c),
        }

        None
    }

    /// Pushes a raw byte. Bytes map one-to-one onto characters.
    pub fn feed_byte(&mut self, byte: u8) -> Option<Frame> {
        self.feed(byte as char)
    }

    pub const fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Header of the message currently being accumulated, if any.
    pub const fn header(&self) -> Option<char> {
        self.header
    }

    /// Body accumulated so far for the current message.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Returns `true` when no partial message is buffered.
    pub fn is_idle(&self) -> bool {
        self.mode == FrameMode::AwaitingHeader && self.header.is_none()
    }

    /// Discards any partially accumulated message.
    pub fn reset(&mut self) {
        self.mode = FrameMode::AwaitingHeader;
        self.header = None;
        self.body.clear();
    }
}
