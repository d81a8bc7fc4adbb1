use alloc::{string::String, vec, vec::Vec};
use core::fmt;

use thiserror::Error;

/// A type that can be encoded into a sequence of bytes.
pub trait Encode {
    /// Returns the number of bytes this value will take when encoded.
    fn size(&self) -> usize;

    /// Encodes this instance into the provided byte slice.
    fn encode(&self, data: &mut [u8]);

    /// Encodes this instance into a freshly allocated buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0; self.size()];
        self.encode(&mut data);
        data
    }
}

impl Encode for &[u8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn encode(&self, data: &mut [u8]) {
        data[..self.len()].copy_from_slice(self);
    }
}

#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Command token is empty.")]
    EmptyToken,

    #[error("Command token is {len} bytes long, the maximum is {max}.")]
    TokenTooLong { len: usize, max: usize },

    #[error("Command token contains byte {byte:#04x} at index {index}, expected printable ASCII.")]
    InvalidTokenByte { byte: u8, index: usize },
}

/// A short ASCII command sent back to the peer, such as `p0` or `p1`.
///
/// Tokens are non-empty, printable ASCII and never contain a line terminator,
/// so a token always fits in one line and one BLE notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandToken(String);

impl CommandToken {
    /// Largest token that fits in a single notification at the default ATT MTU.
    pub const MAX_LEN: usize = 20;

    /// Validates and wraps a token.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if the token is empty, longer than
    /// [`Self::MAX_LEN`], or contains anything other than printable ASCII.
    pub fn new(token: impl AsRef<str>) -> Result<Self, EncodeError> {
        Self::from_bytes(token.as_ref().as_bytes())
    }

    /// Validates a token received as raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncodeError> {
        if bytes.is_empty() {
            return Err(EncodeError::EmptyToken);
        }
        if bytes.len() > Self::MAX_LEN {
            return Err(EncodeError::TokenTooLong {
                len: bytes.len(),
                max: Self::MAX_LEN,
            });
        }
        if let Some((index, &byte)) = bytes
            .iter()
            .enumerate()
            .find(|(_, b)| !b.is_ascii_graphic() && **b != b' ')
        {
            return Err(EncodeError::InvalidTokenByte { byte, index });
        }

        // Every byte is printable ASCII, which is always valid UTF-8.
        Ok(Self(bytes.iter().map(|&b| b as char).collect()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Encode for CommandToken {
    fn size(&self) -> usize {
        self.0.len()
    }

    fn encode(&self, data: &mut [u8]) {
        self.as_bytes().encode(data)
    }
}

impl fmt::Display for CommandToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for CommandToken {
    type Error = EncodeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandToken, Encode, EncodeError};

    #[test]
    fn accepts_short_ascii() {
        let token = CommandToken::new("p1").unwrap();
        assert_eq!(token.as_str(), "p1");
        assert_eq!(token.to_bytes(), b"p1");
    }

    #[test]
    fn rejects_line_terminators() {
        assert_eq!(
            CommandToken::new("p1\n"),
            Err(EncodeError::InvalidTokenByte {
                byte: b'\n',
                index: 2
            })
        );
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert_eq!(CommandToken::new(""), Err(EncodeError::EmptyToken));
        assert_eq!(
            CommandToken::new("x".repeat(21)),
            Err(EncodeError::TokenTooLong { len: 21, max: 20 })
        );
    }

    #[test]
    fn rejects_non_ascii() {
        assert!(matches!(
            CommandToken::new("dừng"),
            Err(EncodeError::InvalidTokenByte { index: 1, .. })
        ));
    }
}
