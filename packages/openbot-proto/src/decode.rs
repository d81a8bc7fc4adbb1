use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub struct DecodeError {
    kind: DecodeErrorKind,
    type_name: &'static str,
}

impl DecodeError {
    pub fn new<T>(kind: DecodeErrorKind) -> Self {
        Self {
            kind,
            type_name: core::any::type_name::<T>(),
        }
    }

    pub const fn kind(&self) -> DecodeErrorKind {
        self.kind
    }
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Failed to decode {}: {}", self.type_name, self.kind)
    }
}

#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeErrorKind {
    #[error("Expected {expected} comma-separated fields, found {found}.")]
    FieldCount { expected: usize, found: usize },

    #[error("Field {index} is not a base-10 integer.")]
    InvalidInteger { index: usize },
}

/// A message body that can be reconstructed from the text following its
/// header character.
pub trait Decode {
    /// Attempts to decode `Self` from a line body (header and terminator
    /// already stripped).
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the body has the wrong shape or contains
    /// a field that cannot be parsed.
    fn decode(body: &str) -> Result<Self, DecodeError>
    where
        Self: Sized;
}

/// Splits `body` on commas and parses exactly `N` signed decimal integers.
///
/// Surrounding ASCII whitespace is ignored per field. Nothing is returned
/// unless every field parses.
pub(crate) fn decode_fields<T, const N: usize>(body: &str) -> Result<[i32; N], DecodeError> {
    let found = body.split(',').count();
    if found != N {
        return Err(DecodeError::new::<T>(DecodeErrorKind::FieldCount {
            expected: N,
            found,
        }));
    }

    let mut fields = [0; N];
    for (index, (slot, raw)) in fields.iter_mut().zip(body.split(',')).enumerate() {
        *slot = raw
            .trim_matches(|c: char| c.is_ascii_whitespace())
            .parse()
            .map_err(|_| DecodeError::new::<T>(DecodeErrorKind::InvalidInteger { index }))?;
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::{DecodeErrorKind, decode_fields};

    #[test]
    fn parses_signed_fields() {
        assert_eq!(decode_fields::<(), 3>("-4,0,+7").unwrap(), [-4, 0, 7]);
    }

    #[test]
    fn tolerates_field_whitespace() {
        assert_eq!(decode_fields::<(), 2>(" 12 ,\t3").unwrap(), [12, 3]);
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = decode_fields::<(), 4>("1,2,3").unwrap_err();
        assert_eq!(
            err.kind(),
            DecodeErrorKind::FieldCount {
                expected: 4,
                found: 3
            }
        );
    }

    #[test]
    fn rejects_non_numeric_field() {
        let err = decode_fields::<(), 3>("1,two,3").unwrap_err();
        assert_eq!(err.kind(), DecodeErrorKind::InvalidInteger { index: 1 });
    }

    #[test]
    fn rejects_empty_field() {
        let err = decode_fields::<(), 2>("1,").unwrap_err();
        assert_eq!(err.kind(), DecodeErrorKind::InvalidInteger { index: 1 });
    }

    #[test]
    fn rejects_out_of_range_field() {
        let err = decode_fields::<(), 1>("2147483648").unwrap_err();
        assert_eq!(err.kind(), DecodeErrorKind::InvalidInteger { index: 0 });
    }
}
