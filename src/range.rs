//! `Range` header handling for single `bytes` ranges.

use std::str::FromStr;

use thiserror::Error;

/// A syntactically valid single-range request, before the resource size is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=<start>-<end>`
    Bounded { start: u64, end: u64 },
    /// `bytes=<start>-`
    From { start: u64 },
    /// `bytes=-<length>`
    Suffix { length: u64 },
}

/// Inclusive `[start, end]` byte window inside a resource of `size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("malformed range header")]
    Malformed,
    #[error("range not satisfiable for resource of {size} bytes")]
    Unsatisfiable { size: u64 },
}

impl FromStr for RangeSpec {
    type Err = RangeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (unit, spec) = value.trim().split_once('=').ok_or(RangeError::Malformed)?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return Err(RangeError::Malformed);
        }

        // Multipart ranges are not served.
        if spec.contains(',') {
            return Err(RangeError::Malformed);
        }

        let (start, end) = spec.trim().split_once('-').ok_or(RangeError::Malformed)?;
        let start = parse_position(start)?;
        let end = parse_position(end)?;

        match (start, end) {
            (Some(start), Some(end)) => Ok(RangeSpec::Bounded { start, end }),
            (Some(start), None) => Ok(RangeSpec::From { start }),
            (None, Some(length)) => Ok(RangeSpec::Suffix { length }),
            (None, None) => Err(RangeError::Malformed),
        }
    }
}

fn parse_position(value: &str) -> Result<Option<u64>, RangeError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Malformed);
    }

    value.parse::<u64>().map(Some).map_err(|_| RangeError::Malformed)
}

impl RangeSpec {
    /// Resolve against a resource of `size` bytes, clamping the end to the
    /// last byte. A start at or past the end of the resource cannot be served.
    pub fn resolve(self, size: u64) -> Result<ByteRange, RangeError> {
        let unsatisfiable = RangeError::Unsatisfiable { size };
        if size == 0 {
            return Err(unsatisfiable);
        }
        let last = size - 1;

        let (start, end) = match self {
            RangeSpec::Bounded { start, end } => (start, end.min(last)),
            RangeSpec::From { start } => (start, last),
            RangeSpec::Suffix { length } => (size.saturating_sub(length), last),
        };

        if start >= size || start > end {
            return Err(unsatisfiable);
        }

        Ok(ByteRange { start, end, size })
    }
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.size)
    }
}

/// Parse and resolve a raw header value in one step.
pub fn resolve_header(header: &str, size: u64) -> Result<ByteRange, RangeError> {
    header.parse::<RangeSpec>()?.resolve(size)
}
