/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;
use std::str::FromStr;

use crate::error::{self, Error};

/// A single byte range of an object.
///
/// `count == 0` means "from `offset` to the end of the object". Suffix ranges
/// (`bytes=-n`) are not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HttpRange {
    /// First byte of the range
    pub offset: u64,
    /// Number of bytes, zero reads until the end of the object
    pub count: u64,
}

impl HttpRange {
    /// Create a range of `count` bytes starting at `offset`
    pub fn new(offset: u64, count: u64) -> Self {
        Self { offset, count }
    }

    /// Create an open ended range starting at `offset`
    pub fn from_offset(offset: u64) -> Self {
        Self { offset, count: 0 }
    }

    /// Exclusive end of the range, `None` when open ended.
    ///
    /// Saturates at `u64::MAX`, which is past the end of any object.
    pub fn end(&self) -> Option<u64> {
        (self.count > 0).then(|| self.offset.saturating_add(self.count))
    }

    /// Resolve the range against an object of `size` bytes, returning the
    /// `[start, end)` window actually covered.
    pub(crate) fn window(&self, size: u64) -> Result<(u64, u64), Error> {
        if self.offset > size || (self.offset == size && size > 0) {
            return Err(error::invalid_input(format!(
                "range {self} is out of bounds for an object of {size} bytes"
            )));
        }
        let end = match self.end() {
            Some(end) => end.min(size),
            None => size,
        };
        Ok((self.offset, end))
    }
}

impl fmt::Display for HttpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let range = match self.count {
            0 => ByteRange::AllFrom(self.offset),
            count => ByteRange::Inclusive(self.offset, self.offset.saturating_add(count - 1)),
        };
        write!(f, "{}", Range(range))
    }
}

impl FromStr for HttpRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Range::from_str(s)?.0 {
            // `0-18446744073709551615` spans 2^64 bytes, which only an open range can express
            ByteRange::Inclusive(start, end) => Ok(match (end - start).checked_add(1) {
                Some(count) => HttpRange::new(start, count),
                None => HttpRange::from_offset(start),
            }),
            ByteRange::AllFrom(start) => Ok(HttpRange::from_offset(start)),
            ByteRange::Last(_) => Err(error::invalid_input(format!(
                "suffix byte ranges are not supported: {s}"
            ))),
        }
    }
}

/// Representation of `Range` header.
/// NOTE: the service only supports a single bytes range this is a simplified representation
#[derive(Debug, Clone, PartialEq)]
struct Range(ByteRange);

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}", self.0)
    }
}

impl FromStr for Range {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut iter = s.trim().splitn(2, '=');
        match (iter.next(), iter.next()) {
            (Some("bytes"), Some(range)) => {
                if range.contains(',') {
                    Err(error::invalid_input(format!(
                        "multiple byte ranges not supported for range header {s}"
                    )))
                } else {
                    let spec = ByteRange::from_str(range).map_err(|_| {
                        error::invalid_input(format!("invalid range header {s}"))
                    })?;
                    Ok(Range(spec))
                }
            }
            _ => Err(error::invalid_input(format!(
                "unsupported byte range header format {s}"
            ))),
        }
    }
}

/// Representation of a single [RFC-9110 byte range](https://www.rfc-editor.org/rfc/rfc9110.html#name-byte-ranges)
#[derive(Debug, Clone, PartialEq)]
enum ByteRange {
    /// Get all bytes between x and y inclusive ("bytes=x-y")
    Inclusive(u64, u64),

    /// Get all bytes starting from x ("bytes=x-")
    AllFrom(u64),

    /// Get the last n bytes ("bytes=-n")
    Last(u64),
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ByteRange::Inclusive(start, end) => write!(f, "{}-{}", start, end),
            ByteRange::AllFrom(from) => write!(f, "{}-", from),
            ByteRange::Last(n) => write!(f, "-{}", n),
        }
    }
}

impl FromStr for ByteRange {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut iter = s.splitn(2, '-');
        match (iter.next(), iter.next()) {
            (Some(""), Some(end)) => end.parse().map(ByteRange::Last).or(Err(())),
            (Some(start), Some("")) => start.parse().map(ByteRange::AllFrom).or(Err(())),
            (Some(start), Some(end)) => match (start.parse(), end.parse()) {
                (Ok(start), Ok(end)) if start <= end => Ok(ByteRange::Inclusive(start, end)),
                _ => Err(()),
            },
            _ => Err(()),
        }
    }
}

/// Parsed `Content-Range` response header (`bytes 0-499/900`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte in the response
    pub start: u64,
    /// Last byte in the response, inclusive
    pub end: u64,
    /// Total size of the object, `None` when the service answered with `*`
    pub total: Option<u64>,
}

impl ContentRange {
    /// Create a content range for bytes `start..=end` of an object of `total` bytes
    pub fn new(start: u64, end: u64, total: Option<u64>) -> Self {
        Self { start, end, total }
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total {
            Some(total) => write!(f, "bytes {}-{}/{}", self.start, self.end, total),
            None => write!(f, "bytes {}-{}/*", self.start, self.end),
        }
    }
}

impl FromStr for ContentRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || error::invalid_input(format!("invalid content range header {s}"));
        let rest = s.trim().strip_prefix("bytes ").ok_or_else(invalid)?;
        let (range, total) = rest.split_once('/').ok_or_else(invalid)?;
        let (start, end) = range.split_once('-').ok_or_else(invalid)?;
        let start: u64 = start.parse().map_err(|_| invalid())?;
        let end: u64 = end.parse().map_err(|_| invalid())?;
        let total = match total {
            "*" => None,
            total => Some(total.parse::<u64>().map_err(|_| invalid())?),
        };
        if start > end || total.is_some_and(|t| end >= t) {
            return Err(invalid());
        }
        Ok(ContentRange { start, end, total })
    }
}

#[cfg(test)]
mod tests {
    use super::{ByteRange, ContentRange, HttpRange, Range};
    use crate::error::ErrorKind;
    use std::str::FromStr;

    #[test]
    fn test_byte_range_from_str() {
        assert_eq!(
            ByteRange::Last(500),
            Range::from_str("bytes=-500").unwrap().0
        );
        assert_eq!(
            ByteRange::AllFrom(200),
            Range::from_str("bytes=200-").unwrap().0
        );
        assert_eq!(
            ByteRange::Inclusive(200, 500),
            Range::from_str("bytes=200-500").unwrap().0
        );
    }

    #[test]
    fn test_invalid_byte_range_from_str() {
        for header in ["bytes=-", "bytes=500-200", "bytes=0-200,400-500", "items=0-1"] {
            let err = HttpRange::from_str(header).unwrap_err();
            assert_eq!(&ErrorKind::InputInvalid, err.kind(), "{header}");
        }
        let err = HttpRange::from_str("bytes=-500").unwrap_err();
        assert_eq!(&ErrorKind::InputInvalid, err.kind());
    }

    #[test]
    fn test_http_range_display() {
        assert_eq!("bytes=2-4", HttpRange::new(2, 3).to_string());
        assert_eq!("bytes=2-", HttpRange::from_offset(2).to_string());
        assert_eq!(HttpRange::new(2, 3), "bytes=2-4".parse().unwrap());
        assert_eq!(HttpRange::from_offset(7), "bytes=7-".parse().unwrap());
    }

    #[test]
    fn test_http_range_window() {
        assert_eq!((2, 5), HttpRange::new(2, 3).window(10).unwrap());
        assert_eq!((2, 10), HttpRange::new(2, 100).window(10).unwrap());
        assert_eq!((4, 10), HttpRange::from_offset(4).window(10).unwrap());
        assert_eq!((0, 0), HttpRange::from_offset(0).window(0).unwrap());
        assert!(HttpRange::from_offset(10).window(10).is_err());
    }

    #[test]
    fn test_http_range_at_u64_limits() {
        let max = u64::MAX;
        assert_eq!(
            HttpRange::from_offset(0),
            format!("bytes=0-{max}").parse().unwrap()
        );
        assert_eq!(
            HttpRange::new(1, max),
            format!("bytes=1-{max}").parse().unwrap()
        );
        assert_eq!(
            HttpRange::new(max, 1),
            format!("bytes={max}-{max}").parse().unwrap()
        );
        assert!(HttpRange::from_str(&format!("bytes=0-{max}0")).is_err());

        let range = HttpRange::new(10, max);
        assert_eq!(Some(max), range.end());
        assert_eq!(format!("bytes=10-{max}"), range.to_string());
        assert_eq!((10, 100), range.window(100).unwrap());
    }

    #[test]
    fn test_content_range() {
        assert_eq!(
            ContentRange::new(0, 499, Some(900)),
            "bytes 0-499/900".parse().unwrap()
        );
        assert_eq!(
            ContentRange::new(10, 19, None),
            "bytes 10-19/*".parse().unwrap()
        );
        assert!(ContentRange::from_str("bytes 10-9/100").is_err());
        assert!(ContentRange::from_str("bytes 0-100/100").is_err());
        assert!(ContentRange::from_str("0-1/2").is_err());
        assert_eq!("bytes 0-499/900", ContentRange::new(0, 499, Some(900)).to_string());
    }
}
