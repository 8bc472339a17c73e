/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! CRC-64 (ECMA-182, reflected, as used by the `x-oss-hash-crc64ecma` header) helpers.

use crc_fast::CrcAlgorithm;

const ALGORITHM: CrcAlgorithm = CrcAlgorithm::Crc64Xz;

/// Compute the CRC-64 of `data`
pub fn crc64(data: &[u8]) -> u64 {
    crc_fast::checksum(ALGORITHM, data)
}

/// Combine `crc1` (of some prefix) with `crc2` (of the `len2` bytes that follow it)
/// into the CRC-64 of the concatenation.
pub fn combine(crc1: u64, crc2: u64, len2: u64) -> u64 {
    if len2 == 0 {
        return crc1;
    }
    crc_fast::checksum_combine(ALGORITHM, crc1, crc2, len2)
}

/// Running CRC-64 over a sequence of contiguous pieces of data.
///
/// Pieces can be fed either as raw bytes or as already computed `(crc, len)` pairs,
/// which is how part and chunk checksums are folded into a whole-object value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecksumAccumulator {
    crc: u64,
    len: u64,
}

impl ChecksumAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a previously computed value covering `len` bytes
    pub fn from_parts(crc: u64, len: u64) -> Self {
        Self { crc, len }
    }

    /// Feed raw bytes
    pub fn update(&mut self, data: &[u8]) {
        self.combine(crc64(data), data.len() as u64);
    }

    /// Feed a piece of `len` bytes whose CRC-64 is already known
    pub fn combine(&mut self, crc: u64, len: u64) {
        self.crc = if self.len == 0 {
            crc
        } else {
            combine(self.crc, crc, len)
        };
        self.len += len;
    }

    /// The CRC-64 of everything fed so far
    pub fn value(&self) -> u64 {
        self.crc
    }

    /// Number of bytes covered
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing has been fed yet
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
