/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use super::service::ChunkResponse;

/// Reorders chunks that complete out of order so they can be written as a
/// contiguous prefix of the download window.
#[derive(Debug)]
pub(super) struct Sequencer {
    /// absolute offset of the next chunk to release
    next: u64,
    chunks: BinaryHeap<Reverse<SequencedChunk>>,
}

impl Sequencer {
    pub(super) fn new(start: u64) -> Self {
        Self {
            next: start,
            chunks: BinaryHeap::with_capacity(8),
        }
    }

    pub(super) fn push(&mut self, chunk: ChunkResponse) {
        self.chunks.push(Reverse(SequencedChunk(chunk)));
    }

    /// Take the chunk starting at the next expected offset, if it arrived
    pub(super) fn pop_ready(&mut self) -> Option<ChunkResponse> {
        if self.peek()?.start != self.next {
            return None;
        }
        let chunk = self.chunks.pop()?.0 .0;
        self.next += chunk.data.len() as u64;
        Some(chunk)
    }

    /// Offset up to which chunks have been released
    pub(super) fn next_offset(&self) -> u64 {
        self.next
    }

    pub(super) fn buffered(&self) -> usize {
        self.chunks.len()
    }

    fn peek(&self) -> Option<&ChunkResponse> {
        self.chunks.peek().map(|c| &c.0 .0)
    }
}

#[derive(Debug)]
struct SequencedChunk(ChunkResponse);

impl Ord for SequencedChunk {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.start.cmp(&other.0.start)
    }
}

impl PartialOrd for SequencedChunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for SequencedChunk {}
impl PartialEq for SequencedChunk {
    fn eq(&self, other: &Self) -> bool {
        self.0.start == other.0.start
    }
}
