/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/// Background prefetching wrapper around [`RangeReader`]
pub mod async_range_reader;
pub(crate) mod part_reader;
mod path_body;
/// Resumable reader over a byte range of a remote object
pub mod range_reader;
mod size_hint;
mod stream;

// re-exports
pub use self::async_range_reader::{AbandonHandle, AsyncRangeReader, AsyncReadOptions};
pub use self::path_body::PathBodyBuilder;
pub use self::range_reader::RangeReader;
pub use self::size_hint::SizeHint;
pub use self::stream::InputStream;
