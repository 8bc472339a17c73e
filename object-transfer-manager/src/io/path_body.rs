/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::PathBuf;

use crate::error::{self, Error};
use crate::io::stream::RawInputStream;
use crate::io::InputStream;

/// A region of a local file
#[derive(Debug)]
pub(super) struct PathBody {
    pub(super) path: PathBuf,
    pub(super) offset: u64,
    pub(super) length: u64,
}

/// Builder for creating an [`InputStream`] that reads from a local file.
#[derive(Debug, Default)]
pub struct PathBodyBuilder {
    path: Option<PathBuf>,
    length: Option<u64>,
    offset: Option<u64>,
}

impl PathBodyBuilder {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// The path of the file to read. Required.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Number of bytes to read, defaults to everything after `offset`.
    pub fn length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Offset to start reading from. Default 0.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Validate the region against the file and build the stream
    pub fn build(self) -> Result<InputStream, Error> {
        let path = self
            .path
            .ok_or_else(|| error::invalid_input("path is required"))?;
        let metadata = std::fs::metadata(&path)?;
        if !metadata.is_file() {
            return Err(error::invalid_input(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let file_len = metadata.len();
        let offset = self.offset.unwrap_or_default();
        if offset > file_len {
            return Err(error::invalid_input(format!(
                "offset {offset} is past the end of {} ({file_len} bytes)",
                path.display()
            )));
        }
        let length = self.length.unwrap_or(file_len - offset);
        if length > file_len - offset {
            return Err(error::invalid_input(format!(
                "length {length} at offset {offset} exceeds the size of {} ({file_len} bytes)",
                path.display()
            )));
        }

        let body = PathBody {
            path,
            offset,
            length,
        };
        Ok(InputStream {
            inner: RawInputStream::Fs(body),
        })
    }
}
