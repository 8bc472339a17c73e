/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::{Path, PathBuf};

use crate::types::{ConcurrencySetting, PartSize, ProgressListener};
use crate::MEBIBYTE;

/// Default part size used for uploads and downloads
pub(crate) const DEFAULT_PART_SIZE: u64 = 6 * MEBIBYTE;

/// Default number of parallel workers
pub(crate) const DEFAULT_PARALLEL: usize = 3;

/// Suffix appended to the destination path while a download is in flight
pub(crate) const TEMP_FILE_SUFFIX: &str = ".temp";

/// Configuration for an [`Uploader`](crate::Uploader) or [`Downloader`](crate::Downloader)
#[derive(Debug, Clone)]
pub struct Config {
    part_size: PartSize,
    concurrency: ConcurrencySetting,
    enable_checkpoint: bool,
    checkpoint_dir: Option<PathBuf>,
    use_temp_file: bool,
    verify_data: bool,
    progress_listener: Option<ProgressListener>,
}

impl Config {
    /// Create a new `Config` builder
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Returns a reference to the target part size to use for transfer operations
    pub fn part_size(&self) -> &PartSize {
        &self.part_size
    }

    /// Returns the concurrency setting to use for individual transfer operations.
    pub fn concurrency(&self) -> &ConcurrencySetting {
        &self.concurrency
    }

    /// Whether progress is persisted so interrupted transfers can resume
    pub fn enable_checkpoint(&self) -> bool {
        self.enable_checkpoint
    }

    /// Directory checkpoint files are written to, if explicitly configured
    pub fn checkpoint_dir(&self) -> Option<&Path> {
        self.checkpoint_dir.as_deref()
    }

    /// Whether downloads are written to `<dest>.temp` and renamed on success
    pub fn use_temp_file(&self) -> bool {
        self.use_temp_file
    }

    /// Whether CRC-64 values are compared against those reported by the service
    pub fn verify_data(&self) -> bool {
        self.verify_data
    }

    /// The configured progress listener
    pub fn progress_listener(&self) -> Option<&ProgressListener> {
        self.progress_listener.as_ref()
    }

    /// Part size in bytes with the default applied
    pub(crate) fn part_size_bytes(&self) -> u64 {
        match self.part_size {
            PartSize::Target(size) if size > 0 => size,
            _ => DEFAULT_PART_SIZE,
        }
    }

    /// Number of workers with the default applied
    pub(crate) fn num_workers(&self) -> usize {
        match self.concurrency {
            ConcurrencySetting::Explicit(n) if n > 0 => n,
            _ => DEFAULT_PARALLEL,
        }
    }

    /// Checkpoint directory with the default (system temp dir) applied
    pub(crate) fn checkpoint_dir_or_default(&self) -> PathBuf {
        self.checkpoint_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Builder::default().build()
    }
}

/// Fluent style builder for [Config]
#[derive(Debug, Clone)]
pub struct Builder {
    part_size: PartSize,
    concurrency: ConcurrencySetting,
    enable_checkpoint: bool,
    checkpoint_dir: Option<PathBuf>,
    use_temp_file: bool,
    verify_data: bool,
    progress_listener: Option<ProgressListener>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            part_size: PartSize::Auto,
            concurrency: ConcurrencySetting::Auto,
            enable_checkpoint: false,
            checkpoint_dir: None,
            use_temp_file: true,
            verify_data: true,
            progress_listener: None,
        }
    }
}

impl Builder {
    /// The target size of each part.
    ///
    /// Uploads whose size is known and does not exceed the part size are sent with a
    /// single put request.
    ///
    /// NOTE: The actual part size used may be larger than the configured part size if
    /// the current value would result in more than 10,000 parts for an upload request.
    ///
    /// Default is [PartSize::Auto] (6 MiB). A target of zero selects the default.
    pub fn part_size(mut self, part_size: PartSize) -> Self {
        self.part_size = part_size;
        self
    }

    /// Set the number of parallel workers used by a single operation.
    ///
    /// Default is [ConcurrencySetting::Auto] (3). An explicit zero selects the default.
    pub fn concurrency(mut self, concurrency: ConcurrencySetting) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Persist transfer progress so an interrupted operation can resume. Default `false`.
    pub fn enable_checkpoint(mut self, enable: bool) -> Self {
        self.enable_checkpoint = enable;
        self
    }

    /// Directory checkpoint files are written to. Defaults to the system temp dir.
    pub fn checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    /// Write downloads to `<dest>.temp` and rename on success. Default `true`.
    pub fn use_temp_file(mut self, enable: bool) -> Self {
        self.use_temp_file = enable;
        self
    }

    /// Compare CRC-64 values with the ones reported by the service. Default `true`.
    pub fn verify_data(mut self, enable: bool) -> Self {
        self.verify_data = enable;
        self
    }

    /// Progress callback invoked as bytes are transferred.
    pub fn progress_listener(mut self, listener: ProgressListener) -> Self {
        self.progress_listener = Some(listener);
        self
    }

    /// Consumes the builder and constructs a [`Config`](crate::config::Config)
    pub fn build(self) -> Config {
        Config {
            part_size: self.part_size,
            concurrency: self.concurrency,
            enable_checkpoint: self.enable_checkpoint,
            checkpoint_dir: self.checkpoint_dir,
            use_temp_file: self.use_temp_file,
            verify_data: self.verify_data,
            progress_listener: self.progress_listener,
        }
    }
}

/// Options for opening a [`ReadOnlyFile`](crate::file::ReadOnlyFile)
#[derive(Debug, Clone)]
pub struct ReadOnlyFileOptions {
    pub(crate) enable_prefetch: bool,
    pub(crate) prefetch_num: usize,
    pub(crate) chunk_size: u64,
    pub(crate) prefetch_threshold: u64,
    pub(crate) out_of_order_read_threshold: usize,
}

impl Default for ReadOnlyFileOptions {
    fn default() -> Self {
        Self {
            enable_prefetch: false,
            prefetch_num: 3,
            chunk_size: 6 * MEBIBYTE,
            prefetch_threshold: 20 * MEBIBYTE,
            out_of_order_read_threshold: 3,
        }
    }
}

impl ReadOnlyFileOptions {
    /// Enable background prefetching of sequential reads. Default `false`.
    pub fn enable_prefetch(mut self, enable: bool) -> Self {
        self.enable_prefetch = enable;
        self
    }

    /// Number of windows fetched ahead of the read position. Default 3.
    pub fn prefetch_num(mut self, num: usize) -> Self {
        self.prefetch_num = num.max(1);
        self
    }

    /// Size of each prefetch window. Default 6 MiB.
    pub fn chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Sequential bytes that must be read before prefetching starts. Default 20 MiB.
    pub fn prefetch_threshold(mut self, threshold: u64) -> Self {
        self.prefetch_threshold = threshold;
        self
    }

    /// Consecutive out-of-order reads tolerated before falling back to direct reads. Default 3.
    pub fn out_of_order_read_threshold(mut self, threshold: usize) -> Self {
        self.out_of_order_read_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(DEFAULT_PART_SIZE, config.part_size_bytes());
        assert_eq!(DEFAULT_PARALLEL, config.num_workers());
        assert!(config.use_temp_file());
        assert!(config.verify_data());
        assert!(!config.enable_checkpoint());
        assert_eq!(std::env::temp_dir(), config.checkpoint_dir_or_default());
    }

    #[test]
    fn test_zero_values_select_defaults() {
        let config = Config::builder()
            .part_size(PartSize::Target(0))
            .concurrency(ConcurrencySetting::Explicit(0))
            .build();
        assert_eq!(DEFAULT_PART_SIZE, config.part_size_bytes());
        assert_eq!(DEFAULT_PARALLEL, config.num_workers());
    }
}
