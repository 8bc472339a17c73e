/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/* Automatically managed default lints */
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
/* End of automatically managed default lints */

//! Object Transfer Manager
//!
//! Concurrent, resumable transfers between local files or streams and an
//! object store:
//!
//! - [`Uploader`] splits large sources into parts uploaded in parallel, with
//!   optional on-disk checkpoints to resume interrupted file uploads.
//! - [`Downloader`] fetches fixed size chunks of an object in parallel and
//!   writes them to a file in order, optionally through a temp file and with
//!   checkpointed resume.
//! - [`ReadOnlyFile`] and [`AppendFile`] expose a remote object as a seekable
//!   reader or a sequential appender.
//! - [`io::RangeReader`] and [`io::AsyncRangeReader`] stream a byte range of an
//!   object, resuming broken responses and prefetching in the background.
//!
//! Every transfer verifies data with CRC-64/XZ when the service reports one.
//! The object store is reached through the [`OperationClient`] trait, with
//! implementations for Amazon S3 ([`client::s3::S3Client`]) and an in-memory
//! store ([`client::memory::MemoryClient`]).

#![warn(
    missing_debug_implementations,
    missing_docs,
    rustdoc::missing_crate_level_docs,
    unreachable_pub,
    rust_2018_idioms
)]

pub(crate) const MEBIBYTE: u64 = 1024 * 1024;

/// Error types emitted by `object-transfer-manager`
pub mod error;

/// Common types used by `object-transfer-manager`
pub mod types;

/// Types and helpers for I/O
pub mod io;

/// Object store clients
pub mod client;

/// Transfer configuration
pub mod config;

/// Transfer manager operations
pub mod operation;

/// File-like access to remote objects
pub mod file;

/// CRC-64/XZ helpers
pub mod checksum;

pub(crate) mod checkpoint;

pub(crate) mod http;

pub use self::client::{OperationClient, SharedOperationClient};
pub use self::config::Config;
pub use self::file::{AppendFile, ReadOnlyFile};
pub use self::operation::download::Downloader;
pub use self::operation::upload::Uploader;
