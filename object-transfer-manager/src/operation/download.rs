/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

mod context;
mod sequencer;
mod service;

use std::ffi::OsString;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{self, CheckpointStore, DownloadCheckpoint, Fingerprint, ObjectLocator};
use crate::checksum::ChecksumAccumulator;
use crate::client::{ObjectMeta, SharedOperationClient};
use crate::config::{Config, TEMP_FILE_SUFFIX};
use crate::error::{self, Error, ErrorKind};
use crate::operation::{ProgressTracker, TransferContext};
use crate::types::{HttpRange, TransferRequest};
use context::{DownloadContext, DownloadState};
use sequencer::Sequencer;
use service::{distribute_work, ChunkResponse};

/// Result of a successful download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct DownloadOutput {
    written: u64,
    etag: Option<String>,
    crc64: u64,
}

impl DownloadOutput {
    /// Number of bytes in the downloaded window
    pub fn written(&self) -> u64 {
        self.written
    }

    /// ETag of the downloaded object
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// CRC-64 of the downloaded window
    pub fn crc64(&self) -> u64 {
        self.crc64
    }
}

/// Downloads objects (or a byte range of them) into local files, fetching
/// fixed size chunks in parallel and writing them in order.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: SharedOperationClient,
    config: Arc<Config>,
}

/// Checkpoint bookkeeping for a resumable download
#[derive(Debug)]
struct DownloadCheckpointer {
    store: CheckpointStore,
    checkpoint: DownloadCheckpoint,
}

impl DownloadCheckpointer {
    async fn record(&mut self, offset: u64, crc64: u64) {
        self.checkpoint.download_info.offset = offset;
        self.checkpoint.download_info.crc64 = crc64;
        if let Err(err) = self.store.save(&mut self.checkpoint).await {
            tracing::warn!(
                "failed to write checkpoint {}: {}",
                self.store.path().display(),
                err
            );
        }
    }
}

/// Where a download starts from
#[derive(Debug)]
struct DownloadStart {
    /// absolute offset of the first byte still to fetch
    offset: u64,
    crc: ChecksumAccumulator,
    checkpointer: Option<DownloadCheckpointer>,
}

impl Downloader {
    /// Create a new downloader
    pub fn new(client: SharedOperationClient, config: Config) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    /// The configuration of this downloader
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Download the object (or the range set on `request`) into `dest`.
    ///
    /// With temp files enabled the data is written to `dest` + `.temp` and
    /// renamed once complete. With checkpointing enabled an interrupted
    /// download resumes from the last contiguous byte that reached the file.
    #[tracing::instrument(skip_all, level = "debug", name = "download-file", fields(object = %request.object_name()))]
    pub async fn download_file(
        &self,
        cancel: &CancellationToken,
        request: TransferRequest,
        dest: impl AsRef<Path>,
    ) -> Result<DownloadOutput, Error> {
        if cancel.is_cancelled() {
            return Err(error::operation_cancelled());
        }

        let dest = checkpoint::absolute_path(dest.as_ref())?;
        validate_destination(&dest).await?;

        let meta = self.client.head_object(&request.without_range()).await?;
        let range = request.range().copied().unwrap_or_default();
        let (start, end) = range.window(meta.size)?;
        tracing::debug!(
            "downloading [{start}, {end}) of {} ({} bytes)",
            request.object_name(),
            meta.size
        );

        let temp_path = self.temp_path(&dest);
        let result = self
            .download(cancel, request, &meta, start, end, &dest, &temp_path)
            .await;

        match result {
            Ok(output) => Ok(output),
            Err(err) => {
                if !self.config.enable_checkpoint() && self.config.use_temp_file() {
                    remove_file_quietly(&temp_path).await;
                }
                Err(error::download_failed(err, dest))
            }
        }
    }

    fn temp_path(&self, dest: &Path) -> PathBuf {
        if !self.config.use_temp_file() {
            return dest.to_path_buf();
        }
        let mut path = OsString::from(dest.as_os_str());
        path.push(TEMP_FILE_SUFFIX);
        PathBuf::from(path)
    }

    #[allow(clippy::too_many_arguments)]
    async fn download(
        &self,
        cancel: &CancellationToken,
        request: TransferRequest,
        meta: &ObjectMeta,
        start: u64,
        end: u64,
        dest: &Path,
        temp_path: &Path,
    ) -> Result<DownloadOutput, Error> {
        let part_size = self.config.part_size_bytes();
        let resume = self
            .resume_point(&request, meta, start, end, dest, temp_path, part_size)
            .await;
        let DownloadStart {
            offset,
            mut crc,
            mut checkpointer,
        } = resume;

        let mut file = open_output(temp_path, offset - start).await?;
        let mut progress = ProgressTracker::new(self.config.progress_listener(), Some(end - start));
        progress.advance(offset - start);

        let ctx: DownloadContext = TransferContext::new(
            self.client.clone(),
            self.config.clone(),
            Arc::new(request),
            cancel,
            DownloadState {
                etag: meta.etag.clone(),
            },
        );

        write_chunks(
            &ctx,
            &mut file,
            offset,
            end,
            &mut crc,
            checkpointer.as_mut(),
            &mut progress,
        )
        .await?;
        file.flush().await?;
        drop(file);

        let whole_object = start == 0 && end == meta.size;
        if self.config.verify_data() && whole_object {
            if let Some(remote) = meta.crc64 {
                if remote != crc.value() {
                    if let Some(checkpointer) = &checkpointer {
                        checkpointer.store.remove().await;
                    }
                    remove_file_quietly(temp_path).await;
                    return Err(error::checksum_mismatch(
                        &ctx.request().object_name(),
                        crc.value(),
                        remote,
                    ));
                }
            }
        }

        if temp_path != dest {
            fs::rename(temp_path, dest).await?;
        }
        if let Some(checkpointer) = &checkpointer {
            checkpointer.store.remove().await;
        }

        Ok(DownloadOutput {
            written: end - start,
            etag: meta.etag.clone(),
            crc64: crc.value(),
        })
    }

    /// Pick up a matching checkpoint whose partial file is still on disk, or
    /// start from the beginning of the window.
    #[allow(clippy::too_many_arguments)]
    async fn resume_point(
        &self,
        request: &TransferRequest,
        meta: &ObjectMeta,
        start: u64,
        end: u64,
        dest: &Path,
        temp_path: &Path,
        part_size: u64,
    ) -> DownloadStart {
        let fresh = DownloadStart {
            offset: start,
            crc: ChecksumAccumulator::new(),
            checkpointer: None,
        };
        if !self.config.enable_checkpoint() {
            return fresh;
        }

        let store =
            CheckpointStore::for_download(&self.config.checkpoint_dir_or_default(), request, dest);
        let fingerprint = Fingerprint::from_object(meta);
        let locator = ObjectLocator::new(request);

        if let Some(cp) = store.load::<DownloadCheckpoint>().await {
            let offset = cp.download_info.offset;
            let on_disk = fs::metadata(temp_path)
                .await
                .map(|m| m.len())
                .unwrap_or_default();
            if cp.matches(&fingerprint, &locator, dest, part_size)
                && (start..=end).contains(&offset)
                && on_disk >= offset - start
            {
                tracing::debug!("resuming download of {} at offset {offset}", locator.name);
                return DownloadStart {
                    offset,
                    crc: ChecksumAccumulator::from_parts(cp.download_info.crc64, offset - start),
                    checkpointer: Some(DownloadCheckpointer {
                        store,
                        checkpoint: cp,
                    }),
                };
            }
            tracing::debug!("discarding stale checkpoint {}", store.path().display());
            store.remove().await;
        }

        let checkpoint = DownloadCheckpoint::new(fingerprint, locator, dest, part_size, start);
        DownloadStart {
            checkpointer: Some(DownloadCheckpointer { store, checkpoint }),
            ..fresh
        }
    }
}

/// The parent directory must exist and `dest` must not be a directory
async fn validate_destination(dest: &Path) -> Result<(), Error> {
    if let Some(parent) = dest.parent() {
        let is_dir = fs::metadata(parent)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(error::invalid_input(format!(
                "destination directory {} does not exist",
                parent.display()
            )));
        }
    }
    if fs::metadata(dest).await.is_ok_and(|m| m.is_dir()) {
        return Err(error::invalid_input(format!(
            "destination {} is a directory",
            dest.display()
        )));
    }
    Ok(())
}

/// Open the output file positioned at `written` bytes, discarding anything past it.
async fn open_output(path: &Path, written: u64) -> Result<File, Error> {
    let mut file = if written > 0 {
        OpenOptions::new().write(true).open(path).await?
    } else {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?
    };
    if written > 0 {
        file.set_len(written).await?;
        file.seek(SeekFrom::Start(written)).await?;
    }
    Ok(file)
}

async fn remove_file_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!("failed to remove {}: {}", path.display(), err);
        }
    }
}

/// Download `[offset, end)` and write it to `file` in order.
///
/// Chunk results are reordered by a [`Sequencer`]; every contiguous chunk is
/// written, folded into the running checksum, reported as progress and recorded
/// in the checkpoint before its window slot is released.
async fn write_chunks(
    ctx: &DownloadContext,
    file: &mut File,
    offset: u64,
    end: u64,
    crc: &mut ChecksumAccumulator,
    mut checkpointer: Option<&mut DownloadCheckpointer>,
    progress: &mut ProgressTracker,
) -> Result<(), Error> {
    let n_workers = ctx.config().num_workers();
    let window = Arc::new(Semaphore::new(n_workers * 2));
    let (comp_tx, mut comp_rx) = mpsc::channel(n_workers);
    let mut tasks = distribute_work(ctx, offset, end, window, comp_tx);

    let mut sequencer = Sequencer::new(offset);
    let mut first_err: Option<Error> = None;
    while let Some(result) = comp_rx.recv().await {
        if first_err.is_some() {
            continue;
        }
        let chunk = match result {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::debug!("chunk download failed, cancelling remaining work: {}", err);
                ctx.cancel_token().cancel();
                first_err = Some(err);
                continue;
            }
        };

        sequencer.push(chunk);
        while let Some(chunk) = sequencer.pop_ready() {
            if let Err(err) = write_chunk(file, &chunk, crc, checkpointer.as_deref_mut()).await {
                ctx.cancel_token().cancel();
                first_err = Some(err);
                break;
            }
            progress.advance(chunk.data.len() as u64);
        }
        tracing::trace!(
            "written up to offset {}, {} chunks waiting",
            sequencer.next_offset(),
            sequencer.buffered()
        );
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            first_err.get_or_insert(err.into());
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }
    if sequencer.next_offset() != end {
        // workers only stop early on cancellation
        return Err(if ctx.cancel_token().is_cancelled() {
            error::operation_cancelled()
        } else {
            Error::new(
                ErrorKind::RuntimeError,
                format!(
                    "download stopped at offset {} before reaching {end}",
                    sequencer.next_offset()
                ),
            )
        });
    }
    Ok(())
}

async fn write_chunk(
    file: &mut File,
    chunk: &ChunkResponse,
    crc: &mut ChecksumAccumulator,
    checkpointer: Option<&mut DownloadCheckpointer>,
) -> Result<(), Error> {
    file.write_all(&chunk.data).await?;
    crc.combine(chunk.crc64, chunk.data.len() as u64);
    if let Some(checkpointer) = checkpointer {
        // the checkpoint must never claim bytes that are not on disk yet
        file.flush().await?;
        checkpointer
            .record(chunk.start + chunk.data.len() as u64, crc.value())
            .await;
    }
    Ok(())
}
