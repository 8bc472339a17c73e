/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

mod context;
mod service;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::checkpoint::{
    self, CheckpointStore, Fingerprint, ObjectLocator, UploadCheckpoint, UploadedPart,
};
use crate::checksum::{self, ChecksumAccumulator};
use crate::client::{CompletedPart, OperationClient, SharedOperationClient};
use crate::config::Config;
use crate::error::{self, Error, ErrorKind};
use crate::io::part_reader::{Builder as PartReaderBuilder, PartData, PartReader};
use crate::io::InputStream;
use crate::operation::{ProgressTracker, TransferContext};
use crate::types::TransferRequest;
use context::{UploadContext, UploadState};
use service::distribute_work;

/// Maximum number of parts that a single multipart upload supports
pub(crate) const MAX_PARTS: u64 = 10_000;

/// Result of a successful upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct UploadOutput {
    upload_id: Option<String>,
    etag: Option<String>,
    version_id: Option<String>,
    crc64: Option<u64>,
}

impl UploadOutput {
    /// The multipart upload ID, `None` when the object was sent with a single put
    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    /// Entity tag of the new object
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Version ID of the new object
    pub fn version_id(&self) -> Option<&str> {
        self.version_id.as_deref()
    }

    /// CRC-64 of the uploaded data, computed locally
    pub fn crc64(&self) -> Option<u64> {
        self.crc64
    }
}

/// Uploads objects, splitting large sources into parts sent in parallel.
///
/// Sources whose size is known and does not exceed the part size are sent with a
/// single put. Everything else goes through a multipart upload. File uploads can
/// checkpoint completed parts and resume after an interruption.
#[derive(Debug, Clone)]
pub struct Uploader {
    client: SharedOperationClient,
    config: Arc<Config>,
}

/// Grow `part_size` so that `total` bytes fit in at most [`MAX_PARTS`] parts.
///
/// The result stays a multiple of the requested part size.
pub(crate) fn adjust_part_size(total: u64, part_size: u64) -> u64 {
    let part_size = part_size.max(1);
    let min = total.div_ceil(MAX_PARTS);
    if part_size >= min {
        part_size
    } else {
        min.div_ceil(part_size) * part_size
    }
}

/// Checkpoint bookkeeping for a resumable file upload
#[derive(Debug)]
struct UploadCheckpointer {
    store: CheckpointStore,
    checkpoint: UploadCheckpoint,
}

impl UploadCheckpointer {
    async fn record(&mut self, part: &CompletedPart) {
        self.checkpoint
            .upload_info
            .parts
            .push(UploadedPart::from(part));
        if let Err(err) = self.store.save(&mut self.checkpoint).await {
            tracing::warn!(
                "failed to write checkpoint {}: {}",
                self.store.path().display(),
                err
            );
        }
    }
}

/// Where a multipart upload starts from
#[derive(Debug)]
struct MultipartStart {
    upload_id: String,
    completed: Vec<CompletedPart>,
    checkpointer: Option<UploadCheckpointer>,
}

impl Uploader {
    /// Create a new uploader
    pub fn new(client: SharedOperationClient, config: Config) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    /// The configuration of this uploader
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Upload `stream` to the object identified by `request`.
    ///
    /// Checkpointing does not apply, use [`upload_file`](Self::upload_file) for
    /// resumable uploads.
    #[tracing::instrument(skip_all, level = "debug", name = "upload-from", fields(object = %request.object_name()))]
    pub async fn upload_from(
        &self,
        cancel: &CancellationToken,
        request: TransferRequest,
        stream: InputStream,
    ) -> Result<UploadOutput, Error> {
        self.upload(cancel, request, stream, None).await
    }

    /// Upload the local file at `path` to the object identified by `request`.
    #[tracing::instrument(skip_all, level = "debug", name = "upload-file", fields(object = %request.object_name()))]
    pub async fn upload_file(
        &self,
        cancel: &CancellationToken,
        request: TransferRequest,
        path: impl AsRef<Path>,
    ) -> Result<UploadOutput, Error> {
        let path = checkpoint::absolute_path(path.as_ref())?;
        let stream = InputStream::from_path(&path)?;
        self.upload(cancel, request, stream, Some(path)).await
    }

    async fn upload(
        &self,
        cancel: &CancellationToken,
        request: TransferRequest,
        stream: InputStream,
        source: Option<PathBuf>,
    ) -> Result<UploadOutput, Error> {
        if cancel.is_cancelled() {
            return Err(error::operation_cancelled());
        }

        let request = Arc::new(request);
        let part_size = self.config.part_size_bytes();
        let total = stream.size_hint().exact_len();
        let mut progress = ProgressTracker::new(self.config.progress_listener(), total);

        match total {
            Some(total) if total <= part_size => {
                tracing::trace!("upload size ({total}) does not exceed part size ({part_size}); sending as a single put");
                let data = stream.read_all().await?;
                self.put_object(cancel, &request, data, &mut progress).await
            }
            Some(total) => {
                let part_size = adjust_part_size(total, part_size);
                tracing::trace!("upload request using multipart upload with part size: {part_size} bytes");
                self.multipart_upload(cancel, request, stream, None, part_size, source, progress)
                    .await
            }
            None => {
                // size unknown, peek at the first part to choose between put and multipart
                let reader = PartReaderBuilder::new()
                    .stream(stream)
                    .part_size(part_size)
                    .build()?;
                let first = tokio::select! {
                    _ = cancel.cancelled() => return Err(error::operation_cancelled()),
                    part = reader.next_part() => part?,
                };
                match first {
                    None => self.put_object(cancel, &request, Bytes::new(), &mut progress).await,
                    Some(part) if (part.data.len() as u64) < part_size => {
                        self.put_object(cancel, &request, part.data, &mut progress)
                            .await
                    }
                    Some(part) => {
                        let stream = InputStream::default();
                        let first = PartFeed { reader, first: part };
                        self.multipart_upload(
                            cancel,
                            request,
                            stream,
                            Some(first),
                            part_size,
                            None,
                            progress,
                        )
                        .await
                    }
                }
            }
        }
    }

    async fn put_object(
        &self,
        cancel: &CancellationToken,
        request: &TransferRequest,
        data: Bytes,
        progress: &mut ProgressTracker,
    ) -> Result<UploadOutput, Error> {
        let size = data.len() as u64;
        let crc64 = checksum::crc64(&data);
        let result = async {
            let resp = tokio::select! {
                _ = cancel.cancelled() => return Err(error::operation_cancelled()),
                resp = self.client.put_object(request, data).instrument(tracing::debug_span!("send-put-object")) => resp?,
            };

            if self.config.verify_data() {
                if let Some(remote) = resp.crc64 {
                    if remote != crc64 {
                        return Err(error::checksum_mismatch(
                            &request.object_name(),
                            crc64,
                            remote,
                        ));
                    }
                }
            }
            Ok::<_, Error>(resp)
        }
        .await;

        let resp = result.map_err(|err| error::upload_failed(err, None, request.object_name()))?;
        progress.advance(size);
        Ok(UploadOutput {
            upload_id: None,
            etag: resp.etag,
            version_id: resp.version_id,
            crc64: Some(crc64),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn multipart_upload(
        &self,
        cancel: &CancellationToken,
        request: Arc<TransferRequest>,
        stream: InputStream,
        feed: Option<PartFeed>,
        part_size: u64,
        source: Option<PathBuf>,
        mut progress: ProgressTracker,
    ) -> Result<UploadOutput, Error> {
        let start = match (&source, self.config.enable_checkpoint()) {
            (Some(path), true) => self.resume_or_initiate(&request, path, part_size).await,
            _ => self
                .client
                .initiate_multipart_upload(&request)
                .await
                .map(|upload_id| MultipartStart {
                    upload_id,
                    completed: Vec::new(),
                    checkpointer: None,
                }),
        }
        .map_err(|err| error::upload_failed(err, None, request.object_name()))?;
        let MultipartStart {
            upload_id,
            completed,
            mut checkpointer,
        } = start;
        tracing::trace!("multipart upload started with upload id: {:?}", upload_id);

        let ctx: UploadContext = TransferContext::new(
            self.client.clone(),
            self.config.clone(),
            request,
            cancel,
            UploadState {
                upload_id: upload_id.clone(),
            },
        );

        let result = async {
            let part_reader = match feed {
                Some(PartFeed { reader, first }) => {
                    reader.push_back(first)?;
                    reader
                }
                None => PartReaderBuilder::new()
                    .stream(stream)
                    .part_size(part_size)
                    .skip_parts(completed.iter().map(|p| p.part_number))
                    .build()?,
            };

            progress.advance(completed.iter().map(|p| p.size).sum());
            let parts = upload_parts(
                &ctx,
                Arc::new(part_reader),
                completed,
                checkpointer.as_mut(),
                &mut progress,
            )
            .await?;
            complete_upload(&ctx, parts).await
        }
        .await;

        match result {
            Ok(output) => {
                if let Some(checkpointer) = &checkpointer {
                    checkpointer.store.remove().await;
                }
                Ok(output)
            }
            Err(err) => {
                if checkpointer.is_none() {
                    abort_upload(&ctx).await;
                }
                Err(error::upload_failed(
                    err,
                    Some(upload_id),
                    ctx.request().object_name(),
                ))
            }
        }
    }

    /// Load a matching checkpoint and reconcile it with the parts the service
    /// still holds, or start a new multipart upload.
    async fn resume_or_initiate(
        &self,
        request: &TransferRequest,
        source: &Path,
        part_size: u64,
    ) -> Result<MultipartStart, Error> {
        let store = CheckpointStore::for_upload(
            &self.config.checkpoint_dir_or_default(),
            request,
            source,
        );
        let fingerprint = Fingerprint::from_file(source).await?;
        let locator = ObjectLocator::new(request);

        if let Some(mut cp) = store.load::<UploadCheckpoint>().await {
            let upload_id = cp.upload_info.upload_id.clone();
            if cp.matches(&fingerprint, &locator, source, part_size) {
                match self.client.list_parts(request, &upload_id).await {
                    Ok(remote) => {
                        cp.upload_info.parts.retain(|part| {
                            remote.iter().any(|r| {
                                r.part_number == part.part_number && r.etag == part.etag
                            })
                        });
                        let completed = cp
                            .upload_info
                            .parts
                            .iter()
                            .map(CompletedPart::from)
                            .collect::<Vec<_>>();
                        tracing::debug!(
                            "resuming upload {} with {} completed parts",
                            upload_id,
                            completed.len()
                        );
                        return Ok(MultipartStart {
                            upload_id,
                            completed,
                            checkpointer: Some(UploadCheckpointer {
                                store,
                                checkpoint: cp,
                            }),
                        });
                    }
                    Err(err) => {
                        tracing::debug!("upload {} cannot be resumed: {}", upload_id, err);
                    }
                }
            }
            // the recorded upload is not going to be completed, release its parts
            if cp.object_info == locator {
                abort_multipart(self.client.as_ref(), request, &upload_id).await;
            }
            store.remove().await;
        }

        let upload_id = self.client.initiate_multipart_upload(request).await?;
        let checkpoint =
            UploadCheckpoint::new(fingerprint, locator, source, part_size, upload_id.clone());
        Ok(MultipartStart {
            upload_id,
            completed: Vec::new(),
            checkpointer: Some(UploadCheckpointer { store, checkpoint }),
        })
    }
}

/// A part reader whose first part has already been read
#[derive(Debug)]
struct PartFeed {
    reader: PartReader,
    first: PartData,
}

/// Run the workers and collect completed parts, sorted by part number.
///
/// Completions are processed on the calling task: checkpoint updates and
/// progress callbacks happen here, in completion order.
async fn upload_parts(
    ctx: &UploadContext,
    part_reader: Arc<PartReader>,
    mut parts: Vec<CompletedPart>,
    mut checkpointer: Option<&mut UploadCheckpointer>,
    progress: &mut ProgressTracker,
) -> Result<Vec<CompletedPart>, Error> {
    let (comp_tx, mut comp_rx) = mpsc::channel(ctx.config().num_workers());
    let mut tasks = distribute_work(ctx, part_reader, comp_tx);

    let mut first_err: Option<Error> = None;
    while let Some(result) = comp_rx.recv().await {
        match result {
            Ok(part) => {
                if let Some(checkpointer) = checkpointer.as_deref_mut() {
                    checkpointer.record(&part).await;
                }
                if first_err.is_none() {
                    progress.advance(part.size);
                }
                parts.push(part);
            }
            Err(err) => {
                if first_err.is_none() {
                    tracing::debug!("part upload failed, cancelling remaining work: {}", err);
                    ctx.cancel_token().cancel();
                    first_err = Some(err);
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            first_err.get_or_insert(err.into());
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }

    parts.sort_by_key(|p| p.part_number);
    Ok(parts)
}

async fn complete_upload(
    ctx: &UploadContext,
    parts: Vec<CompletedPart>,
) -> Result<UploadOutput, Error> {
    if let Some((i, part)) = parts
        .iter()
        .enumerate()
        .find(|(i, p)| p.part_number as usize != i + 1)
    {
        return Err(Error::new(
            ErrorKind::RuntimeError,
            format!(
                "part list is not contiguous: expected part {}, found {}",
                i + 1,
                part.part_number
            ),
        ));
    }

    let resp = ctx
        .client()
        .complete_multipart_upload(ctx.request(), ctx.upload_id(), &parts)
        .instrument(tracing::debug_span!("send-complete-multipart-upload"))
        .await?;

    let crc64 = if parts.iter().all(|p| p.crc64.is_some()) {
        let mut acc = ChecksumAccumulator::new();
        for part in &parts {
            acc.combine(part.crc64.unwrap_or_default(), part.size);
        }
        Some(acc.value())
    } else {
        None
    };

    if ctx.config().verify_data() {
        if let (Some(local), Some(remote)) = (crc64, resp.crc64) {
            if local != remote {
                return Err(error::checksum_mismatch(
                    &ctx.request().object_name(),
                    local,
                    remote,
                ));
            }
        }
    }

    Ok(UploadOutput {
        upload_id: Some(ctx.upload_id().to_owned()),
        etag: resp.etag,
        version_id: resp.version_id,
        crc64,
    })
}

/// Abort the multipart upload, failures are only logged
async fn abort_upload(ctx: &UploadContext) {
    abort_multipart(ctx.client(), ctx.request(), ctx.upload_id()).await;
}

/// Best effort abort, failures are only logged
async fn abort_multipart(
    client: &dyn OperationClient,
    request: &TransferRequest,
    upload_id: &str,
) {
    let result = client
        .abort_multipart_upload(request, upload_id)
        .instrument(tracing::debug_span!("send-abort-multipart-upload"))
        .await;
    if let Err(err) = result {
        tracing::warn!("failed to abort multipart upload {}: {}", upload_id, err);
    }
}
