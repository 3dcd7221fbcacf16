use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use log::{debug, info, warn};
use reqwest::Client;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use super::worker::{build_client, ResumableFetchWorker};
use crate::checksum::{digests_match, ProductDigest};
use crate::error::TransferError;
use crate::product::ProductInfo;
use crate::rules::TransferRules;
use crate::source::{selector, Bandwidth, Source, SourceRegistry};

/// Cancels the consumer side of a [`MultiSourceStream`] from another task.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

struct ActiveTransfer {
    source: Arc<Source>,
    transfer_id: Uuid,
    worker: ResumableFetchWorker,
}

/// Consumer-facing adaptive reader over the registered sources.
///
/// Picks the best source by measured bandwidth, relays its bytes, and fails
/// over on errors or degradation without losing progress: the byte offset
/// and the running digest survive every switch. The consumer ends up with
/// either a complete, checksum-valid byte sequence or a terminal
/// [`TransferError`].
///
/// Single-consumer: `next_chunk` must not be called concurrently.
pub struct MultiSourceStream {
    registry: Arc<SourceRegistry>,
    rules: TransferRules,
    client: Client,
    product: ProductInfo,
    transferred: u64,
    digest: Option<ProductDigest>,
    checked: bool,
    failed: Option<TransferError>,
    current: Option<ActiveTransfer>,
    cancelled: Arc<AtomicBool>,
    switch_passes: usize,
}

impl MultiSourceStream {
    pub fn new(registry: Arc<SourceRegistry>, product: ProductInfo) -> Result<Self> {
        let rules = registry.rules().clone();
        let client = build_client(&rules)?;
        let digest = product
            .checksum
            .as_ref()
            .filter(|_| product.requires_verification())
            .map(|c| ProductDigest::new(c.algorithm));
        Ok(Self {
            registry,
            rules,
            client,
            product,
            transferred: 0,
            digest,
            checked: false,
            failed: None,
            current: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            switch_passes: 0,
        })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancelled.clone())
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Next chunk of product bytes; `Ok(None)` means the product is complete
    /// and, where applicable, checksum-verified.
    ///
    /// A terminal failure is sticky: once an `Err` has been returned, every
    /// later call repeats it without touching the network again.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransferError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        if self.checked {
            return Ok(None);
        }
        loop {
            if self.cancelled.load(Ordering::Relaxed) {
                return Err(self.fail(TransferError::InterruptedTransfer));
            }

            if let Err(err) = self.init_best_stream().await {
                return Err(self.fail(err));
            }
            let active = match self.current.as_mut() {
                Some(active) => active,
                None => {
                    let err = TransferError::SourceUnavailable {
                        product: self.product.uuid,
                    };
                    return Err(self.fail(err));
                }
            };

            match active.worker.next_chunk().await {
                Some(chunk) => {
                    let len = chunk.len() as u64;
                    self.transferred += len;
                    if self.transferred > self.product.declared_size {
                        let err = TransferError::OversizedTransfer {
                            transferred: self.transferred,
                            declared: self.product.declared_size,
                        };
                        return Err(self.fail(err));
                    }
                    if let Some(digest) = self.digest.as_mut() {
                        digest.update(&chunk);
                    }
                    active.source.record_bytes(active.transfer_id, len);
                    return Ok(Some(chunk));
                }
                None => {
                    // Producer closed the pipe; decide from the byte count.
                    if self.transferred == self.product.declared_size {
                        self.release_resources();
                        return match self.verify_checksum() {
                            Ok(()) => Ok(None),
                            Err(err) => Err(self.fail(err)),
                        };
                    }
                    warn!(
                        "incomplete transfer of {}: {}/{} bytes, switching source",
                        self.product.uuid, self.transferred, self.product.declared_size
                    );
                    self.release_resources();
                    self.switch_passes += 1;
                    if self.switch_passes >= self.rules.max_attempts {
                        let err = TransferError::IncompleteTransfer {
                            transferred: self.transferred,
                            declared: self.product.declared_size,
                        };
                        return Err(self.fail(err));
                    }
                }
            }
        }
    }

    /// Drive the stream to completion into `sink`. Returns the byte count.
    pub async fn copy_to<W>(&mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(chunk) = self.next_chunk().await? {
            sink.write_all(&chunk)
                .await
                .context("failed to write product bytes to sink")?;
        }
        Ok(self.transferred)
    }

    /// Select the best candidate and ensure a live worker against it.
    ///
    /// Keeps the existing stream when the selector's choice is the currently
    /// active source; otherwise releases the current transfer before
    /// switching, instructing the new worker to resume at the current byte
    /// offset.
    async fn init_best_stream(&mut self) -> Result<(), TransferError> {
        if self.current.is_some() && !self.should_switch() {
            return Ok(());
        }

        let mut candidates = self.registry.list();
        while let Some(best) = selector::pick_best(&candidates) {
            if let Some(active) = &self.current {
                if *active.source == *best {
                    return Ok(());
                }
                debug!(
                    "switching from source {} to source {} at offset {}",
                    active.source.id(),
                    best.id(),
                    self.transferred
                );
            }
            self.release_current();

            if best.active_downloads() >= best.max_download() {
                debug!("source {} at capacity, skipping", best.id());
                candidates.retain(|c| c.id() != best.id());
                continue;
            }
            let transfer_id = Uuid::new_v4();
            if !best.begin_transfer(transfer_id) {
                candidates.retain(|c| c.id() != best.id());
                continue;
            }
            match ResumableFetchWorker::open(
                &self.client,
                best.clone(),
                transfer_id,
                self.product.declared_size,
                self.transferred,
                &self.rules,
            )
            .await
            {
                Ok(worker) => {
                    info!(
                        "streaming {} from source {} at offset {}",
                        self.product.uuid,
                        best.id(),
                        self.transferred
                    );
                    self.current = Some(ActiveTransfer {
                        source: best,
                        transfer_id,
                        worker,
                    });
                    return Ok(());
                }
                Err(err) => {
                    debug!("source {} unusable: {err:#}", best.id());
                    best.end_transfer(transfer_id);
                    candidates.retain(|c| c.id() != best.id());
                }
            }
        }

        if self.current.is_some() {
            Ok(())
        } else {
            Err(TransferError::SourceUnavailable {
                product: self.product.uuid,
            })
        }
    }

    /// A known bandwidth below the configured threshold forces a
    /// reselection pass.
    fn should_switch(&self) -> bool {
        match self.current.as_ref().map(|a| a.source.bandwidth()) {
            Some(Bandwidth::Measured(bw)) => bw < self.rules.degradation_threshold,
            _ => false,
        }
    }

    fn verify_checksum(&mut self) -> Result<(), TransferError> {
        self.checked = true;
        let Some(digest) = self.digest.take() else {
            // Derived sub-products carry no trustworthy checksum.
            return Ok(());
        };
        let expected = self
            .product
            .checksum
            .as_ref()
            .map(|c| c.value.clone())
            .unwrap_or_default();
        let computed = digest.finalize();
        if digests_match(&expected, &computed) {
            debug!("checksum verified for {}", self.product.uuid);
            Ok(())
        } else {
            Err(TransferError::ChecksumMismatch {
                product: self.product.uuid,
                expected,
                computed,
            })
        }
    }

    /// Record a terminal failure and release everything; every later poll
    /// repeats the same error.
    fn fail(&mut self, err: TransferError) -> TransferError {
        self.release_resources();
        self.failed = Some(err.clone());
        err
    }

    fn release_current(&mut self) {
        if let Some(active) = self.current.take() {
            active.source.end_transfer(active.transfer_id);
            active.worker.shutdown();
        }
    }

    /// Idempotent; closes the active transfer and releases its source slot.
    pub fn release_resources(&mut self) {
        self.release_current();
    }
}

impl Drop for MultiSourceStream {
    fn drop(&mut self) {
        self.release_resources();
    }
}
