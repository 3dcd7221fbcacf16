use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::{header, Client, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use crate::rules::TransferRules;
use crate::source::Source;

/// Background worker performing one (possibly range-resumable) HTTP transfer
/// from a single source.
///
/// The worker probes the endpoint with HEAD, then streams the body through a
/// bounded pipe. A full pipe blocks the producer, throttling HTTP reads to
/// the consumer's pace. Transient failures are retried with a fixed backoff
/// up to the configured attempt count; on loop exit for any reason the
/// producer side closes and the consumer observes EOF.
///
/// Limitation: a source that does not accept ranged requests cannot resume.
/// With a nonzero `skip` the worker terminates without producing bytes and
/// the caller must restart from offset zero on a different source.
pub struct ResumableFetchWorker {
    rx: mpsc::Receiver<Bytes>,
    task: JoinHandle<()>,
}

struct Probe {
    etag: Option<String>,
    resumable: bool,
}

impl ResumableFetchWorker {
    /// Probe the source and spawn the transfer task starting at byte `skip`.
    ///
    /// Fails when the probe does not come back with status 200; the caller
    /// treats that candidate as unavailable and moves on.
    pub async fn open(
        client: &Client,
        source: Arc<Source>,
        transfer_id: Uuid,
        declared_size: u64,
        skip: u64,
        rules: &TransferRules,
    ) -> Result<Self> {
        let probe = probe_head(client, &source).await?;
        debug!(
            "source {}: transfer {transfer_id} probe ok (resumable: {}, skip: {skip})",
            source.id(),
            probe.resumable
        );

        let (tx, rx) = mpsc::channel(rules.pipe_capacity.max(1));
        let task = tokio::spawn(run_transfer(
            client.clone(),
            source,
            probe,
            declared_size,
            skip,
            rules.clone(),
            tx,
        ));
        Ok(Self { rx, task })
    }

    /// Next chunk from the pipe; `None` is EOF.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Stop the producer. Dropping the receiver alone stops it within one
    /// retry cycle; aborting the task cuts short a backoff sleep as well.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

async fn probe_head(client: &Client, source: &Source) -> Result<Probe> {
    let mut request = client.head(source.url().clone());
    if let Some(username) = source.username() {
        request = request.basic_auth(username, source.password());
    }
    let response = request
        .send()
        .await
        .with_context(|| format!("HEAD request to {} failed", source.url()))?;
    if response.status() != StatusCode::OK {
        return Err(anyhow!(
            "{} returned status {} on probe",
            source.url(),
            response.status()
        ));
    }
    let etag = response
        .headers()
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let resumable = response
        .headers()
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("bytes"))
        .unwrap_or(false);
    Ok(Probe { etag, resumable })
}

async fn run_transfer(
    client: Client,
    source: Arc<Source>,
    probe: Probe,
    declared_size: u64,
    skip: u64,
    rules: TransferRules,
    tx: mpsc::Sender<Bytes>,
) {
    if !probe.resumable {
        if skip != 0 {
            // No recovery path on this source; the stream layer restarts
            // elsewhere from offset zero.
            warn!(
                "source {}: cannot resume at offset {skip}, endpoint has no range support",
                source.id()
            );
            return;
        }
        stream_unranged(&client, &source, &rules, &tx).await;
        return;
    }

    let mut sent = 0u64;
    let mut attempts = 0usize;
    let remaining = declared_size.saturating_sub(skip);

    while sent < remaining && attempts < rules.max_attempts {
        match stream_ranged(
            &client,
            &source,
            &probe,
            skip + sent,
            declared_size,
            &rules,
            &tx,
        )
        .await
        {
            RangedOutcome::Progress(n) => {
                sent += n;
                if sent < remaining {
                    attempts += 1;
                    if attempts < rules.max_attempts {
                        debug!(
                            "source {}: retrying at offset {} (attempt {attempts})",
                            source.id(),
                            skip + sent
                        );
                        sleep(rules.retry_backoff).await;
                    }
                }
            }
            RangedOutcome::ConsumerGone | RangedOutcome::Replaced => return,
        }
    }
}

enum RangedOutcome {
    /// Bytes delivered before the attempt ended (possibly zero).
    Progress(u64),
    /// The consumer closed its end of the pipe.
    ConsumerGone,
    /// The remote resource changed identity mid-transfer.
    Replaced,
}

async fn stream_ranged(
    client: &Client,
    source: &Source,
    probe: &Probe,
    start: u64,
    declared_size: u64,
    rules: &TransferRules,
    tx: &mpsc::Sender<Bytes>,
) -> RangedOutcome {
    let end = declared_size.saturating_sub(1);
    let mut request = client
        .get(source.url().clone())
        .header(header::RANGE, format!("bytes={start}-{end}"));
    if let Some(username) = source.username() {
        request = request.basic_auth(username, source.password());
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            warn!("source {}: ranged request failed: {err}", source.id());
            return RangedOutcome::Progress(0);
        }
    };

    let ok = response.status() == StatusCode::PARTIAL_CONTENT
        || (start == 0 && response.status().is_success());
    if !ok {
        warn!(
            "source {}: unexpected status {} for range {start}-{end}",
            source.id(),
            response.status()
        );
        return RangedOutcome::Progress(0);
    }

    // The resource must not have been replaced between attempts.
    if let (Some(expected), Some(actual)) = (
        probe.etag.as_deref(),
        response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok()),
    ) {
        if expected != actual {
            warn!(
                "source {}: resource replaced mid-transfer (etag {expected} -> {actual})",
                source.id()
            );
            return RangedOutcome::Replaced;
        }
    }

    let mut delivered = 0u64;
    let mut body = response.bytes_stream();
    loop {
        let chunk = match timeout(rules.read_timeout, body.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(err))) => {
                warn!("source {}: read failed mid-body: {err}", source.id());
                return RangedOutcome::Progress(delivered);
            }
            Ok(None) => return RangedOutcome::Progress(delivered),
            Err(_) => {
                warn!("source {}: read timed out", source.id());
                return RangedOutcome::Progress(delivered);
            }
        };
        let len = chunk.len() as u64;
        if tx.send(chunk).await.is_err() {
            return RangedOutcome::ConsumerGone;
        }
        delivered += len;
    }
}

async fn stream_unranged(
    client: &Client,
    source: &Source,
    rules: &TransferRules,
    tx: &mpsc::Sender<Bytes>,
) {
    let mut request = client.get(source.url().clone());
    if let Some(username) = source.username() {
        request = request.basic_auth(username, source.password());
    }
    let response = match request.send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            warn!(
                "source {}: download failed with status {}",
                source.id(),
                response.status()
            );
            return;
        }
        Err(err) => {
            warn!("source {}: download failed: {err}", source.id());
            return;
        }
    };

    let mut body = response.bytes_stream();
    loop {
        match timeout(rules.read_timeout, body.next()).await {
            Ok(Some(Ok(chunk))) => {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
            Ok(Some(Err(err))) => {
                warn!("source {}: read failed mid-body: {err}", source.id());
                return;
            }
            Ok(None) => return,
            Err(_) => {
                warn!("source {}: read timed out", source.id());
                return;
            }
        }
    }
}

/// HTTP client shared by the transfers of one consumer, configured from the
/// synchronizer rules.
pub fn build_client(rules: &TransferRules) -> Result<Client> {
    Client::builder()
        .user_agent(concat!("hubfetch/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(rules.connect_timeout)
        .tcp_nodelay(true)
        .build()
        .context("failed to build HTTP client")
}
