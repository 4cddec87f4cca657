use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::decode::{AudioDecoder, AudioWindow};
use crate::demux::DemuxOrchestrator;
use crate::engine::EngineLoader;
use crate::error::{Result, XsyncError};
use crate::packager::pack;
use crate::protocol::{AudioWindowRef, BufferSource, Envelope, Outgoing, Reply, Request, Response};
use crate::relay::{self, LogRelay};
use crate::timeline::TimelineValidator;
use crate::transfer::{new_transfer_id, ChunkAck, ChunkStore, Outbox};

const PURGE_INTERVAL: Duration = Duration::from_secs(30);

// id and type recovered from the head of a line that could not be parsed
static LINE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""id"\s*:\s*"([^"\\]{1,200})""#).expect("id pattern is valid"));
static LINE_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""type"\s*:\s*"([A-Z_]{1,40})""#).expect("type pattern is valid"));
static LINE_TRANSFER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""transferId"\s*:\s*"([^"\\]{1,200})""#).expect("transfer pattern is valid"));

/// What could be read off the head of an unparsed line
#[derive(Debug, Default, PartialEq, Eq)]
struct LineHead {
    id: Option<String>,
    kind: Option<String>,
    transfer_id: Option<String>,
}

impl LineHead {
    fn recover(head: &str) -> Self {
        let capture = |re: &Regex| re.captures(head).map(|caps| caps[1].to_string());
        Self {
            id: capture(&LINE_ID),
            kind: capture(&LINE_TYPE),
            transfer_id: capture(&LINE_TRANSFER),
        }
    }
}

/// One line read from the channel
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    /// Complete line (newline stripped by the caller)
    Line,
    /// Line over the limit; the buffer keeps only its head, the rest was skipped
    Oversized { len: usize },
    Eof,
}

/// Request dispatcher owning the transfer state and the demux/decode pipelines
pub struct Service {
    config: Config,
    store: ChunkStore,
    outbox: Outbox,
    loader: Arc<EngineLoader>,
    demux: DemuxOrchestrator,
    decoder: AudioDecoder,
}

impl Service {
    pub fn new(config: Config, loader: Arc<EngineLoader>) -> Self {
        let ttl = config.transfer.session_ttl();
        let validator = TimelineValidator::from_config(&config.timeline);
        Self {
            store: ChunkStore::new(ttl),
            outbox: Outbox::new(config.transfer.chunk_size, ttl),
            demux: DemuxOrchestrator::new(loader.clone(), validator, config.demux.clone()),
            decoder: AudioDecoder::new(loader.clone(), config.demux.clone()),
            loader,
            config,
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn loader(&self) -> &Arc<EngineLoader> {
        &self.loader
    }

    /// Handle one request. Failures become error responses, never panics or silence.
    pub async fn handle(&self, request: Request) -> Response {
        let kind = request.kind();
        let upload = match &request {
            Request::ChunkUpload { transfer_id, .. } => Some(transfer_id.clone()),
            _ => None,
        };

        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                if request_kind_is_chunk(kind) {
                    debug!("{} rejected: {}", kind, e);
                } else {
                    error!("{} failed: {}", kind, e);
                }
                self.failure(Some(kind), upload.as_deref(), e.to_string())
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Response> {
        match request {
            Request::Extract { job_id, source } => {
                let input = self.resolve(source, "extract input")?;
                info!("EXTRACT {} ({} bytes)", job_id, input.len());
                let tracks = self.demux.extract(&job_id, input).await?;
                let packed = pack(tracks, self.config.transfer.inline_threshold, &self.outbox);
                Ok(Response::extracted(packed.tracks, packed.chunked))
            }
            Request::ExtractUrl { job_id, stream_url } => {
                info!("EXTRACT_URL {}", job_id);
                let tracks = self.demux.extract_url(&job_id, &stream_url).await?;
                let packed = pack(tracks, self.config.transfer.inline_threshold, &self.outbox);
                Ok(Response::extracted(packed.tracks, packed.chunked))
            }
            Request::Decode { job_id, windows } => {
                let windows = windows
                    .into_iter()
                    .enumerate()
                    .map(|(i, w)| {
                        Ok(AudioWindow {
                            input: self.resolve(w.source, &format!("window {}", i + 1))?,
                            start_sec: w.start_sec,
                            dur_sec: w.dur_sec,
                            seek_to_sec: w.seek_to_sec,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                info!("DECODE {} ({} window(s))", job_id, windows.len());

                let decoded = self.decoder.decode_windows(&job_id, windows).await?;
                let refs = decoded
                    .into_iter()
                    .enumerate()
                    .map(|(i, window)| {
                        let transfer_id = new_transfer_id(&format!("adec_{}_{}", job_id, i));
                        let transfer = self.outbox.publish(&transfer_id, &window.audio);
                        AudioWindowRef::new(transfer, window.start_ms)
                    })
                    .collect();
                Ok(Response::decoded(refs))
            }
            Request::ChunkUpload {
                transfer_id,
                chunk_index,
                total_chunks,
                bytes,
                expected_bytes,
            } => {
                let ack = self
                    .store
                    .accept_chunk(&transfer_id, chunk_index, total_chunks, bytes, expected_bytes)?;
                Ok(Response::Chunk(ack))
            }
            Request::ChunkFetch { transfer_id, chunk_index } => {
                Ok(Response::fetched(self.outbox.fetch(&transfer_id, chunk_index)?))
            }
        }
    }

    /// Failure in the shape the request type expects: uploads get a rejected ack with
    /// the session's progress, fetches `ok: false`, everything else `success: false`
    fn failure(&self, kind: Option<&str>, transfer_id: Option<&str>, error: String) -> Response {
        match (kind, transfer_id) {
            (Some("CHUNK_UPLOAD"), Some(transfer_id)) => Response::Chunk(self.store.rejection(transfer_id, error)),
            (Some("CHUNK_UPLOAD"), None) => Response::Chunk(ChunkAck::rejected(error)),
            (Some("CHUNK_FETCH"), _) => Response::chunk_failed(error),
            _ => Response::job_failed(error),
        }
    }

    fn reject_line(&self, line: &str, error: XsyncError) -> Reply {
        warn!("{}", error);
        let head = LineHead::recover(line);
        let response = self.failure(head.kind.as_deref(), head.transfer_id.as_deref(), error.to_string());
        Reply { id: head.id, response }
    }

    /// Inline bytes, or the reassembled upload named by `transferId` (consumed)
    fn resolve(&self, source: BufferSource, what: &str) -> Result<Vec<u8>> {
        match (source.transfer_id, source.buffer) {
            (Some(transfer_id), _) => self.store.take(&transfer_id),
            (None, Some(buffer)) => Ok(buffer),
            (None, None) => Err(XsyncError::Transfer(format!("Missing buffer for {}", what))),
        }
    }

    /// Serve line-delimited JSON requests until `reader` closes.
    ///
    /// Every request runs on its own task; replies are written as single lines in
    /// completion order, carrying the request's `id` when one was given. Lines over
    /// `max_message_bytes` are skipped without being buffered.
    pub async fn serve<R, W>(self: Arc<Self>, mut reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(outgoing) = rx.recv().await {
                let line = serde_json::to_string(&outgoing)?;
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<_, XsyncError>(())
        });

        let purger = {
            let service = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(PURGE_INTERVAL);
                loop {
                    interval.tick().await;
                    let sessions = service.store.purge_expired();
                    let transfers = service.outbox.purge_expired();
                    if sessions + transfers > 0 {
                        debug!("Purged {} upload session(s), {} outbound transfer(s)", sessions, transfers);
                    }
                }
            })
        };

        let max = self.config.transfer.max_message_bytes;
        let relay = self
            .config
            .relay
            .enabled
            .then(|| LogRelay::new(tx.clone(), self.config.relay.verbose));
        info!("Serving requests (max message {} bytes)", max);

        let mut tasks = JoinSet::new();
        let mut buf = Vec::new();
        loop {
            reap(&mut tasks);

            let frame = read_frame(&mut reader, max, &mut buf).await?;
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            match frame {
                Frame::Eof => break,
                Frame::Oversized { len } => {
                    let err = XsyncError::Protocol(format!("Message of {} bytes exceeds the {} byte limit", len, max));
                    let _ = tx.send(Outgoing::Reply(self.reject_line(line, err)));
                    continue;
                }
                Frame::Line if line.is_empty() => continue,
                Frame::Line => {}
            }

            match serde_json::from_str::<Envelope>(line) {
                Ok(envelope) => {
                    let service = self.clone();
                    let tx = tx.clone();
                    let relay = relay.as_ref().map(|r| r.for_request(envelope.id.clone()));
                    tasks.spawn(relay::scope(relay, async move {
                        let response = service.handle(envelope.request).await;
                        let _ = tx.send(Outgoing::Reply(Reply { id: envelope.id, response }));
                    }));
                }
                Err(e) => {
                    let err = XsyncError::Protocol(format!("Malformed request: {}", e));
                    let _ = tx.send(Outgoing::Reply(self.reject_line(line, err)));
                }
            }
        }

        debug!("Input closed; waiting for {} in-flight request(s)", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            log_joined(joined);
        }
        purger.abort();
        drop(relay);
        drop(tx);
        writer_task
            .await
            .map_err(|e| XsyncError::Protocol(format!("Reply writer aborted: {}", e)))?
    }
}

fn request_kind_is_chunk(kind: &str) -> bool {
    matches!(kind, "CHUNK_UPLOAD" | "CHUNK_FETCH")
}

/// Collect finished request tasks without waiting; returns how many were collected
fn reap(tasks: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(joined) = tasks.try_join_next() {
        log_joined(joined);
        reaped += 1;
    }
    reaped
}

fn log_joined(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        error!("Request task aborted: {}", e);
    }
}

/// Read one newline-terminated frame into `buf`, holding at most `max + 1` bytes.
///
/// An oversized line keeps its first `max + 1` bytes in `buf` and the remainder up
/// to the next newline is consumed without being stored.
async fn read_frame<R>(reader: &mut R, max: usize, buf: &mut Vec<u8>) -> Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader).take(max as u64 + 1).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') || read <= max {
        return Ok(Frame::Line);
    }

    let mut len = read;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                len += pos;
                reader.consume(pos + 1);
                break;
            }
            None => {
                let n = available.len();
                len += n;
                reader.consume(n);
            }
        }
    }
    Ok(Frame::Oversized { len })
}
